use std::fmt::Debug;

use crate::error::LayoutError;

/// キーポイント構成（個数・向き判定ペア・反転時の並べ替え）
///
/// 向きベクトルは `right` ペアの中点から `left` ペアの中点を引いたもの。
/// `flip_permutation[i]` は反転後のスロット `i` に入る元スロット。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkeletonLayout {
    name: &'static str,
    keypoint_count: usize,
    left_pair: (usize, usize),
    right_pair: (usize, usize),
    flip_permutation: Vec<usize>,
}

impl SkeletonLayout {
    /// 構成を検証して作成
    pub fn new(
        name: &'static str,
        keypoint_count: usize,
        left_pair: (usize, usize),
        right_pair: (usize, usize),
        flip_permutation: Vec<usize>,
    ) -> Result<Self, LayoutError> {
        if keypoint_count < 4 {
            return Err(LayoutError::TooFewKeypoints(keypoint_count));
        }

        let refs = [left_pair.0, left_pair.1, right_pair.0, right_pair.1];
        for &index in &refs {
            if index >= keypoint_count {
                return Err(LayoutError::PairIndexOutOfRange {
                    index,
                    count: keypoint_count,
                });
            }
        }
        for i in 0..refs.len() {
            if refs[i + 1..].contains(&refs[i]) {
                return Err(LayoutError::OverlappingPairs);
            }
        }

        if flip_permutation.len() != keypoint_count {
            return Err(LayoutError::PermutationLength {
                found: flip_permutation.len(),
                expected: keypoint_count,
            });
        }
        let mut seen = vec![false; keypoint_count];
        for &src in &flip_permutation {
            if src >= keypoint_count || seen[src] {
                return Err(LayoutError::NotAPermutation(keypoint_count));
            }
            seen[src] = true;
        }
        if flip_permutation
            .iter()
            .enumerate()
            .any(|(i, &src)| flip_permutation[src] != i)
        {
            return Err(LayoutError::NotAnInvolution);
        }

        Ok(Self {
            name,
            keypoint_count,
            left_pair,
            right_pair,
            flip_permutation,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn keypoint_count(&self) -> usize {
        self.keypoint_count
    }

    pub fn left_pair(&self) -> (usize, usize) {
        self.left_pair
    }

    pub fn right_pair(&self) -> (usize, usize) {
        self.right_pair
    }

    pub fn flip_permutation(&self) -> &[usize] {
        &self.flip_permutation
    }
}

/// 姿勢の型パラメータ。キーポイント構成を型レベルで区別する。
pub trait Skeleton: Debug + Clone + Copy + PartialEq + Send + Sync + 'static {
    /// キーポイント構成。実装側で検証済みの値を返すこと。
    fn layout() -> Result<SkeletonLayout, LayoutError>;
}

/// 5点の剛体レイアウト
///
/// 0,1 が左側、2,3 が右側、4 は中央（反転で動かない）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RigidFivePoint;

impl RigidFivePoint {
    pub const COUNT: usize = 5;
}

impl Skeleton for RigidFivePoint {
    fn layout() -> Result<SkeletonLayout, LayoutError> {
        SkeletonLayout::new("rigid_five_point", Self::COUNT, (0, 1), (2, 3), vec![2, 3, 0, 1, 4])
    }
}
