use std::fmt;
use std::marker::PhantomData;

use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};

use super::skeleton::Skeleton;
use crate::error::PoseLiftError;

/// 幅・高さ（ピクセル）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// 縦横を入れ替えたサイズ
    pub fn transposed(&self) -> Self {
        Self::new(self.height, self.width)
    }
}

/// 軸平行矩形（左上原点）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// 単一キーポイント
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    /// レイアウト上のインデックス（テンプレートの点と 1:1 対応）
    pub index: usize,
    /// ピクセル座標（左上原点、y は下向き）
    pub position: Point2<f64>,
    /// 信頼度スコア (0.0〜1.0)
    pub score: f64,
}

impl Keypoint {
    pub fn new(index: usize, x: f64, y: f64, score: f64) -> Self {
        Self {
            index,
            position: Point2::new(x, y),
            score,
        }
    }

    /// 位置だけ差し替えたキーポイント
    pub fn with_position(&self, position: Point2<f64>) -> Self {
        Self { position, ..*self }
    }

    /// 信頼度が閾値を超えているか（厳密に大きい）
    pub fn exceeds(&self, threshold: f64) -> bool {
        self.score > threshold
    }
}

/// 1フレーム分の姿勢
///
/// スロット `i` のキーポイントは常に `index == i`。個数はレイアウトで固定。
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PoseRecord", into = "PoseRecord", bound = "")]
pub struct Pose<S: Skeleton> {
    keypoints: Vec<Keypoint>,
    score: f64,
    bounds: Size,
    _skeleton: PhantomData<S>,
}

#[derive(Serialize, Deserialize)]
struct PoseRecord {
    keypoints: Vec<Keypoint>,
    score: f64,
    bounds: Size,
}

impl<S: Skeleton> TryFrom<PoseRecord> for Pose<S> {
    type Error = PoseLiftError;

    fn try_from(record: PoseRecord) -> Result<Self, Self::Error> {
        Self::new(record.keypoints, record.score, record.bounds)
    }
}

impl<S: Skeleton> From<Pose<S>> for PoseRecord {
    fn from(pose: Pose<S>) -> Self {
        Self {
            keypoints: pose.keypoints,
            score: pose.score,
            bounds: pose.bounds,
        }
    }
}

impl<S: Skeleton> Pose<S> {
    /// キーポイント数とインデックス順を検証して作成
    pub fn new(keypoints: Vec<Keypoint>, score: f64, bounds: Size) -> Result<Self, PoseLiftError> {
        let layout = S::layout()?;
        if keypoints.len() != layout.keypoint_count() {
            return Err(PoseLiftError::KeypointCountMismatch {
                found: keypoints.len(),
                expected: layout.keypoint_count(),
            });
        }
        if let Some((slot, kp)) = keypoints.iter().enumerate().find(|(slot, kp)| kp.index != *slot) {
            return Err(PoseLiftError::KeypointIndexMismatch {
                slot,
                index: kp.index,
            });
        }
        Ok(Self::from_parts(keypoints, score, bounds))
    }

    /// 位置・スコアの並びから作成（インデックスは並び順）
    pub fn from_positions(
        points: &[(f64, f64, f64)],
        score: f64,
        bounds: Size,
    ) -> Result<Self, PoseLiftError> {
        let keypoints = points
            .iter()
            .enumerate()
            .map(|(i, &(x, y, s))| Keypoint::new(i, x, y, s))
            .collect();
        Self::new(keypoints, score, bounds)
    }

    /// 検証済みの並びから作成（crate 内で個数・順序を保つ変換専用）
    pub(crate) fn from_parts(keypoints: Vec<Keypoint>, score: f64, bounds: Size) -> Self {
        Self {
            keypoints,
            score,
            bounds,
            _skeleton: PhantomData,
        }
    }

    pub fn keypoints(&self) -> &[Keypoint] {
        &self.keypoints
    }

    pub fn keypoint(&self, index: usize) -> Option<&Keypoint> {
        self.keypoints.get(index)
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn bounds(&self) -> Size {
        self.bounds
    }

    /// 全キーポイントの平均信頼度
    pub fn average_score(&self) -> f64 {
        if self.keypoints.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.keypoints.iter().map(|k| k.score).sum();
        sum / self.keypoints.len() as f64
    }

    /// キーポイントを囲む最小矩形
    pub fn bounding_rect(&self) -> Rect {
        let mut min_x = f64::MAX;
        let mut min_y = f64::MAX;
        let mut max_x = f64::MIN;
        let mut max_y = f64::MIN;
        for kp in &self.keypoints {
            min_x = min_x.min(kp.position.x);
            min_y = min_y.min(kp.position.y);
            max_x = max_x.max(kp.position.x);
            max_y = max_y.max(kp.position.y);
        }
        Rect {
            x: min_x,
            y: min_y,
            width: max_x - min_x,
            height: max_y - min_y,
        }
    }

    /// 座標系を `target` のサイズに合わせてスケーリング
    pub fn scaled(&self, target: Size) -> Self {
        let sx = target.width / self.bounds.width;
        let sy = target.height / self.bounds.height;
        let keypoints = self
            .keypoints
            .iter()
            .map(|kp| kp.with_position(Point2::new(kp.position.x * sx, kp.position.y * sy)))
            .collect();
        Self::from_parts(keypoints, self.score, target)
    }

    /// 各キーポイントの位置を変換した姿勢
    pub(crate) fn map_positions<F>(&self, bounds: Size, f: F) -> Self
    where
        F: Fn(Point2<f64>) -> Point2<f64>,
    {
        let keypoints = self
            .keypoints
            .iter()
            .map(|kp| kp.with_position(f(kp.position)))
            .collect();
        Self::from_parts(keypoints, self.score, bounds)
    }

    /// 2点の中点
    pub(crate) fn midpoint(&self, pair: (usize, usize)) -> Vector2<f64> {
        let a = self.keypoints[pair.0].position.coords;
        let b = self.keypoints[pair.1].position.coords;
        (a + b) / 2.0
    }
}

impl<S: Skeleton> fmt::Debug for Pose<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rect = self.bounding_rect();
        write!(
            f,
            "Pose(score: {:.3}, rect: (({:.2},{:.2}),[{:.2},{:.2}]), keypoints: {:?})",
            self.score, rect.x, rect.y, rect.width, rect.height, self.keypoints
        )
    }
}
