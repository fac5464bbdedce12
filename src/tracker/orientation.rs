use nalgebra::Vector3;

use crate::error::PoseLiftError;
use crate::pose::{Keypoint, Pose, Skeleton, SkeletonLayout};

/// 姿勢の向きベクトル
///
/// 右ペアの中点 − 左ペアの中点。z は 0。
pub fn reference_direction<S: Skeleton>(pose: &Pose<S>, layout: &SkeletonLayout) -> Vector3<f64> {
    let left = pose.midpoint(layout.left_pair());
    let right = pose.midpoint(layout.right_pair());
    let d = right - left;
    Vector3::new(d.x, d.y, 0.0)
}

/// 2ベクトルのなす角（度, 0〜180）。どちらかが長さ0なら0
pub fn angle_between_degrees(a: &Vector3<f64>, b: &Vector3<f64>) -> f64 {
    let norms = a.norm() * b.norm();
    if norms <= f64::EPSILON {
        return 0.0;
    }
    let cos = (a.dot(b) / norms).clamp(-1.0, 1.0);
    cos.acos().to_degrees()
}

/// 反転用の並べ替えを適用した姿勢
///
/// スロット `i` には元スロット `permutation[i]` の位置とスコアが入る。インデックスはスロット番号のまま。
pub fn flipped<S: Skeleton>(pose: &Pose<S>, layout: &SkeletonLayout) -> Pose<S> {
    let keypoints = layout
        .flip_permutation()
        .iter()
        .enumerate()
        .map(|(slot, &src)| {
            let kp = &pose.keypoints()[src];
            Keypoint {
                index: slot,
                position: kp.position,
                score: kp.score,
            }
        })
        .collect();
    Pose::from_parts(keypoints, pose.score(), pose.bounds())
}

/// 前フレームとの向きの連続性を保つ
///
/// 単眼2D推定では剛体の表裏が区別できないため、向きベクトルが閾値以上回ったら
/// キーポイントを入れ替えて前フレームに合わせる。
#[derive(Debug)]
pub struct OrientationStabilizer<S: Skeleton> {
    layout: SkeletonLayout,
    flip_threshold_degrees: Option<f64>,
    previous_pose: Option<Pose<S>>,
    previous_flipped: bool,
}

impl<S: Skeleton> OrientationStabilizer<S> {
    /// `flip_threshold_degrees` が None なら反転せず、前フレームの更新だけ行う
    pub fn new(flip_threshold_degrees: Option<f64>) -> Result<Self, PoseLiftError> {
        Ok(Self {
            layout: S::layout()?,
            flip_threshold_degrees,
            previous_pose: None,
            previous_flipped: false,
        })
    }

    pub fn flip_threshold_degrees(&self) -> Option<f64> {
        self.flip_threshold_degrees
    }

    /// 閾値だけ変更（状態は保持）
    pub fn set_flip_threshold(&mut self, degrees: Option<f64>) {
        self.flip_threshold_degrees = degrees;
    }

    /// 最後に受け付けた（補正後の）姿勢
    pub fn previous_pose(&self) -> Option<&Pose<S>> {
        self.previous_pose.as_ref()
    }

    /// 最後に受け付けた姿勢が反転されたか
    pub fn previous_flipped(&self) -> bool {
        self.previous_flipped
    }

    pub fn layout(&self) -> &SkeletonLayout {
        &self.layout
    }

    /// 前フレームの向きに合わせた姿勢を返し、状態を更新する
    pub fn orient(&mut self, pose: Pose<S>) -> Pose<S> {
        let (oriented, flipped) = match (&self.previous_pose, self.flip_threshold_degrees) {
            (Some(previous), Some(threshold)) => {
                let angle = angle_between_degrees(
                    &reference_direction(previous, &self.layout),
                    &reference_direction(&pose, &self.layout),
                );
                if angle > threshold {
                    tracing::debug!(angle, threshold, "orientation flipped");
                    (flipped(&pose, &self.layout), true)
                } else {
                    (pose, false)
                }
            }
            _ => (pose, false),
        };

        self.previous_pose = Some(oriented.clone());
        self.previous_flipped = flipped;
        oriented
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LayoutError;
    use crate::pose::{RigidFivePoint, Size};

    fn pose(points: &[(f64, f64, f64)]) -> Pose<RigidFivePoint> {
        Pose::from_positions(points, 0.9, Size::new(100.0, 100.0)).unwrap()
    }

    fn base_pose() -> Pose<RigidFivePoint> {
        pose(&[
            (10.0, 10.0, 0.9),
            (20.0, 10.0, 0.9),
            (10.0, 20.0, 0.1),
            (20.0, 20.0, 0.9),
            (15.0, 15.0, 0.9),
        ])
    }

    /// 0<->2, 1<->3 の位置を入れ替えた姿勢（見かけ上180度回転）
    fn swapped_pose() -> Pose<RigidFivePoint> {
        pose(&[
            (10.0, 20.0, 0.1),
            (20.0, 20.0, 0.9),
            (10.0, 10.0, 0.9),
            (20.0, 10.0, 0.9),
            (15.0, 15.0, 0.9),
        ])
    }

    fn positions(p: &Pose<RigidFivePoint>) -> Vec<(f64, f64)> {
        p.keypoints().iter().map(|k| (k.position.x, k.position.y)).collect()
    }

    #[test]
    fn test_reference_direction() {
        let layout = RigidFivePoint::layout().unwrap();
        let d = reference_direction(&base_pose(), &layout);
        // 左中点 (15,10)、右中点 (15,20)
        assert_eq!(d, Vector3::new(0.0, 10.0, 0.0));
    }

    #[test]
    fn test_angle_between() {
        let x = Vector3::new(1.0, 0.0, 0.0);
        let y = Vector3::new(0.0, 2.0, 0.0);
        assert!((angle_between_degrees(&x, &y) - 90.0).abs() < 1e-9);
        assert!((angle_between_degrees(&x, &-x) - 180.0).abs() < 1e-9);
        assert_eq!(angle_between_degrees(&x, &x), 0.0);
        assert_eq!(angle_between_degrees(&x, &Vector3::zeros()), 0.0);
    }

    #[test]
    fn test_first_frame_passthrough() {
        let mut s = OrientationStabilizer::<RigidFivePoint>::new(Some(15.0)).unwrap();
        assert!(s.previous_pose().is_none());
        let result = s.orient(swapped_pose());
        assert_eq!(result, swapped_pose());
        assert_eq!(s.previous_pose(), Some(&swapped_pose()));
        assert!(!s.previous_flipped());
    }

    #[test]
    fn test_static_sequence_never_flips() {
        for threshold in [0.5, 15.0, 90.0, 179.0] {
            let mut s = OrientationStabilizer::<RigidFivePoint>::new(Some(threshold)).unwrap();
            for _ in 0..10 {
                let result = s.orient(base_pose());
                assert_eq!(result, base_pose());
                assert!(!s.previous_flipped());
            }
        }
    }

    #[test]
    fn test_flip_restores_previous_direction() {
        let mut s = OrientationStabilizer::<RigidFivePoint>::new(Some(15.0)).unwrap();
        s.orient(base_pose());
        let result = s.orient(swapped_pose());

        assert!(s.previous_flipped());
        assert_eq!(positions(&result), positions(&base_pose()));
        // スコアも位置と一緒に移動する
        assert_eq!(result.keypoint(2).unwrap().score, 0.1);
        let indices: Vec<usize> = result.keypoints().iter().map(|k| k.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
        assert_eq!(s.previous_pose(), Some(&result));

        let layout = s.layout().clone();
        let prev_dir = reference_direction(&base_pose(), &layout);
        let new_dir = reference_direction(&result, &layout);
        assert!(angle_between_degrees(&prev_dir, &new_dir) < 1e-9);
    }

    #[test]
    fn test_flip_is_self_inverse() {
        let layout = RigidFivePoint::layout().unwrap();
        let original = base_pose();
        let twice = flipped(&flipped(&original, &layout), &layout);
        assert_eq!(twice, original);
        assert_ne!(flipped(&original, &layout), original);
    }

    #[test]
    fn test_consecutive_flips_track_corrected_pose() {
        let mut s = OrientationStabilizer::<RigidFivePoint>::new(Some(15.0)).unwrap();
        s.orient(base_pose());
        s.orient(swapped_pose());
        // 補正後の姿勢と比べるので、同じ入れ替え姿勢が続けば再び反転する
        let result = s.orient(swapped_pose());
        assert!(s.previous_flipped());
        assert_eq!(positions(&result), positions(&base_pose()));
        // 元の向きの姿勢は反転しない
        let result = s.orient(base_pose());
        assert!(!s.previous_flipped());
        assert_eq!(result, base_pose());
    }

    #[test]
    fn test_small_rotation_below_threshold() {
        let mut s = OrientationStabilizer::<RigidFivePoint>::new(Some(15.0)).unwrap();
        s.orient(base_pose());
        // 右ペアを少しずらす: 向き (0,10) → (1,10) ≈ 5.7度
        let nudged = pose(&[
            (10.0, 10.0, 0.9),
            (20.0, 10.0, 0.9),
            (11.0, 20.0, 0.1),
            (21.0, 20.0, 0.9),
            (15.0, 15.0, 0.9),
        ]);
        let result = s.orient(nudged.clone());
        assert_eq!(result, nudged);
        assert!(!s.previous_flipped());
    }

    #[test]
    fn test_disabled_threshold_is_passthrough() {
        let mut s = OrientationStabilizer::<RigidFivePoint>::new(None).unwrap();
        s.orient(base_pose());
        let result = s.orient(swapped_pose());
        assert_eq!(result, swapped_pose());
        assert_eq!(s.previous_pose(), Some(&swapped_pose()));

        // 後から閾値を設定しても前フレームは保持される
        s.set_flip_threshold(Some(15.0));
        let result = s.orient(base_pose());
        assert!(s.previous_flipped());
        assert_eq!(positions(&result), positions(&swapped_pose()));
    }

    /// 判定ペアと入れ替えを 5 点とは別に宣言したレイアウト
    ///
    /// 左 (5,6)、右 (1,2)。反転で 1<->5, 2<->6 を入れ替え、0,3,4 は動かない。
    #[derive(Debug, Clone, Copy, PartialEq)]
    struct SevenPoint;

    impl Skeleton for SevenPoint {
        fn layout() -> Result<SkeletonLayout, LayoutError> {
            SkeletonLayout::new("seven_point", 7, (5, 6), (1, 2), vec![0, 5, 6, 3, 4, 1, 2])
        }
    }

    fn seven(points: &[(f64, f64)]) -> Pose<SevenPoint> {
        let with_scores: Vec<(f64, f64, f64)> = points.iter().map(|&(x, y)| (x, y, 0.9)).collect();
        Pose::from_positions(&with_scores, 0.9, Size::new(100.0, 100.0)).unwrap()
    }

    #[test]
    fn test_seven_point_layout_flip() {
        let base = seven(&[
            (50.0, 50.0),
            (10.0, 20.0),
            (20.0, 20.0),
            (60.0, 60.0),
            (70.0, 70.0),
            (10.0, 10.0),
            (20.0, 10.0),
        ]);
        // 左右の組が入れ替わった見え方
        let swapped = seven(&[
            (50.0, 50.0),
            (10.0, 10.0),
            (20.0, 10.0),
            (60.0, 60.0),
            (70.0, 70.0),
            (10.0, 20.0),
            (20.0, 20.0),
        ]);

        let mut s = OrientationStabilizer::<SevenPoint>::new(Some(15.0)).unwrap();
        assert_eq!(s.layout().keypoint_count(), 7);
        assert_eq!(reference_direction(&base, s.layout()), Vector3::new(0.0, 10.0, 0.0));

        s.orient(base.clone());
        let result = s.orient(swapped);
        assert!(s.previous_flipped());
        let expected: Vec<(f64, f64)> = base.keypoints().iter().map(|k| (k.position.x, k.position.y)).collect();
        let actual: Vec<(f64, f64)> = result.keypoints().iter().map(|k| (k.position.x, k.position.y)).collect();
        assert_eq!(actual, expected);
        assert_eq!(result.keypoints().len(), 7);
    }
}
