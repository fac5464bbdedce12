use crate::config::PoseLiftingOptions;
use crate::error::PoseLiftError;
use crate::pose::{Pose, Skeleton};

/// 除外されていないキーポイントのうち、信頼度が閾値を超える個数
pub fn count_confident_keypoints<S: Skeleton>(pose: &Pose<S>, options: &PoseLiftingOptions) -> usize {
    pose.keypoints()
        .iter()
        .filter(|kp| !options.is_excluded(kp.index))
        .filter(|kp| kp.exceeds(options.keypoint_confidence_threshold))
        .count()
}

/// 信頼度の高いキーポイントが足りない姿勢を棄却する
///
/// 除外指定は数えるときだけ使い、返す姿勢は入力そのまま（除外は3D推定側で再適用）。
pub fn filter_and_validate<S: Skeleton>(
    pose: Pose<S>,
    options: &PoseLiftingOptions,
) -> Result<Pose<S>, PoseLiftError> {
    let found = count_confident_keypoints(&pose, options);
    let required = options.min_keypoints_above_threshold;
    if found < required {
        tracing::debug!(found, required, "pose rejected by confidence gate");
        return Err(PoseLiftError::InsufficientConfidentKeypoints { found, required });
    }
    Ok(pose)
}
