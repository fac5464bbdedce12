use thiserror::Error;

/// 予測器から渡されるエラー（そのまま伝搬する）
pub type BoxedPredictionError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// スケルトンレイアウトの構成エラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error("layout needs at least 4 keypoints for two reference pairs, got {0}")]
    TooFewKeypoints(usize),
    #[error("reference keypoint {index} is out of range for {count} keypoints")]
    PairIndexOutOfRange { index: usize, count: usize },
    #[error("reference pairs must use four distinct keypoints")]
    OverlappingPairs,
    #[error("flip permutation has {found} entries, expected {expected}")]
    PermutationLength { found: usize, expected: usize },
    #[error("flip permutation is not a bijection of 0..{0}")]
    NotAPermutation(usize),
    #[error("flip permutation must restore the original order when applied twice")]
    NotAnInvolution,
}

/// 姿勢リフティングのエラー
///
/// どれもフレーム単位で回復可能。呼び出し側は「このフレームは検出なし」として扱う。
#[derive(Debug, Error)]
pub enum PoseLiftError {
    #[error("only {found} keypoints above confidence threshold, need {required}")]
    InsufficientConfidentKeypoints { found: usize, required: usize },

    #[error("only {found} usable 2D/3D correspondences, need at least 3")]
    InsufficientCorrespondences { found: usize },

    #[error("degenerate point configuration: {0}")]
    DegeneratePointConfiguration(String),

    #[error("prediction returned no pose")]
    NoPoseDetected,

    #[error("pose prediction failed: {0}")]
    Prediction(#[source] BoxedPredictionError),

    #[error("template has {template} points but layout has {layout} keypoints")]
    TemplateMismatch { template: usize, layout: usize },

    #[error("pose has {found} keypoints but layout has {expected}")]
    KeypointCountMismatch { found: usize, expected: usize },

    #[error("keypoint in slot {slot} has index {index}")]
    KeypointIndexMismatch { slot: usize, index: usize },

    #[error(transparent)]
    Layout(#[from] LayoutError),
}

impl PoseLiftError {
    pub(crate) fn degenerate(reason: impl Into<String>) -> Self {
        Self::DegeneratePointConfiguration(reason.into())
    }
}
