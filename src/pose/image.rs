use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use super::keypoint::{Pose, Size};
use super::skeleton::Skeleton;

/// 推論時に画像をどう回転させたか
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageOrientation {
    /// 回転なし
    #[default]
    Up,
    /// 90度回転して推論（縦持ちカメラの横長バッファなど）
    Right,
}

/// 元画像の情報
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImageMeta {
    /// 元画像のピクセルサイズ
    pub original_size: Size,
    #[serde(default)]
    pub orientation: ImageOrientation,
}

impl ImageMeta {
    pub fn new(original_size: Size, orientation: ImageOrientation) -> Self {
        Self {
            original_size,
            orientation,
        }
    }

    pub fn upright(width: f64, height: f64) -> Self {
        Self::new(Size::new(width, height), ImageOrientation::Up)
    }
}

impl<S: Skeleton> Pose<S> {
    /// 推論時の回転を戻して元画像の座標系に合わせる
    ///
    /// `Right`: (x, y) → (y, H - x)。H は元画像の高さ。
    pub fn rotated_to_original(&self, image: &ImageMeta) -> Pose<S> {
        match image.orientation {
            ImageOrientation::Up => self.clone(),
            ImageOrientation::Right => {
                let height = image.original_size.height;
                self.map_positions(self.bounds().transposed(), |p| Point2::new(p.y, height - p.x))
            }
        }
    }
}
