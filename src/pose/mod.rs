pub mod image;
pub mod keypoint;
pub mod skeleton;

pub use image::{ImageMeta, ImageOrientation};
pub use keypoint::{Keypoint, Pose, Rect, Size};
pub use skeleton::{RigidFivePoint, Skeleton, SkeletonLayout};
