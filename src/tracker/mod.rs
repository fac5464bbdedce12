pub mod gate;
pub mod one_euro;
pub mod orientation;

pub use gate::{count_confident_keypoints, filter_and_validate};
pub use one_euro::KeypointSmoother;
pub use orientation::OrientationStabilizer;
