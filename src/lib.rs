pub mod camera;
pub mod config;
pub mod error;
pub mod lifting;
pub mod pipeline;
pub mod pose;
pub mod tracker;

pub use error::PoseLiftError;
pub use pipeline::{PoseOutput, PosePredictor, RigidBodyPoseLifter};
