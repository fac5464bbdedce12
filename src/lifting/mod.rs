pub mod scn;
pub mod solver;
pub mod template;

pub use scn::ScnPose;
pub use solver::{PnpSolution, PnpSolver, MIN_CORRESPONDENCES};
pub use template::{load_template, save_template, RigidBodyTemplate};
