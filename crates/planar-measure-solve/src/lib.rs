//! Reference solvers for planar-board calibration.
//!
//! [`PlanarSolver`] implements [`planar_measure_core::VisionPrimitives`] on
//! pre-detected ChArUco corners:
//! - Zhang's closed-form intrinsics (zero skew) from per-view homographies,
//! - joint Levenberg-Marquardt refinement of `K`, distortion and poses,
//! - planar pose from a homography in normalized coordinates, refined per view.

mod pose;
mod refine;
mod solver;
mod zhang;

pub use solver::{CornerFrame, PlanarSolver, PlanarSolverOptions};
