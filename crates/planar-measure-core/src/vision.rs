//! Capability interface to the vision primitives the pipeline relies on.
//!
//! Corner detection, the nonlinear intrinsic fit and the perspective pose
//! solve live behind [`VisionPrimitives`] so the pipeline can be driven by a
//! real detector in production and by deterministic stand-ins in tests.

use crate::{BoardObservation, Distortion, ImageSize, IntrinsicModel};
use nalgebra::{Matrix3, Point2, Vector3};

/// Failures reported by a [`VisionPrimitives`] implementation.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum VisionError {
    #[error("too few correspondences: {got} (need {need})")]
    TooFewPoints { got: usize, need: usize },
    #[error("degenerate geometry: {0}")]
    Degenerate(String),
    #[error("optimization did not converge: {0}")]
    NotConverged(String),
    #[error("solution is not finite")]
    NonFinite,
}

/// Raw output of an intrinsic fit.
#[derive(Clone, Debug, PartialEq)]
pub struct IntrinsicFit {
    pub camera_matrix: Matrix3<f64>,
    pub distortion: Distortion,
    /// RMS reprojection error over all correspondences, in pixels.
    pub rms: f64,
}

/// Raw output of a perspective pose solve (board -> camera).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PoseFit {
    pub rvec: Vector3<f64>,
    pub tvec: Vector3<f64>,
}

/// The four operations the calibration pipeline needs from a vision library.
pub trait VisionPrimitives {
    /// Whatever the detector consumes: an image, or pre-detected corners.
    type Frame;

    /// Detect the board in a frame. `None` if no usable board is visible.
    fn detect_board(&self, frame: &Self::Frame) -> Option<BoardObservation>;

    /// Fit a pinhole + radial-tangential model to all observations.
    fn fit_intrinsics(
        &self,
        observations: &[BoardObservation],
        image_size: ImageSize,
    ) -> Result<IntrinsicFit, VisionError>;

    /// Solve the board pose for one observation under `intrinsics`.
    fn solve_pose(
        &self,
        observation: &BoardObservation,
        intrinsics: &IntrinsicModel,
    ) -> Result<PoseFit, VisionError>;

    /// Remove lens distortion from a pixel.
    fn undistort_point(&self, pixel: Point2<f64>, intrinsics: &IntrinsicModel) -> Point2<f64> {
        intrinsics.undistort_pixel(pixel)
    }
}
