//! Core types and geometry for planar-board camera calibration and measurement.
//!
//! This crate is intentionally small and purely geometric. It does *not*
//! depend on any concrete corner detector, image type or solver; those are
//! reached through the [`VisionPrimitives`] capability trait.

mod board;
mod camera;
mod distortion;
mod error;
mod homography;
mod logger;
mod observation;
pub mod synthetic;
mod vision;

pub use board::{BoardSpec, BoardSpecError};
pub use camera::{ExtrinsicPose, IntrinsicModel, ModelId};
pub use distortion::Distortion;
pub use error::CalibError;
pub use homography::{estimate_homography, Homography};
pub use observation::{BoardObservation, Correspondence, ImageSize};
pub use vision::{IntrinsicFit, PoseFit, VisionError, VisionPrimitives};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::{
    component, init_with_filter, init_with_level, LogDirectiveError, LogFilter, LOG_ENV,
};
