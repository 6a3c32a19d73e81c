//! Planar-board camera calibration and on-plane distance measurement.
//!
//! This crate provides:
//! - stable re-exports of the `planar-measure-*` crates
//! - capture-source selection from the environment ([`CaptureSource`])
//! - an end-to-end run on a deterministic synthetic scene ([`synthetic`])
//! - (feature `cli`) the `planar-measure` binary.
//!
//! ## Quickstart
//!
//! ```no_run
//! use planar_measure::calib::{io, measure, MeasureOptions};
//! use planar_measure::nalgebra::Point2;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let intrinsics = io::load_intrinsics("camera_calibration.json")?;
//! let pose = io::load_extrinsics("camera_extrinsics.json", &intrinsics)?;
//! let result = measure(
//!     Point2::new(410.0, 380.0),
//!     Point2::new(655.0, 402.0),
//!     &intrinsics,
//!     &pose,
//!     &MeasureOptions::default(),
//! )?;
//! println!("{:.2} cm", result.distance_cm());
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `planar_measure::core`: board geometry, camera models, the
//!   `VisionPrimitives` capability trait and the error taxonomy.
//! - `planar_measure::solve`: `PlanarSolver`, a self-contained
//!   `VisionPrimitives` implementation.
//! - `planar_measure::calib`: accumulation, solve adapters, the calibration
//!   workflow, measurement, persistence and the async `CalibrationService`.

pub use nalgebra;
pub use planar_measure_calib as calib;
pub use planar_measure_core as core;
pub use planar_measure_solve as solve;

pub use planar_measure_calib::{
    CalibrationConfig, CalibrationPhase, CalibrationService, CalibrationWorkflow,
    MeasurementResult,
};
pub use planar_measure_core::{BoardSpec, CalibError, ExtrinsicPose, IntrinsicModel};
pub use planar_measure_solve::PlanarSolver;

mod capture;
pub mod synthetic;

pub use capture::{CaptureSource, CAMERA_SOURCE_ENV};
