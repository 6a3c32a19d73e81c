//! Calibration-and-measurement pipeline for a camera looking at a planar board.
//!
//! Stages:
//! - [`ObservationAccumulator`] collects board views,
//! - [`IntrinsicSolver`] turns the batch into an [`IntrinsicModel`],
//! - [`PoseResolver`] locates the measurement plane ([`ExtrinsicPose`]),
//! - [`measure`] intersects pick rays with that plane.
//!
//! [`CalibrationWorkflow`] sequences the stages and [`CalibrationService`]
//! runs the solves off the capture path.
//!
//! [`IntrinsicModel`]: planar_measure_core::IntrinsicModel
//! [`ExtrinsicPose`]: planar_measure_core::ExtrinsicPose

mod accumulator;
mod config;
mod error;
mod extrinsic;
mod intrinsic;
pub mod io;
mod measure;
mod service;
mod workflow;

pub use accumulator::{AddOutcome, ObservationAccumulator, RejectReason};
pub use config::{CalibrationConfig, PickSpace};
pub use error::{PersistError, ServiceError, WorkflowError};
pub use extrinsic::PoseResolver;
pub use intrinsic::IntrinsicSolver;
pub use measure::{
    intersect_plane, measure, measure_with, MeasureOptions, MeasurementResult, PickSet,
};
pub use service::{CalibrationService, FrameSender, SolveHandle};
pub use workflow::{
    CalibrationPhase, CalibrationWorkflow, ExtrinsicRequest, IntrinsicRequest, SolveKind,
    SolveTicket,
};
