use crate::CalibrationPhase;
use planar_measure_core::CalibError;
use std::path::PathBuf;

/// Workflow-level failures: illegal transitions and solve bookkeeping.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum WorkflowError {
    #[error("{operation} is not allowed while {phase}")]
    InvalidPhase {
        operation: &'static str,
        phase: CalibrationPhase,
    },
    #[error("a solve is already running for {phase}; wait for it or abandon it")]
    SolveInFlight { phase: CalibrationPhase },
    #[error("solve request {request} was superseded (current generation {current}); result discarded")]
    Superseded { request: u64, current: u64 },
    #[error("no intrinsic model; run intrinsic calibration first")]
    NoIntrinsics,
    #[error("no extrinsic pose; capture the board on the measurement plane first")]
    NoExtrinsics,
    #[error(transparent)]
    Calib(#[from] CalibError),
}

/// Failures reading or writing persisted models and configs.
#[derive(thiserror::Error, Debug)]
pub enum PersistError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("{}: {reason}", path.display())]
    Invalid { path: PathBuf, reason: String },
}

/// Failures of the asynchronous [`crate::CalibrationService`].
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error("background solve failed: {0}")]
    TaskFailed(String),
    #[error("no board detected in the latest frame")]
    NoFrame,
}

impl From<CalibError> for ServiceError {
    fn from(err: CalibError) -> Self {
        Self::Workflow(WorkflowError::Calib(err))
    }
}
