use crate::ModelId;

/// Recoverable failures of the calibration-and-measurement pipeline.
///
/// Every variant carries enough context for a caller to tell the user what
/// to do next; none of them is fatal to the process.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CalibError {
    #[error("observation rejected: {corners} corners seen, at least {min} required")]
    RejectedObservation { corners: usize, min: usize },

    #[error("not enough observations: have {have}, need {need}; capture more frames")]
    InsufficientData { have: usize, need: usize },

    #[error("intrinsic solver did not converge: {message}")]
    SolverDivergence { message: String },

    #[error("pose solver failed: {message}")]
    PoseSolverFailure { message: String },

    #[error("pick ray is nearly parallel to the measurement plane (denominator {denominator:.3e}); re-pick a point away from the image edge")]
    ParallelRay { denominator: f64 },

    #[error("extrinsic pose was computed for intrinsic model {pose_model}, current model is {current_model}; capture extrinsics again")]
    StaleExtrinsics {
        pose_model: ModelId,
        current_model: ModelId,
    },

    #[error("invalid camera model: {reason}")]
    InvalidModel { reason: String },
}

impl CalibError {
    pub(crate) fn invalid_model(reason: impl Into<String>) -> Self {
        Self::InvalidModel {
            reason: reason.into(),
        }
    }
}
