//! Intrinsic solver adapter: batch of observations -> validated camera model.

use crate::CalibrationConfig;
use log::{info, warn};
use planar_measure_core::{
    BoardObservation, CalibError, ImageSize, IntrinsicModel, VisionPrimitives,
};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Forwards a batch to [`VisionPrimitives::fit_intrinsics`] and validates the fit.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IntrinsicSolver {
    pub min_observations: usize,
    pub rms_ceiling: Option<f64>,
    pub high_rms_threshold: f64,
}

impl Default for IntrinsicSolver {
    fn default() -> Self {
        Self::from_config(&CalibrationConfig::default())
    }
}

impl IntrinsicSolver {
    pub fn from_config(config: &CalibrationConfig) -> Self {
        Self {
            min_observations: config.min_observations,
            rms_ceiling: config.rms_ceiling,
            high_rms_threshold: config.high_rms_threshold,
        }
    }

    /// True if `model` should be reported to the user as a poor calibration.
    pub fn is_high_error(&self, model: &IntrinsicModel) -> bool {
        model.has_high_error(self.high_rms_threshold)
    }

    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, provider, observations), fields(views = observations.len()))
    )]
    pub fn solve<P: VisionPrimitives + ?Sized>(
        &self,
        provider: &P,
        observations: &[BoardObservation],
        image_size: ImageSize,
    ) -> Result<IntrinsicModel, CalibError> {
        if observations.len() < self.min_observations {
            return Err(CalibError::InsufficientData {
                have: observations.len(),
                need: self.min_observations,
            });
        }
        info!(
            "solving intrinsics from {} observations at {}x{}",
            observations.len(),
            image_size.width,
            image_size.height
        );

        let fit = provider
            .fit_intrinsics(observations, image_size)
            .map_err(|err| CalibError::SolverDivergence {
                message: err.to_string(),
            })?;

        if !fit.rms.is_finite() || fit.rms < 0.0 {
            return Err(CalibError::SolverDivergence {
                message: format!("reprojection error is not a valid number ({})", fit.rms),
            });
        }
        if let Some(ceiling) = self.rms_ceiling {
            if fit.rms > ceiling {
                return Err(CalibError::SolverDivergence {
                    message: format!(
                        "reprojection error {:.3} px exceeds the ceiling {ceiling:.3} px; recapture with sharper, more varied views",
                        fit.rms
                    ),
                });
            }
        }

        let model = IntrinsicModel::from_camera_matrix(
            &fit.camera_matrix,
            fit.distortion,
            fit.rms,
            image_size,
        )
        .map_err(|err| CalibError::SolverDivergence {
            message: err.to_string(),
        })?;

        info!(
            "intrinsics {}: fx={:.2} fy={:.2} cx={:.2} cy={:.2} rms={:.4}",
            model.id(),
            model.fx(),
            model.fy(),
            model.cx(),
            model.cy(),
            model.rms()
        );
        if self.is_high_error(&model) {
            warn!(
                "calibration rms {:.3} px is above {:.3} px; measurements may be inaccurate",
                model.rms(),
                self.high_rms_threshold
            );
        }
        Ok(model)
    }
}
