//! Extrinsic pose resolver: one board view -> pose of the measurement plane.

use log::info;
use planar_measure_core::{
    BoardObservation, CalibError, ExtrinsicPose, IntrinsicModel, VisionPrimitives,
};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Forwards a single observation to [`VisionPrimitives::solve_pose`].
///
/// The returned pose is bound to the intrinsic model it was solved with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoseResolver {
    pub min_corners: usize,
}

impl PoseResolver {
    pub fn new(min_corners: usize) -> Self {
        Self { min_corners }
    }

    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, provider, observation, intrinsics), fields(corners = observation.corner_count()))
    )]
    pub fn resolve<P: VisionPrimitives + ?Sized>(
        &self,
        provider: &P,
        observation: &BoardObservation,
        intrinsics: &IntrinsicModel,
    ) -> Result<ExtrinsicPose, CalibError> {
        let corners = observation.corner_count();
        if corners < self.min_corners {
            return Err(CalibError::RejectedObservation {
                corners,
                min: self.min_corners,
            });
        }

        let fit = provider
            .solve_pose(observation, intrinsics)
            .map_err(|err| CalibError::PoseSolverFailure {
                message: err.to_string(),
            })?;
        let pose = ExtrinsicPose::new(fit.rvec, fit.tvec, intrinsics).map_err(|err| {
            CalibError::PoseSolverFailure {
                message: err.to_string(),
            }
        })?;

        info!(
            "extrinsics resolved for model {}: |t|={:.4} m",
            intrinsics.id(),
            pose.tvec().norm()
        );
        Ok(pose)
    }
}
