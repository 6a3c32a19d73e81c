use crate::pose::{check_spread, pose_from_homography};
use crate::refine::{refine_intrinsics, refine_pose, CameraParams};
use crate::zhang::{intrinsics_from_homographies, Pinhole};
use log::{debug, warn};
use nalgebra::{Matrix3, Point2};
use planar_measure_core::{
    estimate_homography, BoardObservation, BoardSpec, Distortion, ImageSize, IntrinsicFit,
    IntrinsicModel, PoseFit, VisionError, VisionPrimitives,
};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Minimum correspondences per view for a homography.
const MIN_POINTS_PER_VIEW: usize = 4;
/// Minimum views for the closed-form intrinsic estimate.
const MIN_VIEWS: usize = 3;

/// Pre-detected ChArUco corners for one frame.
///
/// This is the frame type of [`PlanarSolver`]: a corner detector upstream
/// reports inner-corner ids and their pixel positions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CornerFrame {
    pub ids: Vec<u32>,
    pub pixels: Vec<Point2<f64>>,
    pub image_size: ImageSize,
}

impl CornerFrame {
    pub fn new(ids: Vec<u32>, pixels: Vec<Point2<f64>>, image_size: ImageSize) -> Self {
        Self {
            ids,
            pixels,
            image_size,
        }
    }

    /// Frame with no detected corners.
    pub fn empty(image_size: ImageSize) -> Self {
        Self::new(Vec::new(), Vec::new(), image_size)
    }

    /// Frame built from an observation's corner ids (useful for replaying
    /// synthetic data through the detector path).
    pub fn from_observation(obs: &BoardObservation) -> Self {
        let (ids, pixels) = obs
            .correspondences()
            .iter()
            .filter_map(|c| c.id.map(|id| (id, c.pixel)))
            .unzip();
        Self::new(ids, pixels, obs.image_size())
    }
}

/// Tuning knobs of [`PlanarSolver`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanarSolverOptions {
    /// Estimate `[k1, k2, p1, p2]`. If false the lens is assumed ideal.
    pub estimate_distortion: bool,
    /// Also estimate `k3` (five-coefficient model).
    pub estimate_k3: bool,
    pub refine_iterations: usize,
    pub pose_refine_iterations: usize,
}

impl Default for PlanarSolverOptions {
    fn default() -> Self {
        Self {
            estimate_distortion: true,
            estimate_k3: false,
            refine_iterations: 100,
            pose_refine_iterations: 30,
        }
    }
}

/// Reference [`VisionPrimitives`] implementation for planar ChArUco boards.
///
/// Intrinsics come from Zhang's closed form followed by a joint
/// Levenberg-Marquardt refinement; poses come from the board homography
/// followed by a pose-only refinement.
#[derive(Clone, Debug, Default)]
pub struct PlanarSolver {
    pub board: BoardSpec,
    pub min_corners: usize,
    pub options: PlanarSolverOptions,
}

impl PlanarSolver {
    pub fn new(board: BoardSpec, min_corners: usize) -> Self {
        Self {
            board,
            min_corners,
            options: PlanarSolverOptions::default(),
        }
    }

    pub fn with_options(mut self, options: PlanarSolverOptions) -> Self {
        self.options = options;
        self
    }
}

fn board_xy(obs: &BoardObservation) -> Vec<Point2<f64>> {
    obs.board_points().map(|p| Point2::new(p.x, p.y)).collect()
}

fn check_view(obs: &BoardObservation) -> Result<Vec<Point2<f64>>, VisionError> {
    if obs.corner_count() < MIN_POINTS_PER_VIEW {
        return Err(VisionError::TooFewPoints {
            got: obs.corner_count(),
            need: MIN_POINTS_PER_VIEW,
        });
    }
    if !obs.is_planar() {
        return Err(VisionError::Degenerate(
            "board points must lie on the z = 0 plane".into(),
        ));
    }
    let xy = board_xy(obs);
    check_spread(&xy)?;
    Ok(xy)
}

impl VisionPrimitives for PlanarSolver {
    type Frame = CornerFrame;

    fn detect_board(&self, frame: &CornerFrame) -> Option<BoardObservation> {
        if frame.ids.is_empty() {
            return None;
        }
        match self.board.observation_from_ids(
            &frame.ids,
            &frame.pixels,
            frame.image_size,
            self.min_corners,
        ) {
            Ok(obs) => Some(obs),
            Err(err) => {
                debug!("discarding frame: {err}");
                None
            }
        }
    }

    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, observations), fields(views = observations.len()))
    )]
    fn fit_intrinsics(
        &self,
        observations: &[BoardObservation],
        image_size: ImageSize,
    ) -> Result<IntrinsicFit, VisionError> {
        if observations.len() < MIN_VIEWS {
            return Err(VisionError::TooFewPoints {
                got: observations.len(),
                need: MIN_VIEWS,
            });
        }
        if !image_size.is_valid() {
            return Err(VisionError::Degenerate("image size must be non-zero".into()));
        }

        let mut homographies = Vec::with_capacity(observations.len());
        for (idx, obs) in observations.iter().enumerate() {
            let xy = check_view(obs)?;
            let pixels: Vec<_> = obs.pixels().collect();
            let h = estimate_homography(&xy, &pixels).ok_or_else(|| {
                VisionError::Degenerate(format!("view {idx}: homography estimation failed"))
            })?;
            homographies.push(h.h);
        }

        let pinhole = intrinsics_from_homographies(&homographies, image_size)?;
        debug!(
            "closed-form intrinsics fx={:.2} fy={:.2} cx={:.2} cy={:.2}",
            pinhole.fx, pinhole.fy, pinhole.cx, pinhole.cy
        );

        let k = pinhole.matrix();
        let poses = homographies
            .iter()
            .map(|h| pose_from_homography(&k, h))
            .collect::<Result<Vec<_>, _>>()?;

        let initial = CameraParams {
            pinhole,
            distortion: if self.options.estimate_k3 {
                Distortion::zero()
            } else {
                Distortion::default()
            },
        };
        let refined = refine_intrinsics(
            observations,
            initial,
            &poses,
            self.options.estimate_distortion,
            self.options.estimate_k3,
            self.options.refine_iterations,
        );
        debug!(
            "refinement: {} evaluations, cost {:.3e} -> {:.3e}",
            refined.report.evaluations, refined.report.initial_cost, refined.report.final_cost
        );
        if !refined.report.converged {
            warn!(
                "intrinsic refinement did not converge ({})",
                refined.report.termination
            );
        }

        let camera = refined.camera;
        let params = [
            camera.pinhole.fx,
            camera.pinhole.fy,
            camera.pinhole.cx,
            camera.pinhole.cy,
            refined.rms,
        ];
        if !params.iter().all(|v| v.is_finite()) || !camera.distortion.is_finite() {
            return Err(VisionError::NonFinite);
        }
        if camera.pinhole.fx <= 0.0 || camera.pinhole.fy <= 0.0 {
            return Err(VisionError::NotConverged(
                "refinement produced a non-positive focal length".into(),
            ));
        }

        Ok(IntrinsicFit {
            camera_matrix: camera.pinhole.matrix(),
            distortion: camera.distortion,
            rms: refined.rms,
        })
    }

    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, observation, intrinsics), fields(corners = observation.corner_count()))
    )]
    fn solve_pose(
        &self,
        observation: &BoardObservation,
        intrinsics: &IntrinsicModel,
    ) -> Result<PoseFit, VisionError> {
        let xy = check_view(observation)?;
        let normalized: Vec<Point2<f64>> = observation
            .pixels()
            .map(|p| {
                let n = intrinsics
                    .distortion()
                    .undistort(intrinsics.pixel_to_normalized(p));
                Point2::new(n.x, n.y)
            })
            .collect();
        let h = estimate_homography(&xy, &normalized)
            .ok_or_else(|| VisionError::Degenerate("homography estimation failed".into()))?;
        let (rvec0, tvec0) = pose_from_homography(&Matrix3::identity(), &h.h)?;

        let camera = CameraParams {
            pinhole: Pinhole {
                fx: intrinsics.fx(),
                fy: intrinsics.fy(),
                cx: intrinsics.cx(),
                cy: intrinsics.cy(),
            },
            distortion: *intrinsics.distortion(),
        };
        let (rvec, tvec, rms) = refine_pose(
            camera,
            observation,
            rvec0,
            tvec0,
            self.options.pose_refine_iterations,
        );
        debug!("pose refined, reprojection rms {rms:.3} px");

        if !(rvec.iter().all(|v| v.is_finite()) && tvec.iter().all(|v| v.is_finite())) {
            return Err(VisionError::NonFinite);
        }
        if tvec.z <= 0.0 {
            return Err(VisionError::Degenerate("board is behind the camera".into()));
        }
        Ok(PoseFit { rvec, tvec })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solver() -> PlanarSolver {
        PlanarSolver::new(BoardSpec::default(), 4)
    }

    #[test]
    fn empty_frame_detects_nothing() {
        assert!(solver()
            .detect_board(&CornerFrame::empty(ImageSize::new(640, 480)))
            .is_none());
    }

    #[test]
    fn unknown_corner_id_detects_nothing() {
        let frame = CornerFrame::new(
            vec![0, 9999],
            vec![Point2::new(1.0, 1.0), Point2::new(2.0, 2.0)],
            ImageSize::new(640, 480),
        );
        assert!(solver().detect_board(&frame).is_none());
    }

    #[test]
    fn detection_keeps_undersized_frames_but_marks_them_invalid() {
        let frame = CornerFrame::new(
            vec![0, 1, 2],
            vec![
                Point2::new(10.0, 10.0),
                Point2::new(20.0, 10.0),
                Point2::new(30.0, 10.0),
            ],
            ImageSize::new(640, 480),
        );
        let obs = solver().detect_board(&frame).expect("observation");
        assert_eq!(obs.corner_count(), 3);
        assert!(!obs.is_valid());
    }

    #[test]
    fn fit_needs_three_views() {
        let err = solver()
            .fit_intrinsics(&[], ImageSize::new(640, 480))
            .unwrap_err();
        assert_eq!(err, VisionError::TooFewPoints { got: 0, need: 3 });
    }
}
