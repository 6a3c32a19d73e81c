//! End-to-end run on a deterministic synthetic scene.
//!
//! A ground-truth camera observes the configured board from a set of tilted
//! poses. Every view goes through the [`PlanarSolver`] detector path and the
//! [`CalibrationWorkflow`], then a final overhead view fixes the measurement
//! plane and two board corners are measured against their known distance.

use log::{debug, info};
use nalgebra::{Point3, Rotation3, Vector3};
use planar_measure_calib::{
    CalibrationConfig, CalibrationWorkflow, MeasurementResult, WorkflowError,
};
use planar_measure_core::synthetic::{
    fits_in_image, project_observation, tilted_poses, GaussianPixelNoise,
};
use planar_measure_core::{
    BoardObservation, CalibError, Distortion, ExtrinsicPose, IntrinsicModel, VisionPrimitives,
};
use planar_measure_solve::{CornerFrame, PlanarSolver};

/// Synthetic scene parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SyntheticOptions {
    /// Number of calibration views to generate.
    pub views: usize,
    /// Pixel noise standard deviation.
    pub sigma_px: f64,
    pub seed: u64,
    /// Maximum board tilt, radians.
    pub max_tilt: f64,
}

impl Default for SyntheticOptions {
    fn default() -> Self {
        Self {
            views: 12,
            sigma_px: 0.1,
            seed: 7,
            max_tilt: 0.35,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum SyntheticError {
    #[error(transparent)]
    Calib(#[from] CalibError),
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error("board has fewer than two corners")]
    BoardTooSmall,
    #[error("measurement view does not fit in the image")]
    PlaneOutOfView,
}

/// What a synthetic run produced.
#[derive(Clone, Debug)]
pub struct SyntheticRun {
    pub ground_truth: IntrinsicModel,
    pub intrinsics: IntrinsicModel,
    pub extrinsics: ExtrinsicPose,
    /// Views accepted into the intrinsic batch.
    pub accepted_views: usize,
    /// First and last board corner, measured on the plane view.
    pub measurement: MeasurementResult,
    pub expected_m: f64,
}

impl SyntheticRun {
    pub fn measurement_error_m(&self) -> f64 {
        (self.measurement.distance_m - self.expected_m).abs()
    }
}

/// Ground-truth camera for `config`'s capture size: 1000 px focal length,
/// centered principal point and mild barrel distortion.
pub fn ground_truth_camera(config: &CalibrationConfig) -> Result<IntrinsicModel, CalibError> {
    let size = config.capture_size();
    IntrinsicModel::new(
        1000.0,
        1000.0,
        f64::from(size.width) / 2.0,
        f64::from(size.height) / 2.0,
        Distortion {
            k1: -0.05,
            k2: 0.01,
            p1: 0.0,
            p2: 0.0,
            k3: None,
        },
        0.0,
        size,
    )
}

/// Run the whole pipeline on a synthetic scene described by `config`.
pub fn run(
    config: &CalibrationConfig,
    opts: &SyntheticOptions,
) -> Result<SyntheticRun, SyntheticError> {
    let board = &config.board;
    let points: Vec<Point3<f64>> = (0..board.corner_count())
        .filter_map(|id| board.corner_object_point(id))
        .collect();
    let (first, last) = match (points.first(), points.last()) {
        (Some(first), Some(last)) if points.len() >= 2 => (*first, *last),
        _ => return Err(SyntheticError::BoardTooSmall),
    };

    let truth = ground_truth_camera(config)?;
    let size = truth.image_size();
    let center = Point3::from((first.coords + last.coords) / 2.0);
    // Board spans about a third of the image width.
    let board_width = f64::from(board.squares_x) * board.square_length;
    let distance = truth.fx() * board_width / (f64::from(size.width) / 3.0);
    let noise = GaussianPixelNoise {
        seed: opts.seed,
        sigma_px: opts.sigma_px,
    };

    let solver = PlanarSolver::new(board.clone(), config.min_corners);
    let mut workflow = CalibrationWorkflow::new(config.clone());

    let mut accepted_views = 0;
    for (k, (rvec, tvec)) in tilted_poses(opts.views, center, distance, opts.max_tilt)
        .iter()
        .enumerate()
    {
        let Some(detection) = detect(&solver, &truth, rvec, tvec, &points, &noise, k, config)
        else {
            debug!("synthetic view {k} left the image, skipped");
            continue;
        };
        if workflow.add_observation(detection)?.is_accepted() {
            accepted_views += 1;
        }
    }
    info!("synthetic scene: {accepted_views}/{} views accepted", opts.views);

    let intrinsics = workflow.solve_intrinsics(&solver)?.clone();

    // Slightly oblique overhead view of the board center.
    let rvec = Vector3::new(0.08, -0.05, 0.02);
    let tvec = Vector3::new(0.0, 0.0, distance) - Rotation3::new(rvec) * center.coords;
    let plane_view = detect(&solver, &truth, &rvec, &tvec, &points, &noise, opts.views, config)
        .ok_or(SyntheticError::PlaneOutOfView)?;
    let extrinsics = workflow.resolve_extrinsics(&solver, plane_view)?.clone();

    // Picks are the noise-free distorted pixels of the two extreme corners.
    let rotation = Rotation3::new(rvec);
    let pick = |p: &Point3<f64>| {
        truth
            .project(&(rotation * p + tvec))
            .ok_or(SyntheticError::PlaneOutOfView)
    };
    let (pixel_a, pixel_b) = (pick(&first)?, pick(&last)?);
    workflow.start_measurement()?;
    let measurement = workflow.measure(&solver, pixel_a, pixel_b)?;

    Ok(SyntheticRun {
        ground_truth: truth,
        intrinsics,
        extrinsics,
        accepted_views,
        measurement,
        expected_m: (last - first).norm(),
    })
}

/// Project one view and run it through the solver's corner-frame detector.
#[allow(clippy::too_many_arguments)]
fn detect(
    solver: &PlanarSolver,
    camera: &IntrinsicModel,
    rvec: &Vector3<f64>,
    tvec: &Vector3<f64>,
    points: &[Point3<f64>],
    noise: &GaussianPixelNoise,
    view: usize,
    config: &CalibrationConfig,
) -> Option<BoardObservation> {
    let projected =
        project_observation(camera, rvec, tvec, points, noise, view, config.min_corners)?;
    if !fits_in_image(&projected, camera.image_size()) {
        return None;
    }
    solver.detect_board(&CornerFrame::from_observation(&projected))
}
