mod common;

use approx::assert_abs_diff_eq;
use common::{ideal_camera, observation, ScriptedVision, SIZE};
use nalgebra::{Point2, Point3, Vector2};
use planar_measure_calib::{
    AddOutcome, CalibrationConfig, CalibrationPhase, CalibrationWorkflow, PickSpace,
    RejectReason, WorkflowError,
};
use planar_measure_core::synthetic::{project_observation, tilted_poses, GaussianPixelNoise};
use planar_measure_core::{
    BoardSpec, CalibError, Distortion, ExtrinsicPose, IntrinsicModel, VisionError,
};
use planar_measure_solve::PlanarSolver;

fn config() -> CalibrationConfig {
    CalibrationConfig {
        min_observations: 3,
        ..CalibrationConfig::default()
    }
}

fn workflow_with_intrinsics(vision: &ScriptedVision) -> CalibrationWorkflow {
    let mut wf = CalibrationWorkflow::new(config());
    for _ in 0..3 {
        wf.add_observation(observation(8)).expect("add");
    }
    wf.solve_intrinsics(vision).expect("intrinsics");
    wf
}

#[test]
fn extrinsics_without_intrinsics_never_reach_the_solver() {
    let vision = ScriptedVision::default();
    let mut wf = CalibrationWorkflow::new(config());

    let err = wf.resolve_extrinsics(&vision, observation(8)).unwrap_err();
    assert_eq!(err, WorkflowError::NoIntrinsics);
    assert_eq!(vision.pose_calls(), 0);
    assert_eq!(wf.phase(), CalibrationPhase::Uninitialized);
}

#[test]
fn first_add_starts_intrinsic_capture() {
    let mut wf = CalibrationWorkflow::new(config());
    let outcome = wf.add_observation(observation(2)).expect("add");
    assert_eq!(
        outcome,
        AddOutcome::Rejected {
            reason: RejectReason::TooFewCorners { corners: 2, min: 4 }
        }
    );
    assert_eq!(wf.phase(), CalibrationPhase::IntrinsicsInProgress);
    assert_eq!(wf.observation_count(), 0);
}

#[test]
fn too_few_observations_fail_before_solving() {
    let vision = ScriptedVision::default();
    let mut wf = CalibrationWorkflow::new(config());
    wf.add_observation(observation(8)).expect("add");

    let err = wf.solve_intrinsics(&vision).unwrap_err();
    assert_eq!(
        err,
        WorkflowError::Calib(CalibError::InsufficientData { have: 1, need: 3 })
    );
    assert_eq!(vision.fit_calls(), 0);
    assert_eq!(wf.phase(), CalibrationPhase::IntrinsicsInProgress);
}

#[test]
fn solver_divergence_keeps_the_batch_for_a_retry() {
    let vision = ScriptedVision {
        fit: Err(VisionError::NotConverged("max iterations".into())),
        ..ScriptedVision::default()
    };
    let mut wf = CalibrationWorkflow::new(config());
    for _ in 0..3 {
        wf.add_observation(observation(8)).expect("add");
    }

    let err = wf.solve_intrinsics(&vision).unwrap_err();
    match err {
        WorkflowError::Calib(CalibError::SolverDivergence { message }) => {
            assert!(message.contains("max iterations"), "{message}");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(wf.phase(), CalibrationPhase::IntrinsicsInProgress);
    assert_eq!(wf.observation_count(), 3);
    assert!(wf.in_flight().is_none());
}

#[test]
fn rms_ceiling_rejects_a_poor_fit() {
    let mut vision = ScriptedVision::default();
    if let Ok(fit) = &mut vision.fit {
        fit.rms = 3.5;
    }
    let mut wf = CalibrationWorkflow::new(CalibrationConfig {
        rms_ceiling: Some(2.0),
        ..config()
    });
    for _ in 0..3 {
        wf.add_observation(observation(8)).expect("add");
    }
    assert!(matches!(
        wf.solve_intrinsics(&vision),
        Err(WorkflowError::Calib(CalibError::SolverDivergence { .. }))
    ));
}

#[test]
fn full_happy_path() {
    let vision = ScriptedVision::default();
    let mut wf = workflow_with_intrinsics(&vision);
    assert_eq!(wf.phase(), CalibrationPhase::IntrinsicsReady);
    assert_eq!(wf.observation_count(), 0);

    assert!(matches!(
        wf.add_observation(observation(8)),
        Err(WorkflowError::InvalidPhase { .. })
    ));

    wf.begin_extrinsic_capture().expect("capture");
    assert_eq!(wf.phase(), CalibrationPhase::ExtrinsicsInProgress);
    wf.resolve_extrinsics(&vision, observation(8)).expect("pose");
    assert_eq!(wf.phase(), CalibrationPhase::ExtrinsicsReady);
    assert_eq!(vision.pose_calls(), 1);

    wf.start_measurement().expect("start");
    assert_eq!(wf.phase(), CalibrationPhase::MeasurementActive);
    let result = wf
        .measure(&vision, Point2::new(450.0, 500.0), Point2::new(550.0, 500.0))
        .expect("measure");
    assert_abs_diff_eq!(result.distance_m, 0.1, epsilon = 1e-4);

    wf.stop_measurement().expect("stop");
    assert_eq!(wf.phase(), CalibrationPhase::ExtrinsicsReady);
    assert!(wf.extrinsics().is_some());
    wf.start_measurement().expect("restart");
}

#[test]
fn picks_are_undistorted_by_the_provider() {
    let vision = ScriptedVision {
        undistort_shift: Vector2::new(50.0, 0.0),
        ..ScriptedVision::default()
    };
    let mut wf = workflow_with_intrinsics(&vision);
    wf.resolve_extrinsics(&vision, observation(8)).expect("pose");
    wf.start_measurement().expect("start");

    // Overhead board 1 m away: 50 px is 5 cm on the plane.
    let result = wf
        .measure(&vision, Point2::new(450.0, 500.0), Point2::new(500.0, 450.0))
        .expect("measure");
    assert_abs_diff_eq!(result.board_a.x, 0.0, epsilon = 1e-9);
    assert_abs_diff_eq!(result.board_b.x, 0.05, epsilon = 1e-9);
    assert_abs_diff_eq!(result.board_b.y, -0.05, epsilon = 1e-9);

    let plain = wf
        .measure(
            &ScriptedVision::default(),
            Point2::new(450.0, 500.0),
            Point2::new(500.0, 450.0),
        )
        .expect("measure");
    assert_abs_diff_eq!(plain.board_a.x, -0.05, epsilon = 1e-9);
    assert_abs_diff_eq!(plain.board_b.x, 0.0, epsilon = 1e-9);
}

#[test]
fn rectified_picks_skip_the_provider() {
    let vision = ScriptedVision {
        undistort_shift: Vector2::new(50.0, 0.0),
        ..ScriptedVision::default()
    };
    let mut wf = CalibrationWorkflow::new(CalibrationConfig {
        pick_space: PickSpace::Rectified,
        ..config()
    });
    for _ in 0..3 {
        wf.add_observation(observation(8)).expect("add");
    }
    wf.solve_intrinsics(&vision).expect("intrinsics");
    wf.resolve_extrinsics(&vision, observation(8)).expect("pose");
    wf.start_measurement().expect("start");

    let result = wf
        .measure(&vision, Point2::new(450.0, 500.0), Point2::new(550.0, 500.0))
        .expect("measure");
    assert_abs_diff_eq!(result.board_a.x, -0.05, epsilon = 1e-9);
    assert_abs_diff_eq!(result.distance_m, 0.1, epsilon = 1e-9);
}

#[test]
fn pose_failure_reverts_to_intrinsics_ready() {
    let vision = ScriptedVision {
        pose: Err(VisionError::Degenerate("collinear".into())),
        ..ScriptedVision::default()
    };
    let mut wf = workflow_with_intrinsics(&vision);

    let err = wf.resolve_extrinsics(&vision, observation(8)).unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::Calib(CalibError::PoseSolverFailure { .. })
    ));
    assert_eq!(wf.phase(), CalibrationPhase::IntrinsicsReady);
    assert!(wf.extrinsics().is_none());
}

#[test]
fn pose_capture_rejects_sparse_views_without_solving() {
    let vision = ScriptedVision::default();
    let mut wf = workflow_with_intrinsics(&vision);

    let err = wf.resolve_extrinsics(&vision, observation(3)).unwrap_err();
    assert_eq!(
        err,
        WorkflowError::Calib(CalibError::RejectedObservation { corners: 3, min: 4 })
    );
    assert_eq!(vision.pose_calls(), 0);
    assert!(wf.in_flight().is_none());
}

#[test]
fn recalibration_discards_both_models() {
    let vision = ScriptedVision::default();
    let mut wf = workflow_with_intrinsics(&vision);
    wf.resolve_extrinsics(&vision, observation(8)).expect("pose");
    wf.start_measurement().expect("start");

    wf.recalibrate();
    assert_eq!(wf.phase(), CalibrationPhase::IntrinsicsInProgress);
    assert!(wf.intrinsics().is_none());
    assert!(wf.extrinsics().is_none());
    assert!(matches!(
        wf.start_measurement(),
        Err(WorkflowError::InvalidPhase { .. })
    ));
}

#[test]
fn late_result_after_recalibration_is_superseded() {
    let vision = ScriptedVision::default();
    let mut wf = CalibrationWorkflow::new(config());
    for _ in 0..3 {
        wf.add_observation(observation(8)).expect("add");
    }
    let request = wf.begin_intrinsic_solve().expect("begin");
    assert!(matches!(
        wf.begin_intrinsic_solve(),
        Err(WorkflowError::SolveInFlight { .. })
    ));
    assert!(matches!(
        wf.add_observation(observation(8)),
        Err(WorkflowError::SolveInFlight { .. })
    ));

    wf.recalibrate();
    let result = request.run(&vision);
    let err = wf.complete_intrinsic_solve(request.ticket, result).unwrap_err();
    assert!(matches!(err, WorkflowError::Superseded { .. }));
    assert!(wf.intrinsics().is_none());
    assert_eq!(wf.phase(), CalibrationPhase::IntrinsicsInProgress);
}

#[test]
fn abandoned_pose_solve_falls_back() {
    let vision = ScriptedVision::default();
    let mut wf = workflow_with_intrinsics(&vision);
    let request = wf.begin_extrinsic_solve(observation(8)).expect("begin");
    assert_eq!(wf.phase(), CalibrationPhase::ExtrinsicsInProgress);

    assert!(wf.abandon_solve(request.ticket));
    assert!(!wf.abandon_solve(request.ticket));
    assert_eq!(wf.phase(), CalibrationPhase::IntrinsicsReady);

    let late = request.run(&vision);
    assert!(matches!(
        wf.complete_extrinsic_solve(request.ticket, late),
        Err(WorkflowError::Superseded { .. })
    ));
    assert!(wf.extrinsics().is_none());
}

#[test]
fn restore_enters_the_matching_phase() {
    let intrinsics = ideal_camera();
    let pose = ExtrinsicPose::new(
        nalgebra::Vector3::zeros(),
        nalgebra::Vector3::new(0.0, 0.0, 1.0),
        &intrinsics,
    )
    .expect("pose");

    let mut wf = CalibrationWorkflow::new(config());
    wf.restore(intrinsics.clone(), None).expect("restore");
    assert_eq!(wf.phase(), CalibrationPhase::IntrinsicsReady);

    wf.restore(intrinsics, Some(pose.clone())).expect("restore");
    assert_eq!(wf.phase(), CalibrationPhase::ExtrinsicsReady);

    // A pose that belongs to a different model is refused.
    let mut fresh = CalibrationWorkflow::new(config());
    let err = fresh.restore(ideal_camera(), Some(pose)).unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::Calib(CalibError::StaleExtrinsics { .. })
    ));
    assert_eq!(fresh.phase(), CalibrationPhase::Uninitialized);
}

#[test]
fn recapture_replaces_the_pose() {
    let vision = ScriptedVision::default();
    let mut wf = workflow_with_intrinsics(&vision);
    let first = wf
        .resolve_extrinsics(&vision, observation(8))
        .expect("pose")
        .clone();
    wf.start_measurement().expect("start");

    let second = wf
        .resolve_extrinsics(&vision, observation(8))
        .expect("recapture")
        .clone();
    assert_eq!(first, second);
    assert_eq!(wf.phase(), CalibrationPhase::ExtrinsicsReady);
    assert_eq!(vision.pose_calls(), 2);
}

/// Synthetic board views through the real solver, then a measurement between
/// two corners of known spacing.
#[test]
fn synthetic_scene_measures_board_spacing() {
    let board = BoardSpec {
        squares_x: 10,
        squares_y: 8,
        square_length: 0.03,
        marker_length: 0.022,
        ..BoardSpec::default()
    };
    let camera = IntrinsicModel::new(
        1000.0,
        1000.0,
        500.0,
        500.0,
        Distortion {
            k1: -0.05,
            k2: 0.01,
            p1: 0.0,
            p2: 0.0,
            k3: None,
        },
        0.0,
        SIZE,
    )
    .expect("camera");
    let points: Vec<Point3<f64>> = (0..board.corner_count())
        .filter_map(|id| board.corner_object_point(id))
        .collect();
    let noise = GaussianPixelNoise {
        seed: 3,
        sigma_px: 0.05,
    };

    let config = CalibrationConfig {
        board: board.clone(),
        ..CalibrationConfig::default()
    };
    let solver = PlanarSolver::new(board, config.min_corners);
    let mut wf = CalibrationWorkflow::new(config);
    for (k, (r, t)) in tilted_poses(10, Point3::new(0.15, 0.12, 0.0), 0.6, 0.35)
        .iter()
        .enumerate()
    {
        let obs = project_observation(&camera, r, t, &points, &noise, k, 4).expect("view");
        assert!(wf.add_observation(obs).expect("add").is_accepted());
    }
    let model = wf.solve_intrinsics(&solver).expect("intrinsics").clone();
    assert!(model.rms() < 0.5, "rms {}", model.rms());

    // Flat board 0.5 m in front of the camera.
    let rvec = nalgebra::Vector3::new(0.05, -0.04, 0.0);
    let tvec = nalgebra::Vector3::new(-0.15, -0.12, 0.5);
    let plane_view =
        project_observation(&camera, &rvec, &tvec, &points, &GaussianPixelNoise::none(), 99, 4)
            .expect("plane view");
    wf.resolve_extrinsics(&solver, plane_view).expect("pose");
    wf.start_measurement().expect("start");

    // Corners 0 and 8 are eight squares apart along x.
    let truth = nalgebra::Rotation3::new(rvec);
    let pick = |id: u32| {
        let pb = points[id as usize];
        camera.project(&(truth * pb + tvec)).expect("pick")
    };
    let result = wf.measure(&solver, pick(0), pick(8)).expect("measure");
    assert_abs_diff_eq!(result.distance_m, 8.0 * 0.03, epsilon = 1e-3);
}
