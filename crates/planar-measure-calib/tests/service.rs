mod common;

use approx::assert_abs_diff_eq;
use common::{observation, ScriptedVision};
use nalgebra::{Point2, Vector2};
use planar_measure_calib::{
    CalibrationConfig, CalibrationPhase, CalibrationService, ServiceError, WorkflowError,
};
use planar_measure_core::CalibError;
use std::sync::Barrier;

fn config() -> CalibrationConfig {
    CalibrationConfig {
        min_observations: 3,
        ..CalibrationConfig::default()
    }
}

#[tokio::test]
async fn capture_needs_a_published_frame() {
    let (service, frames) = CalibrationService::new(config(), ScriptedVision::default());
    assert_eq!(service.capture_observation(), Err(ServiceError::NoFrame));

    frames.publish(Some(observation(8)));
    assert!(service.capture_observation().expect("capture").is_accepted());
    frames.publish(None);
    assert_eq!(service.capture_observation(), Err(ServiceError::NoFrame));
    assert_eq!(service.observation_count(), 1);
}

#[tokio::test]
async fn detector_output_is_handed_over() {
    let (service, frames) = CalibrationService::new(config(), ScriptedVision::default());
    assert!(frames.publish_frame(service.provider(), &observation(6)));
    assert!(service.capture_observation().expect("capture").is_accepted());
    assert!(!frames.publish_frame(service.provider(), &observation(0)));
    assert_eq!(service.capture_observation(), Err(ServiceError::NoFrame));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn background_solves_drive_the_workflow() {
    let (service, frames) = CalibrationService::new(config(), ScriptedVision::default());
    frames.publish(Some(observation(8)));
    for _ in 0..3 {
        service.capture_observation().expect("capture");
    }

    let model = service.solve_intrinsics().expect("start").wait().await.expect("solve");
    assert_eq!(service.phase(), CalibrationPhase::IntrinsicsReady);
    assert_eq!(service.intrinsics(), Some(model));

    let pose = service
        .resolve_extrinsics()
        .expect("start")
        .wait()
        .await
        .expect("pose");
    assert_eq!(service.phase(), CalibrationPhase::ExtrinsicsReady);
    assert_eq!(service.extrinsics(), Some(pose));

    service.start_measurement().expect("measure mode");
    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let service = service.clone();
            tokio::spawn(async move {
                service.measure(Point2::new(450.0, 500.0), Point2::new(550.0, 500.0))
            })
        })
        .collect();
    for task in tasks {
        let result = task.await.expect("join").expect("measure");
        assert_abs_diff_eq!(result.distance_m, 0.1, epsilon = 1e-4);
    }
}

#[tokio::test]
async fn extrinsics_before_intrinsics_are_refused_without_solving() {
    let (service, frames) = CalibrationService::new(config(), ScriptedVision::default());
    frames.publish(Some(observation(8)));

    let err = service.resolve_extrinsics().unwrap_err();
    assert_eq!(err, ServiceError::Workflow(WorkflowError::NoIntrinsics));
    assert_eq!(service.provider().pose_calls(), 0);
    assert_eq!(service.phase(), CalibrationPhase::Uninitialized);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn one_solve_in_flight_and_late_results_are_discarded() {
    let vision = ScriptedVision {
        gate: Some(Barrier::new(2)),
        ..ScriptedVision::default()
    };
    let (service, frames) = CalibrationService::new(config(), vision);
    frames.publish(Some(observation(8)));
    for _ in 0..3 {
        service.capture_observation().expect("capture");
    }

    let handle = service.solve_intrinsics().expect("start");
    let ticket = handle.ticket();
    assert!(matches!(
        service.solve_intrinsics(),
        Err(ServiceError::Workflow(WorkflowError::SolveInFlight { .. }))
    ));

    // The user closes the dialog, then restarts the capture from scratch.
    service.recalibrate();
    assert_eq!(service.phase(), CalibrationPhase::IntrinsicsInProgress);

    // Let the blocked solver finish.
    let release = service.clone();
    tokio::task::spawn_blocking(move || {
        if let Some(gate) = &release.provider().gate {
            gate.wait();
        }
    })
    .await
    .expect("release");

    let err = handle.wait().await.unwrap_err();
    assert_eq!(
        err,
        ServiceError::Workflow(WorkflowError::Superseded {
            request: ticket.generation,
            current: ticket.generation + 1,
        })
    );
    assert!(service.intrinsics().is_none());
    assert_eq!(service.provider().fit_calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn abandoned_solve_frees_the_slot() {
    let vision = ScriptedVision {
        gate: Some(Barrier::new(2)),
        ..ScriptedVision::default()
    };
    let (service, frames) = CalibrationService::new(config(), vision);
    frames.publish(Some(observation(8)));
    for _ in 0..3 {
        service.capture_observation().expect("capture");
    }

    let handle = service.solve_intrinsics().expect("start");
    assert!(handle.abandon());
    assert!(service.with_workflow(|wf| wf.in_flight().is_none()));
    assert_eq!(service.phase(), CalibrationPhase::IntrinsicsInProgress);

    let release = service.clone();
    tokio::task::spawn_blocking(move || {
        if let Some(gate) = &release.provider().gate {
            gate.wait();
        }
    })
    .await
    .expect("release");
}

#[tokio::test]
async fn failed_solve_is_reported_through_the_handle() {
    let vision = ScriptedVision {
        fit: Err(planar_measure_core::VisionError::Degenerate("flat".into())),
        ..ScriptedVision::default()
    };
    let (service, frames) = CalibrationService::new(config(), vision);
    frames.publish(Some(observation(8)));
    for _ in 0..3 {
        service.capture_observation().expect("capture");
    }

    let err = service.solve_intrinsics().expect("start").wait().await.unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Workflow(WorkflowError::Calib(CalibError::SolverDivergence { .. }))
    ));
    assert_eq!(service.phase(), CalibrationPhase::IntrinsicsInProgress);
    assert_eq!(service.observation_count(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn service_measurement_uses_the_provider_undistortion() {
    let vision = ScriptedVision {
        undistort_shift: Vector2::new(0.0, -100.0),
        ..ScriptedVision::default()
    };
    let (service, frames) = CalibrationService::new(config(), vision);
    frames.publish(Some(observation(8)));
    for _ in 0..3 {
        service.capture_observation().expect("capture");
    }
    service.solve_intrinsics().expect("start").wait().await.expect("solve");
    service.resolve_extrinsics().expect("start").wait().await.expect("pose");
    service.start_measurement().expect("measure mode");

    let result = service
        .measure(Point2::new(500.0, 500.0), Point2::new(500.0, 600.0))
        .expect("measure");
    assert_abs_diff_eq!(result.board_a.y, -0.1, epsilon = 1e-9);
    assert_abs_diff_eq!(result.board_b.y, 0.0, epsilon = 1e-9);
    assert_abs_diff_eq!(result.distance_m, 0.1, epsilon = 1e-9);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn crashed_solve_releases_the_slot() {
    let vision = ScriptedVision {
        panic_on_fit: true,
        ..ScriptedVision::default()
    };
    let (service, frames) = CalibrationService::new(config(), vision);
    frames.publish(Some(observation(8)));
    for _ in 0..3 {
        service.capture_observation().expect("capture");
    }

    let err = service.solve_intrinsics().expect("start").wait().await.unwrap_err();
    assert!(matches!(err, ServiceError::TaskFailed(_)));
    assert!(service.with_workflow(|wf| wf.in_flight().is_none()));
    assert_eq!(service.phase(), CalibrationPhase::IntrinsicsInProgress);
    assert_eq!(service.observation_count(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn crash_after_supersession_keeps_the_new_batch() {
    let vision = ScriptedVision {
        gate: Some(Barrier::new(2)),
        panic_on_fit: true,
        ..ScriptedVision::default()
    };
    let (service, frames) = CalibrationService::new(config(), vision);
    frames.publish(Some(observation(8)));
    for _ in 0..3 {
        service.capture_observation().expect("capture");
    }

    let handle = service.solve_intrinsics().expect("start");
    service.recalibrate();
    for _ in 0..3 {
        service.capture_observation().expect("capture");
    }

    let release = service.clone();
    tokio::task::spawn_blocking(move || {
        if let Some(gate) = &release.provider().gate {
            gate.wait();
        }
    })
    .await
    .expect("release");

    assert!(matches!(handle.wait().await, Err(ServiceError::TaskFailed(_))));
    assert!(service.intrinsics().is_none());
    assert!(service.with_workflow(|wf| wf.in_flight().is_none()));
    assert_eq!(service.phase(), CalibrationPhase::IntrinsicsInProgress);
    assert_eq!(service.observation_count(), 3);
}
