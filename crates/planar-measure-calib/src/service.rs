//! Asynchronous front end to [`CalibrationWorkflow`].
//!
//! Capture publishes the latest detection on a `watch` channel and never
//! blocks on calibration. Solves run on Tokio's blocking pool and their
//! results are applied to the workflow only if the request is still current.
//! Methods that start a solve must be called from within a Tokio runtime.

use crate::{
    AddOutcome, CalibrationConfig, CalibrationPhase, CalibrationWorkflow, MeasurementResult,
    ServiceError, SolveTicket, WorkflowError,
};
use log::warn;
use nalgebra::Point2;
use planar_measure_core::{
    BoardObservation, CalibError, ExtrinsicPose, IntrinsicModel, VisionPrimitives,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;

type SharedWorkflow = Arc<Mutex<CalibrationWorkflow>>;

fn lock(workflow: &Mutex<CalibrationWorkflow>) -> MutexGuard<'_, CalibrationWorkflow> {
    workflow.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Producer side of the frame handoff.
#[derive(Debug)]
pub struct FrameSender {
    tx: watch::Sender<Option<BoardObservation>>,
}

impl FrameSender {
    /// Replace the latest detection. `None` means no board in view.
    pub fn publish(&self, detection: Option<BoardObservation>) {
        self.tx.send_replace(detection);
    }

    /// Run the provider's detector on `frame` and publish the result.
    pub fn publish_frame<P: VisionPrimitives + ?Sized>(
        &self,
        provider: &P,
        frame: &P::Frame,
    ) -> bool {
        let detection = provider.detect_board(frame);
        let found = detection.is_some();
        self.publish(detection);
        found
    }
}

/// A background solve. Await [`SolveHandle::wait`] for the applied result or
/// call [`SolveHandle::abandon`] to drop it.
#[derive(Debug)]
pub struct SolveHandle<T> {
    ticket: SolveTicket,
    task: JoinHandle<Result<T, ServiceError>>,
    workflow: SharedWorkflow,
}

impl<T> SolveHandle<T> {
    pub fn ticket(&self) -> SolveTicket {
        self.ticket
    }

    /// Resolve once the result has been applied to (or rejected by) the workflow.
    pub async fn wait(self) -> Result<T, ServiceError> {
        self.task
            .await
            .map_err(|err| ServiceError::TaskFailed(err.to_string()))?
    }

    /// Give up on this solve. The solver keeps running to completion on the
    /// blocking pool, but its result will be discarded.
    pub fn abandon(self) -> bool {
        lock(&self.workflow).abandon_solve(self.ticket)
    }
}

/// Thread-safe calibration pipeline driven by a [`VisionPrimitives`] provider.
pub struct CalibrationService<P> {
    workflow: SharedWorkflow,
    provider: Arc<P>,
    frames: watch::Receiver<Option<BoardObservation>>,
}

impl<P> Clone for CalibrationService<P> {
    fn clone(&self) -> Self {
        Self {
            workflow: Arc::clone(&self.workflow),
            provider: Arc::clone(&self.provider),
            frames: self.frames.clone(),
        }
    }
}

impl<P> CalibrationService<P>
where
    P: VisionPrimitives + Send + Sync + 'static,
{
    /// Build a service and the sender the capture loop publishes to.
    pub fn new(config: CalibrationConfig, provider: P) -> (Self, FrameSender) {
        Self::from_workflow(CalibrationWorkflow::new(config), provider)
    }

    pub fn from_workflow(workflow: CalibrationWorkflow, provider: P) -> (Self, FrameSender) {
        let (tx, rx) = watch::channel(None);
        (
            Self {
                workflow: Arc::new(Mutex::new(workflow)),
                provider: Arc::new(provider),
                frames: rx,
            },
            FrameSender { tx },
        )
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn phase(&self) -> CalibrationPhase {
        lock(&self.workflow).phase()
    }

    pub fn observation_count(&self) -> usize {
        lock(&self.workflow).observation_count()
    }

    pub fn intrinsics(&self) -> Option<IntrinsicModel> {
        lock(&self.workflow).intrinsics().cloned()
    }

    pub fn extrinsics(&self) -> Option<ExtrinsicPose> {
        lock(&self.workflow).extrinsics().cloned()
    }

    /// Run `f` with the workflow locked.
    pub fn with_workflow<R>(&self, f: impl FnOnce(&mut CalibrationWorkflow) -> R) -> R {
        f(&mut lock(&self.workflow))
    }

    fn latest_detection(&self) -> Result<BoardObservation, ServiceError> {
        self.frames.borrow().clone().ok_or(ServiceError::NoFrame)
    }

    /// Add the latest published detection to the intrinsic batch.
    pub fn capture_observation(&self) -> Result<AddOutcome, ServiceError> {
        let detection = self.latest_detection()?;
        Ok(lock(&self.workflow).add_observation(detection)?)
    }

    pub fn clear_observations(&self) -> Result<(), ServiceError> {
        Ok(lock(&self.workflow).clear_observations()?)
    }

    /// Start an intrinsic solve on the blocking pool.
    pub fn solve_intrinsics(&self) -> Result<SolveHandle<IntrinsicModel>, ServiceError> {
        let request = lock(&self.workflow).begin_intrinsic_solve()?;
        let ticket = request.ticket;
        let provider = Arc::clone(&self.provider);
        let solve = tokio::task::spawn_blocking(move || request.run(provider.as_ref()));

        let workflow = Arc::clone(&self.workflow);
        let task = tokio::spawn(async move {
            let result = solve.await.map_err(|err| err.to_string());
            let mut wf = lock(&workflow);
            match result {
                Ok(result) => Ok(wf.complete_intrinsic_solve(ticket, result)?.clone()),
                Err(reason) => {
                    warn!("intrinsic solve task failed: {reason}");
                    let failure = Err(CalibError::SolverDivergence {
                        message: reason.clone(),
                    });
                    // Releases the in-flight slot unless the request was superseded.
                    let outcome = wf.complete_intrinsic_solve(ticket, failure);
                    if let Err(WorkflowError::Superseded { request, current }) = outcome {
                        warn!("intrinsic solve #{request} superseded by #{current} before failing");
                    }
                    Err(ServiceError::TaskFailed(reason))
                }
            }
        });
        Ok(SolveHandle {
            ticket,
            task,
            workflow: Arc::clone(&self.workflow),
        })
    }

    /// Start a pose solve for the latest published detection.
    ///
    /// Fails with `NoIntrinsics` without touching the solver when no model is
    /// installed.
    pub fn resolve_extrinsics(&self) -> Result<SolveHandle<ExtrinsicPose>, ServiceError> {
        let request = {
            let mut wf = lock(&self.workflow);
            // Phase first, so a missing model is reported before a missing frame.
            wf.begin_extrinsic_capture()?;
            let detection = self.latest_detection()?;
            wf.begin_extrinsic_solve(detection)?
        };
        let ticket = request.ticket;
        let provider = Arc::clone(&self.provider);
        let solve = tokio::task::spawn_blocking(move || request.run(provider.as_ref()));

        let workflow = Arc::clone(&self.workflow);
        let task = tokio::spawn(async move {
            let result = solve.await.map_err(|err| err.to_string());
            let mut wf = lock(&workflow);
            match result {
                Ok(result) => Ok(wf.complete_extrinsic_solve(ticket, result)?.clone()),
                Err(reason) => {
                    warn!("pose solve task failed: {reason}");
                    let failure = Err(CalibError::PoseSolverFailure {
                        message: reason.clone(),
                    });
                    let outcome = wf.complete_extrinsic_solve(ticket, failure);
                    if let Err(WorkflowError::Superseded { request, current }) = outcome {
                        warn!("pose solve #{request} superseded by #{current} before failing");
                    }
                    Err(ServiceError::TaskFailed(reason))
                }
            }
        });
        Ok(SolveHandle {
            ticket,
            task,
            workflow: Arc::clone(&self.workflow),
        })
    }

    pub fn start_measurement(&self) -> Result<(), ServiceError> {
        Ok(lock(&self.workflow).start_measurement()?)
    }

    pub fn stop_measurement(&self) -> Result<(), ServiceError> {
        Ok(lock(&self.workflow).stop_measurement()?)
    }

    /// Measure between two picks. The models are copied out of the lock, so
    /// concurrent measurements never wait on each other or on a solve.
    pub fn measure(
        &self,
        pixel_a: Point2<f64>,
        pixel_b: Point2<f64>,
    ) -> Result<MeasurementResult, ServiceError> {
        let (intrinsics, pose, opts) = {
            let wf = lock(&self.workflow);
            if wf.phase() != CalibrationPhase::MeasurementActive {
                return Err(WorkflowError::InvalidPhase {
                    operation: "measuring",
                    phase: wf.phase(),
                }
                .into());
            }
            let intrinsics = wf.intrinsics().cloned().ok_or(WorkflowError::NoIntrinsics)?;
            let pose = wf.extrinsics().cloned().ok_or(WorkflowError::NoExtrinsics)?;
            (intrinsics, pose, wf.measure_options())
        };
        let provider = self.provider.as_ref();
        Ok(crate::measure_with(provider, pixel_a, pixel_b, &intrinsics, &pose, &opts)?)
    }

    pub fn recalibrate(&self) {
        lock(&self.workflow).recalibrate();
    }

    pub fn restore(
        &self,
        intrinsics: IntrinsicModel,
        extrinsics: Option<ExtrinsicPose>,
    ) -> Result<(), ServiceError> {
        Ok(lock(&self.workflow).restore(intrinsics, extrinsics)?)
    }
}
