//! Calibration workflow state machine.
//!
//! The workflow owns the observation batch, the current models and the phase.
//! Solves are split into `begin_*` (validate, take a snapshot, issue a
//! [`SolveTicket`]) and `complete_*` (apply a result if its ticket is still
//! current), so the heavy solver call can run anywhere in between.

use crate::{
    measure_with, AddOutcome, CalibrationConfig, IntrinsicSolver, MeasureOptions,
    MeasurementResult, ObservationAccumulator, PoseResolver, WorkflowError,
};
use log::{debug, info, warn};
use nalgebra::Point2;
use planar_measure_core::{
    BoardObservation, CalibError, ExtrinsicPose, ImageSize, IntrinsicModel, VisionPrimitives,
};
use std::fmt;

/// Where the calibration pipeline currently stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CalibrationPhase {
    Uninitialized,
    IntrinsicsInProgress,
    IntrinsicsReady,
    ExtrinsicsInProgress,
    ExtrinsicsReady,
    MeasurementActive,
}

impl fmt::Display for CalibrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::IntrinsicsInProgress => "intrinsics in progress",
            Self::IntrinsicsReady => "intrinsics ready",
            Self::ExtrinsicsInProgress => "extrinsics in progress",
            Self::ExtrinsicsReady => "extrinsics ready",
            Self::MeasurementActive => "measurement active",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SolveKind {
    Intrinsics,
    Extrinsics,
}

/// Identity of one solve request. A result is applied only if its ticket is
/// still the one in flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SolveTicket {
    pub kind: SolveKind,
    pub generation: u64,
}

/// Everything an intrinsic solve needs, detached from the workflow.
#[derive(Clone, Debug)]
pub struct IntrinsicRequest {
    pub ticket: SolveTicket,
    pub observations: Vec<BoardObservation>,
    pub image_size: ImageSize,
    pub solver: IntrinsicSolver,
}

impl IntrinsicRequest {
    pub fn run<P: VisionPrimitives + ?Sized>(
        &self,
        provider: &P,
    ) -> Result<IntrinsicModel, CalibError> {
        self.solver
            .solve(provider, &self.observations, self.image_size)
    }
}

/// Everything a pose solve needs, detached from the workflow.
#[derive(Clone, Debug)]
pub struct ExtrinsicRequest {
    pub ticket: SolveTicket,
    pub observation: BoardObservation,
    pub intrinsics: IntrinsicModel,
    pub resolver: PoseResolver,
}

impl ExtrinsicRequest {
    pub fn run<P: VisionPrimitives + ?Sized>(
        &self,
        provider: &P,
    ) -> Result<ExtrinsicPose, CalibError> {
        self.resolver
            .resolve(provider, &self.observation, &self.intrinsics)
    }
}

#[derive(Debug)]
pub struct CalibrationWorkflow {
    config: CalibrationConfig,
    phase: CalibrationPhase,
    accumulator: ObservationAccumulator,
    intrinsic_solver: IntrinsicSolver,
    pose_resolver: PoseResolver,
    intrinsics: Option<IntrinsicModel>,
    extrinsics: Option<ExtrinsicPose>,
    generation: u64,
    in_flight: Option<SolveTicket>,
}

impl CalibrationWorkflow {
    pub fn new(config: CalibrationConfig) -> Self {
        Self {
            accumulator: ObservationAccumulator::new(config.min_corners),
            intrinsic_solver: IntrinsicSolver::from_config(&config),
            pose_resolver: PoseResolver::new(config.min_corners),
            config,
            phase: CalibrationPhase::Uninitialized,
            intrinsics: None,
            extrinsics: None,
            generation: 0,
            in_flight: None,
        }
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    pub fn phase(&self) -> CalibrationPhase {
        self.phase
    }

    pub fn intrinsics(&self) -> Option<&IntrinsicModel> {
        self.intrinsics.as_ref()
    }

    pub fn extrinsics(&self) -> Option<&ExtrinsicPose> {
        self.extrinsics.as_ref()
    }

    pub fn observation_count(&self) -> usize {
        self.accumulator.count()
    }

    pub fn accumulator(&self) -> &ObservationAccumulator {
        &self.accumulator
    }

    /// The solve currently in flight, if any.
    pub fn in_flight(&self) -> Option<SolveTicket> {
        self.in_flight
    }

    pub fn measure_options(&self) -> MeasureOptions {
        MeasureOptions {
            pick_space: self.config.pick_space,
            parallel_epsilon: self.config.parallel_epsilon,
        }
    }

    fn set_phase(&mut self, next: CalibrationPhase) {
        if self.phase != next {
            debug!("calibration phase: {} -> {}", self.phase, next);
            self.phase = next;
        }
    }

    /// Invalidate any outstanding ticket.
    fn bump_generation(&mut self) {
        self.generation += 1;
        if let Some(ticket) = self.in_flight.take() {
            debug!("dropping in-flight {:?} solve #{}", ticket.kind, ticket.generation);
        }
    }

    fn invalid(&self, operation: &'static str) -> WorkflowError {
        WorkflowError::InvalidPhase {
            operation,
            phase: self.phase,
        }
    }

    fn issue_ticket(&mut self, kind: SolveKind) -> Result<SolveTicket, WorkflowError> {
        if self.in_flight.is_some() {
            return Err(WorkflowError::SolveInFlight { phase: self.phase });
        }
        self.generation += 1;
        let ticket = SolveTicket {
            kind,
            generation: self.generation,
        };
        self.in_flight = Some(ticket);
        Ok(ticket)
    }

    fn redeem_ticket(&mut self, ticket: SolveTicket) -> Result<(), WorkflowError> {
        if self.in_flight != Some(ticket) {
            warn!(
                "discarding late {:?} result #{} (current generation {})",
                ticket.kind, ticket.generation, self.generation
            );
            return Err(WorkflowError::Superseded {
                request: ticket.generation,
                current: self.generation,
            });
        }
        self.in_flight = None;
        Ok(())
    }

    // ----- intrinsic phase -------------------------------------------------

    /// Offer an observation to the batch.
    ///
    /// The first call moves `Uninitialized` to `IntrinsicsInProgress`.
    /// Rejection is reported through [`AddOutcome`], not as an error.
    pub fn add_observation(
        &mut self,
        observation: BoardObservation,
    ) -> Result<AddOutcome, WorkflowError> {
        match self.phase {
            CalibrationPhase::Uninitialized | CalibrationPhase::IntrinsicsInProgress => {}
            _ => return Err(self.invalid("adding observations")),
        }
        if self.in_flight.is_some() {
            return Err(WorkflowError::SolveInFlight { phase: self.phase });
        }
        self.set_phase(CalibrationPhase::IntrinsicsInProgress);
        Ok(self.accumulator.add(observation))
    }

    /// Drop the batch and any in-flight intrinsic solve.
    pub fn clear_observations(&mut self) -> Result<(), WorkflowError> {
        match self.phase {
            CalibrationPhase::Uninitialized | CalibrationPhase::IntrinsicsInProgress => {}
            _ => return Err(self.invalid("clearing observations")),
        }
        self.accumulator.clear();
        self.bump_generation();
        Ok(())
    }

    /// Validate the batch and hand out a snapshot for solving.
    pub fn begin_intrinsic_solve(&mut self) -> Result<IntrinsicRequest, WorkflowError> {
        match self.phase {
            CalibrationPhase::Uninitialized | CalibrationPhase::IntrinsicsInProgress => {}
            _ => return Err(self.invalid("intrinsic calibration")),
        }
        if self.in_flight.is_some() {
            return Err(WorkflowError::SolveInFlight { phase: self.phase });
        }
        let have = self.accumulator.count();
        let need = self.intrinsic_solver.min_observations;
        let image_size = match self.accumulator.image_size() {
            Some(size) if have >= need => size,
            _ => {
                return Err(CalibError::InsufficientData {
                    have,
                    need: need.max(1),
                }
                .into())
            }
        };
        let ticket = self.issue_ticket(SolveKind::Intrinsics)?;
        Ok(IntrinsicRequest {
            ticket,
            observations: self.accumulator.snapshot(),
            image_size,
            solver: self.intrinsic_solver,
        })
    }

    /// Apply the outcome of an intrinsic solve.
    ///
    /// Success installs the model, consumes the batch, discards any previous
    /// pose and enters `IntrinsicsReady`. Failure keeps the batch so the
    /// caller can add views and retry.
    pub fn complete_intrinsic_solve(
        &mut self,
        ticket: SolveTicket,
        result: Result<IntrinsicModel, CalibError>,
    ) -> Result<&IntrinsicModel, WorkflowError> {
        self.redeem_ticket(ticket)?;
        match result {
            Ok(model) => {
                info!("intrinsic calibration applied ({}, rms {:.4})", model.id(), model.rms());
                self.accumulator.clear();
                self.extrinsics = None;
                self.set_phase(CalibrationPhase::IntrinsicsReady);
                Ok(self.intrinsics.insert(model))
            }
            Err(err) => {
                warn!("intrinsic calibration failed: {err}");
                Err(err.into())
            }
        }
    }

    /// Run an intrinsic solve on the calling thread.
    pub fn solve_intrinsics<P: VisionPrimitives + ?Sized>(
        &mut self,
        provider: &P,
    ) -> Result<&IntrinsicModel, WorkflowError> {
        let request = self.begin_intrinsic_solve()?;
        let result = request.run(provider);
        self.complete_intrinsic_solve(request.ticket, result)
    }

    // ----- extrinsic phase -------------------------------------------------

    /// Enter `ExtrinsicsInProgress`. Legal once intrinsics exist; from
    /// `ExtrinsicsReady`/`MeasurementActive` it starts a re-capture.
    pub fn begin_extrinsic_capture(&mut self) -> Result<(), WorkflowError> {
        match self.phase {
            CalibrationPhase::IntrinsicsReady
            | CalibrationPhase::ExtrinsicsReady
            | CalibrationPhase::MeasurementActive => {}
            CalibrationPhase::ExtrinsicsInProgress => return Ok(()),
            CalibrationPhase::Uninitialized | CalibrationPhase::IntrinsicsInProgress => {
                return Err(WorkflowError::NoIntrinsics)
            }
        }
        if self.intrinsics.is_none() {
            return Err(WorkflowError::NoIntrinsics);
        }
        self.set_phase(CalibrationPhase::ExtrinsicsInProgress);
        Ok(())
    }

    /// Validate `observation` and hand out a pose-solve request.
    ///
    /// Enters extrinsic capture implicitly if intrinsics are ready. Fails with
    /// `NoIntrinsics` before any solver is involved when there is no model.
    pub fn begin_extrinsic_solve(
        &mut self,
        observation: BoardObservation,
    ) -> Result<ExtrinsicRequest, WorkflowError> {
        self.begin_extrinsic_capture()?;
        if self.in_flight.is_some() {
            return Err(WorkflowError::SolveInFlight { phase: self.phase });
        }
        let intrinsics = self.intrinsics.clone().ok_or(WorkflowError::NoIntrinsics)?;
        let corners = observation.corner_count();
        if corners < self.pose_resolver.min_corners {
            return Err(CalibError::RejectedObservation {
                corners,
                min: self.pose_resolver.min_corners,
            }
            .into());
        }
        let ticket = self.issue_ticket(SolveKind::Extrinsics)?;
        Ok(ExtrinsicRequest {
            ticket,
            observation,
            intrinsics,
            resolver: self.pose_resolver,
        })
    }

    /// Phase to fall back to when a pose solve fails or is abandoned.
    fn extrinsic_fallback(&self) -> CalibrationPhase {
        if self.extrinsics.is_some() {
            CalibrationPhase::ExtrinsicsReady
        } else {
            CalibrationPhase::IntrinsicsReady
        }
    }

    /// Apply the outcome of a pose solve.
    ///
    /// Failure returns to `IntrinsicsReady`, or to `ExtrinsicsReady` when a
    /// re-capture fails and the previous pose is still valid.
    pub fn complete_extrinsic_solve(
        &mut self,
        ticket: SolveTicket,
        result: Result<ExtrinsicPose, CalibError>,
    ) -> Result<&ExtrinsicPose, WorkflowError> {
        self.redeem_ticket(ticket)?;
        let intrinsics = self.intrinsics.as_ref().ok_or(WorkflowError::NoIntrinsics)?;
        match result.and_then(|pose| pose.ensure_bound_to(intrinsics).map(|()| pose)) {
            Ok(pose) => {
                info!("extrinsic pose applied for model {}", pose.intrinsic_id());
                self.set_phase(CalibrationPhase::ExtrinsicsReady);
                Ok(self.extrinsics.insert(pose))
            }
            Err(err) => {
                warn!("extrinsic capture failed: {err}");
                let fallback = self.extrinsic_fallback();
                self.set_phase(fallback);
                Err(err.into())
            }
        }
    }

    /// Run a pose solve on the calling thread.
    pub fn resolve_extrinsics<P: VisionPrimitives + ?Sized>(
        &mut self,
        provider: &P,
        observation: BoardObservation,
    ) -> Result<&ExtrinsicPose, WorkflowError> {
        let request = self.begin_extrinsic_solve(observation)?;
        let result = request.run(provider);
        self.complete_extrinsic_solve(request.ticket, result)
    }

    /// Forget the in-flight solve identified by `ticket`; a late result for
    /// it will be rejected as superseded. Returns `false` if `ticket` was not
    /// in flight.
    pub fn abandon_solve(&mut self, ticket: SolveTicket) -> bool {
        if self.in_flight != Some(ticket) {
            return false;
        }
        self.bump_generation();
        if ticket.kind == SolveKind::Extrinsics
            && self.phase == CalibrationPhase::ExtrinsicsInProgress
        {
            let fallback = self.extrinsic_fallback();
            self.set_phase(fallback);
        }
        info!("{:?} solve #{} abandoned", ticket.kind, ticket.generation);
        true
    }

    // ----- measurement -----------------------------------------------------

    pub fn start_measurement(&mut self) -> Result<(), WorkflowError> {
        match self.phase {
            CalibrationPhase::ExtrinsicsReady | CalibrationPhase::MeasurementActive => {}
            _ => return Err(self.invalid("starting measurement")),
        }
        let intrinsics = self.intrinsics.as_ref().ok_or(WorkflowError::NoIntrinsics)?;
        let pose = self.extrinsics.as_ref().ok_or(WorkflowError::NoExtrinsics)?;
        pose.ensure_bound_to(intrinsics)?;
        self.set_phase(CalibrationPhase::MeasurementActive);
        Ok(())
    }

    /// Leave measurement mode, keeping the pose.
    pub fn stop_measurement(&mut self) -> Result<(), WorkflowError> {
        match self.phase {
            CalibrationPhase::MeasurementActive => {
                self.set_phase(CalibrationPhase::ExtrinsicsReady);
                Ok(())
            }
            CalibrationPhase::ExtrinsicsReady => Ok(()),
            _ => Err(self.invalid("stopping measurement")),
        }
    }

    /// Measure the distance between two picks on the board plane, undistorting
    /// them with `provider`.
    pub fn measure<P: VisionPrimitives + ?Sized>(
        &self,
        provider: &P,
        pixel_a: Point2<f64>,
        pixel_b: Point2<f64>,
    ) -> Result<MeasurementResult, WorkflowError> {
        if self.phase != CalibrationPhase::MeasurementActive {
            return Err(self.invalid("measuring"));
        }
        let intrinsics = self.intrinsics.as_ref().ok_or(WorkflowError::NoIntrinsics)?;
        let pose = self.extrinsics.as_ref().ok_or(WorkflowError::NoExtrinsics)?;
        Ok(measure_with(
            provider,
            pixel_a,
            pixel_b,
            intrinsics,
            pose,
            &self.measure_options(),
        )?)
    }

    // ----- reset / restore -------------------------------------------------

    /// Discard both models and the batch, and start intrinsic calibration over.
    pub fn recalibrate(&mut self) {
        info!("full recalibration requested");
        self.intrinsics = None;
        self.extrinsics = None;
        self.accumulator.clear();
        self.bump_generation();
        self.set_phase(CalibrationPhase::IntrinsicsInProgress);
    }

    /// Install models loaded from storage.
    ///
    /// Enters `IntrinsicsReady`, or `ExtrinsicsReady` when a pose bound to
    /// `intrinsics` is given.
    pub fn restore(
        &mut self,
        intrinsics: IntrinsicModel,
        extrinsics: Option<ExtrinsicPose>,
    ) -> Result<(), WorkflowError> {
        if let Some(pose) = &extrinsics {
            pose.ensure_bound_to(&intrinsics)?;
        }
        info!("restoring intrinsics {}", intrinsics.id());
        self.bump_generation();
        self.accumulator.clear();
        let next = if extrinsics.is_some() {
            CalibrationPhase::ExtrinsicsReady
        } else {
            CalibrationPhase::IntrinsicsReady
        };
        self.intrinsics = Some(intrinsics);
        self.extrinsics = extrinsics;
        self.set_phase(next);
        Ok(())
    }
}
