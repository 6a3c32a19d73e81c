//! Collection of board observations for intrinsic calibration.

use log::debug;
use planar_measure_core::{BoardObservation, ImageSize};

/// Why [`ObservationAccumulator::add`] refused an observation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectReason {
    /// Fewer corners than the configured minimum.
    TooFewCorners { corners: usize, min: usize },
    /// Frame resolution differs from the one the batch started with.
    SizeMismatch {
        expected: ImageSize,
        got: ImageSize,
    },
}

/// Outcome of adding an observation. Rejection is a normal outcome, not an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddOutcome {
    Accepted { count: usize },
    Rejected { reason: RejectReason },
}

impl AddOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// Ordered batch of valid observations.
///
/// Only validity is enforced (corner count and a consistent image size); pose
/// diversity is the caller's concern.
#[derive(Clone, Debug, Default)]
pub struct ObservationAccumulator {
    min_corners: usize,
    observations: Vec<BoardObservation>,
    image_size: Option<ImageSize>,
}

impl ObservationAccumulator {
    pub fn new(min_corners: usize) -> Self {
        Self {
            min_corners,
            observations: Vec::new(),
            image_size: None,
        }
    }

    pub fn min_corners(&self) -> usize {
        self.min_corners
    }

    /// Append `observation` if it has at least `min_corners` corners and
    /// matches the batch's image size.
    pub fn add(&mut self, observation: BoardObservation) -> AddOutcome {
        let corners = observation.corner_count();
        if corners < self.min_corners {
            debug!(
                "observation rejected: {corners} corners < {}",
                self.min_corners
            );
            return AddOutcome::Rejected {
                reason: RejectReason::TooFewCorners {
                    corners,
                    min: self.min_corners,
                },
            };
        }
        let size = observation.image_size();
        match self.image_size {
            Some(expected) if expected != size => {
                debug!(
                    "observation rejected: size {}x{} != {}x{}",
                    size.width, size.height, expected.width, expected.height
                );
                return AddOutcome::Rejected {
                    reason: RejectReason::SizeMismatch {
                        expected,
                        got: size,
                    },
                };
            }
            Some(_) => {}
            None => self.image_size = Some(size),
        }
        self.observations.push(observation);
        debug!("observation accepted ({corners} corners), {} total", self.count());
        AddOutcome::Accepted {
            count: self.count(),
        }
    }

    /// Discard every observation and forget the image size.
    pub fn clear(&mut self) {
        self.observations.clear();
        self.image_size = None;
    }

    pub fn count(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Image size of the batch, fixed by the first accepted observation.
    pub fn image_size(&self) -> Option<ImageSize> {
        self.image_size
    }

    pub fn observations(&self) -> &[BoardObservation] {
        &self.observations
    }

    /// Copy of the batch for a background solve.
    pub fn snapshot(&self) -> Vec<BoardObservation> {
        self.observations.clone()
    }

    /// Move the batch out, leaving the accumulator empty.
    pub fn take(&mut self) -> Vec<BoardObservation> {
        self.image_size = None;
        std::mem::take(&mut self.observations)
    }
}
