//! Board specification and corner layout helpers for ChArUco boards.

use crate::{BoardObservation, Correspondence, ImageSize};
use nalgebra::{Point2, Point3};
use serde::{Deserialize, Serialize};

/// Static ChArUco board specification.
///
/// `squares_x`/`squares_y` are **square counts** (not inner corner counts).
/// Lengths are in meters; measured distances come out in the same unit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoardSpec {
    pub squares_x: u32,
    pub squares_y: u32,
    pub square_length: f64,
    pub marker_length: f64,
    /// Marker dictionary name, e.g. `DICT_4X4_50`. Only used by detectors.
    #[serde(default = "default_dictionary")]
    pub dictionary: String,
}

fn default_dictionary() -> String {
    "DICT_4X4_50".to_string()
}

impl Default for BoardSpec {
    fn default() -> Self {
        Self {
            squares_x: 6,
            squares_y: 5,
            square_length: 0.010,
            marker_length: 0.008,
            dictionary: default_dictionary(),
        }
    }
}

/// Board specification validation errors.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum BoardSpecError {
    #[error("squares_x and squares_y must be >= 2")]
    InvalidSize,
    #[error("square_length must be > 0")]
    InvalidSquareLength,
    #[error("marker_length must be in (0, square_length)")]
    InvalidMarkerLength,
    #[error("corner id {id} is outside the board (max {max})")]
    UnknownCorner { id: u32, max: u32 },
    #[error("{ids} corner ids but {pixels} pixel positions")]
    LengthMismatch { ids: usize, pixels: usize },
}

impl BoardSpec {
    /// Check the spec for internal consistency.
    pub fn validate(&self) -> Result<(), BoardSpecError> {
        if self.squares_x < 2 || self.squares_y < 2 {
            return Err(BoardSpecError::InvalidSize);
        }
        if !self.square_length.is_finite() || self.square_length <= 0.0 {
            return Err(BoardSpecError::InvalidSquareLength);
        }
        if !self.marker_length.is_finite()
            || self.marker_length <= 0.0
            || self.marker_length >= self.square_length
        {
            return Err(BoardSpecError::InvalidMarkerLength);
        }
        Ok(())
    }

    /// Number of inner corners along x.
    #[inline]
    pub fn inner_cols(&self) -> u32 {
        self.squares_x.saturating_sub(1)
    }

    /// Number of inner corners along y.
    #[inline]
    pub fn inner_rows(&self) -> u32 {
        self.squares_y.saturating_sub(1)
    }

    /// Total number of ChArUco corners on the board.
    #[inline]
    pub fn corner_count(&self) -> u32 {
        self.inner_cols() * self.inner_rows()
    }

    /// Board-frame position of a ChArUco corner id (row-major over inner corners).
    ///
    /// The origin is the outer top-left board corner, so the first inner corner
    /// sits at `(square_length, square_length, 0)`.
    pub fn corner_object_point(&self, id: u32) -> Option<Point3<f64>> {
        let cols = self.inner_cols();
        if cols == 0 || id >= self.corner_count() {
            return None;
        }
        let i = (id % cols) as f64 + 1.0;
        let j = (id / cols) as f64 + 1.0;
        Some(Point3::new(
            i * self.square_length,
            j * self.square_length,
            0.0,
        ))
    }

    /// Build an observation from detector output (corner ids + pixel positions).
    pub fn observation_from_ids(
        &self,
        ids: &[u32],
        pixels: &[Point2<f64>],
        image_size: ImageSize,
        min_corners: usize,
    ) -> Result<BoardObservation, BoardSpecError> {
        if ids.len() != pixels.len() {
            return Err(BoardSpecError::LengthMismatch {
                ids: ids.len(),
                pixels: pixels.len(),
            });
        }
        let max = self.corner_count();
        let correspondences = ids
            .iter()
            .zip(pixels)
            .map(|(&id, &pixel)| {
                self.corner_object_point(id)
                    .map(|board| Correspondence::new(pixel, board).with_id(id))
                    .ok_or(BoardSpecError::UnknownCorner { id, max })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(BoardObservation::new(
            correspondences,
            image_size,
            min_corners,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_board_matches_six_by_five() {
        let board = BoardSpec::default();
        board.validate().expect("valid");
        assert_eq!(board.inner_cols(), 5);
        assert_eq!(board.inner_rows(), 4);
        assert_eq!(board.corner_count(), 20);
    }

    #[test]
    fn corner_points_are_row_major() {
        let board = BoardSpec::default();
        let p0 = board.corner_object_point(0).expect("corner 0");
        assert!((p0.x - 0.010).abs() < 1e-12 && (p0.y - 0.010).abs() < 1e-12);

        let p6 = board.corner_object_point(6).expect("corner 6");
        assert!((p6.x - 0.020).abs() < 1e-12, "x = {}", p6.x);
        assert!((p6.y - 0.020).abs() < 1e-12, "y = {}", p6.y);
        assert_eq!(p6.z, 0.0);

        assert!(board.corner_object_point(20).is_none());
    }

    #[test]
    fn marker_must_fit_inside_square() {
        let board = BoardSpec {
            marker_length: 0.012,
            ..BoardSpec::default()
        };
        assert_eq!(board.validate(), Err(BoardSpecError::InvalidMarkerLength));
    }

    #[test]
    fn observation_from_ids_rejects_unknown_corner() {
        let board = BoardSpec::default();
        let size = ImageSize::new(640, 480);
        let err = board
            .observation_from_ids(&[0, 99], &[Point2::new(1.0, 1.0); 2], size, 4)
            .unwrap_err();
        assert_eq!(err, BoardSpecError::UnknownCorner { id: 99, max: 20 });

        let obs = board
            .observation_from_ids(&[0, 1], &[Point2::new(1.0, 1.0); 2], size, 4)
            .expect("known ids");
        assert_eq!(obs.corner_count(), 2);
        assert_eq!(obs.correspondences()[1].id, Some(1));
    }
}
