use nalgebra::{Point2, Point3};
use serde::{Deserialize, Serialize};

/// Image resolution in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// True if both dimensions are non-zero.
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    /// True if `p` lies inside `[0, width) x [0, height)`.
    pub fn contains(&self, p: Point2<f64>) -> bool {
        p.x >= 0.0 && p.y >= 0.0 && p.x < self.width as f64 && p.y < self.height as f64
    }
}

/// One detected board corner: where it was seen and where it lives on the board.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Correspondence {
    /// Detected corner position in pixels.
    pub pixel: Point2<f64>,
    /// Corner position in board-local coordinates (meters, z = 0 for a planar board).
    pub board: Point3<f64>,
    /// Detector-assigned corner id, if any.
    #[serde(default)]
    pub id: Option<u32>,
}

impl Correspondence {
    pub fn new(pixel: Point2<f64>, board: Point3<f64>) -> Self {
        Self {
            pixel,
            board,
            id: None,
        }
    }

    pub fn with_id(mut self, id: u32) -> Self {
        self.id = Some(id);
        self
    }
}

/// Board corners detected in a single frame.
///
/// Immutable once created. The validity flag records whether the frame met
/// the minimum corner count it was created against.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoardObservation {
    correspondences: Vec<Correspondence>,
    image_size: ImageSize,
    min_corners: usize,
}

impl BoardObservation {
    pub fn new(
        correspondences: Vec<Correspondence>,
        image_size: ImageSize,
        min_corners: usize,
    ) -> Self {
        Self {
            correspondences,
            image_size,
            min_corners,
        }
    }

    #[inline]
    pub fn correspondences(&self) -> &[Correspondence] {
        &self.correspondences
    }

    #[inline]
    pub fn corner_count(&self) -> usize {
        self.correspondences.len()
    }

    #[inline]
    pub fn image_size(&self) -> ImageSize {
        self.image_size
    }

    /// Minimum corner count this observation was validated against.
    #[inline]
    pub fn min_corners(&self) -> usize {
        self.min_corners
    }

    /// True if the frame carried at least `min_corners` corners.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.corner_count() >= self.min_corners
    }

    pub fn pixels(&self) -> impl Iterator<Item = Point2<f64>> + '_ {
        self.correspondences.iter().map(|c| c.pixel)
    }

    pub fn board_points(&self) -> impl Iterator<Item = Point3<f64>> + '_ {
        self.correspondences.iter().map(|c| c.board)
    }

    /// True if every board point lies on the z = 0 plane.
    pub fn is_planar(&self) -> bool {
        self.correspondences.iter().all(|c| c.board.z.abs() < 1e-9)
    }
}
