//! Ray-plane measurement between two picked pixels.

use crate::PickSpace;
use nalgebra::{Point2, Point3, Vector3};
use planar_measure_core::{CalibError, ExtrinsicPose, IntrinsicModel, VisionPrimitives};
use serde::Serialize;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Options for [`measure`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeasureOptions {
    pub pick_space: PickSpace,
    /// `|ray . normal|` below this fails with [`CalibError::ParallelRay`].
    pub parallel_epsilon: f64,
}

impl Default for MeasureOptions {
    fn default() -> Self {
        Self {
            pick_space: PickSpace::Distorted,
            parallel_epsilon: 1e-9,
        }
    }
}

/// Two points on the measurement plane and the distance between them.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct MeasurementResult {
    /// Intersection points in camera coordinates (meters).
    pub point_a: Point3<f64>,
    pub point_b: Point3<f64>,
    /// The same points in board coordinates (z = 0 up to rounding).
    pub board_a: Point3<f64>,
    pub board_b: Point3<f64>,
    pub distance_m: f64,
}

impl MeasurementResult {
    pub fn distance_cm(&self) -> f64 {
        self.distance_m * 100.0
    }

    pub fn distance_mm(&self) -> f64 {
        self.distance_m * 1000.0
    }
}

/// Camera-frame ray direction through an ideal (undistorted) pixel.
fn ray_direction(pixel: Point2<f64>, intrinsics: &IntrinsicModel) -> Vector3<f64> {
    Vector3::new(
        (pixel.x - intrinsics.cx()) / intrinsics.fx(),
        (pixel.y - intrinsics.cy()) / intrinsics.fy(),
        1.0,
    )
}

/// Intersect the camera ray through `pixel` with the board plane.
pub fn intersect_plane(
    pixel: Point2<f64>,
    intrinsics: &IntrinsicModel,
    pose: &ExtrinsicPose,
    opts: &MeasureOptions,
) -> Result<Point3<f64>, CalibError> {
    intersect_undistorted(pixel, |p| intrinsics.undistort_pixel(p), intrinsics, pose, opts)
}

fn intersect_undistorted(
    pixel: Point2<f64>,
    undistort: impl Fn(Point2<f64>) -> Point2<f64>,
    intrinsics: &IntrinsicModel,
    pose: &ExtrinsicPose,
    opts: &MeasureOptions,
) -> Result<Point3<f64>, CalibError> {
    let ideal = match opts.pick_space {
        PickSpace::Distorted => undistort(pixel),
        PickSpace::Rectified => pixel,
    };
    let dir = ray_direction(ideal, intrinsics);
    let normal = pose.plane_normal();
    let denominator = dir.dot(&normal);
    if denominator.abs() < opts.parallel_epsilon || !denominator.is_finite() {
        return Err(CalibError::ParallelRay { denominator });
    }
    // Ray origin is the camera center, so (plane_point - origin) = tvec.
    let t = pose.tvec().dot(&normal) / denominator;
    Ok(Point3::from(dir * t))
}

/// Measure the distance between two picks on the board plane.
///
/// Pure: reads only the immutable models, so concurrent calls need no locking.
/// Fails with [`CalibError::StaleExtrinsics`] if `pose` was solved against a
/// different intrinsic model. Distorted picks are undistorted with the
/// model's own distortion; see [`measure_with`] to use a vision provider.
#[cfg_attr(feature = "tracing", instrument(level = "debug", skip(intrinsics, pose)))]
pub fn measure(
    pixel_a: Point2<f64>,
    pixel_b: Point2<f64>,
    intrinsics: &IntrinsicModel,
    pose: &ExtrinsicPose,
    opts: &MeasureOptions,
) -> Result<MeasurementResult, CalibError> {
    let undistort = |p: Point2<f64>| intrinsics.undistort_pixel(p);
    measure_undistorted(pixel_a, pixel_b, undistort, intrinsics, pose, opts)
}

/// [`measure`], with distorted picks undistorted by `provider`.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(provider, intrinsics, pose))
)]
pub fn measure_with<P: VisionPrimitives + ?Sized>(
    provider: &P,
    pixel_a: Point2<f64>,
    pixel_b: Point2<f64>,
    intrinsics: &IntrinsicModel,
    pose: &ExtrinsicPose,
    opts: &MeasureOptions,
) -> Result<MeasurementResult, CalibError> {
    measure_undistorted(
        pixel_a,
        pixel_b,
        |p| provider.undistort_point(p, intrinsics),
        intrinsics,
        pose,
        opts,
    )
}

fn measure_undistorted(
    pixel_a: Point2<f64>,
    pixel_b: Point2<f64>,
    undistort: impl Fn(Point2<f64>) -> Point2<f64>,
    intrinsics: &IntrinsicModel,
    pose: &ExtrinsicPose,
    opts: &MeasureOptions,
) -> Result<MeasurementResult, CalibError> {
    pose.ensure_bound_to(intrinsics)?;
    let point_a = intersect_undistorted(pixel_a, &undistort, intrinsics, pose, opts)?;
    let point_b = intersect_undistorted(pixel_b, &undistort, intrinsics, pose, opts)?;
    Ok(MeasurementResult {
        point_a,
        point_b,
        board_a: pose.camera_to_board(&point_a),
        board_b: pose.camera_to_board(&point_b),
        distance_m: (point_b - point_a).norm(),
    })
}

/// Two-slot collector for measurement picks.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PickSet {
    first: Option<Point2<f64>>,
    second: Option<Point2<f64>>,
}

impl PickSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a pick. Returns `false` (and ignores it) once both slots are full.
    pub fn push(&mut self, pixel: Point2<f64>) -> bool {
        if self.first.is_none() {
            self.first = Some(pixel);
        } else if self.second.is_none() {
            self.second = Some(pixel);
        } else {
            return false;
        }
        true
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn len(&self) -> usize {
        usize::from(self.first.is_some()) + usize::from(self.second.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.first.is_none()
    }

    /// Both picks, once two have been made.
    pub fn pair(&self) -> Option<(Point2<f64>, Point2<f64>)> {
        self.first.zip(self.second)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pick_set_holds_two_points() {
        let mut picks = PickSet::new();
        assert!(picks.is_empty());
        assert!(picks.push(Point2::new(1.0, 2.0)));
        assert_eq!(picks.pair(), None);
        assert!(picks.push(Point2::new(3.0, 4.0)));
        assert!(!picks.push(Point2::new(5.0, 6.0)));
        assert_eq!(picks.len(), 2);
        assert_eq!(
            picks.pair(),
            Some((Point2::new(1.0, 2.0), Point2::new(3.0, 4.0)))
        );
        picks.reset();
        assert_eq!(picks.len(), 0);
    }

    #[test]
    fn result_units() {
        let r = MeasurementResult {
            point_a: Point3::origin(),
            point_b: Point3::new(0.1, 0.0, 0.0),
            board_a: Point3::origin(),
            board_b: Point3::new(0.1, 0.0, 0.0),
            distance_m: 0.1,
        };
        assert!((r.distance_cm() - 10.0).abs() < 1e-12);
        assert!((r.distance_mm() - 100.0).abs() < 1e-12);
    }
}
