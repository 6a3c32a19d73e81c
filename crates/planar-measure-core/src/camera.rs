//! Intrinsic camera model and board-to-camera pose.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::{CalibError, Distortion, ImageSize};
use nalgebra::{Matrix3, Point2, Point3, Rotation3, Vector2, Vector3};
use serde::{Deserialize, Serialize};

/// Process-unique identity of an [`IntrinsicModel`] instance.
///
/// Every constructed model gets a fresh id; an [`ExtrinsicPose`] remembers
/// the id of the model it was solved against so staleness can be detected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelId(u64);

static NEXT_MODEL_ID: AtomicU64 = AtomicU64::new(1);

impl ModelId {
    fn next() -> Self {
        Self(NEXT_MODEL_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Pinhole camera with radial-tangential distortion (zero skew).
///
/// Immutable after creation. Equality compares parameters only, not identity.
#[derive(Clone, Debug)]
pub struct IntrinsicModel {
    id: ModelId,
    fx: f64,
    fy: f64,
    cx: f64,
    cy: f64,
    distortion: Distortion,
    rms: f64,
    image_size: ImageSize,
}

impl PartialEq for IntrinsicModel {
    fn eq(&self, other: &Self) -> bool {
        self.fx == other.fx
            && self.fy == other.fy
            && self.cx == other.cx
            && self.cy == other.cy
            && self.distortion == other.distortion
            && self.rms == other.rms
            && self.image_size == other.image_size
    }
}

impl IntrinsicModel {
    /// Validate parameters and create a model with a fresh [`ModelId`].
    pub fn new(
        fx: f64,
        fy: f64,
        cx: f64,
        cy: f64,
        distortion: Distortion,
        rms: f64,
        image_size: ImageSize,
    ) -> Result<Self, CalibError> {
        if !(fx.is_finite() && fy.is_finite() && fx > 0.0 && fy > 0.0) {
            return Err(CalibError::invalid_model(format!(
                "focal lengths must be finite and positive (fx={fx}, fy={fy})"
            )));
        }
        if !(cx.is_finite() && cy.is_finite()) {
            return Err(CalibError::invalid_model("principal point is not finite"));
        }
        if !distortion.is_finite() {
            return Err(CalibError::invalid_model(
                "distortion coefficients are not finite",
            ));
        }
        if !rms.is_finite() || rms < 0.0 {
            return Err(CalibError::invalid_model(format!(
                "rms must be finite and non-negative (rms={rms})"
            )));
        }
        if !image_size.is_valid() {
            return Err(CalibError::invalid_model("image size must be non-zero"));
        }
        Ok(Self {
            id: ModelId::next(),
            fx,
            fy,
            cx,
            cy,
            distortion,
            rms,
            image_size,
        })
    }

    /// Create a model from a 3x3 camera matrix. Skew must be zero.
    pub fn from_camera_matrix(
        k: &Matrix3<f64>,
        distortion: Distortion,
        rms: f64,
        image_size: ImageSize,
    ) -> Result<Self, CalibError> {
        if k[(0, 1)].abs() > 1e-9 * k[(0, 0)].abs().max(1.0) {
            return Err(CalibError::invalid_model(format!(
                "camera matrix has non-zero skew {}",
                k[(0, 1)]
            )));
        }
        if k[(1, 0)] != 0.0 || k[(2, 0)] != 0.0 || k[(2, 1)] != 0.0 || k[(2, 2)] != 1.0 {
            return Err(CalibError::invalid_model(
                "camera matrix must be upper triangular with K[2][2] = 1",
            ));
        }
        Self::new(
            k[(0, 0)],
            k[(1, 1)],
            k[(0, 2)],
            k[(1, 2)],
            distortion,
            rms,
            image_size,
        )
    }

    #[inline]
    pub fn id(&self) -> ModelId {
        self.id
    }

    #[inline]
    pub fn fx(&self) -> f64 {
        self.fx
    }

    #[inline]
    pub fn fy(&self) -> f64 {
        self.fy
    }

    #[inline]
    pub fn cx(&self) -> f64 {
        self.cx
    }

    #[inline]
    pub fn cy(&self) -> f64 {
        self.cy
    }

    #[inline]
    pub fn distortion(&self) -> &Distortion {
        &self.distortion
    }

    /// RMS reprojection error of the fit, in pixels.
    #[inline]
    pub fn rms(&self) -> f64 {
        self.rms
    }

    #[inline]
    pub fn image_size(&self) -> ImageSize {
        self.image_size
    }

    pub fn camera_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx, 0.0, self.cx, //
            0.0, self.fy, self.cy, //
            0.0, 0.0, 1.0,
        )
    }

    /// True if the fit's RMS reprojection error exceeds `threshold` pixels.
    pub fn has_high_error(&self, threshold: f64) -> bool {
        self.rms > threshold
    }

    /// Pixel -> distorted normalized coordinates (inverse camera matrix only).
    #[inline]
    pub fn pixel_to_normalized(&self, pixel: Point2<f64>) -> Vector2<f64> {
        Vector2::new((pixel.x - self.cx) / self.fx, (pixel.y - self.cy) / self.fy)
    }

    #[inline]
    pub fn normalized_to_pixel(&self, n: Vector2<f64>) -> Point2<f64> {
        Point2::new(self.fx * n.x + self.cx, self.fy * n.y + self.cy)
    }

    /// Remove lens distortion from a pixel, returning the ideal pixel position.
    pub fn undistort_pixel(&self, pixel: Point2<f64>) -> Point2<f64> {
        let n = self.distortion.undistort(self.pixel_to_normalized(pixel));
        self.normalized_to_pixel(n)
    }

    /// Project a camera-frame point to pixels. `None` if behind the camera.
    pub fn project(&self, p_cam: &Point3<f64>) -> Option<Point2<f64>> {
        if p_cam.z <= f64::EPSILON {
            return None;
        }
        let n = Vector2::new(p_cam.x / p_cam.z, p_cam.y / p_cam.z);
        Some(self.normalized_to_pixel(self.distortion.distort(n)))
    }
}

/// Rigid transform from board-local coordinates to camera coordinates.
///
/// Tagged with the [`ModelId`] of the intrinsic model it was solved against.
#[derive(Clone, Debug, PartialEq)]
pub struct ExtrinsicPose {
    rvec: Vector3<f64>,
    tvec: Vector3<f64>,
    intrinsic_id: ModelId,
}

impl ExtrinsicPose {
    /// Bind an axis-angle rotation and translation to `intrinsics`.
    pub fn new(
        rvec: Vector3<f64>,
        tvec: Vector3<f64>,
        intrinsics: &IntrinsicModel,
    ) -> Result<Self, CalibError> {
        if !(rvec.iter().all(|v| v.is_finite()) && tvec.iter().all(|v| v.is_finite())) {
            return Err(CalibError::invalid_model("pose is not finite"));
        }
        Ok(Self {
            rvec,
            tvec,
            intrinsic_id: intrinsics.id(),
        })
    }

    /// Rotation as an axis-angle vector (radians).
    #[inline]
    pub fn rvec(&self) -> Vector3<f64> {
        self.rvec
    }

    /// Translation in meters (board origin in camera coordinates).
    #[inline]
    pub fn tvec(&self) -> Vector3<f64> {
        self.tvec
    }

    #[inline]
    pub fn intrinsic_id(&self) -> ModelId {
        self.intrinsic_id
    }

    pub fn rotation(&self) -> Rotation3<f64> {
        Rotation3::new(self.rvec)
    }

    /// True if this pose was solved against `intrinsics`.
    pub fn is_bound_to(&self, intrinsics: &IntrinsicModel) -> bool {
        self.intrinsic_id == intrinsics.id()
    }

    /// Fail with `StaleExtrinsics` unless this pose belongs to `intrinsics`.
    pub fn ensure_bound_to(&self, intrinsics: &IntrinsicModel) -> Result<(), CalibError> {
        if self.is_bound_to(intrinsics) {
            Ok(())
        } else {
            Err(CalibError::StaleExtrinsics {
                pose_model: self.intrinsic_id,
                current_model: intrinsics.id(),
            })
        }
    }

    /// Board plane normal (board +z) in camera coordinates.
    pub fn plane_normal(&self) -> Vector3<f64> {
        self.rotation() * Vector3::z()
    }

    pub fn board_to_camera(&self, p: &Point3<f64>) -> Point3<f64> {
        self.rotation() * *p + self.tvec
    }

    pub fn camera_to_board(&self, p: &Point3<f64>) -> Point3<f64> {
        self.rotation().inverse() * (*p - self.tvec)
    }
}
