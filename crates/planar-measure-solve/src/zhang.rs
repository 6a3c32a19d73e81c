//! Zhang's closed-form intrinsics with the zero-skew constraint.

use nalgebra::{DMatrix, Matrix3, SVector};
use planar_measure_core::{ImageSize, VisionError};

/// Pinhole parameters without distortion.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct Pinhole {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl Pinhole {
    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx, 0.0, self.cx, //
            0.0, self.fy, self.cy, //
            0.0, 0.0, 1.0,
        )
    }
}

/// `h_i^T B h_j` as a dot product with `b = [B11, B22, B13, B23, B33]`.
///
/// The `B12` term is dropped because zero skew forces it to zero.
fn v_ij(h: &Matrix3<f64>, i: usize, j: usize) -> SVector<f64, 5> {
    let hi = h.column(i);
    let hj = h.column(j);
    SVector::<f64, 5>::from_row_slice(&[
        hi[0] * hj[0],
        hi[1] * hj[1],
        hi[2] * hj[0] + hi[0] * hj[2],
        hi[2] * hj[1] + hi[1] * hj[2],
        hi[2] * hj[2],
    ])
}

/// Pixel-space conditioning: center the image and scale it to ~unit size.
fn conditioning(size: ImageSize) -> (Matrix3<f64>, f64) {
    let (w, h) = (size.width as f64, size.height as f64);
    let s = 2.0 / (w + h);
    (
        Matrix3::new(s, 0.0, -s * 0.5 * w, 0.0, s, -s * 0.5 * h, 0.0, 0.0, 1.0),
        s,
    )
}

/// Estimate `K` from board-to-image homographies (at least 3 views).
pub(crate) fn intrinsics_from_homographies(
    homographies: &[Matrix3<f64>],
    image_size: ImageSize,
) -> Result<Pinhole, VisionError> {
    if homographies.len() < 3 {
        return Err(VisionError::TooFewPoints {
            got: homographies.len(),
            need: 3,
        });
    }

    let (n, s) = conditioning(image_size);
    let mut vmtx = DMatrix::<f64>::zeros(2 * homographies.len(), 5);
    for (k, h) in homographies.iter().enumerate() {
        let hn = n * h;
        let norm = hn.norm();
        if norm <= f64::EPSILON || !norm.is_finite() {
            return Err(VisionError::Degenerate(format!("view {k}: empty homography")));
        }
        let hn = hn / norm;
        let v11 = v_ij(&hn, 0, 0);
        let v22 = v_ij(&hn, 1, 1);
        let v12 = v_ij(&hn, 0, 1);
        vmtx.row_mut(2 * k).copy_from(&v12.transpose());
        vmtx.row_mut(2 * k + 1).copy_from(&(v11 - v22).transpose());
    }

    let svd = vmtx.svd(false, true);
    let v_t = svd.v_t.ok_or(VisionError::NotConverged("SVD failed".into()))?;
    let idx = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
        .ok_or(VisionError::NonFinite)?;
    let mut b = v_t.row(idx).transpose();
    if b[0] < 0.0 {
        b = -b;
    }
    let (b11, b22, b13, b23, b33) = (b[0], b[1], b[2], b[3], b[4]);

    if b11 <= 0.0 || b22 <= 0.0 {
        return Err(VisionError::Degenerate(
            "views do not constrain the focal length; vary the board tilt".into(),
        ));
    }

    let u0 = -b13 / b11;
    let v0 = -b23 / b22;
    let lambda = b33 - b13 * b13 / b11 + v0 * b23;
    if lambda <= 0.0 || !lambda.is_finite() {
        return Err(VisionError::Degenerate(format!(
            "invalid scale {lambda:.3e} in closed-form intrinsics"
        )));
    }
    let alpha = (lambda / b11).sqrt();
    let beta = (lambda / b22).sqrt();

    // Undo the conditioning: K = N^{-1} K'.
    let pinhole = Pinhole {
        fx: alpha / s,
        fy: beta / s,
        cx: u0 / s + 0.5 * image_size.width as f64,
        cy: v0 / s + 0.5 * image_size.height as f64,
    };
    if ![pinhole.fx, pinhole.fy, pinhole.cx, pinhole.cy]
        .iter()
        .all(|v| v.is_finite())
    {
        return Err(VisionError::NonFinite);
    }
    Ok(pinhole)
}
