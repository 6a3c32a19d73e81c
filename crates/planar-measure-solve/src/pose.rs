//! Planar pose from a board-to-image homography.

use nalgebra::{Matrix2, Matrix3, Point2, Rotation3, Vector2, Vector3};
use planar_measure_core::VisionError;

/// Ratio of covariance eigenvalues below which points count as collinear.
const COLLINEAR_RATIO: f64 = 1e-6;

/// Reject point sets whose spread is essentially one-dimensional.
pub(crate) fn check_spread(points: &[Point2<f64>]) -> Result<(), VisionError> {
    if points.len() < 4 {
        return Err(VisionError::TooFewPoints {
            got: points.len(),
            need: 4,
        });
    }
    let n = points.len() as f64;
    let mean = points.iter().fold(Vector2::zeros(), |acc, p| acc + p.coords) / n;
    let mut cov = Matrix2::<f64>::zeros();
    for p in points {
        let d = p.coords - mean;
        cov += d * d.transpose();
    }
    cov /= n;
    let eig = cov.symmetric_eigenvalues();
    let (lo, hi) = (eig.min(), eig.max());
    if hi <= 0.0 || lo / hi < COLLINEAR_RATIO {
        return Err(VisionError::Degenerate("board points are collinear".into()));
    }
    Ok(())
}

/// Decompose `H ~ K [r1 r2 t]` into a rotation vector and translation.
///
/// The sign is chosen so the board lies in front of the camera (`t.z > 0`),
/// and `[r1 r2 r1xr2]` is projected onto SO(3).
pub(crate) fn pose_from_homography(
    k: &Matrix3<f64>,
    h: &Matrix3<f64>,
) -> Result<(Vector3<f64>, Vector3<f64>), VisionError> {
    let k_inv = k
        .try_inverse()
        .ok_or_else(|| VisionError::Degenerate("camera matrix is singular".into()))?;
    let a = k_inv * h;
    let h1 = a.column(0).into_owned();
    let h2 = a.column(1).into_owned();
    let h3 = a.column(2).into_owned();

    let denom = h1.norm() + h2.norm();
    if denom <= f64::EPSILON {
        return Err(VisionError::Degenerate("homography has no rotation part".into()));
    }
    let mut lambda = 2.0 / denom;
    if (h3 * lambda).z < 0.0 {
        lambda = -lambda;
    }

    let r1 = h1 * lambda;
    let r2 = h2 * lambda;
    let r3 = r1.cross(&r2);
    let t = h3 * lambda;

    let mut r_approx = Matrix3::zeros();
    r_approx.set_column(0, &r1);
    r_approx.set_column(1, &r2);
    r_approx.set_column(2, &r3);

    let svd = r_approx.svd(true, true);
    let (Some(u), Some(v_t)) = (svd.u, svd.v_t) else {
        return Err(VisionError::NotConverged("SVD of rotation failed".into()));
    };
    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        let mut u_fix = u;
        u_fix.column_mut(2).neg_mut();
        r = u_fix * v_t;
    }

    let rvec = Rotation3::from_matrix_unchecked(r).scaled_axis();
    if !(rvec.iter().all(|v| v.is_finite()) && t.iter().all(|v| v.is_finite())) {
        return Err(VisionError::NonFinite);
    }
    Ok((rvec, t))
}
