use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

/// Brown-Conrady radial-tangential lens distortion in normalized coordinates.
///
/// Coefficient order follows the usual `[k1, k2, p1, p2, k3]` convention.
/// A 4-coefficient model is represented with `k3 = None`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Distortion {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    #[serde(default)]
    pub k3: Option<f64>,
}

const UNDISTORT_ITERS: usize = 20;
const UNDISTORT_EPS: f64 = 1e-14;

impl Distortion {
    /// Five-coefficient model with every term zero.
    pub fn zero() -> Self {
        Self {
            k3: Some(0.0),
            ..Self::default()
        }
    }

    /// Build from a flat coefficient slice of length 4 or 5.
    pub fn from_slice(coeffs: &[f64]) -> Option<Self> {
        match *coeffs {
            [k1, k2, p1, p2] => Some(Self {
                k1,
                k2,
                p1,
                p2,
                k3: None,
            }),
            [k1, k2, p1, p2, k3] => Some(Self {
                k1,
                k2,
                p1,
                p2,
                k3: Some(k3),
            }),
            _ => None,
        }
    }

    /// Coefficients in `[k1, k2, p1, p2(, k3)]` order.
    pub fn to_vec(&self) -> Vec<f64> {
        let mut out = vec![self.k1, self.k2, self.p1, self.p2];
        if let Some(k3) = self.k3 {
            out.push(k3);
        }
        out
    }

    pub fn is_finite(&self) -> bool {
        self.to_vec().iter().all(|c| c.is_finite())
    }

    pub fn is_zero(&self) -> bool {
        self.to_vec().iter().all(|&c| c == 0.0)
    }

    /// Apply distortion to an ideal normalized point.
    pub fn distort(&self, n: Vector2<f64>) -> Vector2<f64> {
        let (x, y) = (n.x, n.y);
        let r2 = x * x + y * y;
        let radial = self.radial(r2);
        let (dx, dy) = self.tangential(x, y, r2);
        Vector2::new(x * radial + dx, y * radial + dy)
    }

    /// Invert [`Distortion::distort`] by fixed-point iteration.
    ///
    /// Converges for the moderate distortion of ordinary webcam lenses; points
    /// far outside the calibrated field may not converge and return the last
    /// iterate.
    pub fn undistort(&self, d: Vector2<f64>) -> Vector2<f64> {
        if self.is_zero() {
            return d;
        }
        let (mut x, mut y) = (d.x, d.y);
        for _ in 0..UNDISTORT_ITERS {
            let r2 = x * x + y * y;
            let radial = self.radial(r2);
            if radial.abs() < f64::EPSILON {
                break;
            }
            let (dx, dy) = self.tangential(x, y, r2);
            let nx = (d.x - dx) / radial;
            let ny = (d.y - dy) / radial;
            let step = (nx - x).abs() + (ny - y).abs();
            x = nx;
            y = ny;
            if step < UNDISTORT_EPS {
                break;
            }
        }
        Vector2::new(x, y)
    }

    #[inline]
    fn radial(&self, r2: f64) -> f64 {
        let k3 = self.k3.unwrap_or(0.0);
        1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * k3))
    }

    #[inline]
    fn tangential(&self, x: f64, y: f64, r2: f64) -> (f64, f64) {
        let xy = x * y;
        (
            2.0 * self.p1 * xy + self.p2 * (r2 + 2.0 * x * x),
            self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * xy,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_length_selects_model() {
        let four = Distortion::from_slice(&[0.1, -0.2, 0.001, 0.002]).expect("4 coeffs");
        assert_eq!(four.k3, None);
        assert_eq!(four.to_vec().len(), 4);

        let five = Distortion::from_slice(&[0.1, -0.2, 0.001, 0.002, 0.05]).expect("5 coeffs");
        assert_eq!(five.k3, Some(0.05));
        assert_eq!(five.to_vec(), vec![0.1, -0.2, 0.001, 0.002, 0.05]);

        assert!(Distortion::from_slice(&[0.1, 0.2, 0.3]).is_none());
        assert!(Distortion::from_slice(&[0.0; 8]).is_none());
    }

    #[test]
    fn undistort_inverts_distort() {
        let d = Distortion {
            k1: -0.21,
            k2: 0.06,
            p1: 0.0012,
            p2: -0.0008,
            k3: Some(-0.01),
        };
        for &(x, y) in &[(0.0, 0.0), (0.1, -0.05), (-0.3, 0.25), (0.35, 0.3)] {
            let n = Vector2::new(x, y);
            let back = d.undistort(d.distort(n));
            assert!((back - n).norm() < 1e-9, "({x}, {y}) -> {back:?}");
        }
    }

    #[test]
    fn zero_model_is_identity() {
        let p = Vector2::new(0.4, -0.2);
        assert_eq!(Distortion::zero().distort(p), p);
        assert_eq!(Distortion::zero().undistort(p), p);
    }
}
