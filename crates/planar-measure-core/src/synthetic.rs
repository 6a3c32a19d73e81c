//! Deterministic synthetic planar scenes.
//!
//! Used by tests and the `synthetic` CLI command. Noise is generated with a
//! keyed SplitMix64 stream instead of a `rand` RNG so datasets stay identical
//! across platforms and dependency upgrades.

use crate::{BoardObservation, Correspondence, ImageSize, IntrinsicModel};
use nalgebra::{Point3, Rotation3, Vector2, Vector3};

/// Zero-mean Gaussian pixel noise keyed by `(view, point)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussianPixelNoise {
    pub seed: u64,
    /// Standard deviation per axis, in pixels.
    pub sigma_px: f64,
}

impl GaussianPixelNoise {
    pub fn none() -> Self {
        Self {
            seed: 0,
            sigma_px: 0.0,
        }
    }

    pub fn sample(&self, view_idx: usize, point_idx: usize) -> Vector2<f64> {
        if self.sigma_px == 0.0 {
            return Vector2::zeros();
        }
        let key = mix_key(self.seed, view_idx, point_idx);
        // Box-Muller; shift u1 away from zero so ln() stays finite.
        let u1 = unit_f64(splitmix64(key)).max(f64::MIN_POSITIVE);
        let u2 = unit_f64(splitmix64(key ^ 0x94D0_49BB_1331_11EB));
        let r = (-2.0 * u1.ln()).sqrt() * self.sigma_px;
        let theta = 2.0 * std::f64::consts::PI * u2;
        Vector2::new(r * theta.cos(), r * theta.sin())
    }
}

#[inline]
fn mix_key(seed: u64, view_idx: usize, point_idx: usize) -> u64 {
    seed ^ (view_idx as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ (point_idx as u64).wrapping_mul(0xBF58_476D_1CE4_E5B9)
}

#[inline]
fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Map to `[0, 1)` using the top 53 bits.
#[inline]
fn unit_f64(x: u64) -> f64 {
    (x >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
}

/// Planar grid of `nx * ny` board points (z = 0), row-major.
pub fn grid_points(nx: usize, ny: usize, spacing: f64) -> Vec<Point3<f64>> {
    let mut points = Vec::with_capacity(nx * ny);
    for j in 0..ny {
        for i in 0..nx {
            points.push(Point3::new(i as f64 * spacing, j as f64 * spacing, 0.0));
        }
    }
    points
}

/// `n_views` board poses looking at a board centered at `center`.
///
/// Tilts cycle around the optical axis so rotations are spread over both
/// image axes, which the closed-form intrinsic fit needs.
pub fn tilted_poses(
    n_views: usize,
    center: Point3<f64>,
    distance: f64,
    max_tilt_rad: f64,
) -> Vec<(Vector3<f64>, Vector3<f64>)> {
    (0..n_views)
        .map(|k| {
            let phase = 2.0 * std::f64::consts::PI * k as f64 / n_views.max(1) as f64;
            let roll = 0.1 * ((k % 3) as f64 - 1.0);
            let rvec = Vector3::new(
                max_tilt_rad * phase.cos(),
                max_tilt_rad * phase.sin(),
                roll,
            );
            let rot = Rotation3::new(rvec);
            let depth = distance + 0.05 * (k % 2) as f64;
            let offset = Vector3::new(0.02 * phase.sin(), -0.015 * phase.cos(), depth);
            let tvec = offset - rot * center.coords;
            (rvec, tvec)
        })
        .collect()
}

/// Project board points through `camera` at pose `(rvec, tvec)`, adding noise.
///
/// Returns `None` if any point falls behind the camera.
pub fn project_observation(
    camera: &IntrinsicModel,
    rvec: &Vector3<f64>,
    tvec: &Vector3<f64>,
    board_points: &[Point3<f64>],
    noise: &GaussianPixelNoise,
    view_idx: usize,
    min_corners: usize,
) -> Option<BoardObservation> {
    let rot = Rotation3::new(*rvec);
    let correspondences = board_points
        .iter()
        .enumerate()
        .map(|(idx, pb)| {
            let pc = rot * *pb + *tvec;
            let px = camera.project(&pc)? + noise.sample(view_idx, idx);
            Some(Correspondence::new(px, *pb).with_id(idx as u32))
        })
        .collect::<Option<Vec<_>>>()?;
    Some(BoardObservation::new(
        correspondences,
        camera.image_size(),
        min_corners,
    ))
}

/// True if every corner of `observation` lands inside `size`.
pub fn fits_in_image(observation: &BoardObservation, size: ImageSize) -> bool {
    observation.pixels().all(|p| size.contains(p))
}
