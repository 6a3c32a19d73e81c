//! Nonlinear refinement of intrinsics, distortion and per-view poses.
//!
//! Both problems are handed to the `levenberg-marquardt` crate. Jacobians are
//! central differences over the free parameters only, so fixed distortion
//! terms never enter the solver's parameter vector.

use crate::zhang::Pinhole;
use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use nalgebra::{storage::Owned, DMatrix, DVector, Dyn, Point3, Rotation3, Vector2, Vector3};
use planar_measure_core::{BoardObservation, Distortion};

/// Residual assigned to a point that lands behind the camera.
const BEHIND_CAMERA_PENALTY: f64 = 1e3;

const N_INTR: usize = 9;
const N_POSE: usize = 6;
const TOLERANCE: f64 = 1e-12;

#[derive(Clone, Copy, Debug)]
pub(crate) struct CameraParams {
    pub pinhole: Pinhole,
    pub distortion: Distortion,
}

impl CameraParams {
    fn to_params(self) -> [f64; N_INTR] {
        let d = self.distortion;
        [
            self.pinhole.fx,
            self.pinhole.fy,
            self.pinhole.cx,
            self.pinhole.cy,
            d.k1,
            d.k2,
            d.p1,
            d.p2,
            d.k3.unwrap_or(0.0),
        ]
    }

    fn from_params(p: &[f64], with_k3: bool) -> Self {
        Self {
            pinhole: Pinhole {
                fx: p[0],
                fy: p[1],
                cx: p[2],
                cy: p[3],
            },
            distortion: Distortion {
                k1: p[4],
                k2: p[5],
                p1: p[6],
                p2: p[7],
                k3: with_k3.then_some(p[8]),
            },
        }
    }

    fn project(
        &self,
        rot: &Rotation3<f64>,
        tvec: &Vector3<f64>,
        pb: &Point3<f64>,
    ) -> Option<Vector2<f64>> {
        let pc = rot.transform_point(pb) + *tvec;
        if pc.z <= f64::EPSILON {
            return None;
        }
        let d = self.distortion.distort(Vector2::new(pc.x / pc.z, pc.y / pc.z));
        Some(Vector2::new(
            self.pinhole.fx * d.x + self.pinhole.cx,
            self.pinhole.fy * d.y + self.pinhole.cy,
        ))
    }
}

fn push_residuals(
    out: &mut Vec<f64>,
    camera: &CameraParams,
    rvec: &Vector3<f64>,
    tvec: &Vector3<f64>,
    obs: &BoardObservation,
) {
    let rot = Rotation3::new(*rvec);
    for c in obs.correspondences() {
        match camera.project(&rot, tvec, &c.board) {
            Some(px) => {
                out.push(px.x - c.pixel.x);
                out.push(px.y - c.pixel.y);
            }
            None => {
                out.push(BEHIND_CAMERA_PENALTY);
                out.push(BEHIND_CAMERA_PENALTY);
            }
        }
    }
}

fn pose_at(x: &DVector<f64>, offset: usize) -> (Vector3<f64>, Vector3<f64>) {
    (
        Vector3::new(x[offset], x[offset + 1], x[offset + 2]),
        Vector3::new(x[offset + 3], x[offset + 4], x[offset + 5]),
    )
}

/// Central-difference Jacobian of `f` with respect to `full[columns]`.
fn central_difference(
    full: &DVector<f64>,
    columns: &[usize],
    f: impl Fn(&DVector<f64>) -> DVector<f64>,
) -> DMatrix<f64> {
    let mut probe = full.clone();
    let rows = f(&probe).len();
    let mut jac = DMatrix::<f64>::zeros(rows, columns.len());
    for (j, &col) in columns.iter().enumerate() {
        let x = full[col];
        let h = 1e-6 * x.abs().max(1.0);
        probe[col] = x + h;
        let rp = f(&probe);
        probe[col] = x - h;
        let rm = f(&probe);
        probe[col] = x;
        jac.set_column(j, &((rp - rm) / (2.0 * h)));
    }
    jac
}

fn solver(max_iters: usize) -> LevenbergMarquardt<f64> {
    LevenbergMarquardt::new()
        .with_ftol(TOLERANCE)
        .with_xtol(TOLERANCE)
        .with_gtol(TOLERANCE)
        .with_patience(max_iters.max(1))
}

/// Summary of one Levenberg-Marquardt run.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct RefineReport {
    pub evaluations: usize,
    pub initial_cost: f64,
    pub final_cost: f64,
    pub converged: bool,
    /// Solver termination reason, for logs.
    pub termination: String,
}

/// Joint problem over `[fx fy cx cy k1 k2 p1 p2 k3 | rvec tvec per view]`.
///
/// `full` always holds all parameters; the solver only sees `full[free]`.
struct IntrinsicProblem<'a> {
    views: &'a [BoardObservation],
    full: DVector<f64>,
    free: Vec<usize>,
    estimate_k3: bool,
}

impl<'a> IntrinsicProblem<'a> {
    fn new(
        views: &'a [BoardObservation],
        full: DVector<f64>,
        estimate_distortion: bool,
        estimate_k3: bool,
    ) -> Self {
        let free = (0..full.len())
            .filter(|&i| match i {
                4..=7 => estimate_distortion,
                8 => estimate_distortion && estimate_k3,
                _ => true,
            })
            .collect();
        Self {
            views,
            full,
            free,
            estimate_k3,
        }
    }

    fn residuals_at(&self, x: &DVector<f64>) -> DVector<f64> {
        let camera = CameraParams::from_params(&x.as_slice()[..N_INTR], self.estimate_k3);
        let mut out = Vec::new();
        for (v, obs) in self.views.iter().enumerate() {
            let (rvec, tvec) = pose_at(x, N_INTR + v * N_POSE);
            push_residuals(&mut out, &camera, &rvec, &tvec, obs);
        }
        DVector::from_vec(out)
    }
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for IntrinsicProblem<'_> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        for (value, &idx) in x.iter().zip(&self.free) {
            self.full[idx] = *value;
        }
    }

    fn params(&self) -> DVector<f64> {
        DVector::from_iterator(self.free.len(), self.free.iter().map(|&i| self.full[i]))
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        Some(self.residuals_at(&self.full))
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        Some(central_difference(&self.full, &self.free, |x| {
            self.residuals_at(x)
        }))
    }
}

/// Result of the joint refinement.
#[derive(Clone, Debug)]
pub(crate) struct IntrinsicRefinement {
    pub camera: CameraParams,
    pub poses: Vec<(Vector3<f64>, Vector3<f64>)>,
    pub rms: f64,
    pub report: RefineReport,
}

pub(crate) fn refine_intrinsics(
    views: &[BoardObservation],
    initial: CameraParams,
    poses: &[(Vector3<f64>, Vector3<f64>)],
    estimate_distortion: bool,
    estimate_k3: bool,
    max_iters: usize,
) -> IntrinsicRefinement {
    let mut x0 = Vec::with_capacity(N_INTR + N_POSE * poses.len());
    x0.extend_from_slice(&initial.to_params());
    for (r, t) in poses {
        x0.extend(r.iter().chain(t.iter()).copied());
    }
    let problem = IntrinsicProblem::new(
        views,
        DVector::from_vec(x0),
        estimate_distortion,
        estimate_k3,
    );
    let initial_cost = 0.5 * problem.residuals_at(&problem.full).norm_squared();
    let (problem, report) = solver(max_iters).minimize(problem);

    let x = &problem.full;
    let camera = CameraParams::from_params(&x.as_slice()[..N_INTR], estimate_k3);
    let poses = (0..views.len())
        .map(|v| pose_at(x, N_INTR + v * N_POSE))
        .collect();
    let n_points: usize = views.iter().map(BoardObservation::corner_count).sum();
    let rms = rms_from_cost(report.objective_function, n_points);
    IntrinsicRefinement {
        camera,
        poses,
        rms,
        report: RefineReport {
            evaluations: report.number_of_evaluations,
            initial_cost,
            final_cost: report.objective_function,
            converged: report.termination.was_successful(),
            termination: format!("{:?}", report.termination),
        },
    }
}

/// Single-view pose problem with the camera held fixed.
struct PoseProblem<'a> {
    camera: CameraParams,
    obs: &'a BoardObservation,
    pose: DVector<f64>,
}

impl PoseProblem<'_> {
    fn residuals_at(&self, x: &DVector<f64>) -> DVector<f64> {
        let (rvec, tvec) = pose_at(x, 0);
        let mut out = Vec::with_capacity(2 * self.obs.corner_count());
        push_residuals(&mut out, &self.camera, &rvec, &tvec, self.obs);
        DVector::from_vec(out)
    }
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for PoseProblem<'_> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        self.pose.clone_from(x);
    }

    fn params(&self) -> DVector<f64> {
        self.pose.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        Some(self.residuals_at(&self.pose))
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let columns: Vec<usize> = (0..N_POSE).collect();
        Some(central_difference(&self.pose, &columns, |x| {
            self.residuals_at(x)
        }))
    }
}

pub(crate) fn refine_pose(
    camera: CameraParams,
    obs: &BoardObservation,
    rvec: Vector3<f64>,
    tvec: Vector3<f64>,
    max_iters: usize,
) -> (Vector3<f64>, Vector3<f64>, f64) {
    let problem = PoseProblem {
        camera,
        obs,
        pose: DVector::from_iterator(N_POSE, rvec.iter().chain(tvec.iter()).copied()),
    };
    let (problem, report) = solver(max_iters).minimize(problem);
    let (r, t) = pose_at(&problem.pose, 0);
    (r, t, rms_from_cost(report.objective_function, obs.corner_count()))
}

/// `cost = 0.5 * sum |r_i|^2` over 2D residuals -> per-point RMS in pixels.
fn rms_from_cost(cost: f64, n_points: usize) -> f64 {
    if n_points == 0 {
        return 0.0;
    }
    (2.0 * cost / n_points as f64).sqrt()
}
