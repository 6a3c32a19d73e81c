#![allow(dead_code)]

use nalgebra::{Matrix3, Point2, Point3, Vector2, Vector3};
use planar_measure_core::{
    BoardObservation, Correspondence, Distortion, ImageSize, IntrinsicFit, IntrinsicModel,
    PoseFit, VisionError, VisionPrimitives,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Barrier;

pub const SIZE: ImageSize = ImageSize {
    width: 1000,
    height: 1000,
};

/// fx = fy = 1000, principal point at the image center, ideal lens.
pub fn ideal_camera() -> IntrinsicModel {
    IntrinsicModel::new(1000.0, 1000.0, 500.0, 500.0, Distortion::zero(), 0.1, SIZE)
        .expect("camera")
}

/// Observation with `n` corners on a small grid; geometry is irrelevant for mocks.
pub fn observation(n: usize) -> BoardObservation {
    let corrs = (0..n)
        .map(|i| {
            let (c, r) = ((i % 4) as f64, (i / 4) as f64);
            Correspondence::new(
                Point2::new(100.0 + 20.0 * c, 100.0 + 20.0 * r),
                Point3::new(0.01 * c, 0.01 * r, 0.0),
            )
            .with_id(i as u32)
        })
        .collect();
    BoardObservation::new(corrs, SIZE, 4)
}

/// Vision provider returning canned results and counting calls.
pub struct ScriptedVision {
    pub fit: Result<IntrinsicFit, VisionError>,
    pub pose: Result<PoseFit, VisionError>,
    pub fit_calls: AtomicUsize,
    pub pose_calls: AtomicUsize,
    /// If set, `fit_intrinsics` waits here before returning.
    pub gate: Option<Barrier>,
    /// `fit_intrinsics` panics (after the gate) when set.
    pub panic_on_fit: bool,
    /// Added to every undistorted pixel.
    pub undistort_shift: Vector2<f64>,
}

impl Default for ScriptedVision {
    fn default() -> Self {
        Self {
            fit: Ok(IntrinsicFit {
                camera_matrix: Matrix3::new(1000.0, 0.0, 500.0, 0.0, 1000.0, 500.0, 0.0, 0.0, 1.0),
                distortion: Distortion::zero(),
                rms: 0.2,
            }),
            pose: Ok(PoseFit {
                rvec: Vector3::zeros(),
                tvec: Vector3::new(0.0, 0.0, 1.0),
            }),
            fit_calls: AtomicUsize::new(0),
            pose_calls: AtomicUsize::new(0),
            gate: None,
            panic_on_fit: false,
            undistort_shift: Vector2::zeros(),
        }
    }
}

impl ScriptedVision {
    pub fn fit_calls(&self) -> usize {
        self.fit_calls.load(Ordering::SeqCst)
    }

    pub fn pose_calls(&self) -> usize {
        self.pose_calls.load(Ordering::SeqCst)
    }
}

impl VisionPrimitives for ScriptedVision {
    type Frame = BoardObservation;

    fn detect_board(&self, frame: &BoardObservation) -> Option<BoardObservation> {
        (frame.corner_count() > 0).then(|| frame.clone())
    }

    fn fit_intrinsics(
        &self,
        _observations: &[BoardObservation],
        _image_size: ImageSize,
    ) -> Result<IntrinsicFit, VisionError> {
        self.fit_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.wait();
        }
        assert!(!self.panic_on_fit, "scripted solver crash");
        self.fit.clone()
    }

    fn solve_pose(
        &self,
        _observation: &BoardObservation,
        _intrinsics: &IntrinsicModel,
    ) -> Result<PoseFit, VisionError> {
        self.pose_calls.fetch_add(1, Ordering::SeqCst);
        self.pose.clone()
    }

    fn undistort_point(&self, pixel: Point2<f64>, intrinsics: &IntrinsicModel) -> Point2<f64> {
        intrinsics.undistort_pixel(pixel) + self.undistort_shift
    }
}
