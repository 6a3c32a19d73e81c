//! Pipeline configuration, loaded from and written to JSON.

use crate::PersistError;
use planar_measure_core::{BoardSpec, BoardSpecError, ImageSize};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Which image the user picks measurement points on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PickSpace {
    /// Raw camera frame; picks are undistorted before ray casting.
    #[default]
    Distorted,
    /// Frame that was already undistorted; picks are used as-is.
    Rectified,
}

fn default_min_corners() -> usize {
    4
}

fn default_min_observations() -> usize {
    8
}

fn default_high_rms_threshold() -> f64 {
    1.0
}

fn default_parallel_epsilon() -> f64 {
    1e-9
}

fn default_intrinsics_path() -> String {
    "camera_calibration.json".to_string()
}

fn default_extrinsics_path() -> String {
    "camera_extrinsics.json".to_string()
}

fn default_capture_width() -> u32 {
    1280
}

fn default_capture_height() -> u32 {
    960
}

/// Immutable settings threaded through the accumulator, solvers and workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationConfig {
    #[serde(default)]
    pub board: BoardSpec,
    /// Observations with fewer corners are rejected.
    #[serde(default = "default_min_corners")]
    pub min_corners: usize,
    /// Observations needed before an intrinsic solve is attempted.
    #[serde(default = "default_min_observations")]
    pub min_observations: usize,
    /// Reject intrinsic fits whose RMS reprojection error exceeds this.
    #[serde(default)]
    pub rms_ceiling: Option<f64>,
    /// Fits above this RMS are accepted but flagged as high error.
    #[serde(default = "default_high_rms_threshold")]
    pub high_rms_threshold: f64,
    /// `|ray . normal|` below this fails with `ParallelRay`.
    #[serde(default = "default_parallel_epsilon")]
    pub parallel_epsilon: f64,
    #[serde(default)]
    pub pick_space: PickSpace,
    #[serde(default = "default_intrinsics_path")]
    pub intrinsics_path: String,
    #[serde(default = "default_extrinsics_path")]
    pub extrinsics_path: String,
    /// Requested capture resolution (a hint for the capture collaborator).
    #[serde(default = "default_capture_width")]
    pub capture_width: u32,
    #[serde(default = "default_capture_height")]
    pub capture_height: u32,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            board: BoardSpec::default(),
            min_corners: default_min_corners(),
            min_observations: default_min_observations(),
            rms_ceiling: None,
            high_rms_threshold: default_high_rms_threshold(),
            parallel_epsilon: default_parallel_epsilon(),
            pick_space: PickSpace::default(),
            intrinsics_path: default_intrinsics_path(),
            extrinsics_path: default_extrinsics_path(),
            capture_width: default_capture_width(),
            capture_height: default_capture_height(),
        }
    }
}

impl CalibrationConfig {
    /// Load a JSON config from disk. Missing fields take their defaults.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate().map_err(|err| PersistError::Invalid {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
        Ok(config)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), BoardSpecError> {
        self.board.validate()
    }

    pub fn intrinsics_path(&self) -> PathBuf {
        PathBuf::from(&self.intrinsics_path)
    }

    pub fn extrinsics_path(&self) -> PathBuf {
        PathBuf::from(&self.extrinsics_path)
    }

    pub fn capture_size(&self) -> ImageSize {
        ImageSize::new(self.capture_width, self.capture_height)
    }
}
