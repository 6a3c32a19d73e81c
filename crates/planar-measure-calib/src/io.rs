//! JSON persistence of intrinsic and extrinsic models.
//!
//! Intrinsics:
//! `{"camera_matrix": [[fx,0,cx],[0,fy,cy],[0,0,1]], "dist_coeffs": [[k1,k2,p1,p2,k3]], "rms": r, "image_size": [w, h]}`
//!
//! Extrinsics: `{"rvec": [rx,ry,rz], "tvec": [tx,ty,tz]}`. A pose file carries no
//! model identity, so loading binds it to the intrinsic model it is used with.

use crate::PersistError;
use log::info;
use nalgebra::{Matrix3, Vector3};
use planar_measure_core::{Distortion, ExtrinsicPose, ImageSize, IntrinsicModel};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// Distortion coefficients, either `[[...]]` (1xN matrix) or `[...]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DistCoeffs {
    Nested(Vec<Vec<f64>>),
    Flat(Vec<f64>),
}

impl DistCoeffs {
    fn flatten(&self) -> Vec<f64> {
        match self {
            Self::Nested(rows) => rows.iter().flatten().copied().collect(),
            Self::Flat(v) => v.clone(),
        }
    }
}

/// On-disk form of an [`IntrinsicModel`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntrinsicsFile {
    pub camera_matrix: [[f64; 3]; 3],
    pub dist_coeffs: DistCoeffs,
    pub rms: f64,
    pub image_size: [u32; 2],
}

impl IntrinsicsFile {
    pub fn from_model(model: &IntrinsicModel) -> Self {
        let k = model.camera_matrix();
        Self {
            camera_matrix: [
                [k[(0, 0)], k[(0, 1)], k[(0, 2)]],
                [k[(1, 0)], k[(1, 1)], k[(1, 2)]],
                [k[(2, 0)], k[(2, 1)], k[(2, 2)]],
            ],
            dist_coeffs: DistCoeffs::Nested(vec![model.distortion().to_vec()]),
            rms: model.rms(),
            image_size: [model.image_size().width, model.image_size().height],
        }
    }

    /// Validate and build a model with a fresh identity.
    pub fn to_model(&self) -> Result<IntrinsicModel, String> {
        let k = Matrix3::from_fn(|r, c| self.camera_matrix[r][c]);
        let coeffs = self.dist_coeffs.flatten();
        let distortion = Distortion::from_slice(&coeffs).ok_or_else(|| {
            format!(
                "expected 4 or 5 distortion coefficients, found {}",
                coeffs.len()
            )
        })?;
        let size = ImageSize::new(self.image_size[0], self.image_size[1]);
        IntrinsicModel::from_camera_matrix(&k, distortion, self.rms, size)
            .map_err(|err| err.to_string())
    }
}

/// On-disk form of an [`ExtrinsicPose`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExtrinsicsFile {
    pub rvec: [f64; 3],
    pub tvec: [f64; 3],
}

impl ExtrinsicsFile {
    pub fn from_pose(pose: &ExtrinsicPose) -> Self {
        let (r, t) = (pose.rvec(), pose.tvec());
        Self {
            rvec: [r.x, r.y, r.z],
            tvec: [t.x, t.y, t.z],
        }
    }

    pub fn to_pose(&self, intrinsics: &IntrinsicModel) -> Result<ExtrinsicPose, String> {
        ExtrinsicPose::new(
            Vector3::from(self.rvec),
            Vector3::from(self.tvec),
            intrinsics,
        )
        .map_err(|err| err.to_string())
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, PersistError> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistError> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json)?;
    Ok(())
}

/// Write `model` as pretty JSON.
pub fn save_intrinsics(model: &IntrinsicModel, path: impl AsRef<Path>) -> Result<(), PersistError> {
    let path = path.as_ref();
    write_json(path, &IntrinsicsFile::from_model(model))?;
    info!("intrinsics saved to {}", path.display());
    Ok(())
}

pub fn load_intrinsics(path: impl AsRef<Path>) -> Result<IntrinsicModel, PersistError> {
    let path = path.as_ref();
    let file: IntrinsicsFile = read_json(path)?;
    let model = file.to_model().map_err(|reason| PersistError::Invalid {
        path: path.to_path_buf(),
        reason,
    })?;
    info!("intrinsics {} loaded from {}", model.id(), path.display());
    Ok(model)
}

pub fn save_extrinsics(pose: &ExtrinsicPose, path: impl AsRef<Path>) -> Result<(), PersistError> {
    let path = path.as_ref();
    write_json(path, &ExtrinsicsFile::from_pose(pose))?;
    info!("extrinsics saved to {}", path.display());
    Ok(())
}

/// Load a pose and bind it to `intrinsics`.
pub fn load_extrinsics(
    path: impl AsRef<Path>,
    intrinsics: &IntrinsicModel,
) -> Result<ExtrinsicPose, PersistError> {
    let path = path.as_ref();
    let file: ExtrinsicsFile = read_json(path)?;
    file.to_pose(intrinsics)
        .map_err(|reason| PersistError::Invalid {
            path: path.to_path_buf(),
            reason,
        })
}
