//! Capture-source selection.

use std::fmt;

/// Environment variable overriding the capture source.
pub const CAMERA_SOURCE_ENV: &str = "CAMERA_SOURCE";

/// Where frames come from: a device index or a device/file path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CaptureSource {
    Index(u32),
    Path(String),
}

impl CaptureSource {
    /// Resolve from [`CAMERA_SOURCE_ENV`], falling back to [`Self::os_default`].
    pub fn from_env() -> Self {
        let value = std::env::var(CAMERA_SOURCE_ENV).ok();
        Self::from_value(value.as_deref())
    }

    /// Interpret a configuration value. Integers select a device index,
    /// anything else is a path; missing or blank values use the OS default.
    pub fn from_value(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if !v.is_empty() => match v.parse::<u32>() {
                Ok(index) => Self::Index(index),
                Err(_) => Self::Path(v.to_string()),
            },
            _ => Self::os_default(),
        }
    }

    /// Device index 0 on Windows and macOS, `/dev/video0` elsewhere.
    pub fn os_default() -> Self {
        if cfg!(any(target_os = "windows", target_os = "macos")) {
            Self::Index(0)
        } else {
            Self::Path("/dev/video0".to_string())
        }
    }
}

impl fmt::Display for CaptureSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(index) => write!(f, "device #{index}"),
            Self::Path(path) => f.write_str(path),
        }
    }
}
