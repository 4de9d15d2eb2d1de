use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use facegate_core::CameraFacing;
use serde::Deserialize;
use thiserror::Error;

use crate::observation::FaceSelection;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Engine configuration: defaults, then an optional TOML file named by
/// `FACEGATE_CONFIG`, then `FACEGATE_*` environment variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// SCRFD detection model file name, relative to `model_dir`.
    pub detector_model: String,
    /// Embedding model file name, relative to `model_dir`.
    pub embedder_model: String,
    /// Directory holding one embedding record per slot.
    pub data_dir: PathBuf,
    /// Slot used when a command does not name one.
    pub slot: String,
    pub camera_facing: CameraFacing,
    /// Pixels added on every side of the mapped face box.
    pub margin_px: f32,
    pub face_selection: FaceSelection,
    /// Observations older than this count as "no face" at capture time.
    pub observation_max_age_ms: u64,
    /// Maximum number of live frame buffers.
    pub frame_pool_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            model_dir: data_dir.join("models"),
            detector_model: "det_500m.onnx".to_string(),
            embedder_model: "facenet.onnx".to_string(),
            data_dir,
            slot: "face_data.dat".to_string(),
            camera_facing: CameraFacing::Back,
            margin_px: 0.0,
            face_selection: FaceSelection::FirstReported,
            observation_max_age_ms: 1000,
            frame_pool_size: 4,
        }
    }
}

impl Config {
    /// Load configuration from the environment (and the file it points at).
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("FACEGATE_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a TOML file; fields it leaves out keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "config file loaded");
        Ok(config)
    }

    /// Overlay `FACEGATE_*` variables. Unparseable values are logged and ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("FACEGATE_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("FACEGATE_DETECTOR_MODEL") {
            self.detector_model = v;
        }
        if let Some(v) = lookup("FACEGATE_EMBEDDER_MODEL") {
            self.embedder_model = v;
        }
        if let Some(v) = lookup("FACEGATE_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("FACEGATE_SLOT") {
            self.slot = v;
        }
        env_parse(&lookup, "FACEGATE_CAMERA_FACING", &mut self.camera_facing);
        env_parse(&lookup, "FACEGATE_MARGIN_PX", &mut self.margin_px);
        env_parse(&lookup, "FACEGATE_FACE_SELECTION", &mut self.face_selection);
        env_parse(
            &lookup,
            "FACEGATE_OBSERVATION_MAX_AGE_MS",
            &mut self.observation_max_age_ms,
        );
        env_parse(&lookup, "FACEGATE_FRAME_POOL_SIZE", &mut self.frame_pool_size);
    }

    pub fn detector_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.detector_model)
    }

    pub fn embedder_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.embedder_model)
    }

    pub fn observation_max_age(&self) -> Duration {
        Duration::from_millis(self.observation_max_age_ms)
    }
}

/// `$XDG_DATA_HOME/facegate`, falling back to `~/.local/share/facegate`.
pub fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facegate")
}

fn env_parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.parse() {
        Ok(v) => *slot = v,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable environment value"),
    }
}
