//! Daemon configuration.
//!
//! Values come from `/etc/rollcall/config.toml` (override the path with
//! `ROLLCALL_CONFIG`) with `ROLLCALL_*` environment variables applied on
//! top. Every field has a default, so the daemon runs with no file at all.
//!
//! The face match cutoff is deliberately not here; it is calibrated to the
//! shipped models and lives in [`rollcall_core::MATCH_THRESHOLD`].

use rollcall_core::FacePolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_CONFIG_PATH: &str = "/etc/rollcall/config.toml";
const DEFAULT_CAMERA_DEVICE: &str = "/dev/video0";
const DEFAULT_MODEL_DIR: &str = "/usr/share/rollcall/models";
const DEFAULT_GEOLOCATION_URL: &str = "https://ipapi.co/json/";
const DEFAULT_NETWORK_TIMEOUT_SECS: u64 = 10;

const DETECTOR_MODEL_FILE: &str = "ulfd_rfb_320.onnx";
const EMBEDDER_MODEL_FILE: &str = "face_rec_r34.onnx";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("unknown face_policy {0:?} (expected \"first\" or \"reject-ambiguous\")")]
    UnknownFacePolicy(String),
}

/// On-disk configuration shape. Every field optional.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    camera_device: Option<String>,
    model_dir: Option<PathBuf>,
    db_path: Option<PathBuf>,
    network_timeout_secs: Option<u64>,
    geolocation_url: Option<String>,
    face_policy: Option<String>,
    session_bus: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub camera_device: String,
    pub model_dir: PathBuf,
    pub db_path: PathBuf,
    pub network_timeout_secs: u64,
    pub geolocation_url: String,
    pub face_policy: FacePolicy,
    /// Serve on the session bus instead of the system bus (development).
    pub session_bus: bool,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("ROLLCALL_CONFIG")
            .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let file = if Path::new(&path).exists() {
            read_file(&path)?
        } else {
            FileConfig::default()
        };
        let config = Self::from_sources(file)?;
        tracing::debug!(
            camera = %config.camera_device,
            model_dir = %config.model_dir.display(),
            db = %config.db_path.display(),
            "configuration loaded"
        );
        Ok(config)
    }

    fn from_sources(file: FileConfig) -> Result<Self, ConfigError> {
        let camera_device = env_string("ROLLCALL_CAMERA_DEVICE")
            .or(file.camera_device)
            .unwrap_or_else(|| DEFAULT_CAMERA_DEVICE.to_string());

        let model_dir = env_path("ROLLCALL_MODEL_DIR")
            .or(file.model_dir)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_DIR));

        let db_path = env_path("ROLLCALL_DB_PATH")
            .or(file.db_path)
            .unwrap_or_else(|| default_data_dir().join("rollcall.db"));

        let network_timeout_secs = env_u64("ROLLCALL_NETWORK_TIMEOUT_SECS")
            .or(file.network_timeout_secs)
            .unwrap_or(DEFAULT_NETWORK_TIMEOUT_SECS);

        let geolocation_url = env_string("ROLLCALL_GEOLOCATION_URL")
            .or(file.geolocation_url)
            .unwrap_or_else(|| DEFAULT_GEOLOCATION_URL.to_string());

        let face_policy = match env_string("ROLLCALL_FACE_POLICY").or(file.face_policy) {
            Some(value) => parse_face_policy(&value)?,
            None => FacePolicy::default(),
        };

        let session_bus = env_bool("ROLLCALL_SESSION_BUS")
            .or(file.session_bus)
            .unwrap_or(false);

        Ok(Self {
            camera_device,
            model_dir,
            db_path,
            network_timeout_secs,
            geolocation_url,
            face_policy,
            session_bus,
        })
    }

    pub fn detector_model_path(&self) -> PathBuf {
        self.model_dir.join(DETECTOR_MODEL_FILE)
    }

    pub fn embedder_model_path(&self) -> PathBuf {
        self.model_dir.join(EMBEDDER_MODEL_FILE)
    }

    pub fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.network_timeout_secs)
    }
}

fn read_file(path: &str) -> Result<FileConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_string(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_string(),
        source,
    })
}

fn parse_face_policy(value: &str) -> Result<FacePolicy, ConfigError> {
    match value {
        "first" => Ok(FacePolicy::FirstDetection),
        "reject-ambiguous" => Ok(FacePolicy::RejectAmbiguous),
        other => Err(ConfigError::UnknownFacePolicy(other.to_string())),
    }
}

fn default_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(dir).join("rollcall");
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local/share/rollcall");
    }
    PathBuf::from("/var/lib/rollcall")
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_path(name: &str) -> Option<PathBuf> {
    env_string(name).map(PathBuf::from)
}

fn env_u64(name: &str) -> Option<u64> {
    env_string(name).and_then(|v| v.parse().ok())
}

fn env_bool(name: &str) -> Option<bool> {
    env_string(name).map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
}
