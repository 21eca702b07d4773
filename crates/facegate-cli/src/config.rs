use facegate_core::matcher::{DEFAULT_DOWNSCALE, DEFAULT_TOLERANCE};
use facegate_core::MatchSettings;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Mean-intensity threshold below which a frame counts as black.
const DEFAULT_BLACK_THRESHOLD: f32 = 10.0;

/// Runtime configuration.
///
/// Defaults, overlaid by an optional TOML config file, overlaid by
/// `FACEGATE_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the registration photo tree.
    pub faces_dir: PathBuf,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// V4L2 device path.
    pub camera_device: String,
    /// Maximum embedding distance for a match.
    pub tolerance: f32,
    /// Frame downscale factor applied before detection.
    pub downscale: f32,
    /// Black-frame gate threshold (mean intensity).
    pub black_threshold: f32,
    /// Wall-clock bound on the login search.
    pub login_timeout_secs: u64,
    /// Maximum warm-up captures before giving up on the sensor.
    pub warmup_attempts: usize,
    /// Sleep between warm-up captures.
    pub warmup_settle_ms: u64,
    /// Bounded retries per registration photo when frames come back black.
    pub capture_retries: usize,
    /// Pause between registration shots.
    pub shot_interval_ms: u64,
    /// Sleep after a black frame during login / team recognition.
    pub poll_interval_ms: u64,
}

/// Optional on-disk overrides; any subset of fields may be present.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    faces_dir: Option<PathBuf>,
    model_dir: Option<PathBuf>,
    camera_device: Option<String>,
    tolerance: Option<f32>,
    downscale: Option<f32>,
    black_threshold: Option<f32>,
    login_timeout_secs: Option<u64>,
    warmup_attempts: Option<usize>,
    warmup_settle_ms: Option<u64>,
    capture_retries: Option<usize>,
    shot_interval_ms: Option<u64>,
    poll_interval_ms: Option<u64>,
}

impl Config {
    /// Load configuration: defaults, then the config file (if any), then
    /// `FACEGATE_*` environment variables.
    pub fn load() -> Self {
        let file = read_config_file();
        let data_dir = data_dir();

        Self {
            faces_dir: env_path("FACEGATE_FACES_DIR")
                .or(file.faces_dir)
                .unwrap_or_else(|| data_dir.join("faces")),
            model_dir: env_path("FACEGATE_MODEL_DIR")
                .or(file.model_dir)
                .unwrap_or_else(|| data_dir.join("models")),
            camera_device: std::env::var("FACEGATE_CAMERA_DEVICE")
                .ok()
                .or(file.camera_device)
                .unwrap_or_else(|| "/dev/video0".to_string()),
            tolerance: env_parse("FACEGATE_TOLERANCE")
                .or(file.tolerance)
                .unwrap_or(DEFAULT_TOLERANCE),
            downscale: env_parse("FACEGATE_DOWNSCALE")
                .or(file.downscale)
                .unwrap_or(DEFAULT_DOWNSCALE),
            black_threshold: env_parse("FACEGATE_BLACK_THRESHOLD")
                .or(file.black_threshold)
                .unwrap_or(DEFAULT_BLACK_THRESHOLD),
            login_timeout_secs: env_parse("FACEGATE_LOGIN_TIMEOUT_SECS")
                .or(file.login_timeout_secs)
                .unwrap_or(45),
            warmup_attempts: env_parse("FACEGATE_WARMUP_ATTEMPTS")
                .or(file.warmup_attempts)
                .unwrap_or(15),
            warmup_settle_ms: env_parse("FACEGATE_WARMUP_SETTLE_MS")
                .or(file.warmup_settle_ms)
                .unwrap_or(200),
            capture_retries: env_parse("FACEGATE_CAPTURE_RETRIES")
                .or(file.capture_retries)
                .unwrap_or(10),
            shot_interval_ms: env_parse("FACEGATE_SHOT_INTERVAL_MS")
                .or(file.shot_interval_ms)
                .unwrap_or(1000),
            poll_interval_ms: env_parse("FACEGATE_POLL_INTERVAL_MS")
                .or(file.poll_interval_ms)
                .unwrap_or(300),
        }
    }

    pub fn match_settings(&self) -> MatchSettings {
        MatchSettings {
            tolerance: self.tolerance,
            downscale: self.downscale,
        }
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout_secs)
    }

    pub fn warmup_settle(&self) -> Duration {
        Duration::from_millis(self.warmup_settle_ms)
    }

    pub fn shot_interval(&self) -> Duration {
        Duration::from_millis(self.shot_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// `FACEGATE_CONFIG`, else `$XDG_CONFIG_HOME/facegate/config.toml`.
fn config_file_path() -> PathBuf {
    if let Some(path) = env_path("FACEGATE_CONFIG") {
        return path;
    }
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("facegate/config.toml")
}

fn read_config_file() -> ConfigFile {
    let path = config_file_path();
    let Ok(raw) = std::fs::read_to_string(&path) else {
        return ConfigFile::default();
    };
    match toml::from_str(&raw) {
        Ok(file) => {
            tracing::debug!(path = %path.display(), "loaded config file");
            file
        }
        Err(err) => {
            tracing::warn!(path = %path.display(), %err, "ignoring malformed config file");
            ConfigFile::default()
        }
    }
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
        .join("facegate")
}

fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()))
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key).ok().map(PathBuf::from)
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
