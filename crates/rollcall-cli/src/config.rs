use rollcall_core::roster::RosterSelector;
use rollcall_core::{DEFAULT_DOWNSAMPLE, DEFAULT_MATCH_THRESHOLD, DETECTOR_MODEL, RECOGNIZER_MODEL};
use rollcall_hw::DEFAULT_FRAME_TIMEOUT;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming an optional TOML config file.
pub const CONFIG_ENV: &str = "ROLLCALL_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid value {value:?} for {key}")]
    InvalidEnv { key: String, value: String },
    #[error("match threshold must be finite and positive, got {0}")]
    InvalidThreshold(f32),
    #[error("session duration must be at least one second")]
    ZeroDuration,
    #[error("frame timeout must be at least one millisecond")]
    ZeroFrameTimeout,
    #[error("downsample factor must be in (0, 1], got {0}")]
    InvalidDownsample(f32),
    #[error("{0} is not set (config file, ROLLCALL_{1}, or --{2})")]
    Missing(&'static str, &'static str, &'static str),
}

/// Session configuration: defaults, then the TOML file named by
/// `ROLLCALL_CONFIG`, then `ROLLCALL_*` variables, then command-line flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// V4L2 device path.
    pub camera_device: String,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// SQLite database holding classes, students and attendance.
    pub db_path: PathBuf,
    /// Maximum Euclidean embedding distance accepted as a match.
    pub match_threshold: f32,
    pub session_secs: u64,
    /// Linear downsampling applied before face search.
    pub downsample: f32,
    /// Frames discarded after the stream starts (auto-exposure settling).
    pub warmup_frames: usize,
    /// Longest wait for one camera buffer; a stalled device counts as a
    /// missed frame and the loop keeps checking its deadline.
    pub frame_timeout_ms: u64,
    pub class_name: Option<String>,
    pub class_year: Option<String>,
    pub course: Option<String>,
    pub report_dir: PathBuf,
    /// Write the latest annotated frame here while the session runs.
    pub snapshot_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_device: "/dev/video0".to_string(),
            model_dir: rollcall_core::default_model_dir(),
            db_path: rollcall_core::data_dir().join("rollcall.db"),
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            session_secs: 10,
            downsample: DEFAULT_DOWNSAMPLE,
            warmup_frames: 4,
            frame_timeout_ms: DEFAULT_FRAME_TIMEOUT.as_millis() as u64,
            class_name: None,
            class_year: None,
            course: None,
            report_dir: PathBuf::from("."),
            snapshot_path: None,
        }
    }
}

impl Config {
    /// Load from the process environment. An explicit `file` takes the
    /// place of `ROLLCALL_CONFIG`.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let from_env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        Self::load_with(file.or(from_env.as_deref()), |key| std::env::var(key).ok())
    }

    /// Load from an optional config file and an environment lookup.
    pub fn load_with<F>(file: Option<&Path>, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(env)?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn apply_env<F>(&mut self, env: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = env("ROLLCALL_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = env("ROLLCALL_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = env("ROLLCALL_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = env("ROLLCALL_REPORT_DIR") {
            self.report_dir = PathBuf::from(v);
        }
        if let Some(v) = env("ROLLCALL_SNAPSHOT_PATH") {
            self.snapshot_path = Some(PathBuf::from(v));
        }
        if let Some(v) = env("ROLLCALL_CLASS_NAME") {
            self.class_name = Some(v);
        }
        if let Some(v) = env("ROLLCALL_CLASS_YEAR") {
            self.class_year = Some(v);
        }
        if let Some(v) = env("ROLLCALL_COURSE") {
            self.course = Some(v);
        }
        parse_env(&env, "ROLLCALL_MATCH_THRESHOLD", &mut self.match_threshold)?;
        parse_env(&env, "ROLLCALL_SESSION_SECS", &mut self.session_secs)?;
        parse_env(&env, "ROLLCALL_DOWNSAMPLE", &mut self.downsample)?;
        parse_env(&env, "ROLLCALL_WARMUP_FRAMES", &mut self.warmup_frames)?;
        parse_env(&env, "ROLLCALL_FRAME_TIMEOUT_MS", &mut self.frame_timeout_ms)?;
        Ok(())
    }

    /// Check the numeric settings. Runs before any device is opened.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.match_threshold.is_finite() && self.match_threshold > 0.0) {
            return Err(ConfigError::InvalidThreshold(self.match_threshold));
        }
        if self.session_secs == 0 {
            return Err(ConfigError::ZeroDuration);
        }
        if self.frame_timeout_ms == 0 {
            return Err(ConfigError::ZeroFrameTimeout);
        }
        if !(self.downsample > 0.0 && self.downsample <= 1.0) {
            return Err(ConfigError::InvalidDownsample(self.downsample));
        }
        Ok(())
    }

    pub fn selector(&self) -> Result<RosterSelector, ConfigError> {
        let class = self
            .class_name
            .as_deref()
            .ok_or(ConfigError::Missing("class name", "CLASS_NAME", "class"))?;
        let year = self
            .class_year
            .as_deref()
            .ok_or(ConfigError::Missing("class year", "CLASS_YEAR", "year"))?;
        Ok(RosterSelector::new(class, year))
    }

    pub fn course(&self) -> Result<&str, ConfigError> {
        self.course
            .as_deref()
            .ok_or(ConfigError::Missing("course", "COURSE", "course"))
    }

    pub fn session_duration(&self) -> Duration {
        Duration::from_secs(self.session_secs)
    }

    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> PathBuf {
        self.model_dir.join(DETECTOR_MODEL)
    }

    /// Path to the ArcFace recognition model.
    pub fn recognizer_model_path(&self) -> PathBuf {
        self.model_dir.join(RECOGNIZER_MODEL)
    }
}

fn parse_env<F, T>(env: &F, key: &str, slot: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(value) = env(key) {
        *slot = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
            key: key.to_string(),
            value,
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::load_with(None, env(&[])).unwrap();
        assert_eq!(config.camera_device, "/dev/video0");
        assert_eq!(config.match_threshold, 0.6);
        assert_eq!(config.session_secs, 10);
        assert_eq!(config.downsample, 0.25);
        assert_eq!(config.warmup_frames, 4);
        assert_eq!(config.frame_timeout(), Duration::from_millis(500));
        assert_eq!(config.report_dir, PathBuf::from("."));
        assert!(config.validate().is_ok());
        assert!(config.detector_model_path().ends_with("det_10g.onnx"));
        assert!(config.recognizer_model_path().ends_with("w600k_r50.onnx"));
    }

    #[test]
    fn test_file_then_env_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollcall.toml");
        std::fs::write(
            &path,
            r#"
camera_device = "/dev/video4"
session_secs = 30
class_name = "CS-2"
class_year = "2024"
course = "Compilers"
"#,
        )
        .unwrap();

        let config = Config::load_with(
            Some(&path),
            env(&[
                ("ROLLCALL_SESSION_SECS", "45"),
                ("ROLLCALL_MATCH_THRESHOLD", "0.5"),
                ("ROLLCALL_FRAME_TIMEOUT_MS", "250"),
            ]),
        )
        .unwrap();

        assert_eq!(config.camera_device, "/dev/video4");
        assert_eq!(config.session_secs, 45);
        assert_eq!(config.match_threshold, 0.5);
        assert_eq!(config.frame_timeout(), Duration::from_millis(250));
        // Keys missing from the file keep their defaults.
        assert_eq!(config.downsample, 0.25);
        assert_eq!(config.selector().unwrap(), RosterSelector::new("CS-2", "2024"));
        assert_eq!(config.course().unwrap(), "Compilers");
    }

    #[test]
    fn test_unparsable_env_is_error() {
        let err = Config::load_with(None, env(&[("ROLLCALL_DOWNSAMPLE", "quarter")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { ref key, .. } if key == "ROLLCALL_DOWNSAMPLE"));
    }

    #[test]
    fn test_bad_toml_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "session_secs = \"ten\"").unwrap();
        assert!(matches!(
            Config::load_with(Some(&path), env(&[])),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let base = Config::default();

        let config = Config { match_threshold: 0.0, ..base.clone() };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidThreshold(_))));
        let config = Config { match_threshold: f32::NAN, ..base.clone() };
        assert!(config.validate().is_err());
        let config = Config { session_secs: 0, ..base.clone() };
        assert!(matches!(config.validate(), Err(ConfigError::ZeroDuration)));
        let config = Config { frame_timeout_ms: 0, ..base.clone() };
        assert!(matches!(config.validate(), Err(ConfigError::ZeroFrameTimeout)));
        let config = Config { downsample: 1.5, ..base.clone() };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidDownsample(_))));
        let config = Config { downsample: 0.0, ..base };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_selector() {
        let config = Config {
            class_name: Some("CS-2".into()),
            ..Config::default()
        };
        assert!(matches!(config.selector(), Err(ConfigError::Missing("class year", ..))));
        assert!(config.course().is_err());
    }
}
