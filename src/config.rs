use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File layer loaded from an optional TOML config (`--config`).
///
/// Every table and field is optional; anything missing keeps the built-in default.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    pub watchdog: WatchdogConfig,
    pub streams: StreamsConfig,
    pub restart: RestartConfig,
    pub shutdown: ShutdownConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub tick_interval_secs: u64,
    pub max_silent_ticks: u32,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StreamsConfig {
    pub forward_stdout: bool,
    pub forward_stderr: bool,
    pub forward_stdin: bool,
    pub relay_buffer_size: usize,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct RestartConfig {
    pub auto_restart: bool,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    pub termination_grace_secs: u64,
}

// --- Default implementations ---

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 30,
            max_silent_ticks: 1,
        }
    }
}

impl Default for StreamsConfig {
    fn default() -> Self {
        Self {
            forward_stdout: true,
            forward_stderr: true,
            forward_stdin: true,
            relay_buffer_size: 1024,
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            termination_grace_secs: 10,
        }
    }
}

/// Command-line values that take precedence over the file layer.
///
/// `None` means "not given on the command line".
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub forward_stdout: Option<bool>,
    pub forward_stderr: Option<bool>,
    pub forward_stdin: Option<bool>,
    pub relay_buffer_size: Option<usize>,
    pub auto_restart: bool,
    pub tick_interval_secs: Option<u64>,
    pub max_silent_ticks: Option<u32>,
    pub termination_grace_secs: Option<u64>,
}

/// Longest accepted tick interval and grace period (one day).
pub const MAX_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// Largest accepted relay read buffer (1 MiB).
pub const MAX_RELAY_BUFFER_SIZE: usize = 1024 * 1024;

/// Resolved, validated supervision settings. Set once at startup, read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisionConfig {
    pub forward_stdout: bool,
    pub forward_stderr: bool,
    pub relay_buffer_size: usize,
    pub forward_stdin: bool,
    pub auto_restart: bool,
    pub tick_interval: Duration,
    pub max_silent_ticks: u32,
    pub termination_grace: Duration,
}

impl Default for SupervisionConfig {
    fn default() -> Self {
        // Validation cannot fail on the built-in defaults.
        Self::from_file_config(FileConfig::default())
    }
}

impl SupervisionConfig {
    fn from_file_config(file: FileConfig) -> Self {
        Self {
            forward_stdout: file.streams.forward_stdout,
            forward_stderr: file.streams.forward_stderr,
            relay_buffer_size: file.streams.relay_buffer_size,
            forward_stdin: file.streams.forward_stdin,
            auto_restart: file.restart.auto_restart,
            tick_interval: Duration::from_secs(file.watchdog.tick_interval_secs),
            max_silent_ticks: file.watchdog.max_silent_ticks,
            termination_grace: Duration::from_secs(file.shutdown.termination_grace_secs),
        }
    }

    /// Merge the file layer with command-line overrides and validate the result.
    pub fn resolve(file: FileConfig, overrides: &Overrides) -> Result<Self, ConfigError> {
        let mut config = Self::from_file_config(file);

        if let Some(v) = overrides.forward_stdout {
            config.forward_stdout = v;
        }
        if let Some(v) = overrides.forward_stderr {
            config.forward_stderr = v;
        }
        if let Some(v) = overrides.forward_stdin {
            config.forward_stdin = v;
        }
        if let Some(v) = overrides.relay_buffer_size {
            config.relay_buffer_size = v;
        }
        // A flag can only switch restarting on; the file may already have done so.
        config.auto_restart |= overrides.auto_restart;
        if let Some(v) = overrides.tick_interval_secs {
            config.tick_interval = Duration::from_secs(v);
        }
        if let Some(v) = overrides.max_silent_ticks {
            config.max_silent_ticks = v;
        }
        if let Some(v) = overrides.termination_grace_secs {
            config.termination_grace = Duration::from_secs(v);
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "tick interval must be greater than zero".to_string(),
            ));
        }
        if self.tick_interval > Duration::from_secs(MAX_INTERVAL_SECS) {
            return Err(ConfigError::Invalid(format!(
                "tick interval must be at most {MAX_INTERVAL_SECS} seconds"
            )));
        }
        if self.termination_grace > Duration::from_secs(MAX_INTERVAL_SECS) {
            return Err(ConfigError::Invalid(format!(
                "termination grace must be at most {MAX_INTERVAL_SECS} seconds"
            )));
        }
        if self.relay_buffer_size == 0 {
            return Err(ConfigError::Invalid(
                "relay buffer size must be greater than zero".to_string(),
            ));
        }
        if self.relay_buffer_size > MAX_RELAY_BUFFER_SIZE {
            return Err(ConfigError::Invalid(format!(
                "relay buffer size must be at most {MAX_RELAY_BUFFER_SIZE} bytes"
            )));
        }
        Ok(())
    }
}

/// Errors that can occur while loading or validating configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// The config file could not be read.
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The config file is not valid TOML for the expected schema.
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    /// A resolved value is out of range.
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {}", path.display(), source)
            }
            ConfigError::Invalid(msg) => write!(f, "invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Invalid(_) => None,
        }
    }
}

/// Load the file layer. With no path, the built-in defaults are used.
///
/// An explicitly named file that can't be read or parsed is an error rather
/// than a silent fallback to defaults.
pub fn load_file_config(path: Option<&Path>) -> Result<FileConfig, ConfigError> {
    let Some(path) = path else {
        return Ok(FileConfig::default());
    };
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    toml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = SupervisionConfig::default();
        assert!(config.forward_stdout);
        assert!(config.forward_stderr);
        assert!(config.forward_stdin);
        assert!(!config.auto_restart);
        assert_eq!(config.relay_buffer_size, 1024);
        assert_eq!(config.tick_interval, Duration::from_secs(30));
        assert_eq!(config.max_silent_ticks, 1);
        assert_eq!(config.termination_grace, Duration::from_secs(10));
    }

    #[test]
    fn test_no_path_uses_defaults() {
        let file = load_file_config(None).unwrap();
        let config = SupervisionConfig::resolve(file, &Overrides::default()).unwrap();
        assert_eq!(config, SupervisionConfig::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frostwatch.toml");
        std::fs::write(
            &path,
            "[watchdog]\ntick_interval_secs = 5\n\n[restart]\nauto_restart = true\n",
        )
        .unwrap();

        let file = load_file_config(Some(&path)).unwrap();
        let config = SupervisionConfig::resolve(file, &Overrides::default()).unwrap();
        assert_eq!(config.tick_interval, Duration::from_secs(5));
        assert_eq!(config.max_silent_ticks, 1);
        assert!(config.auto_restart);
        assert!(config.forward_stdout);
    }

    #[test]
    fn test_cli_overrides_win_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frostwatch.toml");
        std::fs::write(
            &path,
            "[watchdog]\ntick_interval_secs = 5\nmax_silent_ticks = 4\n\n[streams]\nforward_stdout = false\n",
        )
        .unwrap();

        let overrides = Overrides {
            tick_interval_secs: Some(2),
            forward_stdout: Some(true),
            forward_stderr: Some(false),
            ..Default::default()
        };
        let file = load_file_config(Some(&path)).unwrap();
        let config = SupervisionConfig::resolve(file, &overrides).unwrap();
        assert_eq!(config.tick_interval, Duration::from_secs(2));
        assert_eq!(config.max_silent_ticks, 4);
        assert!(config.forward_stdout);
        assert!(!config.forward_stderr);
    }

    #[test]
    fn test_zero_max_silent_ticks_is_allowed() {
        let overrides = Overrides {
            max_silent_ticks: Some(0),
            ..Default::default()
        };
        let config = SupervisionConfig::resolve(FileConfig::default(), &overrides).unwrap();
        assert_eq!(config.max_silent_ticks, 0);
    }

    #[test]
    fn test_zero_tick_interval_rejected() {
        let overrides = Overrides {
            tick_interval_secs: Some(0),
            ..Default::default()
        };
        let err = SupervisionConfig::resolve(FileConfig::default(), &overrides).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains("tick interval"));
    }

    #[test]
    fn test_zero_buffer_size_rejected() {
        let overrides = Overrides {
            relay_buffer_size: Some(0),
            ..Default::default()
        };
        let err = SupervisionConfig::resolve(FileConfig::default(), &overrides).unwrap_err();
        assert!(err.to_string().contains("buffer size"));
    }

    #[test]
    fn test_huge_tick_interval_rejected() {
        let overrides = Overrides {
            tick_interval_secs: Some(u64::MAX),
            ..Default::default()
        };
        let err = SupervisionConfig::resolve(FileConfig::default(), &overrides).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains("tick interval must be at most"));
    }

    #[test]
    fn test_huge_tick_interval_in_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frostwatch.toml");
        std::fs::write(
            &path,
            "[watchdog]\ntick_interval_secs = 9223372036854775807\n",
        )
        .unwrap();

        let file = load_file_config(Some(&path)).unwrap();
        let err = SupervisionConfig::resolve(file, &Overrides::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_limits_are_inclusive() {
        let overrides = Overrides {
            tick_interval_secs: Some(MAX_INTERVAL_SECS),
            termination_grace_secs: Some(MAX_INTERVAL_SECS),
            relay_buffer_size: Some(MAX_RELAY_BUFFER_SIZE),
            ..Default::default()
        };
        let config = SupervisionConfig::resolve(FileConfig::default(), &overrides).unwrap();
        assert_eq!(config.tick_interval, Duration::from_secs(MAX_INTERVAL_SECS));
        assert_eq!(config.relay_buffer_size, MAX_RELAY_BUFFER_SIZE);
    }

    #[test]
    fn test_huge_grace_rejected() {
        let overrides = Overrides {
            termination_grace_secs: Some(u64::MAX),
            ..Default::default()
        };
        let err = SupervisionConfig::resolve(FileConfig::default(), &overrides).unwrap_err();
        assert!(err.to_string().contains("termination grace"));
    }

    #[test]
    fn test_huge_buffer_size_rejected() {
        let overrides = Overrides {
            relay_buffer_size: Some(usize::MAX),
            ..Default::default()
        };
        let err = SupervisionConfig::resolve(FileConfig::default(), &overrides).unwrap_err();
        assert!(err.to_string().contains("buffer size must be at most"));
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let err = load_file_config(Some(Path::new("/nonexistent/frostwatch.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[watchdog]\ntick_interval_secs = \"soon\"\n").unwrap();

        let err = load_file_config(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("bad.toml"));
    }
}
