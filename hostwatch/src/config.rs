//! Configuration types for the hostwatch sampler.
//!
//! Configuration is produced by the host (command line, JSON file, or code)
//! before the [`Monitor`](crate::Monitor) is constructed. Everything here is
//! validated up front; an invalid value is a [`ConfigError`] and the sampling
//! loop never starts.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Default sampling interval.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Default active log file name.
pub const DEFAULT_LOG_PATH: &str = "system_monitor.log";

/// Default rotation threshold: 5 MiB.
pub const DEFAULT_SIZE_THRESHOLD: u64 = 5 * 1024 * 1024;

/// Default number of retained backup generations.
pub const DEFAULT_MAX_BACKUPS: u32 = 3;

/// Default GPU query command, resolved through `PATH`.
pub const DEFAULT_NVIDIA_SMI: &str = "nvidia-smi";

/// Complete configuration for a [`Monitor`](crate::Monitor).
///
/// Every field has a default, so a JSON config file only needs to name the
/// values it changes:
///
/// ```rust
/// use hostwatch::MonitorConfig;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config: MonitorConfig = serde_json::from_str(
///     r#"{ "interval": 2.5, "rotation": { "max_backups": 5 } }"#,
/// )?;
/// config.validate()?;
/// assert_eq!(config.rotation.max_backups, 5);
/// assert_eq!(config.rotation.size_threshold, 5 * 1024 * 1024);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Time between the start of consecutive ticks.
    #[serde(with = "duration_serde")]
    pub interval: Duration,

    /// Path of the active log file. Backups live next to it as `<path>.N`.
    pub log_path: PathBuf,

    /// Size and retention bounds for the log file.
    pub rotation: RotationPolicy,

    /// How samples are echoed to the terminal.
    pub console: ConsoleMode,

    /// Root of the procfs mount used by the processor and memory providers.
    pub proc_root: PathBuf,

    /// Root of the sysfs mount used by the accelerator provider.
    pub sys_root: PathBuf,

    /// `nvidia-smi` executable queried for GPU load before the sysfs scan.
    /// `null` skips the query.
    pub nvidia_smi: Option<PathBuf>,

    /// Whether start/stop banner lines are written around the samples.
    pub host_banner: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            log_path: PathBuf::from(DEFAULT_LOG_PATH),
            rotation: RotationPolicy::default(),
            console: ConsoleMode::default(),
            proc_root: PathBuf::from("/proc"),
            sys_root: PathBuf::from("/sys"),
            nvidia_smi: Some(PathBuf::from(DEFAULT_NVIDIA_SMI)),
            host_banner: true,
        }
    }
}

impl MonitorConfig {
    /// Loads a configuration from a JSON file and validates it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] if the file cannot be read,
    /// [`ConfigError::Parse`] if it is not a valid config document, or any
    /// validation error from [`MonitorConfig::validate`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|e| ConfigError::Load {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&data).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the interval is zero, the log path does not
    /// name a file, or the rotation policy is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(ConfigError::InvalidInterval {
                reason: "interval cannot be zero".to_string(),
            }
            .into());
        }

        if self.log_path.as_os_str().is_empty() || self.log_path.file_name().is_none() {
            return Err(ConfigError::InvalidLogPath {
                path: self.log_path.clone(),
                reason: "path does not name a file".to_string(),
            }
            .into());
        }

        if self.log_path.is_dir() {
            return Err(ConfigError::InvalidLogPath {
                path: self.log_path.clone(),
                reason: "path is a directory".to_string(),
            }
            .into());
        }

        self.rotation.validate()
    }
}

/// Size-bounded, generation-bounded rotation policy for the log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationPolicy {
    /// Rotate before an append would push the active file past this size.
    pub size_threshold: u64,

    /// Number of backup generations kept; older ones are discarded.
    pub max_backups: u32,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            size_threshold: DEFAULT_SIZE_THRESHOLD,
            max_backups: DEFAULT_MAX_BACKUPS,
        }
    }
}

impl RotationPolicy {
    /// Creates a new rotation policy.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `size_threshold` is zero or `max_backups`
    /// is zero.
    pub fn new(size_threshold: u64, max_backups: u32) -> Result<Self> {
        let policy = Self {
            size_threshold,
            max_backups,
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Validates this policy.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if validation fails.
    pub fn validate(&self) -> Result<()> {
        if self.size_threshold == 0 {
            return Err(ConfigError::InvalidSizeThreshold {
                bytes: self.size_threshold,
            }
            .into());
        }

        if self.max_backups == 0 {
            return Err(ConfigError::InvalidMaxBackups {
                count: self.max_backups,
            }
            .into());
        }

        Ok(())
    }
}

/// Console echo style.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleMode {
    /// Rewrite a single status line in place.
    #[default]
    Live,
    /// Print one line per sample.
    Lines,
    /// No console output.
    Off,
}

mod duration_serde {
    use std::time::Duration;

    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(seconds).map_err(D::Error::custom)
    }
}
