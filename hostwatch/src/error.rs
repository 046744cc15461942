//! Error types for the hostwatch sampler.

use std::path::PathBuf;

use thiserror::Error;

/// The main error type for all hostwatch operations.
///
/// Provider and sink failures are normally contained by the sampler and never
/// reach the host. They are still part of this enum so that callers driving a
/// sink or provider directly can use `?` throughout.
#[derive(Error, Debug)]
pub enum HostwatchError {
    /// Invalid configuration detected at construction time.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A metric provider could not produce a reading.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// A sink failed to persist or echo a sample.
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    /// An invalid start/stop transition was requested.
    #[error("lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),
}

/// Errors raised while validating or loading configuration.
///
/// These are the only errors that prevent the sampling loop from starting.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The sampling interval is zero, negative, or not finite.
    #[error("invalid sampling interval: {reason}")]
    InvalidInterval {
        /// Why the interval was rejected.
        reason: String,
    },

    /// The rotation size threshold is zero.
    #[error("invalid size threshold: {bytes} bytes (must be > 0)")]
    InvalidSizeThreshold {
        /// The rejected threshold.
        bytes: u64,
    },

    /// The backup retention count is zero.
    #[error("invalid max_backups: {count} (must be >= 1)")]
    InvalidMaxBackups {
        /// The rejected count.
        count: u32,
    },

    /// The log path cannot be used for the active log file.
    #[error("invalid log path '{}': {reason}", path.display())]
    InvalidLogPath {
        /// The rejected path.
        path: PathBuf,
        /// Why the path was rejected.
        reason: String,
    },

    /// The configuration file could not be read.
    #[error("failed to read config file '{}': {source}", path.display())]
    Load {
        /// The config file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON for [`crate::MonitorConfig`].
    #[error("failed to parse config file '{}': {source}", path.display())]
    Parse {
        /// The config file path.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

/// Errors a metric provider reports for a single read.
///
/// The sampler turns every one of these into an `unavailable` marker.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// The provider's source file could not be read.
    #[error("failed to read '{}': {source}", path.display())]
    Io {
        /// The file that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The provider's source file had unexpected contents.
    #[error("failed to parse '{}': {reason}", path.display())]
    Parse {
        /// The file that could not be parsed.
        path: PathBuf,
        /// Description of what was malformed.
        reason: String,
    },

    /// The resource does not exist on this host.
    #[error("unavailable: {reason}")]
    Unavailable {
        /// Why the reading is unavailable.
        reason: String,
    },
}

/// Errors a sink reports when it fails to handle a sample.
#[derive(Error, Debug)]
pub enum SinkError {
    /// Writing to the output failed.
    #[error("failed to write to {target}: {source}")]
    Io {
        /// The output that failed, e.g. a log path or `stdout`.
        target: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Retiring the active log file into a backup generation failed.
    #[error("failed to rotate log '{}': {source}", path.display())]
    Rotation {
        /// The active log path being rotated.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised by invalid monitor lifecycle transitions.
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// `start()` was called on a monitor that is already running.
    #[error("monitor is already running")]
    AlreadyStarted,

    /// `start()` was called on a monitor that has been stopped.
    #[error("monitor has been stopped and cannot be restarted")]
    Stopped,

    /// The sampling thread could not be spawned.
    #[error("failed to spawn sampling thread: {source}")]
    SpawnFailed {
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Type alias for `Result<T, HostwatchError>`.
pub type Result<T> = std::result::Result<T, HostwatchError>;
