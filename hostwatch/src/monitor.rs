//! Top-level handle wiring providers, sampler, and sinks together.
//!
//! [`Monitor::new`] builds the standard configuration:
//!
//! ```text
//! ProcessorLoad ─┐
//! MemoryUsage    ├─> Sampler ─┬─> RotatingLogSink (durable)
//! MemoryUsage    │            └─> ConsoleSink     (best effort)
//! AcceleratorLoad┘
//! ```
//!
//! The host calls [`Monitor::start`] to spawn the sampling thread and
//! [`Monitor::stop`] to end it. Dropping a running monitor stops it.
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use hostwatch::{Monitor, MonitorConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MonitorConfig {
//!     interval: Duration::from_secs(1),
//!     log_path: "/var/log/hostwatch/host.log".into(),
//!     ..MonitorConfig::default()
//! };
//!
//! let mut monitor = Monitor::new(config)?;
//! monitor.start()?;
//! std::thread::sleep(Duration::from_secs(10));
//! monitor.stop();
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{error, info};

use crate::config::{ConsoleMode, MonitorConfig};
use crate::error::{LifecycleError, Result};
use crate::host::{HostInfo, STOP_BANNER};
use crate::provider::standard_providers;
use crate::rotating::RotatingLogSink;
use crate::sampler::{LoopControl, Sampler, SamplerState, SamplerStats, StatsSnapshot};
use crate::sink::ConsoleSink;

/// Owns the sampling loop's start/stop lifecycle.
#[derive(Debug)]
pub struct Monitor {
    control: Arc<LoopControl>,
    stats: Arc<SamplerStats>,
    /// Present until `start()` moves it onto the sampling thread.
    sampler: Option<Sampler>,
    handle: Option<JoinHandle<()>>,
}

impl Monitor {
    /// Builds a monitor from configuration.
    ///
    /// Opens the active log file immediately, so an unusable path fails here
    /// rather than after `start()`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`](crate::ConfigError) if the configuration is
    /// invalid or the log file cannot be opened.
    pub fn new(config: MonitorConfig) -> Result<Self> {
        config.validate()?;

        let log = RotatingLogSink::open(&config.log_path, config.rotation)?;

        let mut sampler = Sampler::new(config.interval);
        for provider in standard_providers(
            &config.proc_root,
            &config.sys_root,
            config.nvidia_smi.as_deref(),
        ) {
            sampler.register_provider(provider);
        }
        sampler.register_sink(Box::new(log));
        if config.console != ConsoleMode::Off {
            sampler.register_sink(Box::new(ConsoleSink::stdout(config.console)));
        }

        if config.host_banner {
            let host = HostInfo::gather(&config.proc_root);
            sampler = sampler.with_banners(host.start_banner(), STOP_BANNER);
        }

        info!(
            log = %config.log_path.display(),
            size_threshold = config.rotation.size_threshold,
            max_backups = config.rotation.max_backups,
            "monitor configured"
        );
        Ok(Self::from_sampler(sampler))
    }

    /// Wraps an already-assembled sampler.
    pub fn from_sampler(sampler: Sampler) -> Self {
        Self {
            control: Arc::new(LoopControl::new()),
            stats: sampler.stats(),
            sampler: Some(sampler),
            handle: None,
        }
    }

    /// Spawns the sampling thread. `Idle -> Running`.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::AlreadyStarted`] if already running,
    /// [`LifecycleError::Stopped`] once stopped, or
    /// [`LifecycleError::SpawnFailed`] if the thread could not be created.
    pub fn start(&mut self) -> Result<()> {
        self.control.begin()?;

        let Some(sampler) = self.sampler.take() else {
            self.control.finish();
            return Err(LifecycleError::Stopped.into());
        };

        let control = Arc::clone(&self.control);
        let spawned = thread::Builder::new()
            .name("hostwatch-sampler".to_string())
            .spawn(move || sampler.run(&control));

        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                info!("monitor started");
                Ok(())
            }
            Err(e) => {
                self.control.finish();
                Err(LifecycleError::SpawnFailed { source: e }.into())
            }
        }
    }

    /// Stops the loop and waits for the in-flight tick to finish.
    ///
    /// Idempotent: calling it on a stopped (or never started) monitor does
    /// nothing.
    pub fn stop(&mut self) {
        self.control.request_stop();

        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("sampling thread panicked");
                self.control.finish();
            } else {
                info!("monitor stopped");
            }
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SamplerState {
        self.control.state()
    }

    /// Current tick and failure counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.stop();
    }
}
