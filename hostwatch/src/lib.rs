//! # hostwatch
//!
//! Periodic host resource sampler with a size-bounded rotating log.
//!
//! hostwatch samples processor load, memory consumption, and accelerator
//! load on a fixed interval, appends each sample as one line to a log file
//! that rotates at a size bound with a bounded number of backups, and echoes
//! the same data to the console.
//!
//! ## Key Properties
//!
//! - One sample per tick, one log line per sample, in tick order
//! - A failing metric source shows up as `name=unavailable`, never as a gap
//! - A failing sink never stops the loop or the other sinks
//! - The active log never exceeds its size threshold after a write, except
//!   when a single line is itself larger
//! - At most `max_backups` rotated generations are kept
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hostwatch::{Monitor, MonitorConfig, RotationPolicy};
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MonitorConfig {
//!     interval: Duration::from_secs(5),
//!     log_path: "system_monitor.log".into(),
//!     rotation: RotationPolicy::new(5 * 1024 * 1024, 3)?,
//!     ..MonitorConfig::default()
//! };
//!
//! let mut monitor = Monitor::new(config)?;
//! monitor.start()?;
//! // ... until the host decides to shut down
//! monitor.stop();
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`MetricProvider`] — one source per resource kind; returns a reading or a [`ProviderError`]
//! - [`Sampler`] — fixed-interval loop assembling a [`Sample`] per tick and delivering it to sinks
//! - [`RotatingLogSink`] — durable, rotating log file
//! - [`ConsoleSink`] — best-effort terminal echo
//! - [`Monitor`] — composition root exposing `start()`/`stop()`
//!
//! ## Log Format
//!
//! ```text
//! 2024-03-09T14:05:30.000+01:00 cpu_percent=12.35 memory_percent=40.00 memory_used_mib=6553.60 gpu_percent=unavailable
//! ```

pub mod config;
pub mod error;
pub mod host;
pub mod monitor;
pub mod provider;
pub mod rotating;
pub mod sample;
pub mod sampler;
pub mod sink;

// Re-export primary API types at crate root for convenience.
pub use config::{ConsoleMode, MonitorConfig, RotationPolicy};
pub use error::{ConfigError, HostwatchError, LifecycleError, ProviderError, Result, SinkError};
pub use host::HostInfo;
pub use monitor::Monitor;
pub use provider::{AcceleratorLoad, MemoryMeasure, MemoryUsage, MetricProvider, ProcessorLoad};
pub use rotating::{RotatingLogSink, RotationState};
pub use sample::{Measurement, Reading, Sample};
pub use sampler::{LoopControl, Sampler, SamplerState, SamplerStats, StatsSnapshot};
pub use sink::{ConsoleSink, Sink};
