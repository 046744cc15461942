//! Fixed-interval sampling loop.
//!
//! # Design
//!
//! The sampler owns its providers and sinks and drives them from a single
//! thread. Each tick:
//!
//! 1. reads every provider in registration order, substituting an
//!    `unavailable` marker for any that fail
//! 2. assembles one [`Sample`] with the tick's wall-clock timestamp
//! 3. hands the sample to every sink in registration order, isolating each
//!    sink's failure from the others and from the next tick
//!
//! Failures are reported through `tracing` and counted in [`SamplerStats`];
//! they never end the loop. Only [`LoopControl::request_stop`] does.
//!
//! Tick boundaries use the monotonic clock. The next tick is due one full
//! interval after the previous tick completed, so a slow tick delays the
//! schedule instead of producing a catch-up burst. An interval too large to
//! be represented as a deadline means the loop ticks once and then sleeps
//! until stopped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::Local;
use tracing::{debug, info, warn};

use crate::error::LifecycleError;
use crate::provider::MetricProvider;
use crate::sample::{Reading, Sample};
use crate::sink::Sink;

/// Lifecycle of a sampling loop.
///
/// `Idle -> Running -> Stopping -> Stopped`. A loop that was never started
/// goes straight from `Idle` to `Stopped` when stopped. No transition leaves
/// `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerState {
    /// Constructed, not yet started.
    Idle,
    /// Ticking.
    Running,
    /// Stop requested; finishing the in-flight tick.
    Stopping,
    /// Loop exited.
    Stopped,
}

/// Shared start/stop signal between the host and the sampling thread.
///
/// The inter-tick sleep is the only place the loop waits, and it wakes as
/// soon as a stop is requested.
#[derive(Debug)]
pub struct LoopControl {
    state: Mutex<SamplerState>,
    wake: Condvar,
}

impl Default for LoopControl {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopControl {
    /// Creates a control in the `Idle` state.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SamplerState::Idle),
            wake: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SamplerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state.
    pub fn state(&self) -> SamplerState {
        *self.lock()
    }

    /// Transitions `Idle -> Running`.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::AlreadyStarted`] if the loop is running or
    /// stopping, and [`LifecycleError::Stopped`] if it has stopped.
    pub fn begin(&self) -> Result<(), LifecycleError> {
        let mut state = self.lock();
        match *state {
            SamplerState::Idle => {
                *state = SamplerState::Running;
                Ok(())
            }
            SamplerState::Running | SamplerState::Stopping => Err(LifecycleError::AlreadyStarted),
            SamplerState::Stopped => Err(LifecycleError::Stopped),
        }
    }

    /// Requests the loop to stop.
    ///
    /// `Running` becomes `Stopping` and the sleeping loop is woken; `Idle`
    /// becomes `Stopped` directly. Any other state is left unchanged, so
    /// repeated calls are harmless. Returns `true` if a running loop was
    /// signalled.
    pub fn request_stop(&self) -> bool {
        let mut state = self.lock();
        let signalled = match *state {
            SamplerState::Running => {
                *state = SamplerState::Stopping;
                true
            }
            SamplerState::Idle => {
                *state = SamplerState::Stopped;
                false
            }
            SamplerState::Stopping | SamplerState::Stopped => false,
        };
        self.wake.notify_all();
        signalled
    }

    /// Marks the loop as exited.
    pub fn finish(&self) {
        *self.lock() = SamplerState::Stopped;
        self.wake.notify_all();
    }

    /// Returns `true` while the loop should keep ticking.
    pub fn is_running(&self) -> bool {
        self.state() == SamplerState::Running
    }

    /// Sleeps until `deadline` or until a stop is requested.
    ///
    /// Returns `true` if the deadline was reached while still running.
    pub fn wait_until(&self, deadline: Instant) -> bool {
        let mut state = self.lock();
        loop {
            if *state != SamplerState::Running {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            state = self
                .wake
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Sleeps for `interval` from now, or until a stop is requested.
    ///
    /// An interval that overflows the monotonic clock waits for the stop
    /// alone. Returns `true` if the interval elapsed while still running.
    pub fn wait_for(&self, interval: Duration) -> bool {
        if let Some(deadline) = Instant::now().checked_add(interval) {
            return self.wait_until(deadline);
        }

        let mut state = self.lock();
        while *state == SamplerState::Running {
            state = self
                .wake
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        false
    }
}

/// Failure counters shared between the sampling thread and the host.
#[derive(Debug, Default)]
pub struct SamplerStats {
    ticks: AtomicU64,
    provider_failures: AtomicU64,
    sink_failures: AtomicU64,
}

impl SamplerStats {
    /// Point-in-time copy of the counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            provider_failures: self.provider_failures.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
        }
    }
}

/// Copy of [`SamplerStats`] at one moment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Completed ticks.
    pub ticks: u64,
    /// Provider reads that produced an `unavailable` marker.
    pub provider_failures: u64,
    /// Sink writes (including banner notes) that failed.
    pub sink_failures: u64,
}

/// Drives providers and sinks on a fixed interval.
pub struct Sampler {
    interval: Duration,
    providers: Vec<Box<dyn MetricProvider>>,
    sinks: Vec<Box<dyn Sink>>,
    stats: Arc<SamplerStats>,
    start_note: Option<String>,
    stop_note: Option<String>,
}

impl std::fmt::Debug for Sampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sampler")
            .field("interval", &self.interval)
            .field("providers", &self.provider_names())
            .field(
                "sinks",
                &self.sinks.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

impl Sampler {
    /// Creates a sampler with no providers or sinks.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            providers: Vec::new(),
            sinks: Vec::new(),
            stats: Arc::new(SamplerStats::default()),
            start_note: None,
            stop_note: None,
        }
    }

    /// Registers a provider. Readings appear in registration order.
    pub fn register_provider(&mut self, provider: Box<dyn MetricProvider>) {
        self.providers.push(provider);
    }

    /// Registers a sink. Sinks receive samples in registration order.
    pub fn register_sink(&mut self, sink: Box<dyn Sink>) {
        self.sinks.push(sink);
    }

    /// Sets event lines written to every sink when the loop starts and exits.
    #[must_use]
    pub fn with_banners(mut self, start: impl Into<String>, stop: impl Into<String>) -> Self {
        self.start_note = Some(start.into());
        self.stop_note = Some(stop.into());
        self
    }

    /// Interval between tick starts.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Registered metric names, in order.
    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Shared counters, readable while the loop runs on another thread.
    pub fn stats(&self) -> Arc<SamplerStats> {
        Arc::clone(&self.stats)
    }

    /// Reads every provider once and assembles a sample.
    pub fn collect(&mut self) -> Sample {
        let timestamp = Local::now();
        let mut readings = Vec::with_capacity(self.providers.len());

        for provider in &mut self.providers {
            match provider.read() {
                Ok(value) => readings.push(Reading::value(provider.name(), value)),
                Err(e) => {
                    self.stats.provider_failures.fetch_add(1, Ordering::Relaxed);
                    debug!(provider = provider.name(), "reading unavailable: {e}");
                    readings.push(Reading::unavailable(provider.name()));
                }
            }
        }

        Sample::new(timestamp, readings)
    }

    /// Hands `sample` to every sink. A failing sink does not affect the rest.
    pub fn deliver(&mut self, sample: &Sample) {
        for sink in &mut self.sinks {
            if let Err(e) = sink.write(sample) {
                self.stats.sink_failures.fetch_add(1, Ordering::Relaxed);
                warn!(sink = sink.name(), "failed to write sample: {e}");
            }
        }
    }

    /// Writes an event line to every sink, isolating failures.
    pub fn announce(&mut self, message: &str) {
        for sink in &mut self.sinks {
            if let Err(e) = sink.note(message) {
                self.stats.sink_failures.fetch_add(1, Ordering::Relaxed);
                warn!(sink = sink.name(), "failed to write event: {e}");
            }
        }
    }

    /// Runs one complete tick and returns the sample it produced.
    pub fn tick(&mut self) -> Sample {
        let sample = self.collect();
        self.deliver(&sample);
        self.stats.ticks.fetch_add(1, Ordering::Relaxed);
        sample
    }

    /// Runs the loop on the current thread until `control` requests a stop.
    ///
    /// The caller is expected to have moved `control` into `Running` with
    /// [`LoopControl::begin`]. On exit every sink is closed and `control`
    /// is left in `Stopped`.
    pub fn run(mut self, control: &LoopControl) {
        info!(
            interval_ms = u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX),
            providers = self.providers.len(),
            sinks = self.sinks.len(),
            "sampling loop started"
        );

        if let Some(note) = self.start_note.take() {
            self.announce(&note);
        }

        while control.is_running() {
            self.tick();
            if !control.wait_for(self.interval) {
                break;
            }
        }

        if let Some(note) = self.stop_note.take() {
            self.announce(&note);
        }

        for sink in &mut self.sinks {
            if let Err(e) = sink.close() {
                self.stats.sink_failures.fetch_add(1, Ordering::Relaxed);
                warn!(sink = sink.name(), "failed to close: {e}");
            }
        }

        let stats = self.stats.snapshot();
        info!(
            ticks = stats.ticks,
            provider_failures = stats.provider_failures,
            sink_failures = stats.sink_failures,
            "sampling loop stopped"
        );
        control.finish();
    }
}
