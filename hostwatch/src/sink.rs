//! Sample consumers.
//!
//! A [`Sink`] receives every [`Sample`] synchronously within the tick that
//! produced it. Sinks never see a backlog: one sample is in flight at a time.
//! The durable sink is [`RotatingLogSink`](crate::RotatingLogSink); this
//! module holds the trait and the best-effort [`ConsoleSink`].

use std::io::{self, Stdout, Write};

use crate::config::ConsoleMode;
use crate::error::SinkError;
use crate::sample::Sample;

/// Consumer of samples.
pub trait Sink: Send {
    /// Short name used in diagnostics.
    fn name(&self) -> &str;

    /// Handles one sample.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if the sample could not be persisted or echoed.
    fn write(&mut self, sample: &Sample) -> Result<(), SinkError>;

    /// Handles a free-form event line such as a start or stop banner.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if the line could not be written.
    fn note(&mut self, message: &str) -> Result<(), SinkError>;

    /// Called once when the sampling loop exits.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if buffered output could not be flushed.
    fn close(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Best-effort human-readable echo of each sample.
///
/// In [`ConsoleMode::Live`] a single status line is rewritten in place with a
/// carriage return; in [`ConsoleMode::Lines`] each sample gets its own line.
/// [`ConsoleMode::Off`] accepts and discards everything.
#[derive(Debug)]
pub struct ConsoleSink<W: Write + Send = Stdout> {
    out: W,
    mode: ConsoleMode,
    /// A live status line is on screen without a trailing newline.
    line_open: bool,
}

impl ConsoleSink<Stdout> {
    /// Creates a console sink writing to standard output.
    pub fn stdout(mode: ConsoleMode) -> Self {
        Self::new(io::stdout(), mode)
    }
}

impl<W: Write + Send> ConsoleSink<W> {
    /// Creates a console sink writing to `out`.
    pub fn new(out: W, mode: ConsoleMode) -> Self {
        Self {
            out,
            mode,
            line_open: false,
        }
    }

    /// Consumes the sink and returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.out
    }

    fn emit(&mut self, text: &str) -> Result<(), SinkError> {
        self.out
            .write_all(text.as_bytes())
            .and_then(|()| self.out.flush())
            .map_err(|e| SinkError::Io {
                target: "console".to_string(),
                source: e,
            })
    }

    fn live_line(sample: &Sample) -> String {
        let fields: Vec<String> = sample
            .readings()
            .iter()
            .map(|r| format!("{}: {}", r.name, r.measurement))
            .collect();
        format!("\r[LIVE] {}   ", fields.join(" | "))
    }
}

impl<W: Write + Send> Sink for ConsoleSink<W> {
    fn name(&self) -> &str {
        "console"
    }

    fn write(&mut self, sample: &Sample) -> Result<(), SinkError> {
        match self.mode {
            ConsoleMode::Live => {
                let line = Self::live_line(sample);
                self.emit(&line)?;
                self.line_open = true;
                Ok(())
            }
            ConsoleMode::Lines => self.emit(&format!("{}\n", sample.to_log_line())),
            ConsoleMode::Off => Ok(()),
        }
    }

    fn note(&mut self, message: &str) -> Result<(), SinkError> {
        if self.mode == ConsoleMode::Off {
            return Ok(());
        }
        let prefix = if self.line_open { "\n" } else { "" };
        self.line_open = false;
        self.emit(&format!("{prefix}{message}\n"))
    }

    fn close(&mut self) -> Result<(), SinkError> {
        if self.line_open {
            self.line_open = false;
            self.emit("\n")?;
        }
        Ok(())
    }
}
