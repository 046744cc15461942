//! Sample record produced once per tick.

use std::fmt;

use chrono::{DateTime, Local, SecondsFormat};

/// Marker written in place of a value when a provider failed.
pub const UNAVAILABLE: &str = "unavailable";

/// One metric reading, or the marker recording that it could not be taken.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Measurement {
    /// A successful reading.
    Value(f64),
    /// The provider failed this tick.
    Unavailable,
}

impl Measurement {
    /// Returns the reading, if there is one.
    pub fn value(&self) -> Option<f64> {
        match self {
            Self::Value(v) => Some(*v),
            Self::Unavailable => None,
        }
    }

    /// Returns `true` if this is the failure marker.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable)
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => write!(f, "{v:.2}"),
            Self::Unavailable => f.write_str(UNAVAILABLE),
        }
    }
}

/// A named reading within a [`Sample`].
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    /// The provider's metric name.
    pub name: String,
    /// The reading or failure marker.
    pub measurement: Measurement,
}

impl Reading {
    /// Creates a successful reading.
    pub fn value(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            measurement: Measurement::Value(value),
        }
    }

    /// Creates a failure marker for `name`.
    pub fn unavailable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            measurement: Measurement::Unavailable,
        }
    }
}

/// One tick's complete set of readings.
///
/// Readings cover every registered provider exactly once, in registration
/// order, whether or not the provider succeeded.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    timestamp: DateTime<Local>,
    readings: Vec<Reading>,
}

impl Sample {
    /// Creates a sample from a timestamp and its ordered readings.
    pub fn new(timestamp: DateTime<Local>, readings: Vec<Reading>) -> Self {
        Self {
            timestamp,
            readings,
        }
    }

    /// Wall-clock time at which the tick started.
    pub fn timestamp(&self) -> DateTime<Local> {
        self.timestamp
    }

    /// Readings in provider registration order.
    pub fn readings(&self) -> &[Reading] {
        &self.readings
    }

    /// Looks up a reading by metric name.
    pub fn get(&self, name: &str) -> Option<Measurement> {
        self.readings
            .iter()
            .find(|r| r.name == name)
            .map(|r| r.measurement)
    }

    /// Number of readings that carry the failure marker.
    pub fn unavailable_count(&self) -> usize {
        self.readings
            .iter()
            .filter(|r| r.measurement.is_unavailable())
            .count()
    }

    /// ISO-8601 timestamp with millisecond precision and local offset.
    pub fn timestamp_string(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, false)
    }

    /// Formats the sample as one log line, without the trailing newline.
    ///
    /// `<timestamp> name=value name=unavailable ...`
    pub fn to_log_line(&self) -> String {
        let mut line = self.timestamp_string();
        for reading in &self.readings {
            line.push(' ');
            line.push_str(&reading.name);
            line.push('=');
            line.push_str(&reading.measurement.to_string());
        }
        line
    }
}
