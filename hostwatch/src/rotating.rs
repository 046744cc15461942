//! Size-bounded, generation-bounded rotating log file.
//!
//! # File Layout
//!
//! ```text
//! log_dir/
//! ├── system_monitor.log      <- active file, appended to
//! ├── system_monitor.log.1    <- most recent backup generation
//! ├── system_monitor.log.2
//! └── system_monitor.log.N    <- oldest kept generation (N = max_backups)
//! ```
//!
//! # Rotation
//!
//! Before each append the sink checks whether the new line would push the
//! active file past `size_threshold`. If so it rotates first:
//!
//! 1. close the active file
//! 2. discard `<path>.N`
//! 3. rename `<path>.i` to `<path>.i+1` for `i` from `N-1` down to `1`
//! 4. rename `<path>` to `<path>.1`
//! 5. open a fresh, empty `<path>`
//!
//! An empty active file is never rotated, so a single line longer than the
//! threshold is written whole into a fresh file rather than producing empty
//! generations. After every completed append the active file therefore holds
//! at most `size_threshold` bytes, or exactly one line if that line alone is
//! larger.
//!
//! The sink assumes it is the only writer of these files for the lifetime of
//! the process; there is no cross-process locking.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{error, info};

use crate::config::RotationPolicy;
use crate::error::{ConfigError, Result, SinkError};
use crate::sample::Sample;
use crate::sink::Sink;

/// Returns the path of backup generation `generation` (1 = most recent).
pub fn backup_path(active: &Path, generation: u32) -> PathBuf {
    let mut name = active.as_os_str().to_os_string();
    name.push(format!(".{generation}"));
    PathBuf::from(name)
}

/// Counts the backup generations `1..=max_backups` present on disk.
pub fn count_generations(active: &Path, max_backups: u32) -> u32 {
    let present = (1..=max_backups)
        .filter(|&g| backup_path(active, g).is_file())
        .count();
    u32::try_from(present).unwrap_or(max_backups)
}

/// Bookkeeping for the active file, owned by a single [`RotatingLogSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationState {
    /// Path of the active log file.
    pub active_path: PathBuf,
    /// Bytes currently in the active file.
    pub active_size: u64,
    /// Number of backup generations on disk, at most `max_backups`.
    pub generations: u32,
}

/// Durable sink appending one line per sample to a rotating log file.
#[derive(Debug)]
pub struct RotatingLogSink {
    policy: RotationPolicy,
    state: RotationState,
    /// `None` after a failed rotation; reopened on the next append.
    file: Option<File>,
    rotations: u64,
}

impl RotatingLogSink {
    /// Opens (or creates) the active log file at `path` in append mode.
    ///
    /// Missing parent directories are created. Existing content is kept and
    /// counted toward the size threshold, so a restart continues the same
    /// rotation sequence.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the policy is invalid or the file cannot be
    /// created or opened.
    pub fn open<P: AsRef<Path>>(path: P, policy: RotationPolicy) -> Result<Self> {
        policy.validate()?;
        let path = path.as_ref().to_path_buf();

        if path.file_name().is_none() {
            return Err(ConfigError::InvalidLogPath {
                path,
                reason: "path does not name a file".to_string(),
            }
            .into());
        }

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| ConfigError::InvalidLogPath {
                path: path.clone(),
                reason: format!("cannot create parent directory: {e}"),
            })?;
        }

        let file = open_append(&path).map_err(|e| ConfigError::InvalidLogPath {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        let active_size = file
            .metadata()
            .map_err(|e| ConfigError::InvalidLogPath {
                path: path.clone(),
                reason: e.to_string(),
            })?
            .len();

        let generations = count_generations(&path, policy.max_backups);

        Ok(Self {
            policy,
            state: RotationState {
                active_path: path,
                active_size,
                generations,
            },
            file: Some(file),
            rotations: 0,
        })
    }

    /// Current rotation bookkeeping.
    pub fn state(&self) -> &RotationState {
        &self.state
    }

    /// The policy this sink enforces.
    pub fn policy(&self) -> RotationPolicy {
        self.policy
    }

    /// Number of rotations performed by this sink instance.
    pub fn rotations(&self) -> u64 {
        self.rotations
    }

    /// Appends `line` plus a newline, rotating first if needed.
    ///
    /// Rotation and append form one step: if rotation succeeds but the append
    /// fails, the line is lost and the error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Rotation`] if the file could not be rotated, or
    /// [`SinkError::Io`] if the line could not be written.
    pub fn append_line(&mut self, line: &str) -> std::result::Result<(), SinkError> {
        let mut record = String::with_capacity(line.len() + 1);
        record.push_str(line);
        record.push('\n');
        let incoming = record.len() as u64;

        // After a failed rotation the recorded size may be stale.
        if self.file.is_none() {
            self.active_file()?;
        }

        if self.should_rotate(incoming) {
            self.rotate()?;
        }

        let file = self.active_file()?;
        if let Err(e) = file.write_all(record.as_bytes()) {
            // A partial write may have landed; resync the size from disk.
            if let Ok(meta) = file.metadata() {
                self.state.active_size = meta.len();
            }
            return Err(self.io_error(e));
        }

        self.state.active_size += incoming;
        Ok(())
    }

    fn should_rotate(&self, incoming: u64) -> bool {
        self.state.active_size > 0
            && self.state.active_size.saturating_add(incoming) > self.policy.size_threshold
    }

    /// Retires the active file into generation 1 and starts a fresh one.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Rotation`] if any rename, removal, or the reopen
    /// fails. The next append then reopens the active file and re-reads its
    /// size from disk before deciding whether to rotate again.
    pub fn rotate(&mut self) -> std::result::Result<(), SinkError> {
        // Close before renaming.
        self.file = None;

        let active = self.state.active_path.clone();
        let max = self.policy.max_backups;

        let oldest = backup_path(&active, max);
        if oldest.exists() {
            fs::remove_file(&oldest).map_err(|e| self.rotation_error(e))?;
        }

        for generation in (1..max).rev() {
            let src = backup_path(&active, generation);
            if src.exists() {
                let dst = backup_path(&active, generation + 1);
                fs::rename(&src, &dst).map_err(|e| self.rotation_error(e))?;
            }
        }

        if active.exists() {
            fs::rename(&active, backup_path(&active, 1)).map_err(|e| self.rotation_error(e))?;
        }
        self.state.active_size = 0;

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&active)
            .map_err(|e| self.rotation_error(e))?;

        self.file = Some(file);
        self.state.active_size = 0;
        self.state.generations = count_generations(&active, max);
        self.rotations += 1;

        info!(
            path = %active.display(),
            generations = self.state.generations,
            "rotated log file"
        );
        Ok(())
    }

    fn active_file(&mut self) -> std::result::Result<&mut File, SinkError> {
        if self.file.is_none() {
            let path = &self.state.active_path;
            let reopened = open_append(path).and_then(|f| f.metadata().map(|m| (f, m.len())));
            match reopened {
                Ok((file, len)) => {
                    self.state.active_size = len;
                    self.file = Some(file);
                }
                Err(e) => {
                    error!(path = %path.display(), "failed to reopen log file: {e}");
                    return Err(self.io_error(e));
                }
            }
        }

        self.file.as_mut().ok_or_else(|| SinkError::Io {
            target: self.state.active_path.display().to_string(),
            source: std::io::Error::other("log file not open"),
        })
    }

    fn io_error(&self, source: std::io::Error) -> SinkError {
        SinkError::Io {
            target: self.state.active_path.display().to_string(),
            source,
        }
    }

    fn rotation_error(&self, source: std::io::Error) -> SinkError {
        SinkError::Rotation {
            path: self.state.active_path.clone(),
            source,
        }
    }
}

fn open_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

impl Sink for RotatingLogSink {
    fn name(&self) -> &str {
        "log"
    }

    fn write(&mut self, sample: &Sample) -> std::result::Result<(), SinkError> {
        self.append_line(&sample.to_log_line())
    }

    fn note(&mut self, message: &str) -> std::result::Result<(), SinkError> {
        self.append_line(message)
    }

    fn close(&mut self) -> std::result::Result<(), SinkError> {
        if let Some(file) = self.file.as_mut() {
            file.sync_data().map_err(|e| SinkError::Io {
                target: self.state.active_path.display().to_string(),
                source: e,
            })?;
        }
        Ok(())
    }
}
