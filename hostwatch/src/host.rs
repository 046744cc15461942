//! Static host description written in the start banner.

use std::fmt;
use std::path::Path;

use crate::provider::MemInfo;

/// Banner line written when the sampling loop starts.
pub const START_BANNER: &str = "--- MONITOR STARTED ---";

/// Banner line written when the sampling loop exits.
pub const STOP_BANNER: &str = "--- MONITOR STOPPED ---";

/// Host facts gathered once at construction.
///
/// Fields that cannot be determined are left as `None` and rendered as
/// `unknown`; gathering never fails.
#[derive(Debug, Clone, PartialEq)]
pub struct HostInfo {
    /// Operating system family, e.g. `linux`.
    pub os: &'static str,
    /// Kernel release from `<proc_root>/sys/kernel/osrelease`.
    pub kernel: Option<String>,
    /// CPU architecture, e.g. `x86_64`.
    pub arch: &'static str,
    /// Logical CPU count.
    pub cores: Option<usize>,
    /// Total memory in GiB.
    pub total_ram_gib: Option<f64>,
}

impl HostInfo {
    /// Gathers host facts, reading kernel and memory details under `proc_root`.
    #[allow(clippy::cast_precision_loss)] // display-only
    pub fn gather(proc_root: &Path) -> Self {
        let kernel = std::fs::read_to_string(proc_root.join("sys/kernel/osrelease"))
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let total_ram_gib = std::fs::read_to_string(proc_root.join("meminfo"))
            .ok()
            .and_then(|content| MemInfo::parse(&content))
            .map(|info| info.total_kib as f64 / (1024.0 * 1024.0));

        Self {
            os: std::env::consts::OS,
            kernel,
            arch: std::env::consts::ARCH,
            cores: std::thread::available_parallelism().ok().map(|n| n.get()),
            total_ram_gib,
        }
    }

    /// Start banner followed by the host facts, on one line.
    pub fn start_banner(&self) -> String {
        format!("{START_BANNER} {self}")
    }
}

impl fmt::Display for HostInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "os={} kernel={} arch={}",
            self.os,
            self.kernel.as_deref().unwrap_or("unknown"),
            self.arch
        )?;
        match self.cores {
            Some(cores) => write!(f, " cores={cores}")?,
            None => f.write_str(" cores=unknown")?,
        }
        match self.total_ram_gib {
            Some(gib) => write!(f, " total_ram_gib={gib:.2}"),
            None => f.write_str(" total_ram_gib=unknown"),
        }
    }
}
