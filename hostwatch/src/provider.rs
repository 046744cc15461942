//! Metric providers: one source per resource kind.
//!
//! A provider produces a single floating-point reading per call or a
//! [`ProviderError`]. Errors never escape the sampler; they become
//! `unavailable` markers in the [`Sample`](crate::Sample).
//!
//! The built-in providers read Linux procfs/sysfs text files, and the
//! accelerator provider can also ask `nvidia-smi`. Roots and the command path
//! are configurable so tests can point them at a fake tree, the same way a
//! collector daemon takes a `--proc-path`. On hosts without these sources
//! every read fails and the metric is logged as `unavailable`.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use crate::error::ProviderError;

/// Source of one resource reading.
///
/// Implementations should return quickly; the sampler calls every provider
/// sequentially inside each tick and does not impose its own timeout.
pub trait MetricProvider: Send {
    /// Metric name used in log lines, e.g. `cpu_percent`.
    fn name(&self) -> &str;

    /// Takes one reading.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] if the resource cannot be read this tick.
    fn read(&mut self) -> Result<f64, ProviderError>;
}

/// Builds the standard provider set in registration order:
/// `cpu_percent`, `memory_percent`, `memory_used_mib`, `gpu_percent`.
///
/// `nvidia_smi`, when given, is tried for the GPU reading before DRM.
pub fn standard_providers(
    proc_root: &Path,
    sys_root: &Path,
    nvidia_smi: Option<&Path>,
) -> Vec<Box<dyn MetricProvider>> {
    let mut accelerator = AcceleratorLoad::new(sys_root);
    if let Some(command) = nvidia_smi {
        accelerator = accelerator.with_nvidia_smi(command);
    }

    vec![
        Box::new(ProcessorLoad::new(proc_root)),
        Box::new(MemoryUsage::new(proc_root, MemoryMeasure::Percent)),
        Box::new(MemoryUsage::new(proc_root, MemoryMeasure::UsedMib)),
        Box::new(accelerator),
    ]
}

fn read_file(path: &Path) -> Result<String, ProviderError> {
    fs::read_to_string(path).map_err(|e| ProviderError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

/// Aggregate jiffy counters from the `cpu` line of `/proc/stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTimes {
    /// Sum of user, nice, system, idle, iowait, irq, softirq and steal.
    pub total: u64,
    /// Idle plus iowait.
    pub idle: u64,
}

impl CpuTimes {
    /// Parses the aggregate `cpu ` line of `/proc/stat` contents.
    ///
    /// Returns `None` if the line is missing or has fewer than four counters.
    pub fn parse(content: &str) -> Option<Self> {
        let line = content.lines().find(|l| l.starts_with("cpu "))?;
        let values: Vec<u64> = line
            .split_whitespace()
            .skip(1)
            .take(8)
            .map(|v| v.parse().ok())
            .collect::<Option<_>>()?;

        if values.len() < 4 {
            return None;
        }

        let idle = values[3] + values.get(4).copied().unwrap_or(0);
        Some(Self {
            total: values.iter().sum(),
            idle,
        })
    }

    #[allow(clippy::cast_precision_loss)] // jiffy deltas are far below 2^52
    fn busy_percent(total: u64, idle: u64) -> Option<f64> {
        if total == 0 {
            return None;
        }
        Some(total.saturating_sub(idle) as f64 / total as f64 * 100.0)
    }
}

/// Processor load in percent across all cores.
///
/// Keeps the previous counters so each reading covers the time since the
/// last call. The first reading covers the time since boot.
#[derive(Debug)]
pub struct ProcessorLoad {
    stat_path: PathBuf,
    previous: Option<CpuTimes>,
}

impl ProcessorLoad {
    /// Creates a processor provider reading `<proc_root>/stat`.
    pub fn new(proc_root: &Path) -> Self {
        Self {
            stat_path: proc_root.join("stat"),
            previous: None,
        }
    }
}

impl MetricProvider for ProcessorLoad {
    fn name(&self) -> &str {
        "cpu_percent"
    }

    fn read(&mut self) -> Result<f64, ProviderError> {
        let content = read_file(&self.stat_path)?;
        let current = CpuTimes::parse(&content).ok_or_else(|| ProviderError::Parse {
            path: self.stat_path.clone(),
            reason: "missing or malformed aggregate cpu line".to_string(),
        })?;

        let previous = self.previous.replace(current);

        // Counters that did not advance (or went backwards after a reset)
        // fall back to the since-boot figures.
        let percent = match previous {
            Some(prev) if current.total > prev.total => CpuTimes::busy_percent(
                current.total - prev.total,
                current.idle.saturating_sub(prev.idle),
            ),
            _ => CpuTimes::busy_percent(current.total, current.idle),
        };

        percent.ok_or_else(|| ProviderError::Parse {
            path: self.stat_path.clone(),
            reason: "no cpu time accounted".to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Memory
// ---------------------------------------------------------------------------

/// Memory figures from `/proc/meminfo`, in KiB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemInfo {
    /// `MemTotal`.
    pub total_kib: u64,
    /// `MemAvailable`, or `MemFree + Buffers + Cached` on kernels without it.
    pub available_kib: u64,
}

impl MemInfo {
    /// Parses `/proc/meminfo` contents.
    ///
    /// Returns `None` if `MemTotal` is missing.
    pub fn parse(content: &str) -> Option<Self> {
        let mut total = None;
        let mut available = None;
        let mut free_fallback = 0u64;

        for line in content.lines() {
            let Some((key, rest)) = line.split_once(':') else {
                continue;
            };
            let Some(value) = rest
                .split_whitespace()
                .next()
                .and_then(|v| v.parse::<u64>().ok())
            else {
                continue;
            };

            match key {
                "MemTotal" => total = Some(value),
                "MemAvailable" => available = Some(value),
                "MemFree" | "Buffers" | "Cached" => free_fallback += value,
                _ => {}
            }
        }

        let total_kib = total?;
        Some(Self {
            total_kib,
            available_kib: available.unwrap_or(free_fallback).min(total_kib),
        })
    }

    /// Memory in use, in KiB.
    pub fn used_kib(&self) -> u64 {
        self.total_kib.saturating_sub(self.available_kib)
    }
}

/// Which memory figure a [`MemoryUsage`] provider reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryMeasure {
    /// Used memory as a percentage of total.
    Percent,
    /// Used memory in MiB.
    UsedMib,
    /// Available memory in MiB.
    AvailableMib,
}

/// Memory consumption provider.
#[derive(Debug)]
pub struct MemoryUsage {
    meminfo_path: PathBuf,
    measure: MemoryMeasure,
}

impl MemoryUsage {
    /// Creates a memory provider reading `<proc_root>/meminfo`.
    pub fn new(proc_root: &Path, measure: MemoryMeasure) -> Self {
        Self {
            meminfo_path: proc_root.join("meminfo"),
            measure,
        }
    }
}

impl MetricProvider for MemoryUsage {
    fn name(&self) -> &str {
        match self.measure {
            MemoryMeasure::Percent => "memory_percent",
            MemoryMeasure::UsedMib => "memory_used_mib",
            MemoryMeasure::AvailableMib => "memory_available_mib",
        }
    }

    #[allow(clippy::cast_precision_loss)] // KiB counts stay well below 2^52
    fn read(&mut self) -> Result<f64, ProviderError> {
        let content = read_file(&self.meminfo_path)?;
        let info = MemInfo::parse(&content).ok_or_else(|| ProviderError::Parse {
            path: self.meminfo_path.clone(),
            reason: "MemTotal not found".to_string(),
        })?;

        match self.measure {
            MemoryMeasure::Percent => {
                if info.total_kib == 0 {
                    return Err(ProviderError::Parse {
                        path: self.meminfo_path.clone(),
                        reason: "MemTotal is zero".to_string(),
                    });
                }
                Ok(info.used_kib() as f64 / info.total_kib as f64 * 100.0)
            }
            MemoryMeasure::UsedMib => Ok(info.used_kib() as f64 / 1024.0),
            MemoryMeasure::AvailableMib => Ok(info.available_kib as f64 / 1024.0),
        }
    }
}

// ---------------------------------------------------------------------------
// Accelerator
// ---------------------------------------------------------------------------

/// Arguments asking `nvidia-smi` for bare per-GPU utilization percentages.
const NVIDIA_SMI_ARGS: [&str; 2] = [
    "--query-gpu=utilization.gpu",
    "--format=csv,noheader,nounits",
];

/// Accelerator (GPU) load in percent.
///
/// When a query command is configured, the first GPU `nvidia-smi` lists is
/// reported. If that command is missing or fails, or none is configured, the
/// provider falls back to `gpu_busy_percent` from the first DRM card, in name
/// order, that exposes it (amdgpu). Hosts with neither report the metric as
/// unavailable.
#[derive(Debug)]
pub struct AcceleratorLoad {
    drm_dir: PathBuf,
    nvidia_smi: Option<PathBuf>,
}

impl AcceleratorLoad {
    /// Creates an accelerator provider scanning `<sys_root>/class/drm` only.
    pub fn new(sys_root: &Path) -> Self {
        Self {
            drm_dir: sys_root.join("class").join("drm"),
            nvidia_smi: None,
        }
    }

    /// Queries `command` (an `nvidia-smi` executable) before scanning DRM.
    #[must_use]
    pub fn with_nvidia_smi(mut self, command: impl Into<PathBuf>) -> Self {
        self.nvidia_smi = Some(command.into());
        self
    }

    fn query_nvidia(command: &Path) -> Result<f64, ProviderError> {
        let output = Command::new(command)
            .args(NVIDIA_SMI_ARGS)
            .output()
            .map_err(|e| ProviderError::Io {
                path: command.to_path_buf(),
                source: e,
            })?;

        if !output.status.success() {
            return Err(ProviderError::Unavailable {
                reason: format!("'{}' exited with {}", command.display(), output.status),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let first = stdout.lines().map(str::trim).find(|l| !l.is_empty());
        first
            .ok_or_else(|| ProviderError::Unavailable {
                reason: format!("'{}' listed no GPUs", command.display()),
            })?
            .parse::<f64>()
            .map_err(|e| ProviderError::Parse {
                path: command.to_path_buf(),
                reason: e.to_string(),
            })
    }

    fn busy_file(&self) -> Result<Option<PathBuf>, ProviderError> {
        let entries = fs::read_dir(&self.drm_dir).map_err(|e| ProviderError::Io {
            path: self.drm_dir.clone(),
            source: e,
        })?;

        // Connector entries such as `card0-DP-1` are skipped.
        let mut cards: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("card") && !n.contains('-'))
            })
            .collect();
        cards.sort();

        Ok(cards
            .into_iter()
            .map(|card| card.join("device").join("gpu_busy_percent"))
            .find(|path| path.is_file()))
    }

    fn read_drm(&self) -> Result<f64, ProviderError> {
        let path = self.busy_file()?.ok_or_else(|| ProviderError::Unavailable {
            reason: format!("no GPU under '{}' reports gpu_busy_percent", self.drm_dir.display()),
        })?;

        let content = read_file(&path)?;
        content.trim().parse::<f64>().map_err(|e| ProviderError::Parse {
            path,
            reason: e.to_string(),
        })
    }
}

impl MetricProvider for AcceleratorLoad {
    fn name(&self) -> &str {
        "gpu_percent"
    }

    fn read(&mut self) -> Result<f64, ProviderError> {
        if let Some(command) = &self.nvidia_smi {
            match Self::query_nvidia(command) {
                Ok(percent) => return Ok(percent),
                Err(e) => debug!("nvidia-smi query failed, scanning DRM: {e}"),
            }
        }
        self.read_drm()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const STAT: &str = "cpu  100 0 100 700 100 0 0 0 0 0\n\
                        cpu0 50 0 50 350 50 0 0 0 0 0\n\
                        intr 12345\n";

    const MEMINFO: &str = "MemTotal:       16384000 kB\n\
                           MemFree:         2000000 kB\n\
                           MemAvailable:   12288000 kB\n\
                           Buffers:          100000 kB\n\
                           Cached:          3000000 kB\n";

    #[test]
    fn test_parse_cpu_times() {
        let times = CpuTimes::parse(STAT).unwrap();
        assert_eq!(times.total, 1000);
        assert_eq!(times.idle, 800);

        assert!(CpuTimes::parse("cpu0 1 2 3 4\n").is_none());
        assert!(CpuTimes::parse("cpu  1 2\n").is_none());
        assert!(CpuTimes::parse("cpu  1 x 3 4\n").is_none());
    }

    #[test]
    fn test_processor_load_uses_deltas() {
        let dir = tempdir().unwrap();
        let stat = dir.path().join("stat");
        fs::write(&stat, STAT).unwrap();

        let mut cpu = ProcessorLoad::new(dir.path());
        assert_eq!(cpu.name(), "cpu_percent");

        // Since boot: 200 busy of 1000.
        let first = cpu.read().unwrap();
        assert!((first - 20.0).abs() < 1e-9);

        // +100 jiffies, 75 busy.
        fs::write(&stat, "cpu  150 0 125 725 100 0 0 0 0 0\n").unwrap();
        let second = cpu.read().unwrap();
        assert!((second - 75.0).abs() < 1e-9);

        // No progress falls back to since-boot figures.
        let third = cpu.read().unwrap();
        assert!((third - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_processor_load_errors() {
        let dir = tempdir().unwrap();
        let mut cpu = ProcessorLoad::new(dir.path());
        assert!(matches!(cpu.read(), Err(ProviderError::Io { .. })));

        fs::write(dir.path().join("stat"), "intr 1\n").unwrap();
        assert!(matches!(cpu.read(), Err(ProviderError::Parse { .. })));

        fs::write(dir.path().join("stat"), "cpu  0 0 0 0\n").unwrap();
        assert!(matches!(cpu.read(), Err(ProviderError::Parse { .. })));
    }

    #[test]
    fn test_parse_meminfo() {
        let info = MemInfo::parse(MEMINFO).unwrap();
        assert_eq!(info.total_kib, 16_384_000);
        assert_eq!(info.available_kib, 12_288_000);
        assert_eq!(info.used_kib(), 4_096_000);

        // Older kernels without MemAvailable.
        let legacy = "MemTotal: 1000 kB\nMemFree: 100 kB\nBuffers: 50 kB\nCached: 250 kB\n";
        let info = MemInfo::parse(legacy).unwrap();
        assert_eq!(info.available_kib, 400);

        assert!(MemInfo::parse("MemFree: 100 kB\n").is_none());
    }

    #[test]
    fn test_memory_measures() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("meminfo"), MEMINFO).unwrap();

        let mut percent = MemoryUsage::new(dir.path(), MemoryMeasure::Percent);
        let mut used = MemoryUsage::new(dir.path(), MemoryMeasure::UsedMib);
        let mut available = MemoryUsage::new(dir.path(), MemoryMeasure::AvailableMib);

        assert_eq!(percent.name(), "memory_percent");
        assert_eq!(used.name(), "memory_used_mib");
        assert_eq!(available.name(), "memory_available_mib");

        assert!((percent.read().unwrap() - 25.0).abs() < 1e-9);
        assert!((used.read().unwrap() - 4000.0).abs() < 1e-9);
        assert!((available.read().unwrap() - 12000.0).abs() < 1e-9);
    }

    #[test]
    fn test_accelerator_picks_first_card_with_busy_file() {
        let dir = tempdir().unwrap();
        let drm = dir.path().join("class/drm");
        fs::create_dir_all(drm.join("card0/device")).unwrap();
        fs::create_dir_all(drm.join("card0-HDMI-A-1")).unwrap();
        fs::create_dir_all(drm.join("card1/device")).unwrap();
        fs::create_dir_all(drm.join("card2/device")).unwrap();
        fs::write(drm.join("card1/device/gpu_busy_percent"), "37\n").unwrap();
        fs::write(drm.join("card2/device/gpu_busy_percent"), "90\n").unwrap();

        let mut gpu = AcceleratorLoad::new(dir.path());
        assert_eq!(gpu.name(), "gpu_percent");
        assert_eq!(gpu.read().unwrap(), 37.0);
    }

    #[test]
    fn test_accelerator_unavailable() {
        let dir = tempdir().unwrap();
        let mut gpu = AcceleratorLoad::new(dir.path());
        assert!(matches!(gpu.read(), Err(ProviderError::Io { .. })));

        fs::create_dir_all(dir.path().join("class/drm/card0/device")).unwrap();
        assert!(matches!(gpu.read(), Err(ProviderError::Unavailable { .. })));

        fs::write(
            dir.path().join("class/drm/card0/device/gpu_busy_percent"),
            "busy",
        )
        .unwrap();
        assert!(matches!(gpu.read(), Err(ProviderError::Parse { .. })));
    }

    #[cfg(unix)]
    fn write_script(path: &Path, body: &str) {
        use std::os::unix::fs::PermissionsExt;

        fs::write(path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    // All scripts are written before any is run, so no write handle is open
    // while a script executes.
    #[cfg(unix)]
    #[test]
    fn test_accelerator_prefers_nvidia_smi_then_falls_back_to_drm() {
        let dir = tempdir().unwrap();
        let device = dir.path().join("class/drm/card0/device");
        fs::create_dir_all(&device).unwrap();
        fs::write(device.join("gpu_busy_percent"), "55\n").unwrap();

        let two_gpus = dir.path().join("nvidia-smi-two");
        write_script(
            &two_gpus,
            "[ \"$1\" = \"--query-gpu=utilization.gpu\" ] || exit 2\n\
             [ \"$2\" = \"--format=csv,noheader,nounits\" ] || exit 2\n\
             echo 37\necho 90",
        );
        let broken = dir.path().join("nvidia-smi-broken");
        write_script(&broken, "echo 'NVIDIA-SMI has failed' >&2\nexit 9");
        let garbage = dir.path().join("nvidia-smi-garbage");
        write_script(&garbage, "echo '[N/A]'");

        let mut gpu = AcceleratorLoad::new(dir.path()).with_nvidia_smi(&two_gpus);
        assert_eq!(gpu.read().unwrap(), 37.0);

        let mut gpu = AcceleratorLoad::new(dir.path()).with_nvidia_smi(&broken);
        assert_eq!(gpu.read().unwrap(), 55.0);

        let mut gpu = AcceleratorLoad::new(dir.path()).with_nvidia_smi(&garbage);
        assert_eq!(gpu.read().unwrap(), 55.0);

        let mut gpu = AcceleratorLoad::new(&dir.path().join("no-sys")).with_nvidia_smi(&broken);
        assert!(gpu.read().is_err());
    }

    #[test]
    fn test_accelerator_missing_nvidia_smi_uses_drm() {
        let dir = tempdir().unwrap();
        let device = dir.path().join("class/drm/card0/device");
        fs::create_dir_all(&device).unwrap();
        fs::write(device.join("gpu_busy_percent"), "12\n").unwrap();

        let mut gpu =
            AcceleratorLoad::new(dir.path()).with_nvidia_smi(dir.path().join("no-such-nvidia-smi"));
        assert_eq!(gpu.read().unwrap(), 12.0);
    }

    #[test]
    fn test_standard_providers_order() {
        let dir = tempdir().unwrap();
        let providers = standard_providers(dir.path(), dir.path(), None);
        let names: Vec<&str> = providers.iter().map(|p| p.name()).collect();
        assert_eq!(
            names,
            ["cpu_percent", "memory_percent", "memory_used_mib", "gpu_percent"]
        );
    }
}
