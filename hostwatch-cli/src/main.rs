//! CLI for the hostwatch resource sampler.
//!
//! Runs the sampling loop until interrupted, takes one-off samples, and
//! inspects rotated log files.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use hostwatch::rotating::backup_path;
use hostwatch::{ConsoleMode, Monitor, MonitorConfig, RotationPolicy, Sampler, provider};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// hostwatch — periodic host resource sampler with a rotating log.
#[derive(Parser)]
#[command(name = "hostwatch", version, about)]
struct Cli {
    /// Increase diagnostic verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only report errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Sample until interrupted with CTRL+C.
    Run(RunArgs),

    /// Take a single sample and print it.
    Sample {
        #[command(flatten)]
        sources: SourceArgs,

        /// Seconds between the priming read and the reported one.
        #[arg(long, default_value = "1.0")]
        window: f64,

        /// Output format.
        #[arg(long, default_value = "line")]
        format: OutputFormat,
    },

    /// List the active log file and its rotated backups.
    Info {
        /// Active log file.
        #[arg(long, default_value = hostwatch::config::DEFAULT_LOG_PATH)]
        log_file: PathBuf,

        /// Highest backup generation to look for.
        #[arg(long, default_value_t = hostwatch::config::DEFAULT_MAX_BACKUPS)]
        backups: u32,
    },
}

/// Options for `hostwatch run`. Flags override values from `--config`.
#[derive(Args)]
struct RunArgs {
    /// JSON configuration file.
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Sampling interval in seconds.
    #[arg(short, long)]
    interval: Option<f64>,

    /// Active log file. Backups are written next to it as `<file>.N`.
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Rotate the log before it would exceed this size (e.g. "5M", "512K").
    #[arg(long, value_parser = parse_size)]
    max_bytes: Option<u64>,

    /// Number of rotated backups to keep.
    #[arg(long)]
    backups: Option<u32>,

    /// Console echo style.
    #[arg(long)]
    console: Option<ConsoleArg>,

    /// Omit the start/stop banner lines from the log.
    #[arg(long)]
    no_banner: bool,

    #[command(flatten)]
    sources: SourceArgs,
}

/// Where the metric providers read from.
#[derive(Args)]
struct SourceArgs {
    /// Path to the /proc filesystem (for testing/mocking).
    #[arg(long, value_name = "PATH")]
    proc_path: Option<PathBuf>,

    /// Path to the /sys filesystem (for testing/mocking).
    #[arg(long, value_name = "PATH")]
    sys_path: Option<PathBuf>,

    /// nvidia-smi executable queried for GPU load before the sysfs scan.
    #[arg(long, value_name = "PATH", conflicts_with = "no_nvidia_smi")]
    nvidia_smi: Option<PathBuf>,

    /// Skip the nvidia-smi query and read GPU load from sysfs only.
    #[arg(long)]
    no_nvidia_smi: bool,
}

/// Console echo style.
#[derive(Clone, Copy, ValueEnum)]
enum ConsoleArg {
    /// Rewrite one status line in place.
    Live,
    /// One line per sample.
    Lines,
    /// No console output.
    Off,
}

impl From<ConsoleArg> for ConsoleMode {
    fn from(arg: ConsoleArg) -> Self {
        match arg {
            ConsoleArg::Live => ConsoleMode::Live,
            ConsoleArg::Lines => ConsoleMode::Lines,
            ConsoleArg::Off => ConsoleMode::Off,
        }
    }
}

/// Output format for `hostwatch sample`.
#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// The same line the log receives.
    Line,
    /// JSON object keyed by metric name.
    Json,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let result = match cli.command {
        Commands::Run(args) => cmd_run(args),
        Commands::Sample {
            sources,
            window,
            format,
        } => cmd_sample(&sources, window, &format),
        Commands::Info { log_file, backups } => cmd_info(&log_file, backups),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Installs the diagnostics subscriber on stderr; stdout belongs to the console sink.
///
/// `RUST_LOG`, when set, takes precedence over the flags.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        "error"
    } else {
        match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format!("hostwatch={level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Implements `hostwatch run`.
fn cmd_run(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => MonitorConfig::load(path)?,
        None => MonitorConfig::default(),
    };

    if let Some(secs) = args.interval {
        config.interval = Duration::try_from_secs_f64(secs)
            .map_err(|e| format!("invalid interval '{secs}': {e}"))?;
    }
    if let Some(path) = args.log_file {
        config.log_path = path;
    }
    if args.max_bytes.is_some() || args.backups.is_some() {
        config.rotation = RotationPolicy::new(
            args.max_bytes.unwrap_or(config.rotation.size_threshold),
            args.backups.unwrap_or(config.rotation.max_backups),
        )?;
    }
    if let Some(console) = args.console {
        config.console = console.into();
    }
    if args.no_banner {
        config.host_banner = false;
    }
    apply_sources(&mut config, &args.sources);

    info!(
        "Config: interval={:?}, log={}, max_bytes={}, backups={}",
        config.interval,
        config.log_path.display(),
        format_bytes(config.rotation.size_threshold),
        config.rotation.max_backups
    );

    let log_path = config.log_path.clone();
    let console = config.console;
    let mut monitor = Monitor::new(config)?;

    let (shutdown_tx, shutdown_rx) = mpsc::channel();
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(());
    }) {
        warn!("Failed to set Ctrl-C handler: {e}");
    }

    if console == ConsoleMode::Off {
        monitor.start()?;
    } else {
        start_with_message(&mut monitor, &mut std::io::stdout(), &log_path)?;
    }

    // A dropped sender also means no handler will ever fire; stop either way.
    let _ = shutdown_rx.recv();
    info!("Received shutdown signal");
    monitor.stop();

    let stats = monitor.stats();
    info!(
        "Stopped after {} ticks ({} provider failures, {} sink failures)",
        stats.ticks, stats.provider_failures, stats.sink_failures
    );
    if console != ConsoleMode::Off {
        println!("Monitoring stopped.");
    }
    Ok(())
}

/// Writes the start message, then starts `monitor`, so the message always
/// precedes anything the sampling thread prints.
fn start_with_message<W: Write>(
    monitor: &mut Monitor,
    out: &mut W,
    log_path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    writeln!(out, "System monitoring service started. (Log file: {})", log_path.display())?;
    writeln!(out, "Press CTRL+C to exit.")?;
    out.flush()?;
    monitor.start()?;
    Ok(())
}

/// Implements `hostwatch sample`.
fn cmd_sample(
    sources: &SourceArgs,
    window: f64,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let window = Duration::try_from_secs_f64(window)
        .map_err(|e| format!("invalid window '{window}': {e}"))?;

    let mut config = MonitorConfig::default();
    apply_sources(&mut config, sources);

    let mut sampler = Sampler::new(config.interval);
    for p in provider::standard_providers(
        &config.proc_root,
        &config.sys_root,
        config.nvidia_smi.as_deref(),
    ) {
        sampler.register_provider(p);
    }

    // Rate-based readings need a previous observation.
    let _ = sampler.collect();
    thread::sleep(window);
    let sample = sampler.collect();

    match format {
        OutputFormat::Line => println!("{}", sample.to_log_line()),
        OutputFormat::Json => {
            let mut readings = serde_json::Map::new();
            for reading in sample.readings() {
                let value = reading
                    .measurement
                    .value()
                    .and_then(serde_json::Number::from_f64)
                    .map_or(serde_json::Value::Null, serde_json::Value::Number);
                readings.insert(reading.name.clone(), value);
            }
            let doc = serde_json::json!({
                "timestamp": sample.timestamp_string(),
                "readings": readings,
            });
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
    }
    Ok(())
}

/// Implements `hostwatch info`.
fn cmd_info(log_file: &Path, backups: u32) -> Result<(), Box<dyn std::error::Error>> {
    if !log_file.exists() {
        return Err(format!("No log found at '{}'", log_file.display()).into());
    }

    println!("Log: {}", log_file.display());
    println!();

    let active = std::fs::metadata(log_file)?.len();
    let mut total = active;
    println!("  {:<40} {:>10}", log_file.display(), format_bytes(active));

    let mut generations = 0;
    for generation in 1..=backups {
        let path = backup_path(log_file, generation);
        // Rotation keeps generations contiguous.
        let Ok(meta) = std::fs::metadata(&path) else {
            break;
        };
        generations += 1;
        total += meta.len();
        println!("  {:<40} {:>10}", path.display(), format_bytes(meta.len()));
    }

    println!();
    println!("Backups: {generations}");
    println!("Total size: {}", format_bytes(total));

    if let Some(next) = backups.checked_add(1)
        && backup_path(log_file, next).exists()
    {
        println!("Note: generation {next} exists beyond --backups {backups}");
    }
    Ok(())
}

fn apply_sources(config: &mut MonitorConfig, sources: &SourceArgs) {
    if let Some(path) = &sources.proc_path {
        config.proc_root.clone_from(path);
    }
    if let Some(path) = &sources.sys_path {
        config.sys_root.clone_from(path);
    }
    if let Some(path) = &sources.nvidia_smi {
        config.nvidia_smi = Some(path.clone());
    }
    if sources.no_nvidia_smi {
        config.nvidia_smi = None;
    }
}

/// Parses a human-readable size string (e.g., "5M", "512K", "1048576") into bytes.
fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty size string".to_string());
    }

    let (num_str, multiplier) = if let Some(num) = s.strip_suffix(['G', 'g']) {
        (num, 1024 * 1024 * 1024)
    } else if let Some(num) = s.strip_suffix(['M', 'm']) {
        (num, 1024 * 1024)
    } else if let Some(num) = s.strip_suffix(['K', 'k']) {
        (num, 1024)
    } else {
        (s, 1)
    };

    num_str
        .trim()
        .parse::<u64>()
        .map_err(|e| format!("invalid size '{s}': {e}"))?
        .checked_mul(multiplier)
        .ok_or_else(|| format!("size '{s}' is too large"))
}

/// Formats a byte count as a human-readable string.
#[allow(clippy::cast_precision_loss)]
fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_048_576 {
        format!("{:.1} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostwatch::ConsoleSink;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_parse_size_suffixes() {
        assert_eq!(parse_size("1048576"), Ok(1_048_576));
        assert_eq!(parse_size("512K"), Ok(512 * 1024));
        assert_eq!(parse_size("5M"), Ok(5 * 1024 * 1024));
        assert_eq!(parse_size(" 2g "), Ok(2 * 1024 * 1024 * 1024));
    }

    #[test]
    fn test_parse_size_rejects_garbage() {
        assert!(parse_size("").is_err());
        assert!(parse_size("M").is_err());
        assert!(parse_size("five").is_err());
        assert!(parse_size("99999999999999999999G").is_err());
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_start_message_precedes_sampler_output() {
        let out = SharedBuf::default();
        let mut sampler =
            Sampler::new(Duration::from_millis(5)).with_banners("--- MONITOR STARTED ---", "--- MONITOR STOPPED ---");
        sampler.register_sink(Box::new(ConsoleSink::new(out.clone(), ConsoleMode::Lines)));
        let mut monitor = Monitor::from_sampler(sampler);

        start_with_message(&mut monitor, &mut out.clone(), Path::new("host.log")).unwrap();
        thread::sleep(Duration::from_millis(20));
        monitor.stop();

        let text = String::from_utf8(out.0.lock().unwrap().clone()).unwrap();
        assert!(
            text.starts_with(
                "System monitoring service started. (Log file: host.log)\n\
                 Press CTRL+C to exit.\n\
                 --- MONITOR STARTED ---\n"
            ),
            "{text}"
        );
        assert!(text.ends_with("--- MONITOR STOPPED ---\n"));
    }

    #[test]
    fn test_info_accepts_largest_backup_count() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("host.log");
        std::fs::write(&log, "line\n").unwrap();
        std::fs::write(backup_path(&log, 1), "old\n").unwrap();

        assert!(cmd_info(&log, 1).is_ok());
        assert!(cmd_info(&log, u32::MAX).is_ok());
    }

    #[test]
    fn test_sources_select_gpu_query() {
        let mut config = MonitorConfig::default();
        let cli = Cli::try_parse_from(["hostwatch", "sample", "--nvidia-smi", "/opt/bin/nvidia-smi"])
            .unwrap();
        let Commands::Sample { sources, .. } = cli.command else {
            panic!("expected sample");
        };
        apply_sources(&mut config, &sources);
        assert_eq!(config.nvidia_smi, Some(PathBuf::from("/opt/bin/nvidia-smi")));

        let cli = Cli::try_parse_from(["hostwatch", "sample", "--no-nvidia-smi"]).unwrap();
        let Commands::Sample { sources, .. } = cli.command else {
            panic!("expected sample");
        };
        apply_sources(&mut config, &sources);
        assert_eq!(config.nvidia_smi, None);
    }

    #[test]
    fn test_cli_parses_run_overrides() {
        let cli = Cli::try_parse_from([
            "hostwatch",
            "-v",
            "run",
            "--interval",
            "0.5",
            "--max-bytes",
            "1M",
            "--backups",
            "2",
            "--console",
            "lines",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 1);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.interval, Some(0.5));
                assert_eq!(args.max_bytes, Some(1024 * 1024));
                assert_eq!(args.backups, Some(2));
                assert!(matches!(args.console, Some(ConsoleArg::Lines)));
                assert!(!args.no_banner);
            }
            _ => panic!("expected run"),
        }
    }
}
