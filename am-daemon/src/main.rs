//! adbmend Daemon (adbmendd)
//!
//! Self-healing reconciliation controller for a farm of Android devices
//! exposed through a local ADB server and tracked in a shared directory
//! store. Compares three independent authorities (USB bus, ADB server,
//! directory records), classifies mismatches, and issues minimal corrective
//! actions: USB driver rebind, ADB reconnect, stale record cleanup.
//!
//! # Operating Modes
//! - `run`: periodic reconciliation loop (the daemon proper)
//! - `once`: a single reconciliation pass, summary printed as JSON
//! - `cleanup`: one-shot removal of this host's stale emulator records
//! - `annotate`: one-shot note stamping on this host's directory records
//!
//! # Security Model
//! - **Privilege**: USB driver rebind needs root; directory maintenance
//!   does not, so missing privilege is a warning, not a refusal
//! - **Isolation**: restrictive umask, working directory set to /
//! - **Environment**: dangerous loader variables cleared at startup
//! - **Signals**: graceful shutdown; in-flight actions finish, no new ones
//!   are issued

mod maintenance;
mod reconciler;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use am_core::constants;
use am_core::store::HttpDirectoryStore;
use am_core::AdbmendConfig;

const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// Security Hardening
// ============================================================================

/// Sanitize the process environment by removing dangerous variables
fn sanitize_environment() {
    const DANGEROUS_VARS: &[&str] = &[
        "LD_PRELOAD",
        "LD_LIBRARY_PATH",
        "LD_AUDIT",
        "LD_DEBUG",
        "LD_PROFILE",
        "MALLOC_CHECK_",
        "HOSTALIASES",
        "LOCALDOMAIN",
        "RES_OPTIONS",
        "IFS",
        "PATH", // We'll set our own
    ];

    for var in DANGEROUS_VARS {
        std::env::remove_var(var);
    }

    // Set a minimal, secure PATH
    std::env::set_var("PATH", "/usr/sbin:/usr/bin:/sbin:/bin");

    // Ensure locale is predictable
    std::env::set_var("LC_ALL", "C");
    std::env::set_var("LANG", "C");
}

/// Set restrictive umask
fn set_secure_umask() {
    // 0077 = owner has all permissions, group/other have none
    // SAFETY: umask only sets the file creation mask for this process.
    unsafe { libc::umask(0o077) };
}

/// Change to root directory (prevent directory-based attacks)
fn secure_working_directory() {
    if std::env::set_current_dir("/").is_err() {
        warn!("Could not chdir to /");
    }
}

/// USB driver rebind writes to /sys/bus/usb/drivers, which needs root.
/// Directory and ADB maintenance do not, so this only warns.
fn check_privileges() {
    // SAFETY: geteuid just returns the process's effective user ID.
    let euid = unsafe { libc::geteuid() };
    if euid != 0 {
        warn!("Not running as root (euid={}); USB driver rebind actions will fail", euid);
    }
}

// ============================================================================
// PID File Management
// ============================================================================

/// Write the PID file, detecting an already-running instance
fn write_pid_file() -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let path = constants::paths::PID_FILE;

    // Check for stale PID file
    if Path::new(path).exists() {
        if let Ok(content) = std::fs::read_to_string(path) {
            if let Ok(old_pid) = content.trim().parse::<i32>() {
                // SAFETY: kill with signal 0 only checks that the process
                // exists; no signal is delivered.
                if unsafe { libc::kill(old_pid, 0) } == 0 {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::AddrInUse,
                        format!("Another instance is running (PID {})", old_pid),
                    ));
                }
            }
        }
        // Stale PID file, remove it
        let _ = std::fs::remove_file(path);
    }

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true) // fail if a race recreated it
        .mode(0o644)
        .open(path)?;

    writeln!(file, "{}", std::process::id())?;
    file.sync_all()?;

    debug!("PID file written: {}", path);
    Ok(())
}

fn remove_pid_file() {
    let path = constants::paths::PID_FILE;
    if Path::new(path).exists() {
        if let Err(e) = std::fs::remove_file(path) {
            warn!("Failed to remove PID file: {}", e);
        }
    }
}

// ============================================================================
// Logging
// ============================================================================

/// Journald when running under systemd, stdout otherwise.
/// Level filter from `ADBMEND_LOG`.
fn init_logging() -> String {
    let log_level = std::env::var(constants::env::LOG).unwrap_or_else(|_| "info".to_string());

    let mut use_journald = Path::new("/run/systemd/journal/socket").exists();
    if use_journald {
        match tracing_journald::layer() {
            Ok(journald_layer) => {
                use tracing_subscriber::prelude::*;
                tracing_subscriber::registry()
                    .with(journald_layer)
                    .with(tracing_subscriber::EnvFilter::new(&log_level))
                    .init();
            }
            Err(e) => {
                eprintln!("Failed to create journald layer: {}, falling back to stdout", e);
                use_journald = false;
                tracing_subscriber::fmt()
                    .with_target(false)
                    .with_level(true)
                    .with_env_filter(&log_level)
                    .init();
            }
        }
    } else {
        tracing_subscriber::fmt()
            .with_target(false)
            .with_level(true)
            .with_env_filter(&log_level)
            .init();
    }

    info!(
        "STARTUP: logging to {} at level {}",
        if use_journald { "systemd journal" } else { "stdout" },
        log_level
    );
    log_level
}

// ============================================================================
// CLI
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Run,
    Once,
    Cleanup,
    Annotate,
}

struct CliArgs {
    command: Command,
    config_path: Option<PathBuf>,
    interval_override: Option<u64>,
}

fn print_help() {
    eprintln!("adbmendd {} - ADB device-farm reconciliation daemon", VERSION);
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("    adbmendd [COMMAND] [OPTIONS]");
    eprintln!();
    eprintln!("COMMANDS:");
    eprintln!("    run                 Periodic reconciliation loop (default)");
    eprintln!("    once                Single reconciliation pass, JSON summary on stdout");
    eprintln!("    cleanup             Remove this host's stale emulator records");
    eprintln!("    annotate            Stamp ADBMEND_PROVIDER_NOTE onto this host's records");
    eprintln!();
    eprintln!("OPTIONS:");
    eprintln!("    -c, --config PATH   Config file (default /etc/adbmend/config.json)");
    eprintln!("    -i, --interval SECS Override the reconcile interval");
    eprintln!("    -v, --version       Print version");
    eprintln!("    -h, --help          Print this help");
    eprintln!();
    eprintln!("ENVIRONMENT:");
    eprintln!("    ADBMEND_LOG            Log level (trace, debug, info, warn, error)");
    eprintln!("    ADBMEND_CONFIG         Config file path override");
    eprintln!("    ADBMEND_PUBLIC_IP      Public IP scoping emulator cleanup");
    eprintln!("    ADBMEND_PROVIDER_NOTE  Note text for the annotate command");
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs {
        command: Command::Run,
        config_path: None,
        interval_override: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-v" | "--version" => {
                println!("adbmendd {}", VERSION);
                std::process::exit(0);
            }
            "-c" | "--config" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
                cli.config_path = Some(PathBuf::from(&args[i]));
            }
            "-i" | "--interval" => {
                i += 1;
                let secs = args.get(i).and_then(|s| s.parse::<u64>().ok());
                match secs {
                    Some(secs) if secs > 0 => cli.interval_override = Some(secs),
                    _ => {
                        eprintln!("Error: --interval requires a positive number of seconds");
                        std::process::exit(1);
                    }
                }
            }
            "run" => cli.command = Command::Run,
            "once" => cli.command = Command::Once,
            "cleanup" => cli.command = Command::Cleanup,
            "annotate" => cli.command = Command::Annotate,
            arg => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }
    cli
}

// ============================================================================
// Run Loop
// ============================================================================

/// Sleep the interval in short slices so shutdown is prompt
fn interruptible_sleep(total: Duration, shutdown: &AtomicBool) {
    let slice = Duration::from_millis(250);
    let mut remaining = total;
    while remaining > Duration::ZERO && !shutdown.load(Ordering::SeqCst) {
        let step = remaining.min(slice);
        std::thread::sleep(step);
        remaining = remaining.saturating_sub(step);
    }
}

async fn run_loop(
    reconciler: reconciler::Reconciler,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
) {
    info!("Reconcile loop started (interval {:?})", interval);
    while !shutdown.load(Ordering::SeqCst) {
        let summary = reconciler.run_once().await;
        if summary.failed > 0 {
            warn!(
                failed = summary.failed,
                recovered = summary.recovered,
                "pass finished with failures"
            );
        }
        let shutdown_ref = shutdown.clone();
        let wait = interval;
        // Block off the runtime so the signal handler thread stays responsive
        let _ = tokio::task::spawn_blocking(move || {
            interruptible_sleep(wait, &shutdown_ref);
        })
        .await;
    }
    info!("Reconcile loop stopped");
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // PHASE 0: panic hook, so a panic is logged instead of vanishing
    std::panic::set_hook(Box::new(|panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());
        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };
        eprintln!("PANIC at {}: {}", location, message);
    }));

    // PHASE 1: pre-initialization hardening, before anything else runs
    sanitize_environment();
    set_secure_umask();
    secure_working_directory();

    // PHASE 2: arguments
    let cli = parse_args();

    // PHASE 3: logging
    init_logging();
    info!("STARTUP: adbmendd {} starting ({:?} mode)", VERSION, cli.command);

    // PHASE 4: configuration
    let config_path = cli
        .config_path
        .clone()
        .unwrap_or_else(AdbmendConfig::default_path);
    let mut config = AdbmendConfig::load(&config_path)
        .map_err(|e| anyhow::anyhow!("loading config from {}: {}", config_path.display(), e))?;
    if let Some(secs) = cli.interval_override {
        config.reconcile.interval_secs = secs;
    }
    info!("STARTUP: config loaded from {}", config_path.display());

    check_privileges();

    // PHASE 5: directory store client
    let store = Arc::new(
        HttpDirectoryStore::new(&config.directory)
            .map_err(|e| anyhow::anyhow!("building directory store client: {}", e))?,
    );

    // One-shot maintenance commands exit before any daemon machinery
    match cli.command {
        Command::Cleanup => {
            let report = maintenance::run_cleanup(&config, store)
                .map_err(|e| anyhow::anyhow!("cleanup failed: {}", e))?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(());
        }
        Command::Annotate => {
            let report = maintenance::run_annotate(&config, store)
                .map_err(|e| anyhow::anyhow!("annotation failed: {}", e))?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(());
        }
        Command::Run | Command::Once => {}
    }

    // PHASE 6: shutdown signal handling
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("SIGNAL: shutdown requested");
        shutdown_flag.store(true, Ordering::SeqCst);
    }) {
        warn!("Failed to set signal handler: {}. Shutdown via signals may not work cleanly.", e);
    }

    let interval = config.reconcile.interval();
    let reconciler = reconciler::Reconciler::new(config, store, shutdown.clone())
        .map_err(|e| anyhow::anyhow!("initializing reconciler: {}", e))?;

    match cli.command {
        Command::Once => {
            let summary = reconciler.run_once().await;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            if summary.skipped {
                error!("pass skipped: {}", summary.skip_reason.as_deref().unwrap_or("unknown"));
                std::process::exit(1);
            }
        }
        Command::Run => {
            // PHASE 7: PID file, only the long-running mode claims it
            if let Err(e) = write_pid_file() {
                error!("Could not write PID file: {}", e);
                std::process::exit(1);
            }
            info!("STARTUP: PID: {}", std::process::id());

            run_loop(reconciler, interval, shutdown).await;

            remove_pid_file();
            info!("SHUTDOWN: daemon terminated gracefully");
        }
        Command::Cleanup | Command::Annotate => unreachable!("handled above"),
    }

    Ok(())
}
