// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! jobd: declarative job supervisor.
//!
//! Single-threaded event loop multiplexing the control socket, signal
//! streams, the supervisor timer, and the spool watch. All job state lives
//! in one [`Daemon`] record owned by this loop; handlers run to completion
//! between `select!` arms, so there is no locking anywhere.

use std::time::Duration;

use jobd_core::SystemClock;
use jobd_daemon::{env, lifecycle, listener, watcher, Config, Daemon, LifecycleError};
use tokio::signal::unix::{signal, Signal, SignalKind};
use tracing::{debug, error, info, warn};

/// Why the main loop ended.
#[derive(Clone, Copy, PartialEq)]
enum ExitReason {
    /// SIGTERM: graceful shutdown, exit 0.
    Term,
    /// SIGINT: graceful shutdown, non-zero exit.
    Int,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Handle info flags before any config/lock acquisition
    if let Some(arg) = std::env::args().nth(1) {
        match arg.as_str() {
            "--version" | "-V" | "-v" => {
                println!("jobd {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" | "-h" | "help" => {
                println!("jobd {}", env!("CARGO_PKG_VERSION"));
                println!("Declarative job supervisor daemon");
                println!();
                println!("USAGE:");
                println!("    jobd");
                println!();
                println!("Runs in the foreground, loads manifests from the spool directory,");
                println!("and answers JSON-RPC requests on the control socket. Signals:");
                println!("SIGHUP rescans the spool, SIGTERM/SIGINT shut down.");
                println!();
                println!("OPTIONS:");
                println!("    -h, --help       Print help information");
                println!("    -v, --version    Print version information");
                return Ok(());
            }
            _ => {
                eprintln!("error: unexpected argument '{arg}'");
                eprintln!("Usage: jobd [--help | --version]");
                std::process::exit(1);
            }
        }
    }

    let config = Config::load()?;

    // Rotate the log if it has grown too large, then mark this startup
    // attempt before tracing is up so early failures are findable.
    rotate_log_if_needed(&config.log_path);
    write_startup_marker(&config)?;
    let log_guard = setup_logging(&config)?;

    info!("starting jobd");

    let lifecycle::StartupResult { mut daemon, listener: unix_listener } =
        match lifecycle::startup(&config) {
            Ok(result) => result,
            Err(LifecycleError::LockFailed(_)) => {
                let pid = std::fs::read_to_string(&config.pid_path)
                    .unwrap_or_default()
                    .trim()
                    .to_string();
                eprintln!("jobd is already running");
                if !pid.is_empty() {
                    eprintln!("  pid: {pid}");
                }
                std::process::exit(1);
            }
            Err(e) => {
                // Write the error synchronously; the non-blocking tracing
                // writer may not flush before the process exits.
                write_startup_error(&config, &e);
                error!("failed to start daemon: {e}");
                drop(log_guard);
                return Err(e.into());
            }
        };

    let mut sigchld = signal(SignalKind::child())?;
    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigalrm = signal(SignalKind::alarm())?;

    // Spool watch, coalesced through a capacity-1 channel. SIGHUP remains
    // the fallback when the watch cannot start. The extra sender keeps the
    // channel open if the watcher fails.
    let (watch_tx, mut watch_rx) = tokio::sync::mpsc::channel(1);
    let _watch_guard = watch_tx.clone();
    let _watcher = match watcher::spawn(&config.spool_dir, watch_tx) {
        Ok(w) => Some(w),
        Err(e) => {
            warn!(error = %e, "spool watch unavailable, relying on SIGHUP");
            None
        }
    };

    // Launch whatever the first scan made eligible.
    daemon.tick();

    info!(socket = %config.socket_path.display(), "daemon ready");
    println!("READY");

    let reason = loop {
        // Exactly one timer, armed for the soonest wake across all
        // restart-pending and interval jobs. Recomputed every iteration,
        // with an idle fallback so the arm always has a deadline.
        let deadline = daemon
            .next_wake()
            .map(tokio::time::Instant::from)
            .unwrap_or_else(|| tokio::time::Instant::now() + Duration::from_secs(3600));

        tokio::select! {
            result = unix_listener.accept() => {
                match result {
                    Ok((stream, _)) => listener::serve_unix(stream, &mut daemon).await,
                    Err(e) => error!(error = %e, "accept failed"),
                }
            }

            _ = sigchld.recv() => daemon.reap_children(),

            _ = sighup.recv() => {
                info!("SIGHUP: rescanning spool");
                daemon.rescan();
            }

            Some(()) = watch_rx.recv() => {
                debug!("spool changed, rescanning");
                daemon.rescan();
            }

            _ = sigterm.recv() => break ExitReason::Term,

            _ = sigint.recv() => break ExitReason::Int,

            _ = sigalrm.recv() => {
                debug!("SIGALRM outside shutdown, ignored");
            }

            _ = tokio::time::sleep_until(deadline) => {}
        }

        // Handlers only mutate state; every launch decision happens here.
        daemon.tick();
    };

    info!(
        "{} received, shutting down",
        if reason == ExitReason::Term { "SIGTERM" } else { "SIGINT" }
    );
    shutdown(&mut daemon, &mut sigchld, &mut sigalrm).await;
    daemon.cleanup();
    info!("jobd stopped");
    drop(log_guard);

    if reason == ExitReason::Int {
        std::process::exit(1);
    }
    Ok(())
}

/// Graceful shutdown: SIGTERM every running job, wait for reaps within the
/// configured budget, then escalate to SIGKILL and wait for those reaps.
async fn shutdown(daemon: &mut Daemon<SystemClock>, sigchld: &mut Signal, sigalrm: &mut Signal) {
    daemon.begin_shutdown();
    daemon.reap_children();
    if daemon.jobs_with_processes() == 0 {
        return;
    }

    let deadline = tokio::time::Instant::now() + env::shutdown_timeout();
    loop {
        tokio::select! {
            _ = sigchld.recv() => {
                daemon.reap_children();
                if daemon.jobs_with_processes() == 0 {
                    return;
                }
            }
            _ = sigalrm.recv() => {
                warn!("shutdown timeout signaled");
                break;
            }
            _ = tokio::time::sleep_until(deadline) => {
                warn!("shutdown timed out");
                break;
            }
        }
    }

    daemon.kill_remaining();
    let kill_deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while daemon.jobs_with_processes() > 0 {
        tokio::select! {
            _ = sigchld.recv() => daemon.reap_children(),
            _ = tokio::time::sleep_until(kill_deadline) => {
                warn!("jobs left unreaped after SIGKILL");
                break;
            }
        }
    }
}

/// Maximum log file size before rotation (10 MB).
const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Number of rotated log files to keep (daemon.log.1, .2, .3).
const MAX_ROTATED_LOGS: u32 = 3;

/// Rotate the daemon log file if it exceeds [`MAX_LOG_SIZE`].
///
/// Shifts `daemon.log` → `daemon.log.1` → `daemon.log.2` → `daemon.log.3`,
/// deleting the oldest. Best-effort: rotation failures are silently ignored
/// so the daemon still starts.
fn rotate_log_if_needed(log_path: &std::path::Path) {
    let size = match std::fs::metadata(log_path) {
        Ok(m) => m.len(),
        Err(_) => return,
    };

    if size < MAX_LOG_SIZE {
        return;
    }

    let log_str = log_path.display().to_string();

    for i in (1..MAX_ROTATED_LOGS).rev() {
        let from = format!("{log_str}.{i}");
        let to = format!("{log_str}.{}", i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    let _ = std::fs::rename(log_path, format!("{log_str}.1"));
}

/// Startup marker prefix written to the log before anything else.
const STARTUP_MARKER_PREFIX: &str = "--- jobd: starting (pid: ";

/// Write the startup marker (appends to the existing log).
fn write_startup_marker(config: &Config) -> Result<(), LifecycleError> {
    use std::io::Write;

    if let Some(parent) = config.log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.log_path)?;
    writeln!(file, "{}{}) ---\n", STARTUP_MARKER_PREFIX, std::process::id())?;

    Ok(())
}

/// Write a startup error synchronously so it is visible even if the process
/// exits before the non-blocking writer flushes.
fn write_startup_error(config: &Config, error: &LifecycleError) {
    use std::io::Write;

    let Ok(mut file) =
        std::fs::OpenOptions::new().create(true).append(true).open(&config.log_path)
    else {
        return;
    };
    let _ = writeln!(file, "ERROR failed to start daemon: {error}");
}

fn setup_logging(
    config: &Config,
) -> Result<tracing_appender::non_blocking::WorkerGuard, LifecycleError> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let parent = config.log_path.parent().ok_or(LifecycleError::NoHomeDir)?;
    std::fs::create_dir_all(parent)?;

    let file_appender = tracing_appender::rolling::never(
        parent,
        config.log_path.file_name().ok_or(LifecycleError::NoHomeDir)?,
    );
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking))
        .init();

    Ok(guard)
}
