// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon startup and initialization logic.

use std::io::Write;

use fs2::FileExt;
use jobd_core::SystemClock;
use tokio::net::UnixListener;
use tracing::info;

use crate::daemon::Daemon;

use super::{Config, LifecycleError};

/// Result of daemon startup.
pub struct StartupResult {
    /// The daemon record; owns the registry, stores, and pidfile lock.
    pub daemon: Daemon<SystemClock>,
    /// The bound control socket, polled by the main loop.
    pub listener: UnixListener,
}

/// Start the daemon: directories, pidfile lock, control socket, first scan.
pub fn startup(config: &Config) -> Result<StartupResult, LifecycleError> {
    match startup_inner(config) {
        Ok(result) => Ok(result),
        Err(e) => {
            // Don't clean up if we failed to acquire the lock —
            // those files belong to the already-running daemon.
            if !matches!(e, LifecycleError::LockFailed(_)) {
                cleanup_on_failure(config);
            }
            Err(e)
        }
    }
}

fn startup_inner(config: &Config) -> Result<StartupResult, LifecycleError> {
    // 1. Create directories (stores create their own subdirectories)
    for dir in [&config.runtime_dir, &config.data_dir, &config.spool_dir] {
        std::fs::create_dir_all(dir)?;
    }
    for file in [&config.socket_path, &config.pid_path, &config.log_path] {
        if let Some(parent) = file.parent() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // 2. Acquire the pidfile lock FIRST - prevents races.
    // Open without truncating so a failed lock attempt doesn't wipe the
    // running daemon's pid.
    let lock_file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&config.pid_path)?;
    lock_file.try_lock_exclusive().map_err(LifecycleError::LockFailed)?;

    // Write pid now that we hold the lock
    let mut lock_file = lock_file;
    lock_file.set_len(0)?;
    writeln!(lock_file, "{}", std::process::id())?;
    let lock_file = lock_file;

    // 3. Bind the control socket. A stale path is removed up front; a racing
    // EADDRINUSE gets one unlink + retry.
    if config.socket_path.exists() {
        std::fs::remove_file(&config.socket_path)?;
    }
    let listener = match UnixListener::bind(&config.socket_path) {
        Ok(listener) => listener,
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            let _ = std::fs::remove_file(&config.socket_path);
            UnixListener::bind(&config.socket_path)
                .map_err(|e| LifecycleError::BindFailed(config.socket_path.clone(), e))?
        }
        Err(e) => return Err(LifecycleError::BindFailed(config.socket_path.clone(), e)),
    };

    // 4. Build the daemon record and load the spool
    let mut daemon = Daemon::new(config.clone(), SystemClock, Some(lock_file));
    daemon.rescan();

    info!(jobs = daemon.registry.len(), "daemon started");

    Ok(StartupResult { daemon, listener })
}

/// Clean up resources on startup failure
fn cleanup_on_failure(config: &Config) {
    if config.socket_path.exists() {
        let _ = std::fs::remove_file(&config.socket_path);
    }
    if config.pid_path.exists() {
        let _ = std::fs::remove_file(&config.pid_path);
    }
}

#[cfg(test)]
#[path = "startup_tests.rs"]
mod tests;
