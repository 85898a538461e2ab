// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon crate.

use std::path::PathBuf;
use std::time::Duration;

/// Whether the daemon runs with root privileges.
pub fn is_root() -> bool {
    nix::unistd::Uid::effective().is_root()
}

/// Override for every daemon path at once: socket, pidfile, spool, stores,
/// and log all live under this directory. Primarily for tests and sandboxes.
pub fn state_dir_override() -> Option<PathBuf> {
    std::env::var_os("JOBD_STATE_DIR").map(PathBuf::from)
}

/// Control socket override.
pub fn socket_override() -> Option<PathBuf> {
    std::env::var_os("JOBD_SOCKET").map(PathBuf::from)
}

/// Spool directory override.
pub fn spool_override() -> Option<PathBuf> {
    std::env::var_os("JOBD_SPOOL_DIR").map(PathBuf::from)
}

/// Default IPC timeout (per framed read/write on the control socket).
pub fn ipc_timeout() -> Duration {
    std::env::var("JOBD_IPC_TIMEOUT_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(5))
}

/// Wall-clock budget for the graceful shutdown sequence (default 300 s).
pub fn shutdown_timeout() -> Duration {
    std::env::var("JOBD_SHUTDOWN_TIMEOUT_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(300))
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
