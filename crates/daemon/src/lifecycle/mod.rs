// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle management: configuration, startup, shutdown cleanup.

mod startup;
pub use startup::{startup, StartupResult};

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::env;

/// Daemon configuration: every path the daemon touches.
#[derive(Debug, Clone)]
pub struct Config {
    /// Control socket.
    pub socket_path: PathBuf,
    /// Advisory pidfile.
    pub pid_path: PathBuf,
    /// Watched manifest directory.
    pub spool_dir: PathBuf,
    /// Durable store root (`property/` documents live here).
    pub data_dir: PathBuf,
    /// Runtime store root (`status/` documents live here).
    pub runtime_dir: PathBuf,
    /// Daemon log file.
    pub log_path: PathBuf,
}

impl Config {
    /// Resolve paths for this invocation.
    ///
    /// `JOBD_STATE_DIR` collapses everything under one directory; otherwise
    /// root daemons use the system locations and unprivileged daemons follow
    /// XDG, falling back to dotfiles in `$HOME`. `JOBD_SOCKET` and
    /// `JOBD_SPOOL_DIR` override their single path afterwards.
    pub fn load() -> Result<Self, LifecycleError> {
        let mut config = match env::state_dir_override() {
            Some(base) => Self::from_state_dir(&base),
            None if env::is_root() => Self::system(),
            None => Self::user()?,
        };
        if let Some(socket) = env::socket_override() {
            config.socket_path = socket;
        }
        if let Some(spool) = env::spool_override() {
            config.spool_dir = spool;
        }
        Ok(config)
    }

    /// Everything under one base directory.
    pub fn from_state_dir(base: &Path) -> Self {
        Self {
            socket_path: base.join("jobd.sock"),
            pid_path: base.join("jobd.pid"),
            spool_dir: base.join("job.d"),
            data_dir: base.join("data"),
            runtime_dir: base.join("run"),
            log_path: base.join("daemon.log"),
        }
    }

    fn system() -> Self {
        Self {
            socket_path: PathBuf::from("/var/run/jobd.sock"),
            pid_path: PathBuf::from("/var/run/jobd.pid"),
            spool_dir: PathBuf::from("/etc/job.d"),
            data_dir: PathBuf::from("/var/db/jobd"),
            runtime_dir: PathBuf::from("/var/run/jobd"),
            log_path: PathBuf::from("/var/log/jobd.log"),
        }
    }

    fn user() -> Result<Self, LifecycleError> {
        let home = dirs::home_dir().ok_or(LifecycleError::NoHomeDir)?;
        let state = dirs::state_dir().unwrap_or_else(|| home.join(".local/state")).join("jobd");

        let (socket_path, pid_path, runtime_dir) = match dirs::runtime_dir() {
            Some(rt) => {
                let rt = rt.join("jobd");
                (rt.join("jobd.sock"), rt.join("jobd.pid"), rt)
            }
            None => (home.join(".jobd.sock"), home.join(".jobd.pid"), state.join("run")),
        };

        Ok(Self {
            socket_path,
            pid_path,
            runtime_dir,
            spool_dir: dirs::config_dir().unwrap_or_else(|| home.join(".config")).join("job.d"),
            data_dir: dirs::data_dir()
                .unwrap_or_else(|| home.join(".local/share"))
                .join("jobd"),
            log_path: state.join("daemon.log"),
        })
    }
}

/// Lifecycle errors. All of these are fatal to initialization.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("could not determine home directory")]
    NoHomeDir,

    #[error("failed to acquire pidfile lock: jobd already running?")]
    LockFailed(#[source] std::io::Error),

    #[error("failed to bind socket at {0}: {1}")]
    BindFailed(PathBuf, std::io::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
