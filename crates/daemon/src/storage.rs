// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persistent per-job documents.
//!
//! Two JSON documents per label, truncated and rewritten on every change.
//! Only the daemon writes, so last-writer-wins needs no locking.
//!
//! - property documents (durable, survive reboot): enabled flag, fault state,
//!   custom properties
//! - status documents (runtime directory): pid and exit disposition

use jobd_core::Properties;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Transient runtime status, rewritten on every transition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusDoc {
    pub pid: i32,
    pub last_exit_status: i32,
    pub term_signal: i32,
}

/// Durable property documents under `<data_dir>/property/`.
#[derive(Debug, Clone)]
pub struct PropertyStore {
    dir: PathBuf,
}

impl PropertyStore {
    pub fn new(data_dir: &Path) -> Self {
        Self { dir: data_dir.join("property") }
    }

    fn path(&self, label: &str) -> PathBuf {
        self.dir.join(format!("{label}.json"))
    }

    /// Load the stored properties for a label, if any.
    ///
    /// A corrupt document is logged and treated as absent; the manifest
    /// defaults then apply.
    pub fn load(&self, label: &str) -> Option<Properties> {
        let path = self.path(label);
        let text = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&text) {
            Ok(props) => Some(props),
            Err(e) => {
                warn!(label, path = %path.display(), error = %e, "unreadable property document");
                None
            }
        }
    }

    pub fn save(&self, label: &str, props: &Properties) -> io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let body = serde_json::to_vec_pretty(props)?;
        std::fs::write(self.path(label), body)
    }
}

/// Transient status documents under `<runtime_dir>/status/`.
#[derive(Debug, Clone)]
pub struct StatusStore {
    dir: PathBuf,
}

impl StatusStore {
    pub fn new(runtime_dir: &Path) -> Self {
        Self { dir: runtime_dir.join("status") }
    }

    fn path(&self, label: &str) -> PathBuf {
        self.dir.join(format!("{label}.json"))
    }

    pub fn load(&self, label: &str) -> Option<StatusDoc> {
        let text = std::fs::read_to_string(self.path(label)).ok()?;
        serde_json::from_str(&text).ok()
    }

    pub fn save(&self, label: &str, status: &StatusDoc) -> io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let body = serde_json::to_vec_pretty(status)?;
        std::fs::write(self.path(label), body)
    }

    /// Remove the status document when a job leaves the registry.
    pub fn remove(&self, label: &str) {
        let _ = std::fs::remove_file(self.path(label));
    }
}

#[cfg(test)]
#[path = "storage_tests.rs"]
mod tests;
