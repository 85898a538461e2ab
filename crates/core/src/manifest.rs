// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Declarative job manifests.
//!
//! A manifest describes a job's program, execution context, and supervision
//! policy. Manifests are read from `*.json` or `*.toml` spool files; the file
//! stem is the default label when the manifest omits one.

use crate::calendar::{CalendarError, CalendarInterval};
use crate::label::{Label, LabelError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// In-memory manifest shape.
///
/// Defaults follow the original spool-file conventions: jobs are enabled,
/// run as the daemon's identity from `/`, with stdio on `/dev/null` and a
/// `0077` umask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Manifest {
    pub label: Option<Label>,
    pub title: Option<String>,
    pub description: Option<String>,

    /// Command string, split on whitespace when `argv` is absent.
    pub command: Option<String>,
    pub argv: Vec<String>,
    /// Environment as `KEY=value` pairs.
    pub environment: Vec<String>,
    pub working_directory: String,
    /// Chroot target; `/` means no chroot.
    pub root_directory: String,
    pub user_name: Option<String>,
    pub group_name: Option<String>,
    /// Octal umask string.
    pub umask: String,
    pub stdin_path: String,
    pub stdout_path: String,
    pub stderr_path: String,
    pub nice: i32,

    pub keep_alive: bool,
    /// Minimum seconds between successive restarts of the same job.
    pub throttle_interval: u32,
    /// Periodic relaunch cadence in seconds; 0 disables.
    pub start_interval: u32,
    pub calendar_interval: Option<CalendarInterval>,

    pub init_groups: bool,
    pub enable: bool,

    /// Labels this job must precede.
    pub before: Vec<String>,
    /// Labels this job must follow.
    pub after: Vec<String>,

    /// Named sub-command scripts.
    pub methods: BTreeMap<String, String>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            label: None,
            title: None,
            description: None,
            command: None,
            argv: Vec::new(),
            environment: Vec::new(),
            working_directory: "/".to_string(),
            root_directory: "/".to_string(),
            user_name: None,
            group_name: None,
            umask: "0077".to_string(),
            stdin_path: "/dev/null".to_string(),
            stdout_path: "/dev/null".to_string(),
            stderr_path: "/dev/null".to_string(),
            nice: 0,
            keep_alive: false,
            throttle_interval: 10,
            start_interval: 0,
            calendar_interval: None,
            init_groups: true,
            enable: true,
            before: Vec::new(),
            after: Vec::new(),
            methods: BTreeMap::new(),
        }
    }
}

/// Manifest load and validation errors.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported manifest extension (expected .json or .toml): {0}")]
    UnsupportedFormat(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("manifest defines neither argv nor command")]
    MissingProgram,

    #[error("environment entry '{0}' is not KEY=value")]
    BadEnvironment(String),

    #[error("umask '{0}' is not an octal mode")]
    BadUmask(String),

    #[error(transparent)]
    Label(#[from] LabelError),

    #[error(transparent)]
    Calendar(#[from] CalendarError),
}

impl Manifest {
    /// Read and validate a manifest file, dispatching on extension.
    pub fn from_path(path: &Path) -> Result<Self, ManifestError> {
        let text = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
        let manifest: Manifest = match ext {
            "json" => serde_json::from_str(&text).map_err(|e| ManifestError::Parse(e.to_string()))?,
            "toml" => toml::from_str(&text).map_err(|e| ManifestError::Parse(e.to_string()))?,
            other => return Err(ManifestError::UnsupportedFormat(other.to_string())),
        };
        manifest.validated()
    }

    /// Validate program, environment, umask, and calendar fields.
    pub fn validated(mut self) -> Result<Self, ManifestError> {
        if self.argv.is_empty() && self.command.as_deref().map_or(true, |c| c.trim().is_empty()) {
            return Err(ManifestError::MissingProgram);
        }
        for entry in &self.environment {
            let valid = entry.split_once('=').is_some_and(|(k, _)| !k.is_empty());
            if !valid {
                return Err(ManifestError::BadEnvironment(entry.clone()));
            }
        }
        self.umask_mode()?;
        if let Some(cal) = self.calendar_interval.take() {
            self.calendar_interval = Some(cal.validated()?);
        }
        Ok(self)
    }

    /// The label declared in the manifest, or the file stem as fallback.
    pub fn effective_label(&self, path: &Path) -> Result<Label, ManifestError> {
        if let Some(label) = &self.label {
            return Ok(label.clone());
        }
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        Ok(Label::new(stem)?)
    }

    /// The argument vector to exec: `argv` as given, or `command` split on
    /// whitespace.
    pub fn exec_argv(&self) -> Vec<String> {
        if !self.argv.is_empty() {
            return self.argv.clone();
        }
        self.command
            .as_deref()
            .unwrap_or_default()
            .split_whitespace()
            .map(str::to_string)
            .collect()
    }

    /// Parsed octal umask.
    pub fn umask_mode(&self) -> Result<u32, ManifestError> {
        u32::from_str_radix(self.umask.trim_start_matches("0o"), 8)
            .map_err(|_| ManifestError::BadUmask(self.umask.clone()))
    }

    /// Whether the supervisor expects this job to stay running once started.
    ///
    /// Periodic and calendar jobs are expected to exit; everything else is a
    /// daemon.
    pub fn expects_to_run_forever(&self) -> bool {
        self.keep_alive || (self.start_interval == 0 && self.calendar_interval.is_none())
    }
}

/// Minimal valid manifest for test fixtures.
#[cfg(any(test, feature = "test-support"))]
pub fn test_manifest() -> Manifest {
    Manifest { command: Some("/bin/true".to_string()), ..Default::default() }
}

#[cfg(test)]
#[path = "manifest_tests.rs"]
mod tests;
