// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job state machine and persistent properties.

use crate::label::Label;
use crate::manifest::Manifest;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;

/// Lifecycle state of a job.
///
/// `pid != 0` exactly when the state is Starting, Running, Stopping, or
/// Killed. `Error` is terminal until an explicit `clear`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Unknown,
    /// Manifest parsed, resources not yet acquired.
    Defined,
    /// Eligible for scheduling when enabled and not faulted.
    Loaded,
    /// Waiting for a timer (interval or calendar) to fire.
    Waiting,
    Starting,
    Running,
    /// SIGTERM sent, waiting for the reaper.
    Stopping,
    Stopped,
    /// Unloaded while running; removed from the registry on reap.
    Killed,
    Exited,
    Error,
}

crate::simple_display! {
    JobState {
        Unknown => "unknown",
        Defined => "defined",
        Loaded => "loaded",
        Waiting => "waiting",
        Starting => "starting",
        Running => "running",
        Stopping => "stopping",
        Stopped => "stopped",
        Killed => "killed",
        Exited => "exited",
        Error => "error",
    }
}

/// Persistent health classification, independent of the runtime state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultState {
    #[default]
    None,
    /// Reserved for future use.
    Degraded,
    Offline,
}

crate::simple_display! {
    FaultState {
        None => "none",
        Degraded => "degraded",
        Offline => "offline",
    }
}

/// Durable per-job properties, persisted across daemon restarts and reboots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Properties {
    pub enabled: bool,
    pub fault_state: FaultState,
    pub fault_message: Option<String>,
    /// User-defined custom properties.
    pub custom: BTreeMap<String, String>,
}

impl Default for Properties {
    fn default() -> Self {
        Self {
            enabled: true,
            fault_state: FaultState::None,
            fault_message: None,
            custom: BTreeMap::new(),
        }
    }
}

/// A supervised job.
///
/// The registry exclusively owns every `Job`; everything else refers to jobs
/// by label. Scheduling timestamps are monotonic instants.
#[derive(Debug, Clone)]
pub struct Job {
    pub label: Label,
    pub manifest: Manifest,

    pub state: JobState,
    /// Child pid; 0 when no process exists.
    pub pid: i32,
    /// Exit code of the last run, or -1 when the child was signaled.
    pub last_exit_status: i32,
    /// Signal that terminated the last run, or 0 on normal exit.
    pub term_signal: i32,
    /// Next periodic or calendar launch.
    pub next_scheduled_start: Option<Instant>,
    /// Earliest instant a KeepAlive relaunch may happen.
    pub restart_after: Option<Instant>,
    /// Relaunch as soon as the current process is reaped.
    pub pending_restart: bool,
    /// Remove from the registry when the current process is reaped.
    pub pending_removal: bool,

    pub properties: Properties,
}

impl Job {
    /// Create a freshly parsed job in the `Defined` state.
    ///
    /// The manifest's `enable` default seeds the persistent property; a
    /// previously stored property document overrides it at load time.
    pub fn new(label: Label, manifest: Manifest) -> Self {
        let properties = Properties { enabled: manifest.enable, ..Default::default() };
        Self {
            label,
            manifest,
            state: JobState::Defined,
            pid: 0,
            last_exit_status: 0,
            term_signal: 0,
            next_scheduled_start: None,
            restart_after: None,
            pending_restart: false,
            pending_removal: false,
            properties,
        }
    }

    /// Whether a child process currently exists for this job.
    pub fn has_process(&self) -> bool {
        matches!(
            self.state,
            JobState::Starting | JobState::Running | JobState::Stopping | JobState::Killed
        )
    }

    /// `pid != 0` must hold exactly when a process exists.
    pub fn pid_state_consistent(&self) -> bool {
        (self.pid != 0) == self.has_process()
    }

    pub fn is_faulted(&self) -> bool {
        self.properties.fault_state != FaultState::None
    }

    /// Eligible for scheduling: enabled and not faulted.
    pub fn runnable(&self) -> bool {
        self.properties.enabled && !self.is_faulted()
    }

    /// Whether `start` may launch a process from the current state.
    pub fn startable(&self) -> bool {
        matches!(
            self.state,
            JobState::Loaded | JobState::Stopped | JobState::Exited | JobState::Waiting
        )
    }

    /// Record an unexpected-death fault. Persisted by the caller.
    pub fn mark_offline(&mut self, message: impl Into<String>) {
        self.properties.fault_state = FaultState::Offline;
        self.properties.fault_message = Some(message.into());
    }

    /// Reset fault state; an `Error` job returns to `Loaded`.
    pub fn clear_fault(&mut self) {
        self.properties.fault_state = FaultState::None;
        self.properties.fault_message = None;
        if self.state == JobState::Error {
            self.state = JobState::Loaded;
        }
    }

    /// Earliest pending wake time, if any schedule is armed.
    pub fn next_wake(&self) -> Option<Instant> {
        match (self.restart_after, self.next_scheduled_start) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }

    /// Whether an armed schedule is due at `now`.
    pub fn due(&self, now: Instant) -> bool {
        self.next_wake().is_some_and(|wake| wake <= now)
    }

    /// Drop any armed schedule.
    pub fn clear_schedule(&mut self) {
        self.restart_after = None;
        self.next_scheduled_start = None;
    }
}

crate::builder! {
    pub struct JobBuilder => Job {
        into {
            label: Label = "test-job",
        }
        set {
            manifest: Manifest = crate::manifest::test_manifest(),
            state: JobState = JobState::Loaded,
            pid: i32 = 0,
            last_exit_status: i32 = 0,
            term_signal: i32 = 0,
            pending_restart: bool = false,
            pending_removal: bool = false,
            properties: Properties = Properties::default(),
        }
        option {
            next_scheduled_start: Instant = None,
            restart_after: Instant = None,
        }
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
