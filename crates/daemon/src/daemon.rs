// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The daemon record: single owner of the registry, supervisor, and stores.
//!
//! The main loop constructs one `Daemon` and drives it between `select!`
//! arms; every handler here runs to completion on the loop thread, so no
//! locking exists anywhere in the process.

use std::fs::File;
use std::path::Path;
use std::time::{Duration, Instant};

use chrono::{Local, Timelike};
use jobd_core::{Clock, ControlError, JobState, Manifest, SyscallKind};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::engine::{launch, ChildExit, ReapOutcome, Supervisor, EXEC_FAILED_STATUS};
use crate::lifecycle::Config;
use crate::protocol::{codes, RpcError, RpcRequest, RpcResponse};
use crate::registry::{JobRegistry, Unloaded};
use crate::storage::{PropertyStore, StatusDoc, StatusStore};

/// Process-wide daemon state.
pub struct Daemon<C: Clock> {
    pub config: Config,
    pub registry: JobRegistry,
    pub supervisor: Supervisor<C>,
    pub properties: PropertyStore,
    pub statuses: StatusStore,
    /// Topological start order from the last resolve; RPC-loaded jobs are
    /// appended until the next rescan rebuilds it.
    start_order: Vec<String>,
    pub shutting_down: bool,
    // NOTE(lifetime): held to maintain the exclusive pidfile lock; released on drop
    #[allow(dead_code)]
    lock_file: Option<File>,
}

impl<C: Clock> Daemon<C> {
    pub fn new(config: Config, clock: C, lock_file: Option<File>) -> Self {
        Self {
            properties: PropertyStore::new(&config.data_dir),
            statuses: StatusStore::new(&config.runtime_dir),
            registry: JobRegistry::new(),
            supervisor: Supervisor::new(clock),
            start_order: Vec::new(),
            shutting_down: false,
            lock_file,
            config,
        }
    }

    // ---- RPC dispatch ----------------------------------------------------

    /// Dispatch one validated request and build the response.
    pub fn dispatch(&mut self, req: &RpcRequest) -> RpcResponse {
        let result = self.dispatch_inner(req);
        match result {
            Ok(value) => RpcResponse::ok(req.id.clone(), value),
            Err(error) => RpcResponse::fail(Some(req.id.clone()), error),
        }
    }

    fn dispatch_inner(&mut self, req: &RpcRequest) -> Result<Value, RpcError> {
        match req.method.as_str() {
            "list" => {
                req.no_params()?;
                Ok(self.rpc_list())
            }
            "load" => {
                let path = req.single_str_param("path")?;
                Ok(self.rpc_load(path)?)
            }
            "unload" => {
                let label = req.single_str_param("label")?;
                Ok(self.rpc_unload(label)?)
            }
            "enable" => {
                let label = req.single_str_param("label")?;
                Ok(self.rpc_enable(label)?)
            }
            "disable" => {
                let label = req.single_str_param("label")?;
                Ok(self.rpc_disable(label)?)
            }
            "start" => {
                let label = req.single_str_param("label")?;
                Ok(self.rpc_start(label)?)
            }
            "stop" => {
                let label = req.single_str_param("label")?;
                Ok(self.rpc_stop(label)?)
            }
            "restart" => {
                let label = req.single_str_param("label")?;
                Ok(self.rpc_restart(label)?)
            }
            "clear" => {
                let label = req.single_str_param("label")?;
                Ok(self.rpc_clear(label)?)
            }
            other => Err(RpcError {
                code: codes::METHOD_NOT_FOUND,
                message: format!("unknown method '{other}'"),
            }),
        }
    }

    fn rpc_list(&self) -> Value {
        let mut map = Map::new();
        for job in self.registry.list() {
            map.insert(
                job.label.to_string(),
                json!({
                    "pid": job.pid,
                    "state": job.state.to_string(),
                    "enabled": job.properties.enabled,
                    "fault_state": job.properties.fault_state.to_string(),
                }),
            );
        }
        Value::Object(map)
    }

    fn rpc_load(&mut self, path_str: &str) -> Result<Value, ControlError> {
        let path = Path::new(path_str);
        if !path.is_absolute() {
            return Err(ControlError::InvalidManifest("manifest path must be absolute".into()));
        }
        let manifest = Manifest::from_path(path)
            .map_err(|e| ControlError::InvalidManifest(e.to_string()))?;
        let label = manifest
            .effective_label(path)
            .map_err(|e| ControlError::InvalidManifest(e.to_string()))?;

        self.install(label, manifest)?;
        Ok(json!({}))
    }

    fn rpc_unload(&mut self, label: &str) -> Result<Value, ControlError> {
        match self.registry.unload(label)? {
            Unloaded::Removed(job) => {
                self.statuses.remove(label);
                info!(label = %job.label, "job unloaded");
            }
            Unloaded::KillRequested { pid } => {
                info!(label, pid, "job unload deferred until reap");
                if let Err(e) = send_signal(pid, Signal::SIGTERM) {
                    warn!(label, pid, error = %e, "SIGTERM for unload failed");
                }
            }
        }
        Ok(json!({}))
    }

    fn rpc_enable(&mut self, label: &str) -> Result<Value, ControlError> {
        {
            let job = self
                .registry
                .lookup_mut(label)
                .ok_or_else(|| ControlError::NotFound(label.to_string()))?;
            if job.properties.enabled {
                return Err(ControlError::AlreadyEnabled(label.to_string()));
            }
            job.properties.enabled = true;
        }
        self.persist_properties_of(label);
        info!(label, "job enabled");
        // A runnable Loaded job is started by the next tick.
        Ok(json!({}))
    }

    fn rpc_disable(&mut self, label: &str) -> Result<Value, ControlError> {
        let pid_to_stop = {
            let job = self
                .registry
                .lookup_mut(label)
                .ok_or_else(|| ControlError::NotFound(label.to_string()))?;
            if !job.properties.enabled {
                return Err(ControlError::AlreadyDisabled(label.to_string()));
            }
            job.properties.enabled = false;
            job.clear_schedule();
            if matches!(job.state, JobState::Running | JobState::Starting) {
                job.state = JobState::Stopping;
                Some(job.pid)
            } else {
                None
            }
        };
        self.persist_properties_of(label);
        if let Some(pid) = pid_to_stop {
            info!(label, pid, "stopping disabled job");
            if let Err(e) = send_signal(pid, Signal::SIGTERM) {
                warn!(label, pid, error = %e, "SIGTERM for disable failed");
            }
        }
        info!(label, "job disabled");
        Ok(json!({}))
    }

    fn rpc_start(&mut self, label: &str) -> Result<Value, ControlError> {
        {
            let job = self
                .registry
                .lookup_mut(label)
                .ok_or_else(|| ControlError::NotFound(label.to_string()))?;
            if !job.startable() {
                return Err(ControlError::InvalidState {
                    label: label.to_string(),
                    state: job.state.to_string(),
                });
            }
            // A manual start cancels any armed schedule.
            job.clear_schedule();
        }
        self.start_job(label)?;
        Ok(json!({}))
    }

    fn rpc_stop(&mut self, label: &str) -> Result<Value, ControlError> {
        let pid = {
            let job = self
                .registry
                .lookup_mut(label)
                .ok_or_else(|| ControlError::NotFound(label.to_string()))?;
            if !matches!(job.state, JobState::Running | JobState::Starting) {
                return Err(ControlError::InvalidState {
                    label: label.to_string(),
                    state: job.state.to_string(),
                });
            }
            job.state = JobState::Stopping;
            job.clear_schedule();
            job.pid
        };
        info!(label, pid, "stopping job");
        send_signal(pid, Signal::SIGTERM)?;
        self.persist_status_of(label);
        Ok(json!({}))
    }

    /// Best-effort stop-then-start; always succeeds for a known label.
    fn rpc_restart(&mut self, label: &str) -> Result<Value, ControlError> {
        let pid_to_stop = {
            let job = self
                .registry
                .lookup_mut(label)
                .ok_or_else(|| ControlError::NotFound(label.to_string()))?;
            if job.has_process() {
                if job.pending_removal {
                    return Err(ControlError::InvalidState {
                        label: label.to_string(),
                        state: job.state.to_string(),
                    });
                }
                job.pending_restart = true;
                if matches!(job.state, JobState::Running | JobState::Starting) {
                    job.state = JobState::Stopping;
                    Some(job.pid)
                } else {
                    None
                }
            } else {
                job.clear_schedule();
                None
            }
        };

        match pid_to_stop {
            Some(pid) => {
                info!(label, pid, "restarting job");
                if let Err(e) = send_signal(pid, Signal::SIGTERM) {
                    warn!(label, pid, error = %e, "SIGTERM for restart failed");
                }
                self.persist_status_of(label);
            }
            None => {
                if let Err(e) = self.start_job(label) {
                    warn!(label, error = %e, "restart could not start job");
                }
            }
        }
        Ok(json!({}))
    }

    fn rpc_clear(&mut self, label: &str) -> Result<Value, ControlError> {
        {
            let job = self
                .registry
                .lookup_mut(label)
                .ok_or_else(|| ControlError::NotFound(label.to_string()))?;
            job.clear_fault();
        }
        self.persist_properties_of(label);
        info!(label, "fault state cleared");
        Ok(json!({}))
    }

    // ---- Spool and scheduling --------------------------------------------

    /// Install a job (RPC load path): overlay stored properties, mark it
    /// Loaded, and append it to the start order.
    fn install(&mut self, label: jobd_core::Label, manifest: Manifest) -> Result<(), ControlError> {
        let key = label.as_str().to_string();
        let stored = self.properties.load(&key);
        {
            let job = self.registry.load(label, manifest)?;
            if let Some(props) = stored {
                job.properties = props;
            }
            job.state = JobState::Loaded;
        }
        self.persist_status_of(&key);
        self.start_order.push(key.clone());
        info!(label = %key, "job loaded");
        Ok(())
    }

    /// Rescan the spool directory, reconcile the registry, and re-resolve
    /// the dependency order.
    pub fn rescan(&mut self) {
        debug!(dir = %self.config.spool_dir.display(), "scanning spool");
        let report = self.registry.scan(&self.config.spool_dir);

        for (label, pid) in &report.kill_requested {
            info!(label = %label, pid, "manifest disappeared, stopping job");
            if let Err(e) = send_signal(*pid, Signal::SIGTERM) {
                warn!(label = %label, pid, error = %e, "SIGTERM for unload failed");
            }
        }
        for label in &report.removed {
            info!(label = %label, "job unloaded (manifest removed)");
            self.statuses.remove(label.as_str());
        }
        for label in report.loaded.clone() {
            let stored = self.properties.load(label.as_str());
            if let Some(job) = self.registry.lookup_mut(label.as_str()) {
                if let Some(props) = stored {
                    job.properties = props;
                }
                job.state = JobState::Loaded;
            }
            self.persist_status_of(label.as_str());
            info!(label = %label, "job loaded from spool");
        }

        let resolved = self.registry.resolve_order();
        for label in &resolved.cycle {
            warn!(label = %label, "job is part of a dependency cycle");
        }
        self.start_order = resolved.order.iter().map(|l| l.as_str().to_string()).collect();
    }

    /// Launch everything that is eligible right now: runnable Loaded jobs
    /// (in dependency order) and armed schedules that have come due.
    pub fn tick(&mut self) {
        if self.shutting_down {
            return;
        }
        let now = self.supervisor.clock().now();

        for label in self.start_order.clone() {
            let Some(job) = self.registry.lookup(&label) else { continue };
            let state = job.state;
            let runnable = job.runnable();
            let is_calendar = job.manifest.calendar_interval.is_some();
            let due = job.due(now);
            let armed = job.next_wake().is_some();

            if !runnable {
                // Disabled or faulted jobs keep no armed timers.
                if armed {
                    if let Some(job) = self.registry.lookup_mut(&label) {
                        job.clear_schedule();
                    }
                }
                continue;
            }

            match state {
                JobState::Loaded if is_calendar => self.arm_calendar(&label),
                JobState::Loaded => self.try_start(&label, now),
                JobState::Waiting | JobState::Exited | JobState::Stopped => {
                    if is_calendar {
                        self.calendar_tick(&label, now);
                    } else if due {
                        self.try_start(&label, now);
                    }
                }
                _ => {}
            }
        }

        #[cfg(debug_assertions)]
        self.registry.assert_invariants();
    }

    /// Rebuild the start order from the registry without touching the spool.
    #[cfg(test)]
    pub(crate) fn rescan_order_for_tests(&mut self) {
        let resolved = self.registry.resolve_order();
        self.start_order = resolved.order.iter().map(|l| l.as_str().to_string()).collect();
    }

    /// The soonest armed wake time across all runnable jobs.
    pub fn next_wake(&self) -> Option<Instant> {
        self.registry
            .list()
            .filter(|j| {
                j.runnable()
                    && matches!(j.state, JobState::Waiting | JobState::Exited | JobState::Stopped)
            })
            .filter_map(|j| j.next_wake())
            .min()
    }

    fn try_start(&mut self, label: &str, now: Instant) {
        if let Err(e) = self.start_job(label) {
            warn!(label, error = %e, "launch failed");
            // Push an armed restart back so the failure does not retrigger
            // on every loop event.
            if let Some(job) = self.registry.lookup_mut(label) {
                if job.restart_after.is_some() {
                    let throttle = u64::from(job.manifest.throttle_interval);
                    job.restart_after = Some(now + Duration::from_secs(throttle.max(1)));
                }
            }
        }
    }

    /// Start a job's process. Precondition: `Loaded`, `Stopped`, `Exited`,
    /// or `Waiting`.
    fn start_job(&mut self, label: &str) -> Result<(), ControlError> {
        let job = self
            .registry
            .lookup(label)
            .ok_or_else(|| ControlError::NotFound(label.to_string()))?;
        if !job.startable() {
            return Err(ControlError::InvalidState {
                label: label.to_string(),
                state: job.state.to_string(),
            });
        }

        let pid = launch(job)?;

        let now = self.supervisor.clock().now();
        let registered = {
            let Some(job) = self.registry.lookup_mut(label) else {
                return Err(ControlError::NotFound(label.to_string()));
            };
            job.state = JobState::Running;
            job.pid = pid;
            job.restart_after = None;
            job.next_scheduled_start = if job.manifest.start_interval > 0 {
                Some(now + Duration::from_secs(u64::from(job.manifest.start_interval)))
            } else {
                None
            };
            job.label.clone()
        };
        self.supervisor.register(pid, &registered);
        info!(label, pid, "job started");
        self.persist_status_of(label);
        Ok(())
    }

    /// Arm a calendar job's wake: the next matching minute today, or a
    /// recheck at local midnight when today is already disqualified.
    fn arm_calendar(&mut self, label: &str) {
        let now_local = Local::now();
        let now = self.supervisor.clock().now();
        let Some(job) = self.registry.lookup_mut(label) else { return };
        let delay = {
            let Some(cal) = &job.manifest.calendar_interval else { return };
            match cal.next_today(&now_local) {
                Some(delay) => delay,
                None => seconds_until_midnight(&now_local),
            }
        };
        job.state = JobState::Waiting;
        job.next_scheduled_start = Some(now + delay);
        debug!(label, delay_secs = delay.as_secs(), "calendar wake armed");
    }

    /// A calendar job's timer fired (or it has no wake armed yet): start it
    /// only when the current minute actually matches, otherwise re-arm.
    fn calendar_tick(&mut self, label: &str, now: Instant) {
        enum CalAction {
            Arm,
            Start,
            Wait,
        }

        let action = {
            let Some(job) = self.registry.lookup(label) else { return };
            if job.next_wake().is_none() {
                CalAction::Arm
            } else if !job.due(now) {
                CalAction::Wait
            } else {
                match &job.manifest.calendar_interval {
                    Some(cal) => match cal.next_today(&Local::now()) {
                        Some(delay) if delay < Duration::from_secs(60) => CalAction::Start,
                        _ => CalAction::Arm,
                    },
                    None => CalAction::Wait,
                }
            }
        };

        match action {
            CalAction::Arm => self.arm_calendar(label),
            CalAction::Start => {
                if let Some(job) = self.registry.lookup_mut(label) {
                    job.next_scheduled_start = None;
                }
                self.try_start(label, now);
            }
            CalAction::Wait => {}
        }
    }

    // ---- Reaper ----------------------------------------------------------

    /// Drain every pending child exit (SIGCHLD handler).
    pub fn reap_children(&mut self) {
        loop {
            match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::Exited(pid, code)) => {
                    self.reap(pid.as_raw(), ChildExit::exited(code));
                }
                Ok(WaitStatus::Signaled(pid, signal, _)) => {
                    self.reap(pid.as_raw(), ChildExit::signaled(signal as i32));
                }
                Ok(WaitStatus::StillAlive) => break,
                Ok(_) => continue,
                Err(nix::errno::Errno::ECHILD) => break,
                Err(e) => {
                    warn!(error = %e, "waitpid failed");
                    break;
                }
            }
        }
    }

    /// Handle one reaped `(pid, status)`.
    pub fn reap(&mut self, pid: i32, exit: ChildExit) {
        debug!(pid, "reaping");
        let Some(label) = self.supervisor.take_label(pid) else {
            warn!(pid, "no job associated with pid");
            return;
        };
        if exit.signal == 0 && exit.code == EXEC_FAILED_STATUS {
            warn!(label = %label, "child failed during exec setup");
        }

        let shutting_down = self.shutting_down;
        let outcome = {
            let Some(job) = self.registry.lookup_mut(&label) else {
                warn!(label = %label, pid, "reaped pid maps to unknown job");
                return;
            };
            self.supervisor.apply_exit(job, exit, shutting_down)
        };
        debug!(label = %label, pid, ?outcome, "child exit recorded");

        match outcome {
            ReapOutcome::Remove => {
                self.registry.remove(&label);
                self.statuses.remove(&label);
                info!(label = %label, "job removed after reap");
            }
            ReapOutcome::Faulted => {
                warn!(label = %label, "job died unexpectedly, marked offline");
                self.persist_properties_of(&label);
                self.persist_status_of(&label);
            }
            ReapOutcome::WaitCalendar => {
                self.arm_calendar(&label);
                self.persist_status_of(&label);
            }
            _ => self.persist_status_of(&label),
        }
    }

    // ---- Shutdown --------------------------------------------------------

    /// Begin the shutdown sequence: SIGTERM every running job.
    pub fn begin_shutdown(&mut self) {
        self.shutting_down = true;
        let running: Vec<(String, i32)> = self
            .registry
            .list()
            .filter(|j| matches!(j.state, JobState::Running | JobState::Starting))
            .map(|j| (j.label.as_str().to_string(), j.pid))
            .collect();

        info!(count = running.len(), "stopping all running jobs");
        for (label, pid) in running {
            if let Some(job) = self.registry.lookup_mut(&label) {
                job.state = JobState::Stopping;
            }
            if let Err(e) = send_signal(pid, Signal::SIGTERM) {
                warn!(label = %label, pid, error = %e, "shutdown SIGTERM failed");
            }
        }
    }

    /// Number of jobs that still have a live process.
    pub fn jobs_with_processes(&self) -> usize {
        self.registry.list().filter(|j| j.has_process()).count()
    }

    /// Escalate: SIGKILL anything still alive after the shutdown timeout.
    pub fn kill_remaining(&mut self) {
        let remaining: Vec<(String, i32)> = self
            .registry
            .list()
            .filter(|j| j.has_process())
            .map(|j| (j.label.as_str().to_string(), j.pid))
            .collect();
        for (label, pid) in remaining {
            warn!(label = %label, pid, "escalating to SIGKILL");
            if let Err(e) = send_signal(pid, Signal::SIGKILL) {
                warn!(label = %label, pid, error = %e, "SIGKILL failed");
            }
        }
    }

    /// Remove the socket and pidfile on the way out.
    pub fn cleanup(&self) {
        if self.config.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.config.socket_path) {
                warn!(error = %e, "failed to remove socket file");
            }
        }
        if self.config.pid_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.config.pid_path) {
                warn!(error = %e, "failed to remove pidfile");
            }
        }
    }

    // ---- Persistence -----------------------------------------------------

    fn persist_status_of(&self, label: &str) {
        let Some(job) = self.registry.lookup(label) else { return };
        let doc = StatusDoc {
            pid: job.pid,
            last_exit_status: job.last_exit_status,
            term_signal: job.term_signal,
        };
        if let Err(e) = self.statuses.save(label, &doc) {
            warn!(label, error = %e, "failed to write status document");
        }
    }

    fn persist_properties_of(&self, label: &str) {
        let Some(job) = self.registry.lookup(label) else { return };
        if let Err(e) = self.properties.save(label, &job.properties) {
            warn!(label, error = %e, "failed to write property document");
        }
    }
}

fn send_signal(pid: i32, signal: Signal) -> Result<(), ControlError> {
    kill(Pid::from_raw(pid), signal).map_err(|e| ControlError::Syscall {
        kind: SyscallKind::Kill,
        message: e.to_string(),
    })
}

/// Delay until the next local midnight (at least one second).
fn seconds_until_midnight(now_local: &chrono::DateTime<Local>) -> Duration {
    let elapsed = u64::from(now_local.num_seconds_from_midnight());
    Duration::from_secs((86_400u64.saturating_sub(elapsed)).max(1))
}

#[cfg(test)]
#[path = "daemon_tests.rs"]
mod tests;
