// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Supervision policy: map child exits onto job state transitions.
//!
//! The supervisor owns the pid → label index (the inverted index the reaper
//! uses to find a job from a waitpid result) and the restart/KeepAlive
//! policy. It performs no syscalls and no I/O; the daemon record feeds it
//! exits and acts on the outcomes.

use jobd_core::{Clock, Job, JobState, Label};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Exit disposition of a reaped child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildExit {
    /// Exit code for a normal exit; -1 when signaled.
    pub code: i32,
    /// Terminating signal; 0 on normal exit.
    pub signal: i32,
}

impl ChildExit {
    pub fn exited(code: i32) -> Self {
        Self { code, signal: 0 }
    }

    pub fn signaled(signal: i32) -> Self {
        Self { code: -1, signal }
    }

    fn describe(&self) -> String {
        if self.signal != 0 {
            format!("terminated by signal {}", self.signal)
        } else {
            format!("exited unexpectedly with status {}", self.code)
        }
    }
}

/// What the daemon must do after a reap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReapOutcome {
    /// The job was pending removal; take it out of the registry.
    Remove,
    /// Explicit stop completed.
    Stopped,
    /// Relaunch once the instant arrives.
    RestartAt(Instant),
    /// Periodic job waiting for its interval.
    WaitInterval(Instant),
    /// Calendar job waiting; the caller recomputes the wall-clock wake.
    WaitCalendar,
    /// One-shot exit, nothing scheduled.
    Exited,
    /// Unexpected death of a run-forever job; fault recorded on the job and
    /// persisted by the caller.
    Faulted,
}

/// Reaper state and restart policy.
pub struct Supervisor<C: Clock> {
    clock: C,
    pids: HashMap<i32, String>,
}

impl<C: Clock> Supervisor<C> {
    pub fn new(clock: C) -> Self {
        Self { clock, pids: HashMap::new() }
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Record a launched child in the pid index.
    pub fn register(&mut self, pid: i32, label: &Label) {
        self.pids.insert(pid, label.to_string());
    }

    /// Resolve and remove the pid mapping for a reaped child.
    pub fn take_label(&mut self, pid: i32) -> Option<String> {
        self.pids.remove(&pid)
    }

    /// Number of live children being tracked.
    pub fn tracked(&self) -> usize {
        self.pids.len()
    }

    /// Record an exit disposition and decide the next state.
    ///
    /// During shutdown no restart is ever scheduled; every reap lands in
    /// `Stopped` (or `Remove` for jobs already pending removal).
    pub fn apply_exit(&mut self, job: &mut Job, exit: ChildExit, shutting_down: bool) -> ReapOutcome {
        self.pids.remove(&job.pid);
        job.pid = 0;
        job.last_exit_status = if exit.signal != 0 { -1 } else { exit.code };
        job.term_signal = exit.signal;

        let now = self.clock.now();
        let prev = job.state;

        // Explicit shutdown of this job (stop RPC or unload).
        if matches!(prev, JobState::Stopping | JobState::Killed) {
            job.state = JobState::Stopped;
            if job.pending_removal {
                return ReapOutcome::Remove;
            }
            if job.pending_restart && !shutting_down {
                job.pending_restart = false;
                job.restart_after = Some(now);
                return ReapOutcome::RestartAt(now);
            }
            job.pending_restart = false;
            return ReapOutcome::Stopped;
        }

        if shutting_down {
            job.state = JobState::Stopped;
            return ReapOutcome::Stopped;
        }

        if job.manifest.keep_alive && job.properties.enabled {
            job.state = JobState::Exited;
            let at = now + Duration::from_secs(u64::from(job.manifest.throttle_interval));
            job.restart_after = Some(at);
            return ReapOutcome::RestartAt(at);
        }

        if job.manifest.start_interval > 0 {
            job.state = JobState::Waiting;
            let at = job
                .next_scheduled_start
                .unwrap_or_else(|| now + Duration::from_secs(u64::from(job.manifest.start_interval)));
            job.next_scheduled_start = Some(at);
            return ReapOutcome::WaitInterval(at);
        }

        if job.manifest.calendar_interval.is_some() {
            job.state = JobState::Waiting;
            job.next_scheduled_start = None;
            return ReapOutcome::WaitCalendar;
        }

        job.state = JobState::Exited;
        if job.manifest.expects_to_run_forever() && job.properties.enabled {
            job.mark_offline(exit.describe());
            return ReapOutcome::Faulted;
        }
        ReapOutcome::Exited
    }
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
