// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-wide job registry.
//!
//! The registry exclusively owns every [`Job`]; the supervisor, listener, and
//! event loop refer to jobs by label. No syscalls happen here; callers
//! deliver signals for jobs the registry marks `Killed`.

use jobd_core::{sort_jobs, ControlError, Job, JobState, Label, Manifest, ResolvedOrder};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// What `unload` decided.
#[derive(Debug)]
pub enum Unloaded {
    /// The job had no process and was removed immediately.
    Removed(Box<Job>),
    /// The job is running: it was marked `Killed` and will be removed on
    /// reap. The caller must deliver SIGTERM to `pid`.
    KillRequested { pid: i32 },
}

/// Result of a spool scan.
#[derive(Debug, Default)]
pub struct ScanReport {
    /// Labels newly loaded from the spool.
    pub loaded: Vec<Label>,
    /// Labels removed because their file disappeared.
    pub removed: Vec<Label>,
    /// Running jobs whose file disappeared; SIGTERM owed by the caller.
    pub kill_requested: Vec<(Label, i32)>,
    /// Files that failed to parse and were skipped.
    pub failures: Vec<(PathBuf, String)>,
}

/// Registry of all jobs, keyed by label.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: HashMap<String, Job>,
    /// Labels seen in the previous spool scan; files that disappear from the
    /// spool unload exactly these, never RPC-loaded jobs.
    spooled: HashSet<String>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a parsed job in the `Defined` state.
    pub fn load(&mut self, label: Label, manifest: Manifest) -> Result<&mut Job, ControlError> {
        if self.jobs.contains_key(label.as_str()) {
            return Err(ControlError::DuplicateLabel(label.to_string()));
        }
        let job = Job::new(label.clone(), manifest);
        Ok(self.jobs.entry(label.to_string()).or_insert(job))
    }

    /// Unload a job. Running jobs are marked `Killed` and removed on reap.
    pub fn unload(&mut self, label: &str) -> Result<Unloaded, ControlError> {
        let job = self
            .jobs
            .get_mut(label)
            .ok_or_else(|| ControlError::NotFound(label.to_string()))?;

        if job.pending_removal {
            return Err(ControlError::InvalidState {
                label: label.to_string(),
                state: job.state.to_string(),
            });
        }
        if job.has_process() {
            job.state = JobState::Killed;
            job.pending_removal = true;
            job.clear_schedule();
            return Ok(Unloaded::KillRequested { pid: job.pid });
        }

        match self.jobs.remove(label) {
            Some(job) => {
                self.spooled.remove(label);
                Ok(Unloaded::Removed(Box::new(job)))
            }
            None => Err(ControlError::NotFound(label.to_string())),
        }
    }

    /// Remove a job outright (post-reap removal of a `Killed` job).
    pub fn remove(&mut self, label: &str) -> Option<Job> {
        self.spooled.remove(label);
        self.jobs.remove(label)
    }

    pub fn lookup(&self, label: &str) -> Option<&Job> {
        self.jobs.get(label)
    }

    pub fn lookup_mut(&mut self, label: &str) -> Option<&mut Job> {
        self.jobs.get_mut(label)
    }

    /// Iterate all jobs; iteration order is unspecified.
    pub fn list(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Job> {
        self.jobs.values_mut()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Idempotent spool scan.
    ///
    /// Reads every `*.json`/`*.toml` file; newly seen labels are loaded,
    /// labels whose file disappeared since the previous scan are unloaded.
    /// A file that fails to parse is logged and skipped; it neither aborts
    /// the scan nor unloads a previously loaded job.
    pub fn scan(&mut self, dir: &Path) -> ScanReport {
        let mut report = ScanReport::default();
        let mut seen: HashSet<String> = HashSet::new();

        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "cannot read spool directory");
                return report;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
            if ext != "json" && ext != "toml" {
                continue;
            }
            debug!(path = %path.display(), "parsing manifest");
            let manifest = match Manifest::from_path(&path) {
                Ok(m) => m,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unparseable manifest");
                    report.failures.push((path, e.to_string()));
                    continue;
                }
            };
            let label = match manifest.effective_label(&path) {
                Ok(label) => label,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping manifest with invalid label");
                    report.failures.push((path, e.to_string()));
                    continue;
                }
            };

            // A label may appear at most once per scan; later files lose.
            if !seen.insert(label.to_string()) {
                warn!(label = %label, path = %path.display(), "duplicate label in spool, skipping");
                continue;
            }
            if !self.jobs.contains_key(label.as_str()) {
                let job = Job::new(label.clone(), manifest);
                self.jobs.insert(label.to_string(), job);
                report.loaded.push(label);
            }
        }

        // Unload labels whose spool file disappeared since the previous scan.
        let gone: Vec<String> =
            self.spooled.difference(&seen).map(String::clone).collect();
        for label in gone {
            match self.unload(&label) {
                Ok(Unloaded::Removed(job)) => report.removed.push(job.label.clone()),
                Ok(Unloaded::KillRequested { pid }) => {
                    if let Some(job) = self.jobs.get(&label) {
                        report.kill_requested.push((job.label.clone(), pid));
                    }
                }
                Err(e) => debug!(label = %label, error = %e, "scan unload skipped"),
            }
        }

        self.spooled = seen;
        report
    }

    /// Topologically order all jobs; cycle members become `Error`.
    pub fn resolve_order(&mut self) -> ResolvedOrder {
        let mut refs: Vec<&mut Job> = self.jobs.values_mut().collect();
        sort_jobs(&mut refs)
    }

    /// Invariant check at loop-iteration boundaries (debug builds).
    #[cfg(debug_assertions)]
    pub fn assert_invariants(&self) {
        for job in self.jobs.values() {
            debug_assert!(
                job.pid_state_consistent(),
                "job {} violates pid/state consistency: pid={} state={}",
                job.label,
                job.pid,
                job.state
            );
        }
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
