// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle specs: startup, spool scanning, shutdown, restarts.

use crate::prelude::*;
use serial_test::serial;
use std::time::Duration;

const IDLE_DISABLED: &str = "argv = [\"/bin/sleep\", \"60\"]\nenable = false\n";
const SLEEPER: &str = "argv = [\"/bin/sleep\", \"60\"]\n";

#[test]
#[serial]
fn daemon_loads_spool_jobs_at_startup() {
    let mut daemon = DaemonHandle::start(&[("idle.toml", IDLE_DISABLED)]);

    let jobs = daemon.list();
    assert_eq!(jobs["idle"]["state"], "loaded");
    assert_eq!(jobs["idle"]["enabled"], false);

    daemon.signal("TERM");
    assert_eq!(daemon.wait_exit(SPEC_WAIT), Some(0));
}

#[test]
#[serial]
fn sigterm_shutdown_stops_running_jobs_and_exits_zero() {
    let mut daemon = DaemonHandle::start(&[("sleeper.toml", SLEEPER)]);

    assert!(
        wait_for(SPEC_WAIT, || daemon.list()["sleeper"]["state"] == "running"),
        "job never started; log:\n{}",
        daemon.daemon_log()
    );

    daemon.signal("TERM");
    assert_eq!(daemon.wait_exit(SPEC_WAIT), Some(0));

    // Socket and pidfile are cleaned up on the way out.
    assert!(!daemon.socket_path().exists());
    assert!(!daemon.state_path().join("jobd.pid").exists());
}

#[test]
#[serial]
fn stubborn_job_is_escalated_to_sigkill() {
    // The job ignores SIGTERM; the 2s shutdown budget from the harness
    // forces the SIGKILL escalation, and the daemon still exits 0.
    let stubborn = "argv = [\"/bin/sh\", \"-c\", \"trap '' TERM; while :; do sleep 1; done\"]\n";
    let mut daemon = DaemonHandle::start(&[("stubborn.toml", stubborn)]);

    assert!(
        wait_for(SPEC_WAIT, || daemon.list()["stubborn"]["state"] == "running"),
        "job never started; log:\n{}",
        daemon.daemon_log()
    );

    daemon.signal("TERM");
    assert_eq!(daemon.wait_exit(Duration::from_secs(15)), Some(0));
}

#[test]
#[serial]
fn sigint_shutdown_exits_nonzero() {
    let mut daemon = DaemonHandle::start(&[]);
    daemon.signal("INT");
    let code = daemon.wait_exit(SPEC_WAIT);
    assert!(code.is_some_and(|c| c != 0), "expected non-zero exit, got {code:?}");
}

#[test]
#[serial]
fn sighup_rescan_picks_up_new_and_deleted_manifests() {
    let mut daemon = DaemonHandle::start(&[("idle.toml", IDLE_DISABLED)]);

    std::fs::write(daemon.spool_path().join("late.toml"), IDLE_DISABLED).unwrap();
    daemon.signal("HUP");
    assert!(
        wait_for(SPEC_WAIT, || daemon.list().get("late").is_some()),
        "new manifest never loaded; log:\n{}",
        daemon.daemon_log()
    );

    std::fs::remove_file(daemon.spool_path().join("late.toml")).unwrap();
    daemon.signal("HUP");
    assert!(
        wait_for(SPEC_WAIT, || daemon.list().get("late").is_none()),
        "deleted manifest never unloaded; log:\n{}",
        daemon.daemon_log()
    );
    assert!(daemon.list().get("idle").is_some());

    daemon.signal("TERM");
    assert_eq!(daemon.wait_exit(SPEC_WAIT), Some(0));
}

#[test]
#[serial]
fn keep_alive_job_is_relaunched_after_exit() {
    let tick_file = tempfile::NamedTempFile::new().unwrap();
    let manifest = format!(
        "argv = [\"/bin/sh\", \"-c\", \"echo tick >> {}\"]\nkeep_alive = true\nthrottle_interval = 1\n",
        tick_file.path().display()
    );
    let mut daemon = DaemonHandle::start(&[("ticker.toml", &manifest)]);

    // Each run appends one line; the throttle allows roughly one per second.
    let relaunched = wait_for(SPEC_WAIT, || {
        std::fs::read_to_string(tick_file.path())
            .map(|s| s.lines().count() >= 2)
            .unwrap_or(false)
    });
    assert!(relaunched, "job was not relaunched; log:\n{}", daemon.daemon_log());

    daemon.signal("TERM");
    assert_eq!(daemon.wait_exit(SPEC_WAIT), Some(0));
}

#[test]
#[serial]
fn second_instance_refuses_to_start() {
    let mut daemon = DaemonHandle::start(&[]);

    let output = std::process::Command::new(assert_cmd::cargo::cargo_bin("jobd"))
        .env("JOBD_STATE_DIR", daemon.state_path())
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("already running"), "stderr: {stderr}");

    daemon.signal("TERM");
    assert_eq!(daemon.wait_exit(SPEC_WAIT), Some(0));
}
