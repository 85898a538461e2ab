// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::engine::ChildExit;
use jobd_core::{FakeClock, FaultState, Label};
use tempfile::TempDir;

fn test_daemon(dir: &TempDir) -> Daemon<FakeClock> {
    let config = Config::from_state_dir(dir.path());
    std::fs::create_dir_all(&config.spool_dir).unwrap();
    Daemon::new(config, FakeClock::new(), None)
}

fn write_manifest(dir: &TempDir, name: &str, contents: &str) -> String {
    let path = dir.path().join(name);
    std::fs::write(&path, contents).unwrap();
    path.display().to_string()
}

fn rpc(method: &str) -> RpcRequest {
    RpcRequest::new(1i64, method)
}

fn label_rpc(method: &str, label: &str) -> RpcRequest {
    rpc(method).with_param("label", label)
}

/// Install a disabled job directly so ticks never launch anything.
fn install_idle(daemon: &mut Daemon<FakeClock>, label: &str) {
    let manifest = jobd_core::Manifest {
        command: Some("/bin/sleep 60".to_string()),
        enable: false,
        ..Default::default()
    };
    let job = daemon.registry.load(Label::from(label), manifest).unwrap();
    job.state = JobState::Loaded;
}

#[test]
fn list_entries_have_exactly_the_contract_fields() {
    let dir = TempDir::new().unwrap();
    let mut daemon = test_daemon(&dir);
    install_idle(&mut daemon, "web");
    install_idle(&mut daemon, "db");

    let response = daemon.dispatch(&rpc("list"));
    assert!(response.is_ok());
    let result = response.result.unwrap();
    let obj = result.as_object().unwrap();
    assert_eq!(obj.len(), 2);

    for (_, entry) in obj {
        let entry = entry.as_object().unwrap();
        let mut keys: Vec<_> = entry.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["enabled", "fault_state", "pid", "state"]);
        assert_eq!(entry["pid"], 0);
        assert_eq!(entry["state"], "loaded");
        assert_eq!(entry["fault_state"], "none");
    }
}

#[test]
fn load_installs_job_from_manifest_file() {
    let dir = TempDir::new().unwrap();
    let mut daemon = test_daemon(&dir);
    let path = write_manifest(&dir, "svc.toml", "command = \"/bin/sleep 60\"\nenable = false\n");

    let response = daemon.dispatch(&rpc("load").with_param("path", &path));
    assert!(response.is_ok(), "{response:?}");
    assert_eq!(daemon.registry.lookup("svc").unwrap().state, JobState::Loaded);

    // Status document appears immediately.
    assert!(daemon.statuses.load("svc").is_some());
}

#[test]
fn load_rejects_duplicates_and_relative_paths() {
    let dir = TempDir::new().unwrap();
    let mut daemon = test_daemon(&dir);
    let path = write_manifest(&dir, "svc.toml", "command = \"/bin/sleep 60\"\nenable = false\n");

    assert!(daemon.dispatch(&rpc("load").with_param("path", &path)).is_ok());

    let dup = daemon.dispatch(&rpc("load").with_param("path", &path));
    assert_eq!(dup.error.unwrap().code, codes::DUPLICATE_LABEL);

    let rel = daemon.dispatch(&rpc("load").with_param("path", "relative/svc.toml"));
    assert_eq!(rel.error.unwrap().code, codes::INVALID_MANIFEST);
}

#[test]
fn unknown_method_is_rejected() {
    let dir = TempDir::new().unwrap();
    let mut daemon = test_daemon(&dir);
    let response = daemon.dispatch(&rpc("halt-and-catch-fire"));
    assert_eq!(response.error.unwrap().code, codes::METHOD_NOT_FOUND);
}

#[test]
fn enable_is_idempotent_with_error() {
    let dir = TempDir::new().unwrap();
    let mut daemon = test_daemon(&dir);
    install_idle(&mut daemon, "web");

    // Disabled at install; first enable flips it.
    assert!(daemon.dispatch(&label_rpc("enable", "web")).is_ok());
    assert!(daemon.registry.lookup("web").unwrap().properties.enabled);

    // Second enable reports AlreadyEnabled and changes nothing.
    let again = daemon.dispatch(&label_rpc("enable", "web"));
    assert_eq!(again.error.unwrap().code, codes::ALREADY_ENABLED);
    assert!(daemon.registry.lookup("web").unwrap().properties.enabled);
    assert_eq!(daemon.registry.lookup("web").unwrap().state, JobState::Loaded);
}

#[test]
fn disable_is_idempotent_with_error() {
    let dir = TempDir::new().unwrap();
    let mut daemon = test_daemon(&dir);
    install_idle(&mut daemon, "web");

    let first = daemon.dispatch(&label_rpc("disable", "web"));
    assert_eq!(first.error.unwrap().code, codes::ALREADY_DISABLED);

    daemon.dispatch(&label_rpc("enable", "web"));
    assert!(daemon.dispatch(&label_rpc("disable", "web")).is_ok());
    let again = daemon.dispatch(&label_rpc("disable", "web"));
    assert_eq!(again.error.unwrap().code, codes::ALREADY_DISABLED);
}

#[test]
fn enabled_property_survives_a_daemon_restart() {
    let dir = TempDir::new().unwrap();
    {
        let mut daemon = test_daemon(&dir);
        install_idle(&mut daemon, "web");
        daemon.dispatch(&label_rpc("enable", "web"));
    }

    let mut daemon = test_daemon(&dir);
    install_idle(&mut daemon, "web");
    // install_idle seeds enabled=false from the manifest; the stored
    // property must win on the real load paths.
    let stored = daemon.properties.load("web").unwrap();
    assert!(stored.enabled);
    let job = daemon.registry.lookup_mut("web").unwrap();
    job.properties = stored;
    assert!(job.properties.enabled);
}

#[test]
fn operations_on_unknown_labels_are_not_found() {
    let dir = TempDir::new().unwrap();
    let mut daemon = test_daemon(&dir);

    for method in ["unload", "enable", "disable", "start", "stop", "restart", "clear"] {
        let response = daemon.dispatch(&label_rpc(method, "ghost"));
        assert_eq!(
            response.error.unwrap().code,
            codes::NOT_FOUND,
            "method {method} should report NotFound"
        );
    }
}

#[test]
fn stop_requires_a_running_process() {
    let dir = TempDir::new().unwrap();
    let mut daemon = test_daemon(&dir);
    install_idle(&mut daemon, "web");

    let response = daemon.dispatch(&label_rpc("stop", "web"));
    assert_eq!(response.error.unwrap().code, codes::INVALID_STATE);
}

#[test]
fn start_refuses_error_state() {
    let dir = TempDir::new().unwrap();
    let mut daemon = test_daemon(&dir);
    install_idle(&mut daemon, "web");
    daemon.registry.lookup_mut("web").unwrap().state = JobState::Error;

    let response = daemon.dispatch(&label_rpc("start", "web"));
    assert_eq!(response.error.unwrap().code, codes::INVALID_STATE);
}

#[test]
fn clear_resets_fault_and_error_state() {
    let dir = TempDir::new().unwrap();
    let mut daemon = test_daemon(&dir);
    install_idle(&mut daemon, "web");
    {
        let job = daemon.registry.lookup_mut("web").unwrap();
        job.state = JobState::Error;
        job.mark_offline("test fault");
    }

    assert!(daemon.dispatch(&label_rpc("clear", "web")).is_ok());
    let job = daemon.registry.lookup("web").unwrap();
    assert_eq!(job.properties.fault_state, FaultState::None);
    assert_eq!(job.state, JobState::Loaded);

    // Persisted too.
    assert_eq!(daemon.properties.load("web").unwrap().fault_state, FaultState::None);
}

#[test]
fn reap_of_keep_alive_job_schedules_throttled_restart() {
    let dir = TempDir::new().unwrap();
    let mut daemon = test_daemon(&dir);
    let manifest = jobd_core::Manifest {
        command: Some("/bin/false".to_string()),
        keep_alive: true,
        throttle_interval: 2,
        ..Default::default()
    };
    let job = daemon.registry.load("t".into(), manifest).unwrap();
    job.state = JobState::Running;
    job.pid = 4321;
    let label = job.label.clone();
    daemon.supervisor.register(4321, &label);
    let t0 = daemon.supervisor.clock().now();

    daemon.reap(4321, ChildExit::exited(1));

    let job = daemon.registry.lookup("t").unwrap();
    assert_eq!(job.state, JobState::Exited);
    assert_eq!(job.pid, 0);
    assert_eq!(job.restart_after, Some(t0 + std::time::Duration::from_secs(2)));
    assert_eq!(daemon.next_wake(), Some(t0 + std::time::Duration::from_secs(2)));

    // The status document reflects the exit.
    let doc = daemon.statuses.load("t").unwrap();
    assert_eq!(doc.pid, 0);
    assert_eq!(doc.last_exit_status, 1);
}

#[test]
fn reap_of_unknown_pid_is_ignored() {
    let dir = TempDir::new().unwrap();
    let mut daemon = test_daemon(&dir);
    install_idle(&mut daemon, "web");
    daemon.reap(987, ChildExit::exited(0));
    assert_eq!(daemon.registry.lookup("web").unwrap().state, JobState::Loaded);
}

#[test]
fn unexpected_death_of_daemon_job_faults_offline_and_persists() {
    let dir = TempDir::new().unwrap();
    let mut daemon = test_daemon(&dir);
    let manifest =
        jobd_core::Manifest { command: Some("/bin/svc".to_string()), ..Default::default() };
    let job = daemon.registry.load("svc".into(), manifest).unwrap();
    job.state = JobState::Running;
    job.pid = 777;
    let label = job.label.clone();
    daemon.supervisor.register(777, &label);

    daemon.reap(777, ChildExit::signaled(11));

    let job = daemon.registry.lookup("svc").unwrap();
    assert_eq!(job.properties.fault_state, FaultState::Offline);
    assert_eq!(daemon.properties.load("svc").unwrap().fault_state, FaultState::Offline);
    let doc = daemon.statuses.load("svc").unwrap();
    assert_eq!(doc.last_exit_status, -1);
    assert_eq!(doc.term_signal, 11);
}

#[test]
fn unload_of_running_job_completes_on_reap() {
    let dir = TempDir::new().unwrap();
    let mut daemon = test_daemon(&dir);
    install_idle(&mut daemon, "web");
    {
        let job = daemon.registry.lookup_mut("web").unwrap();
        job.state = JobState::Running;
        job.pid = 999_999; // no such process; the SIGTERM is best-effort
        let label = job.label.clone();
        daemon.supervisor.register(999_999, &label);
    }

    assert!(daemon.dispatch(&label_rpc("unload", "web")).is_ok());
    let job = daemon.registry.lookup("web").unwrap();
    assert_eq!(job.state, JobState::Killed);
    assert!(job.pending_removal);

    daemon.reap(999_999, ChildExit::signaled(15));
    assert!(daemon.registry.lookup("web").is_none());
    assert!(daemon.statuses.load("web").is_none());
}

#[test]
fn rescan_unloads_jobs_whose_file_disappeared() {
    let dir = TempDir::new().unwrap();
    let mut daemon = test_daemon(&dir);
    let spool = daemon.config.spool_dir.clone();
    for name in ["a", "b", "c"] {
        std::fs::write(
            spool.join(format!("{name}.toml")),
            "command = \"/bin/sleep 60\"\nenable = false\n",
        )
        .unwrap();
    }

    daemon.rescan();
    assert_eq!(daemon.registry.len(), 3);

    std::fs::remove_file(spool.join("b.toml")).unwrap();
    daemon.rescan();

    assert!(daemon.registry.lookup("a").is_some());
    assert!(daemon.registry.lookup("b").is_none());
    assert!(daemon.registry.lookup("c").is_some());
}

#[test]
fn rescan_marks_cycles_error() {
    let dir = TempDir::new().unwrap();
    let mut daemon = test_daemon(&dir);
    let spool = daemon.config.spool_dir.clone();
    std::fs::write(
        spool.join("a.toml"),
        "command = \"/bin/sleep 60\"\nenable = false\nafter = [\"b\"]\n",
    )
    .unwrap();
    std::fs::write(
        spool.join("b.toml"),
        "command = \"/bin/sleep 60\"\nenable = false\nafter = [\"a\"]\n",
    )
    .unwrap();

    daemon.rescan();
    assert_eq!(daemon.registry.lookup("a").unwrap().state, JobState::Error);
    assert_eq!(daemon.registry.lookup("b").unwrap().state, JobState::Error);
}

#[test]
fn tick_arms_calendar_jobs_without_launching() {
    let dir = TempDir::new().unwrap();
    let mut daemon = test_daemon(&dir);
    let manifest = jobd_core::Manifest {
        command: Some("/bin/backup".to_string()),
        calendar_interval: Some(jobd_core::CalendarInterval {
            // Wildcard spec matches the current minute; the job would start
            // as soon as its wake fires, but arming alone must not launch.
            ..Default::default()
        }),
        ..Default::default()
    };
    let job = daemon.registry.load("backup".into(), manifest).unwrap();
    job.state = JobState::Loaded;
    daemon.rescan_order_for_tests();

    daemon.tick();

    let job = daemon.registry.lookup("backup").unwrap();
    assert_eq!(job.state, JobState::Waiting);
    assert!(job.next_scheduled_start.is_some());
    assert_eq!(job.pid, 0);
}

#[test]
fn disabled_jobs_lose_armed_schedules_on_tick() {
    let dir = TempDir::new().unwrap();
    let mut daemon = test_daemon(&dir);
    install_idle(&mut daemon, "web");
    {
        let job = daemon.registry.lookup_mut("web").unwrap();
        job.state = JobState::Exited;
        job.restart_after = Some(daemon.supervisor.clock().now());
    }
    daemon.rescan_order_for_tests();

    daemon.tick();
    assert_eq!(daemon.registry.lookup("web").unwrap().next_wake(), None);
    assert_eq!(daemon.next_wake(), None);
}

#[test]
fn shutdown_reaps_land_in_stopped() {
    let dir = TempDir::new().unwrap();
    let mut daemon = test_daemon(&dir);
    let manifest = jobd_core::Manifest {
        command: Some("/bin/svc".to_string()),
        keep_alive: true,
        ..Default::default()
    };
    let job = daemon.registry.load("svc".into(), manifest).unwrap();
    job.state = JobState::Stopping;
    job.pid = 555;
    let label = job.label.clone();
    daemon.supervisor.register(555, &label);
    daemon.shutting_down = true;

    daemon.reap(555, ChildExit::signaled(15));

    let job = daemon.registry.lookup("svc").unwrap();
    assert_eq!(job.state, JobState::Stopped);
    assert_eq!(job.restart_after, None);
    assert_eq!(daemon.jobs_with_processes(), 0);
}
