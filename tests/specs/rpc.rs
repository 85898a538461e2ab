// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control-plane specs: the JSON-RPC surface against a live daemon.

use crate::prelude::*;
use serde_json::json;
use serial_test::serial;

const IDLE_DISABLED: &str = "argv = [\"/bin/sleep\", \"60\"]\nenable = false\n";

#[test]
#[serial]
fn list_entries_carry_exactly_the_contract_fields() {
    let mut daemon = DaemonHandle::start(&[("idle.toml", IDLE_DISABLED)]);

    let response = daemon.rpc(json!({"jsonrpc": "2.0", "id": 1, "method": "list"}));
    assert_eq!(response["jsonrpc"], "2.0");
    assert_eq!(response["id"], 1);

    let entry = response["result"]["idle"].as_object().unwrap();
    let mut keys: Vec<_> = entry.keys().map(String::as_str).collect();
    keys.sort_unstable();
    assert_eq!(keys, vec!["enabled", "fault_state", "pid", "state"]);

    daemon.signal("TERM");
    assert_eq!(daemon.wait_exit(SPEC_WAIT), Some(0));
}

#[test]
#[serial]
fn start_and_stop_drive_a_job_through_its_lifecycle() {
    let mut daemon = DaemonHandle::start(&[("idle.toml", IDLE_DISABLED)]);

    let response = daemon.label_rpc("start", "idle");
    assert!(response.get("error").is_none(), "start failed: {response}");

    assert!(
        wait_for(SPEC_WAIT, || {
            let jobs = daemon.list();
            jobs["idle"]["state"] == "running" && jobs["idle"]["pid"].as_i64().unwrap_or(0) > 0
        }),
        "job never ran; log:\n{}",
        daemon.daemon_log()
    );

    let response = daemon.label_rpc("stop", "idle");
    assert!(response.get("error").is_none(), "stop failed: {response}");

    assert!(
        wait_for(SPEC_WAIT, || {
            let jobs = daemon.list();
            jobs["idle"]["state"] == "stopped" && jobs["idle"]["pid"] == 0
        }),
        "job never stopped; log:\n{}",
        daemon.daemon_log()
    );

    daemon.signal("TERM");
    assert_eq!(daemon.wait_exit(SPEC_WAIT), Some(0));
}

#[test]
#[serial]
fn load_and_unload_manage_jobs_outside_the_spool() {
    let mut daemon = DaemonHandle::start(&[]);

    let manifest_path = daemon.state_path().join("manual.toml");
    std::fs::write(&manifest_path, IDLE_DISABLED).unwrap();

    let response = daemon.rpc(json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "load",
        "params": {"path": manifest_path.display().to_string()},
    }));
    assert!(response.get("error").is_none(), "load failed: {response}");
    assert_eq!(daemon.list()["manual"]["state"], "loaded");

    let response = daemon.label_rpc("unload", "manual");
    assert!(response.get("error").is_none(), "unload failed: {response}");
    assert!(daemon.list().get("manual").is_none());

    daemon.signal("TERM");
    assert_eq!(daemon.wait_exit(SPEC_WAIT), Some(0));
}

#[test]
#[serial]
fn errors_carry_jsonrpc_error_codes() {
    let mut daemon = DaemonHandle::start(&[("idle.toml", IDLE_DISABLED)]);

    // Unknown label
    let response = daemon.label_rpc("start", "ghost");
    assert_eq!(response["error"]["code"], -32001);

    // Stop with no process
    let response = daemon.label_rpc("stop", "idle");
    assert_eq!(response["error"]["code"], -32004);

    // Repeated disable
    let response = daemon.label_rpc("disable", "idle");
    assert_eq!(response["error"]["code"], -32006);

    // Unknown method
    let response = daemon.rpc(json!({"jsonrpc": "2.0", "id": 9, "method": "reboot"}));
    assert_eq!(response["error"]["code"], -32601);
    assert_eq!(response["id"], 9);

    daemon.signal("TERM");
    assert_eq!(daemon.wait_exit(SPEC_WAIT), Some(0));
}

#[test]
#[serial]
fn enable_starts_a_loaded_job_and_disable_stops_it() {
    let mut daemon = DaemonHandle::start(&[("idle.toml", IDLE_DISABLED)]);

    let response = daemon.label_rpc("enable", "idle");
    assert!(response.get("error").is_none(), "enable failed: {response}");

    assert!(
        wait_for(SPEC_WAIT, || daemon.list()["idle"]["state"] == "running"),
        "enable did not start the job; log:\n{}",
        daemon.daemon_log()
    );

    let response = daemon.label_rpc("disable", "idle");
    assert!(response.get("error").is_none(), "disable failed: {response}");

    assert!(
        wait_for(SPEC_WAIT, || {
            let jobs = daemon.list();
            jobs["idle"]["state"] == "stopped" && jobs["idle"]["enabled"] == false
        }),
        "disable did not stop the job; log:\n{}",
        daemon.daemon_log()
    );

    daemon.signal("TERM");
    assert_eq!(daemon.wait_exit(SPEC_WAIT), Some(0));
}

#[test]
#[serial]
fn dependency_cycles_surface_as_error_state() {
    let a = "argv = [\"/bin/sleep\", \"60\"]\nafter = [\"b\"]\n";
    let b = "argv = [\"/bin/sleep\", \"60\"]\nafter = [\"a\"]\n";
    let mut daemon = DaemonHandle::start(&[("a.toml", a), ("b.toml", b)]);

    let jobs = daemon.list();
    assert_eq!(jobs["a"]["state"], "error");
    assert_eq!(jobs["b"]["state"], "error");
    assert_eq!(jobs["a"]["pid"], 0);

    // clear returns an errored job to loaded.
    let response = daemon.label_rpc("clear", "a");
    assert!(response.get("error").is_none(), "clear failed: {response}");
    assert!(
        wait_for(SPEC_WAIT, || {
            let state = &daemon.list()["a"]["state"];
            state == "loaded" || state == "running"
        }),
        "clear did not recover the job; log:\n{}",
        daemon.daemon_log()
    );

    daemon.signal("TERM");
    assert_eq!(daemon.wait_exit(SPEC_WAIT), Some(0));
}
