// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Spec harness: spawn a daemon against a temp state directory and talk
//! JSON-RPC to it over the Unix socket.

use serde_json::{json, Value};
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// How long to wait for the daemon socket, state transitions, and exits.
pub const SPEC_WAIT: Duration = Duration::from_secs(10);

/// Poll `predicate` until it holds or the deadline passes.
pub fn wait_for(limit: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    false
}

/// A running daemon bound to its own temp state directory.
pub struct DaemonHandle {
    child: Option<Child>,
    state: TempDir,
}

impl DaemonHandle {
    /// Spawn `jobd` with the given `(file name, contents)` spool manifests
    /// and wait for the control socket to accept connections.
    pub fn start(manifests: &[(&str, &str)]) -> Self {
        let state = TempDir::new().expect("temp state dir");
        let spool = state.path().join("job.d");
        std::fs::create_dir_all(&spool).expect("spool dir");
        for (name, contents) in manifests {
            std::fs::write(spool.join(name), contents).expect("manifest");
        }

        let mut command = Command::new(assert_cmd::cargo::cargo_bin("jobd"));
        command
            .env("JOBD_STATE_DIR", state.path())
            .env("JOBD_SHUTDOWN_TIMEOUT_MS", "2000")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let child = command.spawn().expect("spawn jobd");

        let handle = Self { child: Some(child), state };
        let socket = handle.socket_path();
        assert!(
            wait_for(SPEC_WAIT, || UnixStream::connect(&socket).is_ok()),
            "daemon socket never came up; log:\n{}",
            handle.daemon_log()
        );
        handle
    }

    pub fn state_path(&self) -> &std::path::Path {
        self.state.path()
    }

    pub fn spool_path(&self) -> PathBuf {
        self.state.path().join("job.d")
    }

    pub fn socket_path(&self) -> PathBuf {
        self.state.path().join("jobd.sock")
    }

    pub fn daemon_log(&self) -> String {
        std::fs::read_to_string(self.state.path().join("daemon.log")).unwrap_or_default()
    }

    pub fn pid(&self) -> u32 {
        self.child.as_ref().expect("daemon already waited").id()
    }

    /// One framed JSON-RPC exchange.
    pub fn rpc(&self, request: Value) -> Value {
        let mut stream = UnixStream::connect(self.socket_path()).expect("connect");
        stream.set_read_timeout(Some(SPEC_WAIT)).expect("read timeout");

        let payload = serde_json::to_vec(&request).expect("serialize request");
        let len = (payload.len() as u32).to_be_bytes();
        stream.write_all(&len).expect("write length");
        stream.write_all(&payload).expect("write payload");

        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).expect("read length");
        let mut body = vec![0u8; u32::from_be_bytes(len_buf) as usize];
        stream.read_exact(&mut body).expect("read payload");
        serde_json::from_slice(&body).expect("parse response")
    }

    /// Convenience: call a single-label method and return the response.
    pub fn label_rpc(&self, method: &str, label: &str) -> Value {
        self.rpc(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": {"label": label},
        }))
    }

    /// `list` result object.
    pub fn list(&self) -> Value {
        let response = self.rpc(json!({"jsonrpc": "2.0", "id": 1, "method": "list"}));
        response["result"].clone()
    }

    pub fn signal(&self, sig: &str) {
        let status = Command::new("kill")
            .arg(format!("-{sig}"))
            .arg(self.pid().to_string())
            .status()
            .expect("kill");
        assert!(status.success(), "kill -{sig} failed");
    }

    /// Wait for the daemon to exit, returning its status code.
    pub fn wait_exit(&mut self, limit: Duration) -> Option<i32> {
        let mut child = self.child.take().expect("daemon already waited");
        let deadline = Instant::now() + limit;
        loop {
            match child.try_wait().expect("try_wait") {
                Some(status) => return status.code(),
                None if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return None;
                }
                None => std::thread::sleep(Duration::from_millis(50)),
            }
        }
    }
}

impl Drop for DaemonHandle {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
