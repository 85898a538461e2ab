// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Caller-facing error taxonomy shared by the registry, supervisor, and RPC layer.

use thiserror::Error;

/// Errors surfaced to control-plane callers.
///
/// Every variant maps onto exactly one JSON-RPC error code in the daemon's
/// protocol layer; the registry and supervisor return these directly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    #[error("no job with label '{0}'")]
    NotFound(String),

    #[error("a job with label '{0}' already exists")]
    DuplicateLabel(String),

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("operation not allowed while job '{label}' is {state}")]
    InvalidState { label: String, state: String },

    #[error("job '{0}' is already enabled")]
    AlreadyEnabled(String),

    #[error("job '{0}' is already disabled")]
    AlreadyDisabled(String),

    #[error("{kind} failed: {message}")]
    Syscall { kind: SyscallKind, message: String },

    #[error("timed out waiting for job '{0}'")]
    Timeout(String),
}

/// The syscall that failed on the parent side of a launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallKind {
    Fork,
    Exec,
    Kill,
    UserLookup,
}

crate::simple_display! {
    SyscallKind {
        Fork => "fork(2)",
        Exec => "execve(2)",
        Kill => "kill(2)",
        UserLookup => "getpwnam(3)",
    }
}
