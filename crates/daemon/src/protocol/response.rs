// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSON-RPC 2.0 responses and the error-code mapping.

use jobd_core::ControlError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::request::RequestId;

/// JSON-RPC error codes.
///
/// The range below -32600 is reserved by JSON-RPC; application errors from
/// the control taxonomy use -32001 and up.
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;

    pub const NOT_FOUND: i64 = -32001;
    pub const DUPLICATE_LABEL: i64 = -32002;
    pub const INVALID_MANIFEST: i64 = -32003;
    pub const INVALID_STATE: i64 = -32004;
    pub const ALREADY_ENABLED: i64 = -32005;
    pub const ALREADY_DISABLED: i64 = -32006;
    pub const SYSCALL_FAILURE: i64 = -32007;
    pub const TIMEOUT: i64 = -32008;
}

/// An error object carried in a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl From<ControlError> for RpcError {
    fn from(e: ControlError) -> Self {
        let code = match &e {
            ControlError::NotFound(_) => codes::NOT_FOUND,
            ControlError::DuplicateLabel(_) => codes::DUPLICATE_LABEL,
            ControlError::InvalidManifest(_) => codes::INVALID_MANIFEST,
            ControlError::InvalidState { .. } => codes::INVALID_STATE,
            ControlError::AlreadyEnabled(_) => codes::ALREADY_ENABLED,
            ControlError::AlreadyDisabled(_) => codes::ALREADY_DISABLED,
            ControlError::Syscall { .. } => codes::SYSCALL_FAILURE,
            ControlError::Timeout(_) => codes::TIMEOUT,
        };
        Self { code, message: e.to_string() }
    }
}

/// A JSON-RPC response: exactly one of `result` or `error`.
///
/// `id` is null only for errors on requests whose id could not be parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn ok(id: RequestId, result: Value) -> Self {
        Self { jsonrpc: "2.0".to_string(), id: Some(id), result: Some(result), error: None }
    }

    pub fn fail(id: Option<RequestId>, error: RpcError) -> Self {
        Self { jsonrpc: "2.0".to_string(), id, result: None, error: Some(error) }
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_some()
    }
}

#[cfg(test)]
#[path = "response_tests.rs"]
mod tests;
