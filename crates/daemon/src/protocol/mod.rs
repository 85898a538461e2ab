// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control-plane protocol: JSON-RPC 2.0 over a local socket.
//!
//! Wire format: 4-byte length prefix (big-endian) + JSON payload, one
//! request and one response per message. Messages over [`wire::MAX_MESSAGE`]
//! bytes are rejected with an invalid-request error.

mod request;
mod response;
mod wire;

pub use request::{RequestId, RequestParseError, RpcRequest};
pub use response::{codes, RpcError, RpcResponse};
pub use wire::{encode, read_frame, write_frame, ProtocolError, MAX_MESSAGE};
