// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Socket I/O for the control plane.
//!
//! Connections are serviced inline on the loop thread: one framed request in,
//! one framed response out, then the connection is dropped. Nothing here
//! spawns tasks, so RPC-triggered transitions stay serialized with the
//! reaper and the timers.

use jobd_core::Clock;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixStream;
use tracing::{debug, warn};

use crate::daemon::Daemon;
use crate::env;
use crate::protocol::{self, codes, ProtocolError, RpcError, RpcRequest, RpcResponse};

/// Serve one accepted Unix-socket connection, logging any transport error.
pub async fn serve_unix<C: Clock>(stream: UnixStream, daemon: &mut Daemon<C>) {
    let (mut reader, mut writer) = stream.into_split();
    if let Err(e) = serve_connection(&mut reader, &mut writer, daemon).await {
        match e {
            ProtocolError::ConnectionClosed => debug!("client disconnected"),
            ProtocolError::Timeout => warn!("connection timed out"),
            other => warn!(error = %other, "connection error"),
        }
    }
}

/// Read one framed request, dispatch it, and write the framed response.
///
/// Messages over the size cap and malformed JSON-RPC envelopes still get a
/// proper error response; only transport failures surface as errors.
pub async fn serve_connection<R, W, C>(
    reader: &mut R,
    writer: &mut W,
    daemon: &mut Daemon<C>,
) -> Result<(), ProtocolError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    C: Clock,
{
    let timeout = env::ipc_timeout();

    let frame = match protocol::read_frame(reader, timeout).await {
        Ok(frame) => frame,
        Err(ProtocolError::TooLarge(len)) => {
            let response = RpcResponse::fail(
                None,
                RpcError {
                    code: codes::INVALID_REQUEST,
                    message: format!(
                        "message of {len} bytes exceeds the {}-byte limit",
                        protocol::MAX_MESSAGE
                    ),
                },
            );
            let payload = protocol::encode(&response)?;
            protocol::write_frame(writer, &payload, timeout).await?;
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    let response = match RpcRequest::parse(&frame) {
        Ok(request) => {
            debug!(method = %request.method, "dispatching request");
            daemon.dispatch(&request)
        }
        Err(parse_error) => {
            warn!(code = parse_error.error.code, "rejecting malformed request");
            RpcResponse::fail(parse_error.id, parse_error.error)
        }
    };

    let payload = protocol::encode(&response)?;
    protocol::write_frame(writer, &payload, timeout).await?;
    Ok(())
}

#[cfg(test)]
#[path = "listener_tests.rs"]
mod tests;
