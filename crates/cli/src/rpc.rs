//! Thin client for the daemon's wire protocol (spec §4.9), grounded on the
//! teacher's `coordinator::client::CoordinatorClient`. Every call here
//! dials a fresh connection: the daemon's own `handle_connection` loop
//! serves one request at a time per connection (see
//! `same-daemon::server::DaemonServer::handle_connection`), so concurrent
//! RPCs — including concurrent `ExecuteTask` calls — simply use distinct
//! connections rather than pipelining requests on one.

use std::path::Path;

use serde::{de::DeserializeOwned, Serialize};
use tokio::net::UnixStream;
use uuid::Uuid;

use same_scheduler::renderer::{RenderEvent, Renderer};
use same_wire::{ExecuteTaskComplete, ExecuteTaskLog, ExecuteTaskRequest, MessageType, WireMessage};

use crate::error::CliError;

/// Opens a fresh connection, sends `msg_type`/`payload`, and returns the
/// single reply, decoded as `R`.
///
/// # Errors
///
/// Propagates a connection failure, a wire framing error, or the daemon's
/// own `Error` reply (as [`CliError::DaemonSpawnFailed`], since by this
/// point the daemon is known to be reachable and any further failure is a
/// protocol-level one).
pub async fn call<P: Serialize, R: DeserializeOwned>(socket_path: &Path, msg_type: MessageType, payload: &P) -> Result<R, CliError> {
    let mut stream = UnixStream::connect(socket_path).await?;
    let correlation_id = Uuid::new_v4();
    WireMessage::with_payload(msg_type, correlation_id, payload)?.write_to(&mut stream).await?;
    let reply = WireMessage::read_from(&mut stream).await?;
    if reply.msg_type == MessageType::Error {
        let message: String = reply.payload_as().unwrap_or_else(|_| "daemon reported an error".to_string());
        return Err(CliError::DaemonSpawnFailed(message));
    }
    Ok(reply.payload_as()?)
}

/// Runs one task to completion on a dedicated connection, streaming its
/// output into `renderer` as `TaskLog` events and returning the process
/// exit code carried by the `ExecuteTaskComplete` trailer.
///
/// # Errors
///
/// Propagates a connection or wire framing failure. A non-zero exit code is
/// returned as `Ok`, not an error: the caller (the daemon-mode dispatch
/// loop) is responsible for turning that into a `Failed` outcome, matching
/// how the in-process scheduler treats `Error::TaskExecutionFailed`.
pub async fn execute_task(socket_path: &Path, task_name: &str, req: ExecuteTaskRequest, renderer: &dyn Renderer) -> Result<i32, CliError> {
    let mut stream = UnixStream::connect(socket_path).await?;
    let correlation_id = Uuid::new_v4();
    WireMessage::with_payload(MessageType::ExecuteTask, correlation_id, &req)?
        .write_to(&mut stream)
        .await?;

    loop {
        let message = WireMessage::read_from(&mut stream).await?;
        match message.msg_type {
            MessageType::ExecuteTaskLog => {
                let log: ExecuteTaskLog = message.payload_as()?;
                renderer.on_event(RenderEvent::TaskLog {
                    name: task_name.to_string(),
                    chunk: String::from_utf8_lossy(&log.chunk).into_owned(),
                });
            }
            MessageType::ExecuteTaskComplete => {
                let complete: ExecuteTaskComplete = message.payload_as()?;
                return Ok(complete.exit_code);
            }
            MessageType::Error => {
                let text: String = message.payload_as().unwrap_or_else(|_| "task execution failed".to_string());
                return Err(CliError::DaemonSpawnFailed(text));
            }
            other => return Err(CliError::DaemonSpawnFailed(format!("unexpected reply {other:?} during ExecuteTask"))),
        }
    }
}
