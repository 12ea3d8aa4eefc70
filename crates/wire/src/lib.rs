//! Wire protocol for `same daemon` RPC (spec §4.9): length-prefixed JSON
//! messages over the workspace's Unix-domain socket.
//!
//! Framing: 4 bytes big-endian length, then that many bytes of JSON.
//!
//! ```rust,no_run
//! use same_wire::WireMessage;
//! use std::io::Cursor;
//!
//! # async fn run() -> same_wire::Result<()> {
//! let mut buf = Vec::new();
//! WireMessage::ping().write_to(&mut buf).await?;
//! let mut reader = Cursor::new(buf);
//! let reply = WireMessage::read_from(&mut reader).await?;
//! assert!(matches!(reply.msg_type, same_wire::MessageType::Ping));
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod payload;

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

pub use crate::error::{Error, Result};
pub use crate::payload::{
    ExecuteTaskComplete, ExecuteTaskLog, ExecuteTaskRequest, GetEnvironmentRequest, GetEnvironmentResult, GetGraphRequest,
    GetGraphResult, GetInputHashRequest, GetInputHashResult, HashState, StatusResult, WireTask,
};

/// Maximum message size: 1 MiB. Bounds both a misbehaving peer and an
/// accidental attempt to stream task output through the envelope instead
/// of through repeated `ExecuteTaskLog` chunks.
pub const MAX_MESSAGE_SIZE: u32 = 1024 * 1024;

/// Envelope shared by every request, response, and streamed chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    /// Routes the payload without requiring the reader to speculatively
    /// parse it.
    pub msg_type: MessageType,
    /// Matches a streaming response (zero or more `ExecuteTaskLog` plus
    /// one `ExecuteTaskComplete`) back to its request.
    pub correlation_id: Uuid,
    /// The method-specific payload, already shaped by one of the
    /// `payload` module's types.
    pub payload: serde_json::Value,
}

/// Method surface (spec §4.9), plus the streaming variants `ExecuteTask`
/// splits into on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    /// Health check and lifecycle reset; no payload.
    Ping,
    /// Reply to `Ping`; no payload.
    Pong,
    /// `Status()` request; no payload.
    Status,
    /// `Status()` reply, carrying [`StatusResult`].
    StatusResult,
    /// `Shutdown(graceful)` request; payload is a bare bool.
    Shutdown,
    /// `GetGraph(cwd, mtimes)` request, carrying [`GetGraphRequest`].
    GetGraph,
    /// `GetGraph` reply, carrying [`GetGraphResult`].
    GetGraphResult,
    /// `GetEnvironment(envID, tools)` request, carrying [`GetEnvironmentRequest`].
    GetEnvironment,
    /// `GetEnvironment` reply, carrying [`GetEnvironmentResult`].
    GetEnvironmentResult,
    /// `GetInputHash(task, root, env)` request, carrying [`GetInputHashRequest`].
    GetInputHash,
    /// `GetInputHash` reply, carrying [`GetInputHashResult`].
    GetInputHashResult,
    /// `ExecuteTask(req)` request, carrying [`ExecuteTaskRequest`].
    ExecuteTask,
    /// One chunk of a streaming `ExecuteTask` reply, carrying [`ExecuteTaskLog`].
    ExecuteTaskLog,
    /// The trailer closing out an `ExecuteTask` reply, carrying
    /// [`ExecuteTaskComplete`] (the spec's `x-exit-code` trailer).
    ExecuteTaskComplete,
    /// Any request that failed; payload is a bare string message.
    Error,
}

impl WireMessage {
    /// Builds a request/reply with no payload.
    #[must_use]
    pub fn empty(msg_type: MessageType, correlation_id: Uuid) -> Self {
        Self {
            msg_type,
            correlation_id,
            payload: serde_json::Value::Null,
        }
    }

    /// Builds a request/reply carrying a serializable payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialize`] if `payload` cannot be represented as
    /// JSON (not expected for any type in the `payload` module).
    pub fn with_payload(msg_type: MessageType, correlation_id: Uuid, payload: &impl Serialize) -> Result<Self> {
        Ok(Self {
            msg_type,
            correlation_id,
            payload: serde_json::to_value(payload).map_err(Error::Serialize)?,
        })
    }

    /// A fresh `Ping` request.
    #[must_use]
    pub fn ping() -> Self {
        Self::empty(MessageType::Ping, Uuid::new_v4())
    }

    /// The `Pong` reply to `correlation_id`.
    #[must_use]
    pub fn pong(correlation_id: Uuid) -> Self {
        Self::empty(MessageType::Pong, correlation_id)
    }

    /// An `Error` reply carrying a human-readable message.
    #[must_use]
    pub fn error(correlation_id: Uuid, message: impl Into<String>) -> Self {
        Self {
            msg_type: MessageType::Error,
            correlation_id,
            payload: serde_json::Value::String(message.into()),
        }
    }

    /// Deserializes `payload` as `T`, or fails with
    /// [`Error::UnexpectedPayload`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnexpectedPayload`] if the JSON value does not
    /// match `T`'s shape.
    pub fn payload_as<T: for<'de> Deserialize<'de>>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone()).map_err(|_| Error::UnexpectedPayload { msg_type: self.msg_type })
    }

    /// Writes this message to `writer` as a length-prefixed JSON frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialize`] or [`Error::MessageTooLarge`], or
    /// propagates an [`Error::Io`] failure.
    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<()> {
        let json = serde_json::to_vec(self).map_err(Error::Serialize)?;
        let len = u32::try_from(json.len()).unwrap_or(u32::MAX);
        if len > MAX_MESSAGE_SIZE {
            return Err(Error::MessageTooLarge { len, max: MAX_MESSAGE_SIZE });
        }

        writer.write_all(&len.to_be_bytes()).await?;
        writer.write_all(&json).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Reads one length-prefixed JSON frame from `reader`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MessageTooLarge`] if the declared length exceeds
    /// [`MAX_MESSAGE_SIZE`], [`Error::Deserialize`] if the frame is not a
    /// valid `WireMessage`, or propagates an [`Error::Io`] failure.
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self> {
        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf).await?;
        let len = u32::from_be_bytes(len_buf);
        if len > MAX_MESSAGE_SIZE {
            return Err(Error::MessageTooLarge { len, max: MAX_MESSAGE_SIZE });
        }

        let mut buf = vec![0u8; len as usize];
        reader.read_exact(&mut buf).await?;
        serde_json::from_slice(&buf).map_err(Error::Deserialize)
    }
}

/// A path's last-observed modification time, seconds since the Unix
/// epoch, as carried in a `GetGraph` request's mtime map.
pub type MtimeMap = BTreeMap<PathBuf, u64>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn ping_pong_roundtrip() {
        let ping = WireMessage::ping();
        let mut buf = Vec::new();
        ping.write_to(&mut buf).await.unwrap();

        let mut reader = Cursor::new(buf);
        let read = WireMessage::read_from(&mut reader).await.unwrap();
        assert_eq!(read.msg_type, MessageType::Ping);
        assert_eq!(read.correlation_id, ping.correlation_id);
    }

    #[tokio::test]
    async fn oversized_length_prefix_is_rejected() {
        let mut buf = Vec::new();
        let bogus_len = MAX_MESSAGE_SIZE + 1;
        buf.extend_from_slice(&bogus_len.to_be_bytes());
        buf.extend_from_slice(&[0u8; 16]);

        let mut reader = Cursor::new(buf);
        let err = WireMessage::read_from(&mut reader).await.unwrap_err();
        assert!(matches!(err, Error::MessageTooLarge { .. }));
    }

    #[tokio::test]
    async fn invalid_json_is_reported() {
        let payload = b"not json";
        let mut buf = Vec::new();
        buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(payload);

        let mut reader = Cursor::new(buf);
        let err = WireMessage::read_from(&mut reader).await.unwrap_err();
        assert!(matches!(err, Error::Deserialize(_)));
    }

    #[test]
    fn payload_roundtrips_through_with_payload_and_payload_as() {
        let status = StatusResult {
            running: true,
            pid: 1234,
            uptime_secs: 60,
            last_activity_secs_ago: 1,
            idle_remaining_secs: 10_799,
        };
        let msg = WireMessage::with_payload(MessageType::StatusResult, Uuid::new_v4(), &status).unwrap();
        let read_back: StatusResult = msg.payload_as().unwrap();
        assert_eq!(read_back.pid, 1234);
    }

    #[test]
    fn payload_as_reports_shape_mismatch() {
        let msg = WireMessage::ping();
        let err = msg.payload_as::<StatusResult>().unwrap_err();
        assert!(matches!(err, Error::UnexpectedPayload { .. }));
    }
}
