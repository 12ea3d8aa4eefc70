//! Errors raised while framing or transporting wire messages.

/// Result alias for `same-wire` operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors the wire protocol can raise.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The socket was closed or failed mid-read/write.
    #[error("wire I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// A message's declared length exceeded [`crate::MAX_MESSAGE_SIZE`].
    #[error("message of {len} bytes exceeds the {max}-byte limit")]
    MessageTooLarge {
        /// The declared length.
        len: u32,
        /// The configured limit.
        max: u32,
    },

    /// The JSON payload could not be serialized.
    #[error("failed to serialize wire message: {0}")]
    Serialize(#[source] serde_json::Error),

    /// The JSON payload could not be deserialized.
    #[error("failed to deserialize wire message: {0}")]
    Deserialize(#[source] serde_json::Error),

    /// A response carried a payload shape the caller did not expect for
    /// its `msg_type`.
    #[error("unexpected payload for message type {msg_type:?}")]
    UnexpectedPayload {
        /// The message type whose payload failed to match.
        msg_type: crate::MessageType,
    },
}
