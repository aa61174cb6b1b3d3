use thiserror::Error;

use crate::rooms::MessageKind;

/// Errors raised by room membership operations.
#[derive(Debug, Error)]
pub enum RoomError {
    #[error("client is not in a room")]
    NotInRoom,

    /// The name is already bound to a different identity.
    #[error("{0} may not enter the room")]
    MayNotEnter(String),
}

/// Errors raised while decoding a client frame.
///
/// None of these terminate a connection; the offending frame is dropped.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed handshake")]
    MalformedHandshake,

    #[error("malformed profile change")]
    MalformedProfile,

    #[error("unknown message kind: {0}")]
    UnknownMessageKind(i64),

    #[error("{0:?} may not be sent by a client")]
    UnexpectedKind(MessageKind),

    #[error("undecodable frame: {0}")]
    Decode(#[from] serde_json::Error),
}
