use crate::packet::PacketKind;
use crate::types::Failure;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Fewer bytes than the frame declared, or a length too small to hold the header.
    #[error("truncated frame")]
    Truncated,

    #[error("unknown packet kind {0}")]
    UnknownKind(u16),

    /// Payload decode failure or trailing bytes. `kind` is known when the header was valid.
    #[error("malformed frame: {message}")]
    Malformed {
        kind: Option<PacketKind>,
        message: String,
    },

    #[error("frame too large: {len} > {max}")]
    FrameTooLarge { len: usize, max: usize },

    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u16),

    /// The peer closed the stream cleanly between frames.
    #[error("connection closed")]
    ConnectionClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Whether the session must end. Non-fatal errors have already consumed
    /// the offending frame, so the stream is still aligned on a frame boundary.
    pub fn is_fatal(&self) -> bool {
        match self {
            ProtocolError::Truncated
            | ProtocolError::FrameTooLarge { .. }
            | ProtocolError::ConnectionClosed
            | ProtocolError::Io(_) => true,
            ProtocolError::UnknownKind(_)
            | ProtocolError::Malformed { .. }
            | ProtocolError::UnsupportedVersion(_) => false,
        }
    }

    /// Describe this error for an `ErrorResponse`.
    pub fn to_failure(&self) -> Failure {
        let kind = match self {
            ProtocolError::Truncated => "Truncated",
            ProtocolError::UnknownKind(_) => "UnknownKind",
            ProtocolError::Malformed { .. } => "Malformed",
            ProtocolError::FrameTooLarge { .. } => "FrameTooLarge",
            ProtocolError::UnsupportedVersion(_) => "UnsupportedVersion",
            ProtocolError::ConnectionClosed => "ConnectionClosed",
            ProtocolError::Io(_) => "Io",
        };
        Failure::from_error(kind, self)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The agent answered with an `ErrorResponse`.
    #[error("agent error: {0}")]
    Remote(Failure),

    #[error("unexpected {actual:?} in reply to {request:?}")]
    UnexpectedResponse {
        request: PacketKind,
        actual: PacketKind,
    },
}
