//! # Session Errors
//!
//! Only a version mismatch ends a session. Everything else concerns a
//! single message: the caller logs it and keeps polling.

use core::fmt;

use helix_mailbox::MailboxError;

use crate::management::VersionRange;

// =============================================================================
// RESULT TYPE
// =============================================================================

/// Session result type
pub type Result<T> = core::result::Result<T, Error>;

// =============================================================================
// ERROR ENUM
// =============================================================================

/// Session protocol errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// No message arrived within the retry budget
    TransportTimeout,
    /// The mailbox failed a send or receive
    Transport(MailboxError),
    /// Peer version range does not overlap ours
    VersionMismatch {
        /// Versions this host speaks
        local: VersionRange,
        /// Versions the coprocessor offered
        peer: VersionRange,
    },
    /// A known endpoint received a message type it does not implement
    UnsupportedEvent {
        /// Receiving endpoint
        endpoint: u32,
        /// Type tag of the message
        kind: u8,
    },
    /// No handler for this endpoint
    UnhandledEndpoint(u32),
    /// Endpoint outside the dynamic range or never advertised
    InvalidEndpointRequest(u32),
    /// Endpoint already has a handler
    EndpointInUse(u32),
    /// Buffer for a resource request could not be provided
    AllocFailure(AllocError),
}

impl Error {
    /// Whether the session cannot make progress after this error
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::VersionMismatch { .. })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TransportTimeout => write!(f, "mailbox receive timed out"),
            Self::Transport(e) => write!(f, "mailbox transport error: {}", e),
            Self::VersionMismatch { local, peer } => write!(
                f,
                "version mismatch: host supports {}, coprocessor supports {}",
                local, peer
            ),
            Self::UnsupportedEvent { endpoint, kind } => {
                write!(f, "unsupported event {:#x} on endpoint {}", kind, endpoint)
            },
            Self::UnhandledEndpoint(ep) => write!(f, "unhandled endpoint {}", ep),
            Self::InvalidEndpointRequest(ep) => write!(f, "invalid endpoint request {}", ep),
            Self::EndpointInUse(ep) => write!(f, "endpoint {} already started", ep),
            Self::AllocFailure(e) => write!(f, "buffer allocation failed: {}", e),
        }
    }
}

impl From<MailboxError> for Error {
    fn from(e: MailboxError) -> Self {
        Error::Transport(e)
    }
}

impl From<AllocError> for Error {
    fn from(e: AllocError) -> Self {
        Error::AllocFailure(e)
    }
}

// =============================================================================
// SUB-ERROR TYPES
// =============================================================================

/// Buffer allocator errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// Not enough memory
    OutOfMemory,
    /// Buffer address cannot be expressed in a buffer message
    Unaddressable,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::Unaddressable => write!(f, "address out of range"),
        }
    }
}
