//! # Helix Mailbox Port
//!
//! Narrow interface over a fixed-width, doorbell-notified mailbox used to
//! talk to an auxiliary coprocessor.
//!
//! Every transfer is exactly one [`Message`]: a 64-bit header word and a
//! 32-bit endpoint identifier. The hardware FIFO itself lives in the
//! platform driver; this crate only describes what the protocol layers above
//! it may rely on.
//!
//! ```text
//! ┌──────────────┐   send(Message)   ┌──────────────┐
//! │ Session code │ ────────────────→ │ MailboxPort  │ ──→ doorbell / FIFO
//! │              │ ←──────────────── │ (platform)   │ ←── coprocessor
//! └──────────────┘   recv()          └──────────────┘
//! ```
//!
//! ## Components
//!
//! - [`MailboxPort`]: send/receive of one raw message
//! - [`Delay`]: pause between receive attempts
//! - [`RetryPolicy`]: bounded retry combinator
//! - [`SharedMailbox`]: serializes a port shared with another context

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

use core::fmt;

pub mod retry;
pub mod shared;

pub use retry::{RetryError, RetryPolicy};
pub use shared::SharedMailbox;

// =============================================================================
// MESSAGE
// =============================================================================

/// One mailbox transfer
///
/// ```text
/// word 0: ┌───────────────────────────────────────────────────────┐
///         │                 header (protocol defined)             │
///         └───────────────────────────────────────────────────────┘
/// word 1: ┌───────────────────────────┬───────────────────────────┐
///         │        unused (zero)      │        endpoint id        │
///         └───────────────────────────┴───────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Message {
    /// Control/data word
    pub header: u64,
    /// Endpoint identifier
    pub endpoint: u32,
}

impl Message {
    /// Create a message for an endpoint
    pub const fn new(endpoint: u32, header: u64) -> Self {
        Self { header, endpoint }
    }

    /// Build from the two raw hardware words
    ///
    /// Upper bits of the second word are ignored.
    pub const fn from_words(word0: u64, word1: u64) -> Self {
        Self {
            header: word0,
            endpoint: word1 as u32,
        }
    }

    /// Raw hardware words
    pub const fn to_words(self) -> [u64; 2] {
        [self.header, self.endpoint as u64]
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// Mailbox transport errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxError {
    /// No message is pending (try again later)
    Empty,
    /// Outgoing FIFO is full
    Full,
    /// Hardware reported a transfer error
    Io,
}

impl MailboxError {
    /// Whether retrying the same operation later may succeed
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Empty | Self::Full)
    }
}

impl fmt::Display for MailboxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "mailbox empty"),
            Self::Full => write!(f, "mailbox full"),
            Self::Io => write!(f, "mailbox I/O error"),
        }
    }
}

// =============================================================================
// PORT TRAIT
// =============================================================================

/// Raw mailbox access
///
/// Implementations must not block indefinitely: `recv` returns
/// [`MailboxError::Empty`] when nothing is pending and the caller decides
/// how long to keep polling.
pub trait MailboxPort {
    /// Queue one message to the coprocessor
    fn send(&mut self, msg: Message) -> Result<(), MailboxError>;

    /// Take the next message from the coprocessor
    fn recv(&mut self) -> Result<Message, MailboxError>;
}

impl<P: MailboxPort + ?Sized> MailboxPort for &mut P {
    fn send(&mut self, msg: Message) -> Result<(), MailboxError> {
        (**self).send(msg)
    }

    fn recv(&mut self) -> Result<Message, MailboxError> {
        (**self).recv()
    }
}

// =============================================================================
// DELAY
// =============================================================================

/// Busy-wait source used between polling attempts
pub trait Delay {
    /// Pause for roughly `us` microseconds
    fn delay_us(&mut self, us: u32);
}

/// Calibrated spin delay
///
/// Good enough for early boot where no timer is available yet.
#[derive(Debug, Clone, Copy)]
pub struct SpinDelay {
    /// Spin iterations per microsecond
    pub spins_per_us: u32,
}

impl SpinDelay {
    /// Create a spin delay with the given calibration
    pub const fn new(spins_per_us: u32) -> Self {
        Self { spins_per_us }
    }
}

impl Default for SpinDelay {
    fn default() -> Self {
        Self::new(100)
    }
}

impl Delay for SpinDelay {
    fn delay_us(&mut self, us: u32) {
        let spins = (us as u64) * (self.spins_per_us as u64);
        for _ in 0..spins {
            core::hint::spin_loop();
        }
    }
}
