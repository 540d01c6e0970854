//! # Power State
//!
//! Coarse lifecycle value shared by host and coprocessor.

use core::fmt;

/// Raw power-state values on the wire
pub mod wire {
    /// Powered off
    pub const OFF: u16 = 0x00;
    /// Sleeping
    pub const SLEEP: u16 = 0x01;
    /// Quiesced
    pub const QUIESCED: u16 = 0x10;
    /// Running
    pub const ON: u16 = 0x20;
}

/// Power state as tracked by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerState {
    /// Nothing acknowledged yet
    #[default]
    Unknown,
    /// Power-on requested, waiting for acknowledgment
    Booting,
    /// Powered off
    Off,
    /// Sleeping
    Sleep,
    /// Quiesced
    Quiesced,
    /// Running
    On,
    /// Value this host does not know about
    Other(u16),
}

impl PowerState {
    /// Decode a wire value
    pub const fn from_wire(value: u16) -> Self {
        match value {
            wire::OFF => Self::Off,
            wire::SLEEP => Self::Sleep,
            wire::QUIESCED => Self::Quiesced,
            wire::ON => Self::On,
            other => Self::Other(other),
        }
    }

    /// Wire value, if this state can be sent to the coprocessor
    pub const fn to_wire(self) -> Option<u16> {
        match self {
            Self::Off => Some(wire::OFF),
            Self::Sleep => Some(wire::SLEEP),
            Self::Quiesced => Some(wire::QUIESCED),
            Self::On => Some(wire::ON),
            Self::Other(v) => Some(v),
            Self::Unknown | Self::Booting => None,
        }
    }

    /// Whether the coprocessor is fully up
    pub const fn is_on(self) -> bool {
        matches!(self, Self::On)
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Booting => write!(f, "booting"),
            Self::Off => write!(f, "off"),
            Self::Sleep => write!(f, "sleep"),
            Self::Quiesced => write!(f, "quiesced"),
            Self::On => write!(f, "on"),
            Self::Other(v) => write!(f, "{:#x}", v),
        }
    }
}
