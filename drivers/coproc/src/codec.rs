//! # Wire Codec
//!
//! Bit-field layout of the 64-bit header word.
//!
//! Every logical field is a `(shift, width)` pair. Fields that appear in
//! the same message never share a bit; this is checked at compile time for
//! each message layout below, so adding a field that collides fails the
//! build.
//!
//! ```text
//!  63      60 59        52 51 50    44 43                               0
//! ┌──────────┬────────────┬──┬────────┬──────────────────────────────────┐
//! │  unused  │    TYPE    │  │ payload (per message type)                │
//! └──────────┴────────────┴──┴────────┴──────────────────────────────────┘
//! ```
//!
//! The layout is shared with the coprocessor firmware and must stay
//! bit-exact.

use bitflags::bitflags;
use static_assertions::{const_assert, const_assert_eq};

// =============================================================================
// FIELD
// =============================================================================

/// A contiguous bit range inside the header word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    /// Position of the least significant bit
    pub shift: u32,
    /// Number of bits
    pub width: u32,
}

impl Field {
    /// Define a field
    pub const fn new(shift: u32, width: u32) -> Self {
        Self { shift, width }
    }

    /// Largest value the field can hold
    pub const fn max_value(&self) -> u64 {
        if self.width >= 64 {
            u64::MAX
        } else {
            (1u64 << self.width) - 1
        }
    }

    /// Mask of the field bits in place
    pub const fn mask(&self) -> u64 {
        self.max_value() << self.shift
    }

    /// Extract the field from a header
    #[inline]
    pub const fn get(&self, word: u64) -> u64 {
        (word & self.mask()) >> self.shift
    }

    /// Place `value` in the field, truncated to its width
    #[inline]
    pub const fn put(&self, value: u64) -> u64 {
        (value & self.max_value()) << self.shift
    }

    /// Whether the field lies inside a 64-bit word
    pub const fn fits(&self) -> bool {
        self.width > 0 && self.shift + self.width <= 64
    }
}

/// Whether every field fits in a word and no two fields overlap
pub const fn fields_disjoint(fields: &[Field]) -> bool {
    let mut seen = 0u64;
    let mut i = 0;
    while i < fields.len() {
        if !fields[i].fits() || seen & fields[i].mask() != 0 {
            return false;
        }
        seen |= fields[i].mask();
        i += 1;
    }
    true
}

// =============================================================================
// FIELD TABLE
// =============================================================================

/// Header fields
pub mod field {
    use super::Field;

    /// Message type tag (all endpoints)
    pub const TYPE: Field = Field::new(52, 8);

    /// Power state value
    pub const PWR_STATE: Field = Field::new(0, 16);

    /// Lowest protocol version
    pub const HELLO_MINVER: Field = Field::new(0, 16);
    /// Highest protocol version
    pub const HELLO_MAXVER: Field = Field::new(16, 16);

    /// Endpoint to start
    pub const STARTEP_EP: Field = Field::new(32, 8);
    /// Start flag
    pub const STARTEP_START: Field = Field::new(1, 1);

    /// Advertised endpoint bits (request only)
    pub const EPMAP_BITMAP: Field = Field::new(0, 32);
    /// Bitmap base, in units of 32 endpoints
    pub const EPMAP_BASE: Field = Field::new(32, 3);
    /// Final fragment marker
    pub const EPMAP_LAST: Field = Field::new(51, 1);
    /// Non-final fragment marker (acknowledgment only)
    pub const EPMAP_MORE: Field = Field::new(0, 1);

    /// Buffer device address
    pub const BUFFER_ADDR: Field = Field::new(0, 44);
    /// Buffer size in pages
    pub const BUFFER_SIZE: Field = Field::new(44, 8);
}

/// Fields of each message layout
pub mod layout {
    use super::{field, Field};

    /// Hello and hello acknowledgment
    pub const HELLO: [Field; 3] = [field::TYPE, field::HELLO_MINVER, field::HELLO_MAXVER];
    /// Power state request/ack
    pub const POWER: [Field; 2] = [field::TYPE, field::PWR_STATE];
    /// Endpoint start request
    pub const START: [Field; 3] = [field::TYPE, field::STARTEP_EP, field::STARTEP_START];
    /// Endpoint map fragment from the coprocessor
    pub const EPMAP: [Field; 4] = [
        field::TYPE,
        field::EPMAP_BITMAP,
        field::EPMAP_BASE,
        field::EPMAP_LAST,
    ];
    /// Endpoint map acknowledgment from the host
    pub const EPMAP_ACK: [Field; 4] = [
        field::TYPE,
        field::EPMAP_MORE,
        field::EPMAP_BASE,
        field::EPMAP_LAST,
    ];
    /// Buffer request and grant
    pub const BUFFER: [Field; 3] = [field::TYPE, field::BUFFER_ADDR, field::BUFFER_SIZE];
}

const_assert!(fields_disjoint(&layout::HELLO));
const_assert!(fields_disjoint(&layout::POWER));
const_assert!(fields_disjoint(&layout::START));
const_assert!(fields_disjoint(&layout::EPMAP));
const_assert!(fields_disjoint(&layout::EPMAP_ACK));
const_assert!(fields_disjoint(&layout::BUFFER));

bitflags! {
    /// Single-bit flags of the endpoint map messages
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EpmapFlags: u64 {
        /// More fragments follow (acknowledgment only)
        const MORE = 1 << 0;
        /// This is the final fragment
        const LAST = 1 << 51;
    }
}

bitflags! {
    /// Single-bit flags of the endpoint start request
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StartFlags: u64 {
        /// Start the endpoint
        const START = 1 << 1;
    }
}

const_assert_eq!(EpmapFlags::MORE.bits(), field::EPMAP_MORE.mask());
const_assert_eq!(EpmapFlags::LAST.bits(), field::EPMAP_LAST.mask());
const_assert_eq!(StartFlags::START.bits(), field::STARTEP_START.mask());

// =============================================================================
// TYPE TAGS
// =============================================================================

/// Management endpoint message types
pub mod mgmt_type {
    /// Coprocessor announces its version range
    pub const HELLO: u8 = 1;
    /// Host answers with the agreed version
    pub const HELLO_ACK: u8 = 2;
    /// Host asks the coprocessor to start an endpoint
    pub const START_EP: u8 = 5;
    /// Host requests a coprocessor power state
    pub const IOP_PWR_STATE: u8 = 6;
    /// Coprocessor reports its power state
    pub const IOP_PWR_STATE_ACK: u8 = 7;
    /// Endpoint map fragment / acknowledgment
    pub const EPMAP: u8 = 8;
    /// Coprocessor reports the host power state it observed
    pub const AP_PWR_STATE: u8 = 11;
}

/// Resource endpoint message types
pub mod resource_type {
    /// Buffer request (coprocessor) and grant (host)
    pub const BUFFER_REQUEST: u8 = 1;
    /// I/O report event that must be echoed back
    pub const IOREPORT_ACK_A: u8 = 8;
    /// I/O report event that must be echoed back
    pub const IOREPORT_ACK_B: u8 = 12;
}

// =============================================================================
// GENERIC ENCODE / DECODE
// =============================================================================

/// Combine a type tag with a payload
///
/// Payload bits that overlap the type field are dropped.
#[inline]
pub const fn encode_type_and_value(type_tag: u8, value: u64) -> u64 {
    field::TYPE.put(type_tag as u64) | (value & !field::TYPE.mask())
}

/// Type tag of a header
#[inline]
pub const fn decode_type(header: u64) -> u8 {
    field::TYPE.get(header) as u8
}

// =============================================================================
// MANAGEMENT MESSAGES
// =============================================================================

/// One endpoint map fragment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpmapFragment {
    /// Bitmap base, in units of 32 endpoints
    pub base: u8,
    /// Endpoints `base * 32 + n` for every set bit `n`
    pub bitmap: u32,
    /// Final fragment
    pub last: bool,
}

/// Decoded management header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MgmtMessage {
    /// Version range offered by the coprocessor
    Hello {
        /// Lowest supported version
        min: u16,
        /// Highest supported version
        max: u16,
    },
    /// Version acknowledgment
    HelloAck {
        /// Lowest version
        min: u16,
        /// Highest version
        max: u16,
    },
    /// Endpoint start request
    StartEndpoint {
        /// Target endpoint
        endpoint: u8,
        /// Start flag
        start: bool,
    },
    /// Power state request (raw wire value)
    IopPowerState(u16),
    /// Power state acknowledgment (raw wire value)
    IopPowerStateAck(u16),
    /// Endpoint map fragment
    EndpointMap(EpmapFragment),
    /// Host power state seen by the coprocessor (raw wire value)
    ApPowerState(u16),
    /// Any other type tag
    Unknown(u8),
}

impl MgmtMessage {
    /// Decode a management header; never fails
    pub const fn decode(header: u64) -> Self {
        match decode_type(header) {
            mgmt_type::HELLO => Self::Hello {
                min: field::HELLO_MINVER.get(header) as u16,
                max: field::HELLO_MAXVER.get(header) as u16,
            },
            mgmt_type::HELLO_ACK => Self::HelloAck {
                min: field::HELLO_MINVER.get(header) as u16,
                max: field::HELLO_MAXVER.get(header) as u16,
            },
            mgmt_type::START_EP => Self::StartEndpoint {
                endpoint: field::STARTEP_EP.get(header) as u8,
                start: field::STARTEP_START.get(header) != 0,
            },
            mgmt_type::IOP_PWR_STATE => Self::IopPowerState(field::PWR_STATE.get(header) as u16),
            mgmt_type::IOP_PWR_STATE_ACK => {
                Self::IopPowerStateAck(field::PWR_STATE.get(header) as u16)
            },
            mgmt_type::EPMAP => Self::EndpointMap(EpmapFragment {
                base: field::EPMAP_BASE.get(header) as u8,
                bitmap: field::EPMAP_BITMAP.get(header) as u32,
                last: field::EPMAP_LAST.get(header) != 0,
            }),
            mgmt_type::AP_PWR_STATE => Self::ApPowerState(field::PWR_STATE.get(header) as u16),
            other => Self::Unknown(other),
        }
    }
}

/// Hello carrying a version range
pub const fn hello(min: u16, max: u16) -> u64 {
    encode_type_and_value(
        mgmt_type::HELLO,
        field::HELLO_MINVER.put(min as u64) | field::HELLO_MAXVER.put(max as u64),
    )
}

/// Hello acknowledgment pinning a single version
pub const fn hello_ack(version: u16) -> u64 {
    encode_type_and_value(
        mgmt_type::HELLO_ACK,
        field::HELLO_MINVER.put(version as u64) | field::HELLO_MAXVER.put(version as u64),
    )
}

/// Start request for `endpoint`
pub const fn start_endpoint(endpoint: u32) -> u64 {
    encode_type_and_value(
        mgmt_type::START_EP,
        field::STARTEP_EP.put(endpoint as u64) | StartFlags::START.bits(),
    )
}

/// Power state request
pub const fn power_state_request(state: u16) -> u64 {
    encode_type_and_value(mgmt_type::IOP_PWR_STATE, field::PWR_STATE.put(state as u64))
}

/// Power state acknowledgment
pub const fn power_state_ack(state: u16) -> u64 {
    encode_type_and_value(
        mgmt_type::IOP_PWR_STATE_ACK,
        field::PWR_STATE.put(state as u64),
    )
}

/// Host power state report
pub const fn ap_power_state(state: u16) -> u64 {
    encode_type_and_value(mgmt_type::AP_PWR_STATE, field::PWR_STATE.put(state as u64))
}

/// Endpoint map fragment
pub const fn epmap(fragment: EpmapFragment) -> u64 {
    let last = if fragment.last {
        EpmapFlags::LAST.bits()
    } else {
        0
    };
    encode_type_and_value(
        mgmt_type::EPMAP,
        field::EPMAP_BITMAP.put(fragment.bitmap as u64)
            | field::EPMAP_BASE.put(fragment.base as u64)
            | last,
    )
}

/// Endpoint map acknowledgment
///
/// Carries the fragment base and exactly one of `LAST` / `MORE`.
pub const fn epmap_ack(base: u8, last: bool) -> u64 {
    let flag = if last {
        EpmapFlags::LAST
    } else {
        EpmapFlags::MORE
    };
    encode_type_and_value(
        mgmt_type::EPMAP,
        field::EPMAP_BASE.put(base as u64) | flag.bits(),
    )
}

/// Flags present in an endpoint map header
pub const fn epmap_flags(header: u64) -> EpmapFlags {
    EpmapFlags::from_bits_truncate(header)
}

// =============================================================================
// RESOURCE MESSAGES
// =============================================================================

/// Decoded resource endpoint header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceMessage {
    /// Buffer request
    BufferRequest {
        /// Device address (zero when the coprocessor needs a buffer)
        addr: u64,
        /// Size in pages
        pages: u8,
    },
    /// Any other type tag
    Other(u8),
}

impl ResourceMessage {
    /// Decode a resource header; never fails
    pub const fn decode(header: u64) -> Self {
        match decode_type(header) {
            resource_type::BUFFER_REQUEST => Self::BufferRequest {
                addr: field::BUFFER_ADDR.get(header),
                pages: field::BUFFER_SIZE.get(header) as u8,
            },
            other => Self::Other(other),
        }
    }
}

/// Buffer request or grant
pub const fn buffer_request(addr: u64, pages: u8) -> u64 {
    encode_type_and_value(
        resource_type::BUFFER_REQUEST,
        field::BUFFER_ADDR.put(addr) | field::BUFFER_SIZE.put(pages as u64),
    )
}
