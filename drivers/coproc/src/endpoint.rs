//! # Endpoints
//!
//! Endpoint id allocation and the 64-bit endpoint set.
//!
//! ```text
//!  0          1..32                         32..64
//! ┌────┬─────────────────────────┬──────────────────────────────┐
//! │MGMT│ reserved (protocol)     │ dynamic (caller handlers)    │
//! └────┴─────────────────────────┴──────────────────────────────┘
//! ```

use core::fmt;

/// Management endpoint
pub const MGMT: u32 = 0;
/// Crash-log capture endpoint
pub const CRASHLOG: u32 = 1;
/// I/O-report capture endpoint
pub const IOREPORT: u32 = 4;

/// First dynamic endpoint
pub const DYNAMIC_BASE: u32 = 32;
/// One past the last dynamic endpoint
pub const DYNAMIC_END: u32 = 64;
/// Number of dynamic endpoints
pub const DYNAMIC_COUNT: usize = (DYNAMIC_END - DYNAMIC_BASE) as usize;

/// Whether `endpoint` is in the dynamic range
#[inline]
pub const fn is_dynamic(endpoint: u32) -> bool {
    endpoint >= DYNAMIC_BASE && endpoint < DYNAMIC_END
}

// =============================================================================
// ROUTING
// =============================================================================

/// Where an incoming message goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Management channel
    Management,
    /// Resource channel for this diagnostic endpoint
    Resource(u32),
    /// Caller-registered handler slot
    Dynamic(u32),
    /// Nobody handles it
    Unhandled(u32),
}

/// Classify an endpoint id
pub const fn route(endpoint: u32) -> Route {
    match endpoint {
        MGMT => Route::Management,
        CRASHLOG | IOREPORT => Route::Resource(endpoint),
        e if is_dynamic(e) => Route::Dynamic(e),
        e => Route::Unhandled(e),
    }
}

// =============================================================================
// ENDPOINT SET
// =============================================================================

/// Set of endpoint ids 0..64
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
#[repr(transparent)]
pub struct EndpointSet(u64);

impl EndpointSet {
    /// No endpoints
    pub const EMPTY: Self = Self(0);
    /// Reserved ids except the management endpoint
    pub const RESERVED: Self = Self(0xffff_fffe);
    /// Dynamic ids 32..64
    pub const DYNAMIC: Self = Self(0xffff_ffff_0000_0000);
    /// Endpoints the session starts on its own once discovery finishes
    pub const DIAGNOSTIC: Self = Self((1 << CRASHLOG) | (1 << IOREPORT));

    /// Build from raw bits
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Raw bits
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Single-endpoint set; ids beyond 63 give the empty set
    pub const fn single(endpoint: u32) -> Self {
        if endpoint < 64 {
            Self(1 << endpoint)
        } else {
            Self::EMPTY
        }
    }

    /// Whether `endpoint` is in the set
    pub const fn contains(self, endpoint: u32) -> bool {
        endpoint < 64 && self.0 & (1 << endpoint) != 0
    }

    /// Add an endpoint; returns false if the id is out of range
    pub fn insert(&mut self, endpoint: u32) -> bool {
        if endpoint >= 64 {
            return false;
        }
        self.0 |= 1 << endpoint;
        true
    }

    /// Union
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Intersection
    pub const fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// Whether the set is empty
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Number of endpoints
    pub const fn len(self) -> u32 {
        self.0.count_ones()
    }

    /// Endpoints in ascending order
    pub fn iter(self) -> impl Iterator<Item = u32> {
        (0..64u32).filter(move |&e| self.contains(e))
    }
}

impl core::ops::BitOr for EndpointSet {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl core::ops::BitOrAssign for EndpointSet {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for EndpointSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EndpointSet({:#018x})", self.0)
    }
}
