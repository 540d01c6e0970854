//! # Management Channel
//!
//! Control traffic on endpoint 0: version handshake, endpoint discovery,
//! power state and endpoint start requests.
//!
//! ```text
//!                 hello ok                 epmap (last)
//! AwaitingHello ───────────→ Negotiating ─────────────→ Ready
//!       ▲                    Endpoints                    │
//!       └──────────── boot() ─────────────────────────────┘
//! ```
//!
//! A hello in any state restarts negotiation. Messages other than hello
//! that arrive before it are reported and then handled anyway.

use core::fmt;

use helix_mailbox::{Delay, MailboxPort};

use crate::codec::{self, EpmapFragment, MgmtMessage};
use crate::endpoint::{self, EndpointSet};
use crate::error::{Error, Result};
use crate::power::PowerState;
use crate::resource::BufferAllocator;
use crate::session::Session;

// =============================================================================
// VERSIONS
// =============================================================================

/// Inclusive protocol version range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionRange {
    /// Lowest version
    pub min: u16,
    /// Highest version
    pub max: u16,
}

impl VersionRange {
    /// Versions this host speaks by default
    pub const LOCAL: Self = Self::new(11, 12);

    /// Create a range
    pub const fn new(min: u16, max: u16) -> Self {
        Self { min, max }
    }

    /// Highest version both sides speak, if any
    pub const fn negotiate(&self, peer: VersionRange) -> Option<u16> {
        if self.max < peer.min || self.min > peer.max {
            return None;
        }
        if self.max < peer.max {
            Some(self.max)
        } else {
            Some(peer.max)
        }
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}

// =============================================================================
// STATE
// =============================================================================

/// Management handshake progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MgmtState {
    /// Waiting for the coprocessor hello
    #[default]
    AwaitingHello,
    /// Version agreed, endpoint map in progress
    NegotiatingEndpoints,
    /// Endpoint map complete
    Ready,
}

/// Endpoint map fragments received so far
///
/// Bits live here until the final fragment; callers only ever see the
/// committed set.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct EpmapAccumulator {
    pending: EndpointSet,
    fragments: u32,
}

impl EpmapAccumulator {
    /// Fold a fragment in; returns false if some bits fell beyond id 63
    pub(crate) fn fold(&mut self, fragment: EpmapFragment) -> bool {
        let shift = fragment.base as u32 * 32;
        let bits = (fragment.bitmap as u64).checked_shl(shift).unwrap_or(0);
        self.pending |= EndpointSet::from_bits(bits);
        self.fragments += 1;
        fragment.bitmap == 0 || shift < 64
    }

    /// Take the accumulated set and reset
    pub(crate) fn take(&mut self) -> EndpointSet {
        let set = self.pending;
        *self = Self::default();
        set
    }

    /// Whether no fragment has arrived since the last reset
    pub(crate) fn is_empty(&self) -> bool {
        self.fragments == 0
    }
}

// =============================================================================
// HANDLERS
// =============================================================================

impl<P: MailboxPort, A: BufferAllocator, D: Delay> Session<P, A, D> {
    /// Handle one management message
    pub(crate) fn handle_management(&mut self, header: u64) -> Result<()> {
        self.stats.management += 1;
        let msg = MgmtMessage::decode(header);

        if self.mgmt_state == MgmtState::AwaitingHello
            && !matches!(msg, MgmtMessage::Hello { .. })
        {
            self.stats.protocol_violations += 1;
            log::warn!(
                "Coproc: management message {:#018x} before hello",
                header
            );
        }

        match msg {
            MgmtMessage::Hello { min, max } => self.handle_hello(VersionRange::new(min, max)),
            MgmtMessage::IopPowerStateAck(value) => {
                self.power_state = PowerState::from_wire(value);
                log::debug!("Coproc: power state now {}", self.power_state);
                Ok(())
            },
            MgmtMessage::ApPowerState(value) => {
                self.ap_power_state = PowerState::from_wire(value);
                log::debug!("Coproc: host power state seen as {}", self.ap_power_state);
                Ok(())
            },
            MgmtMessage::EndpointMap(fragment) => self.handle_epmap(fragment),
            _ => Err(Error::UnsupportedEvent {
                endpoint: endpoint::MGMT,
                kind: codec::decode_type(header),
            }),
        }
    }

    fn handle_hello(&mut self, peer: VersionRange) -> Result<()> {
        let local = self.config.versions;

        let Some(version) = local.negotiate(peer) else {
            log::error!(
                "Coproc: coprocessor versions {} incompatible with {}",
                peer,
                local
            );
            return Err(Error::VersionMismatch { local, peer });
        };

        self.send(endpoint::MGMT, codec::hello_ack(version))?;

        self.agreed_version = Some(version);
        if !self.epmap.is_empty() {
            log::debug!("Coproc: hello discards a partial endpoint map");
        }
        self.epmap.take();
        self.mgmt_state = MgmtState::NegotiatingEndpoints;
        log::info!("Coproc: protocol version {}", version);
        Ok(())
    }

    fn handle_epmap(&mut self, fragment: EpmapFragment) -> Result<()> {
        // Discovery runs once per hello; later fragments only add endpoints
        let rediscovery = self.mgmt_state == MgmtState::Ready;
        if rediscovery {
            self.stats.protocol_violations += 1;
            log::warn!(
                "Coproc: endpoint map base {} after discovery finished",
                fragment.base
            );
        }

        if !self.epmap.fold(fragment) {
            log::warn!(
                "Coproc: endpoint map base {} out of range, bits dropped",
                fragment.base
            );
        }

        self.send(
            endpoint::MGMT,
            codec::epmap_ack(fragment.base, fragment.last),
        )?;

        if !fragment.last {
            return Ok(());
        }

        self.known_endpoints |= self.epmap.take();
        if rediscovery {
            return Ok(());
        }

        self.mgmt_state = MgmtState::Ready;
        log::info!(
            "Coproc: {} endpoints advertised {:?}",
            self.known_endpoints.len(),
            self.known_endpoints
        );

        let auto = self
            .config
            .auto_start
            .intersection(EndpointSet::RESERVED)
            .intersection(self.known_endpoints);
        for ep in auto.iter() {
            self.request_start(ep)?;
        }

        Ok(())
    }

    /// Ask the coprocessor to start `endpoint`
    pub(crate) fn request_start(&mut self, endpoint: u32) -> Result<()> {
        log::debug!("Coproc: starting endpoint {}", endpoint);
        self.send(endpoint::MGMT, codec::start_endpoint(endpoint))?;
        self.stats.starts_requested += 1;
        Ok(())
    }
}
