//! # Session Driver
//!
//! Per-coprocessor state and the poll loop that feeds it.
//!
//! One `Session` exists per attached coprocessor and is owned by whoever
//! attached it. All state changes happen inside [`Session::poll_once`] on the
//! caller's thread; there is no internal locking.

use alloc::boxed::Box;
use core::fmt;

use helix_mailbox::{Delay, MailboxPort, Message, RetryError, RetryPolicy};

use crate::codec;
use crate::endpoint::{self, EndpointSet, Route};
use crate::error::{Error, Result};
use crate::management::{EpmapAccumulator, MgmtState, VersionRange};
use crate::power::{self, PowerState};
use crate::registry::{EndpointHandler, EndpointRegistry};
use crate::resource::BufferAllocator;

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Session configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Protocol versions this host speaks
    pub versions: VersionRange,
    /// Receive polling budget
    pub retry: RetryPolicy,
    /// Reserved endpoints started automatically once discovery finishes
    pub auto_start: EndpointSet,
}

impl SessionConfig {
    /// Default configuration
    pub const fn new() -> Self {
        Self {
            versions: VersionRange::LOCAL,
            retry: RetryPolicy::new(RetryPolicy::DEFAULT_ATTEMPTS, RetryPolicy::DEFAULT_DELAY_US),
            auto_start: EndpointSet::DIAGNOSTIC,
        }
    }

    /// Replace the retry policy
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replace the supported version range
    pub const fn with_versions(mut self, versions: VersionRange) -> Self {
        self.versions = versions;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// STATISTICS
// =============================================================================

/// Session statistics
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    /// Messages received
    pub messages_received: u64,
    /// Messages handled by the management channel
    pub management: u64,
    /// Messages handled by the resource channel
    pub resource: u64,
    /// Messages delivered to registered handlers
    pub dynamic: u64,
    /// Errors returned from `poll_once`
    pub errors: u64,
    /// Management messages received before hello or after discovery
    pub protocol_violations: u64,
    /// Buffers handed to the coprocessor
    pub buffers_granted: u64,
    /// Endpoint start requests sent
    pub starts_requested: u64,
}

// =============================================================================
// SESSION
// =============================================================================

/// Protocol session with one coprocessor
pub struct Session<P, A, D> {
    pub(crate) port: P,
    pub(crate) allocator: A,
    pub(crate) delay: D,
    pub(crate) config: SessionConfig,
    pub(crate) power_state: PowerState,
    pub(crate) ap_power_state: PowerState,
    pub(crate) known_endpoints: EndpointSet,
    pub(crate) epmap: EpmapAccumulator,
    pub(crate) mgmt_state: MgmtState,
    pub(crate) agreed_version: Option<u16>,
    pub(crate) registry: EndpointRegistry,
    pub(crate) stats: SessionStats,
}

impl<P: MailboxPort, A: BufferAllocator, D: Delay> Session<P, A, D> {
    /// Create a session over an attached mailbox
    pub fn new(port: P, allocator: A, delay: D, config: SessionConfig) -> Self {
        Self {
            port,
            allocator,
            delay,
            config,
            power_state: PowerState::Unknown,
            ap_power_state: PowerState::Unknown,
            known_endpoints: EndpointSet::EMPTY,
            epmap: EpmapAccumulator::default(),
            mgmt_state: MgmtState::AwaitingHello,
            agreed_version: None,
            registry: EndpointRegistry::new(),
            stats: SessionStats::default(),
        }
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// Last power state acknowledged by the coprocessor
    pub fn power_state(&self) -> PowerState {
        self.power_state
    }

    /// Host power state last reported by the coprocessor
    pub fn ap_power_state(&self) -> PowerState {
        self.ap_power_state
    }

    /// Endpoints the coprocessor has advertised
    pub fn known_endpoints(&self) -> EndpointSet {
        self.known_endpoints
    }

    /// Handshake progress
    pub fn mgmt_state(&self) -> MgmtState {
        self.mgmt_state
    }

    /// Version agreed in the last successful hello
    pub fn agreed_version(&self) -> Option<u16> {
        self.agreed_version
    }

    /// Configuration in use
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Session statistics
    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Dynamic endpoint handlers
    pub fn registry(&self) -> &EndpointRegistry {
        &self.registry
    }

    /// Tear the session down and give back the collaborators
    pub fn into_parts(self) -> (P, A, D) {
        (self.port, self.allocator, self.delay)
    }

    // -------------------------------------------------------------------------
    // Caller operations
    // -------------------------------------------------------------------------

    /// Start a dynamic endpoint and route its messages to `handler`
    ///
    /// The endpoint must lie in 32..64 and must have been advertised by the
    /// coprocessor. Nothing is sent when the request is rejected.
    pub fn start_endpoint<H>(&mut self, endpoint: u32, handler: H) -> Result<()>
    where
        H: EndpointHandler + 'static,
    {
        if !endpoint::is_dynamic(endpoint) || !self.known_endpoints.contains(endpoint) {
            log::warn!("Coproc: refusing to start endpoint {}", endpoint);
            return Err(Error::InvalidEndpointRequest(endpoint));
        }

        self.registry.register(endpoint, Box::new(handler))?;

        if let Err(e) = self.request_start(endpoint) {
            self.registry.release(endpoint);
            return Err(e);
        }
        Ok(())
    }

    /// Send a raw header on an endpoint
    pub fn send_on_endpoint(&mut self, endpoint: u32, value: u64) -> Result<()> {
        self.send(endpoint, value)
    }

    pub(crate) fn send(&mut self, endpoint: u32, header: u64) -> Result<()> {
        self.port.send(Message::new(endpoint, header))?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Driver
    // -------------------------------------------------------------------------

    /// Receive and handle exactly one message
    ///
    /// Errors concern this message only; polling may continue afterwards
    /// unless the error is fatal.
    pub fn poll_once(&mut self) -> Result<()> {
        let result = self.receive().and_then(|msg| self.dispatch(msg));

        if let Err(e) = &result {
            self.stats.errors += 1;
            if e.is_fatal() {
                log::error!("Coproc: {}", e);
            } else {
                log::warn!("Coproc: {}", e);
            }
        }
        result
    }

    fn receive(&mut self) -> Result<Message> {
        let msg = self
            .config
            .retry
            .recv(&mut self.port, &mut self.delay)
            .map_err(|e| match e {
                RetryError::Exhausted { .. } => Error::TransportTimeout,
                RetryError::Failed(err) => Error::Transport(err),
            })?;

        self.stats.messages_received += 1;
        #[cfg(feature = "debug")]
        log::trace!(
            "Coproc: rx endpoint {} header {:#018x}",
            msg.endpoint,
            msg.header
        );
        Ok(msg)
    }

    fn dispatch(&mut self, msg: Message) -> Result<()> {
        match endpoint::route(msg.endpoint) {
            Route::Management => self.handle_management(msg.header),
            Route::Resource(ep) => self.handle_resource(ep, msg.header),
            Route::Dynamic(ep) => {
                self.stats.dynamic += 1;
                self.registry.dispatch(ep, msg.header, &mut self.port)
            },
            Route::Unhandled(ep) => Err(Error::UnhandledEndpoint(ep)),
        }
    }

    /// Power the coprocessor on and wait until it confirms
    ///
    /// Any error from polling ends the boot immediately; the caller decides
    /// whether to try again. A coprocessor that keeps talking without ever
    /// acknowledging `On` keeps this loop running.
    pub fn boot(&mut self) -> Result<()> {
        log::info!("Coproc: booting");

        self.mgmt_state = MgmtState::AwaitingHello;
        if !self.epmap.is_empty() {
            log::debug!("Coproc: boot discards a partial endpoint map");
        }
        self.epmap.take();
        self.power_state = PowerState::Booting;

        self.send(endpoint::MGMT, codec::power_state_request(power::wire::ON))?;

        while !self.power_state.is_on() {
            self.poll_once()?;
        }

        log::info!(
            "Coproc: running, protocol version {:?}, endpoints {:?}",
            self.agreed_version,
            self.known_endpoints
        );
        Ok(())
    }
}

impl<P, A, D> fmt::Debug for Session<P, A, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("power_state", &self.power_state)
            .field("mgmt_state", &self.mgmt_state)
            .field("agreed_version", &self.agreed_version)
            .field("known_endpoints", &self.known_endpoints)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use alloc::rc::Rc;
    use alloc::vec::Vec;
    use core::cell::RefCell;

    use super::*;
    use crate::codec::{mgmt_type, EpmapFragment};
    use crate::registry::Reply;
    use crate::testing::{mgmt, session, BumpAllocator, NoDelay, ScriptedPort};

    fn advertise(s: &mut Session<ScriptedPort, BumpAllocator, NoDelay>, bitmap_hi: u32) {
        s.port.push(mgmt(codec::hello(11, 12)));
        s.port.push(mgmt(codec::epmap(EpmapFragment {
            base: 0,
            bitmap: 0b1_0010,
            last: false,
        })));
        s.port.push(mgmt(codec::epmap(EpmapFragment {
            base: 1,
            bitmap: bitmap_hi,
            last: true,
        })));
        for _ in 0..3 {
            s.poll_once().unwrap();
        }
        s.port.sent.clear();
    }

    struct Collect(Rc<RefCell<Vec<u64>>>);

    impl EndpointHandler for Collect {
        fn handle(&mut self, value: u64, _reply: &mut Reply<'_>) {
            self.0.borrow_mut().push(value);
        }
    }

    #[test]
    fn test_start_endpoint_rejects_reserved_and_out_of_range() {
        let mut s = session();
        advertise(&mut s, u32::MAX);

        assert_eq!(
            s.start_endpoint(31, Collect(Default::default())),
            Err(Error::InvalidEndpointRequest(31))
        );
        assert_eq!(
            s.start_endpoint(64, Collect(Default::default())),
            Err(Error::InvalidEndpointRequest(64))
        );
        assert!(s.port.sent.is_empty());
    }

    #[test]
    fn test_start_endpoint_requires_advertisement() {
        let mut s = session();
        advertise(&mut s, 0);

        assert_eq!(
            s.start_endpoint(40, Collect(Default::default())),
            Err(Error::InvalidEndpointRequest(40))
        );
        assert!(s.port.sent.is_empty());
    }

    #[test]
    fn test_start_endpoint_sends_one_request() {
        let mut s = session();
        advertise(&mut s, 1 << 8);

        s.start_endpoint(40, Collect(Default::default())).unwrap();

        assert_eq!(s.port.sent, [Message::new(0, codec::start_endpoint(40))]);
        assert!(s.registry().is_registered(40));
        assert_eq!(
            s.start_endpoint(40, Collect(Default::default())),
            Err(Error::EndpointInUse(40))
        );
        assert_eq!(s.port.sent.len(), 1);
    }

    #[test]
    fn test_start_endpoint_send_failure_frees_slot() {
        let mut s = session();
        advertise(&mut s, 1 << 8);
        s.port.fail_send = true;

        assert!(s.start_endpoint(40, Collect(Default::default())).is_err());
        assert!(!s.registry().is_registered(40));
    }

    #[test]
    fn test_dynamic_dispatch() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut s = session();
        advertise(&mut s, 1 << 1);
        s.start_endpoint(33, Collect(seen.clone())).unwrap();

        s.port.push(Message::new(33, 0xabcd));
        s.poll_once().unwrap();

        assert_eq!(*seen.borrow(), [0xabcd]);
        assert_eq!(s.stats().dynamic, 1);
    }

    #[test]
    fn test_unhandled_endpoints() {
        let mut s = session();
        s.port.push(Message::new(45, 1));
        s.port.push(Message::new(7, 1));
        s.port.push(Message::new(100, 1));

        assert_eq!(s.poll_once(), Err(Error::UnhandledEndpoint(45)));
        assert_eq!(s.poll_once(), Err(Error::UnhandledEndpoint(7)));
        assert_eq!(s.poll_once(), Err(Error::UnhandledEndpoint(100)));
        assert_eq!(s.stats().errors, 3);
        assert_eq!(s.stats().messages_received, 3);
    }

    #[test]
    fn test_send_on_endpoint_passthrough() {
        let mut s = session();
        s.send_on_endpoint(42, 0x99).unwrap();

        assert_eq!(s.port.sent, [Message::new(42, 0x99)]);
        assert_eq!(s.power_state(), PowerState::Unknown);
        assert!(s.known_endpoints().is_empty());
    }

    #[test]
    fn test_poll_timeout() {
        let mut s = session();
        assert_eq!(s.poll_once(), Err(Error::TransportTimeout));
        assert_eq!(s.port.polls, s.config().retry.attempts);
        assert_eq!(s.delay.waited_us, s.config().retry.budget_us());
    }

    #[test]
    fn test_poll_transport_error() {
        let mut s = session();
        s.port.fail_recv = true;
        assert_eq!(
            s.poll_once(),
            Err(Error::Transport(helix_mailbox::MailboxError::Io))
        );
    }

    #[test]
    fn test_boot_converges() {
        let mut s = session();
        s.port.push(mgmt(codec::hello(11, 12)));
        s.port.push(mgmt(codec::epmap(EpmapFragment {
            base: 0,
            bitmap: 0b1_0011,
            last: true,
        })));
        s.port.push(mgmt(codec::power_state_ack(power::wire::ON)));
        // Left in the queue: boot must stop at the ack
        s.port.push(Message::new(1, codec::buffer_request(0, 1)));

        s.boot().unwrap();

        assert_eq!(s.power_state(), PowerState::On);
        assert_eq!(s.mgmt_state(), MgmtState::Ready);
        assert_eq!(s.port.inbox.len(), 1);

        let sent: Vec<u64> = s.port.sent.iter().map(|m| m.header).collect();
        assert_eq!(
            sent,
            [
                codec::power_state_request(power::wire::ON),
                codec::hello_ack(12),
                codec::epmap_ack(0, true),
                codec::start_endpoint(1),
                codec::start_endpoint(4),
            ]
        );
    }

    #[test]
    fn test_boot_times_out() {
        let mut s = session();

        assert_eq!(s.boot(), Err(Error::TransportTimeout));
        assert_eq!(s.power_state(), PowerState::Booting);
        assert_eq!(s.port.sent.len(), 1);
        assert_eq!(codec::decode_type(s.port.sent[0].header), mgmt_type::IOP_PWR_STATE);
    }

    #[test]
    fn test_boot_surfaces_version_mismatch() {
        let mut s = session();
        s.port.push(mgmt(codec::hello(20, 30)));
        s.port.push(mgmt(codec::power_state_ack(power::wire::ON)));

        let err = s.boot().unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(s.power_state(), PowerState::Booting);
    }

    #[test]
    fn test_reboot_resets_handshake_keeps_endpoints() {
        let mut s = session();
        advertise(&mut s, 1 << 8);
        s.port.push(mgmt(codec::hello(11, 12)));
        s.port.push(mgmt(codec::power_state_ack(power::wire::ON)));

        s.boot().unwrap();

        assert!(s.known_endpoints().contains(40));
        assert_eq!(s.mgmt_state(), MgmtState::NegotiatingEndpoints);
    }

    #[test]
    fn test_boot_discards_partial_map() {
        let mut s = session();
        s.port.push(mgmt(codec::hello(11, 12)));
        s.port.push(mgmt(codec::epmap(EpmapFragment {
            base: 0,
            bitmap: 0b1000,
            last: false,
        })));
        s.poll_once().unwrap();
        s.poll_once().unwrap();
        assert!(!s.epmap.is_empty());

        // No hello this time: only the reboot can have cleared the map
        s.port.push(mgmt(codec::epmap(EpmapFragment {
            base: 1,
            bitmap: 0b1,
            last: true,
        })));
        s.port.push(mgmt(codec::power_state_ack(power::wire::ON)));

        s.boot().unwrap();

        assert_eq!(s.known_endpoints().bits(), 1 << 32);
        assert!(s.epmap.is_empty());
        assert_eq!(s.stats().protocol_violations, 1);
    }

    #[test]
    fn test_into_parts_returns_collaborators() {
        let mut s = session();
        s.port.push(Message::new(1, codec::buffer_request(0, 2)));
        s.poll_once().unwrap();
        s.send_on_endpoint(40, 7).unwrap();

        let (port, allocator, delay) = s.into_parts();

        assert!(port.inbox.is_empty());
        assert_eq!(port.sent.len(), 2);
        assert_eq!(port.sent[1], Message::new(40, 7));
        assert_eq!(allocator.grants.len(), 1);
        assert_eq!(delay.waited_us, 0);
    }
}
