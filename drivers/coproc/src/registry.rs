//! # Endpoint Registry
//!
//! Handler table for the dynamic endpoints 32..64.
//!
//! A slot is written once when a caller starts the endpoint and stays put
//! for the life of the session; the protocol has no stop message.
//!
//! Handlers run synchronously inside `Session::poll_once`. They receive a
//! [`Reply`] bound to their own endpoint, which is the only way back into
//! the mailbox while the session is busy dispatching.

use alloc::boxed::Box;
use core::fmt;

use helix_mailbox::{MailboxPort, Message};

use crate::endpoint::{self, EndpointSet, DYNAMIC_BASE, DYNAMIC_COUNT};
use crate::error::{Error, Result};

// =============================================================================
// HANDLER
// =============================================================================

/// Receives messages for one dynamic endpoint
///
/// Any state the handler needs travels inside the implementing value.
pub trait EndpointHandler {
    /// Handle one message header
    fn handle(&mut self, value: u64, reply: &mut Reply<'_>);
}

impl<F> EndpointHandler for F
where
    F: FnMut(u64, &mut Reply<'_>),
{
    fn handle(&mut self, value: u64, reply: &mut Reply<'_>) {
        self(value, reply)
    }
}

/// Send handle given to a handler for the endpoint it serves
pub struct Reply<'a> {
    endpoint: u32,
    port: &'a mut dyn MailboxPort,
    sent: u32,
}

impl<'a> Reply<'a> {
    pub(crate) fn new(endpoint: u32, port: &'a mut dyn MailboxPort) -> Self {
        Self {
            endpoint,
            port,
            sent: 0,
        }
    }

    /// Endpoint this reply goes to
    pub fn endpoint(&self) -> u32 {
        self.endpoint
    }

    /// Send a raw header on the handler's endpoint
    pub fn send(&mut self, value: u64) -> Result<()> {
        self.port.send(Message::new(self.endpoint, value))?;
        self.sent += 1;
        Ok(())
    }

    /// Messages sent through this handle
    pub fn sent(&self) -> u32 {
        self.sent
    }
}

impl fmt::Debug for Reply<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reply")
            .field("endpoint", &self.endpoint)
            .field("sent", &self.sent)
            .finish()
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Fixed table of dynamic endpoint handlers
pub struct EndpointRegistry {
    /// Slot `n` serves endpoint `DYNAMIC_BASE + n`
    slots: [Option<Box<dyn EndpointHandler>>; DYNAMIC_COUNT],
    /// Messages delivered per slot
    delivered: [u64; DYNAMIC_COUNT],
}

impl EndpointRegistry {
    /// Empty registry
    pub const fn new() -> Self {
        Self {
            slots: [const { None }; DYNAMIC_COUNT],
            delivered: [0; DYNAMIC_COUNT],
        }
    }

    fn slot_index(endpoint: u32) -> Option<usize> {
        if endpoint::is_dynamic(endpoint) {
            Some((endpoint - DYNAMIC_BASE) as usize)
        } else {
            None
        }
    }

    /// Install a handler
    ///
    /// Fails for ids outside 32..64 and for slots that already hold one.
    pub fn register(&mut self, endpoint: u32, handler: Box<dyn EndpointHandler>) -> Result<()> {
        let idx = Self::slot_index(endpoint).ok_or(Error::InvalidEndpointRequest(endpoint))?;

        if self.slots[idx].is_some() {
            return Err(Error::EndpointInUse(endpoint));
        }

        self.slots[idx] = Some(handler);
        Ok(())
    }

    /// Undo a registration whose start request never went out
    pub(crate) fn release(&mut self, endpoint: u32) {
        if let Some(idx) = Self::slot_index(endpoint) {
            self.slots[idx] = None;
        }
    }

    /// Whether a handler is installed for `endpoint`
    pub fn is_registered(&self, endpoint: u32) -> bool {
        Self::slot_index(endpoint).is_some_and(|idx| self.slots[idx].is_some())
    }

    /// Endpoints with a handler
    pub fn registered(&self) -> EndpointSet {
        let mut set = EndpointSet::EMPTY;
        for (idx, slot) in self.slots.iter().enumerate() {
            if slot.is_some() {
                set.insert(DYNAMIC_BASE + idx as u32);
            }
        }
        set
    }

    /// Messages delivered to `endpoint` so far
    pub fn delivered(&self, endpoint: u32) -> u64 {
        Self::slot_index(endpoint).map_or(0, |idx| self.delivered[idx])
    }

    /// Hand a message header to the endpoint's handler
    pub fn dispatch(&mut self, endpoint: u32, value: u64, port: &mut dyn MailboxPort) -> Result<()> {
        let idx = Self::slot_index(endpoint).ok_or(Error::UnhandledEndpoint(endpoint))?;
        let handler = self.slots[idx]
            .as_mut()
            .ok_or(Error::UnhandledEndpoint(endpoint))?;

        let mut reply = Reply::new(endpoint, port);
        handler.handle(value, &mut reply);
        self.delivered[idx] += 1;
        Ok(())
    }
}

impl Default for EndpointRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EndpointRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointRegistry")
            .field("registered", &self.registered())
            .finish()
    }
}
