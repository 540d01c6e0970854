//! # Shared Mailbox
//!
//! Serializes a single port between the poll loop and another context
//! (typically the mailbox-ready interrupt path that also needs to send).
//!
//! Only one `send` or `recv` runs at a time; a session built on
//! `&SharedMailbox<P>` still gets exactly one logical reader.

use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use crate::{MailboxError, MailboxPort, Message};

/// Port wrapped in a spinlock
#[derive(Debug)]
pub struct SharedMailbox<P> {
    /// The wrapped port
    port: Mutex<P>,
    /// Messages sent through this wrapper
    sent: AtomicU64,
    /// Messages received through this wrapper
    received: AtomicU64,
}

impl<P: MailboxPort> SharedMailbox<P> {
    /// Wrap a port
    pub const fn new(port: P) -> Self {
        Self {
            port: Mutex::new(port),
            sent: AtomicU64::new(0),
            received: AtomicU64::new(0),
        }
    }

    /// Send while holding the lock
    pub fn send(&self, msg: Message) -> Result<(), MailboxError> {
        self.port.lock().send(msg)?;
        self.sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Receive while holding the lock
    pub fn recv(&self) -> Result<Message, MailboxError> {
        let msg = self.port.lock().recv()?;
        self.received.fetch_add(1, Ordering::Relaxed);
        Ok(msg)
    }

    /// Run `f` with exclusive access to the port
    pub fn with<R>(&self, f: impl FnOnce(&mut P) -> R) -> R {
        f(&mut self.port.lock())
    }

    /// Number of messages sent
    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Number of messages received
    pub fn received_count(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Unwrap the port
    pub fn into_inner(self) -> P {
        self.port.into_inner()
    }
}

impl<P: MailboxPort> MailboxPort for &SharedMailbox<P> {
    fn send(&mut self, msg: Message) -> Result<(), MailboxError> {
        SharedMailbox::send(*self, msg)
    }

    fn recv(&mut self) -> Result<Message, MailboxError> {
        SharedMailbox::recv(*self)
    }
}
