//! # Resource Channel
//!
//! Buffer negotiation for the diagnostic endpoints (crash log and I/O
//! report). Both speak the same sub-protocol and differ only in the
//! endpoint the grant goes back on.
//!
//! ```text
//! coprocessor                            host
//!     │  BUFFER_REQUEST(addr=0, pages)    │
//!     │ ────────────────────────────────→ │ alloc(pages * PAGE_SIZE)
//!     │  BUFFER_REQUEST(addr, pages)      │
//!     │ ←──────────────────────────────── │
//! ```
//!
//! A request that already carries an address describes a buffer the
//! coprocessor owns; nothing is sent back.

use helix_mailbox::{Delay, MailboxPort};

use crate::codec::{self, field, resource_type, ResourceMessage};
use crate::endpoint;
use crate::error::{AllocError, Error, Result};
use crate::session::Session;

/// Unit of the buffer size field
pub const PAGE_SIZE: u64 = 4096;

// =============================================================================
// ALLOCATOR
// =============================================================================

/// Memory handed to the coprocessor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Buffer {
    /// Device-visible address
    pub addr: u64,
    /// Usable size in bytes
    pub size: u64,
}

/// Source of coprocessor-visible buffers
pub trait BufferAllocator {
    /// Allocate at least `min_size` bytes
    fn alloc(&mut self, min_size: u64) -> core::result::Result<Buffer, AllocError>;

    /// Return a buffer that was never handed out
    fn release(&mut self, _buffer: Buffer) {}
}

impl<T: BufferAllocator + ?Sized> BufferAllocator for &mut T {
    fn alloc(&mut self, min_size: u64) -> core::result::Result<Buffer, AllocError> {
        (**self).alloc(min_size)
    }

    fn release(&mut self, buffer: Buffer) {
        (**self).release(buffer)
    }
}

// =============================================================================
// HANDLERS
// =============================================================================

impl<P: MailboxPort, A: BufferAllocator, D: Delay> Session<P, A, D> {
    /// Handle one message on a diagnostic endpoint
    pub(crate) fn handle_resource(&mut self, endpoint: u32, header: u64) -> Result<()> {
        self.stats.resource += 1;

        match ResourceMessage::decode(header) {
            ResourceMessage::BufferRequest { addr, pages } => {
                self.handle_buffer_request(endpoint, addr, pages)
            },
            ResourceMessage::Other(kind)
                if endpoint == endpoint::IOREPORT
                    && matches!(
                        kind,
                        resource_type::IOREPORT_ACK_A | resource_type::IOREPORT_ACK_B
                    ) =>
            {
                // The coprocessor stalls until these come back unchanged
                self.send(endpoint, header)
            },
            ResourceMessage::Other(kind) => Err(Error::UnsupportedEvent { endpoint, kind }),
        }
    }

    fn handle_buffer_request(&mut self, endpoint: u32, addr: u64, pages: u8) -> Result<()> {
        if addr != 0 {
            log::debug!(
                "Coproc: endpoint {} reports its own buffer at {:#x}",
                endpoint,
                addr
            );
            return Ok(());
        }

        let size = pages as u64 * PAGE_SIZE;
        let buffer = self.allocator.alloc(size).map_err(|e| {
            log::warn!(
                "Coproc: no {} byte buffer for endpoint {}: {}",
                size,
                endpoint,
                e
            );
            Error::AllocFailure(e)
        })?;

        if buffer.addr > field::BUFFER_ADDR.max_value() {
            log::warn!(
                "Coproc: buffer {:#x} not addressable by endpoint {}",
                buffer.addr,
                endpoint
            );
            self.allocator.release(buffer);
            return Err(Error::AllocFailure(AllocError::Unaddressable));
        }

        self.send(endpoint, codec::buffer_request(buffer.addr, pages))?;
        self.stats.buffers_granted += 1;
        log::debug!(
            "Coproc: granted {:#x} ({} bytes) to endpoint {}",
            buffer.addr,
            buffer.size,
            endpoint
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use helix_mailbox::Message;

    use super::*;
    use crate::testing::session;

    #[test]
    fn test_buffer_with_address_is_informational() {
        let mut s = session();
        s.port.push(Message::new(1, codec::buffer_request(0x8000_0000, 4)));

        s.poll_once().unwrap();

        assert!(s.port.sent.is_empty());
        assert!(s.allocator.grants.is_empty());
    }

    #[test]
    fn test_buffer_grant_echoes_layout() {
        let mut s = session();
        let request = codec::buffer_request(0, 4);
        s.port.push(Message::new(1, request));

        s.poll_once().unwrap();

        let grant = s.allocator.grants[0];
        assert_eq!(grant.size, 4 * PAGE_SIZE);
        assert_eq!(
            s.port.sent,
            [Message::new(1, codec::buffer_request(grant.addr, 4))]
        );
        let reply = s.port.sent[0].header;
        assert_eq!(reply & !field::BUFFER_ADDR.mask(), request);
        assert_eq!(field::BUFFER_ADDR.get(reply), grant.addr);
        assert_eq!(s.stats().buffers_granted, 1);
    }

    #[test]
    fn test_ioreport_uses_same_protocol() {
        let mut s = session();
        s.port.push(Message::new(4, codec::buffer_request(0, 2)));

        s.poll_once().unwrap();

        assert_eq!(s.port.sent.len(), 1);
        assert_eq!(s.port.sent[0].endpoint, 4);
    }

    #[test]
    fn test_alloc_failure_sends_nothing() {
        let mut s = session();
        s.allocator.fail = true;
        s.port.push(Message::new(1, codec::buffer_request(0, 1)));

        assert_eq!(
            s.poll_once(),
            Err(Error::AllocFailure(AllocError::OutOfMemory))
        );
        assert!(s.port.sent.is_empty());
    }

    #[test]
    fn test_unaddressable_buffer_released() {
        let mut s = session();
        s.allocator.next = 1 << 44;
        s.port.push(Message::new(4, codec::buffer_request(0, 1)));

        assert_eq!(
            s.poll_once(),
            Err(Error::AllocFailure(AllocError::Unaddressable))
        );
        assert!(s.port.sent.is_empty());
        assert_eq!(s.allocator.released, 1);
    }

    #[test]
    fn test_ioreport_acks_echoed() {
        let mut s = session();
        let a = codec::encode_type_and_value(resource_type::IOREPORT_ACK_A, 0x55);
        let b = codec::encode_type_and_value(resource_type::IOREPORT_ACK_B, 0x66);
        s.port.push(Message::new(4, a));
        s.port.push(Message::new(4, b));

        s.poll_once().unwrap();
        s.poll_once().unwrap();

        assert_eq!(s.port.sent, [Message::new(4, a), Message::new(4, b)]);
    }

    #[test]
    fn test_crashlog_rejects_ioreport_events() {
        let mut s = session();
        let header = codec::encode_type_and_value(resource_type::IOREPORT_ACK_A, 0);
        s.port.push(Message::new(1, header));

        assert_eq!(
            s.poll_once(),
            Err(Error::UnsupportedEvent {
                endpoint: 1,
                kind: resource_type::IOREPORT_ACK_A
            })
        );
        assert!(s.port.sent.is_empty());
    }
}
