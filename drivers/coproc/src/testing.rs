//! Test doubles for the session: a scripted mailbox, a no-op delay and a
//! bump allocator.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use helix_mailbox::{Delay, MailboxError, MailboxPort, Message, RetryPolicy};

use crate::error::AllocError;
use crate::resource::{Buffer, BufferAllocator};
use crate::session::{Session, SessionConfig};

/// Mailbox fed from a queue; records everything sent
#[derive(Debug, Default)]
pub struct ScriptedPort {
    pub inbox: VecDeque<Message>,
    pub sent: Vec<Message>,
    pub polls: u32,
    pub fail_send: bool,
    pub fail_recv: bool,
}

impl ScriptedPort {
    pub fn push(&mut self, msg: Message) {
        self.inbox.push_back(msg);
    }
}

impl MailboxPort for ScriptedPort {
    fn send(&mut self, msg: Message) -> Result<(), MailboxError> {
        if self.fail_send {
            return Err(MailboxError::Full);
        }
        self.sent.push(msg);
        Ok(())
    }

    fn recv(&mut self) -> Result<Message, MailboxError> {
        self.polls += 1;
        if self.fail_recv {
            return Err(MailboxError::Io);
        }
        self.inbox.pop_front().ok_or(MailboxError::Empty)
    }
}

/// Delay that only adds up what it was asked to wait
#[derive(Debug, Default)]
pub struct NoDelay {
    pub waited_us: u64,
}

impl Delay for NoDelay {
    fn delay_us(&mut self, us: u32) {
        self.waited_us += us as u64;
    }
}

/// Hands out consecutive page-aligned addresses
#[derive(Debug)]
pub struct BumpAllocator {
    pub next: u64,
    pub fail: bool,
    pub grants: Vec<Buffer>,
    pub released: u32,
}

impl Default for BumpAllocator {
    fn default() -> Self {
        Self {
            next: 0x8_0000_0000,
            fail: false,
            grants: Vec::new(),
            released: 0,
        }
    }
}

impl BufferAllocator for BumpAllocator {
    fn alloc(&mut self, min_size: u64) -> Result<Buffer, AllocError> {
        if self.fail {
            return Err(AllocError::OutOfMemory);
        }
        let buffer = Buffer {
            addr: self.next,
            size: min_size,
        };
        self.next += min_size.max(crate::resource::PAGE_SIZE);
        self.grants.push(buffer);
        Ok(buffer)
    }

    fn release(&mut self, _buffer: Buffer) {
        self.released += 1;
    }
}

/// Session with a short retry budget over the doubles above
pub fn session() -> Session<ScriptedPort, BumpAllocator, NoDelay> {
    Session::new(
        ScriptedPort::default(),
        BumpAllocator::default(),
        NoDelay::default(),
        SessionConfig::default().with_retry(RetryPolicy::new(3, 5)),
    )
}

/// Message on the management endpoint
pub fn mgmt(header: u64) -> Message {
    Message::new(crate::endpoint::MGMT, header)
}
