//! # Helix Coprocessor Session Protocol
//!
//! Boots and talks to an auxiliary coprocessor over a two-word mailbox.
//!
//! ## Architecture
//!
//! The mailbox carries one 64-bit header and one endpoint id per message.
//! Endpoints multiplex independent conversations over that single pipe:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           Session                            │
//! │                                                              │
//! │  poll_once ──→ route(endpoint)                               │
//! │                   │                                          │
//! │        ┌──────────┼───────────────┬──────────────────┐       │
//! │        ▼          ▼               ▼                  ▼       │
//! │   endpoint 0   endpoints 1, 4   endpoints 32..64   other     │
//! │   Management   Resource         Registry           Unhandled │
//! │   (hello,      (buffer          (caller                      │
//! │    epmap,       requests)        handlers)                   │
//! │    power)                                                    │
//! └──────────────────────────────────────────────────────────────┘
//!                    │ send / recv
//!              ┌─────┴──────┐
//!              │ MailboxPort│  (platform driver)
//!              └────────────┘
//! ```
//!
//! ## Boot Flow
//!
//! 1. Host requests power state `On` on the management endpoint
//! 2. Coprocessor sends hello; host picks a common version and acks it
//! 3. Coprocessor advertises its endpoints in one or more epmap fragments
//! 4. Host acks every fragment and starts the diagnostic endpoints
//! 5. Coprocessor acknowledges power state `On`
//!
//! ## Usage
//!
//! ```rust,ignore
//! let mut session = Session::new(port, allocator, SpinDelay::default(), SessionConfig::default());
//! session.boot()?;
//! session.start_endpoint(32, |value: u64, reply: &mut Reply<'_>| {
//!     let _ = reply.send(value);
//! })?;
//! loop {
//!     if let Err(e) = session.poll_once() {
//!         if e.is_fatal() {
//!             break;
//!         }
//!     }
//! }
//! ```

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

pub mod codec;
pub mod endpoint;
pub mod error;
pub mod management;
pub mod power;
pub mod registry;
pub mod resource;
pub mod session;

#[cfg(test)]
mod testing;

pub use endpoint::{EndpointSet, Route};
pub use error::{AllocError, Error, Result};
pub use helix_mailbox::{Delay, MailboxError, MailboxPort, Message, RetryPolicy, SpinDelay};
pub use management::{MgmtState, VersionRange};
pub use power::PowerState;
pub use registry::{EndpointHandler, EndpointRegistry, Reply};
pub use resource::{Buffer, BufferAllocator};
pub use session::{Session, SessionConfig, SessionStats};
