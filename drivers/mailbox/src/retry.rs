//! # Bounded Retry
//!
//! Polling loop with a fixed attempt budget and a fixed pause between
//! attempts. The budget is configuration, not a constant in the caller.

use core::fmt;

use crate::{Delay, MailboxError, MailboxPort, Message};

// =============================================================================
// POLICY
// =============================================================================

/// Retry configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (at least one is always made)
    pub attempts: u32,
    /// Pause between two attempts, in microseconds
    pub delay_us: u32,
}

impl RetryPolicy {
    /// Default attempt budget
    pub const DEFAULT_ATTEMPTS: u32 = 10_000;
    /// Default pause between attempts
    pub const DEFAULT_DELAY_US: u32 = 10;

    /// Create a policy
    pub const fn new(attempts: u32, delay_us: u32) -> Self {
        Self { attempts, delay_us }
    }

    /// Worst-case time spent waiting, in microseconds
    pub const fn budget_us(&self) -> u64 {
        (self.attempts.saturating_sub(1) as u64) * (self.delay_us as u64)
    }

    /// Run `attempt` until it yields a value, fails hard, or the budget runs out
    ///
    /// `attempt` returns `Ok(None)` when it is not ready yet; `pause` is called
    /// between attempts, never after the last one.
    pub fn run<T, E>(
        &self,
        mut attempt: impl FnMut() -> Result<Option<T>, E>,
        mut pause: impl FnMut(u32),
    ) -> Result<T, RetryError<E>> {
        let attempts = self.attempts.max(1);

        for n in 0..attempts {
            match attempt() {
                Ok(Some(value)) => return Ok(value),
                Ok(None) => {},
                Err(e) => return Err(RetryError::Failed(e)),
            }

            if n + 1 < attempts {
                pause(self.delay_us);
            }
        }

        Err(RetryError::Exhausted { attempts })
    }

    /// Receive one message from `port`, treating an empty mailbox as "not yet"
    pub fn recv<P: MailboxPort, D: Delay>(
        &self,
        port: &mut P,
        delay: &mut D,
    ) -> Result<Message, RetryError<MailboxError>> {
        self.run(
            || match port.recv() {
                Ok(msg) => Ok(Some(msg)),
                Err(MailboxError::Empty) => Ok(None),
                Err(e) => Err(e),
            },
            |us| delay.delay_us(us),
        )
        .map_err(|e| {
            match e {
                RetryError::Exhausted { attempts } => {
                    log::debug!("Mailbox: nothing received after {} attempts", attempts)
                },
                RetryError::Failed(err) => log::warn!("Mailbox: receive failed: {}", err),
            }
            e
        })
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_ATTEMPTS, Self::DEFAULT_DELAY_US)
    }
}

// =============================================================================
// ERROR
// =============================================================================

/// Outcome of a failed retry loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryError<E> {
    /// Every attempt reported "not ready"
    Exhausted {
        /// Attempts made
        attempts: u32,
    },
    /// An attempt failed with a non-retryable error
    Failed(E),
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted { attempts } => write!(f, "gave up after {} attempts", attempts),
            Self::Failed(e) => write!(f, "{}", e),
        }
    }
}
