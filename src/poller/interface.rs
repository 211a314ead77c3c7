//! Abstraction over the kernel readiness-notification mechanisms.
//!
//! The three backends disagree on nearly everything: poll(2) takes the whole
//! interest set on every call and hands back the whole table, epoll keeps the
//! interest set in the kernel and returns only what is ready, and kqueue keys
//! interest by (descriptor, filter) and accepts changes in batches. This
//! interface restricts all of them to the common subset:
//!
//! 1) interest is level-triggered and limited to readable/writable.
//! 2) `wait` fills an internal buffer; `revents` hands entries out one at a
//!    time until it returns `None`.
//! 3) descriptors are borrowed, never owned. Callers open and close their
//!    own descriptors and must `Delete` them before closing.
//!
//! One difference shows through. poll(2) and epoll always report error and
//! hangup conditions, so a descriptor whose interest was disabled down to
//! nothing can still come back from `wait` as `ERROR` or `HANGUP`. kqueue
//! disables its filters instead and stays silent until they are enabled
//! again. Callers that disable a descriptor for a long time should be ready
//! for either.
//!
//! A poller is single-owner and not reentrant. Dropping it releases the
//! kernel handle and every buffer it owns.
use std::io;
use std::os::fd::RawFd;

use super::{Backend, Ready};

/// Opaque caller data associated with a registered descriptor.
///
/// The poller stores and returns it untouched. Typically an index into a
/// caller-owned arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Token(pub usize);

/// Interest change requested through [`AsPoller::control`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// Start watching the descriptor (or add bits to an existing registration).
    Add,
    /// Stop watching the descriptor entirely.
    Delete,
    /// Add bits to the descriptor's interest.
    Enable,
    /// Remove bits from the descriptor's interest, keeping it registered.
    Disable,
}

pub trait AsPoller {
    fn backend(&self) -> Backend;

    /// Descriptors must be strictly below this value.
    fn capacity(&self) -> usize;

    /// Apply `op` with `mask` to `fd`, associating `token` with it on
    /// `Add`/`Enable`.
    ///
    /// Bits other than `READABLE`/`WRITABLE` are ignored. Fails with `EINVAL`
    /// when `fd` is at or above [`capacity`](Self::capacity), except for
    /// `Delete`, which is a no-op on anything not registered.
    ///
    /// # Panics
    ///
    /// If `fd` is negative.
    fn control(&mut self, op: Op, mask: Ready, fd: RawFd, token: Token) -> io::Result<()>;

    /// Block for up to `timeout_ms` milliseconds (forever if negative) and
    /// return how many ready entries are available through `revents`.
    ///
    /// `Ok(0)` is a timeout. An interrupting signal surfaces as an error of
    /// kind `Interrupted`.
    fn wait(&mut self, timeout_ms: i32) -> io::Result<usize>;

    /// Take the next ready entry produced by the last `wait`.
    fn revents(&mut self) -> Option<(Ready, Token)>;

    /// Current interest for `fd`, or `None` if it isn't registered.
    fn interest(&self, fd: RawFd) -> Option<Ready>;

    /// Iterate over the remaining ready entries.
    fn drain(&mut self) -> ReadyIter<'_, Self>
    where
        Self: Sized,
    {
        ReadyIter { poller: self }
    }
}

pub struct ReadyIter<'a, P> {
    poller: &'a mut P,
}

impl<P: AsPoller> Iterator for ReadyIter<'_, P> {
    type Item = (Ready, Token);

    fn next(&mut self) -> Option<Self::Item> {
        self.poller.revents()
    }
}
