//! One readiness-notification interface over poll(2), epoll and kqueue.
//!
//! ```
//! use std::io::Write;
//! use std::os::fd::AsRawFd;
//! use unipoll::{AsPoller, Op, Ready, Token};
//!
//! let (rd, wr) = unipoll::utils::pipe_nonblocking()?;
//! let mut poller = unipoll::create(rd.as_raw_fd() as usize + 1)?;
//! poller.control(Op::Add, Ready::READABLE, rd.as_raw_fd(), Token(0))?;
//!
//! (&wr).write_all(b"x")?;
//! assert_eq!(poller.wait(-1)?, 1);
//! assert_eq!(poller.revents(), Some((Ready::READABLE, Token(0))));
//! assert_eq!(poller.revents(), None);
//! # Ok::<(), std::io::Error>(())
//! ```
use std::io;

pub mod bench;
pub mod conf;
mod poller;
pub mod report;
pub mod utils;

#[cfg(target_os = "linux")]
pub use poller::EpollPoller;
#[cfg(any(target_os = "macos", target_os = "freebsd", target_os = "openbsd"))]
pub use poller::KqueuePoller;
pub use poller::{
    AnyPoller, AsPoller, Backend, Op, PollPoller, Poller, Ready, ReadyIter, Token,
    DEFAULT_READY_CAPACITY, FD_SLACK,
};

/// Create the platform's default poller for descriptors below roughly
/// `capacity_hint`.
///
/// Fails with `InvalidInput` when `capacity_hint` is zero.
pub fn create(capacity_hint: usize) -> io::Result<Poller> {
    Poller::new(capacity_hint)
}
