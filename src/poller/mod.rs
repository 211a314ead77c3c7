mod any;
#[cfg_attr(
    not(any(target_os = "macos", target_os = "freebsd", target_os = "openbsd")),
    allow(dead_code)
)]
mod changes;
mod interface;
mod poll;
mod ready;
mod table;

pub use any::{AnyPoller, Backend};
pub use interface::{AsPoller, Op, ReadyIter, Token};
pub use poll::PollPoller;
pub use ready::Ready;
pub use table::{DEFAULT_READY_CAPACITY, FD_SLACK};

#[cfg(target_os = "linux")]
mod epoll;

#[cfg(target_os = "linux")]
pub use epoll::EpollPoller;

#[cfg(any(target_os = "macos", target_os = "freebsd", target_os = "openbsd"))]
mod kqueue;

#[cfg(any(target_os = "macos", target_os = "freebsd", target_os = "openbsd"))]
pub use kqueue::KqueuePoller;

#[cfg(all(not(feature = "rescan"), target_os = "linux"))]
pub use epoll::EpollPoller as Poller;

#[cfg(all(
    not(feature = "rescan"),
    any(target_os = "macos", target_os = "freebsd", target_os = "openbsd")
))]
pub use kqueue::KqueuePoller as Poller;

#[cfg(any(
    feature = "rescan",
    not(any(
        target_os = "linux",
        target_os = "macos",
        target_os = "freebsd",
        target_os = "openbsd"
    ))
))]
pub use poll::PollPoller as Poller;
