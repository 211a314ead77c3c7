//! Startup-time backend selection.
//!
//! `Poller` picks a backend at compile time. Callers that want to choose at
//! runtime (the benchmark, tests comparing backends) go through
//! [`AnyPoller`], which wraps whichever backends the target supports.
use std::{fmt, io, os::fd::RawFd};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

#[cfg(target_os = "linux")]
use super::EpollPoller;
#[cfg(any(target_os = "macos", target_os = "freebsd", target_os = "openbsd"))]
use super::KqueuePoller;
use super::{AsPoller, Op, PollPoller, Ready, Token, DEFAULT_READY_CAPACITY};

#[derive(Serialize, Deserialize, ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// poll(2), rescans the whole table on every wait
    Poll,
    /// epoll(7), Linux
    Epoll,
    /// kqueue(2), macOS and the BSDs
    Kqueue,
}

impl Backend {
    /// The backend behind the compile-time `Poller` type.
    pub fn native() -> Self {
        if cfg!(feature = "rescan") {
            Backend::Poll
        } else if cfg!(target_os = "linux") {
            Backend::Epoll
        } else if cfg!(any(
            target_os = "macos",
            target_os = "freebsd",
            target_os = "openbsd"
        )) {
            Backend::Kqueue
        } else {
            Backend::Poll
        }
    }

    /// Backends compiled into this build.
    pub fn available() -> &'static [Backend] {
        if cfg!(target_os = "linux") {
            &[Backend::Poll, Backend::Epoll]
        } else if cfg!(any(
            target_os = "macos",
            target_os = "freebsd",
            target_os = "openbsd"
        )) {
            &[Backend::Poll, Backend::Kqueue]
        } else {
            &[Backend::Poll]
        }
    }

    pub fn is_available(self) -> bool {
        Self::available().contains(&self)
    }

    /// Name of the syscall that does the waiting.
    pub fn syscall(self) -> &'static str {
        match self {
            Backend::Poll => "poll",
            Backend::Epoll => "epoll",
            Backend::Kqueue => "kevent",
        }
    }

    /// Whether wait cost is independent of the number of registered
    /// descriptors.
    pub fn is_kernel_delegated(self) -> bool {
        !matches!(self, Backend::Poll)
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Backend::Poll => "poll",
            Backend::Epoll => "epoll",
            Backend::Kqueue => "kqueue",
        };
        f.write_str(name)
    }
}

fn unsupported(backend: Backend) -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        format!("the {backend} backend is not available on this platform"),
    )
}

pub enum AnyPoller {
    Poll(PollPoller),
    #[cfg(target_os = "linux")]
    Epoll(EpollPoller),
    #[cfg(any(target_os = "macos", target_os = "freebsd", target_os = "openbsd"))]
    Kqueue(KqueuePoller),
}

impl AnyPoller {
    pub fn new(backend: Backend, capacity_hint: usize) -> io::Result<Self> {
        Self::with_ready_capacity(backend, capacity_hint, DEFAULT_READY_CAPACITY)
    }

    /// `ready_capacity` sizes the readiness buffer of the kernel-delegated
    /// backends. The rescan backend reads readiness straight out of its
    /// interest table and ignores it.
    pub fn with_ready_capacity(
        backend: Backend,
        capacity_hint: usize,
        ready_capacity: usize,
    ) -> io::Result<Self> {
        match backend {
            Backend::Poll => Ok(Self::Poll(PollPoller::new(capacity_hint)?)),
            Backend::Epoll => {
                #[cfg(target_os = "linux")]
                {
                    Ok(Self::Epoll(EpollPoller::with_ready_capacity(
                        capacity_hint,
                        ready_capacity,
                    )?))
                }
                #[cfg(not(target_os = "linux"))]
                {
                    Err(unsupported(backend))
                }
            }
            Backend::Kqueue => {
                #[cfg(any(target_os = "macos", target_os = "freebsd", target_os = "openbsd"))]
                {
                    Ok(Self::Kqueue(KqueuePoller::with_ready_capacity(
                        capacity_hint,
                        ready_capacity,
                    )?))
                }
                #[cfg(not(any(
                    target_os = "macos",
                    target_os = "freebsd",
                    target_os = "openbsd"
                )))]
                {
                    let _ = ready_capacity;
                    Err(unsupported(backend))
                }
            }
        }
    }
}

macro_rules! dispatch {
    ($self:expr, $poller:ident => $body:expr) => {
        match $self {
            AnyPoller::Poll($poller) => $body,
            #[cfg(target_os = "linux")]
            AnyPoller::Epoll($poller) => $body,
            #[cfg(any(target_os = "macos", target_os = "freebsd", target_os = "openbsd"))]
            AnyPoller::Kqueue($poller) => $body,
        }
    };
}

impl AsPoller for AnyPoller {
    fn backend(&self) -> Backend {
        dispatch!(self, p => p.backend())
    }

    fn capacity(&self) -> usize {
        dispatch!(self, p => p.capacity())
    }

    fn control(&mut self, op: Op, mask: Ready, fd: RawFd, token: Token) -> io::Result<()> {
        dispatch!(self, p => p.control(op, mask, fd, token))
    }

    fn wait(&mut self, timeout_ms: i32) -> io::Result<usize> {
        dispatch!(self, p => p.wait(timeout_ms))
    }

    fn revents(&mut self) -> Option<(Ready, Token)> {
        dispatch!(self, p => p.revents())
    }

    fn interest(&self, fd: RawFd) -> Option<Ready> {
        dispatch!(self, p => p.interest(fd))
    }
}
