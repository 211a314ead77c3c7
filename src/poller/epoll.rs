use nix::errno::Errno;
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};
use std::{
    io,
    os::fd::{BorrowedFd, RawFd},
};

use super::table::{self, InterestTable, ReadyCursor, Slot, DEFAULT_READY_CAPACITY};
use super::{AsPoller, Backend, Op, Ready, Token};

/// epoll(7) persistent-interest backend.
///
/// The kernel keeps the interest list; every control call is one
/// `epoll_ctl`. A wait returns at most `event_buffer.len()` entries. Anything
/// beyond that stays ready in the kernel and shows up on a later wait.
pub struct EpollPoller {
    table: InterestTable,
    event_buffer: Vec<EpollEvent>,
    cursor: ReadyCursor,
    epoll: Epoll,
}

impl EpollPoller {
    pub fn new(capacity_hint: usize) -> io::Result<Self> {
        Self::with_ready_capacity(capacity_hint, DEFAULT_READY_CAPACITY)
    }

    pub fn with_ready_capacity(capacity_hint: usize, ready_capacity: usize) -> io::Result<Self> {
        if ready_capacity < 1 {
            return Err(Errno::EINVAL.into());
        }
        let table = InterestTable::new(table::capacity_for(capacity_hint)?)?;
        let event_buffer = table::alloc(ready_capacity, EpollEvent::empty())?;

        // create epoll
        let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC)?;

        Ok(Self {
            table,
            event_buffer,
            cursor: ReadyCursor::default(),
            epoll,
        })
    }
}

fn to_flags(interest: Ready) -> EpollFlags {
    let mut flags = EpollFlags::empty();
    if interest.is_readable() {
        flags |= EpollFlags::EPOLLIN;
    }
    if interest.is_writable() {
        flags |= EpollFlags::EPOLLOUT;
    }
    flags
}

fn from_flags(flags: EpollFlags) -> Ready {
    let mut ready = Ready::empty();
    if flags.contains(EpollFlags::EPOLLIN) {
        ready |= Ready::READABLE;
    }
    if flags.contains(EpollFlags::EPOLLOUT) {
        ready |= Ready::WRITABLE;
    }
    if flags.contains(EpollFlags::EPOLLERR) {
        ready |= Ready::ERROR;
    }
    if flags.contains(EpollFlags::EPOLLHUP) {
        ready |= Ready::HANGUP;
    }
    ready
}

fn epoll_timeout(timeout_ms: i32) -> io::Result<EpollTimeout> {
    match timeout_ms {
        ms if ms < 0 => Ok(EpollTimeout::NONE),
        0 => Ok(EpollTimeout::ZERO),
        ms => EpollTimeout::try_from(ms).map_err(|_| Errno::EINVAL.into()),
    }
}

impl AsPoller for EpollPoller {
    fn backend(&self) -> Backend {
        Backend::Epoll
    }

    fn capacity(&self) -> usize {
        self.table.capacity()
    }

    fn control(&mut self, op: Op, mask: Ready, fd: RawFd, token: Token) -> io::Result<()> {
        let Some(idx) = table::slot_index(fd, op, self.table.capacity())? else {
            return Ok(());
        };

        let slot = self.table.get(idx);
        let token = match op {
            Op::Add | Op::Enable => token,
            Op::Delete | Op::Disable => slot.token,
        };
        let next = table::merge(op, slot.interest, mask);

        // The caller keeps `fd` open for as long as it is registered.
        let borrowed_fd = unsafe { BorrowedFd::borrow_raw(fd) };
        match (slot.interest, next) {
            (None, None) => return Ok(()),
            (None, Some(interest)) => {
                let event = EpollEvent::new(to_flags(interest), token.0 as u64);
                self.epoll.add(borrowed_fd, event)?;
            }
            (Some(_), Some(interest)) => {
                let mut event = EpollEvent::new(to_flags(interest), token.0 as u64);
                self.epoll.modify(borrowed_fd, &mut event)?;
            }
            (Some(_), None) => self.epoll.delete(borrowed_fd)?,
        }

        self.table.set(
            idx,
            Slot {
                interest: next,
                registered: next.unwrap_or_default(),
                token: if next.is_some() { token } else { Token::default() },
            },
        );
        Ok(())
    }

    fn wait(&mut self, timeout_ms: i32) -> io::Result<usize> {
        self.cursor.reset(0);
        let timeout = epoll_timeout(timeout_ms)?;
        let num_ready = self.epoll.wait(&mut self.event_buffer, timeout)?;
        self.cursor.reset(num_ready);
        Ok(num_ready)
    }

    fn revents(&mut self) -> Option<(Ready, Token)> {
        let idx = self.cursor.take()?;
        let event = self.event_buffer[idx];
        Some((from_flags(event.events()), Token(event.data() as usize)))
    }

    fn interest(&self, fd: RawFd) -> Option<Ready> {
        self.table.interest(fd)
    }
}
