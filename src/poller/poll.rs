//! poll(2) rescan backend.
//!
//! The interest table doubles as the readiness buffer: it is handed to the
//! kernel as-is on every wait, and `revents` walks it in descriptor order.
//! Wait cost grows with the highest registered descriptor, not with the
//! number of ready ones.
use std::io;
use std::os::fd::RawFd;

use nix::errno::Errno;
use nix::libc;

use super::table::{self, ReadyCursor};
use super::{AsPoller, Backend, Op, Ready, Token};

/// poll(2) skips entries with a negative descriptor.
const ABSENT: RawFd = -1;

const BLANK: libc::pollfd = libc::pollfd {
    fd: ABSENT,
    events: 0,
    revents: 0,
};

pub struct PollPoller {
    fds: Vec<libc::pollfd>,
    tokens: Vec<Token>,
    // one past the highest registered descriptor
    nfds: usize,
    cursor: ReadyCursor,
}

impl PollPoller {
    pub fn new(capacity_hint: usize) -> io::Result<Self> {
        let capacity = table::capacity_for(capacity_hint)?;
        let fds = table::alloc(capacity, BLANK)?;
        let tokens = table::alloc(capacity, Token::default())?;
        Ok(Self {
            fds,
            tokens,
            nfds: 0,
            cursor: ReadyCursor::default(),
        })
    }

    fn clear_slot(&mut self, idx: usize) {
        self.fds[idx] = BLANK;
        self.tokens[idx] = Token::default();
        while self.nfds > 0 && self.fds[self.nfds - 1].fd == ABSENT {
            self.nfds -= 1;
        }
    }
}

fn to_events(interest: Ready) -> libc::c_short {
    let mut events = 0;
    if interest.is_readable() {
        events |= libc::POLLIN;
    }
    if interest.is_writable() {
        events |= libc::POLLOUT;
    }
    events
}

fn from_events(events: libc::c_short) -> Ready {
    let mut ready = Ready::empty();
    if events & libc::POLLIN != 0 {
        ready |= Ready::READABLE;
    }
    if events & libc::POLLOUT != 0 {
        ready |= Ready::WRITABLE;
    }
    if events & (libc::POLLERR | libc::POLLNVAL) != 0 {
        ready |= Ready::ERROR;
    }
    if events & libc::POLLHUP != 0 {
        ready |= Ready::HANGUP;
    }
    ready
}

impl AsPoller for PollPoller {
    fn backend(&self) -> Backend {
        Backend::Poll
    }

    fn capacity(&self) -> usize {
        self.fds.len()
    }

    fn control(&mut self, op: Op, mask: Ready, fd: RawFd, token: Token) -> io::Result<()> {
        let Some(idx) = table::slot_index(fd, op, self.fds.len())? else {
            return Ok(());
        };

        let current = self.interest(fd);
        match table::merge(op, current, mask) {
            Some(interest) => {
                let pollfd = &mut self.fds[idx];
                pollfd.fd = fd;
                pollfd.events = to_events(interest);
                if matches!(op, Op::Add | Op::Enable) {
                    self.tokens[idx] = token;
                }
                self.nfds = self.nfds.max(idx + 1);
            }
            None if current.is_some() => self.clear_slot(idx),
            None => {}
        }
        Ok(())
    }

    fn wait(&mut self, timeout_ms: i32) -> io::Result<usize> {
        self.cursor.reset(0);

        // The table holds at least `nfds` initialized entries.
        let res = unsafe {
            libc::poll(
                self.fds.as_mut_ptr(),
                self.nfds as libc::nfds_t,
                timeout_ms,
            )
        };
        let num_ready = Errno::result(res)? as usize;

        self.cursor.reset(num_ready);
        Ok(num_ready)
    }

    fn revents(&mut self) -> Option<(Ready, Token)> {
        while self.cursor.pending() > 0 && self.cursor.position() < self.nfds {
            let idx = self.cursor.position();
            let revents = self.fds[idx].revents;
            if revents != 0 {
                self.cursor.take();
                return Some((from_events(revents), self.tokens[idx]));
            }
            self.cursor.skip();
        }
        None
    }

    fn interest(&self, fd: RawFd) -> Option<Ready> {
        usize::try_from(fd)
            .ok()
            .and_then(|idx| self.fds.get(idx))
            .filter(|pollfd| pollfd.fd != ABSENT)
            .map(|pollfd| from_events(pollfd.events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_round_trip_interest() {
        for interest in [
            Ready::empty(),
            Ready::READABLE,
            Ready::WRITABLE,
            Ready::READABLE | Ready::WRITABLE,
        ] {
            assert_eq!(from_events(to_events(interest)), interest);
        }
    }

    #[test]
    fn nval_reports_error() {
        assert_eq!(from_events(libc::POLLNVAL), Ready::ERROR);
        assert_eq!(
            from_events(libc::POLLIN | libc::POLLHUP),
            Ready::READABLE | Ready::HANGUP
        );
    }

    #[test]
    fn table_high_water_tracks_registrations() {
        let mut poller = PollPoller::new(8).unwrap();
        poller.control(Op::Add, Ready::READABLE, 5, Token(1)).unwrap();
        poller.control(Op::Add, Ready::READABLE, 2, Token(2)).unwrap();
        assert_eq!(poller.nfds, 6);

        poller.control(Op::Delete, Ready::READABLE, 5, Token(0)).unwrap();
        assert_eq!(poller.nfds, 3);
        assert_eq!(poller.fds[5].fd, ABSENT);

        poller.control(Op::Delete, Ready::READABLE, 2, Token(0)).unwrap();
        assert_eq!(poller.nfds, 0);
    }

    #[test]
    fn disable_keeps_token() {
        let mut poller = PollPoller::new(8).unwrap();
        poller
            .control(Op::Add, Ready::READABLE | Ready::WRITABLE, 3, Token(4))
            .unwrap();
        poller.control(Op::Disable, Ready::WRITABLE, 3, Token(9)).unwrap();
        assert_eq!(poller.tokens[3], Token(4));
        assert_eq!(poller.interest(3), Some(Ready::READABLE));
    }
}
