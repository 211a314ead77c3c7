use super::changes::{ChangeBuffer, CHANGE_BATCH};
use super::table::{self, InterestTable, ReadyCursor, Slot, DEFAULT_READY_CAPACITY};
use super::{AsPoller, Backend, Op, Ready, Token};
use nix::errno::Errno;
use nix::libc::{intptr_t, timespec, uintptr_t};
use nix::sys::event::{EventFilter, EventFlag, FilterFlag, KEvent, Kqueue};
use std::io;
use std::os::fd::RawFd;

const NO_TIME_WAIT: timespec = timespec {
    tv_sec: 0,
    tv_nsec: 0,
};

const FILTERS: [(Ready, EventFilter); 2] = [
    (Ready::READABLE, EventFilter::EVFILT_READ),
    (Ready::WRITABLE, EventFilter::EVFILT_WRITE),
];

fn kevent(fd: RawFd, filter: EventFilter, flags: EventFlag, token: Token) -> KEvent {
    KEvent::new(
        fd as uintptr_t,
        filter,
        flags,
        FilterFlag::empty(),
        0,
        token.0 as intptr_t,
    )
}

fn blank() -> KEvent {
    kevent(0, EventFilter::EVFILT_READ, EventFlag::empty(), Token::default())
}

fn timeout(timeout_ms: i32) -> Option<timespec> {
    (timeout_ms >= 0).then(|| timespec {
        tv_sec: (timeout_ms / 1000) as _,
        tv_nsec: ((timeout_ms % 1000) as i64 * 1_000_000) as _,
    })
}

/// Change records the kernel refused, paired with the reason.
///
/// `results` holds what `kevent` wrote back for `changes`: one entry per
/// change with `EV_RECEIPT`, or one per failed change otherwise. Either way
/// the entries come back in changelist order.
fn refusals<'a>(
    changes: &'a [KEvent],
    results: &'a [KEvent],
) -> impl Iterator<Item = (&'a KEvent, Errno)> + 'a {
    let mut pos = 0;
    results.iter().filter(|r| is_refusal(r)).filter_map(move |result| {
        let offset = changes[pos..].iter().position(|change| {
            change.ident() == result.ident() && change.filter().ok() == result.filter().ok()
        })?;
        let change = &changes[pos + offset];
        pos += offset + 1;
        Some((change, Errno::from_raw(result.data() as i32)))
    })
}

fn is_refusal(event: &KEvent) -> bool {
    event.flags().contains(EventFlag::EV_ERROR) && event.data() != 0
}

fn filter_bit(change: &KEvent) -> Ready {
    FILTERS
        .iter()
        .find(|(_, filter)| change.filter().ok() == Some(*filter))
        .map_or(Ready::empty(), |(bit, _)| *bit)
}

/// Undo refused changes in `table` so it matches what the kernel holds.
///
/// Returns the first refusal worth reporting. A refused `EV_DELETE` is not:
/// the filter is gone either way, typically because the descriptor was
/// closed before the batch went out.
fn reconcile(table: &mut InterestTable, changes: &[KEvent], results: &[KEvent]) -> Option<Errno> {
    let mut first = None;
    for (change, errno) in refusals(changes, results) {
        let flags = change.flags();
        if flags.contains(EventFlag::EV_DELETE) {
            continue;
        }

        let bit = filter_bit(change);
        let idx = change.ident();
        let mut slot = table.get(idx);
        slot.registered -= bit;
        if flags.contains(EventFlag::EV_ADD) {
            slot.interest = slot.interest.map(|interest| interest - bit);
            if slot.registered.is_empty() {
                slot = Slot::default();
            }
        }
        table.set(idx, slot);
        first.get_or_insert(errno);
    }
    first
}

/// What a piggy-backed wait got back from the kernel.
enum Outcome {
    Ready(usize),
    /// Some changes were refused, so the kernel returned before waiting.
    Refused(Option<Errno>),
}

/// kqueue(2) batched-filter backend.
///
/// Interest lives in the kernel as one filter per (descriptor, condition).
/// Control calls only queue change records; the batch goes to the kernel
/// when it fills up or together with the next wait, so a burst of
/// registrations costs a single `kevent` call.
///
/// A refused change is undone in the interest table and reported by the call
/// that sent it, which may be a later `control` or `wait` than the one that
/// queued it.
pub struct KqueuePoller {
    table: InterestTable,
    changes: ChangeBuffer<KEvent, CHANGE_BATCH>,
    event_buffer: Vec<KEvent>,
    cursor: ReadyCursor,
    kq: Kqueue,
}

impl KqueuePoller {
    pub fn new(capacity_hint: usize) -> io::Result<Self> {
        Self::with_ready_capacity(capacity_hint, DEFAULT_READY_CAPACITY)
    }

    pub fn with_ready_capacity(capacity_hint: usize, ready_capacity: usize) -> io::Result<Self> {
        if ready_capacity < 1 {
            return Err(Errno::EINVAL.into());
        }
        let table = InterestTable::new(table::capacity_for(capacity_hint)?)?;
        let event_buffer = table::alloc(ready_capacity, blank())?;
        let kq = Kqueue::new()?;

        Ok(Self {
            table,
            changes: ChangeBuffer::new(blank()),
            event_buffer,
            cursor: ReadyCursor::default(),
            kq,
        })
    }

    /// Push the pending change batch to the kernel without collecting events.
    ///
    /// Every record is sent with `EV_RECEIPT`, so a refused record doesn't
    /// stop the ones after it. Refused records are undone in the interest
    /// table and the first refusal is returned.
    pub fn submit(&mut self) -> io::Result<()> {
        if self.changes.is_empty() {
            return Ok(());
        }

        let kq = &self.kq;
        let table = &mut self.table;
        let refused = self.changes.submit(|changes| -> io::Result<Option<Errno>> {
            let mut receipted = [blank(); CHANGE_BATCH];
            for (dst, change) in receipted.iter_mut().zip(changes) {
                *dst = KEvent::new(
                    change.ident(),
                    change.filter()?,
                    change.flags() | EventFlag::EV_RECEIPT,
                    change.fflags(),
                    change.data(),
                    change.udata(),
                );
            }
            let mut receipts = [blank(); CHANGE_BATCH];
            let n = kq.kevent(&receipted[..changes.len()], &mut receipts, Some(NO_TIME_WAIT))?;
            Ok(reconcile(table, changes, &receipts[..n]))
        })?;

        match refused {
            Some(errno) => Err(errno.into()),
            None => Ok(()),
        }
    }

    /// Change records waiting for the next submission.
    pub fn pending_changes(&self) -> usize {
        self.changes.len()
    }
}

impl AsPoller for KqueuePoller {
    fn backend(&self) -> Backend {
        Backend::Kqueue
    }

    fn capacity(&self) -> usize {
        self.table.capacity()
    }

    fn control(&mut self, op: Op, mask: Ready, fd: RawFd, token: Token) -> io::Result<()> {
        let Some(idx) = table::slot_index(fd, op, self.table.capacity())? else {
            return Ok(());
        };

        let slot = self.table.get(idx);
        let current = slot.interest.unwrap_or_default();
        let next = table::merge(op, slot.interest, mask);

        // Which filters to touch, with which flags, and the resulting state.
        let (touched, flags, next_slot) = match op {
            Op::Add | Op::Enable => {
                let enabled = next.unwrap_or_default();
                // EV_ADD replaces udata, so a new token re-adds every enabled filter
                let touched = if token == slot.token {
                    enabled - current
                } else {
                    enabled
                };
                let next_slot = Slot {
                    interest: next,
                    registered: slot.registered | enabled,
                    token,
                };
                (touched, EventFlag::EV_ADD | EventFlag::EV_ENABLE, next_slot)
            }
            Op::Disable => {
                let next_slot = Slot {
                    interest: next,
                    ..slot
                };
                (current & mask, EventFlag::EV_DISABLE, next_slot)
            }
            Op::Delete => (slot.registered, EventFlag::EV_DELETE, Slot::default()),
        };

        let mut records = [blank(); 2];
        let mut num_records = 0;
        for (bit, filter) in FILTERS {
            if touched.contains(bit) {
                records[num_records] = kevent(fd, filter, flags, next_slot.token);
                num_records += 1;
            }
        }

        if self.changes.remaining() < num_records {
            self.submit()?;
        }
        let mark = self.changes.len();
        for record in &records[..num_records] {
            self.changes.push(*record);
        }
        self.table.set(idx, next_slot);

        if self.changes.is_full() {
            if let Err(e) = self.submit() {
                if self.changes.is_full() {
                    // the kernel never took the batch; withdraw this call's records
                    self.changes.truncate(mark);
                    self.table.set(idx, slot);
                }
                return Err(e);
            }
        }
        Ok(())
    }

    fn wait(&mut self, timeout_ms: i32) -> io::Result<usize> {
        self.cursor.reset(0);
        // each refused change needs a slot in the eventlist to be reported
        if self.changes.len() > self.event_buffer.len() {
            self.submit()?;
        }

        let timeout = timeout(timeout_ms);
        let kq = &self.kq;
        let table = &mut self.table;
        let eventlist = &mut self.event_buffer;
        let outcome = self.changes.submit(|changelist| -> io::Result<Outcome> {
            let n = kq.kevent(changelist, eventlist, timeout)?;
            let results = &eventlist[..n];
            if results.iter().any(is_refusal) {
                Ok(Outcome::Refused(reconcile(table, changelist, results)))
            } else {
                Ok(Outcome::Ready(n))
            }
        })?;

        let num_ready = match outcome {
            Outcome::Ready(n) => n,
            Outcome::Refused(Some(errno)) => return Err(errno.into()),
            // only stale deletes were refused; nothing has been waited for yet
            Outcome::Refused(None) => self.kq.kevent(&[], &mut self.event_buffer, timeout)?,
        };
        self.cursor.reset(num_ready);
        Ok(num_ready)
    }

    fn revents(&mut self) -> Option<(Ready, Token)> {
        let idx = self.cursor.take()?;
        let event = &self.event_buffer[idx];

        let mut ready = match event.filter() {
            Ok(EventFilter::EVFILT_READ) => Ready::READABLE,
            Ok(EventFilter::EVFILT_WRITE) => Ready::WRITABLE,
            _ => Ready::empty(),
        };
        let flags = event.flags();
        if flags.contains(EventFlag::EV_ERROR) {
            ready |= Ready::ERROR;
        }
        if flags.contains(EventFlag::EV_EOF) {
            ready |= Ready::HANGUP;
        }
        Some((ready, Token(event.udata() as usize)))
    }

    fn interest(&self, fd: RawFd) -> Option<Ready> {
        self.table.interest(fd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsRawFd;

    #[test]
    fn timeout_conversion() {
        assert!(timeout(-1).is_none());
        let ts = timeout(1500).unwrap();
        assert_eq!(ts.tv_sec, 1);
        assert_eq!(ts.tv_nsec, 500_000_000);
        let ts = timeout(0).unwrap();
        assert_eq!((ts.tv_sec, ts.tv_nsec), (0, 0));
    }

    #[test]
    fn changes_wait_for_submission() {
        let mut poller = KqueuePoller::new(4).unwrap();
        let (rd, wr) = nix::unistd::pipe().unwrap();

        poller
            .control(Op::Add, Ready::READABLE, rd.as_raw_fd(), Token(1))
            .unwrap();
        poller
            .control(Op::Add, Ready::WRITABLE, wr.as_raw_fd(), Token(2))
            .unwrap();
        poller
            .control(Op::Disable, Ready::WRITABLE, wr.as_raw_fd(), Token(2))
            .unwrap();
        assert_eq!(poller.pending_changes(), 3);

        assert_eq!(poller.wait(0).unwrap(), 0);
        assert_eq!(poller.pending_changes(), 0);
    }

    #[test]
    fn full_batch_is_submitted() {
        let mut poller = KqueuePoller::new(16).unwrap();
        let pipes: Vec<_> = (0..5).map(|_| nix::unistd::pipe().unwrap()).collect();

        // 4 pipes x 2 ends fills the batch exactly
        for (i, (rd, wr)) in pipes.iter().take(4).enumerate() {
            poller
                .control(Op::Add, Ready::READABLE, rd.as_raw_fd(), Token(i))
                .unwrap();
            poller
                .control(Op::Add, Ready::WRITABLE, wr.as_raw_fd(), Token(i))
                .unwrap();
        }
        assert_eq!(poller.pending_changes(), 0);

        let (rd, _) = &pipes[4];
        poller
            .control(Op::Add, Ready::READABLE, rd.as_raw_fd(), Token(9))
            .unwrap();
        assert_eq!(poller.pending_changes(), 1);
    }

    #[test]
    fn new_token_re_adds_enabled_filters() {
        let mut poller = KqueuePoller::new(4).unwrap();
        let (rd, _wr) = nix::unistd::pipe().unwrap();
        let fd = rd.as_raw_fd();

        poller.control(Op::Add, Ready::READABLE, fd, Token(1)).unwrap();
        poller.control(Op::Add, Ready::READABLE, fd, Token(1)).unwrap();
        assert_eq!(poller.pending_changes(), 1);

        poller.control(Op::Enable, Ready::empty(), fd, Token(2)).unwrap();
        assert_eq!(poller.pending_changes(), 2);
        assert_eq!(poller.table.get(fd as usize).token, Token(2));
    }

    // far above anything the test process has open
    const UNOPENED: RawFd = 4000;

    #[test]
    fn refused_change_is_undone() {
        let mut poller = KqueuePoller::new(UNOPENED as usize + 1).unwrap();
        let (rd, wr) = nix::unistd::pipe().unwrap();

        poller
            .control(Op::Add, Ready::READABLE, UNOPENED, Token(1))
            .unwrap();
        poller
            .control(Op::Add, Ready::READABLE, rd.as_raw_fd(), Token(2))
            .unwrap();
        assert_eq!(poller.interest(UNOPENED), Some(Ready::READABLE));

        let err = poller.submit().unwrap_err();
        assert_eq!(err.raw_os_error(), Some(Errno::EBADF as i32));
        assert_eq!(poller.interest(UNOPENED), None);
        assert_eq!(poller.pending_changes(), 0);

        // the record queued after the refused one still reached the kernel
        assert_eq!(poller.interest(rd.as_raw_fd()), Some(Ready::READABLE));
        let mut wr = std::fs::File::from(wr);
        std::io::Write::write_all(&mut wr, b"x").unwrap();
        assert_eq!(poller.wait(0).unwrap(), 1);
        assert_eq!(poller.revents(), Some((Ready::READABLE, Token(2))));
    }

    #[test]
    fn refused_record_filling_the_batch_fails_its_call() {
        let mut poller = KqueuePoller::new(UNOPENED as usize + 1).unwrap();
        let pipes: Vec<_> = (0..4).map(|_| nix::unistd::pipe().unwrap()).collect();

        // seven good records, then the bad one fills the batch
        for (i, (rd, wr)) in pipes.iter().take(3).enumerate() {
            poller
                .control(Op::Add, Ready::READABLE, rd.as_raw_fd(), Token(i))
                .unwrap();
            poller
                .control(Op::Add, Ready::WRITABLE, wr.as_raw_fd(), Token(i))
                .unwrap();
        }
        poller
            .control(Op::Add, Ready::READABLE, pipes[3].0.as_raw_fd(), Token(3))
            .unwrap();
        assert_eq!(poller.pending_changes(), 7);

        let err = poller
            .control(Op::Add, Ready::READABLE, UNOPENED, Token(9))
            .unwrap_err();
        assert_eq!(err.raw_os_error(), Some(Errno::EBADF as i32));
        assert_eq!(poller.interest(UNOPENED), None);
        assert_eq!(poller.pending_changes(), 0);
        for (rd, wr) in pipes.iter().take(3) {
            assert_eq!(poller.interest(rd.as_raw_fd()), Some(Ready::READABLE));
            assert_eq!(poller.interest(wr.as_raw_fd()), Some(Ready::WRITABLE));
        }

        // the write ends were registered: all three report writable
        let writable = poller.wait(0).unwrap();
        assert_eq!(writable, 3);
        assert!(poller.drain().all(|(ready, _)| ready == Ready::WRITABLE));
    }

    #[test]
    fn delete_then_close_reports_nothing() {
        let mut poller = KqueuePoller::new(64).unwrap();
        let (rd, wr) = nix::unistd::pipe().unwrap();
        let fd = rd.as_raw_fd();

        poller.control(Op::Add, Ready::READABLE, fd, Token(0)).unwrap();
        assert_eq!(poller.wait(0).unwrap(), 0);

        // the EV_DELETE is still queued when the descriptor goes away
        poller.control(Op::Delete, Ready::READABLE, fd, Token(0)).unwrap();
        assert_eq!(poller.pending_changes(), 1);
        drop(rd);
        drop(wr);

        assert_eq!(poller.wait(0).unwrap(), 0);
        assert_eq!(poller.revents(), None);
        assert_eq!(poller.pending_changes(), 0);
        assert_eq!(poller.interest(fd), None);
    }
}
