//! Bookkeeping shared by every backend: capacity limits, the interest merge
//! rule, the per-descriptor interest table and the drain cursor.
use std::io;
use std::os::fd::RawFd;

use nix::errno::Errno;

use super::{Op, Ready, Token};

/// Extra descriptor slots granted on top of the caller's hint, so that
/// descriptor reuse doesn't immediately run past the table.
pub const FD_SLACK: usize = 128;

/// Ready entries a kernel-delegated backend returns from one `wait`.
pub const DEFAULT_READY_CAPACITY: usize = 8;

pub(crate) fn capacity_for(hint: usize) -> io::Result<usize> {
    if hint < 1 {
        return Err(Errno::EINVAL.into());
    }
    hint.checked_add(FD_SLACK)
        .ok_or_else(|| Errno::EINVAL.into())
}

/// Allocate a table without aborting on exhaustion.
pub(crate) fn alloc<T: Clone>(len: usize, fill: T) -> io::Result<Vec<T>> {
    let mut table = Vec::new();
    table.try_reserve_exact(len).map_err(|_| Errno::ENOMEM)?;
    table.resize(len, fill);
    Ok(table)
}

/// Validate `fd` for `op`. `Ok(None)` means the call is a no-op: a `Delete`
/// of a descriptor that cannot possibly be registered.
pub(crate) fn slot_index(fd: RawFd, op: Op, capacity: usize) -> io::Result<Option<usize>> {
    assert!(fd >= 0, "invalid descriptor {fd}");
    let idx = fd as usize;
    if idx < capacity {
        Ok(Some(idx))
    } else if op == Op::Delete {
        Ok(None)
    } else {
        Err(Errno::EINVAL.into())
    }
}

/// Interest after applying `op` with `mask` to `current` (`None` = absent).
pub(crate) fn merge(op: Op, current: Option<Ready>, mask: Ready) -> Option<Ready> {
    let mask = mask.interest_only();
    match op {
        Op::Add | Op::Enable => Some(current.unwrap_or_default() | mask),
        Op::Disable => current.map(|cur| cur - mask),
        Op::Delete => None,
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Slot {
    pub interest: Option<Ready>,
    /// Filters the kernel holds for this descriptor, enabled or not.
    #[cfg_attr(
        not(any(target_os = "macos", target_os = "freebsd", target_os = "openbsd")),
        allow(dead_code)
    )]
    pub registered: Ready,
    pub token: Token,
}

/// Per-descriptor interest kept alongside a kernel-side interest list.
pub(crate) struct InterestTable {
    slots: Vec<Slot>,
}

impl InterestTable {
    pub fn new(capacity: usize) -> io::Result<Self> {
        Ok(Self {
            slots: alloc(capacity, Slot::default())?,
        })
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn get(&self, idx: usize) -> Slot {
        self.slots[idx]
    }

    pub fn set(&mut self, idx: usize, slot: Slot) {
        self.slots[idx] = slot;
    }

    pub fn interest(&self, fd: RawFd) -> Option<Ready> {
        usize::try_from(fd)
            .ok()
            .and_then(|idx| self.slots.get(idx))
            .and_then(|slot| slot.interest)
    }
}

/// Tracks the unread entries left by the last `wait`.
#[derive(Debug, Default)]
pub(crate) struct ReadyCursor {
    pending: usize,
    cursor: usize,
}

impl ReadyCursor {
    pub fn reset(&mut self, produced: usize) {
        self.pending = produced;
        self.cursor = 0;
    }

    pub fn pending(&self) -> usize {
        self.pending
    }

    pub fn position(&self) -> usize {
        self.cursor
    }

    /// Consume one entry, returning the index it lives at.
    pub fn take(&mut self) -> Option<usize> {
        if self.pending == 0 {
            return None;
        }
        let idx = self.cursor;
        self.cursor += 1;
        self.pending -= 1;
        Some(idx)
    }

    /// Step over an index that holds nothing.
    pub fn skip(&mut self) {
        self.cursor += 1;
    }
}
