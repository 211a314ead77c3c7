//! A small, array-backed batch of pending interest changes.
//!
//! Submitting changes costs a syscall no matter how many records go with it,
//! so the batched-filter backend queues records here and hands the whole
//! batch to the kernel either when it fills up or together with the next
//! wait.

pub(crate) const CHANGE_BATCH: usize = 8;

pub(crate) struct ChangeBuffer<T, const N: usize> {
    records: [T; N],
    len: usize,
}

impl<T: Copy, const N: usize> ChangeBuffer<T, N> {
    /// `blank` fills the unused slots; it is never submitted.
    pub fn new(blank: T) -> Self {
        Self {
            records: [blank; N],
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == N
    }

    pub fn remaining(&self) -> usize {
        N - self.len
    }

    /// Queue `record`. Returns `false`, leaving the batch untouched, when
    /// there is no room.
    pub fn push(&mut self, record: T) -> bool {
        if self.is_full() {
            return false;
        }
        self.records[self.len] = record;
        self.len += 1;
        true
    }

    pub fn as_slice(&self) -> &[T] {
        &self.records[..self.len]
    }

    /// Drop records queued after the first `len`.
    pub fn truncate(&mut self, len: usize) {
        self.len = self.len.min(len);
    }

    /// Hand the queued records to `submit` and empty the batch once it
    /// returns `Ok`.
    ///
    /// On `Err` the records stay queued: a failed submission call means the
    /// kernel may not have seen them, and every record is safe to send again.
    pub fn submit<F, R, E>(&mut self, submit: F) -> Result<R, E>
    where
        F: FnOnce(&[T]) -> Result<R, E>,
    {
        let res = submit(&self.records[..self.len])?;
        self.len = 0;
        Ok(res)
    }
}
