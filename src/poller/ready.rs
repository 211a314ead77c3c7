use bitflags::bitflags;

bitflags! {
    /// Readiness conditions, used both to express interest and to report it.
    ///
    /// Only `READABLE` and `WRITABLE` can be registered. `ERROR` and `HANGUP`
    /// are reported on their own and do not imply readability, even where a
    /// backend also sets `READABLE` alongside them.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Ready: u8 {
        const READABLE = 0b0001;
        const WRITABLE = 0b0010;
        const ERROR = 0b0100;
        const HANGUP = 0b1000;
    }
}

impl Ready {
    /// The bits a caller may register interest in.
    pub const INTEREST: Ready = Ready::READABLE.union(Ready::WRITABLE);

    /// Drops everything but `READABLE` and `WRITABLE`.
    pub fn interest_only(self) -> Ready {
        self & Self::INTEREST
    }

    pub fn is_readable(self) -> bool {
        self.contains(Self::READABLE)
    }

    pub fn is_writable(self) -> bool {
        self.contains(Self::WRITABLE)
    }

    /// True when the descriptor reported an error or hangup condition.
    pub fn is_failed(self) -> bool {
        self.intersects(Self::ERROR | Self::HANGUP)
    }
}
