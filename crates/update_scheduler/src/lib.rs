//! Coalescing of fine-grained scene-change events into one deferred update.
//!
//! Document edits arrive as many small notifications inside a single user
//! action. Each one ORs a [`PendingFlags`] set into the accumulator; the
//! first request in a tick latches exactly one flush. The host runs
//! [`UpdateScheduler::begin_flush`] once per idle tick and processes the
//! returned flags in its fixed order. A defer gate (held during reloads)
//! keeps the flush scheduled without releasing the flags.

/// Bitset of deferred update kinds. Flags accumulate by OR and are never
/// overwritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PendingFlags {
    bits: u8,
}

impl PendingFlags {
    const ALL_GROUPS_BIT: u8 = 1 << 0;
    const BOUNDS_BIT: u8 = 1 << 1;
    const SYNCH_BIT: u8 = 1 << 2;
    const Z_ORDER_BIT: u8 = 1 << 3;
    const LOT_VISIBILITY_BIT: u8 = 1 << 4;
    const PAINT_BIT: u8 = 1 << 5;

    /// Level batch sets and level items must be created/extended.
    pub const ALL_GROUPS: Self = Self {
        bits: Self::ALL_GROUPS_BIT,
    };
    /// Scene extents and dependent item positions must be recomputed.
    pub const BOUNDS: Self = Self {
        bits: Self::BOUNDS_BIT,
    };
    /// Composite layout (layer groups, max level) must be resynched.
    pub const SYNCH: Self = Self {
        bits: Self::SYNCH_BIT,
    };
    /// Draw order must be reassigned.
    pub const Z_ORDER: Self = Self {
        bits: Self::Z_ORDER_BIT,
    };
    /// Per-sub-map visibility must be recomputed from level rules.
    pub const LOT_VISIBILITY: Self = Self {
        bits: Self::LOT_VISIBILITY_BIT,
    };
    /// Affected regions must be repainted.
    pub const PAINT: Self = Self {
        bits: Self::PAINT_BIT,
    };

    pub const fn empty() -> Self {
        Self { bits: 0 }
    }

    pub const fn is_empty(self) -> bool {
        self.bits == 0
    }

    pub const fn contains(self, other: Self) -> bool {
        (self.bits & other.bits) == other.bits
    }

    pub const fn insert(&mut self, other: Self) {
        self.bits |= other.bits;
    }
}

impl std::ops::BitOr for PendingFlags {
    type Output = PendingFlags;

    fn bitor(self, rhs: PendingFlags) -> PendingFlags {
        PendingFlags {
            bits: self.bits | rhs.bits,
        }
    }
}

impl std::ops::BitOrAssign for PendingFlags {
    fn bitor_assign(&mut self, rhs: PendingFlags) {
        self.bits |= rhs.bits;
    }
}

/// Accumulates pending flags and latches at most one flush per tick.
#[derive(Debug, Default)]
pub struct UpdateScheduler {
    pending: PendingFlags,
    flush_scheduled: bool,
    defer: bool,
}

impl UpdateScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// ORs `flags` into the accumulator. Returns true when this request
    /// newly latched a flush, i.e. the host should arrange one idle-tick
    /// call to [`begin_flush`](Self::begin_flush).
    pub fn request_later(&mut self, flags: PendingFlags) -> bool {
        self.pending |= flags;
        if self.flush_scheduled || self.pending.is_empty() {
            return false;
        }
        self.flush_scheduled = true;
        true
    }

    pub const fn has_scheduled_flush(&self) -> bool {
        self.flush_scheduled
    }

    pub const fn pending(&self) -> PendingFlags {
        self.pending
    }

    /// Gates flushing, e.g. while a map reload is in progress. Releasing
    /// the gate keeps any scheduled flush latched for the next tick.
    pub fn set_defer(&mut self, defer: bool) {
        self.defer = defer;
    }

    pub const fn is_deferred(&self) -> bool {
        self.defer
    }

    /// Takes the accumulated flags at the start of a tick.
    ///
    /// Returns `None` when nothing is scheduled or the defer gate is set;
    /// a deferred flush stays latched and its flags stay accumulated.
    /// Flags are taken before processing, so requests made mid-flush latch
    /// a fresh flush for the next tick rather than being lost.
    pub fn begin_flush(&mut self) -> Option<PendingFlags> {
        if !self.flush_scheduled {
            return None;
        }
        if self.defer {
            return None;
        }
        let flags = self.pending;
        self.pending = PendingFlags::empty();
        self.flush_scheduled = false;
        Some(flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_request_latches_exactly_one_flush() {
        let mut scheduler = UpdateScheduler::new();
        assert!(scheduler.request_later(PendingFlags::SYNCH));
        assert!(!scheduler.request_later(PendingFlags::BOUNDS));
        assert!(!scheduler.request_later(PendingFlags::SYNCH | PendingFlags::PAINT));
        assert!(scheduler.has_scheduled_flush());

        let flags = scheduler.begin_flush().expect("flush due");
        assert!(flags.contains(PendingFlags::SYNCH));
        assert!(flags.contains(PendingFlags::BOUNDS));
        assert!(flags.contains(PendingFlags::PAINT));
        assert!(!flags.contains(PendingFlags::Z_ORDER));
        assert!(!scheduler.has_scheduled_flush());
        assert!(scheduler.begin_flush().is_none());
    }

    #[test]
    fn flags_accumulate_by_or_and_are_never_overwritten() {
        let mut scheduler = UpdateScheduler::new();
        scheduler.request_later(PendingFlags::ALL_GROUPS);
        scheduler.request_later(PendingFlags::LOT_VISIBILITY);
        assert_eq!(
            scheduler.pending(),
            PendingFlags::ALL_GROUPS | PendingFlags::LOT_VISIBILITY
        );
    }

    #[test]
    fn empty_request_does_not_latch() {
        let mut scheduler = UpdateScheduler::new();
        assert!(!scheduler.request_later(PendingFlags::empty()));
        assert!(!scheduler.has_scheduled_flush());
        assert!(scheduler.begin_flush().is_none());
    }

    #[test]
    fn defer_gate_keeps_flags_and_latch() {
        let mut scheduler = UpdateScheduler::new();
        scheduler.request_later(PendingFlags::SYNCH | PendingFlags::Z_ORDER);
        scheduler.set_defer(true);

        assert!(scheduler.begin_flush().is_none());
        assert!(scheduler.has_scheduled_flush());
        assert_eq!(
            scheduler.pending(),
            PendingFlags::SYNCH | PendingFlags::Z_ORDER
        );

        scheduler.set_defer(false);
        let flags = scheduler.begin_flush().expect("flush after gate release");
        assert_eq!(flags, PendingFlags::SYNCH | PendingFlags::Z_ORDER);
    }

    #[test]
    fn requests_made_mid_flush_latch_the_next_tick() {
        let mut scheduler = UpdateScheduler::new();
        scheduler.request_later(PendingFlags::PAINT);
        let first = scheduler.begin_flush().expect("first flush");
        assert_eq!(first, PendingFlags::PAINT);

        // a handler running inside the flush requests more work
        assert!(scheduler.request_later(PendingFlags::BOUNDS));
        let second = scheduler.begin_flush().expect("second flush");
        assert_eq!(second, PendingFlags::BOUNDS);
    }

    #[test]
    fn requests_while_deferred_merge_into_the_held_set() {
        let mut scheduler = UpdateScheduler::new();
        scheduler.set_defer(true);
        scheduler.request_later(PendingFlags::SYNCH);
        scheduler.request_later(PendingFlags::PAINT);
        assert!(scheduler.begin_flush().is_none());

        scheduler.set_defer(false);
        assert_eq!(
            scheduler.begin_flush().expect("merged flush"),
            PendingFlags::SYNCH | PendingFlags::PAINT
        );
    }
}
