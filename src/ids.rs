//! Record identifiers.
//!
//! Production servers hand out random identifiers. Test mode switches to
//! per-kind counters so end-to-end scenarios can predict ids; the counters
//! are reset through the test control endpoint.

use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    Game,
    Unit,
    Settlement,
}

impl IdKind {
    fn prefix(self) -> &'static str {
        match self {
            IdKind::Game => "game",
            IdKind::Unit => "unit",
            IdKind::Settlement => "settlement",
        }
    }

    fn slot(self) -> usize {
        match self {
            IdKind::Game => 0,
            IdKind::Unit => 1,
            IdKind::Settlement => 2,
        }
    }
}

#[derive(Debug)]
pub struct IdAllocator {
    sequential: bool,
    counters: [AtomicU64; 3],
}

impl IdAllocator {
    pub fn random() -> Self {
        Self {
            sequential: false,
            counters: Default::default(),
        }
    }

    pub fn sequential() -> Self {
        Self {
            sequential: true,
            counters: Default::default(),
        }
    }

    pub fn for_mode(test_mode: bool) -> Self {
        if test_mode {
            Self::sequential()
        } else {
            Self::random()
        }
    }

    pub fn next(&self, kind: IdKind) -> String {
        if self.sequential {
            let n = self.counters[kind.slot()].fetch_add(1, Ordering::SeqCst) + 1;
            format!("{}-{n}", kind.prefix())
        } else {
            let raw: u64 = rand::thread_rng().gen();
            format!("{}-{raw:016x}", kind.prefix())
        }
    }

    /// Like [`IdAllocator::next`], but skips ids for which `taken` holds.
    /// After a counter reset this walks past records that already exist.
    pub fn next_unused(&self, kind: IdKind, mut taken: impl FnMut(&str) -> bool) -> String {
        loop {
            let id = self.next(kind);
            if !taken(&id) {
                return id;
            }
        }
    }

    pub fn reset(&self) {
        for counter in &self.counters {
            counter.store(0, Ordering::SeqCst);
        }
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::random()
    }
}
