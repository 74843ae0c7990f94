use std::collections::BTreeMap;

pub type Epoch = u64;

/// Logical request slots; each has at most one live request at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FetchSlot {
    Projects,
    Workbooks,
    /// Source connection details of the displayed datasource.
    ConnectionInfo,
    ConnectionTest,
    Job,
}

/// Monotonic per-slot counters used to drop responses that completed after
/// their request was superseded.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Epochs {
    current: BTreeMap<FetchSlot, Epoch>,
}

impl Epochs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self, slot: FetchSlot) -> Epoch {
        self.current.get(&slot).copied().unwrap_or(0)
    }

    /// Invalidates everything issued so far for `slot` and returns the new epoch.
    pub fn advance(&mut self, slot: FetchSlot) -> Epoch {
        let next = self.current(slot) + 1;
        self.current.insert(slot, next);
        next
    }

    pub fn is_current(&self, slot: FetchSlot, epoch: Epoch) -> bool {
        epoch != 0 && self.current(slot) == epoch
    }
}
