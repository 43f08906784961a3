//! Reactive state and invalidation tags.
//!
//! Cells live in a [`ReactiveStore`] and carry the revision of their last
//! write. A [`Tag`] is the set of cells one tracker read plus the clock value
//! at the time it was validated; it is dirty once any of those cells has been
//! written since.
//!
//! The store also carries the tick phase. While a render or a revalidation
//! tick is running, writes are queued and only applied when the tick ends,
//! so trackers are always visited against a stable state.

use std::cell::RefCell;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::{error::RenderError, value::Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellId(u32);

impl CellId {
    #[must_use]
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Position on the store's monotonic clock.
pub type Revision = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickPhase {
    Idle,
    Revalidating,
}

#[derive(Debug)]
struct CellSlot {
    value: Value,
    revision: Revision,
}

#[derive(Debug)]
struct StoreInner {
    cells: Vec<CellSlot>,
    clock: Revision,
    phase: TickPhase,
    pending: Vec<(CellId, Value)>,
}

#[derive(Debug)]
pub struct ReactiveStore {
    inner: RefCell<StoreInner>,
}

impl Default for ReactiveStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ReactiveStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RefCell::new(StoreInner {
                cells: Vec::new(),
                clock: 1,
                phase: TickPhase::Idle,
                pending: Vec::new(),
            }),
        }
    }

    /// Creates a cell holding `value`.
    pub fn cell(&self, value: impl Into<Value>) -> CellId {
        let mut inner = self.inner.borrow_mut();
        let revision = inner.clock;
        let id = CellId(u32::try_from(inner.cells.len()).unwrap_or(u32::MAX));
        inner.cells.push(CellSlot {
            value: value.into(),
            revision,
        });
        id
    }

    /// Current value of `cell` without recording a dependency.
    ///
    /// Unknown cells read as `undefined`.
    #[must_use]
    pub fn get(&self, cell: CellId) -> Value {
        self.inner
            .borrow()
            .cells
            .get(cell.0 as usize)
            .map(|slot| slot.value.clone())
            .unwrap_or_default()
    }

    /// Writes `value` to `cell`. During a tick the write is queued.
    pub fn set(&self, cell: CellId, value: impl Into<Value>) {
        let value = value.into();
        let mut inner = self.inner.borrow_mut();
        if inner.phase == TickPhase::Revalidating {
            log::trace!("queueing write to cell {} until the tick ends", cell.0);
            inner.pending.push((cell, value));
        } else {
            inner.write(cell, value);
        }
    }

    /// Revision of the last write to `cell`.
    #[must_use]
    pub fn revision(&self, cell: CellId) -> Revision {
        self.inner
            .borrow()
            .cells
            .get(cell.0 as usize)
            .map_or(0, |slot| slot.revision)
    }

    /// Current clock value.
    #[must_use]
    pub fn now(&self) -> Revision {
        self.inner.borrow().clock
    }

    #[must_use]
    pub fn phase(&self) -> TickPhase {
        self.inner.borrow().phase
    }

    /// Number of writes waiting for the current tick to end.
    #[must_use]
    pub fn pending_writes(&self) -> usize {
        self.inner.borrow().pending.len()
    }

    /// Enters the revalidating phase. Ticks never nest.
    pub fn begin_tick(&self) -> Result<(), RenderError> {
        let mut inner = self.inner.borrow_mut();
        if inner.phase == TickPhase::Revalidating {
            return Err(RenderError::TickInProgress);
        }
        inner.phase = TickPhase::Revalidating;
        Ok(())
    }

    /// Leaves the revalidating phase and applies queued writes, in order.
    pub fn end_tick(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.phase = TickPhase::Idle;
        let pending = std::mem::take(&mut inner.pending);
        for (cell, value) in pending {
            inner.write(cell, value);
        }
    }
}

impl StoreInner {
    fn write(&mut self, cell: CellId, value: Value) {
        self.clock += 1;
        let clock = self.clock;
        if let Some(slot) = self.cells.get_mut(cell.0 as usize) {
            slot.value = value;
            slot.revision = clock;
        }
    }
}

/// Validation tag of one tracker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tag {
    deps: SmallVec<[CellId; 4]>,
    snapshot: Revision,
}

impl Tag {
    /// A tag over `deps`, valid as of `snapshot`.
    #[must_use]
    pub fn new(mut deps: SmallVec<[CellId; 4]>, snapshot: Revision) -> Self {
        deps.sort_unstable();
        deps.dedup();
        Self { deps, snapshot }
    }

    /// A tag that never invalidates.
    #[must_use]
    pub fn constant() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_dirty(&self, store: &ReactiveStore) -> bool {
        self.deps.iter().any(|&cell| store.revision(cell) > self.snapshot)
    }

    #[must_use]
    pub fn deps(&self) -> &[CellId] {
        &self.deps
    }

    #[must_use]
    pub fn is_constant(&self) -> bool {
        self.deps.is_empty()
    }
}
