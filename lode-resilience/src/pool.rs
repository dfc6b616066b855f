//! Fixed-size slot pool
//!
//! An arena of values with an availability bitmap and a free list, all
//! guarded by one mutex. Used to hand out bounded identities such as
//! listener ports or worker ordinals.

use parking_lot::Mutex;

const WORD_BITS: usize = u64::BITS as usize;

/// A value checked out of a [`SlotPool`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot<T> {
    pub index: usize,
    pub value: T,
}

struct PoolState {
    /// One bit per slot, set while the slot is free
    available: Vec<u64>,
    free: Vec<usize>,
}

impl PoolState {
    fn is_available(&self, index: usize) -> bool {
        self.available[index / WORD_BITS] & (1 << (index % WORD_BITS)) != 0
    }

    fn set_available(&mut self, index: usize, available: bool) {
        let word = &mut self.available[index / WORD_BITS];
        let bit = 1u64 << (index % WORD_BITS);
        if available {
            *word |= bit;
        } else {
            *word &= !bit;
        }
    }
}

pub struct SlotPool<T> {
    slots: Vec<T>,
    state: Mutex<PoolState>,
}

impl<T: Clone> SlotPool<T> {
    pub fn new(values: Vec<T>) -> Self {
        let len = values.len();
        let mut state = PoolState {
            available: vec![0; len.div_ceil(WORD_BITS)],
            // Reversed so the lowest index is handed out first
            free: (0..len).rev().collect(),
        };
        for index in 0..len {
            state.set_available(index, true);
        }

        Self {
            slots: values,
            state: Mutex::new(state),
        }
    }

    /// Take a free slot, `None` when the pool is exhausted
    pub fn acquire(&self) -> Option<Slot<T>> {
        let mut state = self.state.lock();
        let index = state.free.pop()?;
        state.set_available(index, false);

        Some(Slot {
            index,
            value: self.slots[index].clone(),
        })
    }

    /// Return a slot; false when the index is unknown or already free
    pub fn release(&self, index: usize) -> bool {
        if index >= self.slots.len() {
            return false;
        }

        let mut state = self.state.lock();
        if state.is_available(index) {
            return false;
        }
        state.set_available(index, true);
        state.free.push(index);
        true
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn available(&self) -> usize {
        self.state.lock().free.len()
    }
}

impl SlotPool<u16> {
    /// Pool of `count` consecutive numbers starting at `start`
    pub fn range(start: u16, count: u16) -> Self {
        Self::new((0..count).map(|i| start.saturating_add(i)).collect())
    }
}
