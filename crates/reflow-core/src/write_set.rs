//! Deferred writes produced by the inverse walk
//!
//! An action first walks inverse definitions down to stored slots, collecting
//! `PendingWrite`s into a `WriteSet` without touching any state. Only when
//! the whole walk succeeds is the set committed, so a rejected action leaves
//! the document untouched.

use crate::{SlotRef, Value};
use serde::{Deserialize, Serialize};

/// A pending write to a stored slot
///
/// Values are already evaluated (no expressions).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PendingWrite {
    /// Store a value into an essential slot
    Set {
        /// The slot to write
        slot: SlotRef,
        /// The value to store
        value: Value,
    },

    /// Increment a trigger slot by one
    Trigger {
        /// The trigger to fire
        slot: SlotRef,
    },
}

impl PendingWrite {
    /// The slot this write targets
    pub fn slot(&self) -> &SlotRef {
        match self {
            PendingWrite::Set { slot, .. } | PendingWrite::Trigger { slot } => slot,
        }
    }
}

/// A collection of pending writes to be applied atomically
///
/// Writes are committed in order; a later write to the same slot wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteSet {
    /// The pending writes in order
    writes: Vec<PendingWrite>,
}

impl WriteSet {
    /// Create a new empty WriteSet
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pending write to the set
    pub fn push(&mut self, write: PendingWrite) {
        self.writes.push(write);
    }

    /// Get the number of pending writes
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Check if the WriteSet is empty
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Get an iterator over the pending writes
    pub fn iter(&self) -> impl Iterator<Item = &PendingWrite> {
        self.writes.iter()
    }
}
