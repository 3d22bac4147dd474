//! State-variable slots and the dependency graph between them
//!
//! Slots live in a flat arena addressed by [`SlotIdx`]. Each slot records
//! the slots it read at its last computation (forward edges) and the slots
//! that read it (reverse edges). Invalidation walks reverse edges once.

use crate::{ComponentIdx, SlotKey, SlotRef, Value};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Arena index of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotIdx(pub usize);

/// What a slot holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotKind {
    /// Authoritative value written only by actions
    Essential,
    /// Counter written only by actions
    Trigger,
    /// Computed from dependencies
    Derived,
    /// A composite's replacement list
    Expansion,
}

impl SlotKind {
    /// Whether the slot's value is stored rather than computed
    pub fn is_stored(&self) -> bool {
        matches!(self, SlotKind::Essential | SlotKind::Trigger)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Freshness {
    /// Cached value is consistent with its dependencies
    Fresh,
    /// A dependency changed since the last computation
    Stale,
    /// Never computed
    Unresolved,
}

#[derive(Debug, Clone)]
pub struct Slot {
    pub owner: ComponentIdx,
    pub key: SlotKey,
    pub kind: SlotKind,
    pub value: Value,
    pub freshness: Freshness,
    dependencies: Vec<SlotIdx>,
    dependents: IndexSet<SlotIdx>,
    alive: bool,
}

impl Slot {
    pub fn slot_ref(&self) -> SlotRef {
        SlotRef::new(self.owner, self.key.clone())
    }

    /// Whether a read must recompute
    pub fn needs_compute(&self) -> bool {
        !self.kind.is_stored() && self.freshness != Freshness::Fresh
    }

    pub fn dependencies(&self) -> &[SlotIdx] {
        &self.dependencies
    }

    pub fn dependents(&self) -> impl Iterator<Item = SlotIdx> + '_ {
        self.dependents.iter().copied()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SlotStore {
    slots: Vec<Slot>,
    index: HashMap<(ComponentIdx, SlotKey), SlotIdx>,
    by_component: HashMap<ComponentIdx, Vec<SlotIdx>>,
}

impl SlotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a slot; stored kinds start fresh with `value`
    pub fn insert(
        &mut self,
        owner: ComponentIdx,
        key: SlotKey,
        kind: SlotKind,
        value: Value,
    ) -> SlotIdx {
        let idx = SlotIdx(self.slots.len());
        let freshness = if kind.is_stored() {
            Freshness::Fresh
        } else {
            Freshness::Unresolved
        };
        self.index.insert((owner, key.clone()), idx);
        self.by_component.entry(owner).or_default().push(idx);
        self.slots.push(Slot {
            owner,
            key,
            kind,
            value,
            freshness,
            dependencies: Vec::new(),
            dependents: IndexSet::new(),
            alive: true,
        });
        idx
    }

    pub fn lookup(&self, owner: ComponentIdx, key: &SlotKey) -> Option<SlotIdx> {
        self.index.get(&(owner, key.clone())).copied()
    }

    pub fn get(&self, idx: SlotIdx) -> Option<&Slot> {
        self.slots.get(idx.0).filter(|s| s.alive)
    }

    pub fn get_mut(&mut self, idx: SlotIdx) -> Option<&mut Slot> {
        self.slots.get_mut(idx.0).filter(|s| s.alive)
    }

    /// Live slots owned by a component, in creation order
    pub fn slots_of(&self, owner: ComponentIdx) -> &[SlotIdx] {
        self.by_component
            .get(&owner)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Store a computed value together with the dependencies read for it
    ///
    /// The previous forward edges are replaced: the slot is removed from the
    /// reverse index of every dependency it no longer reads.
    pub fn complete(&mut self, idx: SlotIdx, value: Value, reads: Vec<SlotIdx>) {
        let mut deps: Vec<SlotIdx> = Vec::with_capacity(reads.len());
        let mut seen = HashSet::new();
        for d in reads {
            if d != idx && seen.insert(d) && self.get(d).is_some() {
                deps.push(d);
            }
        }
        let old = match self.get_mut(idx) {
            Some(slot) => std::mem::take(&mut slot.dependencies),
            None => return,
        };
        for d in &old {
            if !seen.contains(d) {
                if let Some(dep) = self.slots.get_mut(d.0) {
                    dep.dependents.shift_remove(&idx);
                }
            }
        }
        for d in &deps {
            if let Some(dep) = self.slots.get_mut(d.0) {
                dep.dependents.insert(idx);
            }
        }
        if let Some(slot) = self.get_mut(idx) {
            slot.value = value;
            slot.freshness = Freshness::Fresh;
            slot.dependencies = deps;
        }
    }

    /// Overwrite a stored slot's value
    pub fn write(&mut self, idx: SlotIdx, value: Value) {
        if let Some(slot) = self.get_mut(idx) {
            slot.value = value;
        }
    }

    /// Mark every slot reachable through reverse edges from `sources` stale
    ///
    /// Each slot is visited at most once. Returns every slot reached, in
    /// visit order.
    pub fn invalidate_from(&mut self, sources: &[SlotIdx]) -> Vec<SlotIdx> {
        let mut visited: HashSet<SlotIdx> = sources.iter().copied().collect();
        let mut queue: Vec<SlotIdx> = sources.to_vec();
        let mut marked = Vec::new();
        while let Some(idx) = queue.pop() {
            let dependents: Vec<SlotIdx> = match self.get(idx) {
                Some(slot) => slot.dependents().collect(),
                None => continue,
            };
            for d in dependents {
                if !visited.insert(d) {
                    continue;
                }
                if let Some(slot) = self.get_mut(d) {
                    if slot.freshness == Freshness::Fresh {
                        slot.freshness = Freshness::Stale;
                    }
                    marked.push(d);
                    queue.push(d);
                }
            }
        }
        tracing::debug!(
            sources = sources.len(),
            invalidated = marked.len(),
            "invalidation sweep"
        );
        marked
    }

    /// Mark one computed slot stale
    pub fn mark_stale(&mut self, idx: SlotIdx) {
        if let Some(slot) = self.get_mut(idx) {
            if slot.freshness == Freshness::Fresh && !slot.kind.is_stored() {
                slot.freshness = Freshness::Stale;
            }
        }
    }

    /// Drop every slot of a component
    ///
    /// Edges are detached. Returns the surviving dependents, which the
    /// caller should invalidate.
    pub fn remove_component(&mut self, owner: ComponentIdx) -> Vec<SlotIdx> {
        let owned = self.by_component.remove(&owner).unwrap_or_default();
        let owned_set: HashSet<SlotIdx> = owned.iter().copied().collect();
        let mut orphaned = IndexSet::new();
        for &idx in &owned {
            let Some(slot) = self.slots.get_mut(idx.0) else {
                continue;
            };
            slot.alive = false;
            let deps = std::mem::take(&mut slot.dependencies);
            let dependents = std::mem::take(&mut slot.dependents);
            self.index.remove(&(owner, slot.key.clone()));
            for d in deps {
                if let Some(dep) = self.slots.get_mut(d.0) {
                    dep.dependents.shift_remove(&idx);
                }
            }
            for d in dependents {
                if !owned_set.contains(&d) {
                    orphaned.insert(d);
                }
            }
        }
        orphaned.into_iter().filter(|d| self.get(*d).is_some()).collect()
    }

    /// Forget every computed value and edge; stored values are kept
    pub fn reset_computed(&mut self) {
        for slot in self.slots.iter_mut().filter(|s| s.alive) {
            slot.dependencies.clear();
            slot.dependents.clear();
            if !slot.kind.is_stored() {
                slot.freshness = Freshness::Unresolved;
                slot.value = Value::Unresolved;
            }
        }
    }

    /// Number of live slots
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.alive).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
