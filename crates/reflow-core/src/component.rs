//! Component instances and the arena that owns them

use crate::{ComponentIdx, DefId, SourcePosition, Value, ValueMap};
use serde::{Deserialize, Serialize};

/// How a component came to exist
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Origin {
    /// Parsed from the document
    Authored,
    /// Root of one replacement created by a composite
    Replacement {
        composite: ComponentIdx,
        /// Position in the composite's replacement list
        position: usize,
        /// 0-based instance of the template it was cloned from
        instance: usize,
        template: ComponentIdx,
    },
    /// Descendant of a replacement root, cloned from `source`
    Cloned { source: ComponentIdx },
}

/// A live (or tombstoned) component instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Component {
    pub idx: ComponentIdx,
    pub component_type: DefId,
    pub name: Option<String>,
    pub parent: Option<ComponentIdx>,
    /// Structural children: authored children, or clones of them
    pub children: Vec<ComponentIdx>,
    pub attributes: ValueMap,
    pub position: Option<SourcePosition>,
    pub origin: Origin,
    /// Stable identity string used to key variant draws
    pub disambiguator: String,
    /// Inside a composite's template: never evaluated directly
    pub in_template: bool,
    pub alive: bool,
}

impl Component {
    /// Get an attribute value
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Whether this component was created by expansion
    pub fn is_replacement(&self) -> bool {
        !matches!(self.origin, Origin::Authored)
    }
}

/// Arena of components
///
/// Indices grow monotonically and are never reused; removing a component
/// leaves a tombstone.
#[derive(Debug, Clone, Default)]
pub struct ComponentArena {
    components: Vec<Component>,
    live: usize,
}

/// Fields needed to create a component
#[derive(Debug, Clone)]
pub struct NewComponent {
    pub component_type: DefId,
    pub name: Option<String>,
    pub parent: Option<ComponentIdx>,
    pub attributes: ValueMap,
    pub position: Option<SourcePosition>,
    pub origin: Origin,
    pub disambiguator: String,
    pub in_template: bool,
}

impl ComponentArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a component and append it to its parent's children
    pub fn create(&mut self, new: NewComponent) -> ComponentIdx {
        let idx = ComponentIdx::new(self.components.len());
        if let Some(parent) = new.parent.and_then(|p| self.get_mut(p)) {
            parent.children.push(idx);
        }
        self.components.push(Component {
            idx,
            component_type: new.component_type,
            name: new.name,
            parent: new.parent,
            children: Vec::new(),
            attributes: new.attributes,
            position: new.position,
            origin: new.origin,
            disambiguator: new.disambiguator,
            in_template: new.in_template,
            alive: true,
        });
        self.live += 1;
        idx
    }

    /// Create a component without attaching it to the parent's children
    ///
    /// Replacement roots hang off their composite through the replacement
    /// record, not through `children`.
    pub fn create_detached(&mut self, new: NewComponent) -> ComponentIdx {
        let parent = new.parent;
        let idx = self.create(NewComponent {
            parent: None,
            ..new
        });
        if let Some(c) = self.get_mut(idx) {
            c.parent = parent;
        }
        idx
    }

    /// Get a live component
    pub fn get(&self, idx: ComponentIdx) -> Option<&Component> {
        self.components.get(idx.raw()).filter(|c| c.alive)
    }

    /// Get a live component mutably
    pub fn get_mut(&mut self, idx: ComponentIdx) -> Option<&mut Component> {
        self.components.get_mut(idx.raw()).filter(|c| c.alive)
    }

    pub fn contains(&self, idx: ComponentIdx) -> bool {
        self.get(idx).is_some()
    }

    /// Tombstone a component; its children are not touched
    pub fn remove(&mut self, idx: ComponentIdx) -> bool {
        let Some(component) = self.components.get_mut(idx.raw()).filter(|c| c.alive) else {
            return false;
        };
        component.alive = false;
        self.live -= 1;
        true
    }

    /// Live components in creation order
    pub fn iter(&self) -> impl Iterator<Item = &Component> {
        self.components.iter().filter(|c| c.alive)
    }

    /// Number of live components
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}
