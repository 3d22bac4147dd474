//! Identity types for components, component types and state-variable slots

use serde::{Deserialize, Serialize};
use std::fmt;

/// Arena index of a component instance
///
/// Indices are never reused within one engine, so an address handed out
/// once keeps pointing at the same component (or at a tombstone).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ComponentIdx(pub usize);

impl ComponentIdx {
    /// Create a new component index
    pub fn new(idx: usize) -> Self {
        Self(idx)
    }

    /// Get the raw index value
    pub fn raw(&self) -> usize {
        self.0
    }
}

impl fmt::Display for ComponentIdx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "component:{}", self.0)
    }
}

/// Identifier for a definition loaded from scripts (component types)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DefId(pub String);

impl DefId {
    /// Create a new definition ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DefId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for DefId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Key of a state variable on a component: a name plus an optional
/// 0-based element index for array-valued variables
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotKey {
    pub name: String,
    pub index: Option<usize>,
}

impl SlotKey {
    /// Key of a whole state variable
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            index: None,
        }
    }

    /// Key of one element of an array state variable
    pub fn element(name: impl Into<String>, index: usize) -> Self {
        Self {
            name: name.into(),
            index: Some(index),
        }
    }

    /// Whether this key addresses an array element
    pub fn is_element(&self) -> bool {
        self.index.is_some()
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(i) => write!(f, "{}[{}]", self.name, i),
            None => write!(f, "{}", self.name),
        }
    }
}

impl From<&str> for SlotKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for SlotKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Address of one slot: owning component plus key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotRef {
    pub component: ComponentIdx,
    pub key: SlotKey,
}

impl SlotRef {
    pub fn new(component: ComponentIdx, key: impl Into<SlotKey>) -> Self {
        Self {
            component,
            key: key.into(),
        }
    }
}

impl fmt::Display for SlotRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.component, self.key)
    }
}

/// Line/column of the markup construct a component was parsed from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SourcePosition {
    pub line: u32,
    pub column: u32,
}

impl SourcePosition {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_idx() {
        let idx = ComponentIdx::new(42);
        assert_eq!(idx.raw(), 42);
        assert_eq!(format!("{}", idx), "component:42");
    }

    #[test]
    fn test_def_id() {
        let id = DefId::new("select");
        assert_eq!(id.as_str(), "select");
        assert_eq!(format!("{}", id), "select");
    }

    #[test]
    fn test_slot_key_display() {
        assert_eq!(SlotKey::new("value").to_string(), "value");
        assert_eq!(SlotKey::element("points", 2).to_string(), "points[2]");
        assert!(SlotKey::element("points", 0).is_element());
        let slot = SlotRef::new(ComponentIdx(3), "value");
        assert_eq!(slot.to_string(), "component:3.value");
    }
}
