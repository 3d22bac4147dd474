//! Normalized document tree handed to the engine by the markup parser

use crate::{DefId, SourcePosition, Value, ValueMap};
use serde::{Deserialize, Serialize};

/// One authored component in the document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentNode {
    pub component_type: DefId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub attributes: ValueMap,
    #[serde(default)]
    pub children: Vec<DocumentNode>,
    #[serde(default)]
    pub position: Option<SourcePosition>,
}

impl DocumentNode {
    pub fn new(component_type: impl Into<DefId>) -> Self {
        Self {
            component_type: component_type.into(),
            name: None,
            attributes: ValueMap::new(),
            children: Vec::new(),
            position: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_child(mut self, child: DocumentNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = DocumentNode>) -> Self {
        self.children.extend(children);
        self
    }

    pub fn at(mut self, line: u32, column: u32) -> Self {
        self.position = Some(SourcePosition::new(line, column));
        self
    }
}

/// Document-level variant settings
///
/// Every field is optional; absent fields fall back to the engine config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariantControl {
    #[serde(default)]
    pub num_variants: Option<u64>,
    #[serde(default)]
    pub variant_names: Vec<String>,
    #[serde(default)]
    pub unique_variants: Option<bool>,
    #[serde(default)]
    pub seed: Option<u64>,
}

/// A complete document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub root: DocumentNode,
    #[serde(default)]
    pub variant_control: Option<VariantControl>,
}

impl Document {
    pub fn new(root: DocumentNode) -> Self {
        Self {
            root,
            variant_control: None,
        }
    }

    pub fn with_variant_control(mut self, control: VariantControl) -> Self {
        self.variant_control = Some(control);
        self
    }
}
