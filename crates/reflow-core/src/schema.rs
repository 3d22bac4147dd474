//! Component type definitions
//!
//! A component type declares its state variables, how each one is computed
//! (and inverted), whether the component is a composite, whether it samples
//! variant randomness, and the actions it accepts. Types are plain data,
//! loaded from RON scripts by `reflow-script`.

use crate::{DefId, Error, Expr, Result, Value};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Name of the internal slot holding a composite's replacement list
pub const EXPANSION_SLOT: &str = "__replacements";

/// Where a declared dependency reads its value from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DependencySource {
    /// Another state variable of the same component
    StateVariable(String),
    /// A state variable of the parent component
    Parent(String),
    /// A component reached by a resolver path
    ///
    /// With `variable` the dependency reads that state variable; without it
    /// the path's own trailing property is read, or the component address
    /// when there is none.
    Path {
        path: String,
        #[serde(default)]
        variable: Option<String>,
    },
    /// Like `Path`, with the path text taken from an attribute
    AttributePath {
        attribute: String,
        #[serde(default)]
        variable: Option<String>,
    },
    /// A raw attribute value (null when absent)
    Attribute(String),
    /// One state variable of every effective child, as a list
    Children {
        #[serde(default)]
        component_type: Option<DefId>,
        variable: String,
    },
    /// Number of effective children
    ChildCount {
        #[serde(default)]
        component_type: Option<DefId>,
    },
    /// 1-based instance of the nearest enclosing replacement (null outside)
    ReplacementInstance,
    /// Picks drawn for this component by the variant generator
    VariantSample,
    /// Addresses of this composite's current replacements
    Replacements,
}

/// How a state variable gets its value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StateVarKind {
    /// Authoritative stored value, initialized from an attribute or default
    Essential {
        #[serde(default)]
        default: Value,
        #[serde(default)]
        attribute: Option<String>,
    },
    /// Counter incremented by actions; starts at 0
    Trigger,
    /// Computed from dependencies
    Derived { definition: Expr },
}

/// One write produced by an inverse definition
///
/// `value` sees `Desired` plus the current values of the dependencies.
/// Writes whose `when` evaluates falsy are skipped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InverseWrite {
    pub dependency: String,
    #[serde(default)]
    pub index: Option<Expr>,
    #[serde(default)]
    pub when: Option<Expr>,
    pub value: Expr,
}

/// Definition of one state variable
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateVarDef {
    pub kind: StateVarKind,
    #[serde(default)]
    pub dependencies: IndexMap<String, DependencySource>,
    /// Ordered inverse writes; absent means the variable cannot be set
    #[serde(default)]
    pub inverse: Option<Vec<InverseWrite>>,
    /// Element count for array-valued variables; elements see `Index`
    #[serde(default)]
    pub array_size: Option<Expr>,
}

impl StateVarDef {
    /// Essential variable with a default, optionally seeded by an attribute
    pub fn essential(default: impl Into<Value>) -> Self {
        Self::from_kind(StateVarKind::Essential {
            default: default.into(),
            attribute: None,
        })
    }

    /// Essential variable initialized from `attribute` when present
    pub fn essential_from(attribute: impl Into<String>, default: impl Into<Value>) -> Self {
        Self::from_kind(StateVarKind::Essential {
            default: default.into(),
            attribute: Some(attribute.into()),
        })
    }

    pub fn trigger() -> Self {
        Self::from_kind(StateVarKind::Trigger)
    }

    pub fn derived(definition: Expr) -> Self {
        Self::from_kind(StateVarKind::Derived { definition })
    }

    fn from_kind(kind: StateVarKind) -> Self {
        Self {
            kind,
            dependencies: IndexMap::new(),
            inverse: None,
            array_size: None,
        }
    }

    /// Declare a dependency
    pub fn with_dependency(mut self, name: impl Into<String>, source: DependencySource) -> Self {
        self.dependencies.insert(name.into(), source);
        self
    }

    /// Append an unconditional inverse write
    pub fn with_inverse(mut self, dependency: impl Into<String>, value: Expr) -> Self {
        self.inverse.get_or_insert_with(Vec::new).push(InverseWrite {
            dependency: dependency.into(),
            index: None,
            when: None,
            value,
        });
        self
    }

    /// Append an inverse write full form
    pub fn with_inverse_write(mut self, write: InverseWrite) -> Self {
        self.inverse.get_or_insert_with(Vec::new).push(write);
        self
    }

    /// Make this an array variable with the given size expression
    pub fn with_array_size(mut self, size: Expr) -> Self {
        self.array_size = Some(size);
        self
    }

    pub fn is_array(&self) -> bool {
        self.array_size.is_some()
    }
}

/// Expansion rule of a composite component
///
/// Template children are the component's authored children. Variable names
/// refer to the composite's own state variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CompositeDef {
    /// Copies of the template children at the listed 0-based positions
    SelectChildren { indices: String },
    /// All template children, cloned `count` times
    Repeat { count: String },
    /// Shares the component addressed by the path in attribute `source`
    Copy { source: String },
}

/// Pool a variant component samples from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PoolSource {
    /// Number of authored children, optionally of one type
    Children {
        #[serde(default)]
        component_type: Option<DefId>,
    },
    /// Value of a state variable of the component
    Variable(String),
}

/// Declares that a component samples randomness from the variant generator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantDecl {
    pub pool: PoolSource,
    /// State variable holding the number of picks (1 when absent)
    #[serde(default)]
    pub count: Option<String>,
    /// State variable saying whether picks may repeat (false when absent)
    #[serde(default)]
    pub with_replacement: Option<String>,
}

/// One step of a declared action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ActionStep {
    /// Push a value into a state variable through its inverse
    Set {
        variable: String,
        #[serde(default)]
        index: Option<Expr>,
        value: Expr,
    },
    /// Increment a trigger
    Trigger { variable: String },
}

/// A named action of a component type
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionDef {
    #[serde(default)]
    pub steps: Vec<ActionStep>,
}

/// A component type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentTypeDef {
    pub id: DefId,
    #[serde(default)]
    pub description: String,
    /// Type whose declarations this one inherits (own entries win)
    #[serde(default)]
    pub extends: Option<DefId>,
    #[serde(default)]
    pub state_variables: IndexMap<String, StateVarDef>,
    #[serde(default)]
    pub composite: Option<CompositeDef>,
    #[serde(default)]
    pub variant: Option<VariantDecl>,
    #[serde(default)]
    pub actions: IndexMap<String, ActionDef>,
}

impl ComponentTypeDef {
    pub fn new(id: impl Into<DefId>) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            extends: None,
            state_variables: IndexMap::new(),
            composite: None,
            variant: None,
            actions: IndexMap::new(),
        }
    }

    pub fn with_state_variable(mut self, name: impl Into<String>, def: StateVarDef) -> Self {
        self.state_variables.insert(name.into(), def);
        self
    }

    pub fn with_composite(mut self, composite: CompositeDef) -> Self {
        self.composite = Some(composite);
        self
    }

    pub fn with_variant(mut self, variant: VariantDecl) -> Self {
        self.variant = Some(variant);
        self
    }

    pub fn with_action(mut self, name: impl Into<String>, steps: Vec<ActionStep>) -> Self {
        self.actions.insert(name.into(), ActionDef { steps });
        self
    }

    pub fn extending(mut self, parent: impl Into<DefId>) -> Self {
        self.extends = Some(parent.into());
        self
    }

    pub fn is_composite(&self) -> bool {
        self.composite.is_some()
    }

    /// Fill in everything this type does not declare itself from `parent`
    fn inherit(&mut self, parent: &ComponentTypeDef) {
        let own = std::mem::take(&mut self.state_variables);
        let mut merged = parent.state_variables.clone();
        for (name, def) in own {
            merged.insert(name, def);
        }
        self.state_variables = merged;

        let own = std::mem::take(&mut self.actions);
        let mut merged = parent.actions.clone();
        for (name, def) in own {
            merged.insert(name, def);
        }
        self.actions = merged;

        if self.composite.is_none() {
            self.composite = parent.composite.clone();
        }
        if self.variant.is_none() {
            self.variant = parent.variant.clone();
        }
    }
}

/// All component types known to an engine
///
/// Types are resolved (inheritance applied) when registered and shared
/// through `Arc` afterwards.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: IndexMap<DefId, Arc<ComponentTypeDef>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type; its parent, if any, must already be registered
    pub fn register(&mut self, mut def: ComponentTypeDef) -> Result<()> {
        if self.types.contains_key(&def.id) {
            return Err(Error::InvalidDefinition(format!(
                "component type {} registered twice",
                def.id
            )));
        }
        if let Some(name) = def.state_variables.keys().find(|n| n.starts_with("__")) {
            return Err(Error::InvalidDefinition(format!(
                "{}: state variable names starting with __ are reserved ({})",
                def.id, name
            )));
        }
        if let Some(parent_id) = def.extends.clone() {
            let parent = self
                .types
                .get(&parent_id)
                .ok_or_else(|| Error::UnknownComponentType(parent_id.clone()))?
                .clone();
            def.inherit(&parent);
        }
        self.types.insert(def.id.clone(), Arc::new(def));
        Ok(())
    }

    /// Builder form of [`register`](Self::register)
    pub fn with(mut self, def: ComponentTypeDef) -> Result<Self> {
        self.register(def)?;
        Ok(self)
    }

    pub fn get(&self, id: &DefId) -> Option<&Arc<ComponentTypeDef>> {
        self.types.get(id)
    }

    pub fn contains(&self, id: &DefId) -> bool {
        self.types.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ComponentTypeDef>> {
        self.types.values()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
