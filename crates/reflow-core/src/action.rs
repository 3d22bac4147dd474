//! Actions sent to components

use crate::{ComponentIdx, SlotRef, Value, ValueMap, WriteSet};
use serde::{Deserialize, Serialize};

/// Operation available on every component: push `value` into `variable`
pub const SET_STATE_VARIABLE: &str = "setStateVariable";

/// A discrete user or system action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// The component the action is addressed to
    pub component: ComponentIdx,
    /// Name of the operation declared on the component's type
    pub operation: String,
    /// Operation arguments
    #[serde(default)]
    pub args: ValueMap,
}

impl Action {
    /// Create a new action
    pub fn new(component: ComponentIdx, operation: impl Into<String>) -> Self {
        Self {
            component,
            operation: operation.into(),
            args: ValueMap::new(),
        }
    }

    /// Create a `setStateVariable` action
    pub fn set_state_variable(
        component: ComponentIdx,
        variable: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        Self::new(component, SET_STATE_VARIABLE)
            .with_arg("variable", variable.into())
            .with_arg("value", value)
    }

    /// Add an argument
    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }
}

/// What an applied action changed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    /// Writes committed to stored slots
    pub writes: WriteSet,
    /// Stored slots whose value actually changed
    pub changed: Vec<SlotRef>,
    /// Slots marked stale by the invalidation sweep
    pub invalidated: Vec<SlotRef>,
}
