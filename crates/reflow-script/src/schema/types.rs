//! Component type files

use reflow_core::ComponentTypeDef;
use serde::{Deserialize, Serialize};

/// A collection of component type definitions
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ComponentTypeDefs {
    pub component_types: Vec<ComponentTypeDef>,
}
