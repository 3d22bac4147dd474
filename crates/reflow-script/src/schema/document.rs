//! Document files

use reflow_core::{Document, EngineConfig};
use serde::{Deserialize, Serialize};

/// A named document, optionally with its own engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentDef {
    /// Unique identifier for this document
    pub id: String,
    pub document: Document,
    /// Overrides the loader-wide configuration for this document
    #[serde(default)]
    pub config: Option<EngineConfig>,
}
