//! Schema definitions for RON scripts

pub mod document;
pub mod types;

pub use document::DocumentDef;
pub use types::ComponentTypeDefs;
