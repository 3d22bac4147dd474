//! Reflow Script - RON loader and validation for component types and documents
//!
//! Loads engine input from RON files:
//! - Component type definitions (state variables, composites, variants, actions)
//! - Documents with optional variant control and engine configuration
//! - Loader-wide engine configuration
//!
//! Types are checked for undeclared dependencies and unknown state-variable
//! names before an engine is built.

mod error;
mod loader;
mod schema;
mod validate;

pub use error::{Error, Result};
pub use loader::{Loader, ScriptDefs};
pub use schema::{ComponentTypeDefs, DocumentDef};
pub use validate::{check_type, validate_registry};
