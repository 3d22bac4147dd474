//! Reflow Core - Reactive evaluation engine for declarative documents
//!
//! This crate turns a tree of declarative components into mutually dependent
//! state variables and keeps them consistent as actions arrive:
//! - Dynamic value types (`Value`, `ValueMap`)
//! - Component type definitions with essential, trigger and derived state
//! - Path resolver from symbolic references to component addresses
//! - Lazy dependency graph with minimal invalidation
//! - Inverse definitions that push requested values upstream
//! - Composite expansion with stable replacement identity
//! - Deterministic variant sampling
//!
//! ## Loading a document
//!
//! ```
//! use reflow_core::schema::StateVarDef;
//! use reflow_core::{ComponentTypeDef, Document, DocumentNode, Engine, EngineConfig, TypeRegistry};
//!
//! let registry = TypeRegistry::new()
//!     .with(ComponentTypeDef::new("document"))
//!     .and_then(|r| {
//!         r.with(
//!             ComponentTypeDef::new("number")
//!                 .with_state_variable("value", StateVarDef::essential_from("value", 0i64)),
//!         )
//!     })
//!     .unwrap();
//! let doc = Document::new(
//!     DocumentNode::new("document")
//!         .with_child(DocumentNode::new("number").named("n").with_attribute("value", 3i64)),
//! );
//! let mut engine = Engine::new(&doc, registry, EngineConfig::default(), 1).unwrap();
//! let n = engine.find("n").unwrap();
//! assert_eq!(engine.get_value(n, "value").unwrap(), 3i64.into());
//! ```
//!
//! Each variant of a document is a separate [`Engine`]; engines share no
//! state and can live on different threads.

mod action;
mod component;
mod config;
mod diagnostic;
mod document;
mod engine;
mod error;
mod evaluator;
mod expander;
mod expr;
pub mod hash;
mod identity;
mod inverse;
mod resolver;
mod rng;
pub mod schema;
pub mod store;
mod value;
mod variant;
mod write_set;

pub use action::{Action, ActionOutcome, SET_STATE_VARIABLE};
pub use component::{Component, ComponentArena, NewComponent, Origin};
pub use config::{EngineConfig, DEFAULT_DOCUMENT_SEED, DEFAULT_MAX_VARIANTS};
pub use diagnostic::{Diagnostic, DiagnosticKind, Diagnostics, Severity};
pub use document::{Document, DocumentNode, VariantControl};
pub use engine::{ComponentState, Engine, Snapshot};
pub use error::{Error, Result};
pub use expr::{Expr, Scope};
pub use identity::{ComponentIdx, DefId, SlotKey, SlotRef, SourcePosition};
pub use resolver::{Path, ResolvedPath, Segment};
pub use rng::VariantRng;
pub use schema::{
    ActionDef, ActionStep, ComponentTypeDef, CompositeDef, DependencySource, InverseWrite,
    PoolSource, StateVarDef, StateVarKind, TypeRegistry, VariantDecl,
};
pub use value::{Value, ValueMap};
pub use variant::{default_variant_names, SampleSpace, VariantGenerator};
pub use write_set::{PendingWrite, WriteSet};
