//! RON script loader

use crate::error::{Error, Result};
use crate::schema::{ComponentTypeDefs, DocumentDef};
use crate::validate::validate_registry;
use indexmap::IndexMap;
use reflow_core::{ComponentTypeDef, DefId, Engine, EngineConfig, TypeRegistry};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Loaded definitions
#[derive(Debug, Default)]
pub struct ScriptDefs {
    /// Component types by ID, in load order
    pub component_types: IndexMap<DefId, ComponentTypeDef>,
    /// Documents by ID, in load order
    pub documents: IndexMap<String, DocumentDef>,
    /// Loader-wide engine configuration
    pub config: Option<EngineConfig>,
}

impl ScriptDefs {
    /// Create empty definitions
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a component type definition
    pub fn get_component_type(&self, id: &DefId) -> Option<&ComponentTypeDef> {
        self.component_types.get(id)
    }

    /// Get a document
    pub fn get_document(&self, id: &str) -> Option<&DocumentDef> {
        self.documents.get(id)
    }

    /// Register every type, parents before the types extending them, and
    /// validate the result
    pub fn registry(&self) -> Result<TypeRegistry> {
        let mut registry = TypeRegistry::new();
        let mut visiting = HashSet::new();
        for id in self.component_types.keys() {
            self.register_with_parents(id, &mut registry, &mut visiting)?;
        }
        validate_registry(&registry)?;
        Ok(registry)
    }

    fn register_with_parents(
        &self,
        id: &DefId,
        registry: &mut TypeRegistry,
        visiting: &mut HashSet<DefId>,
    ) -> Result<()> {
        if registry.contains(id) {
            return Ok(());
        }
        let def = self
            .component_types
            .get(id)
            .ok_or_else(|| reflow_core::Error::UnknownComponentType(id.clone()))?;
        if !visiting.insert(id.clone()) {
            return Err(Error::InvalidSchema(format!("{} extends itself", id)));
        }
        if let Some(parent) = &def.extends {
            self.register_with_parents(parent, registry, visiting)?;
        }
        registry.register(def.clone())?;
        Ok(())
    }

    /// Configuration for a document: its own, else the loader-wide one,
    /// else the default
    pub fn config_for(&self, document: &str) -> EngineConfig {
        self.documents
            .get(document)
            .and_then(|d| d.config.clone())
            .or_else(|| self.config.clone())
            .unwrap_or_default()
    }

    /// Build an engine for one variant of a loaded document
    pub fn engine(&self, document: &str, variant: u64) -> Result<Engine> {
        let def = self
            .documents
            .get(document)
            .ok_or_else(|| Error::InvalidSchema(format!("unknown document {}", document)))?;
        let engine = Engine::new(
            &def.document,
            self.registry()?,
            self.config_for(document),
            variant,
        )?;
        Ok(engine)
    }
}

/// Loader for RON scripts
pub struct Loader {
    defs: ScriptDefs,
}

impl Loader {
    /// Create a new loader
    pub fn new() -> Self {
        Self {
            defs: ScriptDefs::new(),
        }
    }

    /// Load a single RON file
    ///
    /// Files holding `component_types:` are type files, files holding
    /// `document:` are documents, anything else is an engine configuration.
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let filename = path.file_name().and_then(|n| n.to_str()).unwrap_or("");

        if filename.contains("type") || content.contains("component_types:") {
            self.load_component_types_str(&content)?;
        } else if filename.contains("doc") || content.contains("document:") {
            self.load_document_str(&content)?;
        } else {
            self.load_config_str(&content)?;
        }
        tracing::debug!(file = %path.display(), "script loaded");
        Ok(())
    }

    /// Load component types from a RON string
    pub fn load_component_types_str(&mut self, content: &str) -> Result<()> {
        let file: ComponentTypeDefs = ron::from_str(content)?;
        for def in file.component_types {
            let id = def.id.clone();
            if self.defs.component_types.contains_key(&id) {
                return Err(Error::DuplicateDefinition(id.to_string()));
            }
            self.defs.component_types.insert(id, def);
        }
        Ok(())
    }

    /// Load one document from a RON string
    pub fn load_document_str(&mut self, content: &str) -> Result<()> {
        let def: DocumentDef = ron::from_str(content)?;
        if self.defs.documents.contains_key(&def.id) {
            return Err(Error::DuplicateDefinition(def.id));
        }
        self.defs.documents.insert(def.id.clone(), def);
        Ok(())
    }

    /// Load the loader-wide engine configuration from a RON string
    pub fn load_config_str(&mut self, content: &str) -> Result<()> {
        if self.defs.config.is_some() {
            return Err(Error::DuplicateDefinition("engine config".to_string()));
        }
        self.defs.config = Some(ron::from_str(content)?);
        Ok(())
    }

    /// Load all RON files from a directory, in file name order
    pub fn load_directory(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if !path.is_dir() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Not a directory: {:?}", path),
            )));
        }

        let mut entries = fs::read_dir(path)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<std::io::Result<Vec<_>>>()?;
        entries.sort();

        for file_path in entries {
            if file_path.extension().map(|e| e == "ron").unwrap_or(false) {
                self.load_file(&file_path)?;
            } else if file_path.is_dir() {
                self.load_directory(&file_path)?;
            }
        }

        Ok(())
    }

    /// Finish loading and return the definitions
    pub fn finish(self) -> ScriptDefs {
        self.defs
    }

    /// Get the current definitions (for inspection during loading)
    pub fn defs(&self) -> &ScriptDefs {
        &self.defs
    }
}

impl Default for Loader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reflow_core::Value;

    const TYPES: &str = r#"
    (
        component_types: [
            (id: "document"),
            (
                id: "number",
                state_variables: {
                    "value": (kind: Essential(default: Int(0), attribute: Some("value"))),
                },
            ),
            (
                id: "doubled",
                extends: Some("number"),
                state_variables: {
                    "twice": (
                        kind: Derived(definition: Mul(Dep("v"), Literal(Int(2)))),
                        dependencies: { "v": StateVariable("value") },
                        inverse: Some([(dependency: "v", value: Div(Desired, Literal(Int(2))))]),
                    ),
                },
            ),
        ]
    )
    "#;

    const DOC: &str = r#"
    (
        id: "demo",
        document: (
            root: (
                component_type: "document",
                children: [
                    (component_type: "doubled", name: Some("d"), attributes: { "value": Int(3) }),
                ],
            ),
        ),
    )
    "#;

    #[test]
    fn test_load_types_and_document() {
        let mut loader = Loader::new();
        loader.load_component_types_str(TYPES).unwrap();
        loader.load_document_str(DOC).unwrap();

        let defs = loader.finish();
        assert!(defs.get_component_type(&DefId::new("number")).is_some());
        assert!(defs.get_document("demo").is_some());

        let registry = defs.registry().unwrap();
        let doubled = registry.get(&DefId::new("doubled")).unwrap();
        assert!(doubled.state_variables.contains_key("value"));

        let mut engine = defs.engine("demo", 1).unwrap();
        let d = engine.find("d").unwrap();
        assert_eq!(engine.get_value(d, "twice").unwrap(), Value::Int(6));
    }

    #[test]
    fn test_duplicate_type_rejected() {
        let mut loader = Loader::new();
        loader.load_component_types_str(TYPES).unwrap();
        assert!(matches!(
            loader.load_component_types_str(TYPES),
            Err(Error::DuplicateDefinition(_))
        ));
    }

    #[test]
    fn test_extends_order_independent() {
        let mut loader = Loader::new();
        loader
            .load_component_types_str(
                r#"(component_types: [(id: "child", extends: Some("base")), (id: "base")])"#,
            )
            .unwrap();
        assert_eq!(loader.finish().registry().unwrap().len(), 2);
    }

    #[test]
    fn test_config_fallback() {
        let mut loader = Loader::new();
        loader.load_document_str(DOC).unwrap();
        loader.load_config_str("(max_variants: 12)").unwrap();
        let defs = loader.finish();
        assert_eq!(defs.config_for("demo").max_variants(), 12);
        assert_eq!(defs.config_for("other").max_variants(), 12);
    }

    #[test]
    fn test_unknown_document() {
        let defs = ScriptDefs::new();
        assert!(matches!(
            defs.engine("missing", 1),
            Err(Error::InvalidSchema(_))
        ));
    }
}
