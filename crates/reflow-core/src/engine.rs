//! The per-document engine
//!
//! An [`Engine`] owns everything one rendered document needs: the component
//! arena, the slot store, replacement records, resolver memo, variant state
//! and diagnostics. Nothing is global; a new variant means a new engine.
//!
//! Loading runs in three phases:
//! 1. build the authored component tree and initialize essential state,
//! 2. discover the static variant spaces with expansion and sampling off,
//! 3. reset computed state and expand composites in document order.

use crate::component::{ComponentArena, NewComponent, Origin};
use crate::expander::ReplacementRecord;
use crate::resolver::ResolverState;
use crate::schema::{ComponentTypeDef, StateVarKind, EXPANSION_SLOT};
use crate::store::{SlotIdx, SlotKind, SlotStore};
use crate::{
    Action, ActionOutcome, Component, ComponentIdx, Diagnostic, DiagnosticKind, Diagnostics,
    Document, DocumentNode, EngineConfig, Error, Result, SampleSpace, SlotKey, SlotRef,
    TypeRegistry, Value, VariantGenerator,
};
use indexmap::{IndexMap, IndexSet};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Internal slot whose dependents are re-evaluated whenever any expansion
/// changes (readers of paths that failed to resolve)
pub(crate) const NAMES_SLOT: &str = "__names";

/// State variables of one component, in declaration order
pub type ComponentState = IndexMap<String, Value>;

/// State variables of many components, in document order
pub type Snapshot = IndexMap<ComponentIdx, ComponentState>;

/// A loaded document, ready to be read and to receive actions
pub struct Engine {
    pub(crate) config: EngineConfig,
    pub(crate) registry: TypeRegistry,
    pub(crate) arena: ComponentArena,
    pub(crate) store: SlotStore,
    pub(crate) root: ComponentIdx,
    pub(crate) records: HashMap<ComponentIdx, ReplacementRecord>,
    pub(crate) resolver: ResolverState,
    /// `None` while variant spaces are being discovered
    pub(crate) variants: Option<VariantGenerator>,
    pub(crate) diagnostics: Diagnostics,
    /// Slots currently being computed
    pub(crate) visiting: IndexSet<SlotIdx>,
    pub(crate) names_slot: SlotIdx,
    pub(crate) last_invalidated: Vec<SlotIdx>,
    queue: VecDeque<Action>,
}

impl Engine {
    /// Load a document for one variant
    ///
    /// `variant_index` starts at 1; indices beyond the number of variants
    /// cycle.
    pub fn new(
        document: &Document,
        registry: TypeRegistry,
        config: EngineConfig,
        variant_index: u64,
    ) -> Result<Self> {
        if variant_index == 0 {
            return Err(Error::InvalidVariantIndex(variant_index));
        }
        let mut engine = Self {
            config,
            registry,
            arena: ComponentArena::new(),
            store: SlotStore::new(),
            root: ComponentIdx(0),
            records: HashMap::new(),
            resolver: ResolverState::default(),
            variants: None,
            diagnostics: Diagnostics::new(),
            visiting: IndexSet::new(),
            names_slot: SlotIdx(0),
            last_invalidated: Vec::new(),
            queue: VecDeque::new(),
        };

        engine.root = engine.build_authored(&document.root, None, false, "doc".to_string())?;
        engine.names_slot = engine.store.insert(
            engine.root,
            SlotKey::new(NAMES_SLOT),
            SlotKind::Essential,
            Value::Null,
        );

        let spaces = engine.discover_variant_spaces();
        engine.store.reset_computed();
        engine.resolver.clear_memo();
        let generator = VariantGenerator::new(
            &engine.config,
            document.variant_control.as_ref(),
            spaces,
            variant_index,
            &mut engine.diagnostics,
        )?;
        engine.variants = Some(generator);

        let expanded = engine.document_order(engine.root);
        tracing::info!(
            components = engine.arena.len(),
            expanded = expanded.len(),
            variant = engine.variant_name(),
            "document loaded"
        );
        Ok(engine)
    }

    fn build_authored(
        &mut self,
        node: &DocumentNode,
        parent: Option<ComponentIdx>,
        in_template: bool,
        structural: String,
    ) -> Result<ComponentIdx> {
        let ty = self
            .registry
            .get(&node.component_type)
            .cloned()
            .ok_or_else(|| Error::UnknownComponentType(node.component_type.clone()))?;

        let idx = self.arena.create(NewComponent {
            component_type: node.component_type.clone(),
            name: node.name.clone(),
            parent,
            attributes: node.attributes.clone(),
            position: node.position,
            origin: Origin::Authored,
            disambiguator: structural.clone(),
            in_template,
        });

        if let (Some(name), false) = (&node.name, in_template) {
            if self.resolver.register_global(name, idx) {
                if let Some(c) = self.arena.get_mut(idx) {
                    c.disambiguator = name.clone();
                }
            } else {
                self.diagnostics.push(Diagnostic::warning(
                    DiagnosticKind::DuplicateName,
                    format!("name {} is already used; later uses resolve lexically only", name),
                    node.position,
                ));
            }
        }

        self.create_slots(idx, &ty);
        let child_in_template = in_template || ty.is_composite();
        for (i, child) in node.children.iter().enumerate() {
            self.build_authored(
                child,
                Some(idx),
                child_in_template,
                format!("{}/{}", structural, i),
            )?;
        }
        Ok(idx)
    }

    /// Create the declared slots of a new component
    pub(crate) fn create_slots(&mut self, idx: ComponentIdx, ty: &ComponentTypeDef) {
        let attributes = match self.arena.get(idx) {
            Some(c) => c.attributes.clone(),
            None => return,
        };
        for (name, def) in &ty.state_variables {
            let (kind, value) = match &def.kind {
                StateVarKind::Essential { default, attribute } => {
                    let value = attribute
                        .as_ref()
                        .and_then(|a| attributes.get(a))
                        .cloned()
                        .unwrap_or_else(|| default.clone());
                    (SlotKind::Essential, value)
                }
                StateVarKind::Trigger => (SlotKind::Trigger, Value::Int(0)),
                StateVarKind::Derived { .. } => (SlotKind::Derived, Value::Unresolved),
            };
            self.store.insert(idx, SlotKey::new(name.clone()), kind, value);
        }
        if ty.is_composite() {
            self.store.insert(
                idx,
                SlotKey::new(EXPANSION_SLOT),
                SlotKind::Expansion,
                Value::Unresolved,
            );
        }
    }

    /// Static sample spaces of authored, non-template variant components
    fn discover_variant_spaces(&mut self) -> Vec<(String, SampleSpace)> {
        let candidates: Vec<ComponentIdx> = self
            .arena
            .iter()
            .filter(|c| !c.in_template && !c.is_replacement())
            .map(|c| c.idx)
            .collect();
        let mut spaces = Vec::new();
        for idx in candidates {
            let Some(space) = self.sample_space(idx, &mut Vec::new()) else {
                continue;
            };
            if let Some(c) = self.arena.get(idx) {
                spaces.push((c.disambiguator.clone(), space));
            }
        }
        tracing::debug!(spaces = spaces.len(), "variant spaces discovered");
        spaces
    }

    // === Lookup helpers ===

    pub(crate) fn check_component(&self, idx: ComponentIdx) -> Result<&Component> {
        self.arena.get(idx).ok_or(Error::ComponentNotFound(idx))
    }

    pub(crate) fn type_of(&self, idx: ComponentIdx) -> Result<Arc<ComponentTypeDef>> {
        let component = self.check_component(idx)?;
        self.registry
            .get(&component.component_type)
            .cloned()
            .ok_or_else(|| Error::UnknownComponentType(component.component_type.clone()))
    }

    pub(crate) fn is_composite(&self, idx: ComponentIdx) -> bool {
        self.type_of(idx).map_or(false, |ty| ty.is_composite())
    }

    /// Slot for a key, creating array element slots on first use
    pub(crate) fn slot_for(&mut self, component: ComponentIdx, key: &SlotKey) -> Result<SlotIdx> {
        if let Some(slot) = self.store.lookup(component, key) {
            return Ok(slot);
        }
        let ty = self.type_of(component)?;
        match (key.index, ty.state_variables.get(&key.name)) {
            (Some(_), Some(def))
                if def.is_array() && matches!(def.kind, StateVarKind::Derived { .. }) =>
            {
                Ok(self
                    .store
                    .insert(component, key.clone(), SlotKind::Derived, Value::Unresolved))
            }
            _ => Err(Error::StateVariableNotFound {
                component,
                variable: key.to_string(),
            }),
        }
    }

    /// Record an error against a component's source position
    ///
    /// Muted during variant discovery, where expansion is switched off and
    /// failures are expected.
    pub(crate) fn report(&mut self, kind: DiagnosticKind, message: String, at: ComponentIdx) {
        if self.variants.is_none() {
            return;
        }
        let position = self.arena.get(at).and_then(|c| c.position);
        self.diagnostics.push(Diagnostic::error(kind, message, position));
    }

    pub(crate) fn slot_refs(&self, slots: &[SlotIdx]) -> Vec<SlotRef> {
        slots
            .iter()
            .filter_map(|&s| self.store.get(s))
            .filter(|s| !s.key.name.starts_with("__"))
            .map(|s| s.slot_ref())
            .collect()
    }

    // === Public API ===

    pub fn root(&self) -> ComponentIdx {
        self.root
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// A live component
    pub fn component(&self, idx: ComponentIdx) -> Option<&Component> {
        self.arena.get(idx)
    }

    /// Live components in creation order, templates and parked replacements
    /// included
    pub fn components(&self) -> impl Iterator<Item = &Component> {
        self.arena.iter()
    }

    /// Authored component registered under a document-wide name
    pub fn find(&self, name: &str) -> Option<ComponentIdx> {
        self.resolver.global(name).filter(|&c| self.arena.contains(c))
    }

    /// Current value of a state variable, recomputing if needed
    pub fn get_value(&mut self, component: ComponentIdx, key: impl Into<SlotKey>) -> Result<Value> {
        self.check_component(component)?;
        let key = key.into();
        if key.name.starts_with("__") {
            return Err(Error::StateVariableNotFound {
                component,
                variable: key.to_string(),
            });
        }
        let slot = self.slot_for(component, &key)?;
        Ok(self.evaluate(slot))
    }

    /// Every declared state variable of one component, or of every
    /// component of the document in pre-order
    pub fn get_all_state_variables(&mut self, component: Option<ComponentIdx>) -> Result<Snapshot> {
        let targets = match component {
            Some(c) => {
                self.check_component(c)?;
                vec![c]
            }
            None => self.document_order(self.root),
        };
        let mut snapshot = Snapshot::new();
        for c in targets {
            let ty = self.type_of(c)?;
            let mut state = ComponentState::new();
            for name in ty.state_variables.keys() {
                let slot = self.slot_for(c, &SlotKey::new(name.clone()))?;
                state.insert(name.clone(), self.evaluate(slot));
            }
            snapshot.insert(c, state);
        }
        Ok(snapshot)
    }

    /// Components in document order: each component followed by its
    /// replacements (composites) or structural children
    ///
    /// Templates are skipped; composites are expanded on the way.
    pub fn document_order(&mut self, start: ComponentIdx) -> Vec<ComponentIdx> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![start];
        while let Some(c) = stack.pop() {
            if !seen.insert(c) || !self.arena.contains(c) {
                continue;
            }
            out.push(c);
            let next = if self.is_composite(c) {
                self.read_expansion(c, &mut Vec::new())
            } else {
                self.arena.get(c).map(|x| x.children.clone()).unwrap_or_default()
            };
            stack.extend(next.into_iter().rev());
        }
        out
    }

    /// Queue an action for [`process_queue`](Self::process_queue)
    pub fn send(&mut self, action: Action) {
        self.queue.push_back(action);
    }

    /// Apply queued actions in order, one at a time
    pub fn process_queue(&mut self) -> Vec<Result<ActionOutcome>> {
        let mut results = Vec::new();
        while let Some(action) = self.queue.pop_front() {
            results.push(self.apply_action(&action));
        }
        results
    }

    /// Number of actions waiting in the queue
    pub fn pending_actions(&self) -> usize {
        self.queue.len()
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Slots invalidated by the last applied action
    pub fn last_invalidated(&self) -> Vec<SlotRef> {
        self.slot_refs(&self.last_invalidated)
    }

    // === Variant metadata ===

    fn generator(&self) -> Option<&VariantGenerator> {
        self.variants.as_ref()
    }

    /// Variant index as requested
    pub fn variant_index(&self) -> u64 {
        self.generator().map_or(0, |g| g.requested_index())
    }

    /// Variant index folded into `[1, num_variants]`
    pub fn effective_variant_index(&self) -> u64 {
        self.generator().map_or(0, |g| g.effective_index())
    }

    pub fn num_variants(&self) -> u64 {
        self.generator().map_or(0, |g| g.num_variants())
    }

    pub fn variant_name(&self) -> &str {
        self.generator().map_or("", |g| g.variant_name())
    }

    pub fn all_possible_variants(&self) -> &[String] {
        self.generator()
            .map(|g| g.all_possible_variants())
            .unwrap_or(&[])
    }

    /// Whether variant indices enumerate distinct combinations
    pub fn unique_variants(&self) -> bool {
        self.generator().map_or(false, |g| g.is_unique())
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("components", &self.arena.len())
            .field("slots", &self.store.len())
            .field("variant", &self.effective_variant_index())
            .field("diagnostics", &self.diagnostics.len())
            .finish()
    }
}
