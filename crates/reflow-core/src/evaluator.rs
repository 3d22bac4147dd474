//! Lazy, memoized evaluation of state variables
//!
//! A stale or never-computed slot is recomputed when read. While its
//! definition runs, every dependency read goes through a [`Frame`], which
//! records the slots actually touched; those become the slot's new forward
//! edges. A slot re-entered while it is being computed is a cycle: the
//! reader sees `Unresolved`.

use crate::component::Origin;
use crate::expr::list_item;
use crate::schema::{ComponentTypeDef, DependencySource, PoolSource, StateVarKind};
use crate::store::{SlotIdx, SlotKind};
use crate::{
    ComponentIdx, DefId, DiagnosticKind, Engine, Error, Expr, Result, SampleSpace, Scope, SlotKey,
    Value, ValueMap,
};
use std::sync::Arc;

/// Evaluation context for one definition, inverse or action step
pub(crate) struct Frame<'e> {
    engine: &'e mut Engine,
    component: ComponentIdx,
    ty: Arc<ComponentTypeDef>,
    /// State variable whose dependency table applies; `None` exposes the
    /// component's own state variables by name
    variable: Option<String>,
    index: Option<usize>,
    params: Option<&'e ValueMap>,
    desired: Option<Value>,
    pub(crate) reads: Vec<SlotIdx>,
}

impl<'e> Frame<'e> {
    pub(crate) fn new(
        engine: &'e mut Engine,
        component: ComponentIdx,
        ty: Arc<ComponentTypeDef>,
        variable: Option<String>,
        index: Option<usize>,
    ) -> Self {
        Self {
            engine,
            component,
            ty,
            variable,
            index,
            params: None,
            desired: None,
            reads: Vec::new(),
        }
    }

    pub(crate) fn with_params(mut self, params: &'e ValueMap) -> Self {
        self.params = Some(params);
        self
    }

    pub(crate) fn with_desired(mut self, desired: Value) -> Self {
        self.desired = Some(desired);
        self
    }

    fn source(&self, name: &str) -> Result<DependencySource> {
        match &self.variable {
            Some(variable) => self
                .ty
                .state_variables
                .get(variable)
                .and_then(|def| def.dependencies.get(name))
                .cloned()
                .ok_or_else(|| {
                    Error::EvaluationError(format!(
                        "{} declares no dependency named {}",
                        variable, name
                    ))
                }),
            None => Ok(DependencySource::StateVariable(name.to_string())),
        }
    }

    fn is_array_variable(&self, name: &str) -> bool {
        self.ty
            .state_variables
            .get(name)
            .map_or(false, |def| def.is_array())
    }

    /// Value of a whole array variable: size, then every element slot
    fn whole_array(&mut self, name: &str, size: &Expr) -> Result<Value> {
        let n = size.eval(&mut *self)?;
        if n.is_unresolved() {
            return Ok(Value::Unresolved);
        }
        let n = n.as_index().ok_or_else(|| Error::type_error("array size", &n))?;
        let mut items = Vec::with_capacity(n);
        for i in 0..n {
            let slot = self
                .engine
                .slot_for(self.component, &SlotKey::element(name, i))?;
            self.reads.push(slot);
            items.push(self.engine.evaluate(slot));
        }
        Ok(Value::List(items))
    }
}

impl Scope for Frame<'_> {
    fn dependency(&mut self, name: &str) -> Result<Value> {
        let source = self.source(name)?;
        self.engine
            .read_source(self.component, &source, &mut self.reads)
    }

    fn dependency_item(&mut self, name: &str, index: usize) -> Result<Value> {
        match self.source(name)? {
            DependencySource::Children {
                component_type,
                variable,
            } => {
                let children =
                    self.engine
                        .filtered_children(self.component, component_type.as_ref(), &mut self.reads);
                match children.get(index) {
                    Some(&child) => Ok(self.engine.read_lenient(
                        child,
                        &SlotKey::new(variable),
                        &mut self.reads,
                    )),
                    None => Ok(Value::Unresolved),
                }
            }
            DependencySource::StateVariable(variable) if self.is_array_variable(&variable) => {
                self.engine.read_variable(
                    self.component,
                    &SlotKey::element(variable, index),
                    &mut self.reads,
                )
            }
            source => {
                let list = self
                    .engine
                    .read_source(self.component, &source, &mut self.reads)?;
                Ok(list_item(&list, index))
            }
        }
    }

    fn dependency_len(&mut self, name: &str) -> Result<Value> {
        match self.source(name)? {
            DependencySource::Children { component_type, .. }
            | DependencySource::ChildCount { component_type } => {
                let children =
                    self.engine
                        .filtered_children(self.component, component_type.as_ref(), &mut self.reads);
                Ok(Value::from(children.len()))
            }
            source => {
                let list = self
                    .engine
                    .read_source(self.component, &source, &mut self.reads)?;
                Ok(match &list {
                    Value::List(items) => Value::from(items.len()),
                    Value::Unresolved => Value::Unresolved,
                    other => return Err(Error::type_error("list", other)),
                })
            }
        }
    }

    fn param(&self, name: &str) -> Value {
        self.params
            .and_then(|p| p.get(name))
            .cloned()
            .unwrap_or(Value::Null)
    }

    fn desired(&self) -> Option<Value> {
        self.desired.clone()
    }

    fn array_index(&self) -> Option<usize> {
        self.index
    }

    fn iteration_budget(&self) -> usize {
        self.engine.config.max_iteration_steps()
    }
}

impl Engine {
    /// Current value of a slot, recomputing it if it is not fresh
    pub(crate) fn evaluate(&mut self, slot: SlotIdx) -> Value {
        let Some(s) = self.store.get(slot) else {
            return Value::Unresolved;
        };
        if !s.needs_compute() {
            return s.value.clone();
        }
        let (owner, kind) = (s.owner, s.kind);
        if self.visiting.contains(&slot) {
            let name = s.slot_ref();
            self.report(
                DiagnosticKind::CyclicDependency,
                format!("{} depends on itself", name),
                owner,
            );
            return Value::Unresolved;
        }

        self.visiting.insert(slot);
        let (value, reads) = match kind {
            SlotKind::Expansion => self.compute_expansion(owner),
            _ => self.compute_derived(slot),
        };
        self.visiting.shift_remove(&slot);

        if let Some(s) = self.store.get(slot) {
            tracing::debug!(slot = %s.slot_ref(), reads = reads.len(), "recomputed");
        }
        self.store.complete(slot, value.clone(), reads);
        value
    }

    fn compute_derived(&mut self, slot: SlotIdx) -> (Value, Vec<SlotIdx>) {
        let Some((owner, key)) = self.store.get(slot).map(|s| (s.owner, s.key.clone())) else {
            return (Value::Unresolved, Vec::new());
        };
        let ty = match self.type_of(owner) {
            Ok(ty) => ty,
            Err(_) => return (Value::Unresolved, Vec::new()),
        };
        let Some(def) = ty.state_variables.get(&key.name) else {
            return (Value::Unresolved, Vec::new());
        };

        let mut frame = Frame::new(self, owner, ty.clone(), Some(key.name.clone()), key.index);
        let result = match (&def.array_size, &def.kind, key.index) {
            (Some(size), _, None) => frame.whole_array(&key.name, size),
            (_, StateVarKind::Derived { definition }, _) => definition.eval(&mut frame),
            _ => Ok(Value::Unresolved),
        };
        let reads = std::mem::take(&mut frame.reads);

        match result {
            Ok(value) => (value, reads),
            Err(err) => {
                self.report(
                    DiagnosticKind::EvaluationError,
                    format!("{}.{}: {}", owner, key, err),
                    owner,
                );
                (Value::Unresolved, reads)
            }
        }
    }

    /// Read a slot as a dependency
    pub(crate) fn read_variable(
        &mut self,
        component: ComponentIdx,
        key: &SlotKey,
        reads: &mut Vec<SlotIdx>,
    ) -> Result<Value> {
        let slot = self.slot_for(component, key)?;
        reads.push(slot);
        Ok(self.evaluate(slot))
    }

    /// Like [`read_variable`](Self::read_variable), with missing variables
    /// read as `Unresolved`
    pub(crate) fn read_lenient(
        &mut self,
        component: ComponentIdx,
        key: &SlotKey,
        reads: &mut Vec<SlotIdx>,
    ) -> Value {
        self.read_variable(component, key, reads)
            .unwrap_or(Value::Unresolved)
    }

    /// Value of one declared dependency source
    pub(crate) fn read_source(
        &mut self,
        component: ComponentIdx,
        source: &DependencySource,
        reads: &mut Vec<SlotIdx>,
    ) -> Result<Value> {
        match source {
            DependencySource::StateVariable(variable) => {
                self.read_variable(component, &SlotKey::new(variable.clone()), reads)
            }
            DependencySource::Parent(variable) => {
                match self.arena.get(component).and_then(|c| c.parent) {
                    Some(parent) => {
                        self.read_variable(parent, &SlotKey::new(variable.clone()), reads)
                    }
                    None => Ok(Value::Unresolved),
                }
            }
            DependencySource::Path { path, variable } => {
                self.read_path(component, path, variable.as_deref(), reads)
            }
            DependencySource::AttributePath {
                attribute,
                variable,
            } => {
                let path = self
                    .arena
                    .get(component)
                    .and_then(|c| c.attribute(attribute))
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                match path {
                    Some(path) => self.read_path(component, &path, variable.as_deref(), reads),
                    None => {
                        self.report(
                            DiagnosticKind::UnresolvedPath,
                            format!("attribute {} holds no reference", attribute),
                            component,
                        );
                        Ok(Value::Unresolved)
                    }
                }
            }
            DependencySource::Attribute(attribute) => Ok(self
                .arena
                .get(component)
                .and_then(|c| c.attribute(attribute))
                .cloned()
                .unwrap_or(Value::Null)),
            DependencySource::Children {
                component_type,
                variable,
            } => {
                let children = self.filtered_children(component, component_type.as_ref(), reads);
                let key = SlotKey::new(variable.clone());
                let values = children
                    .into_iter()
                    .map(|child| self.read_lenient(child, &key, reads))
                    .collect();
                Ok(Value::List(values))
            }
            DependencySource::ChildCount { component_type } => {
                let children = self.filtered_children(component, component_type.as_ref(), reads);
                Ok(Value::from(children.len()))
            }
            DependencySource::ReplacementInstance => Ok(self.replacement_instance(component)),
            DependencySource::VariantSample => Ok(self.variant_sample(component, reads)),
            DependencySource::Replacements => {
                if !self.is_composite(component) {
                    return Ok(Value::Unresolved);
                }
                let list = self.read_expansion(component, reads);
                Ok(Value::List(list.into_iter().map(Value::ComponentRef).collect()))
            }
        }
    }

    fn read_path(
        &mut self,
        origin: ComponentIdx,
        path: &str,
        variable: Option<&str>,
        reads: &mut Vec<SlotIdx>,
    ) -> Result<Value> {
        let Some(resolved) = self.resolve_tracked(origin, path, reads)? else {
            reads.push(self.names_slot);
            self.report(
                DiagnosticKind::UnresolvedPath,
                format!("cannot resolve ${}", path.trim_start_matches('$')),
                origin,
            );
            return Ok(Value::Unresolved);
        };
        let key = match (variable, resolved.variable) {
            (Some(v), _) => SlotKey::new(v),
            (None, Some(key)) => key,
            (None, None) => return Ok(Value::ComponentRef(resolved.component)),
        };
        match self.read_variable(resolved.component, &key, reads) {
            Ok(value) => Ok(value),
            Err(err) => {
                self.report(
                    DiagnosticKind::UnresolvedPath,
                    format!("${}: {}", path.trim_start_matches('$'), err),
                    origin,
                );
                Ok(Value::Unresolved)
            }
        }
    }

    /// Effective children, optionally restricted to one type
    pub(crate) fn filtered_children(
        &mut self,
        component: ComponentIdx,
        component_type: Option<&DefId>,
        reads: &mut Vec<SlotIdx>,
    ) -> Vec<ComponentIdx> {
        let children = self.effective_children(component, reads, &mut Vec::new());
        match component_type {
            None => children,
            Some(ty) => children
                .into_iter()
                .filter(|&c| self.arena.get(c).map_or(false, |x| &x.component_type == ty))
                .collect(),
        }
    }

    fn replacement_instance(&self, component: ComponentIdx) -> Value {
        let mut current = self.arena.get(component);
        while let Some(c) = current {
            if let Origin::Replacement { instance, .. } = c.origin {
                return Value::from(instance + 1);
            }
            current = c.parent.and_then(|p| self.arena.get(p));
        }
        Value::Null
    }

    /// Sample space a variant component draws from, under current state
    pub(crate) fn sample_space(
        &mut self,
        component: ComponentIdx,
        reads: &mut Vec<SlotIdx>,
    ) -> Option<SampleSpace> {
        let ty = self.type_of(component).ok()?;
        let decl = ty.variant.as_ref()?;
        let pool = match &decl.pool {
            PoolSource::Children { component_type } => {
                let children = self.arena.get(component)?.children.clone();
                children
                    .into_iter()
                    .filter(|&c| {
                        component_type.as_ref().map_or(true, |t| {
                            self.arena.get(c).map_or(false, |x| &x.component_type == t)
                        })
                    })
                    .count()
            }
            PoolSource::Variable(variable) => self
                .read_variable(component, &SlotKey::new(variable.clone()), reads)
                .ok()?
                .as_index()?,
        };
        let count = match &decl.count {
            Some(variable) => self
                .read_variable(component, &SlotKey::new(variable.clone()), reads)
                .ok()?
                .as_index()?,
            None => 1,
        };
        let with_replacement = match &decl.with_replacement {
            Some(variable) => {
                let v = self
                    .read_variable(component, &SlotKey::new(variable.clone()), reads)
                    .ok()?;
                if v.is_unresolved() {
                    return None;
                }
                v.is_truthy()
            }
            None => false,
        };
        Some(SampleSpace::new(pool, count, with_replacement))
    }

    fn variant_sample(&mut self, component: ComponentIdx, reads: &mut Vec<SlotIdx>) -> Value {
        if self.variants.is_none() {
            return Value::Unresolved;
        }
        let Some(space) = self.sample_space(component, reads) else {
            return Value::Unresolved;
        };
        if !space.is_valid() {
            self.report(
                DiagnosticKind::InvalidComposite,
                format!(
                    "cannot pick {} of {} without replacement",
                    space.count, space.pool
                ),
                component,
            );
            return Value::Unresolved;
        }
        let disambiguator = match self.arena.get(component) {
            Some(c) => c.disambiguator.clone(),
            None => return Value::Unresolved,
        };
        match &self.variants {
            Some(generator) => Value::List(
                generator
                    .pick(&disambiguator, &space)
                    .into_iter()
                    .map(Value::from)
                    .collect(),
            ),
            None => Value::Unresolved,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::schema::{DependencySource, StateVarDef};
    use crate::{
        ComponentTypeDef, DiagnosticKind, Document, DocumentNode, Engine, EngineConfig, Expr,
        SlotKey, TypeRegistry, Value,
    };

    fn registry() -> TypeRegistry {
        let mut registry = TypeRegistry::new();
        registry
            .register(ComponentTypeDef::new("document"))
            .expect("document");
        registry
            .register(
                ComponentTypeDef::new("pair")
                    .with_state_variable("x", StateVarDef::essential_from("x", 1i64))
                    .with_state_variable("flag", StateVarDef::essential_from("flag", true))
                    .with_state_variable("other", StateVarDef::essential(10i64))
                    .with_state_variable(
                        "y",
                        StateVarDef::derived(Expr::add(Expr::dep("x"), Expr::lit(1i64)))
                            .with_dependency("x", DependencySource::StateVariable("x".into())),
                    )
                    .with_state_variable(
                        "pick",
                        StateVarDef::derived(Expr::if_else(
                            Expr::dep("flag"),
                            Expr::dep("x"),
                            Expr::dep("other"),
                        ))
                        .with_dependency("flag", DependencySource::StateVariable("flag".into()))
                        .with_dependency("x", DependencySource::StateVariable("x".into()))
                        .with_dependency("other", DependencySource::StateVariable("other".into())),
                    )
                    .with_state_variable(
                        "a",
                        StateVarDef::derived(Expr::dep("b"))
                            .with_dependency("b", DependencySource::StateVariable("b".into())),
                    )
                    .with_state_variable(
                        "b",
                        StateVarDef::derived(Expr::dep("a"))
                            .with_dependency("a", DependencySource::StateVariable("a".into())),
                    )
                    .with_state_variable(
                        "squares",
                        StateVarDef::derived(Expr::Mul(Box::new(Expr::Index), Box::new(Expr::Index)))
                            .with_array_size(Expr::dep("x"))
                            .with_dependency("x", DependencySource::StateVariable("x".into())),
                    )
                    .with_state_variable(
                        "broken",
                        StateVarDef::derived(Expr::Div(
                            Box::new(Expr::dep("x")),
                            Box::new(Expr::lit(0i64)),
                        ))
                        .with_dependency("x", DependencySource::StateVariable("x".into())),
                    ),
            )
            .expect("pair");
        registry
    }

    fn load(x: i64) -> (Engine, crate::ComponentIdx) {
        let doc = Document::new(
            DocumentNode::new("document").with_child(
                DocumentNode::new("pair")
                    .named("p")
                    .with_attribute("x", x)
                    .at(4, 2),
            ),
        );
        let engine = Engine::new(&doc, registry(), EngineConfig::default(), 1).expect("load");
        let p = engine.find("p").expect("p");
        (engine, p)
    }

    #[test]
    fn test_derived_value() {
        let (mut engine, p) = load(3);
        assert_eq!(engine.get_value(p, "y"), Ok(Value::Int(4)));
    }

    #[test]
    fn test_conditional_dependencies_recorded() {
        let (mut engine, p) = load(3);
        assert_eq!(engine.get_value(p, "pick"), Ok(Value::Int(3)));
        let pick = engine.store.lookup(p, &SlotKey::new("pick")).expect("slot");
        let other = engine.store.lookup(p, &SlotKey::new("other")).expect("slot");
        let deps = engine.store.get(pick).map(|s| s.dependencies().to_vec());
        assert_eq!(deps.map(|d| d.contains(&other)), Some(false));
    }

    #[test]
    fn test_cycle_yields_unresolved_and_diagnostic() {
        let (mut engine, p) = load(1);
        assert_eq!(engine.get_value(p, "a"), Ok(Value::Unresolved));
        let cycles: Vec<_> = engine
            .diagnostics()
            .of_kind(DiagnosticKind::CyclicDependency)
            .collect();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].position, Some(crate::SourcePosition::new(4, 2)));
        assert_eq!(engine.get_value(p, "y"), Ok(Value::Int(2)));
    }

    #[test]
    fn test_array_elements() {
        let (mut engine, p) = load(4);
        assert_eq!(
            engine.get_value(p, "squares"),
            Ok(Value::List(vec![
                Value::Int(0),
                Value::Int(1),
                Value::Int(4),
                Value::Int(9)
            ]))
        );
        assert_eq!(engine.get_value(p, SlotKey::element("squares", 2)), Ok(Value::Int(4)));
    }

    #[test]
    fn test_evaluation_error_is_local() {
        let (mut engine, p) = load(2);
        assert_eq!(engine.get_value(p, "broken"), Ok(Value::Unresolved));
        assert_eq!(
            engine
                .diagnostics()
                .of_kind(DiagnosticKind::EvaluationError)
                .count(),
            1
        );
        assert_eq!(engine.get_value(p, "y"), Ok(Value::Int(3)));
    }
}
