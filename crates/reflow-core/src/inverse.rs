//! Actions and inverse definitions
//!
//! Applying an action runs in two phases, the same way an effect is
//! collected and then applied:
//!
//! 1. **Collect.** Every requested write is walked down through inverse
//!    definitions until it lands on essential slots; `Trigger` steps add a
//!    counter bump. The result is a [`WriteSet`]; no stored value is
//!    touched. Any step that cannot be inverted aborts the action.
//! 2. **Commit.** Writes whose value actually differs are stored, then one
//!    invalidation sweep marks everything downstream stale. Recomputation
//!    happens lazily on the next read.
//!
//! Steps of a declared action are all collected against the state before the
//! action; they do not observe each other's writes.

use crate::evaluator::Frame;
use crate::schema::{ActionStep, ComponentTypeDef, DependencySource};
use crate::store::{SlotIdx, SlotKind};
use crate::{
    Action, ActionOutcome, DiagnosticKind, Engine, Error, PendingWrite, Result,
    SlotKey, SlotRef, Value, WriteSet, SET_STATE_VARIABLE,
};
use std::sync::Arc;

fn uninvertible(slot: &SlotRef, reason: impl Into<String>) -> Error {
    Error::Uninvertible {
        slot: slot.clone(),
        reason: reason.into(),
    }
}

impl Engine {
    /// Apply one action immediately
    ///
    /// On error nothing is written. Uninvertible requests are also recorded
    /// as diagnostics against the addressed component.
    pub fn apply_action(&mut self, action: &Action) -> Result<ActionOutcome> {
        let ty = self.type_of(action.component)?;
        tracing::info!(
            component = %action.component,
            operation = %action.operation,
            "applying action"
        );

        let mut writes = WriteSet::new();
        let collected = if action.operation == SET_STATE_VARIABLE
            && !ty.actions.contains_key(SET_STATE_VARIABLE)
        {
            self.collect_set_state_variable(action, &mut writes)
        } else {
            self.collect_steps(action, &ty, &mut writes)
        };

        if let Err(err) = collected {
            if let Error::Uninvertible { slot, .. } = &err {
                self.report(DiagnosticKind::Uninvertible, err.to_string(), slot.component);
            }
            tracing::warn!(component = %action.component, error = %err, "action rejected");
            return Err(err);
        }
        Ok(self.commit(writes))
    }

    fn collect_set_state_variable(&mut self, action: &Action, writes: &mut WriteSet) -> Result<()> {
        let variable = action
            .args
            .get("variable")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::MissingArgument("variable".into()))?
            .to_string();
        let value = action
            .args
            .get("value")
            .cloned()
            .ok_or_else(|| Error::MissingArgument("value".into()))?;
        let index = match action.args.get("index") {
            None | Some(Value::Null) => None,
            Some(i) => Some(i.as_index().ok_or_else(|| Error::type_error("index", i))?),
        };
        if variable.starts_with("__") {
            return Err(Error::StateVariableNotFound {
                component: action.component,
                variable,
            });
        }
        let target = SlotRef::new(
            action.component,
            SlotKey {
                name: variable,
                index,
            },
        );
        self.collect_inverse(target, value, writes)
    }

    fn collect_steps(
        &mut self,
        action: &Action,
        ty: &Arc<ComponentTypeDef>,
        writes: &mut WriteSet,
    ) -> Result<()> {
        let def = ty
            .actions
            .get(&action.operation)
            .ok_or_else(|| Error::UnknownAction {
                component_type: ty.id.clone(),
                operation: action.operation.clone(),
            })?;
        let component = action.component;

        for step in &def.steps {
            match step {
                ActionStep::Set {
                    variable,
                    index,
                    value,
                } => {
                    let (value, index) = {
                        let mut frame = Frame::new(self, component, ty.clone(), None, None)
                            .with_params(&action.args);
                        let value = value.eval(&mut frame)?;
                        let index = match index {
                            Some(expr) => Some(expr.eval(&mut frame)?),
                            None => None,
                        };
                        (value, index)
                    };
                    let index = match index {
                        Some(i) => Some(i.as_index().ok_or_else(|| Error::type_error("index", &i))?),
                        None => None,
                    };
                    let target = SlotRef::new(
                        component,
                        SlotKey {
                            name: variable.clone(),
                            index,
                        },
                    );
                    self.collect_inverse(target, value, writes)?;
                }
                ActionStep::Trigger { variable } => {
                    let slot = self.slot_for(component, &SlotKey::new(variable.clone()))?;
                    if self.store.get(slot).map(|s| s.kind) != Some(SlotKind::Trigger) {
                        return Err(Error::InvalidDefinition(format!(
                            "{} on {} is not a trigger",
                            variable, ty.id
                        )));
                    }
                    writes.push(PendingWrite::Trigger {
                        slot: SlotRef::new(component, variable.clone()),
                    });
                }
            }
        }
        Ok(())
    }

    /// Walk inverse definitions from `target` down to stored slots
    ///
    /// Planned writes are handled depth first, in declaration order. The
    /// walk is bounded by the configured step budget.
    pub(crate) fn collect_inverse(
        &mut self,
        target: SlotRef,
        desired: Value,
        writes: &mut WriteSet,
    ) -> Result<()> {
        let budget = self.config.max_inverse_steps();
        let mut stack = vec![(target, desired)];
        let mut steps = 0usize;

        while let Some((target, desired)) = stack.pop() {
            steps += 1;
            if steps > budget {
                return Err(Error::InverseBudgetExceeded(budget));
            }
            if desired.is_unresolved() {
                return Err(uninvertible(&target, "cannot store an unresolved value"));
            }
            let slot = self.slot_for(target.component, &target.key)?;
            let kind = self
                .store
                .get(slot)
                .map(|s| s.kind)
                .ok_or_else(|| Error::StateVariableNotFound {
                    component: target.component,
                    variable: target.key.to_string(),
                })?;
            match kind {
                SlotKind::Trigger => {
                    return Err(uninvertible(
                        &target,
                        "trigger counters only advance through Trigger steps",
                    ));
                }
                SlotKind::Essential => {
                    writes.push(PendingWrite::Set {
                        slot: target,
                        value: desired,
                    });
                }
                SlotKind::Expansion => {
                    return Err(uninvertible(&target, "replacement lists cannot be set"));
                }
                SlotKind::Derived => {
                    let planned = self.plan_inverse(&target, desired)?;
                    stack.extend(planned.into_iter().rev());
                }
            }
        }
        Ok(())
    }

    /// Writes one derived slot's inverse asks for
    fn plan_inverse(&mut self, target: &SlotRef, desired: Value) -> Result<Vec<(SlotRef, Value)>> {
        let ty = self.type_of(target.component)?;
        let def = ty
            .state_variables
            .get(&target.key.name)
            .ok_or_else(|| Error::StateVariableNotFound {
                component: target.component,
                variable: target.key.to_string(),
            })?;

        if def.is_array() && target.key.index.is_none() {
            let items = match desired {
                Value::List(items) => items,
                other => {
                    return Err(uninvertible(
                        target,
                        format!("array variable expects a list, got {}", other.type_name()),
                    ))
                }
            };
            return Ok(items
                .into_iter()
                .enumerate()
                .map(|(i, v)| {
                    (
                        SlotRef::new(target.component, SlotKey::element(target.key.name.clone(), i)),
                        v,
                    )
                })
                .collect());
        }

        let Some(inverse) = &def.inverse else {
            return Err(uninvertible(target, "no inverse definition"));
        };

        let mut planned = Vec::new();
        {
            let mut frame = Frame::new(
                self,
                target.component,
                ty.clone(),
                Some(target.key.name.clone()),
                target.key.index,
            )
            .with_desired(desired);
            for write in inverse {
                if let Some(when) = &write.when {
                    let applies = when
                        .eval(&mut frame)
                        .map_err(|e| uninvertible(target, e.to_string()))?;
                    if !applies.is_truthy() {
                        continue;
                    }
                }
                let value = write
                    .value
                    .eval(&mut frame)
                    .map_err(|e| uninvertible(target, e.to_string()))?;
                if value.is_unresolved() {
                    return Err(uninvertible(
                        target,
                        format!("inverse through {} is unresolved", write.dependency),
                    ));
                }
                let index = match &write.index {
                    Some(expr) => {
                        let i = expr
                            .eval(&mut frame)
                            .map_err(|e| uninvertible(target, e.to_string()))?;
                        Some(i.as_index().ok_or_else(|| {
                            uninvertible(target, format!("inverse index {} is not an index", i))
                        })?)
                    }
                    None => None,
                };
                let source = def.dependencies.get(&write.dependency).ok_or_else(|| {
                    uninvertible(target, format!("no dependency named {}", write.dependency))
                })?;
                planned.push((source.clone(), index, value));
            }
        }
        if planned.is_empty() {
            return Err(uninvertible(target, "no inverse write applies"));
        }

        let mut out = Vec::with_capacity(planned.len());
        for (source, index, value) in planned {
            let next = self.inverse_target(target, &source, index)?;
            out.push((next, value));
        }
        Ok(out)
    }

    /// The slot a dependency source addresses, for writing
    fn inverse_target(
        &mut self,
        target: &SlotRef,
        source: &DependencySource,
        index: Option<usize>,
    ) -> Result<SlotRef> {
        let component = target.component;
        let keyed = |name: &str| SlotKey {
            name: name.to_string(),
            index,
        };
        match source {
            DependencySource::StateVariable(variable) => Ok(SlotRef::new(component, keyed(variable))),
            DependencySource::Parent(variable) => {
                let parent = self
                    .arena
                    .get(component)
                    .and_then(|c| c.parent)
                    .ok_or_else(|| uninvertible(target, "component has no parent"))?;
                Ok(SlotRef::new(parent, keyed(variable)))
            }
            DependencySource::Path { path, variable } => {
                self.path_target(target, path, variable.as_deref(), index)
            }
            DependencySource::AttributePath {
                attribute,
                variable,
            } => {
                let path = self
                    .arena
                    .get(component)
                    .and_then(|c| c.attribute(attribute))
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| {
                        uninvertible(target, format!("attribute {} holds no reference", attribute))
                    })?;
                self.path_target(target, &path, variable.as_deref(), index)
            }
            DependencySource::Children {
                component_type,
                variable,
            } => {
                let i = index
                    .ok_or_else(|| uninvertible(target, "writing children needs an index"))?;
                let children = self.filtered_children(component, component_type.as_ref(), &mut Vec::new());
                let child = children.get(i).copied().ok_or_else(|| {
                    uninvertible(target, format!("child {} does not exist", i + 1))
                })?;
                Ok(SlotRef::new(child, variable.clone()))
            }
            other => Err(uninvertible(
                target,
                format!("cannot write through {:?}", other),
            )),
        }
    }

    fn path_target(
        &mut self,
        target: &SlotRef,
        path: &str,
        variable: Option<&str>,
        index: Option<usize>,
    ) -> Result<SlotRef> {
        let resolved = self
            .resolve_tracked(target.component, path, &mut Vec::new())?
            .ok_or_else(|| uninvertible(target, format!("cannot resolve {}", path)))?;
        let mut key = match (variable, resolved.variable) {
            (Some(v), _) => SlotKey::new(v),
            (None, Some(key)) => key,
            (None, None) => {
                return Err(uninvertible(
                    target,
                    format!("{} addresses a component, not a state variable", path),
                ))
            }
        };
        if key.index.is_none() {
            key.index = index;
        }
        Ok(SlotRef::new(resolved.component, key))
    }

    /// Store the collected writes and invalidate downstream
    fn commit(&mut self, writes: WriteSet) -> ActionOutcome {
        let mut changed: Vec<SlotIdx> = Vec::new();
        for write in writes.iter() {
            let target = write.slot();
            let Ok(slot) = self.slot_for(target.component, &target.key) else {
                continue;
            };
            let Some(current) = self.store.get(slot).map(|s| s.value.clone()) else {
                continue;
            };
            let next = match write {
                PendingWrite::Set { value, .. } => value.clone(),
                PendingWrite::Trigger { .. } => {
                    Value::Int(current.as_int().unwrap_or(0).saturating_add(1))
                }
            };
            // Exact: a stored value changes whenever the written one differs
            if current == next {
                continue;
            }
            self.store.write(slot, next);
            if !changed.contains(&slot) {
                changed.push(slot);
            }
        }

        let invalidated = if changed.is_empty() {
            Vec::new()
        } else {
            self.store.invalidate_from(&changed)
        };
        tracing::debug!(
            writes = writes.len(),
            changed = changed.len(),
            invalidated = invalidated.len(),
            "action committed"
        );
        self.last_invalidated = invalidated;
        ActionOutcome {
            changed: self.slot_refs(&changed),
            invalidated: self.slot_refs(&self.last_invalidated),
            writes,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::schema::{ActionStep, DependencySource, InverseWrite, StateVarDef};
    use crate::{
        Action, ComponentTypeDef, DiagnosticKind, Document, DocumentNode, Engine, EngineConfig,
        Error, Expr, SlotRef, TypeRegistry, Value,
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
                    .with_state_variable("clicks", StateVarDef::trigger())
                    .with_state_variable(
                        "y",
                        StateVarDef::derived(Expr::add(Expr::dep("x"), Expr::lit(1i64)))
                            .with_dependency("x", DependencySource::StateVariable("x".into()))
                            .with_inverse("x", Expr::sub(Expr::Desired, Expr::lit(1i64))),
                    )
                    .with_state_variable(
                        "z",
                        StateVarDef::derived(Expr::mul(Expr::dep("y"), Expr::lit(2i64)))
                            .with_dependency("y", DependencySource::StateVariable("y".into()))
                            .with_inverse_write(InverseWrite {
                                dependency: "y".into(),
                                index: None,
                                when: Some(Expr::Eq(
                                    Box::new(Expr::Mod(
                                        Box::new(Expr::Desired),
                                        Box::new(Expr::lit(2i64)),
                                    )),
                                    Box::new(Expr::lit(0i64)),
                                )),
                                value: Expr::Div(Box::new(Expr::Desired), Box::new(Expr::lit(2i64))),
                            }),
                    )
                    .with_state_variable(
                        "frozen",
                        StateVarDef::derived(Expr::dep("x"))
                            .with_dependency("x", DependencySource::StateVariable("x".into())),
                    )
                    .with_action(
                        "bump",
                        vec![
                            ActionStep::Set {
                                variable: "y".into(),
                                index: None,
                                value: Expr::add(Expr::dep("y"), Expr::param("by")),
                            },
                            ActionStep::Trigger {
                                variable: "clicks".into(),
                            },
                        ],
                    ),
            )
            .expect("pair");
        registry
    }

    fn load() -> (Engine, crate::ComponentIdx) {
        let doc = Document::new(
            DocumentNode::new("document")
                .with_child(DocumentNode::new("pair").named("p").with_attribute("x", 3i64)),
        );
        let engine = Engine::new(&doc, registry(), EngineConfig::default(), 1).expect("load");
        let p = engine.find("p").expect("p");
        (engine, p)
    }

    #[test]
    fn test_set_derived_writes_essential() {
        let (mut engine, p) = load();
        let outcome = engine
            .apply_action(&Action::set_state_variable(p, "y", 5i64))
            .expect("set y");
        assert_eq!(outcome.changed, vec![SlotRef::new(p, "x")]);
        assert_eq!(engine.get_value(p, "x"), Ok(Value::Int(4)));
        assert_eq!(engine.get_value(p, "y"), Ok(Value::Int(5)));
    }

    #[test]
    fn test_chained_inverse_with_condition() {
        let (mut engine, p) = load();
        engine
            .apply_action(&Action::set_state_variable(p, "z", 12i64))
            .expect("set z");
        assert_eq!(engine.get_value(p, "x"), Ok(Value::Int(5)));

        let odd = engine.apply_action(&Action::set_state_variable(p, "z", 7i64));
        assert!(matches!(odd, Err(Error::Uninvertible { .. })));
        assert_eq!(engine.get_value(p, "x"), Ok(Value::Int(5)));
    }

    #[test]
    fn test_uninvertible_leaves_state_untouched() {
        let (mut engine, p) = load();
        let result = engine.apply_action(&Action::set_state_variable(p, "frozen", 9i64));
        assert!(matches!(result, Err(Error::Uninvertible { .. })));
        assert_eq!(engine.get_value(p, "x"), Ok(Value::Int(3)));
        assert_eq!(
            engine
                .diagnostics()
                .of_kind(DiagnosticKind::Uninvertible)
                .count(),
            1
        );
    }

    #[test]
    fn test_equal_value_invalidates_nothing() {
        let (mut engine, p) = load();
        assert_eq!(engine.get_value(p, "z"), Ok(Value::Int(8)));
        let outcome = engine
            .apply_action(&Action::set_state_variable(p, "x", 3i64))
            .expect("set x");
        assert!(outcome.changed.is_empty());
        assert!(outcome.invalidated.is_empty());
    }

    #[test]
    fn test_tiny_float_write_is_stored() {
        let (mut engine, p) = load();
        engine
            .apply_action(&Action::set_state_variable(p, "x", 1e-20))
            .expect("set x");
        let outcome = engine
            .apply_action(&Action::set_state_variable(p, "x", 5e-18))
            .expect("set x again");
        assert_eq!(outcome.changed, vec![SlotRef::new(p, "x")]);
        assert_eq!(engine.get_value(p, "x"), Ok(Value::Float(5e-18)));
    }

    #[test]
    fn test_large_integer_round_trip() {
        let (mut engine, p) = load();
        let big = 9_007_199_254_740_995i64;
        engine
            .apply_action(&Action::set_state_variable(p, "y", big))
            .expect("set y");
        assert_eq!(engine.get_value(p, "x"), Ok(Value::Int(big - 1)));
        assert_eq!(engine.get_value(p, "y"), Ok(Value::Int(big)));
    }

    #[test]
    fn test_trigger_cannot_be_set_directly() {
        let (mut engine, p) = load();
        let result = engine.apply_action(&Action::set_state_variable(p, "clicks", "oops"));
        assert!(matches!(result, Err(Error::Uninvertible { .. })));
        assert_eq!(engine.get_value(p, "clicks"), Ok(Value::Int(0)));

        engine
            .apply_action(&Action::new(p, "bump").with_arg("by", 0i64))
            .expect("bump");
        assert_eq!(engine.get_value(p, "clicks"), Ok(Value::Int(1)));
    }

    #[test]
    fn test_declared_action_steps() {
        let (mut engine, p) = load();
        let outcome = engine
            .apply_action(&Action::new(p, "bump").with_arg("by", 2i64))
            .expect("bump");
        assert_eq!(outcome.writes.len(), 2);
        assert_eq!(engine.get_value(p, "y"), Ok(Value::Int(6)));
        assert_eq!(engine.get_value(p, "clicks"), Ok(Value::Int(1)));
    }

    #[test]
    fn test_unknown_action_and_missing_argument() {
        let (mut engine, p) = load();
        assert!(matches!(
            engine.apply_action(&Action::new(p, "explode")),
            Err(Error::UnknownAction { .. })
        ));
        assert_eq!(
            engine.apply_action(&Action::new(p, crate::SET_STATE_VARIABLE).with_arg("variable", "x")),
            Err(Error::MissingArgument("value".into()))
        );
    }

    #[test]
    fn test_inverse_budget() {
        let (mut engine, p) = load();
        engine.config = engine.config.clone().with_max_inverse_steps(1);
        assert_eq!(
            engine.apply_action(&Action::set_state_variable(p, "y", 5i64)),
            Err(Error::InverseBudgetExceeded(1))
        );
    }
}
