//! Composite expansion
//!
//! A composite's replacement list is the value of its internal expansion
//! slot. Computing that slot derives a list of [`ReplacementSpec`]s from the
//! composite's own configuration (and, through it, the variant sample), then
//! reconciles the specs against the previous [`ReplacementRecord`]: matching
//! entries keep their component and its state, new specs clone a template,
//! and owned components no longer listed are parked. A parked replacement
//! comes back, with its address and state, when its
//! `(template, position, instance)` spec is listed again; it is destroyed
//! only with its composite.
//!
//! References to another composite share its replacements by index; they
//! never expand again.

use crate::component::{NewComponent, Origin};
use crate::schema::{CompositeDef, EXPANSION_SLOT};
use crate::store::SlotIdx;
use crate::{ComponentIdx, DiagnosticKind, Engine, Error, SlotKey, Value};
use std::collections::HashMap;

/// What one replacement position holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum ReplacementSpec {
    /// Clone of the template child at `position`, `instance` times over
    Template {
        template: ComponentIdx,
        position: usize,
        instance: usize,
    },
    /// An existing component, not owned by the composite
    Shared(ComponentIdx),
}

#[derive(Debug, Clone)]
pub(crate) struct ReplacementEntry {
    pub(crate) spec: ReplacementSpec,
    pub(crate) component: ComponentIdx,
    /// Destroyed with the entry
    pub(crate) owned: bool,
}

/// Current replacements of one composite
#[derive(Debug, Clone, Default)]
pub(crate) struct ReplacementRecord {
    pub(crate) entries: Vec<ReplacementEntry>,
    /// Owned replacements no longer listed, by the spec that made them
    pub(crate) parked: HashMap<ReplacementSpec, ComponentIdx>,
}

impl ReplacementRecord {
    pub(crate) fn components(&self) -> Vec<ComponentIdx> {
        self.entries.iter().map(|e| e.component).collect()
    }
}

impl Engine {
    /// Value of a composite's expansion slot, with the slots it read
    pub(crate) fn compute_expansion(&mut self, owner: ComponentIdx) -> (Value, Vec<SlotIdx>) {
        let mut reads = Vec::new();
        if self.variants.is_none() {
            return (Value::List(Vec::new()), reads);
        }
        let rule = match self.type_of(owner).map(|ty| ty.composite.clone()) {
            Ok(Some(rule)) => rule,
            _ => return (Value::List(Vec::new()), reads),
        };
        let specs = match self.replacement_specs(owner, &rule, &mut reads) {
            Ok(specs) => specs,
            Err(err) => {
                self.report(DiagnosticKind::InvalidComposite, err.to_string(), owner);
                Vec::new()
            }
        };
        let list = self.reconcile(owner, specs);
        (
            Value::List(list.into_iter().map(Value::ComponentRef).collect()),
            reads,
        )
    }

    fn replacement_specs(
        &mut self,
        owner: ComponentIdx,
        rule: &CompositeDef,
        reads: &mut Vec<SlotIdx>,
    ) -> crate::Result<Vec<ReplacementSpec>> {
        let templates = self
            .arena
            .get(owner)
            .map(|c| c.children.clone())
            .unwrap_or_default();
        match rule {
            CompositeDef::SelectChildren { indices } => {
                let value = self.read_lenient(owner, &SlotKey::new(indices.clone()), reads);
                let picks: Vec<usize> = match &value {
                    Value::Unresolved | Value::Null => return Ok(Vec::new()),
                    Value::List(items) => items
                        .iter()
                        .map(|v| {
                            v.as_index().ok_or_else(|| {
                                Error::InvalidComposite(format!("{} holds a non-index {}", indices, v))
                            })
                        })
                        .collect::<crate::Result<_>>()?,
                    v => vec![v.as_index().ok_or_else(|| {
                        Error::InvalidComposite(format!("{} holds a non-index {}", indices, v))
                    })?],
                };
                let mut seen: HashMap<usize, usize> = HashMap::new();
                let mut specs = Vec::with_capacity(picks.len());
                for position in picks {
                    let template = *templates.get(position).ok_or_else(|| {
                        Error::InvalidComposite(format!(
                            "child {} selected but only {} exist",
                            position + 1,
                            templates.len()
                        ))
                    })?;
                    let instance = seen.entry(position).or_insert(0);
                    specs.push(ReplacementSpec::Template {
                        template,
                        position,
                        instance: *instance,
                    });
                    *instance += 1;
                }
                Ok(specs)
            }
            CompositeDef::Repeat { count } => {
                let value = self.read_lenient(owner, &SlotKey::new(count.clone()), reads);
                if value.is_unresolved() {
                    return Ok(Vec::new());
                }
                let count = value.as_index().ok_or_else(|| {
                    Error::InvalidComposite(format!(
                        "repeat count must be a non-negative integer, got {}",
                        value
                    ))
                })?;
                let mut specs = Vec::with_capacity(count * templates.len());
                for instance in 0..count {
                    for (position, &template) in templates.iter().enumerate() {
                        specs.push(ReplacementSpec::Template {
                            template,
                            position,
                            instance,
                        });
                    }
                }
                Ok(specs)
            }
            CompositeDef::Copy { source } => {
                let path = self
                    .arena
                    .get(owner)
                    .and_then(|c| c.attribute(source))
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .ok_or_else(|| {
                        Error::InvalidComposite(format!("attribute {} holds no reference", source))
                    })?;
                let resolved = self.resolve_tracked(owner, &path, reads)?;
                let Some(resolved) = resolved else {
                    reads.push(self.names_slot);
                    self.report(
                        DiagnosticKind::UnresolvedPath,
                        format!("cannot resolve ${}", path.trim_start_matches('$')),
                        owner,
                    );
                    return Ok(Vec::new());
                };
                let target = resolved.component;
                if target == owner {
                    return Err(Error::InvalidComposite(format!(
                        "${} refers to the copy itself",
                        path.trim_start_matches('$')
                    )));
                }
                if self.is_composite(target) {
                    let shared = self.read_expansion(target, reads);
                    Ok(shared
                        .into_iter()
                        .filter(|&c| c != owner)
                        .map(ReplacementSpec::Shared)
                        .collect())
                } else {
                    Ok(vec![ReplacementSpec::Shared(target)])
                }
            }
        }
    }

    /// Match new specs against the previous record and update the arena
    fn reconcile(&mut self, owner: ComponentIdx, specs: Vec<ReplacementSpec>) -> Vec<ComponentIdx> {
        let old = self.records.remove(&owner).unwrap_or_default();
        let before = old.components();
        let ReplacementRecord {
            entries: old_entries,
            mut parked,
        } = old;
        let mut available: Vec<Option<ReplacementEntry>> =
            old_entries.into_iter().map(Some).collect();
        let mut entries = Vec::with_capacity(specs.len());
        let mut created = 0usize;
        let mut restored = 0usize;

        for (position, spec) in specs.into_iter().enumerate() {
            let arena = &self.arena;
            let kept = available
                .iter_mut()
                .find(|slot| {
                    slot.as_ref()
                        .map_or(false, |e| e.spec == spec && arena.contains(e.component))
                })
                .and_then(Option::take);
            let kept = kept.or_else(|| {
                let component = parked.remove(&spec).filter(|&c| self.arena.contains(c))?;
                restored += 1;
                Some(ReplacementEntry {
                    spec,
                    component,
                    owned: true,
                })
            });
            let entry = match (kept, spec) {
                (Some(entry), _) => {
                    if let Some(Origin::Replacement { position: p, .. }) =
                        self.arena.get_mut(entry.component).map(|c| &mut c.origin)
                    {
                        *p = position;
                    }
                    entry
                }
                (
                    None,
                    ReplacementSpec::Template {
                        template,
                        position: template_position,
                        instance,
                    },
                ) => {
                    let disambiguator = match self.arena.get(owner) {
                        Some(c) => format!("{}/{}#{}", c.disambiguator, template_position, instance),
                        None => continue,
                    };
                    let origin = Origin::Replacement {
                        composite: owner,
                        position,
                        instance,
                        template,
                    };
                    let Some(component) =
                        self.clone_subtree(template, owner, origin, disambiguator, false, true)
                    else {
                        continue;
                    };
                    created += 1;
                    ReplacementEntry {
                        spec,
                        component,
                        owned: true,
                    }
                }
                (None, ReplacementSpec::Shared(component)) => ReplacementEntry {
                    spec,
                    component,
                    owned: false,
                },
            };
            entries.push(entry);
        }

        let dropped: Vec<ReplacementEntry> =
            available.into_iter().flatten().filter(|e| e.owned).collect();
        for entry in &dropped {
            self.park_subtree(entry.component);
            parked.insert(entry.spec, entry.component);
        }

        let record = ReplacementRecord { entries, parked };
        let after = record.components();
        self.records.insert(owner, record);
        if before != after {
            self.resolver.evict_through(owner);
            self.store.invalidate_from(&[self.names_slot]);
            tracing::debug!(
                composite = %owner,
                created,
                restored,
                reused = after.len() - created - restored,
                parked = dropped.len(),
                "re-expanded"
            );
        }
        after
    }

    /// Clone `source` and its structural descendants under `parent`
    fn clone_subtree(
        &mut self,
        source: ComponentIdx,
        parent: ComponentIdx,
        origin: Origin,
        disambiguator: String,
        in_template: bool,
        detached: bool,
    ) -> Option<ComponentIdx> {
        let template = self.arena.get(source)?.clone();
        let ty = self.type_of(source).ok()?;
        let new = NewComponent {
            component_type: template.component_type.clone(),
            name: template.name.clone(),
            parent: Some(parent),
            attributes: template.attributes.clone(),
            position: template.position,
            origin,
            disambiguator: disambiguator.clone(),
            in_template,
        };
        let idx = if detached {
            self.arena.create_detached(new)
        } else {
            self.arena.create(new)
        };
        self.create_slots(idx, &ty);

        let child_in_template = in_template || ty.is_composite();
        for (i, &child) in template.children.iter().enumerate() {
            self.clone_subtree(
                child,
                idx,
                Origin::Cloned { source: child },
                format!("{}/{}", disambiguator, i),
                child_in_template,
                false,
            );
        }
        Some(idx)
    }

    /// Remove a replacement, its descendants and their owned replacements
    fn destroy_subtree(&mut self, root: ComponentIdx) {
        let mut stack = vec![root];
        let mut orphaned = Vec::new();
        while let Some(c) = stack.pop() {
            let Some(component) = self.arena.get(c) else {
                continue;
            };
            stack.extend(component.children.iter().copied());
            if let Some(record) = self.records.remove(&c) {
                stack.extend(record.entries.iter().filter(|e| e.owned).map(|e| e.component));
                stack.extend(record.parked.values().copied());
            }
            orphaned.extend(self.store.remove_component(c));
            self.arena.remove(c);
            self.resolver.evict_component(c);
        }
        orphaned.retain(|&s| self.store.get(s).is_some());
        for &slot in &orphaned {
            self.store.mark_stale(slot);
        }
        self.store.invalidate_from(&orphaned);
    }

    /// Take a replacement out of view, keeping its component and slots
    ///
    /// Readers of the subtree are invalidated so they resolve again.
    fn park_subtree(&mut self, root: ComponentIdx) {
        let mut stack = vec![root];
        let mut slots = Vec::new();
        while let Some(c) = stack.pop() {
            let Some(component) = self.arena.get(c) else {
                continue;
            };
            stack.extend(component.children.iter().copied());
            slots.extend_from_slice(self.store.slots_of(c));
            self.resolver.evict_component(c);
        }
        self.store.invalidate_from(&slots);
    }

    /// Current replacements of a composite, expanding on demand
    ///
    /// Records the read of the expansion slot. Empty for non-composites and
    /// while variant spaces are being discovered.
    pub(crate) fn read_expansion(
        &mut self,
        composite: ComponentIdx,
        reads: &mut Vec<SlotIdx>,
    ) -> Vec<ComponentIdx> {
        if self.variants.is_none() || !self.is_composite(composite) {
            return Vec::new();
        }
        let Some(slot) = self
            .store
            .lookup(composite, &SlotKey::new(EXPANSION_SLOT))
        else {
            return Vec::new();
        };
        reads.push(slot);
        match self.evaluate(slot) {
            Value::List(items) => items.iter().filter_map(Value::as_component_ref).collect(),
            _ => Vec::new(),
        }
    }

    /// Children as seen by dependencies: nested composites are replaced by
    /// their (flattened) replacements
    ///
    /// Composites passed through are appended to `through`.
    pub(crate) fn effective_children(
        &mut self,
        component: ComponentIdx,
        reads: &mut Vec<SlotIdx>,
        through: &mut Vec<ComponentIdx>,
    ) -> Vec<ComponentIdx> {
        let mut guard = vec![component];
        self.flatten_children(component, reads, through, &mut guard)
    }

    fn flatten_children(
        &mut self,
        component: ComponentIdx,
        reads: &mut Vec<SlotIdx>,
        through: &mut Vec<ComponentIdx>,
        guard: &mut Vec<ComponentIdx>,
    ) -> Vec<ComponentIdx> {
        let direct = if self.is_composite(component) {
            through.push(component);
            self.read_expansion(component, reads)
        } else {
            self.arena
                .get(component)
                .map(|c| c.children.clone())
                .unwrap_or_default()
        };
        let mut out = Vec::with_capacity(direct.len());
        for child in direct {
            if self.is_composite(child) && !guard.contains(&child) {
                guard.push(child);
                out.extend(self.flatten_children(child, reads, through, guard));
                guard.pop();
            } else if !self.is_composite(child) {
                out.push(child);
            }
        }
        out
    }

    /// Current replacements of a composite, in order
    pub fn replacements(&mut self, composite: ComponentIdx) -> crate::Result<Vec<ComponentIdx>> {
        self.check_component(composite)?;
        Ok(self.read_expansion(composite, &mut Vec::new()))
    }
}

#[cfg(test)]
mod tests {
    use crate::schema::{CompositeDef, DependencySource, StateVarDef};
    use crate::{
        Action, ComponentTypeDef, DiagnosticKind, Document, DocumentNode, Engine, EngineConfig,
        Expr, TypeRegistry, Value,
    };

    fn registry() -> TypeRegistry {
        let mut registry = TypeRegistry::new();
        for ty in [
            ComponentTypeDef::new("document"),
            ComponentTypeDef::new("number")
                .with_state_variable("value", StateVarDef::essential_from("value", 0i64))
                .with_state_variable(
                    "instance",
                    StateVarDef::derived(Expr::dep("i"))
                        .with_dependency("i", DependencySource::ReplacementInstance),
                ),
            ComponentTypeDef::new("repeat")
                .with_state_variable("count", StateVarDef::essential_from("count", 1i64))
                .with_composite(CompositeDef::Repeat {
                    count: "count".into(),
                }),
            ComponentTypeDef::new("copy").with_composite(CompositeDef::Copy {
                source: "source".into(),
            }),
            ComponentTypeDef::new("total").with_state_variable(
                "sum",
                StateVarDef::derived(Expr::Sum(Box::new(Expr::dep("values"))))
                    .with_dependency(
                        "values",
                        DependencySource::Children {
                            component_type: None,
                            variable: "value".into(),
                        },
                    ),
            ),
        ] {
            registry.register(ty).expect("register");
        }
        registry
    }

    fn load(count: i64) -> Engine {
        let doc = Document::new(
            DocumentNode::new("document")
                .with_child(
                    DocumentNode::new("total").named("t").with_child(
                        DocumentNode::new("repeat")
                            .named("r")
                            .with_attribute("count", count)
                            .with_child(DocumentNode::new("number").with_attribute("value", 2i64)),
                    ),
                )
                .with_child(
                    DocumentNode::new("copy")
                        .named("c")
                        .with_attribute("source", "$r")
                        .at(9, 1),
                ),
        );
        Engine::new(&doc, registry(), EngineConfig::default(), 1).expect("load")
    }

    #[test]
    fn test_repeat_expands_and_flattens() {
        let mut engine = load(3);
        let root = engine.root();
        let r = engine.find("r").expect("r");
        let t = engine.find("t").expect("t");
        let reps = engine.replacements(r).expect("replacements");
        assert_eq!(reps.len(), 3);
        assert_eq!(engine.get_value(t, "sum"), Ok(Value::Int(6)));
        assert_eq!(engine.get_value(reps[2], "instance"), Ok(Value::Int(3)));
    }

    #[test]
    fn test_copy_shares_replacements() {
        let mut engine = load(2);
        let r = engine.find("r").expect("r");
        let c = engine.find("c").expect("c");
        assert_eq!(engine.replacements(c), engine.replacements(r));
    }

    #[test]
    fn test_reexpansion_reuses_kept_replacements() {
        let mut engine = load(2);
        let r = engine.find("r").expect("r");
        let t = engine.find("t").expect("t");
        let before = engine.replacements(r).expect("replacements");
        engine
            .apply_action(&Action::set_state_variable(before[0], "value", 10i64))
            .expect("set");
        engine
            .apply_action(&Action::set_state_variable(r, "count", 3i64))
            .expect("grow");
        let after = engine.replacements(r).expect("replacements");
        assert_eq!(after.len(), 3);
        assert_eq!(&after[..2], &before[..]);
        assert_eq!(engine.get_value(after[0], "value"), Ok(Value::Int(10)));
        assert_eq!(engine.get_value(t, "sum"), Ok(Value::Int(14)));

        engine
            .apply_action(&Action::set_state_variable(r, "count", 1i64))
            .expect("shrink");
        let shrunk = engine.replacements(r).expect("replacements");
        assert_eq!(shrunk, vec![before[0]]);
        assert_eq!(engine.get_value(t, "sum"), Ok(Value::Int(10)));
        let c = engine.find("c").expect("c");
        assert_eq!(engine.replacements(c), Ok(shrunk));
    }

    #[test]
    fn test_shrink_then_grow_restores_addresses() {
        let mut engine = load(3);
        let root = engine.root();
        let r = engine.find("r").expect("r");
        let t = engine.find("t").expect("t");
        let before = engine.replacements(r).expect("replacements");
        engine
            .apply_action(&Action::set_state_variable(before[2], "value", 5i64))
            .expect("set");

        engine
            .apply_action(&Action::set_state_variable(r, "count", 1i64))
            .expect("shrink");
        assert_eq!(engine.replacements(r), Ok(vec![before[0]]));
        assert!(engine.component(before[2]).is_some());
        assert_eq!(engine.resolve(root, "$r[3]"), Ok(None));

        engine
            .apply_action(&Action::set_state_variable(r, "count", 3i64))
            .expect("grow");
        assert_eq!(engine.replacements(r), Ok(before.clone()));
        assert_eq!(engine.get_value(before[2], "value"), Ok(Value::Int(5)));
        assert_eq!(engine.get_value(t, "sum"), Ok(Value::Int(9)));
        let resolved = engine.resolve(root, "$r[3]").expect("valid path");
        assert_eq!(resolved.map(|p| p.component), Some(before[2]));
    }

    #[test]
    fn test_reexpansion_evicts_resolutions_through_it() {
        let mut engine = load(2);
        let root = engine.root();
        let r = engine.find("r").expect("r");
        let second = engine.replacements(r).expect("replacements")[1];
        let resolved = engine.resolve(root, "$r[2]").expect("valid path");
        assert_eq!(resolved.map(|p| p.component), Some(second));
        let memoized = engine.resolver.memo_len();
        assert!(memoized >= 1);

        engine
            .apply_action(&Action::set_state_variable(r, "count", 1i64))
            .expect("shrink");
        engine.replacements(r).expect("replacements");
        assert!(engine.resolver.memo_len() < memoized);
        assert_eq!(engine.resolve(root, "$r[2]"), Ok(None));
    }

    #[test]
    fn test_negative_count_reported() {
        let mut engine = load(-1);
        let r = engine.find("r").expect("r");
        assert_eq!(engine.replacements(r), Ok(Vec::new()));
        assert_eq!(
            engine
                .diagnostics()
                .of_kind(DiagnosticKind::InvalidComposite)
                .count(),
            1
        );
    }
}
