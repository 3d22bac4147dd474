//! Document-level behaviour: variants, references, actions, expansion

mod common;

use common::{load, select, text};
use reflow_core::{
    Action, DiagnosticKind, Document, DocumentNode, Engine, Error, Origin, ResolvedPath,
    SlotKey, SlotRef, SourcePosition, Value,
};
use std::collections::HashSet;

const SIX: [&str; 6] = ["a", "b", "c", "d", "e", "f"];

fn chosen(engine: &mut Engine, select: &str) -> Vec<Value> {
    let o = engine.find(select).expect("select");
    let reps = engine.replacements(o).expect("replacements");
    reps.into_iter()
        .map(|r| engine.get_value(r, "value").expect("value"))
        .collect()
}

#[test]
fn six_options_enumerate_then_cycle() {
    let doc = Document::new(DocumentNode::new("document").with_child(select("o", &SIX)));
    let picks: Vec<Vec<Value>> = (1..=7)
        .map(|variant| {
            let mut engine = load(&doc, variant);
            assert_eq!(engine.num_variants(), 6);
            assert!(engine.unique_variants());
            chosen(&mut engine, "o")
        })
        .collect();

    let distinct: HashSet<String> = picks[..6].iter().map(|p| format!("{:?}", p)).collect();
    assert_eq!(distinct.len(), 6);
    assert!(picks.iter().all(|p| p.len() == 1));
    assert_eq!(picks[6], picks[0]);
}

#[test]
fn two_selects_cover_every_combination() {
    let doc = Document::new(
        DocumentNode::new("document")
            .with_child(select("left", &["a", "b", "c"]))
            .with_child(select("right", &["x", "y"])),
    );
    let mut seen = HashSet::new();
    for variant in 1..=6 {
        let mut engine = load(&doc, variant);
        let pair = (chosen(&mut engine, "left"), chosen(&mut engine, "right"));
        seen.insert(format!("{:?}", pair));
    }
    assert_eq!(seen.len(), 6);
}

#[test]
fn selection_without_replacement_has_no_duplicates() {
    let doc = Document::new(
        DocumentNode::new("document")
            .with_child(select("o", &SIX).with_attribute("numToSelect", 3i64)),
    );
    for variant in 1..=10 {
        let mut engine = load(&doc, variant);
        let o = engine.find("o").expect("o");
        let templates: HashSet<_> = engine
            .replacements(o)
            .expect("replacements")
            .into_iter()
            .filter_map(|r| match engine.component(r).map(|c| &c.origin) {
                Some(Origin::Replacement { template, .. }) => Some(*template),
                _ => None,
            })
            .collect();
        assert_eq!(templates.len(), 3, "variant {}", variant);
    }
}

#[test]
fn selection_with_replacement_allows_repeats() {
    let doc = Document::new(
        DocumentNode::new("document").with_child(
            select("o", &["a", "b", "c"])
                .with_attribute("numToSelect", 2i64)
                .with_attribute("withReplacement", true),
        ),
    );
    let mut seen = HashSet::new();
    let mut repeats = 0;
    for variant in 1..=9 {
        let mut engine = load(&doc, variant);
        assert_eq!(engine.num_variants(), 9);
        let picks = chosen(&mut engine, "o");
        assert_eq!(picks.len(), 2);
        if picks[0] == picks[1] {
            repeats += 1;
        }
        seen.insert(format!("{:?}", picks));
    }
    assert_eq!(seen.len(), 9);
    assert_eq!(repeats, 3);
}

#[test]
fn selecting_more_than_available_expands_to_nothing() {
    let doc = Document::new(
        DocumentNode::new("document")
            .with_child(select("o", &["a", "b", "c"]).with_attribute("numToSelect", 4i64)),
    );
    let mut engine = load(&doc, 1);
    let o = engine.find("o").expect("o");
    assert_eq!(engine.replacements(o), Ok(Vec::new()));
    assert!(
        engine
            .diagnostics()
            .of_kind(DiagnosticKind::InvalidComposite)
            .count()
            >= 1
    );
}

#[test]
fn array_elements_invalidate_independently() {
    let doc = Document::new(
        DocumentNode::new("document").with_child(DocumentNode::new("points").named("p")),
    );
    let mut engine = load(&doc, 1);
    let p = engine.find("p").expect("p");
    assert_eq!(
        engine.get_value(p, "points"),
        Ok(Value::List(vec![Value::Int(1), Value::Int(2)]))
    );

    let outcome = engine
        .apply_action(&Action::set_state_variable(p, "a", 5i64))
        .expect("set a");
    let invalidated: HashSet<SlotRef> = outcome.invalidated.into_iter().collect();
    let expected: HashSet<SlotRef> = [
        SlotRef::new(p, SlotKey::element("points", 0)),
        SlotRef::new(p, "points"),
    ]
    .into_iter()
    .collect();
    assert_eq!(invalidated, expected);
    assert_eq!(engine.get_value(p, SlotKey::element("points", 1)), Ok(Value::Int(2)));
    assert_eq!(
        engine.get_value(p, "points"),
        Ok(Value::List(vec![Value::Int(5), Value::Int(2)]))
    );
}

#[test]
fn changing_selection_size_back_restores_addresses() {
    let doc = Document::new(
        DocumentNode::new("document")
            .with_child(select("o", &SIX).with_attribute("numToSelect", 2i64)),
    );
    let mut engine = load(&doc, 4);
    let o = engine.find("o").expect("o");
    let before = engine.replacements(o).expect("replacements");
    let picks = chosen(&mut engine, "o");
    assert_eq!(before.len(), 2);

    engine
        .apply_action(&Action::set_state_variable(o, "numToSelect", 1i64))
        .expect("shrink");
    assert_eq!(engine.replacements(o).map(|r| r.len()), Ok(1));

    engine
        .apply_action(&Action::set_state_variable(o, "numToSelect", 2i64))
        .expect("grow");
    assert_eq!(engine.replacements(o), Ok(before));
    assert_eq!(chosen(&mut engine, "o"), picks);
}

#[test]
fn same_variant_same_document() {
    let doc = Document::new(
        DocumentNode::new("document")
            .with_child(select("o", &SIX).with_attribute("numToSelect", 2i64))
            .with_child(DocumentNode::new("pair").named("p").with_attribute("x", 2i64)),
    );
    let snapshot = |variant| {
        let mut engine = load(&doc, variant);
        let state = engine.get_all_state_variables(None).expect("snapshot");
        ron::to_string(&state).expect("serialize")
    };
    assert_eq!(snapshot(3), snapshot(3));
    assert_eq!(snapshot(103), snapshot(103));
}

#[test]
fn reference_addresses_the_same_replacement() {
    let doc = Document::new(
        DocumentNode::new("document")
            .with_child(select("o", &["p", "q", "r"]))
            .with_child(DocumentNode::new("ref").named("show").with_attribute("target", "$o[1]"))
            .with_child(DocumentNode::new("mathInput").named("m")),
    );
    let mut engine = load(&doc, 2);
    let root = engine.root();
    let o = engine.find("o").expect("o");
    let show = engine.find("show").expect("show");
    let m = engine.find("m").expect("m");

    let first = engine.replacements(o).expect("replacements")[0];
    let resolved = engine.resolve(root, "$o[1]").expect("valid path");
    assert_eq!(
        resolved,
        Some(ResolvedPath {
            component: first,
            variable: None
        })
    );
    let before = engine.get_value(first, "value").expect("value");
    assert_eq!(engine.get_value(show, "shown"), Ok(before.clone()));

    engine
        .apply_action(&Action::set_state_variable(m, "value", 42i64))
        .expect("unrelated input");
    assert_eq!(engine.replacements(o).expect("replacements")[0], first);
    assert_eq!(engine.resolve(root, "$o[1]"), Ok(resolved));
    assert_eq!(engine.get_value(show, "shown"), Ok(before));
}

#[test]
fn copy_never_resamples() {
    let doc = Document::new(
        DocumentNode::new("document")
            .with_child(select("o", &SIX).with_attribute("numToSelect", 2i64))
            .with_child(DocumentNode::new("copy").named("c").with_attribute("source", "$o"))
            .with_child(DocumentNode::new("mathInput").named("m")),
    );
    let mut engine = load(&doc, 4);
    let o = engine.find("o").expect("o");
    let c = engine.find("c").expect("c");
    let m = engine.find("m").expect("m");

    let original = engine.replacements(o).expect("replacements");
    assert_eq!(engine.replacements(c), Ok(original.clone()));
    engine
        .apply_action(&Action::set_state_variable(m, "value", 7i64))
        .expect("unrelated input");
    assert_eq!(engine.replacements(c), Ok(original.clone()));
    assert_eq!(engine.replacements(o), Ok(original));
}

#[test]
fn setting_y_pushes_into_x() {
    let doc = Document::new(
        DocumentNode::new("document")
            .with_child(DocumentNode::new("pair").named("p").with_attribute("x", 1i64)),
    );
    let mut engine = load(&doc, 1);
    let p = engine.find("p").expect("p");
    assert_eq!(engine.get_value(p, "y"), Ok(Value::Int(2)));

    engine
        .apply_action(&Action::set_state_variable(p, "y", 5i64))
        .expect("set y");
    assert_eq!(engine.get_value(p, "x"), Ok(Value::Int(4)));
    assert_eq!(engine.get_value(p, "y"), Ok(Value::Int(5)));
}

#[test]
fn invalidation_reaches_only_dependents() {
    let doc = Document::new(
        DocumentNode::new("document")
            .with_child(DocumentNode::new("pair").named("p"))
            .with_child(DocumentNode::new("pair").named("q")),
    );
    let mut engine = load(&doc, 1);
    let p = engine.find("p").expect("p");
    let q = engine.find("q").expect("q");
    engine.get_all_state_variables(None).expect("read everything");

    let unchanged = engine
        .apply_action(&Action::set_state_variable(p, "x", 0i64))
        .expect("same value");
    assert!(unchanged.changed.is_empty());
    assert!(unchanged.invalidated.is_empty());

    let outcome = engine
        .apply_action(&Action::set_state_variable(p, "x", 10i64))
        .expect("new value");
    assert_eq!(outcome.changed, vec![SlotRef::new(p, "x")]);
    assert_eq!(outcome.invalidated, vec![SlotRef::new(p, "y")]);
    assert_eq!(engine.last_invalidated(), outcome.invalidated);
    assert_eq!(engine.get_value(q, "y"), Ok(Value::Int(1)));
    assert_eq!(engine.get_value(p, "y"), Ok(Value::Int(11)));
}

#[test]
fn cycle_through_references_is_contained() {
    let doc = Document::new(
        DocumentNode::new("document")
            .with_child(DocumentNode::new("mirror").named("a").with_attribute("of", "$b"))
            .with_child(DocumentNode::new("mirror").named("b").with_attribute("of", "$a"))
            .with_child(DocumentNode::new("pair").named("p").with_attribute("x", 1i64)),
    );
    let mut engine = load(&doc, 1);
    let a = engine.find("a").expect("a");
    let p = engine.find("p").expect("p");
    assert_eq!(engine.get_value(a, "v"), Ok(Value::Unresolved));
    assert!(
        engine
            .diagnostics()
            .of_kind(DiagnosticKind::CyclicDependency)
            .count()
            >= 1
    );
    assert_eq!(engine.get_value(p, "y"), Ok(Value::Int(2)));
}

#[test]
fn uninvertible_action_changes_nothing() {
    let doc = Document::new(
        DocumentNode::new("document")
            .with_child(DocumentNode::new("mathInput").named("m").with_attribute("value", 3i64))
            .with_child(DocumentNode::new("ref").named("show").with_attribute("target", "$m")),
    );
    let mut engine = load(&doc, 1);
    let show = engine.find("show").expect("show");
    let before = engine.get_all_state_variables(None).expect("snapshot");

    let result = engine.apply_action(&Action::set_state_variable(show, "shown", 9i64));
    assert!(matches!(result, Err(Error::Uninvertible { .. })));
    assert_eq!(engine.get_all_state_variables(None), Ok(before));
}

#[test]
fn unresolved_reference_reports_position_and_recovers() {
    let doc = Document::new(
        DocumentNode::new("document")
            .with_child(
                DocumentNode::new("repeat")
                    .named("r")
                    .with_attribute("count", 0i64)
                    .with_child(
                        DocumentNode::new("mathInput")
                            .named("item")
                            .with_attribute("value", 5i64),
                    ),
            )
            .with_child(
                DocumentNode::new("ref")
                    .named("show")
                    .with_attribute("target", "$r.item")
                    .at(7, 3),
            ),
    );
    let mut engine = load(&doc, 1);
    let r = engine.find("r").expect("r");
    let show = engine.find("show").expect("show");

    assert_eq!(engine.get_value(show, "shown"), Ok(Value::Unresolved));
    let unresolved: Vec<_> = engine
        .diagnostics()
        .of_kind(DiagnosticKind::UnresolvedPath)
        .collect();
    assert_eq!(unresolved.len(), 1);
    assert_eq!(unresolved[0].position, Some(SourcePosition::new(7, 3)));

    engine
        .apply_action(&Action::set_state_variable(r, "count", 1i64))
        .expect("grow");
    assert_eq!(engine.get_value(show, "shown"), Ok(Value::Int(5)));
}

#[test]
fn malformed_path_is_an_error() {
    let doc = Document::new(DocumentNode::new("document").with_child(text("a")));
    let mut engine = load(&doc, 1);
    let root = engine.root();
    assert!(matches!(
        engine.resolve(root, "$x[0]"),
        Err(Error::InvalidPath { .. })
    ));
    assert_eq!(engine.resolve(root, "$missing"), Ok(None));
}

#[test]
fn queued_actions_apply_in_order() {
    let doc = Document::new(
        DocumentNode::new("document").with_child(DocumentNode::new("pair").named("p")),
    );
    let mut engine = load(&doc, 1);
    let p = engine.find("p").expect("p");
    engine.send(Action::set_state_variable(p, "x", 1i64));
    engine.send(Action::set_state_variable(p, "y", 10i64));
    engine.send(Action::set_state_variable(p, "x", 2i64));
    assert_eq!(engine.pending_actions(), 3);

    let results = engine.process_queue();
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(Result::is_ok));
    assert_eq!(engine.pending_actions(), 0);
    assert_eq!(engine.get_value(p, "x"), Ok(Value::Int(2)));
    assert_eq!(engine.get_value(p, "y"), Ok(Value::Int(3)));
}
