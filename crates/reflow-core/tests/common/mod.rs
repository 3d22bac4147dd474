//! Component types shared by the integration tests

#![allow(dead_code)]

use reflow_core::{
    ComponentTypeDef, CompositeDef, DependencySource, Document, DocumentNode, Engine, EngineConfig,
    Expr, PoolSource, StateVarDef, TypeRegistry, VariantDecl,
};

pub fn registry() -> TypeRegistry {
    let mut registry = TypeRegistry::new();
    let types = [
        ComponentTypeDef::new("document"),
        ComponentTypeDef::new("text")
            .with_state_variable("value", StateVarDef::essential_from("value", "")),
        ComponentTypeDef::new("mathInput")
            .with_state_variable("value", StateVarDef::essential_from("value", 0i64)),
        ComponentTypeDef::new("pair")
            .with_state_variable("x", StateVarDef::essential_from("x", 0i64))
            .with_state_variable(
                "y",
                StateVarDef::derived(Expr::add(Expr::dep("x"), Expr::lit(1i64)))
                    .with_dependency("x", DependencySource::StateVariable("x".into()))
                    .with_inverse("x", Expr::sub(Expr::Desired, Expr::lit(1i64))),
            ),
        ComponentTypeDef::new("select")
            .with_state_variable("numToSelect", StateVarDef::essential_from("numToSelect", 1i64))
            .with_state_variable(
                "withReplacement",
                StateVarDef::essential_from("withReplacement", false),
            )
            .with_state_variable(
                "indices",
                StateVarDef::derived(Expr::dep("picks"))
                    .with_dependency("picks", DependencySource::VariantSample),
            )
            .with_composite(CompositeDef::SelectChildren {
                indices: "indices".into(),
            })
            .with_variant(VariantDecl {
                pool: PoolSource::Children {
                    component_type: None,
                },
                count: Some("numToSelect".into()),
                with_replacement: Some("withReplacement".into()),
            }),
        ComponentTypeDef::new("points")
            .with_state_variable("a", StateVarDef::essential_from("a", 1i64))
            .with_state_variable("b", StateVarDef::essential_from("b", 2i64))
            .with_state_variable(
                "points",
                StateVarDef::derived(Expr::if_else(
                    Expr::Eq(Box::new(Expr::Index), Box::new(Expr::lit(0i64))),
                    Expr::dep("a"),
                    Expr::dep("b"),
                ))
                .with_array_size(Expr::lit(2i64))
                .with_dependency("a", DependencySource::StateVariable("a".into()))
                .with_dependency("b", DependencySource::StateVariable("b".into())),
            ),
        ComponentTypeDef::new("repeat")
            .with_state_variable("count", StateVarDef::essential_from("count", 1i64))
            .with_composite(CompositeDef::Repeat {
                count: "count".into(),
            }),
        ComponentTypeDef::new("copy").with_composite(CompositeDef::Copy {
            source: "source".into(),
        }),
        ComponentTypeDef::new("ref").with_state_variable(
            "shown",
            StateVarDef::derived(Expr::dep("target")).with_dependency(
                "target",
                DependencySource::AttributePath {
                    attribute: "target".into(),
                    variable: Some("value".into()),
                },
            ),
        ),
        ComponentTypeDef::new("mirror").with_state_variable(
            "v",
            StateVarDef::derived(Expr::dep("other")).with_dependency(
                "other",
                DependencySource::AttributePath {
                    attribute: "of".into(),
                    variable: Some("v".into()),
                },
            ),
        ),
    ];
    for ty in types {
        registry.register(ty).expect("register fixture type");
    }
    registry
}

pub fn text(value: &str) -> DocumentNode {
    DocumentNode::new("text").with_attribute("value", value)
}

/// `select` named `name` over texts with the given values
pub fn select(name: &str, values: &[&str]) -> DocumentNode {
    DocumentNode::new("select")
        .named(name)
        .with_children(values.iter().map(|v| text(v)))
}

pub fn load(document: &Document, variant: u64) -> Engine {
    Engine::new(document, registry(), EngineConfig::default(), variant).expect("load document")
}
