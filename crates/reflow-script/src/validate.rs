//! Static checks on registered component types
//!
//! Catches references that would otherwise only surface as evaluation
//! diagnostics at runtime: expressions reading undeclared dependencies,
//! inverse writes through unknown dependencies, and composite, variant or
//! action declarations naming state variables the type does not have.

use crate::error::{Error, Result};
use reflow_core::{
    ActionStep, ComponentTypeDef, CompositeDef, Expr, PoolSource, StateVarKind, TypeRegistry,
};

/// Problems found in one component type
pub fn check_type(def: &ComponentTypeDef) -> Vec<String> {
    let mut problems = Vec::new();
    let has_var = |name: &str| def.state_variables.contains_key(name);

    for (name, var) in &def.state_variables {
        let mut exprs: Vec<&Expr> = Vec::new();
        if let StateVarKind::Derived { definition } = &var.kind {
            exprs.push(definition);
        }
        exprs.extend(var.array_size.iter());
        for write in var.inverse.iter().flatten() {
            exprs.push(&write.value);
            exprs.extend(write.when.iter());
            exprs.extend(write.index.iter());
            if !var.dependencies.contains_key(&write.dependency) {
                problems.push(format!(
                    "{}.{}: inverse writes through undeclared dependency {}",
                    def.id, name, write.dependency
                ));
            }
        }
        for expr in exprs {
            for dep in expr.referenced_dependencies() {
                if !var.dependencies.contains_key(dep) {
                    problems.push(format!(
                        "{}.{}: reads undeclared dependency {}",
                        def.id, name, dep
                    ));
                }
            }
        }
        if var.inverse.is_some() && !matches!(var.kind, StateVarKind::Derived { .. }) {
            problems.push(format!(
                "{}.{}: only derived variables take an inverse",
                def.id, name
            ));
        }
        if var.array_size.is_some() && !matches!(var.kind, StateVarKind::Derived { .. }) {
            problems.push(format!(
                "{}.{}: only derived variables can be arrays",
                def.id, name
            ));
        }
    }

    let mut require = |what: &str, variable: &str| {
        if !has_var(variable) {
            problems.push(format!(
                "{}: {} names unknown state variable {}",
                def.id, what, variable
            ));
        }
    };

    match &def.composite {
        Some(CompositeDef::SelectChildren { indices }) => require("composite", indices.as_str()),
        Some(CompositeDef::Repeat { count }) => require("composite", count.as_str()),
        Some(CompositeDef::Copy { .. }) | None => {}
    }

    if let Some(variant) = &def.variant {
        if let PoolSource::Variable(variable) = &variant.pool {
            require("variant pool", variable.as_str());
        }
        for variable in variant.count.iter().chain(variant.with_replacement.iter()) {
            require("variant", variable.as_str());
        }
    }

    for (action, steps) in &def.actions {
        for step in &steps.steps {
            let (variable, exprs): (&String, Vec<&Expr>) = match step {
                ActionStep::Set {
                    variable,
                    index,
                    value,
                } => (variable, std::iter::once(value).chain(index.iter()).collect()),
                ActionStep::Trigger { variable } => (variable, Vec::new()),
            };
            require(&format!("action {}", action), variable.as_str());
            for expr in exprs {
                for dep in expr.referenced_dependencies() {
                    require(&format!("action {}", action), dep);
                }
            }
        }
    }

    problems
}

/// Check every type of a registry, reporting all problems together
pub fn validate_registry(registry: &TypeRegistry) -> Result<()> {
    let problems: Vec<String> = registry.iter().flat_map(|def| check_type(def)).collect();
    if problems.is_empty() {
        Ok(())
    } else {
        for problem in &problems {
            tracing::warn!(%problem, "invalid component type");
        }
        Err(Error::InvalidSchema(problems.join("; ")))
    }
}
