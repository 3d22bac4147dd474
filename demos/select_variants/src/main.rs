//! Select Variants Demo
//!
//! Loads a quiz document from RON, walks its variants and pushes a value
//! through an inverse definition.
//!
//! Set `RUST_LOG=reflow_core=debug` to watch expansion and invalidation.

use reflow_core::{Action, Engine, Value};
use reflow_script::Loader;
use std::path::Path;
use tracing_subscriber::EnvFilter;

fn chosen(engine: &mut Engine, select: &str) -> reflow_core::Result<Vec<Value>> {
    let Some(o) = engine.find(select) else {
        return Ok(Vec::new());
    };
    engine
        .replacements(o)?
        .into_iter()
        .map(|r| engine.get_value(r, "value"))
        .collect()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    println!("=== Reflow Select Variants Demo ===\n");

    let mut loader = Loader::new();
    loader.load_directory(Path::new(env!("CARGO_MANIFEST_DIR")).join("data"))?;
    let defs = loader.finish();
    tracing::info!(
        types = defs.component_types.len(),
        documents = defs.documents.len(),
        "definitions loaded"
    );

    let first = defs.engine("quiz", 1)?;
    println!(
        "Document has {} variants (unique: {})\n",
        first.num_variants(),
        first.unique_variants()
    );

    for variant in 1..=first.num_variants() + 1 {
        let mut engine = defs.engine("quiz", variant)?;
        let picks = chosen(&mut engine, "color")?;
        let answer = match engine.find("answer") {
            Some(a) => engine.get_value(a, "shown")?,
            None => Value::Unresolved,
        };
        let picks: Vec<String> = picks.iter().map(ToString::to_string).collect();
        println!(
            "  variant {} ({}): color = [{}], answer = {}",
            variant,
            engine.variant_name(),
            picks.join(", "),
            answer
        );
    }

    println!("\nSetting p.y = 10 on variant 1...\n");

    let mut engine = first;
    let p = engine.find("p").ok_or("document has no component named p")?;
    engine.get_all_state_variables(None)?;
    let outcome = engine.apply_action(&Action::set_state_variable(p, "y", 10i64))?;

    for slot in &outcome.changed {
        println!("  changed: {}", slot);
    }
    for slot in &outcome.invalidated {
        println!("  invalidated: {}", slot);
    }
    println!(
        "\n  p.x = {}, p.y = {}",
        engine.get_value(p, "x")?,
        engine.get_value(p, "y")?
    );

    let diagnostics = engine.diagnostics();
    if !diagnostics.is_empty() {
        println!("\nDiagnostics:");
        for diagnostic in diagnostics.iter() {
            println!("  {}", diagnostic);
        }
    }

    println!("\n=== Demo Complete ===");
    Ok(())
}
