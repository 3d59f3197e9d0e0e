//! Command implementations
//!
//! Every command returns the process exit code on success; errors bubble up
//! to `main` and exit with 1.

pub mod apply;
pub mod destroy;
pub mod graph;
pub mod plan;
pub mod state;
pub mod validate;

use crate::Context;
use crate::schema;
use crate::ui;
use anyhow::{Context as AnyhowContext, Result};
use declarative::{FileStore, Graph, StateStore, Target};

/// Load declarations and build the dependency graph
pub fn load_graph(ctx: &Context) -> Result<Graph> {
    let resources = schema::load(&ctx.files)?;
    let graph = Graph::build(resources).context("Invalid resource graph")?;
    log::info!("Loaded {} resources", graph.len());
    Ok(graph)
}

/// Open the configured state file
pub fn open_store(ctx: &Context) -> Result<FileStore> {
    let path = ctx.state_path();
    FileStore::open(&path).with_context(|| format!("Could not open state {}", path.display()))
}

/// Parse `--target` values
pub fn targets(raw: &[String]) -> Vec<Target> {
    raw.iter().map(|t| Target::parse(t)).collect()
}

/// Warn about failures left by earlier runs
pub fn report_previous_failures(ctx: &Context, store: &dyn StateStore) -> Result<()> {
    let failures = store.failures()?;
    if failures.is_empty() || ctx.quiet {
        return Ok(());
    }
    ui::warn(&format!("{} resources failed in a previous run:", failures.len()));
    for (id, failure) in &failures {
        ui::dim(&format!(
            "{} ({}): {}",
            id,
            ui::timestamp(&failure.at),
            failure.error
        ));
    }
    Ok(())
}
