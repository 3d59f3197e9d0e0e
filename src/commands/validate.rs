use super::load_graph;
use crate::Context;
use crate::ui;
use anyhow::Result;

/// Check declarations: syntax, references, duplicates and cycles
pub fn run(ctx: &Context) -> Result<i32> {
    let graph = load_graph(ctx)?;
    let edges = graph.edges().len();
    ui::success(&format!(
        "Declarations are valid ({} resources, {} dependencies)",
        graph.len(),
        edges
    ));
    Ok(0)
}
