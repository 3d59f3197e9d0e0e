use super::load_graph;
use crate::Context;
use anyhow::Result;

/// Print the dependency graph in Graphviz DOT format
pub fn run(ctx: &Context) -> Result<i32> {
    let graph = load_graph(ctx)?;
    print!("{}", graph.to_dot());
    Ok(0)
}
