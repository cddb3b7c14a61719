use crate::gfa::read_gfa_file;
use crate::graph::Graph;
use std::io::{self, Write};

/// Print node, edge and path statistics of a GFA graph.
pub fn run_stats(gfa_file: &str) -> io::Result<()> {
    let graph = read_gfa_file(gfa_file)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    write_stats(&graph, &mut out)
}

pub fn write_stats<W: Write>(graph: &Graph, out: &mut W) -> io::Result<()> {
    writeln!(out, "Number of nodes: {}", graph.node_count())?;
    writeln!(out, "Number of edges: {}", graph.edge_count())?;
    writeln!(out, "Total sequence length: {} bp", graph.total_length())?;

    let mut names: Vec<&str> = graph.path_names().collect();
    names.sort_by(|a, b| natord::compare(a, b));
    writeln!(out, "Number of paths: {}", names.len())?;
    for name in names {
        let steps = graph.path(name).map_or(0, |p| p.len());
        let length: usize = graph
            .path(name)
            .into_iter()
            .flatten()
            .map(|h| graph.node_len(h.node))
            .sum();
        writeln!(out, "{}\t{} steps\t{} bp", name, steps, length)?;
    }
    Ok(())
}
