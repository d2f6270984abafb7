//! Graphviz debug output. The engine does not render shapes; this is the
//! inspection aid used by tests and by hosts that want to eyeball a
//! derivation.

use crate::graph::ShapeGraph;
use petgraph::dot;
use petgraph::dot::Dot;
use petgraph::visit::EdgeRef;

impl ShapeGraph {
    pub fn dot(&self) -> String {
        format!(
            "{:?}",
            Dot::with_attr_getters(
                self.petgraph(),
                &[dot::Config::EdgeNoLabel, dot::Config::NodeNoLabel],
                &|_, edge_ref| {
                    let edge = edge_ref.weight();
                    let dbg_attr_format = format!("{} {:?}", edge.kind, edge.attrs);
                    let dbg_attr_replaced = dbg_attr_format.escape_debug();
                    format!("label = \"{dbg_attr_replaced}\"")
                },
                &|_, (node_idx, node)| {
                    let dbg_attr_format = format!("{} {:?}", node.tag, node.attrs);
                    let dbg_attr_replaced = dbg_attr_format.escape_debug();
                    format!("label = \"{}|{dbg_attr_replaced}\"", node_idx.index())
                }
            )
        )
    }
}

/// Accumulates dot snapshots of a graph across derivation steps, separated by
/// `---` markers.
pub struct DotCollector {
    dot: String,
}

impl DotCollector {
    pub fn new() -> Self {
        DotCollector { dot: String::new() }
    }

    pub fn collect(&mut self, graph: &ShapeGraph) {
        if !self.dot.is_empty() {
            self.dot.push_str("\n---\n");
        }
        self.dot.push_str(&graph.dot());
    }

    pub fn finalize(&self) -> String {
        self.dot.clone()
    }
}

impl Default for DotCollector {
    fn default() -> Self {
        DotCollector::new()
    }
}
