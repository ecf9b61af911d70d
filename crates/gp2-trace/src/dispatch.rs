//! Per-change effect resolution, shared by forward and backward motion.

use gp2_model::{HostEdge, HostGraph, HostNode};

use crate::highlighter::TraceDirection;
use crate::step::{EdgeRecord, GraphChange, NodeRecord};

/// Applies one graph change in the given direction.
///
/// Additions and deletions are mutual inverses keyed by id; relabels and
/// remarks select `new` vs `old` by direction; root flags toggle. A change
/// that refers to a missing id is logged and skipped so a damaged tracefile
/// degrades instead of aborting the run.
pub(crate) fn apply_change(
    graph: &mut HostGraph,
    change: &mut GraphChange,
    direction: TraceDirection,
) {
    let forward = direction == TraceDirection::Forward;
    let result = match change {
        GraphChange::Morphism(_) => Ok(()),
        GraphChange::AddNode(record) => {
            if forward {
                graph.add_node(node_from_record(record))
            } else {
                graph.remove_node(&record.id).map(drop)
            }
        }
        GraphChange::AddEdge(record) => {
            if forward {
                graph.add_edge(edge_from_record(record))
            } else {
                graph.remove_edge(&record.id).map(drop)
            }
        }
        GraphChange::DeleteNode(record) => {
            if forward {
                // Capture the live position so the reverse effect recreates
                // the node exactly where it was.
                if let Some(node) = graph.node(&record.id) {
                    record.pos = node.pos;
                }
                graph.remove_node(&record.id).map(drop)
            } else {
                graph.add_node(node_from_record(record))
            }
        }
        GraphChange::DeleteEdge(record) => {
            if forward {
                graph.remove_edge(&record.id).map(drop)
            } else {
                graph.add_edge(edge_from_record(record))
            }
        }
        GraphChange::RelabelNode { id, old, new } => {
            let label = if forward { new } else { old };
            graph.set_node_label(id, label.clone())
        }
        GraphChange::RelabelEdge { id, old, new } => {
            let label = if forward { new } else { old };
            graph.set_edge_label(id, label.clone())
        }
        GraphChange::RemarkNode { id, old, new } => {
            let mark = if forward { *new } else { *old };
            graph.set_node_mark(id, mark)
        }
        GraphChange::RemarkEdge { id, old, new } => {
            let mark = if forward { *new } else { *old };
            graph.set_edge_mark(id, mark)
        }
        GraphChange::SetRoot(id) => graph.set_root(id, forward),
        GraphChange::RemoveRoot(id) => graph.set_root(id, !forward),
    };

    if let Err(error) = result {
        log::warn!("skipping graph change that no longer applies: {error}");
    }
}

fn node_from_record(record: &NodeRecord) -> HostNode {
    HostNode {
        id: record.id.clone(),
        label: record.label.clone(),
        is_root: record.is_root,
        pos: record.pos,
    }
}

fn edge_from_record(record: &EdgeRecord) -> HostEdge {
    HostEdge {
        id: record.id.clone(),
        label: record.label.clone(),
        from: record.from.clone(),
        to: record.to.clone(),
    }
}
