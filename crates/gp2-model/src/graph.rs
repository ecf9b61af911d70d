use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::label::{Label, Mark};
use crate::snapshot::GraphSnapshot;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("no node with id `{0}`")]
    NodeNotFound(String),
    #[error("no edge with id `{0}`")]
    EdgeNotFound(String),
    #[error("node id `{0}` is already present")]
    DuplicateNode(String),
    #[error("edge id `{0}` is already present")]
    DuplicateEdge(String),
}

/// A node of the host graph.
///
/// `pos` is the renderer's placement, if one has been assigned. The replay
/// core never invents positions; it only carries them across delete/recreate
/// cycles so a reversed deletion puts the node back where it was.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HostNode {
    pub id: String,
    pub label: Label,
    pub is_root: bool,
    pub pos: Option<(f64, f64)>,
}

impl HostNode {
    pub fn new(id: impl Into<String>, label: Label) -> Self {
        HostNode {
            id: id.into(),
            label,
            is_root: false,
            pos: None,
        }
    }
}

/// A directed edge of the host graph, identified by id and keyed to its
/// endpoint node ids.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HostEdge {
    pub id: String,
    pub label: Label,
    pub from: String,
    pub to: String,
}

impl HostEdge {
    pub fn new(
        id: impl Into<String>,
        label: Label,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        HostEdge {
            id: id.into(),
            label,
            from: from.into(),
            to: to.into(),
        }
    }
}

/// The mutable graph a traced program transforms.
///
/// Nodes and edges are stored in id-keyed ordered maps, so enumeration order
/// is deterministic and equality is structural over the full node and edge
/// sets. Ids are opaque strings owned by the execution engine that produced
/// the trace; the replay core never mints ids of its own.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HostGraph {
    nodes: BTreeMap<String, HostNode>,
    edges: BTreeMap<String, HostEdge>,
}

impl HostGraph {
    pub fn new() -> Self {
        HostGraph::default()
    }

    pub fn node(&self, id: &str) -> Option<&HostNode> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut HostNode> {
        self.nodes.get_mut(id)
    }

    pub fn edge(&self, id: &str) -> Option<&HostEdge> {
        self.edges.get(id)
    }

    pub fn edge_mut(&mut self, id: &str) -> Option<&mut HostEdge> {
        self.edges.get_mut(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &HostNode> {
        self.nodes.values()
    }

    pub fn edges(&self) -> impl Iterator<Item = &HostEdge> {
        self.edges.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn add_node(&mut self, node: HostNode) -> Result<(), GraphError> {
        if self.nodes.contains_key(&node.id) {
            return Err(GraphError::DuplicateNode(node.id));
        }
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    pub fn remove_node(&mut self, id: &str) -> Result<HostNode, GraphError> {
        self.nodes
            .remove(id)
            .ok_or_else(|| GraphError::NodeNotFound(id.to_owned()))
    }

    pub fn add_edge(&mut self, edge: HostEdge) -> Result<(), GraphError> {
        if self.edges.contains_key(&edge.id) {
            return Err(GraphError::DuplicateEdge(edge.id));
        }
        self.edges.insert(edge.id.clone(), edge);
        Ok(())
    }

    pub fn remove_edge(&mut self, id: &str) -> Result<HostEdge, GraphError> {
        self.edges
            .remove(id)
            .ok_or_else(|| GraphError::EdgeNotFound(id.to_owned()))
    }

    pub fn set_node_label(&mut self, id: &str, label: Label) -> Result<(), GraphError> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| GraphError::NodeNotFound(id.to_owned()))?;
        node.label = label;
        Ok(())
    }

    pub fn set_edge_label(&mut self, id: &str, label: Label) -> Result<(), GraphError> {
        let edge = self
            .edges
            .get_mut(id)
            .ok_or_else(|| GraphError::EdgeNotFound(id.to_owned()))?;
        edge.label = label;
        Ok(())
    }

    pub fn set_node_mark(&mut self, id: &str, mark: Mark) -> Result<(), GraphError> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| GraphError::NodeNotFound(id.to_owned()))?;
        node.label.mark = mark;
        Ok(())
    }

    pub fn set_edge_mark(&mut self, id: &str, mark: Mark) -> Result<(), GraphError> {
        let edge = self
            .edges
            .get_mut(id)
            .ok_or_else(|| GraphError::EdgeNotFound(id.to_owned()))?;
        edge.label.mark = mark;
        Ok(())
    }

    pub fn set_root(&mut self, id: &str, is_root: bool) -> Result<(), GraphError> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| GraphError::NodeNotFound(id.to_owned()))?;
        node.is_root = is_root;
        Ok(())
    }

    /// Takes a value copy of the current node and edge sets.
    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            nodes: self.nodes.values().cloned().collect(),
            edges: self.edges.values().cloned().collect(),
        }
    }

    /// Replaces the entire graph contents with a previously taken snapshot.
    pub fn restore(&mut self, snapshot: &GraphSnapshot) {
        self.nodes = snapshot
            .nodes
            .iter()
            .map(|n| (n.id.clone(), n.clone()))
            .collect();
        self.edges = snapshot
            .edges
            .iter()
            .map(|e| (e.id.clone(), e.clone()))
            .collect();
    }
}
