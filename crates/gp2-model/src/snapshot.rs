use serde::{Deserialize, Serialize};

use crate::graph::{HostEdge, HostNode};

/// A value copy of the host graph at a moment in time.
///
/// Snapshots are full copies today. If host graphs grow large enough for
/// that to hurt, this can become a log of diffs as long as
/// [`HostGraph::snapshot`](crate::HostGraph::snapshot) and
/// [`HostGraph::restore`](crate::HostGraph::restore) keep their black-box
/// contracts.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<HostNode>,
    pub edges: Vec<HostEdge>,
}

impl GraphSnapshot {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }
}
