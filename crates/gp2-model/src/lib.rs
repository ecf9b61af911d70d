//! `gp2-model` defines the in-memory data structures shared by the GP2 trace
//! replay engine: the mutable host graph being transformed, value snapshots of
//! it, node/edge labels, and the tokenized source program.
//!
//! The crate is intentionally self-contained so it can be reused by:
//! - the trace replay layer (parsing, undo/redo, highlighting)
//! - graph renderers and editor surfaces via `serde` (JSON-safe schema)

mod graph;
mod label;
mod snapshot;
mod token;

pub use graph::{GraphError, HostEdge, HostGraph, HostNode};
pub use label::{Label, Mark};
pub use snapshot::GraphSnapshot;
pub use token::{Lexeme, Token};
