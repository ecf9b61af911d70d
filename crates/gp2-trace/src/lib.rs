//! Interactive, bidirectional replay of GP2 execution traces.
//!
//! A tracefile is an XML recording of one program run against a host graph.
//! This crate reconstructs the program state at any step of that run:
//!
//! - [`TraceParser`] pulls the XML apart into a flat sequence of
//!   [`TraceStep`]s, one per call, without reading ahead.
//! - [`TraceRunner`] is the user-facing undo/redo machine. It materializes
//!   the host graph at the current step, tracks the call context (loops,
//!   branches, procedures, rule applications), snapshots the graph before
//!   non-linear control constructs, and restores those snapshots when a
//!   branch or loop backtracks. Every forward operation has an exact
//!   inverse, so stepping is fully bidirectional.
//! - [`TraceHighlighter`] keeps a cursor into the tokenized source program
//!   in lockstep with the runner, bridging the skew between the flat token
//!   stream and the nested control structure.
//!
//! The host graph and token sequence are borrowed from the embedding editor
//! for the duration of a trace; see [`gp2_model`] for the shared data model.

mod dispatch;
mod error;
pub mod highlighter;
pub mod parser;
pub mod runner;
pub mod step;

pub use error::TraceError;
pub use highlighter::{TraceDirection, TraceHighlighter};
pub use parser::{ParseOutcome, TraceParser};
pub use runner::TraceRunner;
pub use step::{EdgeRecord, GraphChange, MorphismItem, NodeRecord, TraceStep, TraceStepKind};
