//! The parsed trace data model: one [`TraceStep`] per program event, each
//! carrying zero or more reversible [`GraphChange`]s.

use gp2_model::{GraphSnapshot, Label, Mark};

/// Discriminant for every event a tracefile can record.
///
/// Most kinds open a *context* that is closed later by a matching step with
/// `end_of_context` set; see [`TraceStepKind::is_context`]. `RuleMatch`,
/// `RuleMatchFailed`, `RuleApplication`, `Skip`, `Break` and `Fail` are
/// leaves, and `Unknown` marks an unrecognised element.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TraceStepKind {
    Rule,
    RuleMatch,
    RuleMatchFailed,
    RuleApplication,
    RuleSet,
    Loop,
    LoopIteration,
    Procedure,
    If,
    Try,
    BranchCondition,
    Then,
    Else,
    Or,
    OrLeft,
    OrRight,
    Skip,
    Break,
    Fail,
    Unknown,
}

impl TraceStepKind {
    /// Converts an XML tag name to a step kind. `<match>` maps to
    /// [`RuleMatch`](TraceStepKind::RuleMatch); the parser downgrades it to
    /// `RuleMatchFailed` when the `success` attribute says so.
    pub fn from_tag(tag: &[u8]) -> Self {
        match tag {
            b"rule" => TraceStepKind::Rule,
            b"match" => TraceStepKind::RuleMatch,
            b"apply" => TraceStepKind::RuleApplication,
            b"ruleset" => TraceStepKind::RuleSet,
            b"loop" => TraceStepKind::Loop,
            b"iteration" => TraceStepKind::LoopIteration,
            b"procedure" => TraceStepKind::Procedure,
            b"if" => TraceStepKind::If,
            b"try" => TraceStepKind::Try,
            b"condition" => TraceStepKind::BranchCondition,
            b"then" => TraceStepKind::Then,
            b"else" => TraceStepKind::Else,
            b"or" => TraceStepKind::Or,
            b"leftBranch" => TraceStepKind::OrLeft,
            b"rightBranch" => TraceStepKind::OrRight,
            b"skip" => TraceStepKind::Skip,
            b"break" => TraceStepKind::Break,
            b"fail" => TraceStepKind::Fail,
            _ => TraceStepKind::Unknown,
        }
    }

    /// Kinds that open a context and are matched by a later step with
    /// `end_of_context` set.
    pub fn is_context(self) -> bool {
        matches!(
            self,
            TraceStepKind::Rule
                | TraceStepKind::RuleSet
                | TraceStepKind::Loop
                | TraceStepKind::LoopIteration
                | TraceStepKind::Procedure
                | TraceStepKind::If
                | TraceStepKind::Try
                | TraceStepKind::BranchCondition
                | TraceStepKind::Then
                | TraceStepKind::Else
                | TraceStepKind::Or
                | TraceStepKind::OrLeft
                | TraceStepKind::OrRight
        )
    }
}

/// Node payload of a creation or deletion record.
///
/// `pos` is unset when parsed; for deletions the runner copies the node's
/// live position into it just before removal, so the reverse effect can
/// recreate the node in place.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeRecord {
    pub id: String,
    pub label: Label,
    pub is_root: bool,
    pub pos: Option<(f64, f64)>,
}

/// Edge payload of a creation or deletion record.
#[derive(Clone, Debug, PartialEq)]
pub struct EdgeRecord {
    pub id: String,
    pub label: Label,
    pub from: String,
    pub to: String,
}

/// One element of a rule-match morphism: the id of a matched node or edge.
///
/// Only the id is recorded; a UI wanting labels or positions cross-references
/// the current graph.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MorphismItem {
    Node(String),
    Edge(String),
}

impl MorphismItem {
    pub fn id(&self) -> &str {
        match self {
            MorphismItem::Node(id) | MorphismItem::Edge(id) => id,
        }
    }
}

/// A reversible host-graph mutation recorded by a rule application, or a
/// morphism item recorded by a rule match.
///
/// Each variant captures enough payload to apply the mutation forward and to
/// invert it exactly when stepping backward.
#[derive(Clone, Debug, PartialEq)]
pub enum GraphChange {
    /// Informational only: part of a match morphism, no graph effect.
    Morphism(MorphismItem),
    AddNode(NodeRecord),
    AddEdge(EdgeRecord),
    DeleteNode(NodeRecord),
    DeleteEdge(EdgeRecord),
    RelabelNode { id: String, old: Label, new: Label },
    RelabelEdge { id: String, old: Label, new: Label },
    RemarkNode { id: String, old: Mark, new: Mark },
    RemarkEdge { id: String, old: Mark, new: Mark },
    SetRoot(String),
    RemoveRoot(String),
}

/// One parsed trace event.
///
/// Steps are created by the parser and appended once to the runner's buffer;
/// they are never removed. During forward motion the runner patches the
/// fields that record reversibility data: deletion positions inside
/// `changes`, `snapshot`, `virtual_step` and `loop_boundary`. Backward
/// motion only reads.
#[derive(Clone, Debug, PartialEq)]
pub struct TraceStep {
    pub kind: TraceStepKind,
    /// Rule or procedure name; empty for every other kind.
    pub context_name: String,
    pub end_of_context: bool,
    /// Set on the iteration-end step adjacent to its loop's end step; the
    /// highlighter uses it to advance past the loop.
    pub loop_boundary: bool,
    /// Set when the step only exists because the compiler synthesized it
    /// (e.g. the `else { skip }` inserted for an else-less `if`); such steps
    /// have no corresponding source token.
    pub virtual_step: bool,
    pub changes: Vec<GraphChange>,
    /// Reversibility data captured by the runner during forward motion:
    /// either the pre-restore graph for steps whose forward pass restored a
    /// snapshot, or a snapshot parked off the stack for steps whose forward
    /// pass popped one without restoring it.
    pub snapshot: Option<GraphSnapshot>,
}

impl TraceStep {
    pub fn new(kind: TraceStepKind) -> Self {
        TraceStep {
            kind,
            context_name: String::new(),
            end_of_context: false,
            loop_boundary: false,
            virtual_step: false,
            changes: Vec::new(),
            snapshot: None,
        }
    }

    /// A step closing the context opened by an earlier `kind` step.
    pub fn end_of(kind: TraceStepKind) -> Self {
        TraceStep {
            end_of_context: true,
            ..TraceStep::new(kind)
        }
    }

    pub fn has_snapshot(&self) -> bool {
        self.snapshot.is_some()
    }
}
