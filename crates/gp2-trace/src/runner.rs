//! The user-facing replay machine.
//!
//! The runner pulls steps lazily from the parser into a growing buffer and
//! walks a cursor over it. Forward motion applies graph changes and
//! maintains three stacks:
//!
//! - a *context stack* of the currently open program constructs,
//! - a *snapshot stack* of graph copies taken before non-linear constructs
//!   (`if`/`try` conditions and loop iterations) so their effects can be
//!   discarded when the construct backtracks,
//! - a *loop-success stack* with one flag per open iteration, recording
//!   whether a failure inside it already consumed its snapshot.
//!
//! Backward motion never re-parses and never fails mid-trace: everything it
//! needs was captured on the forward pass, either in the buffered steps or
//! in snapshots parked on them. Every forward stack effect is mirrored
//! exactly, so interleaving directions cannot corrupt the stacks.

use std::path::Path;

use gp2_model::{GraphSnapshot, HostGraph, Token};

use crate::dispatch::apply_change;
use crate::highlighter::{TraceDirection, TraceHighlighter};
use crate::parser::{ParseOutcome, TraceParser};
use crate::step::{TraceStep, TraceStepKind};

/// Drives one recorded trace against a borrowed host graph and token
/// sequence. Both are exclusively held for the lifetime of the runner.
pub struct TraceRunner<'a> {
    graph: &'a mut HostGraph,
    parser: Option<TraceParser>,
    highlighter: TraceHighlighter<'a>,
    steps: Vec<TraceStep>,
    /// Index of the next step to apply on a forward move.
    cursor: usize,
    context_stack: Vec<TraceStepKind>,
    snapshot_stack: Vec<GraphSnapshot>,
    loop_success_stack: Vec<bool>,
    parse_complete: bool,
    parse_failed: bool,
    initialised: bool,
    info_message: String,
    error: String,
}

impl<'a> TraceRunner<'a> {
    /// Opens `tracefile` and positions the trace at its first step. On any
    /// failure the runner is left uninitialised with the error recorded; no
    /// other operation is allowed then.
    pub fn new(
        tracefile: impl AsRef<Path>,
        graph: &'a mut HostGraph,
        tokens: &'a mut [Token],
    ) -> Self {
        let mut runner = TraceRunner {
            graph,
            parser: None,
            highlighter: TraceHighlighter::new(tokens),
            steps: Vec::new(),
            cursor: 0,
            context_stack: Vec::new(),
            snapshot_stack: Vec::new(),
            loop_success_stack: Vec::new(),
            parse_complete: false,
            parse_failed: false,
            initialised: false,
            info_message: String::new(),
            error: String::new(),
        };

        match TraceParser::open(tracefile) {
            Ok(parser) => runner.parser = Some(parser),
            Err(error) => {
                runner.error = error.to_string();
                return runner;
            }
        }

        // Pull the first step so there is something to point at.
        if !runner.parse_ahead() {
            return runner;
        }
        runner.initialised = true;
        if !runner.steps.is_empty() {
            runner.notify_highlighter(TraceDirection::Forward);
        }
        runner
    }

    /// The graph being replayed into.
    pub fn graph(&self) -> &HostGraph {
        self.graph
    }

    /// False when construction failed; no stepping is allowed then.
    pub fn initialised(&self) -> bool {
        self.initialised
    }

    /// Advisory text describing the most recent restore or failed match.
    pub fn info_message(&self) -> &str {
        &self.info_message
    }

    /// Description of the most recent failure, for display next to a `false`
    /// return.
    pub fn last_error(&self) -> &str {
        &self.error
    }

    pub fn forward_available(&self) -> bool {
        self.initialised
            && !(self.cursor >= self.steps.len() && (self.parse_complete || self.parse_failed))
    }

    pub fn backward_available(&self) -> bool {
        self.initialised && self.cursor > 0
    }

    /// True when the pending step is a rule match whose morphism can be
    /// shown.
    pub fn find_match_available(&self) -> bool {
        matches!(
            self.steps.get(self.cursor).map(|s| s.kind),
            Some(TraceStepKind::RuleMatch) | Some(TraceStepKind::RuleMatchFailed)
        )
    }

    /// True when the pending step applies the previously shown match.
    pub fn apply_match_available(&self) -> bool {
        matches!(
            self.steps.get(self.cursor).map(|s| s.kind),
            Some(TraceStepKind::RuleApplication)
        )
    }

    /// The pending step (the one a forward move would apply next), if any.
    pub fn current_step(&self) -> Option<&TraceStep> {
        self.steps.get(self.cursor)
    }

    /// The source token the trace cursor currently points at.
    pub fn highlighted_token(&self) -> Option<usize> {
        self.highlighter.highlighted()
    }

    /// Depth of the open-construct stack; exposed for balance checks.
    pub fn context_depth(&self) -> usize {
        self.context_stack.len()
    }

    /// Depth of the snapshot stack; exposed for balance checks.
    pub fn snapshot_depth(&self) -> usize {
        self.snapshot_stack.len()
    }

    /// Applies the pending step and advances the cursor. Returns `false` at
    /// the end of the trace or when parsing ahead fails; `last_error` then
    /// explains.
    pub fn step_forward(&mut self) -> bool {
        self.info_message.clear();
        if !self.initialised {
            self.error = "trace is not initialised".into();
            return false;
        }
        if !self.forward_available() {
            self.error = "already at the end of the trace".into();
            return false;
        }

        self.backtrack_on_failed_match();

        let kind = self.steps[self.cursor].kind;
        let end_of_context = self.steps[self.cursor].end_of_context;
        match kind {
            TraceStepKind::RuleApplication => self.apply_current(TraceDirection::Forward),
            TraceStepKind::RuleMatchFailed => {
                let rule = if self.cursor > 0 {
                    self.steps[self.cursor - 1].context_name.as_str()
                } else {
                    ""
                };
                self.info_message = format!("No match found for rule {rule}");
            }
            TraceStepKind::RuleMatch => {}
            kind if kind.is_context() => {
                if end_of_context {
                    self.exit_context_forward();
                } else {
                    self.enter_context_forward();
                }
            }
            // Skip, break and fail have no graph effect.
            _ => {}
        }

        self.cursor += 1;
        let drained = self.cursor != self.steps.len() || self.parse_ahead();
        self.notify_highlighter(TraceDirection::Forward);
        drained
    }

    /// Retreats the cursor and reverts the step it passed over. Only fails
    /// at the start boundary.
    pub fn step_backward(&mut self) -> bool {
        self.info_message.clear();
        if !self.initialised {
            self.error = "trace is not initialised".into();
            return false;
        }
        if !self.backward_available() {
            self.error = "already at the start of the trace".into();
            return false;
        }

        self.cursor -= 1;
        let kind = self.steps[self.cursor].kind;
        let end_of_context = self.steps[self.cursor].end_of_context;
        match kind {
            TraceStepKind::RuleApplication => self.apply_current(TraceDirection::Backward),
            TraceStepKind::RuleMatch | TraceStepKind::RuleMatchFailed => {}
            kind if kind.is_context() => {
                if end_of_context {
                    self.reenter_context_backward();
                } else {
                    self.exit_context_backward();
                }
            }
            _ => {}
        }

        self.notify_highlighter(TraceDirection::Backward);
        true
    }

    /// Steps forward until the end of the trace or a failure.
    pub fn go_to_end(&mut self) -> bool {
        self.go_to_end_with(&mut || true)
    }

    /// Like [`go_to_end`](TraceRunner::go_to_end), polling `keep_going`
    /// between steps; returning `false` stops the walk without error.
    pub fn go_to_end_with(&mut self, keep_going: &mut dyn FnMut() -> bool) -> bool {
        while self.forward_available() {
            if !keep_going() {
                return true;
            }
            if !self.step_forward() {
                return false;
            }
        }
        true
    }

    /// Steps backward until the start of the trace.
    pub fn go_to_start(&mut self) -> bool {
        self.go_to_start_with(&mut || true)
    }

    /// Like [`go_to_start`](TraceRunner::go_to_start), polling `keep_going`
    /// between steps.
    pub fn go_to_start_with(&mut self, keep_going: &mut dyn FnMut() -> bool) -> bool {
        while self.backward_available() {
            if !keep_going() {
                return true;
            }
            if !self.step_backward() {
                return false;
            }
        }
        true
    }

    // -- forward ------------------------------------------------------------

    /// A rule context ending right after a failed match means the rule as a
    /// whole failed. Walking the context stack towards the bottom decides
    /// what that failure means: inside a branch condition (reached first) it
    /// is local to the branch and the then/else entry deals with it; inside
    /// a loop iteration it escapes the loop body, so the graph rolls back to
    /// the iteration's start and the iteration is marked failed.
    fn backtrack_on_failed_match(&mut self) {
        let step = &self.steps[self.cursor];
        if step.kind != TraceStepKind::Rule
            || !step.end_of_context
            || self.cursor == 0
            || self.steps[self.cursor - 1].kind != TraceStepKind::RuleMatchFailed
        {
            return;
        }
        for kind in self.context_stack.iter().rev() {
            match kind {
                TraceStepKind::BranchCondition => return,
                TraceStepKind::LoopIteration => {
                    let Some(snapshot) = self.snapshot_stack.pop() else {
                        log::warn!("loop failure with no snapshot to restore");
                        return;
                    };
                    // Keep the pre-restore graph so backward motion can undo
                    // the restore.
                    self.steps[self.cursor].snapshot = Some(self.graph.snapshot());
                    self.graph.restore(&snapshot);
                    if let Some(success) = self.loop_success_stack.last_mut() {
                        *success = false;
                    }
                    self.info_message =
                        "Rule failed inside a loop; graph restored to the start of the iteration"
                            .into();
                    return;
                }
                _ => {}
            }
        }
    }

    fn enter_context_forward(&mut self) {
        let kind = self.steps[self.cursor].kind;
        match kind {
            TraceStepKind::If | TraceStepKind::Try => {
                self.snapshot_stack.push(self.graph.snapshot());
            }
            TraceStepKind::LoopIteration => {
                self.snapshot_stack.push(self.graph.snapshot());
                self.loop_success_stack.push(true);
            }
            TraceStepKind::Then => {
                let branch = self.context_stack.last().copied();
                if let Some(snapshot) = self.snapshot_stack.pop() {
                    if branch == Some(TraceStepKind::If) {
                        // The condition was only a test: its changes are
                        // discarded before the then branch runs.
                        self.steps[self.cursor].snapshot = Some(self.graph.snapshot());
                        self.graph.restore(&snapshot);
                    } else {
                        // try-then keeps the condition's changes; park the
                        // snapshot on the step for backward motion.
                        self.steps[self.cursor].snapshot = Some(snapshot);
                    }
                }
            }
            TraceStepKind::Else => {
                // The condition failed but its partial changes are still in
                // the graph; discard them for both if and try.
                if let Some(snapshot) = self.snapshot_stack.pop() {
                    self.steps[self.cursor].snapshot = Some(self.graph.snapshot());
                    self.graph.restore(&snapshot);
                }
            }
            _ => {}
        }
        self.context_stack.push(kind);
    }

    fn exit_context_forward(&mut self) {
        let Some(popped) = self.context_stack.pop() else {
            log::warn!("context end with no open context");
            return;
        };
        if popped == TraceStepKind::LoopIteration {
            let success = self.loop_success_stack.pop().unwrap_or(true);
            if success {
                // No failure consumed the iteration's snapshot. It comes off
                // the stack here, but backward motion must be able to put it
                // back, so it is parked on the step rather than dropped.
                if let Some(snapshot) = self.snapshot_stack.pop() {
                    self.steps[self.cursor].snapshot = Some(snapshot);
                }
            }
        }
    }

    // -- backward -----------------------------------------------------------

    /// Backward over an end-of-context step: re-open the construct and redo
    /// what its forward exit undid.
    fn reenter_context_backward(&mut self) {
        let kind = self.steps[self.cursor].kind;
        self.context_stack.push(kind);
        match kind {
            TraceStepKind::LoopIteration => {
                // A parked snapshot means the iteration succeeded and its
                // forward exit took the snapshot off the stack.
                if let Some(snapshot) = self.steps[self.cursor].snapshot.clone() {
                    self.snapshot_stack.push(snapshot);
                    self.loop_success_stack.push(true);
                } else {
                    self.loop_success_stack.push(false);
                }
            }
            TraceStepKind::Rule => {
                // A snapshot on a rule end records forward backtracking:
                // redo the changes the restore threw away and put the
                // iteration's snapshot back on the stack.
                if let Some(pre_restore) = self.steps[self.cursor].snapshot.clone() {
                    self.snapshot_stack.push(self.graph.snapshot());
                    self.graph.restore(&pre_restore);
                    if let Some(success) = self.loop_success_stack.last_mut() {
                        *success = true;
                    }
                    self.info_message = "Redoing graph changes undone by backtracking".into();
                }
            }
            _ => {}
        }
    }

    /// Backward over a context-entry step: close the construct and undo what
    /// its forward entry did.
    fn exit_context_backward(&mut self) {
        let kind = self.steps[self.cursor].kind;
        self.context_stack.pop();
        match kind {
            TraceStepKind::If | TraceStepKind::Try => {
                // Forward entry pushed a fresh snapshot; it is retaken on
                // the next forward pass.
                self.snapshot_stack.pop();
            }
            TraceStepKind::LoopIteration => {
                self.snapshot_stack.pop();
                self.loop_success_stack.pop();
            }
            TraceStepKind::Then => {
                let branch = self.context_stack.last().copied();
                if let Some(snapshot) = self.steps[self.cursor].snapshot.clone() {
                    if branch == Some(TraceStepKind::Try) {
                        // Forward entry parked the pre-try snapshot without
                        // touching the graph; put it back likewise.
                        self.snapshot_stack.push(snapshot);
                    } else {
                        // Forward entry restored the pre-condition graph;
                        // undo that restore and rebuild the stack entry.
                        self.snapshot_stack.push(self.graph.snapshot());
                        self.graph.restore(&snapshot);
                    }
                }
            }
            TraceStepKind::Else => {
                if let Some(snapshot) = self.steps[self.cursor].snapshot.clone() {
                    self.snapshot_stack.push(self.graph.snapshot());
                    self.graph.restore(&snapshot);
                }
            }
            _ => {}
        }
    }

    // -- shared -------------------------------------------------------------

    fn apply_current(&mut self, direction: TraceDirection) {
        let graph = &mut *self.graph;
        let changes = &mut self.steps[self.cursor].changes;
        match direction {
            TraceDirection::Forward => {
                for change in changes.iter_mut() {
                    apply_change(graph, change, direction);
                }
            }
            TraceDirection::Backward => {
                for change in changes.iter_mut().rev() {
                    apply_change(graph, change, direction);
                }
            }
        }
    }

    /// Parses one more step when the buffer has been consumed. Returns
    /// `false` only on a parse error, which is recorded.
    fn parse_ahead(&mut self) -> bool {
        if self.parse_complete || self.parse_failed {
            return true;
        }
        let Some(parser) = self.parser.as_mut() else {
            return true;
        };
        match parser.parse_step() {
            Ok(ParseOutcome::Step(step)) => {
                self.steps.push(step);
                true
            }
            Ok(ParseOutcome::EndOfTrace) => {
                self.parse_complete = true;
                true
            }
            Err(error) => {
                self.error = error.to_string();
                self.parse_failed = true;
                false
            }
        }
    }

    /// Presents the pending step to the highlighter, first fixing up its
    /// loop-boundary flag (which needs one step of lookahead).
    fn notify_highlighter(&mut self, direction: TraceDirection) {
        if self.cursor >= self.steps.len() {
            self.highlighter.update(None, direction);
            return;
        }
        self.patch_loop_boundary();
        let step = &mut self.steps[self.cursor];
        self.highlighter.update(Some(step), direction);
    }

    /// An iteration end is the loop boundary exactly when the next step
    /// closes the loop itself.
    fn patch_loop_boundary(&mut self) {
        let step = &self.steps[self.cursor];
        if step.kind != TraceStepKind::LoopIteration || !step.end_of_context || step.loop_boundary
        {
            return;
        }
        if self.cursor + 1 >= self.steps.len() {
            // Needs one step of lookahead; a parse failure here surfaces on
            // the next forward step.
            let _ = self.parse_ahead();
        }
        let boundary = self
            .steps
            .get(self.cursor + 1)
            .map(|next| next.kind == TraceStepKind::Loop && next.end_of_context)
            .unwrap_or(false);
        self.steps[self.cursor].loop_boundary = boundary;
    }
}
