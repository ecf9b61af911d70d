//! Source-position tracking for the trace cursor.
//!
//! The highlighter keeps the tokenized program text in lockstep with the
//! runner: after every step it marks the token the pending step corresponds
//! to. The program text is flat while the execution model is nested, so the
//! highlighter maintains a stack of token positions — procedure calls push
//! the declaration and pop back to the call site, loop iterations remember
//! the loop start so each iteration re-scans from there, and branch steps
//! jump over unexecuted blocks by matching parentheses.
//!
//! All searches are linear scans over the token sequence, bounded by its
//! ends. At most one token is emphasised at any time.

use gp2_model::{Lexeme, Token};

use crate::step::{TraceStep, TraceStepKind};

/// Direction of travel through the trace.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TraceDirection {
    Forward,
    Backward,
}

/// A stack entry remembering which token index is highlighted.
///
/// `index == tokens.len()` is a sentinel meaning "past the end of the
/// program"; it carries no emphasis but seeds the next backward search.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct TokenFrame {
    index: usize,
}

/// What the highlighter needs to remember about the previously presented
/// step: enough to resolve procedure boundaries, virtual elses and the
/// condition-exit jump without holding a reference into the step buffer.
#[derive(Clone, Debug)]
struct PrevStep {
    kind: TraceStepKind,
    end_of_context: bool,
    virtual_step: bool,
    context_name: String,
}

impl PrevStep {
    fn of(step: &TraceStep) -> Self {
        PrevStep {
            kind: step.kind,
            end_of_context: step.end_of_context,
            virtual_step: step.virtual_step,
            context_name: step.context_name.clone(),
        }
    }
}

/// Token-cursor state machine keyed on step kind and direction.
pub struct TraceHighlighter<'t> {
    tokens: &'t mut [Token],
    stack: Vec<TokenFrame>,
    prev: Option<PrevStep>,
}

impl<'t> TraceHighlighter<'t> {
    /// Takes exclusive ownership of the emphasis flags for the duration of
    /// the trace. Any stale emphasis from a previous run is cleared.
    pub fn new(tokens: &'t mut [Token]) -> Self {
        let mut highlighter = TraceHighlighter {
            tokens,
            stack: Vec::new(),
            prev: None,
        };
        highlighter.clear_highlights();
        highlighter
    }

    /// The currently emphasised token index, if any.
    pub fn highlighted(&self) -> Option<usize> {
        let top = self.stack.last()?;
        (top.index < self.tokens.len() && self.tokens[top.index].emphasised).then_some(top.index)
    }

    /// Depth of the position stack; one frame per pending procedure return
    /// or loop start, plus the current position.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Moves the highlight to the token represented by `next_step`, the step
    /// that is about to become current. Pass `None` at the ends of the trace
    /// to clear the highlight while keeping the position for resumption.
    ///
    /// `next_step` is mutable because virtual-else detection writes the
    /// `virtual_step` flag back into the step buffer.
    pub fn update(&mut self, next_step: Option<&mut TraceStep>, direction: TraceDirection) {
        // If the highlight currently sits on a procedure call, move it to
        // the procedure's declaration (or, stepping backward, to its end)
        // before searching for the next token.
        if let Some(prev) = self.prev.clone() {
            if prev.kind == TraceStepKind::Procedure {
                self.anchor_procedure(&prev, direction);
            }
        }

        let search_pos = self.search_start(direction);

        let Some(step) = next_step else {
            // End of the trace in either direction: unhighlight everything
            // and leave a sentinel one past the final position so a reversal
            // resumes the search in the right place.
            self.clear_highlights();
            if let Some(top) = self.stack.pop() {
                self.stack.push(TokenFrame {
                    index: top.index + 1,
                });
            }
            self.prev = None;
            return;
        };

        match step.kind {
            // Component parts of a rule; not separately visible in source.
            TraceStepKind::RuleMatch
            | TraceStepKind::RuleMatchFailed
            | TraceStepKind::RuleApplication => {}
            TraceStepKind::Rule => self.highlight_rule(step, direction, search_pos),
            TraceStepKind::RuleSet => self.highlight_rule_set(step, direction, search_pos),
            TraceStepKind::Loop => self.highlight_loop(step, direction, search_pos),
            TraceStepKind::LoopIteration => self.highlight_loop_iteration(step, direction),
            TraceStepKind::Procedure => self.highlight_procedure(step, direction, search_pos),
            TraceStepKind::If | TraceStepKind::Try => {
                self.highlight_branch_start(step, direction, search_pos)
            }
            TraceStepKind::BranchCondition => {
                self.highlight_branch_condition(step, direction, search_pos)
            }
            TraceStepKind::Then => self.highlight_then(step, direction, search_pos),
            TraceStepKind::Else => self.highlight_else(step, direction, search_pos),
            TraceStepKind::Or => self.highlight_or(step, direction, search_pos),
            TraceStepKind::OrLeft => self.highlight_or_left(step, direction, search_pos),
            TraceStepKind::OrRight => self.highlight_or_right(step, direction, search_pos),
            TraceStepKind::Skip | TraceStepKind::Break | TraceStepKind::Fail => {
                self.highlight_leaf_keyword(step, direction, search_pos)
            }
            TraceStepKind::Unknown => {
                log::warn!("unhandled step kind in highlighter; cursor stays put");
            }
        }

        self.prev = Some(PrevStep::of(step));
    }

    /// Where a directional scan begins: adjacent to the current highlight,
    /// or at the relevant end of the program when there is none.
    fn search_start(&self, direction: TraceDirection) -> isize {
        match self.stack.last() {
            Some(top) => {
                top.index as isize
                    + match direction {
                        TraceDirection::Forward => 1,
                        TraceDirection::Backward => -1,
                    }
            }
            None => match direction {
                TraceDirection::Forward => 0,
                TraceDirection::Backward => self.tokens.len() as isize - 1,
            },
        }
    }

    /// The previous step was a procedure boundary: jump to the declaration.
    ///
    /// A procedure can be declared anywhere, so the scan starts at the
    /// beginning of the program regardless of direction. Call sites share
    /// the `Declaration` lexeme; only the defining occurrence is followed by
    /// a `DeclarationOperator`, which disambiguates.
    fn anchor_procedure(&mut self, prev: &PrevStep, direction: TraceDirection) {
        let mut looking_for_next = false;
        let mut pos = 0;
        while pos < self.tokens.len() {
            let token = &self.tokens[pos];
            if token.lexeme == Lexeme::Declaration
                && (looking_for_next || token.text == prev.context_name)
            {
                let is_declaration = self
                    .tokens
                    .get(pos + 1)
                    .map(|next| next.lexeme == Lexeme::DeclarationOperator)
                    .unwrap_or(false);
                if is_declaration {
                    if (direction == TraceDirection::Forward && !prev.end_of_context)
                        || looking_for_next
                    {
                        // The call site stays below on the stack for the
                        // eventual return.
                        self.push_highlight(TokenFrame { index: pos });
                        looking_for_next = false;
                        break;
                    } else if direction == TraceDirection::Backward && prev.end_of_context {
                        // Entering the procedure from its end. The only top
                        // level structure is procedure declarations, so the
                        // *next* declaration in the program marks where this
                        // one stops; keep scanning for it.
                        looking_for_next = true;
                    }
                }
            }
            pos += 1;
        }
        if looking_for_next {
            // No later declaration: the procedure runs to the end of the
            // program. Park a sentinel there so the backward search starts
            // at the end.
            self.push_highlight(TokenFrame {
                index: self.tokens.len(),
            });
        }
    }

    fn highlight_rule(&mut self, step: &TraceStep, direction: TraceDirection, search_pos: isize) {
        // A rule call is a single token, so only one boundary of the context
        // moves the highlight: the start going forward, the end going
        // backward.
        if (direction == TraceDirection::Forward && step.end_of_context)
            || (direction == TraceDirection::Backward && !step.end_of_context)
        {
            return;
        }
        // The compiler prefixes rule names reached from Main with `Main_`.
        let name = step.context_name.replace("Main_", "");
        if let Some(found) = self.scan(search_pos, direction, |t| {
            t.lexeme == Lexeme::Identifier && t.text == name
        }) {
            self.replace_highlight(TokenFrame { index: found });
        }
    }

    fn highlight_rule_set(
        &mut self,
        step: &TraceStep,
        direction: TraceDirection,
        search_pos: isize,
    ) {
        let lexeme = if step.end_of_context {
            Lexeme::CloseBrace
        } else {
            Lexeme::OpenBrace
        };
        if let Some(found) = self.scan(search_pos, direction, |t| t.lexeme == lexeme) {
            self.replace_highlight(TokenFrame { index: found });
        }
    }

    fn highlight_loop(&mut self, step: &TraceStep, direction: TraceDirection, search_pos: isize) {
        if step.end_of_context {
            if let Some(found) = self.scan(search_pos, direction, |t| t.lexeme == Lexeme::Repeat) {
                self.replace_highlight(TokenFrame { index: found });
            }
        } else if search_pos >= 0 && (search_pos as usize) < self.tokens.len() {
            // The looped body starts one token along from the current
            // highlight.
            self.replace_highlight(TokenFrame {
                index: search_pos as usize,
            });
        }
    }

    fn highlight_loop_iteration(&mut self, step: &TraceStep, direction: TraceDirection) {
        if !step.end_of_context {
            match direction {
                // Remember the loop start, so this and any following
                // iteration can re-scan the body from it.
                TraceDirection::Forward => self.push_duplicate(),
                TraceDirection::Backward => self.pop_highlight(),
            }
        } else if direction == TraceDirection::Forward {
            if step.loop_boundary {
                // The last iteration: drop the remembered loop start but
                // keep the position the body ended at, effectively advancing
                // past the loop.
                if let Some(saved) = self.stack.pop() {
                    self.replace_highlight(saved);
                }
            } else {
                self.pop_highlight();
            }
        } else {
            // Entering the iteration from behind; the body is scanned
            // backward from the current position.
            self.push_duplicate();
        }
    }

    fn highlight_procedure(
        &mut self,
        step: &TraceStep,
        direction: TraceDirection,
        search_pos: isize,
    ) {
        // Leaving the procedure pops back to the call site.
        if (direction == TraceDirection::Forward && step.end_of_context)
            || (direction == TraceDirection::Backward && !step.end_of_context)
        {
            self.pop_highlight();
            return;
        }
        let name = step.context_name.clone();
        if let Some(found) = self.scan(search_pos, direction, |t| {
            t.lexeme == Lexeme::Declaration && t.text == name
        }) {
            self.replace_highlight(TokenFrame { index: found });
        }
    }

    fn highlight_branch_start(
        &mut self,
        step: &TraceStep,
        direction: TraceDirection,
        search_pos: isize,
    ) {
        // `if`/`try` has no closing marker in source.
        if step.end_of_context {
            return;
        }
        let word = if step.kind == TraceStepKind::If {
            "if"
        } else {
            "try"
        };
        if let Some(found) = self.scan(search_pos, direction, |t| keyword(t, word)) {
            self.replace_highlight(TokenFrame { index: found });
        }
    }

    fn highlight_branch_condition(
        &mut self,
        step: &TraceStep,
        direction: TraceDirection,
        search_pos: isize,
    ) {
        // Only one transition needs work: stepping backward out of the
        // condition after having been in the else branch. The highlight sits
        // in the else block, past the unexecuted then block, which has to be
        // jumped over backwards.
        if direction != TraceDirection::Backward || !step.end_of_context {
            return;
        }
        let came_from_else = self
            .prev
            .as_ref()
            .map(|p| p.kind == TraceStepKind::Else)
            .unwrap_or(false);
        if !came_from_else {
            return;
        }
        if let Some(found) = self.scan_backward_balanced(search_pos, |t| keyword(t, "then")) {
            self.replace_highlight(TokenFrame { index: found });
        }
    }

    fn highlight_then(&mut self, step: &TraceStep, direction: TraceDirection, search_pos: isize) {
        if !step.end_of_context {
            if let Some(found) = self.scan(search_pos, direction, |t| keyword(t, "then")) {
                self.replace_highlight(TokenFrame { index: found });
            }
        } else if direction == TraceDirection::Forward {
            // Jump past the optional else block.
            if search_pos < 0 {
                return;
            }
            let next = search_pos as usize;
            if self.tokens.get(next).map(|t| keyword(t, "else")).unwrap_or(false) {
                let block_end = self.consume_block_forward(next + 1);
                self.replace_highlight(TokenFrame { index: block_end });
            } else if next < self.tokens.len() {
                // No else block in source; the highlight is already past the
                // then block and merely advances.
                self.replace_highlight(TokenFrame { index: next });
            }
        } else {
            // Stepping backward into the then block from past the construct.
            // An `else` keyword at depth zero marks the block's end; hitting
            // `then` first means there was no else block, and the position
            // the scan started from already is the end of the block.
            let start = search_pos;
            if let Some(found) = self.scan_backward_balanced(start, |t| {
                keyword(t, "else") || keyword(t, "then")
            }) {
                if keyword(&self.tokens[found], "else") {
                    if found > 0 {
                        self.replace_highlight(TokenFrame { index: found - 1 });
                    }
                } else if start >= 0 && (start as usize) < self.tokens.len() {
                    self.replace_highlight(TokenFrame {
                        index: start as usize,
                    });
                }
            }
        }
    }

    fn highlight_else(&mut self, step: &mut TraceStep, direction: TraceDirection, search_pos: isize) {
        if step.virtual_step {
            // The compiler inserted this else for an else-less `if`; there
            // is nothing to point at going forward. Going backward out of
            // it, the search position is the token after the then block.
            if direction == TraceDirection::Backward && step.end_of_context {
                if search_pos >= 0 && (search_pos as usize) < self.tokens.len() {
                    self.replace_highlight(TokenFrame {
                        index: search_pos as usize,
                    });
                }
            }
            return;
        }
        match (direction, step.end_of_context) {
            (TraceDirection::Forward, false) => {
                // From the condition's end, skip the then block, then see
                // whether the program actually has an else.
                let Some(then_pos) = self.scan(search_pos, TraceDirection::Forward, |t| {
                    keyword(t, "then")
                }) else {
                    return;
                };
                let block_end = self.consume_block_forward(then_pos + 1);
                let after = block_end + 1;
                match self.tokens.get(after) {
                    Some(t) if keyword(t, "else") => {
                        self.replace_highlight(TokenFrame { index: after });
                    }
                    _ => {
                        // The else exists only in the trace.
                        step.virtual_step = true;
                        if after < self.tokens.len() {
                            self.replace_highlight(TokenFrame { index: after });
                        }
                    }
                }
            }
            (TraceDirection::Backward, true) => {
                if let Some(found) =
                    self.scan_backward_balanced(search_pos, |t| keyword(t, "else"))
                {
                    self.replace_highlight(TokenFrame { index: found });
                }
            }
            // Forward exit and backward entry leave the cursor where the
            // branch body put it.
            _ => {}
        }
    }

    fn highlight_or(&mut self, step: &TraceStep, _direction: TraceDirection, search_pos: isize) {
        if step.end_of_context {
            return;
        }
        // The adjacent token is the or-expression's punctuation (a
        // separator, a parenthesis, or the declaration operator).
        if search_pos >= 0 && (search_pos as usize) < self.tokens.len() {
            self.replace_highlight(TokenFrame {
                index: search_pos as usize,
            });
        }
    }

    fn highlight_or_left(
        &mut self,
        step: &TraceStep,
        direction: TraceDirection,
        search_pos: isize,
    ) {
        if !step.end_of_context {
            return;
        }
        match direction {
            TraceDirection::Forward => {
                // The right branch was not taken: jump over it.
                if let Some(or_pos) = self.scan(search_pos, TraceDirection::Forward, |t| {
                    keyword(t, "or")
                }) {
                    let block_end = self.consume_block_forward(or_pos + 1);
                    self.replace_highlight(TokenFrame { index: block_end });
                }
            }
            TraceDirection::Backward => {
                if let Some(or_pos) = self.scan_backward_balanced(search_pos, |t| keyword(t, "or"))
                {
                    self.replace_highlight(TokenFrame { index: or_pos });
                }
            }
        }
    }

    fn highlight_or_right(
        &mut self,
        step: &TraceStep,
        direction: TraceDirection,
        search_pos: isize,
    ) {
        if step.end_of_context {
            return;
        }
        match direction {
            TraceDirection::Forward => {
                // The left branch was not taken: consume it up to the `or`.
                if let Some(or_pos) = self.scan_forward_balanced(search_pos, |t| keyword(t, "or"))
                {
                    self.replace_highlight(TokenFrame { index: or_pos });
                }
            }
            TraceDirection::Backward => {
                if let Some(or_pos) = self.scan(search_pos, TraceDirection::Backward, |t| {
                    keyword(t, "or")
                }) {
                    self.replace_highlight(TokenFrame { index: or_pos });
                }
            }
        }
    }

    fn highlight_leaf_keyword(
        &mut self,
        step: &mut TraceStep,
        direction: TraceDirection,
        search_pos: isize,
    ) {
        if step.virtual_step {
            return;
        }
        if step.kind == TraceStepKind::Skip {
            // A skip inside a synthetic else has no source token either.
            let inside_virtual_else = self
                .prev
                .as_ref()
                .map(|p| p.kind == TraceStepKind::Else && p.virtual_step)
                .unwrap_or(false);
            if inside_virtual_else {
                step.virtual_step = true;
                return;
            }
        }
        let word = match step.kind {
            TraceStepKind::Skip => "skip",
            TraceStepKind::Break => "break",
            _ => "fail",
        };
        if let Some(found) = self.scan(search_pos, direction, |t| keyword(t, word)) {
            self.replace_highlight(TokenFrame { index: found });
        }
    }

    // -- searches -----------------------------------------------------------

    /// Directional linear scan; stops at the sequence bounds.
    fn scan(
        &self,
        start: isize,
        direction: TraceDirection,
        pred: impl Fn(&Token) -> bool,
    ) -> Option<usize> {
        let delta = match direction {
            TraceDirection::Forward => 1,
            TraceDirection::Backward => -1,
        };
        let mut pos = start;
        while pos >= 0 && (pos as usize) < self.tokens.len() {
            if pred(&self.tokens[pos as usize]) {
                return Some(pos as usize);
            }
            pos += delta;
        }
        None
    }

    /// Backward scan that only tests `stop` outside parenthesised blocks,
    /// so intervening branch bodies are jumped over whole.
    fn scan_backward_balanced(
        &self,
        start: isize,
        stop: impl Fn(&Token) -> bool,
    ) -> Option<usize> {
        let mut depth = 0i32;
        let mut pos = start.min(self.tokens.len() as isize - 1);
        while pos >= 0 {
            let token = &self.tokens[pos as usize];
            match token.lexeme {
                Lexeme::CloseParen => depth += 1,
                Lexeme::OpenParen => depth -= 1,
                _ => {
                    if depth <= 0 && stop(token) {
                        return Some(pos as usize);
                    }
                }
            }
            pos -= 1;
        }
        None
    }

    /// Forward counterpart of [`scan_backward_balanced`].
    fn scan_forward_balanced(&self, start: isize, stop: impl Fn(&Token) -> bool) -> Option<usize> {
        let mut depth = 0i32;
        let mut pos = start.max(0);
        while (pos as usize) < self.tokens.len() {
            let token = &self.tokens[pos as usize];
            match token.lexeme {
                Lexeme::OpenParen => depth += 1,
                Lexeme::CloseParen => depth -= 1,
                _ => {
                    if depth <= 0 && stop(token) {
                        return Some(pos as usize);
                    }
                }
            }
            pos += 1;
        }
        None
    }

    /// Index of the last token of the block starting at `start`: the
    /// matching close paren of a parenthesised group, or `start` itself for
    /// a single-token block.
    fn consume_block_forward(&self, start: usize) -> usize {
        let opens = self
            .tokens
            .get(start)
            .map(|t| t.lexeme == Lexeme::OpenParen)
            .unwrap_or(false);
        if !opens {
            return start.min(self.tokens.len().saturating_sub(1));
        }
        let mut depth = 1i32;
        let mut pos = start + 1;
        while pos < self.tokens.len() {
            match self.tokens[pos].lexeme {
                Lexeme::OpenParen => depth += 1,
                Lexeme::CloseParen => {
                    depth -= 1;
                    if depth == 0 {
                        return pos;
                    }
                }
                _ => {}
            }
            pos += 1;
        }
        self.tokens.len().saturating_sub(1)
    }

    // -- emphasis primitives ------------------------------------------------

    fn clear_highlights(&mut self) {
        for token in self.tokens.iter_mut() {
            token.emphasised = false;
        }
    }

    fn set_emphasis(&mut self, frame: TokenFrame, on: bool) {
        if let Some(token) = self.tokens.get_mut(frame.index) {
            token.emphasised = on;
        }
    }

    /// Pop the current highlight, unhighlight it, and highlight `frame` in
    /// its place.
    fn replace_highlight(&mut self, frame: TokenFrame) {
        if let Some(previous) = self.stack.pop() {
            self.set_emphasis(previous, false);
        }
        self.set_emphasis(frame, true);
        self.stack.push(frame);
    }

    /// Unhighlight the top of the stack without popping it, then push and
    /// highlight `frame`.
    fn push_highlight(&mut self, frame: TokenFrame) {
        if let Some(&top) = self.stack.last() {
            self.set_emphasis(top, false);
        }
        self.set_emphasis(frame, true);
        self.stack.push(frame);
    }

    /// Push a copy of the current top (highlight unchanged).
    fn push_duplicate(&mut self) {
        if let Some(&top) = self.stack.last() {
            self.push_highlight(top);
        }
    }

    /// Pop and unhighlight the top; re-highlight whatever is underneath.
    fn pop_highlight(&mut self) {
        if let Some(top) = self.stack.pop() {
            self.set_emphasis(top, false);
        }
        if let Some(&top) = self.stack.last() {
            self.set_emphasis(top, true);
        }
    }
}

fn keyword(token: &Token, word: &str) -> bool {
    token.lexeme == Lexeme::Keyword && token.text == word
}
