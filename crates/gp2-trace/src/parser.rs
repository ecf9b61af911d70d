//! Pull-style tracefile reader.
//!
//! The parser consumes the XML one event at a time and produces at most one
//! [`TraceStep`] per [`parse_step`](TraceParser::parse_step) call. It never
//! reads past the step it returns, so the runner can drive it lazily while
//! the user steps through the trace.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use quick_xml::errors::IllFormedError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use gp2_model::{Label, Mark};

use crate::error::TraceError;
use crate::step::{EdgeRecord, GraphChange, MorphismItem, NodeRecord, TraceStep, TraceStepKind};

/// Outcome of a single [`TraceParser::parse_step`] call.
#[derive(Debug)]
pub enum ParseOutcome {
    /// One step was produced.
    Step(TraceStep),
    /// The trace is exhausted: `</trace>`, end of document, or a truncated
    /// document. A trace killed mid-run is truncated, so truncation is not
    /// an error.
    EndOfTrace,
}

/// Streaming reader turning a tracefile into a forward-only sequence of
/// [`TraceStep`]s.
#[derive(Debug)]
pub struct TraceParser {
    reader: Reader<BufReader<File>>,
    buf: Vec<u8>,
    complete: bool,
    /// Names of `<rule>`/`<procedure>` contexts whose end tag has not been
    /// seen yet; end steps take their context name from here, which keeps
    /// backward highlighting cheap.
    unmatched_context_names: Vec<String>,
}

impl TraceParser {
    /// Opens `path` and consumes the document prologue up to the root
    /// element, which must be `<trace>`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TraceError> {
        let file = File::open(path)?;
        let mut reader = Reader::from_reader(BufReader::new(file));
        let config = reader.config_mut();
        config.trim_text(true);
        // `<skip/>` and friends should behave like `<skip></skip>`: one
        // start event and one end event, the same shape the step model uses.
        config.expand_empty_elements = true;

        let mut buf = Vec::new();
        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => {
                    if e.name().as_ref() == b"trace" {
                        break;
                    }
                    let found = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    return Err(TraceError::NotATracefile { found });
                }
                Ok(Event::Eof) => return Err(TraceError::EmptyTracefile),
                Ok(_) => {}
                Err(source) => {
                    let position = reader.buffer_position();
                    return Err(TraceError::Syntax { source, position });
                }
            }
            buf.clear();
        }
        buf.clear();

        Ok(TraceParser {
            reader,
            buf,
            complete: false,
            unmatched_context_names: Vec::new(),
        })
    }

    /// True once the end of the trace has been reached; after that,
    /// [`parse_step`](TraceParser::parse_step) keeps returning
    /// [`ParseOutcome::EndOfTrace`].
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Parses forward until one step can be produced, skipping any XML
    /// events (text, comments, processing instructions) that do not
    /// contribute to one.
    pub fn parse_step(&mut self) -> Result<ParseOutcome, TraceError> {
        if self.complete {
            return Ok(ParseOutcome::EndOfTrace);
        }
        loop {
            self.buf.clear();
            let event = match self.reader.read_event_into(&mut self.buf) {
                Ok(event) => event,
                Err(source) if is_truncation(&source) => {
                    log::debug!("tracefile is incomplete; parsing ends here");
                    self.complete = true;
                    return Ok(ParseOutcome::EndOfTrace);
                }
                Err(source) => return Err(self.syntax_error(source)),
            };
            match event {
                Event::Start(e) => {
                    let e = e.into_owned();
                    match self.parse_start_element(&e)? {
                        Some(step) => return Ok(ParseOutcome::Step(step)),
                        // A truncation surfaced mid-scan; the partial step
                        // is dropped.
                        None => return Ok(ParseOutcome::EndOfTrace),
                    }
                }
                Event::End(e) => {
                    let name = e.name().as_ref().to_vec();
                    if name == b"trace" {
                        self.complete = true;
                        return Ok(ParseOutcome::EndOfTrace);
                    }
                    if let Some(step) = self.parse_end_element(&name) {
                        return Ok(ParseOutcome::Step(step));
                    }
                }
                Event::Eof => {
                    self.complete = true;
                    return Ok(ParseOutcome::EndOfTrace);
                }
                // Text, comments, declarations, processing instructions.
                _ => {}
            }
        }
    }

    fn parse_start_element(
        &mut self,
        e: &BytesStart<'static>,
    ) -> Result<Option<TraceStep>, TraceError> {
        let kind = TraceStepKind::from_tag(e.name().as_ref());
        match kind {
            TraceStepKind::Unknown => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                let position = self.reader.buffer_position();
                Err(TraceError::UnknownElement { name, position })
            }
            TraceStepKind::RuleMatch => {
                let success = attr_value(e, b"success")?
                    .map(|v| v == "true")
                    .unwrap_or(false);
                let kind = if success {
                    TraceStepKind::RuleMatch
                } else {
                    TraceStepKind::RuleMatchFailed
                };
                let Some(changes) = self.scan_match()? else {
                    return Ok(None);
                };
                let mut step = TraceStep::new(kind);
                step.changes = changes;
                Ok(Some(step))
            }
            TraceStepKind::RuleApplication => {
                let Some(changes) = self.scan_apply()? else {
                    return Ok(None);
                };
                let mut step = TraceStep::new(TraceStepKind::RuleApplication);
                step.changes = changes;
                Ok(Some(step))
            }
            kind => {
                let mut step = TraceStep::new(kind);
                if matches!(kind, TraceStepKind::Rule | TraceStepKind::Procedure) {
                    let name = attr_value(e, b"name")?.unwrap_or_default();
                    self.unmatched_context_names.push(name.clone());
                    step.context_name = name;
                }
                Ok(Some(step))
            }
        }
    }

    /// End tags of context kinds produce a step; leaf kinds arrive as a
    /// start/end pair of which only the start counts, so their end tags are
    /// swallowed, as are unknown end tags.
    fn parse_end_element(&mut self, name: &[u8]) -> Option<TraceStep> {
        let kind = TraceStepKind::from_tag(name);
        if !kind.is_context() {
            return None;
        }
        let mut step = TraceStep::end_of(kind);
        if matches!(kind, TraceStepKind::Rule | TraceStepKind::Procedure) {
            step.context_name = self.unmatched_context_names.pop().unwrap_or_default();
        }
        Some(step)
    }

    /// Collects the morphism items between `<match>` and `</match>`.
    /// Returns `None` when the document is truncated mid-scan.
    fn scan_match(&mut self) -> Result<Option<Vec<GraphChange>>, TraceError> {
        let mut changes = Vec::new();
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let event = match self.reader.read_event_into(&mut buf) {
                Ok(event) => event,
                Err(source) if is_truncation(&source) => {
                    self.complete = true;
                    return Ok(None);
                }
                Err(source) => return Err(self.syntax_error(source)),
            };
            match event {
                Event::Start(e) => match e.name().as_ref() {
                    b"node" => {
                        let id = attr_value(&e, b"id")?.unwrap_or_default();
                        changes.push(GraphChange::Morphism(MorphismItem::Node(id)));
                    }
                    b"edge" => {
                        let id = attr_value(&e, b"id")?.unwrap_or_default();
                        changes.push(GraphChange::Morphism(MorphismItem::Edge(id)));
                    }
                    _ => {}
                },
                Event::End(e) if e.name().as_ref() == b"match" => break,
                Event::Eof => {
                    self.complete = true;
                    return Ok(None);
                }
                _ => {}
            }
        }
        Ok(Some(changes))
    }

    /// Collects one [`GraphChange`] per element between `<apply>` and
    /// `</apply>`. Returns `None` when the document is truncated mid-scan.
    fn scan_apply(&mut self) -> Result<Option<Vec<GraphChange>>, TraceError> {
        let mut changes = Vec::new();
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let event = match self.reader.read_event_into(&mut buf) {
                Ok(event) => event,
                Err(source) if is_truncation(&source) => {
                    self.complete = true;
                    return Ok(None);
                }
                Err(source) => return Err(self.syntax_error(source)),
            };
            match event {
                Event::Start(e) => {
                    if let Some(change) = parse_graph_change(&e)? {
                        changes.push(change);
                    }
                }
                Event::End(e) if e.name().as_ref() == b"apply" => break,
                Event::Eof => {
                    self.complete = true;
                    return Ok(None);
                }
                _ => {}
            }
        }
        Ok(Some(changes))
    }

    fn syntax_error(&self, source: quick_xml::Error) -> TraceError {
        TraceError::Syntax {
            source,
            position: self.reader.buffer_position(),
        }
    }
}

/// Whether an XML error means the document simply stops early (a trace
/// killed mid-run) rather than being malformed.
fn is_truncation(error: &quick_xml::Error) -> bool {
    matches!(
        error,
        quick_xml::Error::Syntax(_)
            | quick_xml::Error::IllFormed(IllFormedError::MissingEndTag(_))
    )
}

/// Decodes one graph-change element. Unknown change elements are logged and
/// skipped; the run continues without them.
fn parse_graph_change(e: &BytesStart<'_>) -> Result<Option<GraphChange>, TraceError> {
    let change = match e.name().as_ref() {
        b"createNode" => GraphChange::AddNode(parse_node(e)?),
        b"createEdge" => GraphChange::AddEdge(parse_edge(e)?),
        b"deleteNode" => GraphChange::DeleteNode(parse_node(e)?),
        b"deleteEdge" => GraphChange::DeleteEdge(parse_edge(e)?),
        b"relabelNode" => {
            let (id, old, new) = parse_relabel(e)?;
            GraphChange::RelabelNode { id, old, new }
        }
        b"relabelEdge" => {
            let (id, old, new) = parse_relabel(e)?;
            GraphChange::RelabelEdge { id, old, new }
        }
        b"remarkNode" => {
            let (id, old, new) = parse_remark(e)?;
            GraphChange::RemarkNode { id, old, new }
        }
        b"remarkEdge" => {
            let (id, old, new) = parse_remark(e)?;
            GraphChange::RemarkEdge { id, old, new }
        }
        b"setRoot" => GraphChange::SetRoot(attr_value(e, b"id")?.unwrap_or_default()),
        b"removeRoot" => GraphChange::RemoveRoot(attr_value(e, b"id")?.unwrap_or_default()),
        other => {
            log::warn!(
                "skipping unknown graph change element <{}>",
                String::from_utf8_lossy(other)
            );
            return Ok(None);
        }
    };
    Ok(Some(change))
}

fn parse_node(e: &BytesStart<'_>) -> Result<NodeRecord, TraceError> {
    Ok(NodeRecord {
        id: attr_value(e, b"id")?.unwrap_or_default(),
        label: parse_label(
            attr_value(e, b"label")?.as_deref().unwrap_or(""),
            attr_value(e, b"mark")?.as_deref().unwrap_or(""),
        ),
        is_root: attr_value(e, b"root")?.as_deref() == Some("true"),
        pos: None,
    })
}

fn parse_edge(e: &BytesStart<'_>) -> Result<EdgeRecord, TraceError> {
    Ok(EdgeRecord {
        id: attr_value(e, b"id")?.unwrap_or_default(),
        label: parse_label(
            attr_value(e, b"label")?.as_deref().unwrap_or(""),
            attr_value(e, b"mark")?.as_deref().unwrap_or(""),
        ),
        from: attr_value(e, b"source")?.unwrap_or_default(),
        to: attr_value(e, b"target")?.unwrap_or_default(),
    })
}

fn parse_relabel(e: &BytesStart<'_>) -> Result<(String, Label, Label), TraceError> {
    let id = attr_value(e, b"id")?.unwrap_or_default();
    let old = parse_label(attr_value(e, b"old")?.as_deref().unwrap_or(""), "");
    let new = parse_label(attr_value(e, b"new")?.as_deref().unwrap_or(""), "");
    Ok((id, old, new))
}

fn parse_remark(e: &BytesStart<'_>) -> Result<(String, Mark, Mark), TraceError> {
    let id = attr_value(e, b"id")?.unwrap_or_default();
    let old = parse_mark(attr_value(e, b"old")?.as_deref().unwrap_or(""));
    let new = parse_mark(attr_value(e, b"new")?.as_deref().unwrap_or(""));
    Ok((id, old, new))
}

/// Decodes the textual `label` attribute (colon-separated atoms) and the
/// numeric `mark` attribute into a [`Label`].
fn parse_label(label: &str, mark: &str) -> Label {
    let values = if label.is_empty() {
        Vec::new()
    } else {
        label.split(':').map(str::to_owned).collect()
    };
    Label::new(parse_mark(mark), values)
}

fn parse_mark(code: &str) -> Mark {
    match code {
        "1" => Mark::Red,
        "2" => Mark::Green,
        "3" => Mark::Blue,
        "4" => Mark::Dashed,
        _ => Mark::None,
    }
}

fn attr_value(e: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>, TraceError> {
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == name {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}
