//! Maintainer CLI: walk a tracefile and print one line per step.
//!
//! Intended for fixture triage, so the interface is deliberately minimal.

use std::error::Error;
use std::process::ExitCode;

use gp2_trace::{ParseOutcome, TraceParser, TraceStep};

fn main() -> ExitCode {
    let Some(path) = std::env::args().nth(1) else {
        eprintln!("usage: trace_dump <tracefile>");
        return ExitCode::FAILURE;
    };
    match dump(&path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}

fn dump(path: &str) -> Result<(), Box<dyn Error>> {
    let mut parser = TraceParser::open(path)?;
    let mut index = 0usize;
    let mut depth = 0usize;
    loop {
        match parser.parse_step()? {
            ParseOutcome::Step(step) => {
                if step.end_of_context {
                    depth = depth.saturating_sub(1);
                }
                println!("{index:4}  {:indent$}{}", "", describe(&step), indent = depth * 2);
                if step.kind.is_context() && !step.end_of_context {
                    depth += 1;
                }
                index += 1;
            }
            ParseOutcome::EndOfTrace => break,
        }
    }
    Ok(())
}

fn describe(step: &TraceStep) -> String {
    let mut line = format!("{:?}", step.kind);
    if step.end_of_context {
        line.push_str(" (end)");
    }
    if !step.context_name.is_empty() {
        line.push_str(&format!(" `{}`", step.context_name));
    }
    if !step.changes.is_empty() {
        line.push_str(&format!(" [{} changes]", step.changes.len()));
    }
    line
}
