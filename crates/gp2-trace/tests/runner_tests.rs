use std::fs;
use std::path::PathBuf;

use gp2_model::{HostGraph, HostNode, Label, Mark, Token};
use gp2_trace::{TraceRunner, TraceStepKind};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn write_trace(dir: &TempDir, xml: &str) -> PathBuf {
    let path = dir.path().join("trace.xml");
    fs::write(&path, xml).unwrap();
    path
}

fn node_ids(graph: &HostGraph) -> Vec<&str> {
    graph.nodes().map(|n| n.id.as_str()).collect()
}

/// A `<rule>` element that matches and applies the given changes.
fn rule(name: &str, changes: &str) -> String {
    format!("<rule name=\"{name}\"><match success=\"true\"/><apply>{changes}</apply></rule>")
}

/// A `<rule>` element whose match fails.
fn failing_rule(name: &str) -> String {
    format!("<rule name=\"{name}\"><match success=\"false\"/></rule>")
}

fn create_node(id: &str) -> String {
    format!("<createNode id=\"{id}\" label=\"\" mark=\"\" root=\"false\"/>")
}

#[test]
fn minimal_apply_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_trace(
        &dir,
        "<trace><rule name=\"R\">\
           <match success=\"true\"><node id=\"n1\"/></match>\
           <apply><createNode id=\"n2\" label=\"\" mark=\"\" root=\"false\"/></apply>\
         </rule></trace>",
    );

    let mut graph = HostGraph::new();
    graph.add_node(HostNode::new("n1", Label::default())).unwrap();
    let mut tokens: Vec<Token> = Vec::new();

    let mut runner = TraceRunner::new(&path, &mut graph, tokens.as_mut_slice());
    assert!(runner.initialised());

    assert!(runner.go_to_end());
    assert_eq!(node_ids(runner.graph()), vec!["n1", "n2"]);
    assert!(!runner.forward_available());

    assert!(runner.go_to_start());
    assert_eq!(node_ids(runner.graph()), vec!["n1"]);
    assert!(!runner.backward_available());
}

#[test]
fn loop_failure_rolls_back_only_the_failed_iteration() {
    // Iteration 1 creates x and succeeds. Iteration 2 creates y, then a rule
    // fails, which escapes the loop body: the graph rolls back to the start
    // of iteration 2, keeping x and dropping y.
    let dir = tempfile::tempdir().unwrap();
    let xml = format!(
        "<trace><loop>\
           <iteration>{}</iteration>\
           <iteration>{}{}</iteration>\
         </loop></trace>",
        rule("R", &create_node("x")),
        rule("R", &create_node("y")),
        failing_rule("S"),
    );
    let path = write_trace(&dir, &xml);

    let mut graph = HostGraph::new();
    let mut tokens: Vec<Token> = Vec::new();
    let mut runner = TraceRunner::new(&path, &mut graph, tokens.as_mut_slice());

    assert!(runner.go_to_end());
    assert_eq!(node_ids(runner.graph()), vec!["x"]);
    assert_eq!(runner.context_depth(), 0);
    assert_eq!(runner.snapshot_depth(), 0);

    assert!(runner.go_to_start());
    assert!(node_ids(runner.graph()).is_empty());
    assert_eq!(runner.context_depth(), 0);
    assert_eq!(runner.snapshot_depth(), 0);
}

#[test]
fn failed_iteration_without_changes_keeps_prior_iterations() {
    // The failed iteration made no changes, so its rollback is a no-op and
    // the first iteration's work survives.
    let dir = tempfile::tempdir().unwrap();
    let xml = format!(
        "<trace><loop>\
           <iteration>{}</iteration>\
           <iteration>{}</iteration>\
         </loop></trace>",
        rule("R", &create_node("x")),
        failing_rule("R"),
    );
    let path = write_trace(&dir, &xml);

    let mut graph = HostGraph::new();
    let mut tokens: Vec<Token> = Vec::new();
    let mut runner = TraceRunner::new(&path, &mut graph, tokens.as_mut_slice());

    assert!(runner.go_to_end());
    assert_eq!(node_ids(runner.graph()), vec!["x"]);

    assert!(runner.go_to_start());
    assert!(node_ids(runner.graph()).is_empty());
}

#[test]
fn or_branch_failure_escapes_to_the_enclosing_loop() {
    // The failing rule sits inside an or-branch inside a loop iteration. The
    // context walk passes the Or frames and reaches the LoopIteration, so
    // the iteration's partial changes are rolled back.
    let dir = tempfile::tempdir().unwrap();
    let xml = format!(
        "<trace><loop>\
           <iteration>\
             <or><leftBranch>{}{}</leftBranch></or>\
           </iteration>\
         </loop></trace>",
        rule("A", &create_node("partial")),
        failing_rule("B"),
    );
    let path = write_trace(&dir, &xml);

    let mut graph = HostGraph::new();
    graph.add_node(HostNode::new("seed", Label::default())).unwrap();
    let mut tokens: Vec<Token> = Vec::new();
    let mut runner = TraceRunner::new(&path, &mut graph, tokens.as_mut_slice());

    assert!(runner.go_to_end());
    assert_eq!(node_ids(runner.graph()), vec!["seed"]);
    assert_eq!(runner.context_depth(), 0);
    assert_eq!(runner.snapshot_depth(), 0);

    assert!(runner.go_to_start());
    assert_eq!(node_ids(runner.graph()), vec!["seed"]);
}

#[test]
fn loop_boundary_is_patched_on_the_final_iteration_end() {
    let dir = tempfile::tempdir().unwrap();
    let xml = format!(
        "<trace><loop>\
           <iteration>{}</iteration>\
           <iteration>{}</iteration>\
         </loop></trace>",
        rule("R", &create_node("x")),
        failing_rule("R"),
    );
    let path = write_trace(&dir, &xml);

    let mut graph = HostGraph::new();
    let mut tokens: Vec<Token> = Vec::new();
    let mut runner = TraceRunner::new(&path, &mut graph, tokens.as_mut_slice());

    let mut boundaries = Vec::new();
    while runner.forward_available() {
        if let Some(step) = runner.current_step() {
            if step.kind == TraceStepKind::LoopIteration && step.end_of_context {
                boundaries.push(step.loop_boundary);
            }
        }
        assert!(runner.step_forward());
    }
    assert_eq!(boundaries, vec![false, true]);
}

#[test]
fn forward_availability_flips_once_per_traversal() {
    let dir = tempfile::tempdir().unwrap();
    let xml = format!(
        "<trace>{}{}</trace>",
        rule("A", &create_node("a")),
        rule("B", &create_node("b")),
    );
    let path = write_trace(&dir, &xml);

    let mut graph = HostGraph::new();
    let mut tokens: Vec<Token> = Vec::new();
    let mut runner = TraceRunner::new(&path, &mut graph, tokens.as_mut_slice());

    let mut transitions = 0;
    let mut last = runner.forward_available();
    while runner.forward_available() {
        assert!(runner.step_forward());
        let now = runner.forward_available();
        if now != last {
            transitions += 1;
            last = now;
        }
    }
    assert_eq!(transitions, 1);
}

#[test]
fn backtracking_is_reversible_mid_trace() {
    // Walk back from the end to just before the failing match: the rule-end
    // step carries the pre-restore snapshot, so y reappears.
    let dir = tempfile::tempdir().unwrap();
    let xml = format!(
        "<trace><loop>\
           <iteration>{}</iteration>\
           <iteration>{}{}</iteration>\
         </loop></trace>",
        rule("R", &create_node("x")),
        rule("R", &create_node("y")),
        failing_rule("S"),
    );
    let path = write_trace(&dir, &xml);

    let mut graph = HostGraph::new();
    let mut tokens: Vec<Token> = Vec::new();
    let mut runner = TraceRunner::new(&path, &mut graph, tokens.as_mut_slice());

    assert!(runner.go_to_end());
    assert_eq!(node_ids(runner.graph()), vec!["x"]);

    // Walk back until the failing rule's end step has just been reversed.
    let at_failed_rule_end = |runner: &TraceRunner| {
        runner
            .current_step()
            .map(|s| s.kind == TraceStepKind::Rule && s.end_of_context && s.context_name == "S")
            .unwrap_or(false)
    };
    while !at_failed_rule_end(&runner) {
        assert!(runner.step_backward());
    }
    assert_eq!(node_ids(runner.graph()), vec!["x", "y"]);
    assert!(runner.info_message().contains("Redoing"));

    // One more step lands just before the failing match; y stays restored.
    assert!(runner.step_backward());
    assert_eq!(
        runner.current_step().map(|s| s.kind),
        Some(TraceStepKind::RuleMatchFailed)
    );
    assert_eq!(node_ids(runner.graph()), vec!["x", "y"]);

    // And forward again redoes the backtrack.
    assert!(runner.go_to_end());
    assert_eq!(node_ids(runner.graph()), vec!["x"]);
}

#[test]
fn try_then_keeps_condition_changes() {
    let dir = tempfile::tempdir().unwrap();
    let xml = format!(
        "<trace><try>\
           <condition>{}</condition>\
           <then>{}</then>\
         </try></trace>",
        rule("C", &create_node("a")),
        rule("T", &create_node("b")),
    );
    let path = write_trace(&dir, &xml);

    let mut graph = HostGraph::new();
    let mut tokens: Vec<Token> = Vec::new();
    let mut runner = TraceRunner::new(&path, &mut graph, tokens.as_mut_slice());

    assert!(runner.go_to_end());
    assert_eq!(node_ids(runner.graph()), vec!["a", "b"]);
    assert_eq!(runner.snapshot_depth(), 0);

    assert!(runner.go_to_start());
    assert!(node_ids(runner.graph()).is_empty());
}

#[test]
fn if_then_reverts_condition_changes() {
    let dir = tempfile::tempdir().unwrap();
    let xml = format!(
        "<trace><if>\
           <condition>{}</condition>\
           <then>{}</then>\
         </if></trace>",
        rule("C", &create_node("a")),
        rule("T", &create_node("b")),
    );
    let path = write_trace(&dir, &xml);

    let mut graph = HostGraph::new();
    let mut tokens: Vec<Token> = Vec::new();
    let mut runner = TraceRunner::new(&path, &mut graph, tokens.as_mut_slice());

    assert!(runner.go_to_end());
    assert_eq!(node_ids(runner.graph()), vec!["b"]);
    assert_eq!(runner.snapshot_depth(), 0);

    assert!(runner.go_to_start());
    assert!(node_ids(runner.graph()).is_empty());
}

#[test]
fn failed_condition_enters_else_and_reverts_partial_changes() {
    // The condition makes a change and then fails; the failure is local to
    // the branch (no loop restore), and the else entry discards the
    // condition's partial work before running the else body.
    let dir = tempfile::tempdir().unwrap();
    let xml = format!(
        "<trace><if>\
           <condition>{}{}</condition>\
           <else>{}</else>\
         </if></trace>",
        rule("C1", &create_node("tmp")),
        failing_rule("C2"),
        rule("E", &create_node("c")),
    );
    let path = write_trace(&dir, &xml);

    let mut graph = HostGraph::new();
    let mut tokens: Vec<Token> = Vec::new();
    let mut runner = TraceRunner::new(&path, &mut graph, tokens.as_mut_slice());

    assert!(runner.go_to_end());
    assert_eq!(node_ids(runner.graph()), vec!["c"]);

    assert!(runner.go_to_start());
    assert!(node_ids(runner.graph()).is_empty());
}

#[test]
fn deleted_nodes_are_recreated_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let xml = format!(
        "<trace>{}</trace>",
        rule(
            "D",
            "<deleteEdge id=\"e1\" label=\"\" mark=\"\" source=\"n1\" target=\"n1\"/>\
             <deleteNode id=\"n1\" label=\"5\" mark=\"2\" root=\"true\"/>",
        ),
    );
    let path = write_trace(&dir, &xml);

    let mut graph = HostGraph::new();
    let mut node = HostNode::new("n1", Label::new(Mark::Green, vec!["5".into()]));
    node.is_root = true;
    node.pos = Some((3.5, -7.25));
    graph.add_node(node).unwrap();
    graph
        .add_edge(gp2_model::HostEdge::new("e1", Label::default(), "n1", "n1"))
        .unwrap();
    let initial = graph.clone();

    let mut tokens: Vec<Token> = Vec::new();
    let mut runner = TraceRunner::new(&path, &mut graph, tokens.as_mut_slice());

    assert!(runner.go_to_end());
    assert_eq!(runner.graph().node_count(), 0);
    assert_eq!(runner.graph().edge_count(), 0);

    assert!(runner.go_to_start());
    // The recreated node kept its position, label, mark and root flag.
    assert_eq!(runner.graph().node("n1").unwrap().pos, Some((3.5, -7.25)));
    drop(runner);
    assert_eq!(graph, initial);
}

#[test]
fn relabel_remark_and_root_changes_invert() {
    let dir = tempfile::tempdir().unwrap();
    let xml = format!(
        "<trace>{}</trace>",
        rule(
            "M",
            "<relabelNode id=\"n1\" old=\"1\" new=\"2:z\"/>\
             <remarkNode id=\"n1\" old=\"\" new=\"3\"/>\
             <setRoot id=\"n1\"/>",
        ),
    );
    let path = write_trace(&dir, &xml);

    let mut graph = HostGraph::new();
    graph
        .add_node(HostNode::new("n1", Label::new(Mark::None, vec!["1".into()])))
        .unwrap();
    let initial = graph.clone();

    let mut tokens: Vec<Token> = Vec::new();
    let mut runner = TraceRunner::new(&path, &mut graph, tokens.as_mut_slice());

    assert!(runner.go_to_end());
    let node = runner.graph().node("n1").unwrap();
    assert_eq!(node.label.values, vec!["2", "z"]);
    assert_eq!(node.label.mark, Mark::Blue);
    assert!(node.is_root);

    assert!(runner.go_to_start());
    drop(runner);
    assert_eq!(graph, initial);
}

#[test]
fn full_round_trip_restores_graph_and_stacks() {
    let dir = tempfile::tempdir().unwrap();
    let xml = format!(
        "<trace>\
         <procedure name=\"Main\">\
           <loop>\
             <iteration>{}</iteration>\
             <iteration>{}</iteration>\
           </loop>\
           <if><condition>{}</condition><then>{}</then></if>\
           <try><condition>{}</condition><then>{}</then></try>\
         </procedure>\
         </trace>",
        rule("Grow", &create_node("g1")),
        failing_rule("Grow"),
        rule("Test", &create_node("t1")),
        rule("Mark", "<remarkNode id=\"seed\" old=\"\" new=\"1\"/>"),
        rule("Probe", &create_node("p1")),
        rule("Link", "<createEdge id=\"e1\" label=\"\" mark=\"\" source=\"seed\" target=\"p1\"/>"),
    );
    let path = write_trace(&dir, &xml);

    let mut graph = HostGraph::new();
    graph.add_node(HostNode::new("seed", Label::default())).unwrap();
    let initial = graph.clone();

    let mut tokens: Vec<Token> = Vec::new();
    let mut runner = TraceRunner::new(&path, &mut graph, tokens.as_mut_slice());

    assert!(runner.go_to_end());
    let final_ids = node_ids(runner.graph()).join(",");
    assert_eq!(runner.context_depth(), 0);
    assert_eq!(runner.snapshot_depth(), 0);

    assert!(runner.go_to_start());
    assert_eq!(runner.context_depth(), 0);
    assert_eq!(runner.snapshot_depth(), 0);

    // Replaying forward is deterministic.
    assert!(runner.go_to_end());
    assert_eq!(node_ids(runner.graph()).join(","), final_ids);
    assert!(runner.go_to_start());

    drop(runner);
    assert_eq!(graph, initial);
}

#[test]
fn each_step_is_its_own_inverse() {
    let dir = tempfile::tempdir().unwrap();
    let xml = format!(
        "<trace>\
         <loop>\
           <iteration>{}</iteration>\
           <iteration>{}{}</iteration>\
         </loop>\
         <if><condition>{}</condition><then>{}</then></if>\
         </trace>",
        rule("R", &create_node("x")),
        rule("R", &create_node("y")),
        failing_rule("S"),
        rule("C", &create_node("a")),
        rule("T", &create_node("b")),
    );
    let path = write_trace(&dir, &xml);

    let mut graph = HostGraph::new();
    let mut tokens: Vec<Token> = Vec::new();
    let mut runner = TraceRunner::new(&path, &mut graph, tokens.as_mut_slice());

    while runner.forward_available() {
        let graph_before = runner.graph().clone();
        let context_before = runner.context_depth();
        let snapshots_before = runner.snapshot_depth();

        assert!(runner.step_forward());
        assert!(runner.step_backward());

        assert_eq!(runner.graph(), &graph_before);
        assert_eq!(runner.context_depth(), context_before);
        assert_eq!(runner.snapshot_depth(), snapshots_before);

        assert!(runner.step_forward());
    }
}

#[test]
fn ruleset_contexts_balance_around_their_rule() {
    let dir = tempfile::tempdir().unwrap();
    let xml = format!(
        "<trace><ruleset>{}</ruleset></trace>",
        rule("Pick", &create_node("n")),
    );
    let path = write_trace(&dir, &xml);

    let mut graph = HostGraph::new();
    let mut tokens: Vec<Token> = Vec::new();
    let mut runner = TraceRunner::new(&path, &mut graph, tokens.as_mut_slice());

    // ruleset enter, rule enter: two open contexts.
    assert!(runner.step_forward());
    assert!(runner.step_forward());
    assert_eq!(runner.context_depth(), 2);

    assert!(runner.go_to_end());
    assert_eq!(runner.context_depth(), 0);
    assert_eq!(node_ids(runner.graph()), vec!["n"]);
}

#[test]
fn loop_restore_reports_an_info_message() {
    let dir = tempfile::tempdir().unwrap();
    let xml = format!(
        "<trace><loop><iteration>{}{}</iteration></loop></trace>",
        rule("A", &create_node("partial")),
        failing_rule("B"),
    );
    let path = write_trace(&dir, &xml);

    let mut graph = HostGraph::new();
    let mut tokens: Vec<Token> = Vec::new();
    let mut runner = TraceRunner::new(&path, &mut graph, tokens.as_mut_slice());

    // Step until the failing rule's end step has just been applied.
    loop {
        let at_failed_rule_end = runner
            .current_step()
            .map(|s| s.kind == TraceStepKind::Rule && s.end_of_context && s.context_name == "B")
            .unwrap_or(false);
        assert!(runner.step_forward());
        if at_failed_rule_end {
            break;
        }
    }
    assert!(runner.info_message().contains("restored"));
    assert!(runner.graph().node("partial").is_none());
}

#[test]
fn boundary_misuse_reports_errors() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_trace(&dir, &format!("<trace>{}</trace>", failing_rule("R")));

    let mut graph = HostGraph::new();
    let mut tokens: Vec<Token> = Vec::new();
    let mut runner = TraceRunner::new(&path, &mut graph, tokens.as_mut_slice());

    assert!(!runner.step_backward());
    assert!(runner.last_error().contains("start"));

    assert!(runner.go_to_end());
    assert!(!runner.step_forward());
    assert!(runner.last_error().contains("end"));
}

#[test]
fn failed_match_sets_the_info_message() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_trace(&dir, &format!("<trace>{}</trace>", failing_rule("NoFit")));

    let mut graph = HostGraph::new();
    let mut tokens: Vec<Token> = Vec::new();
    let mut runner = TraceRunner::new(&path, &mut graph, tokens.as_mut_slice());

    // rule enter, then the failed match.
    assert!(runner.step_forward());
    assert!(runner.step_forward());
    assert_eq!(runner.info_message(), "No match found for rule NoFit");
}

#[test]
fn match_availability_follows_the_pending_step() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_trace(
        &dir,
        "<trace><rule name=\"R\">\
           <match success=\"true\"><node id=\"n1\"/></match>\
           <apply><createNode id=\"n2\" label=\"\" mark=\"\" root=\"false\"/></apply>\
         </rule></trace>",
    );

    let mut graph = HostGraph::new();
    graph.add_node(HostNode::new("n1", Label::default())).unwrap();
    let mut tokens: Vec<Token> = Vec::new();
    let mut runner = TraceRunner::new(&path, &mut graph, tokens.as_mut_slice());

    // Pending: rule start.
    assert!(!runner.find_match_available());
    assert!(!runner.apply_match_available());

    assert!(runner.step_forward());
    // Pending: the match.
    assert!(runner.find_match_available());
    assert!(!runner.apply_match_available());

    assert!(runner.step_forward());
    // Pending: the application.
    assert!(!runner.find_match_available());
    assert!(runner.apply_match_available());
}

#[test]
fn go_to_end_can_be_cancelled_between_steps() {
    let dir = tempfile::tempdir().unwrap();
    let xml = format!(
        "<trace>{}{}</trace>",
        rule("A", &create_node("a")),
        rule("B", &create_node("b")),
    );
    let path = write_trace(&dir, &xml);

    let mut graph = HostGraph::new();
    let mut tokens: Vec<Token> = Vec::new();
    let mut runner = TraceRunner::new(&path, &mut graph, tokens.as_mut_slice());

    let mut remaining = 3usize;
    let mut keep_going = || {
        if remaining == 0 {
            return false;
        }
        remaining -= 1;
        true
    };
    assert!(runner.go_to_end_with(&mut keep_going));
    // The walk stopped mid-trace without error.
    assert!(runner.forward_available());
    assert!(runner.last_error().is_empty());

    assert!(runner.go_to_end());
    assert_eq!(node_ids(runner.graph()), vec!["a", "b"]);
}

#[test]
fn empty_trace_has_nothing_to_step() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_trace(&dir, "<trace></trace>");

    let mut graph = HostGraph::new();
    let mut tokens: Vec<Token> = Vec::new();
    let runner = TraceRunner::new(&path, &mut graph, tokens.as_mut_slice());

    assert!(runner.initialised());
    assert!(!runner.forward_available());
    assert!(!runner.backward_available());
    assert!(runner.current_step().is_none());
}

#[test]
fn unopenable_tracefile_leaves_runner_uninitialised() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing.xml");

    let mut graph = HostGraph::new();
    let mut tokens: Vec<Token> = Vec::new();
    let mut runner = TraceRunner::new(&path, &mut graph, tokens.as_mut_slice());

    assert!(!runner.initialised());
    assert!(!runner.last_error().is_empty());
    assert!(!runner.forward_available());
    assert!(!runner.step_forward());
}

#[test]
fn wrong_root_element_leaves_runner_uninitialised() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_trace(&dir, "<program></program>");

    let mut graph = HostGraph::new();
    let mut tokens: Vec<Token> = Vec::new();
    let runner = TraceRunner::new(&path, &mut graph, tokens.as_mut_slice());

    assert!(!runner.initialised());
    assert!(runner.last_error().contains("trace"));
}

#[test]
fn truncated_trace_replays_what_exists() {
    let dir = tempfile::tempdir().unwrap();
    let xml = format!("<trace>{}<loop><iteration>", rule("A", &create_node("a")));
    let path = write_trace(&dir, &xml);

    let mut graph = HostGraph::new();
    let mut tokens: Vec<Token> = Vec::new();
    let mut runner = TraceRunner::new(&path, &mut graph, tokens.as_mut_slice());

    assert!(runner.initialised());
    assert!(runner.go_to_end());
    assert_eq!(node_ids(runner.graph()), vec!["a"]);
    assert!(runner.go_to_start());
    assert!(node_ids(runner.graph()).is_empty());
}
