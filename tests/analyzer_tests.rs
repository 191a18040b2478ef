//! Semantic analyzer tests: pipe rewriting, resolution, validation

use akkado::analyzer::{analyze, AnalysisResult};
use akkado::ast::{Ast, NodeKind, NULL_NODE};
use akkado::lexer::lex;
use akkado::parser::parse;

fn parse_source(source: &str) -> Ast {
    let (tokens, lex_diags) = lex(source, "<test>");
    assert!(lex_diags.is_empty(), "lex errors: {:?}", lex_diags);
    let (ast, parse_diags) = parse(tokens, "<test>");
    assert!(parse_diags.is_empty(), "parse errors: {:?}", parse_diags);
    ast
}

fn analyze_source(source: &str) -> AnalysisResult {
    let ast = parse_source(source);
    analyze(&ast, "<test>")
}

fn error_codes(result: &AnalysisResult) -> Vec<&str> {
    result
        .diagnostics
        .iter()
        .map(|d| d.code.as_str())
        .collect()
}

fn count_kind(ast: &Ast, kind: NodeKind) -> usize {
    let mut count = 0;
    let mut stack = vec![ast.root];
    let mut seen = std::collections::HashSet::new();
    while let Some(node) = stack.pop() {
        if node == NULL_NODE || !seen.insert(node) {
            continue;
        }
        if ast.arena[node].kind == kind {
            count += 1;
        }
        stack.extend(ast.arena.children(node));
    }
    count
}

#[test]
fn test_simple_pipe_rewrites_to_call() {
    let result = analyze_source("440 |> saw(%)");
    assert!(result.success, "diagnostics: {:?}", result.diagnostics);

    // The transformed tree has no pipes and no holes left
    assert_eq!(count_kind(&result.ast, NodeKind::Pipe), 0);
    assert_eq!(count_kind(&result.ast, NodeKind::Hole), 0);

    // Root statement became saw(440)
    let stmt = result.ast.arena[result.ast.root].first_child;
    assert_eq!(result.ast.arena[stmt].kind, NodeKind::Call);
    assert_eq!(result.ast.arena[stmt].name(), Some("saw"));

    let arg = result.ast.arena[stmt].first_child;
    let value = result.ast.arena[arg].first_child;
    assert_eq!(result.ast.arena[value].number(), Some(440.0));
}

#[test]
fn test_chained_pipes_eliminate_completely() {
    let result = analyze_source("saw(440) |> lp(%, 1000, 0.7) |> out(%, %)");
    assert!(result.success, "diagnostics: {:?}", result.diagnostics);
    assert_eq!(count_kind(&result.ast, NodeKind::Pipe), 0);
    assert_eq!(count_kind(&result.ast, NodeKind::Hole), 0);

    // Outermost call is out(...)
    let stmt = result.ast.arena[result.ast.root].first_child;
    assert_eq!(result.ast.arena[stmt].name(), Some("out"));
}

#[test]
fn test_multiple_holes_share_replacement() {
    let result = analyze_source("saw(110) |> out(%, %)");
    assert!(result.success);

    let out_call = result.ast.arena[result.ast.root].first_child;
    let args: Vec<_> = result.ast.arena.children(out_call).collect();
    assert_eq!(args.len(), 2);

    // Both argument wrappers point at the same rewritten LHS node
    let lhs_a = result.ast.arena[args[0]].first_child;
    let lhs_b = result.ast.arena[args[1]].first_child;
    assert_eq!(lhs_a, lhs_b);
    assert_eq!(result.ast.arena[lhs_a].name(), Some("saw"));
}

#[test]
fn test_nested_hole_positions() {
    // The hole sits inside a nested expression on the RHS
    let result = analyze_source("sin(5) |> saw(% * 100 + 440)");
    assert!(result.success, "diagnostics: {:?}", result.diagnostics);
    assert_eq!(count_kind(&result.ast, NodeKind::Hole), 0);
}

#[test]
fn test_rewrite_is_idempotent() {
    // Analyzing an already-rewritten tree changes nothing structurally
    let once = analyze_source("440 |> saw(%) |> out(%)");
    assert!(once.success);
    let twice = analyze(&once.ast, "<test>");
    assert!(twice.success);

    assert_eq!(once.ast.arena.len(), twice.ast.arena.len());
    assert_eq!(count_kind(&twice.ast, NodeKind::Pipe), 0);
}

#[test]
fn test_hole_outside_pipe_is_e003() {
    let result = analyze_source("saw(%)");
    assert!(!result.success);
    assert!(error_codes(&result).contains(&"E003"));
}

#[test]
fn test_unknown_function_is_e004() {
    let result = analyze_source("unknown_fn(1)");
    assert!(!result.success);
    assert!(error_codes(&result).contains(&"E004"));
}

#[test]
fn test_undefined_identifier_is_e005() {
    let result = analyze_source("saw(mystery)");
    assert!(!result.success);
    assert!(error_codes(&result).contains(&"E005"));
}

#[test]
fn test_arity_window() {
    // Too few
    let result = analyze_source("lp(440)");
    assert!(error_codes(&result).contains(&"E006"));

    // Too many
    let result = analyze_source("sin(1, 2)");
    assert!(error_codes(&result).contains(&"E007"));

    // out() accepts one or two arguments
    assert!(analyze_source("out(saw(110))").success);
    assert!(analyze_source("out(saw(110), saw(220))").success);
}

#[test]
fn test_redefinition_warns_but_succeeds() {
    let result = analyze_source("x = 1\nx = 2");
    assert!(result.success);
    assert!(error_codes(&result).contains(&"W001"));
}

#[test]
fn test_closure_capture_is_e008() {
    let result = analyze_source("y = 1\nf = (x) -> x + y");
    assert!(!result.success);
    assert!(error_codes(&result).contains(&"E008"));
}

#[test]
fn test_closure_may_reference_params_and_builtins() {
    let result = analyze_source("f = (x) -> sin(x) * 0.5");
    assert!(result.success, "diagnostics: {:?}", result.diagnostics);
}

#[test]
fn test_closure_may_reference_pattern_globals() {
    let result = analyze_source("melody = pat(\"c4 e4\")\nf = (x) -> x + melody");
    assert!(result.success, "diagnostics: {:?}", result.diagnostics);
}

#[test]
fn test_positional_after_named_is_e009() {
    let result = analyze_source("lp(saw(110), cutoff: 800, 0.7)");
    assert!(!result.success);
    assert!(error_codes(&result).contains(&"E009"));
}

#[test]
fn test_alias_resolves() {
    assert!(analyze_source("sine(440)").success);
    assert!(analyze_source("lowpass(saw(110), 800, 0.7)").success);
}

#[test]
fn test_function_def_and_call() {
    let result = analyze_source("fn voice(f) -> saw(f)\nvoice(220) |> out(%)");
    assert!(result.success, "diagnostics: {:?}", result.diagnostics);
}

#[test]
fn test_analysis_continues_after_error() {
    // Both errors are reported, not just the first
    let result = analyze_source("unknown_a(1)\nunknown_b(2)");
    let codes = error_codes(&result);
    assert_eq!(codes.iter().filter(|c| **c == "E004").count(), 2);
}
