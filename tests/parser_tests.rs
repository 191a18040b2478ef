//! Parser tests: AST shapes, desugaring, closures, mini-literal embedding

use akkado::ast::{Ast, NodeData, NodeIndex, NodeKind, PatternKind, NULL_NODE};
use akkado::diagnostics::Diagnostic;
use akkado::lexer::lex;
use akkado::parser::parse;

fn parse_source(source: &str) -> (Ast, Vec<Diagnostic>) {
    let (tokens, lex_diags) = lex(source, "<test>");
    assert!(lex_diags.is_empty(), "unexpected lex errors: {:?}", lex_diags);
    parse(tokens, "<test>")
}

fn first_statement(ast: &Ast) -> NodeIndex {
    ast.arena[ast.root].first_child
}

#[test]
fn test_call_with_number() {
    let (ast, diags) = parse_source("saw(440)");
    assert!(diags.is_empty());

    let call = first_statement(&ast);
    assert_eq!(ast.arena[call].kind, NodeKind::Call);
    assert_eq!(ast.arena[call].name(), Some("saw"));

    // Arguments wrap their value expression as the sole child
    let arg = ast.arena[call].first_child;
    assert_eq!(ast.arena[arg].kind, NodeKind::Argument);
    let value = ast.arena[arg].first_child;
    assert_eq!(ast.arena[value].kind, NodeKind::NumberLit);
    assert_eq!(ast.arena[value].number(), Some(440.0));
}

#[test]
fn test_binary_desugars_to_call() {
    let (ast, _) = parse_source("1 + 2 * 3");

    // Precedence: 1 + (2 * 3), both desugared to calls
    let add = first_statement(&ast);
    assert_eq!(ast.arena[add].kind, NodeKind::Call);
    assert_eq!(ast.arena[add].name(), Some("add"));

    let lhs_arg = ast.arena[add].first_child;
    let rhs_arg = ast.arena[lhs_arg].next_sibling;
    let rhs = ast.arena[rhs_arg].first_child;
    assert_eq!(ast.arena[rhs].kind, NodeKind::Call);
    assert_eq!(ast.arena[rhs].name(), Some("mul"));
}

#[test]
fn test_power_is_right_associative() {
    let (ast, _) = parse_source("2 ^ 3 ^ 4");

    // 2 ^ (3 ^ 4)
    let outer = first_statement(&ast);
    assert_eq!(ast.arena[outer].name(), Some("pow"));
    let rhs_arg = ast.arena[ast.arena[outer].first_child].next_sibling;
    let rhs = ast.arena[rhs_arg].first_child;
    assert_eq!(ast.arena[rhs].name(), Some("pow"));
}

#[test]
fn test_pipe_node_shape() {
    let (ast, _) = parse_source("saw(440) |> lp(%, 1000, 0.7)");

    let pipe = first_statement(&ast);
    assert_eq!(ast.arena[pipe].kind, NodeKind::Pipe);
    assert_eq!(ast.arena.child_count(pipe), 2);

    let lhs = ast.arena[pipe].first_child;
    let rhs = ast.arena[lhs].next_sibling;
    assert_eq!(ast.arena[lhs].kind, NodeKind::Call);
    assert_eq!(ast.arena[rhs].kind, NodeKind::Call);
    assert_eq!(ast.arena[rhs].name(), Some("lp"));
}

#[test]
fn test_chained_pipes_left_associative() {
    let (ast, _) = parse_source("a = 1\na |> sin(%) |> out(%)");

    let stmt2 = ast.arena[first_statement(&ast)].next_sibling;
    // ((a |> sin(%)) |> out(%)): outer pipe's LHS is itself a pipe
    assert_eq!(ast.arena[stmt2].kind, NodeKind::Pipe);
    let inner = ast.arena[stmt2].first_child;
    assert_eq!(ast.arena[inner].kind, NodeKind::Pipe);
}

#[test]
fn test_assignment() {
    let (ast, _) = parse_source("cutoff = 1000");
    let assign = first_statement(&ast);
    assert_eq!(ast.arena[assign].kind, NodeKind::Assignment);
    assert_eq!(ast.arena[assign].name(), Some("cutoff"));
    let value = ast.arena[assign].first_child;
    assert_eq!(ast.arena[value].number(), Some(1000.0));
}

#[test]
fn test_closure_with_params() {
    let (ast, diags) = parse_source("(f) -> sin(f)");
    assert!(diags.is_empty());

    let closure = first_statement(&ast);
    assert_eq!(ast.arena[closure].kind, NodeKind::Closure);

    // One parameter then exactly one body expression
    let param = ast.arena[closure].first_child;
    assert_eq!(ast.arena[param].kind, NodeKind::Identifier);
    assert_eq!(ast.arena[param].name(), Some("f"));
    let body = ast.arena[param].next_sibling;
    assert_eq!(ast.arena[body].kind, NodeKind::Call);
    assert_eq!(ast.arena[body].next_sibling, NULL_NODE);
}

#[test]
fn test_empty_closure() {
    let (ast, diags) = parse_source("() -> 440");
    assert!(diags.is_empty());
    let closure = first_statement(&ast);
    assert_eq!(ast.arena[closure].kind, NodeKind::Closure);
    assert_eq!(ast.arena.child_count(closure), 1); // just the body
}

#[test]
fn test_closure_default_params() {
    let (ast, diags) = parse_source("(a, b = 2) -> a + b");
    assert!(diags.is_empty());

    let closure = first_statement(&ast);
    let a = ast.arena[closure].first_child;
    let b = ast.arena[a].next_sibling;
    assert!(matches!(ast.arena[a].data, NodeData::Ident(_)));
    match &ast.arena[b].data {
        NodeData::ClosureParam {
            name,
            default_value,
        } => {
            assert_eq!(name, "b");
            assert_eq!(*default_value, Some(2.0));
        }
        other => panic!("expected default param, got {:?}", other),
    }
}

#[test]
fn test_required_after_default_is_error() {
    let (_, diags) = parse_source("(a = 1, b) -> a + b");
    assert!(!diags.is_empty());
}

#[test]
fn test_grouping_is_not_closure() {
    let (ast, diags) = parse_source("(1 + 2) * 3");
    assert!(diags.is_empty());
    let mul = first_statement(&ast);
    assert_eq!(ast.arena[mul].name(), Some("mul"));
}

#[test]
fn test_named_arguments() {
    let (ast, _) = parse_source("lp(x, cutoff: 1000, q: 0.7)");
    // x must be defined for the analyzer, but the parse shape is what we
    // check here
    let call = first_statement(&ast);
    let args: Vec<_> = ast.arena.children(call).collect();
    assert_eq!(args.len(), 3);

    assert!(matches!(
        &ast.arena[args[0]].data,
        NodeData::Argument { name: None }
    ));
    match &ast.arena[args[1]].data {
        NodeData::Argument { name: Some(n) } => assert_eq!(n, "cutoff"),
        other => panic!("expected named argument, got {:?}", other),
    }
}

#[test]
fn test_array_literal() {
    let (ast, _) = parse_source("[100, 200, 300]");
    let array = first_statement(&ast);
    assert_eq!(ast.arena[array].kind, NodeKind::ArrayLit);
    assert_eq!(ast.arena.child_count(array), 3);
}

#[test]
fn test_mini_literal_parses_pattern_inline() {
    let (ast, diags) = parse_source(r#"pat("c4 e4 g4")"#);
    assert!(diags.is_empty());

    let mini = first_statement(&ast);
    assert_eq!(ast.arena[mini].kind, NodeKind::MiniLiteral);
    assert!(matches!(
        ast.arena[mini].data,
        NodeData::Pattern(PatternKind::Pat)
    ));

    // Child 0 is the parsed mini-notation subtree
    let pattern = ast.arena[mini].first_child;
    assert_eq!(ast.arena[pattern].kind, NodeKind::MiniPattern);
    assert_eq!(ast.arena.child_count(pattern), 3);
}

#[test]
fn test_mini_literal_with_closure() {
    let (ast, diags) = parse_source(r#"seq("c4 e4", (t, v, p) -> sin(p) * v)"#);
    assert!(diags.is_empty());

    let mini = first_statement(&ast);
    assert!(matches!(
        ast.arena[mini].data,
        NodeData::Pattern(PatternKind::Seq)
    ));
    assert_eq!(ast.arena.child_count(mini), 2);

    let closure = ast.arena.child_at(mini, 1);
    assert_eq!(ast.arena[closure].kind, NodeKind::Closure);
}

#[test]
fn test_function_def() {
    let (ast, diags) = parse_source("fn voice(freq, cutoff = 800) -> saw(freq)");
    assert!(diags.is_empty());

    let def = first_statement(&ast);
    assert_eq!(ast.arena[def].kind, NodeKind::FunctionDef);
    match &ast.arena[def].data {
        NodeData::FunctionDef { name, param_count } => {
            assert_eq!(name, "voice");
            assert_eq!(*param_count, 2);
        }
        other => panic!("expected function def, got {:?}", other),
    }
    // Params then exactly one body
    assert_eq!(ast.arena.child_count(def), 3);
}

#[test]
fn test_match_expression() {
    let (ast, diags) =
        parse_source(r#"match(x) { "saw": 1, "sin": 2, _: 3 }"#);
    assert!(diags.is_empty());

    let m = first_statement(&ast);
    assert_eq!(ast.arena[m].kind, NodeKind::MatchExpr);
    // scrutinee + three arms
    assert_eq!(ast.arena.child_count(m), 4);

    let wildcard = ast.arena.child_at(m, 3);
    assert!(matches!(
        ast.arena[wildcard].data,
        NodeData::MatchArm { is_wildcard: true }
    ));
}

#[test]
fn test_error_recovery_resynchronizes() {
    // The bad first statement produces one error; parsing resumes at the
    // assignment and still yields it
    let (ast, diags) = parse_source("pat(\nx = 1");
    assert!(!diags.is_empty());

    let has_assignment = ast
        .arena
        .children(ast.root)
        .any(|c| ast.arena[c].kind == NodeKind::Assignment);
    assert!(has_assignment);
}

#[test]
fn test_closure_body_is_greedy() {
    // The pipe belongs to the closure body, not the outer expression
    let (ast, _) = parse_source("(x) -> x |> out(%)");
    let closure = first_statement(&ast);
    assert_eq!(ast.arena[closure].kind, NodeKind::Closure);
    let body = ast.arena.child_at(closure, 1);
    assert_eq!(ast.arena[body].kind, NodeKind::Pipe);
}
