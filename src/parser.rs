//! Pratt parser for the Akkado language
//!
//! Binary operators desugar into `Call` nodes (`add`, `sub`, `mul`, `div`,
//! `pow`) during parsing so the analyzer sees one calling convention.
//! `Pipe` nodes are kept as-is: the hole `%` may sit anywhere in the RHS
//! subtree, so rewriting is deferred to the semantic analyzer. Pattern
//! strings are handed to the mini-lexer/mini-parser here; the parsed
//! subtree is attached as the first child of the `MiniLiteral` node.
//!
//! Error recovery is panic mode: after the first error, diagnostics are
//! suppressed until the parser synchronizes at a statement boundary.

use crate::ast::{Ast, AstArena, NodeData, NodeIndex, NodeKind, PatternKind, NULL_NODE};
use crate::diagnostics::{Diagnostic, SourceLocation};
use crate::mini_parser::parse_mini;
use crate::token::{Token, TokenKind, TokenValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None = 0,
    Pipe = 1,
    Addition = 2,
    Multiplication = 3,
    Power = 4,
    Method = 5,
}

struct ParsedParam {
    name: String,
    default_value: Option<f64>,
}

pub struct Parser {
    tokens: Vec<Token>,
    filename: String,
    arena: AstArena,
    current_idx: usize,
    panic_mode: bool,
    diagnostics: Vec<Diagnostic>,
}

impl Parser {
    pub fn new(tokens: Vec<Token>, filename: &str) -> Self {
        Self {
            tokens,
            filename: filename.to_string(),
            arena: AstArena::new(),
            current_idx: 0,
            panic_mode: false,
            diagnostics: Vec::new(),
        }
    }

    pub fn parse(mut self) -> (Ast, Vec<Diagnostic>) {
        let root = self.parse_program();
        (
            Ast {
                arena: self.arena,
                root,
            },
            self.diagnostics,
        )
    }

    // Token navigation

    fn current(&self) -> &Token {
        &self.tokens[self.current_idx.min(self.tokens.len() - 1)]
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.current_idx.saturating_sub(1)]
    }

    fn is_at_end(&self) -> bool {
        self.current().kind == TokenKind::Eof
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current().kind == kind
    }

    fn peek_kind(&self, offset: usize) -> TokenKind {
        self.tokens
            .get(self.current_idx + offset)
            .map(|t| t.kind)
            .unwrap_or(TokenKind::Eof)
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            return true;
        }
        false
    }

    fn advance(&mut self) -> Token {
        if !self.is_at_end() {
            self.current_idx += 1;
        }
        self.previous().clone()
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.check(kind) {
            self.advance();
        } else {
            self.error(message);
        }
    }

    // Error handling

    fn error(&mut self, message: &str) {
        let location = self.current().location;
        self.error_at(location, message);
    }

    fn error_at(&mut self, location: SourceLocation, message: &str) {
        if self.panic_mode {
            return; // suppress cascading errors until synchronized
        }
        self.panic_mode = true;
        self.diagnostics.push(Diagnostic::error(
            "P001",
            message,
            &self.filename,
            location,
        ));
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;

        while !self.is_at_end() {
            match self.current().kind {
                TokenKind::Post
                | TokenKind::Fn
                | TokenKind::Pat
                | TokenKind::Seq
                | TokenKind::Timeline
                | TokenKind::Note => return,
                _ => {}
            }

            if self.previous().kind == TokenKind::RBrace {
                return;
            }

            if self.check(TokenKind::Identifier) && self.peek_kind(1) == TokenKind::Equals {
                return;
            }

            self.advance();
        }
    }

    // Precedence helpers

    fn precedence_of(kind: TokenKind) -> Precedence {
        match kind {
            TokenKind::Pipe => Precedence::Pipe,
            TokenKind::Plus | TokenKind::Minus => Precedence::Addition,
            TokenKind::Star | TokenKind::Slash => Precedence::Multiplication,
            TokenKind::Caret => Precedence::Power,
            _ => Precedence::None,
        }
    }

    fn is_infix(kind: TokenKind) -> bool {
        Self::precedence_of(kind) != Precedence::None
    }

    // Node helpers

    fn make_node(&mut self, kind: NodeKind, location: SourceLocation) -> NodeIndex {
        self.arena.alloc(kind, location)
    }

    // Program / statements

    fn parse_program(&mut self) -> NodeIndex {
        let location = self.current().location;
        let program = self.make_node(NodeKind::Program, location);

        while !self.is_at_end() {
            let stmt = self.parse_statement();
            if stmt != NULL_NODE {
                self.arena.add_child(program, stmt);
            }
            if self.panic_mode {
                self.synchronize();
            }
        }

        program
    }

    fn parse_statement(&mut self) -> NodeIndex {
        if self.matches(TokenKind::Post) {
            return self.parse_post_stmt();
        }

        if self.matches(TokenKind::Fn) {
            return self.parse_function_def();
        }

        if self.check(TokenKind::Identifier) && self.peek_kind(1) == TokenKind::Equals {
            let name_tok = self.advance();
            return self.parse_assignment(name_tok);
        }

        self.parse_expression()
    }

    fn parse_assignment(&mut self, name_tok: Token) -> NodeIndex {
        self.consume(TokenKind::Equals, "Expected '=' after identifier");

        let node = self.make_node(NodeKind::Assignment, name_tok.location);
        self.arena[node].data = NodeData::Ident(name_tok.lexeme.clone());

        let value = self.parse_expression();
        if value != NULL_NODE {
            self.arena.add_child(node, value);
        }

        node
    }

    fn parse_post_stmt(&mut self) -> NodeIndex {
        let post_loc = self.previous().location;
        self.consume(TokenKind::LParen, "Expected '(' after 'post'");

        let node = self.make_node(NodeKind::PostStmt, post_loc);

        if !self.check(TokenKind::LParen) {
            self.error("Expected closure in post()");
            return node;
        }

        self.advance(); // '(' of the closure
        let closure = self.parse_closure();
        if closure != NULL_NODE {
            self.arena.add_child(node, closure);
        }

        self.consume(TokenKind::RParen, "Expected ')' after post closure");
        node
    }

    /// fn name(params) -> body
    fn parse_function_def(&mut self) -> NodeIndex {
        let fn_loc = self.previous().location;

        if !self.check(TokenKind::Identifier) {
            self.error("Expected function name after 'fn'");
            return NULL_NODE;
        }
        let name_tok = self.advance();

        self.consume(TokenKind::LParen, "Expected '(' after function name");
        let params = self.parse_param_list();
        self.consume(TokenKind::RParen, "Expected ')' after parameters");
        self.consume(TokenKind::Arrow, "Expected '->' after function parameters");

        let node = self.make_node(NodeKind::FunctionDef, fn_loc);
        self.arena[node].data = NodeData::FunctionDef {
            name: name_tok.lexeme.clone(),
            param_count: params.len(),
        };

        for param in &params {
            let param_node = self.make_node(NodeKind::Identifier, fn_loc);
            self.arena[param_node].data = match param.default_value {
                Some(default) => NodeData::ClosureParam {
                    name: param.name.clone(),
                    default_value: Some(default),
                },
                None => NodeData::Ident(param.name.clone()),
            };
            self.arena.add_child(node, param_node);
        }

        let body = self.parse_closure_body();
        if body != NULL_NODE {
            self.arena.add_child(node, body);
        }

        node
    }

    // Expressions (Pratt)

    fn parse_expression(&mut self) -> NodeIndex {
        self.parse_precedence(Precedence::Pipe)
    }

    fn parse_precedence(&mut self, prec: Precedence) -> NodeIndex {
        let mut left = self.parse_prefix();
        if left == NULL_NODE {
            return NULL_NODE;
        }

        // Method calls bind tightest and can chain
        while self.check(TokenKind::Dot) && prec <= Precedence::Method {
            self.advance();
            left = self.parse_method_call(left);
        }

        while !self.is_at_end() {
            if !Self::is_infix(self.current().kind) {
                break;
            }

            let op_prec = Self::precedence_of(self.current().kind);
            if op_prec < prec {
                break;
            }

            let op = self.advance();
            left = self.parse_infix(left, op);

            while self.check(TokenKind::Dot) && prec <= Precedence::Method {
                self.advance();
                left = self.parse_method_call(left);
            }
        }

        left
    }

    fn parse_prefix(&mut self) -> NodeIndex {
        match self.current().kind {
            TokenKind::Number => self.parse_number(),
            TokenKind::PitchLit => self.parse_pitch(),
            TokenKind::ChordLit => self.parse_chord(),
            TokenKind::True | TokenKind::False => self.parse_bool(),
            TokenKind::Str => self.parse_string(),
            TokenKind::Identifier => self.parse_identifier_or_call(),
            TokenKind::Hole => {
                let tok = self.advance();
                self.make_node(NodeKind::Hole, tok.location)
            }
            TokenKind::LBracket => self.parse_array(),
            TokenKind::LParen => self.parse_grouping(),
            TokenKind::Match => self.parse_match(),
            TokenKind::Pat | TokenKind::Seq | TokenKind::Timeline | TokenKind::Note => {
                self.parse_mini_literal()
            }
            _ => {
                self.error("Expected expression");
                NULL_NODE
            }
        }
    }

    fn parse_infix(&mut self, left: NodeIndex, op: Token) -> NodeIndex {
        match op.kind {
            TokenKind::Pipe => self.parse_pipe(left, op),
            TokenKind::Plus
            | TokenKind::Minus
            | TokenKind::Star
            | TokenKind::Slash
            | TokenKind::Caret => self.parse_binary(left, op),
            _ => {
                self.error("Unknown infix operator");
                left
            }
        }
    }

    // Literals

    fn parse_number(&mut self) -> NodeIndex {
        let tok = self.advance();
        let node = self.make_node(NodeKind::NumberLit, tok.location);
        if let TokenValue::Number { value, is_integer } = tok.value {
            self.arena[node].data = NodeData::Number { value, is_integer };
        }
        node
    }

    fn parse_pitch(&mut self) -> NodeIndex {
        let tok = self.advance();
        let node = self.make_node(NodeKind::PitchLit, tok.location);
        if let TokenValue::Pitch { midi_note } = tok.value {
            self.arena[node].data = NodeData::Pitch { midi_note };
        }
        node
    }

    fn parse_chord(&mut self) -> NodeIndex {
        let tok = self.advance();
        let node = self.make_node(NodeKind::ChordLit, tok.location);
        if let TokenValue::Chord {
            root_midi,
            intervals,
        } = tok.value
        {
            self.arena[node].data = NodeData::Chord {
                root_midi,
                intervals,
            };
        }
        node
    }

    fn parse_bool(&mut self) -> NodeIndex {
        let tok = self.advance();
        let node = self.make_node(NodeKind::BoolLit, tok.location);
        self.arena[node].data = NodeData::Bool(tok.kind == TokenKind::True);
        node
    }

    fn parse_string(&mut self) -> NodeIndex {
        let tok = self.advance();
        let node = self.make_node(NodeKind::StringLit, tok.location);
        if let TokenValue::Str(s) = tok.value {
            self.arena[node].data = NodeData::Str(s);
        }
        node
    }

    /// [a, b, c]
    fn parse_array(&mut self) -> NodeIndex {
        let open = self.advance();
        let node = self.make_node(NodeKind::ArrayLit, open.location);

        if !self.check(TokenKind::RBracket) {
            loop {
                let elem = self.parse_expression();
                if elem != NULL_NODE {
                    self.arena.add_child(node, elem);
                }
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }

        self.consume(TokenKind::RBracket, "Expected ']' after array elements");
        node
    }

    fn parse_identifier_or_call(&mut self) -> NodeIndex {
        let name_tok = self.advance();

        if self.check(TokenKind::LParen) {
            return self.parse_call(name_tok);
        }

        let node = self.make_node(NodeKind::Identifier, name_tok.location);
        self.arena[node].data = NodeData::Ident(name_tok.lexeme.clone());
        node
    }

    /// Disambiguate `(expr)` from `(params) -> body` by lookahead
    fn parse_grouping(&mut self) -> NodeIndex {
        self.advance(); // '('

        if self.closure_follows() {
            return self.parse_closure();
        }

        let expr = self.parse_expression();
        self.consume(TokenKind::RParen, "Expected ')' after expression");
        expr
    }

    /// At the token after '(': does an identifier list followed by `) ->`
    /// (or `) ->` immediately) come next?
    fn closure_follows(&self) -> bool {
        let mut pos = 0usize;

        if self.peek_kind(pos) == TokenKind::RParen {
            return self.peek_kind(pos + 1) == TokenKind::Arrow;
        }

        loop {
            if self.peek_kind(pos) != TokenKind::Identifier {
                return false;
            }
            pos += 1;

            // Optional default: name = number
            if self.peek_kind(pos) == TokenKind::Equals {
                if self.peek_kind(pos + 1) != TokenKind::Number {
                    return false;
                }
                pos += 2;
            }

            match self.peek_kind(pos) {
                TokenKind::Comma => pos += 1,
                TokenKind::RParen => return self.peek_kind(pos + 1) == TokenKind::Arrow,
                _ => return false,
            }
        }
    }

    // Closures

    /// Assumes the '(' has been consumed
    fn parse_closure(&mut self) -> NodeIndex {
        let start_loc = self.previous().location;
        let node = self.make_node(NodeKind::Closure, start_loc);

        let params = self.parse_param_list();

        self.consume(TokenKind::RParen, "Expected ')' after parameters");
        self.consume(TokenKind::Arrow, "Expected '->' after closure parameters");

        for param in &params {
            let param_node = self.make_node(NodeKind::Identifier, start_loc);
            self.arena[param_node].data = match param.default_value {
                Some(default) => NodeData::ClosureParam {
                    name: param.name.clone(),
                    default_value: Some(default),
                },
                None => NodeData::Ident(param.name.clone()),
            };
            self.arena.add_child(node, param_node);
        }

        let body = self.parse_closure_body();
        if body != NULL_NODE {
            self.arena.add_child(node, body);
        }

        node
    }

    fn parse_param_list(&mut self) -> Vec<ParsedParam> {
        let mut params = Vec::new();

        if self.check(TokenKind::RParen) {
            return params;
        }

        let mut seen_default = false;

        loop {
            if !self.check(TokenKind::Identifier) {
                self.error("Expected parameter name");
                break;
            }
            let name_tok = self.advance();

            let mut default_value = None;
            if self.matches(TokenKind::Equals) {
                if !self.check(TokenKind::Number) {
                    self.error("Default parameter value must be a number literal");
                    break;
                }
                let num_tok = self.advance();
                default_value = num_tok.number();
                seen_default = true;
            } else if seen_default {
                self.error("Required parameter cannot follow optional parameter");
                break;
            }

            params.push(ParsedParam {
                name: name_tok.lexeme,
                default_value,
            });

            if !self.matches(TokenKind::Comma) {
                break;
            }
        }

        params
    }

    /// Closure bodies are greedy: they absorb pipes and binary operators
    fn parse_closure_body(&mut self) -> NodeIndex {
        if self.check(TokenKind::LBrace) {
            return self.parse_block();
        }
        self.parse_expression()
    }

    fn parse_block(&mut self) -> NodeIndex {
        let brace = self.advance();
        let node = self.make_node(NodeKind::Block, brace.location);

        while !self.check(TokenKind::RBrace) && !self.is_at_end() {
            let stmt = self.parse_statement();
            if stmt != NULL_NODE {
                self.arena.add_child(node, stmt);
            }
            if self.panic_mode {
                self.synchronize();
            }
        }

        self.consume(TokenKind::RBrace, "Expected '}' after block");
        node
    }

    // Binary operators

    fn parse_binary(&mut self, left: NodeIndex, op: Token) -> NodeIndex {
        let func_name = match op.kind {
            TokenKind::Plus => "add",
            TokenKind::Minus => "sub",
            TokenKind::Star => "mul",
            TokenKind::Slash => "div",
            TokenKind::Caret => "pow",
            _ => {
                self.error("Unknown binary operator");
                return left;
            }
        };

        // Left-associative operators bind tighter on the right; power is
        // right-associative and reuses its own precedence.
        let next_prec = match op.kind {
            TokenKind::Caret => Precedence::Power,
            TokenKind::Plus | TokenKind::Minus => Precedence::Multiplication,
            _ => Precedence::Power,
        };

        let right = self.parse_precedence(next_prec);

        // Desugar to a Call with positional Argument wrappers
        let node = self.make_node(NodeKind::Call, op.location);
        self.arena[node].data = NodeData::Ident(func_name.to_string());

        let left_loc = self.arena[left].location;
        let left_arg = self.make_node(NodeKind::Argument, left_loc);
        self.arena[left_arg].data = NodeData::Argument { name: None };
        self.arena.add_child(left_arg, left);
        self.arena.add_child(node, left_arg);

        if right != NULL_NODE {
            let right_loc = self.arena[right].location;
            let right_arg = self.make_node(NodeKind::Argument, right_loc);
            self.arena[right_arg].data = NodeData::Argument { name: None };
            self.arena.add_child(right_arg, right);
            self.arena.add_child(node, right_arg);
        }

        node
    }

    // Pipe

    fn parse_pipe(&mut self, left: NodeIndex, pipe_tok: Token) -> NodeIndex {
        let node = self.make_node(NodeKind::Pipe, pipe_tok.location);

        // RHS parses above the pipe level so the next |> returns to us
        let right = self.parse_precedence(Precedence::Addition);

        self.arena.add_child(node, left);
        if right != NULL_NODE {
            self.arena.add_child(node, right);
        }

        node
    }

    // Calls

    fn parse_method_call(&mut self, left: NodeIndex) -> NodeIndex {
        let dot_loc = self.previous().location;

        if !self.check(TokenKind::Identifier) {
            self.error("Expected method name after '.'");
            return left;
        }

        let method_name = self.advance();
        let node = self.make_node(NodeKind::MethodCall, dot_loc);
        self.arena[node].data = NodeData::Ident(method_name.lexeme.clone());
        self.arena.add_child(node, left);

        self.consume(TokenKind::LParen, "Expected '(' after method name");
        if !self.check(TokenKind::RParen) {
            let args = self.parse_argument_list();
            for arg in args {
                self.arena.add_child(node, arg);
            }
        }
        self.consume(TokenKind::RParen, "Expected ')' after arguments");

        node
    }

    fn parse_call(&mut self, name_tok: Token) -> NodeIndex {
        let node = self.make_node(NodeKind::Call, name_tok.location);
        self.arena[node].data = NodeData::Ident(name_tok.lexeme.clone());

        self.consume(TokenKind::LParen, "Expected '(' after function name");

        if !self.check(TokenKind::RParen) {
            let args = self.parse_argument_list();
            for arg in args {
                self.arena.add_child(node, arg);
            }
        }

        self.consume(TokenKind::RParen, "Expected ')' after arguments");
        node
    }

    fn parse_argument_list(&mut self) -> Vec<NodeIndex> {
        let mut args = Vec::new();
        loop {
            let arg = self.parse_argument();
            if arg != NULL_NODE {
                args.push(arg);
            }
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        args
    }

    fn parse_argument(&mut self) -> NodeIndex {
        let start_loc = self.current().location;
        let node = self.make_node(NodeKind::Argument, start_loc);

        // Named argument: identifier ':' expr
        if self.check(TokenKind::Identifier) && self.peek_kind(1) == TokenKind::Colon {
            let name = self.advance();
            self.advance(); // ':'
            self.arena[node].data = NodeData::Argument {
                name: Some(name.lexeme),
            };
            let value = self.parse_expression();
            if value != NULL_NODE {
                self.arena.add_child(node, value);
            }
            return node;
        }

        self.arena[node].data = NodeData::Argument { name: None };
        let value = self.parse_expression();
        if value != NULL_NODE {
            self.arena.add_child(node, value);
        }
        node
    }

    // Compile-time match

    /// match (scrutinee) { pattern: body, ..., _: body }
    fn parse_match(&mut self) -> NodeIndex {
        let match_loc = self.current().location;
        self.advance(); // 'match'

        let node = self.make_node(NodeKind::MatchExpr, match_loc);

        self.consume(TokenKind::LParen, "Expected '(' after 'match'");
        let scrutinee = self.parse_expression();
        if scrutinee != NULL_NODE {
            self.arena.add_child(node, scrutinee);
        }
        self.consume(TokenKind::RParen, "Expected ')' after match scrutinee");

        self.consume(TokenKind::LBrace, "Expected '{' to open match arms");

        while !self.check(TokenKind::RBrace) && !self.is_at_end() {
            let arm = self.parse_match_arm();
            if arm != NULL_NODE {
                self.arena.add_child(node, arm);
            }
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }

        self.consume(TokenKind::RBrace, "Expected '}' after match arms");
        node
    }

    fn parse_match_arm(&mut self) -> NodeIndex {
        let arm_loc = self.current().location;
        let node = self.make_node(NodeKind::MatchArm, arm_loc);

        let is_wildcard = self.check(TokenKind::Underscore);
        self.arena[node].data = NodeData::MatchArm { is_wildcard };

        if is_wildcard {
            self.advance();
        } else {
            // Pattern must be a literal (string, number, or bool)
            let pattern = match self.current().kind {
                TokenKind::Str => self.parse_string(),
                TokenKind::Number => self.parse_number(),
                TokenKind::True | TokenKind::False => self.parse_bool(),
                _ => {
                    self.error("Match pattern must be a literal or '_'");
                    NULL_NODE
                }
            };
            if pattern != NULL_NODE {
                self.arena.add_child(node, pattern);
            }
        }

        self.consume(TokenKind::Colon, "Expected ':' after match pattern");

        let body = self.parse_expression();
        if body != NULL_NODE {
            self.arena.add_child(node, body);
        }

        node
    }

    // Mini-notation literals

    fn parse_mini_literal(&mut self) -> NodeIndex {
        let kw_tok = self.advance();
        let pattern_kind = match kw_tok.kind {
            TokenKind::Pat => PatternKind::Pat,
            TokenKind::Seq => PatternKind::Seq,
            TokenKind::Timeline => PatternKind::Timeline,
            TokenKind::Note => PatternKind::Note,
            _ => {
                self.error("Expected pattern keyword");
                return NULL_NODE;
            }
        };

        let node = self.make_node(NodeKind::MiniLiteral, kw_tok.location);
        self.arena[node].data = NodeData::Pattern(pattern_kind);

        self.consume(TokenKind::LParen, "Expected '(' after pattern keyword");

        if !self.check(TokenKind::Str) {
            self.error("Expected string for mini-notation pattern");
            return node;
        }

        let str_tok = self.advance();
        let pattern_text = match &str_tok.value {
            TokenValue::Str(s) => s.clone(),
            _ => String::new(),
        };

        // The pattern content starts one character after the opening quote
        let base = SourceLocation::new(
            str_tok.location.line,
            str_tok.location.column + 1,
            str_tok.location.offset + 1,
            pattern_text.len() as u32,
        );

        let (mini_root, mini_diags) = parse_mini(&pattern_text, &mut self.arena, base, false);
        self.diagnostics.extend(mini_diags);
        if mini_root != NULL_NODE {
            self.arena.add_child(node, mini_root);
        }

        // Optional second argument: closure receiving (trigger, velocity, pitch)
        if self.matches(TokenKind::Comma) {
            if self.check(TokenKind::LParen) {
                self.advance();
                let closure = self.parse_closure();
                if closure != NULL_NODE {
                    self.arena.add_child(node, closure);
                }
            } else {
                self.error("Expected closure after comma in pattern");
            }
        }

        self.consume(TokenKind::RParen, "Expected ')' after pattern arguments");
        node
    }
}

/// Parse a token stream into an AST
pub fn parse(tokens: Vec<Token>, filename: &str) -> (Ast, Vec<Diagnostic>) {
    Parser::new(tokens, filename).parse()
}
