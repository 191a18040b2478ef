//! Recursive-descent parser for mini-notation patterns
//!
//! Consumes a mini token stream and writes into the shared AST arena,
//! producing a `MiniPattern` root whose children are the top-level
//! elements. Unknown modifiers report an error but parsing continues.

use crate::ast::{
    AstArena, MiniAtomKind, MiniModifierKind, NodeData, NodeIndex, NodeKind, NULL_NODE,
};
use crate::diagnostics::{Diagnostic, SourceLocation};
use crate::mini_lexer::lex_mini;
use crate::mini_token::{MiniToken, MiniTokenKind, MiniTokenValue};

pub struct MiniParser<'a> {
    tokens: Vec<MiniToken>,
    arena: &'a mut AstArena,
    base: SourceLocation,
    current_idx: usize,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> MiniParser<'a> {
    pub fn new(tokens: Vec<MiniToken>, arena: &'a mut AstArena, base: SourceLocation) -> Self {
        Self {
            tokens,
            arena,
            base,
            current_idx: 0,
            diagnostics: Vec::new(),
        }
    }

    pub fn parse(mut self) -> (NodeIndex, Vec<Diagnostic>) {
        if self.tokens.is_empty() || (self.tokens.len() == 1 && self.tokens[0].is_eof()) {
            let root = self.arena.alloc(NodeKind::MiniPattern, self.base);
            return (root, self.diagnostics);
        }
        let root = self.parse_pattern();
        (root, self.diagnostics)
    }

    fn current(&self) -> &MiniToken {
        self.tokens
            .get(self.current_idx)
            .unwrap_or_else(|| self.tokens.last().expect("token stream ends with Eof"))
    }

    fn previous(&self) -> &MiniToken {
        &self.tokens[self.current_idx.saturating_sub(1)]
    }

    fn is_at_end(&self) -> bool {
        self.current().kind == MiniTokenKind::Eof
    }

    fn check(&self, kind: MiniTokenKind) -> bool {
        self.current().kind == kind
    }

    fn matches(&mut self, kind: MiniTokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            return true;
        }
        false
    }

    fn advance(&mut self) -> &MiniToken {
        if !self.is_at_end() {
            self.current_idx += 1;
        }
        self.previous()
    }

    fn consume(&mut self, kind: MiniTokenKind, message: &str) {
        if self.check(kind) {
            self.advance();
        } else {
            self.error(message);
        }
    }

    fn error(&mut self, message: &str) {
        let location = self.current().location;
        self.diagnostics.push(Diagnostic::error(
            "MP01",
            message,
            "<pattern>",
            location,
        ));
    }

    fn parse_pattern(&mut self) -> NodeIndex {
        let root = self.arena.alloc(NodeKind::MiniPattern, self.current().location);

        while !self.is_at_end() {
            let element = self.parse_choice();
            if element == NULL_NODE {
                // Could not make progress; skip the offending token
                if !self.is_at_end() {
                    self.error("Unexpected token in pattern");
                    self.advance();
                }
                continue;
            }
            self.arena.add_child(root, element);
        }

        root
    }

    /// choice = element { "|" element }
    fn parse_choice(&mut self) -> NodeIndex {
        let left = self.parse_element();
        if left == NULL_NODE {
            return NULL_NODE;
        }

        if !self.check(MiniTokenKind::Pipe) {
            return left;
        }

        let choice = self.arena.alloc(NodeKind::MiniChoice, self.current().location);
        self.arena.add_child(choice, left);

        while self.matches(MiniTokenKind::Pipe) {
            let right = self.parse_element();
            if right == NULL_NODE {
                self.error("Expected element after '|'");
                break;
            }
            self.arena.add_child(choice, right);
        }

        choice
    }

    /// element = atom [ euclidean ] [ modifiers ]
    fn parse_element(&mut self) -> NodeIndex {
        let mut atom = self.parse_atom();
        if atom == NULL_NODE {
            return NULL_NODE;
        }

        if self.check(MiniTokenKind::LParen) {
            atom = self.parse_euclidean(atom);
        }

        if matches!(
            self.current().kind,
            MiniTokenKind::Star
                | MiniTokenKind::Slash
                | MiniTokenKind::Colon
                | MiniTokenKind::At
                | MiniTokenKind::Bang
                | MiniTokenKind::Question
        ) {
            atom = self.parse_modifiers(atom);
        }

        atom
    }

    fn parse_atom(&mut self) -> NodeIndex {
        match self.current().kind {
            MiniTokenKind::Pitch => {
                self.advance();
                self.make_pitch_atom()
            }
            MiniTokenKind::Sample => {
                self.advance();
                self.make_sample_atom()
            }
            MiniTokenKind::Rest => {
                self.advance();
                self.make_rest_atom()
            }
            MiniTokenKind::LBracket => self.parse_group(),
            MiniTokenKind::LAngle => self.parse_sequence(),
            MiniTokenKind::LBrace => self.parse_polymeter(),
            _ => NULL_NODE,
        }
    }

    fn make_pitch_atom(&mut self) -> NodeIndex {
        let tok = self.previous().clone();
        let node = self.arena.alloc(NodeKind::MiniAtom, tok.location);
        if let MiniTokenValue::Pitch { midi_note, .. } = tok.value {
            self.arena[node].data = NodeData::MiniAtom {
                kind: MiniAtomKind::Pitch,
                midi_note,
                sample_name: String::new(),
                sample_variant: 0,
            };
        }
        node
    }

    fn make_sample_atom(&mut self) -> NodeIndex {
        let tok = self.previous().clone();
        let node = self.arena.alloc(NodeKind::MiniAtom, tok.location);
        if let MiniTokenValue::Sample { name, variant } = tok.value {
            self.arena[node].data = NodeData::MiniAtom {
                kind: MiniAtomKind::Sample,
                midi_note: 0,
                sample_name: name,
                sample_variant: variant,
            };
        }
        node
    }

    fn make_rest_atom(&mut self) -> NodeIndex {
        let location = self.previous().location;
        let node = self.arena.alloc(NodeKind::MiniAtom, location);
        self.arena[node].data = NodeData::MiniAtom {
            kind: MiniAtomKind::Rest,
            midi_note: 0,
            sample_name: String::new(),
            sample_variant: 0,
        };
        node
    }

    /// group = "[" choice* "]", polyrhythm = "[" choice { "," choice } "]"
    fn parse_group(&mut self) -> NodeIndex {
        let open_loc = self.current().location;
        self.advance(); // '['

        let mut elements = Vec::new();
        let mut is_polyrhythm = false;

        if !self.is_at_end() && !self.check(MiniTokenKind::RBracket) {
            let first = self.parse_choice();
            if first != NULL_NODE {
                elements.push(first);
            }

            if self.check(MiniTokenKind::Comma) {
                is_polyrhythm = true;
                while self.matches(MiniTokenKind::Comma) {
                    let elem = self.parse_choice();
                    if elem == NULL_NODE {
                        self.error("Expected element after ','");
                        break;
                    }
                    elements.push(elem);
                }
            } else {
                while !self.is_at_end() && !self.check(MiniTokenKind::RBracket) {
                    let elem = self.parse_choice();
                    if elem == NULL_NODE {
                        break;
                    }
                    elements.push(elem);
                }
            }
        }

        self.consume(MiniTokenKind::RBracket, "Expected ']' after group");

        let kind = if is_polyrhythm {
            NodeKind::MiniPolyrhythm
        } else {
            NodeKind::MiniGroup
        };
        let node = self.arena.alloc(kind, open_loc);
        for elem in elements {
            self.arena.add_child(node, elem);
        }
        node
    }

    /// sequence = "<" choice* ">" (one child per cycle, rotating)
    fn parse_sequence(&mut self) -> NodeIndex {
        let open_loc = self.current().location;
        self.advance(); // '<'

        let node = self.arena.alloc(NodeKind::MiniSequence, open_loc);

        while !self.is_at_end() && !self.check(MiniTokenKind::RAngle) {
            let elem = self.parse_choice();
            if elem == NULL_NODE {
                break;
            }
            self.arena.add_child(node, elem);
        }

        self.consume(MiniTokenKind::RAngle, "Expected '>' after sequence");
        node
    }

    /// polymeter = "{" choice* "}" [ "%" number ]
    fn parse_polymeter(&mut self) -> NodeIndex {
        let open_loc = self.current().location;
        self.advance(); // '{'

        let node = self.arena.alloc(NodeKind::MiniPolymeter, open_loc);

        while !self.is_at_end() && !self.check(MiniTokenKind::RBrace) {
            let elem = self.parse_choice();
            if elem == NULL_NODE {
                break;
            }
            self.arena.add_child(node, elem);
        }

        self.consume(MiniTokenKind::RBrace, "Expected '}' after polymeter");

        // 0 means: use the child count
        let mut step_count = 0u8;
        if self.matches(MiniTokenKind::Percent) {
            if self.check(MiniTokenKind::Number) {
                step_count = self.current().number().unwrap_or(0.0) as u8;
                self.advance();
            } else {
                self.error("Expected step count after '%'");
            }
        }

        self.arena[node].data = NodeData::MiniPolymeter { step_count };
        node
    }

    /// euclidean = atom "(" number "," number [ "," number ] ")"
    fn parse_euclidean(&mut self, atom: NodeIndex) -> NodeIndex {
        let open_loc = self.current().location;
        self.advance(); // '('

        if !self.matches(MiniTokenKind::Number) {
            self.error("Expected number for euclidean hits");
            return atom;
        }
        let hits = self.previous().number().unwrap_or(0.0);

        self.consume(MiniTokenKind::Comma, "Expected ',' after euclidean hits");

        if !self.matches(MiniTokenKind::Number) {
            self.error("Expected number for euclidean steps");
            return atom;
        }
        let steps = self.previous().number().unwrap_or(0.0);

        let mut rotation = 0.0;
        if self.matches(MiniTokenKind::Comma) {
            if self.matches(MiniTokenKind::Number) {
                rotation = self.previous().number().unwrap_or(0.0);
            } else {
                self.error("Expected number for euclidean rotation");
            }
        }

        self.consume(MiniTokenKind::RParen, "Expected ')' after euclidean parameters");

        let node = self.arena.alloc(NodeKind::MiniEuclidean, open_loc);
        self.arena[node].data = NodeData::MiniEuclidean {
            hits: hits as u8,
            steps: steps as u8,
            rotation: rotation as u8,
        };
        self.arena.add_child(node, atom);
        node
    }

    /// modifiers = { ("*" | "/" | ":" | "@" | "!" | "?") [number] }
    fn parse_modifiers(&mut self, mut atom: NodeIndex) -> NodeIndex {
        loop {
            let kind = match self.current().kind {
                MiniTokenKind::Star => MiniModifierKind::Speed,
                MiniTokenKind::Slash => MiniModifierKind::Slow,
                MiniTokenKind::Colon => MiniModifierKind::Duration,
                MiniTokenKind::At => MiniModifierKind::Weight,
                MiniTokenKind::Bang => MiniModifierKind::Repeat,
                MiniTokenKind::Question => MiniModifierKind::Chance,
                _ => break,
            };
            self.advance();

            let value = if self.check(MiniTokenKind::Number) {
                self.advance();
                self.previous().number().unwrap_or(1.0) as f32
            } else {
                match kind {
                    // `!` without a number means 2 repeats, `?` means 50%
                    MiniModifierKind::Repeat => 2.0,
                    MiniModifierKind::Chance => 0.5,
                    _ => {
                        self.error("Expected number after modifier");
                        1.0
                    }
                }
            };

            let location = self.previous().location;
            let modified = self.arena.alloc(NodeKind::MiniModified, location);
            self.arena[modified].data = NodeData::MiniModifier { kind, value };
            self.arena.add_child(modified, atom);
            atom = modified;
        }

        atom
    }
}

/// Lex and parse a pattern string into the given arena
pub fn parse_mini(
    pattern: &str,
    arena: &mut AstArena,
    base: SourceLocation,
    sample_only: bool,
) -> (NodeIndex, Vec<Diagnostic>) {
    let (tokens, mut diagnostics) = lex_mini(pattern, base, sample_only);
    let (root, parse_diags) = MiniParser::new(tokens, arena, base).parse();
    diagnostics.extend(parse_diags);
    (root, diagnostics)
}
