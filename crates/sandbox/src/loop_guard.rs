//! Loop guard rewrite.
//!
//! Injects a hidden iteration counter into every `while`, `for` and
//! `do … while` loop so a runaway loop throws instead of hanging the
//! boundary. The rewrite is textual: a small lexer skips strings, template
//! literals, comments and regular expression literals, and every edit is an
//! insertion except turning the `while` keyword into `for`.
//!
//! ```text
//! while (C) S              for (let G = { n: 0 }; C; ) if (++G.n > MAX) { throw … } else S
//! for (I; T; U) S          for (I, G = { n: 0 }; T; U) if (++G.n > MAX) { throw … } else S
//! do S while (C);          do S while ((C) ? (++G.n <= MAX || EXCEEDED()) : (G.n = 0, false));
//! ```
//!
//! `for … in`, `for … of` and `for await` loops iterate finite collections
//! and are left alone.
//!
//! `do … while` counters are declared once per program, after any leading
//! directives such as `'use strict';`. A recursive call that re-enters the
//! same `do` loop shares its counter with the outer activation, so deep
//! recursion through one `do` loop can trip the limit early.

/// Default iteration cap per loop entry.
pub const DEFAULT_MAX_ITERATIONS: u64 = 100_000;

const GUARD_PREFIX: &str = "__loopGuard";

/// Rewrite `code` so that no loop runs more than `max_iterations` times.
pub fn harden_loops(code: &str, max_iterations: u64) -> String {
    let tokens = Lexer::new(code).tokenize();
    let prefix = unique_prefix(code);
    let mut rewriter = Rewriter::new(code, &tokens, &prefix, max_iterations);
    rewriter.collect();
    let hardened = rewriter.apply();

    tracing::trace!(
        sites = rewriter.sites,
        do_sites = rewriter.do_sites.len(),
        "Loop guard applied"
    );
    hardened
}

/// Message thrown by a tripped guard.
pub fn limit_message(max_iterations: u64) -> String {
    format!(
        "Infinite loop detected: Loop exceeded {} iterations",
        max_iterations
    )
}

fn unique_prefix(code: &str) -> String {
    let mut prefix = GUARD_PREFIX.to_string();
    let mut attempt = 0;
    while code.contains(&prefix) {
        attempt += 1;
        prefix = format!("{}{}x", GUARD_PREFIX, attempt);
    }
    prefix
}

// =============================================================================
// Lexer
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Word,
    Punct(u8),
    /// String, template chunk or regex literal. Numbers lex as words.
    Literal,
}

#[derive(Debug, Clone, Copy)]
struct Token {
    kind: Kind,
    start: usize,
    end: usize,
}

/// Words after which a `/` starts a regular expression.
const REGEX_PRECEDING_WORDS: &[&str] = &[
    "return", "typeof", "instanceof", "in", "of", "new", "delete", "void", "throw", "case",
    "do", "else", "yield", "await",
];

struct Lexer<'a> {
    src: &'a [u8],
    text: &'a str,
    pos: usize,
    tokens: Vec<Token>,
    /// Brace depth at which each open `${` started.
    templates: Vec<usize>,
    depth: usize,
}

impl<'a> Lexer<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            src: text.as_bytes(),
            text,
            pos: 0,
            tokens: Vec::new(),
            templates: Vec::new(),
            depth: 0,
        }
    }

    fn peek(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn push(&mut self, kind: Kind, start: usize) {
        self.tokens.push(Token {
            kind,
            start,
            end: self.pos,
        });
    }

    fn tokenize(mut self) -> Vec<Token> {
        while let Some(c) = self.peek(0) {
            let start = self.pos;
            match c {
                b'/' if self.peek(1) == Some(b'/') => self.skip_line_comment(),
                b'/' if self.peek(1) == Some(b'*') => self.skip_block_comment(),
                b'/' if self.regex_allowed() && self.scan_regex() => {
                    self.push(Kind::Literal, start);
                }
                b'\'' | b'"' => {
                    self.scan_string(c);
                    self.push(Kind::Literal, start);
                }
                b'`' => {
                    self.pos += 1;
                    self.scan_template(start);
                }
                b'{' => {
                    self.pos += 1;
                    self.depth += 1;
                    self.push(Kind::Punct(c), start);
                }
                b'}' if self.templates.last() == Some(&self.depth) => {
                    self.templates.pop();
                    self.pos += 1;
                    self.scan_template(start);
                }
                b'}' => {
                    self.pos += 1;
                    self.depth = self.depth.saturating_sub(1);
                    self.push(Kind::Punct(c), start);
                }
                c if is_ident_byte(c) => {
                    while self.peek(0).is_some_and(is_ident_byte) {
                        self.pos += 1;
                    }
                    self.push(Kind::Word, start);
                }
                c if c.is_ascii_whitespace() => self.pos += 1,
                _ => {
                    self.pos += 1;
                    self.push(Kind::Punct(c), start);
                }
            }
        }
        self.tokens
    }

    fn skip_line_comment(&mut self) {
        while self.peek(0).is_some_and(|c| c != b'\n') {
            self.pos += 1;
        }
    }

    fn skip_block_comment(&mut self) {
        self.pos += 2;
        while let Some(c) = self.peek(0) {
            if c == b'*' && self.peek(1) == Some(b'/') {
                self.pos += 2;
                return;
            }
            self.pos += 1;
        }
    }

    fn scan_string(&mut self, quote: u8) {
        self.pos += 1;
        while let Some(c) = self.peek(0) {
            self.pos += 1;
            match c {
                b'\\' => self.pos += 1,
                b'\n' => return,
                c if c == quote => return,
                _ => {}
            }
        }
        self.pos = self.pos.min(self.src.len());
    }

    /// Scan template text up to the closing backtick or the next `${`.
    fn scan_template(&mut self, start: usize) {
        while let Some(c) = self.peek(0) {
            match c {
                b'\\' => self.pos += 2,
                b'`' => {
                    self.pos += 1;
                    self.push(Kind::Literal, start);
                    return;
                }
                b'$' if self.peek(1) == Some(b'{') => {
                    self.pos += 2;
                    self.push(Kind::Literal, start);
                    self.templates.push(self.depth);
                    return;
                }
                _ => self.pos += 1,
            }
        }
        self.pos = self.pos.min(self.src.len());
        self.push(Kind::Literal, start);
    }

    fn regex_allowed(&self) -> bool {
        let Some(last) = self.tokens.last() else {
            return true;
        };
        match last.kind {
            Kind::Punct(b')' | b']') | Kind::Literal => false,
            Kind::Punct(_) => true,
            Kind::Word => REGEX_PRECEDING_WORDS.contains(&&self.text[last.start..last.end]),
        }
    }

    /// Consume a regex literal. Returns `false` and rewinds when the slash
    /// turns out to be a division after all.
    fn scan_regex(&mut self) -> bool {
        let start = self.pos;
        self.pos += 1;
        let mut in_class = false;
        while let Some(c) = self.peek(0) {
            self.pos += 1;
            match c {
                b'\\' => self.pos += 1,
                b'\n' => break,
                b'[' => in_class = true,
                b']' => in_class = false,
                b'/' if !in_class => {
                    while self.peek(0).is_some_and(is_ident_byte) {
                        self.pos += 1;
                    }
                    return true;
                }
                _ => {}
            }
        }
        self.pos = start;
        false
    }
}

fn is_ident_byte(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_' || c == b'$' || c >= 0x80
}

// =============================================================================
// Rewriter
// =============================================================================

struct Edit {
    at: usize,
    remove: usize,
    text: String,
}

struct Rewriter<'a> {
    code: &'a str,
    tokens: &'a [Token],
    prefix: &'a str,
    max: u64,
    edits: Vec<Edit>,
    sites: usize,
    do_sites: Vec<String>,
}

impl<'a> Rewriter<'a> {
    fn new(code: &'a str, tokens: &'a [Token], prefix: &'a str, max: u64) -> Self {
        Self {
            code,
            tokens,
            prefix,
            max,
            edits: Vec::new(),
            sites: 0,
            do_sites: Vec::new(),
        }
    }

    fn text(&self, index: usize) -> &str {
        let token = self.tokens[index];
        &self.code[token.start..token.end]
    }

    fn is_word(&self, index: usize, word: &str) -> bool {
        index < self.tokens.len()
            && self.tokens[index].kind == Kind::Word
            && self.text(index) == word
    }

    fn is_punct(&self, index: usize, c: u8) -> bool {
        self.tokens.get(index).is_some_and(|t| t.kind == Kind::Punct(c))
    }

    /// A keyword use, as opposed to a property name such as `obj.for`.
    fn is_keyword(&self, index: usize, word: &str) -> bool {
        self.is_word(index, word) && !(index > 0 && self.is_punct(index - 1, b'.'))
    }

    fn next_guard(&mut self) -> String {
        let name = format!("{}_{}", self.prefix, self.sites);
        self.sites += 1;
        name
    }

    fn insert(&mut self, at: usize, text: String) {
        self.edits.push(Edit { at, remove: 0, text });
    }

    fn collect(&mut self) {
        let mut depth = 0usize;
        let mut do_stack: Vec<usize> = Vec::new();

        for i in 0..self.tokens.len() {
            match self.tokens[i].kind {
                Kind::Punct(b'{') => depth += 1,
                Kind::Punct(b'}') => {
                    depth = depth.saturating_sub(1);
                    while do_stack.last().is_some_and(|&d| d > depth) {
                        do_stack.pop();
                    }
                }
                Kind::Word if self.is_keyword(i, "do") => do_stack.push(depth),
                Kind::Word if self.is_keyword(i, "while") && self.is_punct(i + 1, b'(') => {
                    let Some(close) = self.matching_paren(i + 1) else {
                        continue;
                    };
                    let closes_do_body = i > 0
                        && (self.is_punct(i - 1, b'}') || self.is_punct(i - 1, b';'))
                        && do_stack.last() == Some(&depth);
                    if closes_do_body {
                        do_stack.pop();
                        self.guard_do_tail(i + 1, close);
                    } else {
                        self.guard_while(i, close);
                    }
                }
                Kind::Word if self.is_keyword(i, "for") && self.is_punct(i + 1, b'(') => {
                    if let Some(close) = self.matching_paren(i + 1) {
                        self.guard_for(i + 1, close);
                    }
                }
                _ => {}
            }
        }
    }

    fn matching_paren(&self, open: usize) -> Option<usize> {
        let mut level = 0usize;
        for (offset, token) in self.tokens[open..].iter().enumerate() {
            match token.kind {
                Kind::Punct(b'(') => level += 1,
                Kind::Punct(b')') => {
                    level -= 1;
                    if level == 0 {
                        return Some(open + offset);
                    }
                }
                _ => {}
            }
        }
        None
    }

    /// Indices of the semicolons that split a `for` header.
    fn header_semicolons(&self, open: usize, close: usize) -> Vec<usize> {
        let mut nesting = 0usize;
        let mut found = Vec::new();
        for i in open + 1..close {
            match self.tokens[i].kind {
                Kind::Punct(b'(' | b'[' | b'{') => nesting += 1,
                Kind::Punct(b')' | b']' | b'}') => nesting = nesting.saturating_sub(1),
                Kind::Punct(b';') if nesting == 0 => found.push(i),
                _ => {}
            }
        }
        found
    }

    fn body_guard(&self, guard: &str) -> String {
        format!(
            " if (++{}.n > {}) {{ throw new Error(\"{}\") }} else ",
            guard,
            self.max,
            limit_message(self.max)
        )
    }

    fn guard_while(&mut self, keyword: usize, close: usize) {
        let guard = self.next_guard();
        let keyword_token = self.tokens[keyword];
        let open = self.tokens[keyword + 1];
        let close_token = self.tokens[close];

        self.edits.push(Edit {
            at: keyword_token.start,
            remove: keyword_token.end - keyword_token.start,
            text: "for".to_string(),
        });
        self.insert(open.end, format!("let {} = {{ n: 0 }}; ", guard));
        self.insert(close_token.start, "; ".to_string());
        let body = self.body_guard(&guard);
        self.insert(close_token.end, body);
    }

    fn guard_for(&mut self, open: usize, close: usize) {
        let semicolons = self.header_semicolons(open, close);
        if semicolons.len() != 2 {
            return;
        }
        let first = semicolons[0];
        let guard = self.next_guard();
        let open_token = self.tokens[open];
        let first_token = self.tokens[first];

        if first == open + 1 {
            self.insert(first_token.start, format!("let {} = {{ n: 0 }}", guard));
        } else if ["let", "const", "var"].iter().any(|kw| self.is_word(open + 1, kw)) {
            self.insert(first_token.start, format!(", {} = {{ n: 0 }}", guard));
        } else {
            self.insert(open_token.end, format!("let {} = (", guard));
            self.insert(first_token.start, ", { n: 0 })".to_string());
        }

        let body = self.body_guard(&guard);
        self.insert(self.tokens[close].end, body);
    }

    fn guard_do_tail(&mut self, open: usize, close: usize) {
        let guard = self.next_guard();
        let open_token = self.tokens[open];
        let close_token = self.tokens[close];

        self.insert(open_token.end, "(".to_string());
        self.insert(
            close_token.start,
            format!(
                ") ? (++{g}.n <= {max} || {p}_exceeded()) : ({g}.n = 0, false)",
                g = guard,
                max = self.max,
                p = self.prefix
            ),
        );
        self.do_sites.push(guard);
    }

    fn prologue(&self) -> String {
        if self.do_sites.is_empty() {
            return String::new();
        }
        let counters = self
            .do_sites
            .iter()
            .map(|g| format!("{} = {{ n: 0 }}", g))
            .collect::<Vec<_>>()
            .join(", ");
        // Kept on one line so reported line numbers stay accurate.
        format!(
            "var {}; function {}_exceeded() {{ throw new Error(\"{}\") }} ",
            counters,
            self.prefix,
            limit_message(self.max)
        )
    }

    /// Byte offset just past the program's directive prologue. Only
    /// directives terminated by `;` are recognised.
    fn directives_end(&self) -> usize {
        let mut end = 0;
        let mut i = 0;
        while i + 1 < self.tokens.len() {
            let token = self.tokens[i];
            let quoted = matches!(self.code.as_bytes()[token.start], b'\'' | b'"');
            if token.kind != Kind::Literal || !quoted || self.tokens[i + 1].kind != Kind::Punct(b';') {
                break;
            }
            end = self.tokens[i + 1].end;
            i += 2;
        }
        end
    }

    fn apply(&mut self) -> String {
        self.edits.sort_by_key(|edit| edit.at);

        let mut out = String::with_capacity(self.code.len() + self.edits.len() * 64);
        // Edits never fall inside the directives, which are only strings.
        let mut cursor = self.directives_end();
        out.push_str(&self.code[..cursor]);
        out.push_str(&self.prologue());
        for edit in &self.edits {
            out.push_str(&self.code[cursor..edit.at]);
            out.push_str(&edit.text);
            cursor = edit.at + edit.remove;
        }
        out.push_str(&self.code[cursor..]);
        out
    }
}
