// Keyword-prefix statement classifier
use crate::types::{Operation, Target};
use once_cell::sync::Lazy;
use regex::Regex;

static SETVAL_ARGUMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)\bsetval\s*\(\s*'((?:[^']|'')*)'").expect("setval pattern is valid")
});

/// Find the object a statement acts on and how.
///
/// Matching is purely lexical: a leading `WITH` clause is skipped when its
/// shape is recognised, then the statement is matched against a fixed,
/// ordered list of keyword prefixes. Statements that match nothing return
/// `None` and are never subject to table filtering.
///
/// When a `WITH` clause does not have the expected
/// `name [(cols)] AS [[NOT] MATERIALIZED] (...)` shape, matching restarts from
/// the beginning of the statement, which leaves it unclassified.
pub fn classify(sql: &str) -> Option<Target> {
    let mut cursor = Cursor::new(sql);
    cursor.skip_trivia();
    let start = cursor.pos;

    if !skip_cte_prefix(&mut cursor) {
        cursor.pos = start;
    }

    classify_body(&mut cursor)
}

fn classify_body(cursor: &mut Cursor<'_>) -> Option<Target> {
    let target = |identifier: String, operation| Target { identifier, operation };

    if cursor.keyword("COPY") {
        cursor.skip_modifiers(true);
        return cursor.identifier().map(|id| target(id, Operation::Copy));
    }
    if cursor.keywords(&["INSERT", "INTO"]) {
        return cursor.identifier().map(|id| target(id, Operation::Insert));
    }
    if cursor.keyword("UPDATE") {
        cursor.skip_modifiers(true);
        return cursor.identifier().map(|id| target(id, Operation::Update));
    }
    if cursor.keywords(&["DELETE", "FROM"]) {
        cursor.skip_modifiers(true);
        return cursor.identifier().map(|id| target(id, Operation::Delete));
    }

    let simple_rules: [(&[&str], Operation, bool); 7] = [
        (&["ALTER", "TABLE"], Operation::AlterTable, true),
        (&["ALTER", "INDEX"], Operation::AlterIndex, false),
        (&["ALTER", "SEQUENCE"], Operation::AlterSequence, false),
        (&["DROP", "TABLE"], Operation::DropTable, true),
        (&["DROP", "INDEX"], Operation::DropIndex, false),
        (&["DROP", "SEQUENCE"], Operation::DropSequence, false),
        (&["CREATE", "TABLE"], Operation::CreateTable, false),
    ];
    for (prefix, operation, allow_only) in simple_rules {
        if cursor.keywords(prefix) {
            if operation == Operation::DropIndex {
                cursor.keyword("CONCURRENTLY");
            }
            cursor.skip_modifiers(allow_only);
            return cursor.identifier().map(|id| target(id, operation));
        }
    }

    if cursor.keywords(&["CREATE", "INDEX"]) || cursor.keywords(&["CREATE", "UNIQUE", "INDEX"]) {
        if !cursor.advance_to_keyword("ON") {
            return None;
        }
        cursor.skip_modifiers(true);
        return cursor.identifier().map(|id| target(id, Operation::CreateIndex));
    }

    if cursor.keyword("SELECT") {
        let rest = cursor.rest();
        let captures = SETVAL_ARGUMENT.captures(rest)?;
        let name = captures.get(1)?.as_str().replace("''", "'");
        if name.trim().is_empty() {
            return None;
        }
        return Some(target(name, Operation::SetSequenceValue));
    }

    None
}

/// Skip `WITH [RECURSIVE] name [(cols)] AS [[NOT] MATERIALIZED] (...) [, ...]`.
///
/// Returns false when the clause is absent or not fully recognised.
fn skip_cte_prefix(cursor: &mut Cursor<'_>) -> bool {
    if !cursor.keyword("WITH") {
        return false;
    }
    cursor.keyword("RECURSIVE");

    loop {
        if cursor.identifier().is_none() {
            return false;
        }
        cursor.skip_trivia();
        if cursor.peek() == Some(b'(') && !cursor.skip_parenthesized() {
            return false;
        }
        if !cursor.keyword("AS") {
            return false;
        }
        if cursor.keyword("NOT") {
            if !cursor.keyword("MATERIALIZED") {
                return false;
            }
        } else {
            cursor.keyword("MATERIALIZED");
        }
        cursor.skip_trivia();
        if cursor.peek() != Some(b'(') || !cursor.skip_parenthesized() {
            return false;
        }
        cursor.skip_trivia();
        if !cursor.eat(b',') {
            return true;
        }
    }
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b >= 0x80
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'.' || b >= 0x80
}

/// Byte cursor over statement text; only ever stops on ASCII boundaries
pub(crate) struct Cursor<'a> {
    text: &'a str,
    pub(crate) pos: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    fn bytes(&self) -> &'a [u8] {
        self.text.as_bytes()
    }

    pub(crate) fn peek(&self) -> Option<u8> {
        self.bytes().get(self.pos).copied()
    }

    pub(crate) fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    pub(crate) fn eat(&mut self, b: u8) -> bool {
        if self.peek() == Some(b) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Skip whitespace and comments
    pub(crate) fn skip_trivia(&mut self) {
        let bytes = self.bytes();
        loop {
            while self.pos < bytes.len() && bytes[self.pos].is_ascii_whitespace() {
                self.pos += 1;
            }
            let rest = &bytes[self.pos..];
            if rest.starts_with(b"--") {
                self.pos = match rest.iter().position(|&b| b == b'\n') {
                    Some(idx) => self.pos + idx + 1,
                    None => bytes.len(),
                };
            } else if rest.starts_with(b"/*") {
                self.pos = match rest[2..].windows(2).position(|w| w == b"*/") {
                    Some(idx) => self.pos + idx + 4,
                    None => bytes.len(),
                };
            } else {
                return;
            }
        }
    }

    /// Consume `word` case-insensitively if it is the next whole word
    pub(crate) fn keyword(&mut self, word: &str) -> bool {
        let saved = self.pos;
        self.skip_trivia();
        let bytes = self.bytes();
        let end = self.pos + word.len();
        let matches = end <= bytes.len()
            && bytes[self.pos..end].eq_ignore_ascii_case(word.as_bytes())
            && bytes.get(end).map_or(true, |&b| !is_word_byte(b));
        if matches {
            self.pos = end;
        } else {
            self.pos = saved;
        }
        matches
    }

    /// Consume a whole keyword sequence or nothing
    pub(crate) fn keywords(&mut self, words: &[&str]) -> bool {
        let saved = self.pos;
        if words.iter().all(|word| self.keyword(word)) {
            true
        } else {
            self.pos = saved;
            false
        }
    }

    /// Skip optional `ONLY` and `IF [NOT] EXISTS`, in either order
    pub(crate) fn skip_modifiers(&mut self, allow_only: bool) {
        loop {
            if allow_only && self.keyword("ONLY") {
                continue;
            }
            if self.keywords(&["IF", "NOT", "EXISTS"]) || self.keywords(&["IF", "EXISTS"]) {
                continue;
            }
            return;
        }
    }

    /// Move past the next top-level occurrence of `word`
    fn advance_to_keyword(&mut self, word: &str) -> bool {
        loop {
            if self.keyword(word) {
                return true;
            }
            self.skip_trivia();
            match self.peek() {
                None => return false,
                Some(b'"') | Some(b'\'') => {
                    self.skip_quoted();
                }
                Some(b'(') => {
                    if !self.skip_parenthesized() {
                        return false;
                    }
                }
                Some(b) if is_word_byte(b) => {
                    while self.peek().map_or(false, is_word_byte) {
                        self.pos += 1;
                    }
                }
                Some(_) => self.pos += 1,
            }
        }
    }

    /// Read a possibly quoted, possibly qualified identifier as written
    pub(crate) fn identifier(&mut self) -> Option<String> {
        self.skip_trivia();
        let begin = self.pos;
        loop {
            match self.peek() {
                Some(b'"') => self.skip_quoted(),
                Some(b) if is_name_byte(b) => {
                    while self.peek().map_or(false, is_name_byte) {
                        self.pos += 1;
                    }
                }
                _ => break,
            }
        }
        if self.pos == begin {
            None
        } else {
            Some(self.text[begin..self.pos].to_string())
        }
    }

    /// Skip a `'...'` or `"..."` run at the cursor; doubled quotes are escapes
    fn skip_quoted(&mut self) {
        let Some(quote) = self.peek() else {
            return;
        };
        self.pos += 1;
        while let Some(b) = self.peek() {
            self.pos += 1;
            if b == quote {
                if self.peek() == Some(quote) {
                    self.pos += 1;
                } else {
                    return;
                }
            }
        }
    }

    /// Skip a balanced `( ... )` group at the cursor, honouring quotes
    pub(crate) fn skip_parenthesized(&mut self) -> bool {
        if !self.eat(b'(') {
            return false;
        }
        let mut depth = 1usize;
        while let Some(b) = self.peek() {
            match b {
                b'\'' | b'"' => {
                    self.skip_quoted();
                    continue;
                }
                b'-' | b'/' => {
                    let before = self.pos;
                    self.skip_trivia();
                    if self.pos != before {
                        continue;
                    }
                }
                b'(' => depth += 1,
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        self.pos += 1;
                        return true;
                    }
                }
                _ => {}
            }
            self.pos += 1;
        }
        false
    }
}
