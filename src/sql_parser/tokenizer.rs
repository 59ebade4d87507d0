// SQL script tokenizer: splits a dump into top-level statements
use crate::error::SeedError;
use crate::types::{snippet, ParsePosition, Statement};
use bytes::Bytes;
use tracing::debug;

/// Lexical state of the scanner
#[derive(Debug, Clone, PartialEq, Eq)]
enum LexMode {
    Normal,
    LineComment,
    BlockComment,
    /// Inside `$tag$ ... $tag$`; holds the full delimiter including both `$`
    DollarBody(Vec<u8>),
    SingleQuote,
    DoubleQuote,
}

/// Split a SQL script into statements.
///
/// Statements end at a `;` outside of quotes, comments and dollar-quoted
/// bodies. `COPY ... FROM STDIN` statements capture the inline rows up to the
/// `\.` terminator line as their payload. Content left after the last
/// terminator is reported as an unterminated statement.
pub fn parse(source: &[u8]) -> Result<Vec<Statement>, SeedError> {
    let mut scanner = Scanner::new(source);
    scanner.run()?;
    debug!("Parsed {} statements from {} bytes", scanner.statements.len(), source.len());
    Ok(scanner.statements)
}

struct Scanner<'a> {
    src: &'a [u8],
    pos: usize,
    /// Start of the statement currently being scanned
    start: usize,
    mode: LexMode,
    statements: Vec<Statement>,
}

impl<'a> Scanner<'a> {
    fn new(src: &'a [u8]) -> Self {
        Self {
            src,
            pos: 0,
            start: 0,
            mode: LexMode::Normal,
            statements: Vec::new(),
        }
    }

    fn run(&mut self) -> Result<(), SeedError> {
        self.begin_statement(0);

        while self.pos < self.src.len() {
            let byte = self.src[self.pos];
            match &self.mode {
                LexMode::LineComment => {
                    if byte == b'\n' {
                        self.mode = LexMode::Normal;
                    }
                    self.pos += 1;
                }
                LexMode::BlockComment => {
                    if self.at(b"*/") {
                        self.mode = LexMode::Normal;
                        self.pos += 2;
                    } else {
                        self.pos += 1;
                    }
                }
                LexMode::DollarBody(tag) => {
                    if self.src[self.pos..].starts_with(tag) {
                        self.pos += tag.len();
                        self.mode = LexMode::Normal;
                    } else {
                        self.pos += 1;
                    }
                }
                LexMode::SingleQuote => match byte {
                    b'\\' => self.pos += 2,
                    b'\'' => {
                        self.mode = LexMode::Normal;
                        self.pos += 1;
                    }
                    _ => self.pos += 1,
                },
                LexMode::DoubleQuote => {
                    if byte == b'"' {
                        self.mode = LexMode::Normal;
                    }
                    self.pos += 1;
                }
                LexMode::Normal => self.scan_normal(byte)?,
            }
        }

        // Trailing whitespace and comments were consumed by begin_statement
        if self.start < self.src.len() {
            let position = ParsePosition::locate(self.src, self.start);
            return Err(SeedError::UnterminatedStatement {
                position,
                snippet: snippet(&String::from_utf8_lossy(&self.src[self.start..])),
            });
        }

        Ok(())
    }

    fn scan_normal(&mut self, byte: u8) -> Result<(), SeedError> {
        match byte {
            b'-' if self.at(b"--") => {
                self.mode = LexMode::LineComment;
                self.pos += 2;
            }
            b'/' if self.at(b"/*") => {
                self.mode = LexMode::BlockComment;
                self.pos += 2;
            }
            b'$' => match self.dollar_tag() {
                Some(tag) => {
                    self.pos += tag.len();
                    self.mode = LexMode::DollarBody(tag);
                }
                None => self.pos += 1,
            },
            b'\'' => {
                self.mode = LexMode::SingleQuote;
                self.pos += 1;
            }
            b'"' => {
                self.mode = LexMode::DoubleQuote;
                self.pos += 1;
            }
            b';' => self.finish_statement()?,
            _ => self.pos += 1,
        }
        Ok(())
    }

    /// Close the statement at the `;` under the cursor
    fn finish_statement(&mut self) -> Result<(), SeedError> {
        let terminator = self.pos;
        let raw = String::from_utf8_lossy(&self.src[self.start..terminator]);
        let sql = raw.trim();

        if sql.is_empty() {
            self.begin_statement(terminator + 1);
            return Ok(());
        }

        if is_copy_from_stdin(sql) {
            let (payload, resume) = self.read_copy_payload(terminator + 1)?;
            self.statements.push(Statement::copy(sql, payload));
            self.begin_statement(resume);
        } else {
            self.statements.push(Statement::new(sql));
            self.begin_statement(terminator + 1);
        }
        Ok(())
    }

    /// Capture COPY rows starting on the line after the statement.
    ///
    /// Returns the payload and the offset just past the `\.` line.
    fn read_copy_payload(&self, after_terminator: usize) -> Result<(Bytes, usize), SeedError> {
        let len = self.src.len();
        // The remainder of the COPY line itself is not data
        let mut line_start = match self.src[after_terminator..].iter().position(|&b| b == b'\n') {
            Some(idx) => after_terminator + idx + 1,
            None => len,
        };
        let payload_start = line_start;

        while line_start < len {
            let line_end = self.src[line_start..]
                .iter()
                .position(|&b| b == b'\n')
                .map(|idx| line_start + idx)
                .unwrap_or(len);

            let mut line = &self.src[line_start..line_end];
            if let Some(stripped) = line.strip_suffix(b"\r") {
                line = stripped;
            }

            if line == b"\\." {
                let payload = Bytes::copy_from_slice(&self.src[payload_start..line_start]);
                return Ok((payload, (line_end + 1).min(len)));
            }

            line_start = line_end + 1;
        }

        let position = ParsePosition::locate(self.src, self.start);
        Err(SeedError::MalformedCopy {
            position,
            snippet: snippet(&String::from_utf8_lossy(&self.src[self.start..after_terminator])),
        })
    }

    /// Move to the first significant byte at or after `from`
    fn begin_statement(&mut self, from: usize) {
        self.start = skip_insignificant(self.src, from);
        self.pos = self.start;
        self.mode = LexMode::Normal;
    }

    fn at(&self, pattern: &[u8]) -> bool {
        self.src[self.pos..].starts_with(pattern)
    }

    /// Delimiter of a dollar-quoted body opening at the cursor, if any
    fn dollar_tag(&self) -> Option<Vec<u8>> {
        // `$` continuing an identifier (e.g. `a$b`) or a parameter (`$1`) is not a quote
        if self.pos > 0 && is_ident_byte(self.src[self.pos - 1]) {
            return None;
        }

        let rest = &self.src[self.pos + 1..];
        let tag_len = rest.iter().take_while(|&&b| is_ident_byte(b)).count();
        if tag_len > 0 && rest[0].is_ascii_digit() {
            return None;
        }
        if rest.get(tag_len) != Some(&b'$') {
            return None;
        }

        Some(self.src[self.pos..self.pos + tag_len + 2].to_vec())
    }
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80
}

/// Skip whitespace, comments and backslash meta-command lines
fn skip_insignificant(src: &[u8], mut pos: usize) -> usize {
    let len = src.len();
    loop {
        while pos < len && src[pos].is_ascii_whitespace() {
            pos += 1;
        }
        if pos >= len {
            return len;
        }

        let rest = &src[pos..];
        if rest.starts_with(b"--") || rest[0] == b'\\' {
            pos = match rest.iter().position(|&b| b == b'\n') {
                Some(idx) => pos + idx + 1,
                None => len,
            };
        } else if rest.starts_with(b"/*") {
            pos = match rest[2..].windows(2).position(|w| w == b"*/") {
                Some(idx) => pos + 2 + idx + 2,
                None => len,
            };
        } else {
            return pos;
        }
    }
}

/// `COPY ... FROM STDIN`, case-insensitive
pub(crate) fn is_copy_from_stdin(sql: &str) -> bool {
    let upper = sql.to_ascii_uppercase();
    upper.starts_with("COPY ") && upper.contains("FROM STDIN")
}
