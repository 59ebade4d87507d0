use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// One top-level unit of a SQL script
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// Statement text, trimmed and without the terminating semicolon
    pub sql: String,
    /// Whether this is a `COPY ... FROM STDIN` statement with inline data
    pub is_copy: bool,
    /// Tab-delimited rows captured between the COPY statement and `\.`
    pub copy_payload: Option<Bytes>,
}

impl Statement {
    /// Create a plain statement
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            is_copy: false,
            copy_payload: None,
        }
    }

    /// Create a COPY statement carrying its inline payload
    pub fn copy(sql: impl Into<String>, payload: Bytes) -> Self {
        Self {
            sql: sql.into(),
            is_copy: true,
            copy_payload: Some(payload),
        }
    }
}

/// Location inside a source buffer, used for diagnostics only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsePosition {
    /// Byte offset into the source
    pub offset: usize,
    /// 1-based line number
    pub line: usize,
    /// 1-based column, counted in characters
    pub column: usize,
}

impl ParsePosition {
    /// Derive line and column for a byte offset
    pub fn locate(source: &[u8], offset: usize) -> Self {
        let offset = offset.min(source.len());
        let prefix = &source[..offset];
        let line = prefix.iter().filter(|&&b| b == b'\n').count() + 1;
        let line_start = prefix
            .iter()
            .rposition(|&b| b == b'\n')
            .map(|idx| idx + 1)
            .unwrap_or(0);
        let column = String::from_utf8_lossy(&prefix[line_start..]).chars().count() + 1;

        Self {
            offset,
            line,
            column,
        }
    }
}

impl fmt::Display for ParsePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

/// Per-run executor configuration
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Relax foreign-key and trigger enforcement for the run
    pub disable_constraints: bool,
    /// Normalized identifiers that must never be replayed
    pub skip_identifiers: HashSet<String>,
}

impl ExecuteOptions {
    /// Options used when replaying a seed dump
    pub fn for_seed<I, S>(excluded: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            disable_constraints: true,
            skip_identifiers: excluded
                .into_iter()
                .map(|id| crate::sql_parser::normalize(id.as_ref()))
                .filter(|id| !id.is_empty())
                .collect(),
        }
    }
}

/// Outcome of a skip check, shared by the statement filter and the error policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkipDecision {
    pub skip: bool,
    pub reason: String,
}

impl SkipDecision {
    /// The statement must run (or the failure must propagate)
    pub fn proceed() -> Self {
        Self {
            skip: false,
            reason: String::new(),
        }
    }

    pub fn skip(reason: impl Into<String>) -> Self {
        Self {
            skip: true,
            reason: reason.into(),
        }
    }
}

/// Operation kinds recognised by the statement classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Copy,
    Insert,
    Update,
    Delete,
    AlterTable,
    AlterIndex,
    AlterSequence,
    DropTable,
    DropIndex,
    DropSequence,
    CreateTable,
    CreateIndex,
    SetSequenceValue,
}

impl Operation {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Operation::Copy => "COPY",
            Operation::Insert => "INSERT",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
            Operation::AlterTable => "ALTER TABLE",
            Operation::AlterIndex => "ALTER INDEX",
            Operation::AlterSequence => "ALTER SEQUENCE",
            Operation::DropTable => "DROP TABLE",
            Operation::DropIndex => "DROP INDEX",
            Operation::DropSequence => "DROP SEQUENCE",
            Operation::CreateTable => "CREATE TABLE",
            Operation::CreateIndex => "CREATE INDEX",
            Operation::SetSequenceValue => "SETVAL",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Object a statement acts on, as found by the classifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Identifier as written in the statement (may be quoted or qualified)
    pub identifier: String,
    pub operation: Operation,
}

/// Why a statement was not applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipKind {
    /// Dropped before execution by the exclusion filter
    Excluded,
    /// Executed, failed with an error classified as already applied
    AlreadyApplied,
}

/// Record of a skipped statement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedStatement {
    /// 1-based statement number within the file
    pub index: usize,
    pub kind: SkipKind,
    pub reason: String,
    pub snippet: String,
}

/// Replay outcome of a single SQL file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileReport {
    pub file: String,
    pub total_statements: usize,
    pub executed_statements: usize,
    pub copied_rows: u64,
    pub skipped: Vec<SkippedStatement>,
    pub duration_ms: u64,
}

impl FileReport {
    pub fn new(file: impl Into<String>, total_statements: usize) -> Self {
        Self {
            file: file.into(),
            total_statements,
            ..Default::default()
        }
    }

    pub fn skipped_count(&self, kind: SkipKind) -> usize {
        self.skipped.iter().filter(|s| s.kind == kind).count()
    }

    /// Short human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "{}: {} statements, {} executed, {} excluded, {} already applied, {} rows copied in {}ms",
            self.file,
            self.total_statements,
            self.executed_statements,
            self.skipped_count(SkipKind::Excluded),
            self.skipped_count(SkipKind::AlreadyApplied),
            self.copied_rows,
            self.duration_ms
        )
    }
}

/// Aggregate result of one orchestrator invocation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedReport {
    pub truncated_tables: Vec<String>,
    pub migrations: Vec<FileReport>,
    pub seed: FileReport,
}

impl SeedReport {
    pub fn total_executed(&self) -> usize {
        self.migrations
            .iter()
            .chain(std::iter::once(&self.seed))
            .map(|r| r.executed_statements)
            .sum()
    }

    pub fn summary(&self) -> String {
        format!(
            "truncated {} tables, replayed {} migrations, {} statements executed; seed {}",
            self.truncated_tables.len(),
            self.migrations.len(),
            self.total_executed(),
            self.seed.summary()
        )
    }
}

/// Single-line preview of a statement for logs and error messages
pub fn snippet(text: &str) -> String {
    const MAX_CHARS: usize = 120;
    const ELLIPSIS: &str = "...";

    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= MAX_CHARS {
        return collapsed;
    }

    let mut truncated: String = collapsed.chars().take(MAX_CHARS - ELLIPSIS.len()).collect();
    truncated.push_str(ELLIPSIS);
    truncated
}
