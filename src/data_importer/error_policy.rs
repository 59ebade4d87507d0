// Classification of statement failures that are safe to absorb during replay
use crate::sql_parser::{classify, excludes, normalize};
use crate::types::{Operation, SkipDecision};
use std::collections::HashSet;
use tokio_postgres::error::SqlState;

/// Tables that record applied migrations
pub const DEFAULT_MIGRATION_TABLES: &[&str] = &["schema_migrations", "goose_db_version"];

/// Decides which database errors mean "the effect is already present".
#[derive(Debug, Clone)]
pub struct ErrorPolicy {
    migration_tables: HashSet<String>,
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MIGRATION_TABLES.iter().copied())
    }
}

impl ErrorPolicy {
    pub fn new<I, S>(migration_tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            migration_tables: migration_tables
                .into_iter()
                .map(|t| normalize(t.as_ref()))
                .collect(),
        }
    }

    /// Classify a failed statement from its SQLSTATE, server message and text
    pub fn classify_failure(&self, code: &SqlState, message: &str, sql: &str) -> SkipDecision {
        let verb = Verb::of(sql);

        if *code == SqlState::UNIQUE_VIOLATION {
            if let Some(target) = classify(sql) {
                if target.operation == Operation::Insert && excludes(&target.identifier, &self.migration_tables) {
                    return SkipDecision::skip(format!(
                        "duplicate migration row in {}",
                        normalize(&target.identifier)
                    ));
                }
            }
            return SkipDecision::proceed();
        }

        if is_duplicate_object(code) && verb.defines_object() {
            return SkipDecision::skip(format!("object already exists ({})", code.code()));
        }

        if *code == SqlState::INVALID_TABLE_DEFINITION
            && verb == Verb::AlterTableAdd
            && message.to_ascii_lowercase().contains("multiple primary keys")
        {
            return SkipDecision::skip("primary key already defined");
        }

        if *code == SqlState::UNDEFINED_OBJECT && sql.to_ascii_uppercase().contains("OWNER TO") {
            return SkipDecision::skip("owner skipped: role does not exist");
        }

        if *code == SqlState::UNDEFINED_TABLE && matches!(verb, Verb::AlterTable | Verb::AlterTableAdd | Verb::Drop) {
            return SkipDecision::skip("relation skipped: relation does not exist");
        }

        SkipDecision::proceed()
    }

    /// Classify a `tokio_postgres` error; errors without a SQLSTATE never skip
    pub fn classify_error(&self, error: &tokio_postgres::Error, sql: &str) -> SkipDecision {
        match error.as_db_error() {
            Some(db) => self.classify_failure(db.code(), db.message(), sql),
            None => SkipDecision::proceed(),
        }
    }
}

fn is_duplicate_object(code: &SqlState) -> bool {
    [
        SqlState::DUPLICATE_TABLE,
        SqlState::DUPLICATE_OBJECT,
        SqlState::DUPLICATE_SCHEMA,
        SqlState::DUPLICATE_FUNCTION,
        SqlState::DUPLICATE_COLUMN,
    ]
    .contains(code)
}

/// Leading verb of a statement, as far as the error policy cares
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verb {
    Create,
    AlterTableAdd,
    AlterTable,
    AlterIndex,
    Drop,
    Other,
}

impl Verb {
    fn of(sql: &str) -> Self {
        let mut words = sql.split_whitespace().map(|w| w.to_ascii_uppercase());
        let first = words.next().unwrap_or_default();
        let second = words.next().unwrap_or_default();

        match (first.as_str(), second.as_str()) {
            ("CREATE", _) => Verb::Create,
            ("ALTER", "TABLE") => {
                if words.any(|w| w == "ADD") {
                    Verb::AlterTableAdd
                } else {
                    Verb::AlterTable
                }
            }
            ("ALTER", "INDEX") => Verb::AlterIndex,
            ("DROP", _) => Verb::Drop,
            _ => Verb::Other,
        }
    }

    fn defines_object(self) -> bool {
        matches!(self, Verb::Create | Verb::AlterTableAdd | Verb::AlterIndex)
    }
}
