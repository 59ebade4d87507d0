use crate::types::ParsePosition;
use thiserror::Error;

/// Main error type for the importer
#[derive(Error, Debug)]
pub enum SeedError {
    #[error("Invalid path {path:?}: {message}")]
    InvalidPath { path: String, message: String },

    #[error("Invalid input {file}: {message}")]
    InvalidInput { file: String, message: String },

    #[error("Refusing to seed: environment {environment:?} is not local/development")]
    EnvironmentRefused { environment: String },

    #[error("Unterminated statement at {position}: {snippet}")]
    UnterminatedStatement {
        position: ParsePosition,
        snippet: String,
    },

    #[error("Malformed COPY block at {position} (missing \\. terminator): {snippet}")]
    MalformedCopy {
        position: ParsePosition,
        snippet: String,
    },

    #[error("{file}: {source}")]
    Parse {
        file: String,
        #[source]
        source: Box<SeedError>,
    },

    #[error("{file}: statement {index} failed: {} [{snippet}]", describe_db_error(.source))]
    Statement {
        file: String,
        index: usize,
        snippet: String,
        #[source]
        source: tokio_postgres::Error,
    },

    #[error(
        "{file}: statement {index} failed: {}; rollback to savepoint also failed: {} [{snippet}]",
        describe_db_error(.source),
        describe_db_error(.rollback)
    )]
    RollbackFailed {
        file: String,
        index: usize,
        snippet: String,
        #[source]
        source: tokio_postgres::Error,
        rollback: tokio_postgres::Error,
    },

    #[error("{file}: COPY statement {index} failed: {source} [{snippet}]")]
    Copy {
        file: String,
        index: usize,
        snippet: String,
        #[source]
        source: Box<SeedError>,
    },

    #[error("{file}: {step} failed: {}", describe_db_error(.source))]
    Transaction {
        file: String,
        step: &'static str,
        #[source]
        source: tokio_postgres::Error,
    },

    #[error("{file}: replay did not finish within {seconds}s")]
    Timeout { file: String, seconds: u64 },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Database error: {}", describe_db_error(.0))]
    Database(#[from] tokio_postgres::Error),

    #[error("Connection pool error: {}", describe_pool_error(.0))]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Driver error with the server's SQLSTATE and message, which its `Display` leaves out
pub fn describe_db_error(error: &tokio_postgres::Error) -> String {
    if let Some(db) = error.as_db_error() {
        let mut text = format!("{} {}: {}", db.severity(), db.code().code(), db.message());
        if let Some(detail) = db.detail() {
            text.push_str(&format!(" (detail: {detail})"));
        }
        return text;
    }

    // Connection and protocol errors keep their cause in the source chain
    let mut text = error.to_string();
    let mut cause = std::error::Error::source(error);
    while let Some(inner) = cause {
        text.push_str(&format!(": {inner}"));
        cause = inner.source();
    }
    text
}

fn describe_pool_error(error: &deadpool_postgres::PoolError) -> String {
    match error {
        deadpool_postgres::PoolError::Backend(e) => describe_db_error(e),
        other => other.to_string(),
    }
}

impl SeedError {
    pub fn invalid_path(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn invalid_input(file: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            file: file.into(),
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Attach the file name to a tokenizer error
    pub fn in_file(file: impl Into<String>, source: SeedError) -> Self {
        Self::Parse {
            file: file.into(),
            source: Box::new(source),
        }
    }

    pub fn transaction(file: impl Into<String>, step: &'static str, source: tokio_postgres::Error) -> Self {
        Self::Transaction {
            file: file.into(),
            step,
            source,
        }
    }

    pub fn copy(file: impl Into<String>, index: usize, snippet: impl Into<String>, source: SeedError) -> Self {
        Self::Copy {
            file: file.into(),
            index,
            snippet: snippet.into(),
            source: Box::new(source),
        }
    }

    /// Whether the error was raised before any database contact
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidPath { .. }
                | Self::InvalidInput { .. }
                | Self::EnvironmentRefused { .. }
                | Self::UnterminatedStatement { .. }
                | Self::MalformedCopy { .. }
                | Self::Parse { .. }
        )
    }
}
