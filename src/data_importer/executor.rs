// Transactional statement replay with per-statement savepoints
use crate::data_importer::copy_loader::load_copy_payload;
use crate::data_importer::error_policy::ErrorPolicy;
use crate::error::SeedError;
use crate::monitoring::OperationTracker;
use crate::sql_parser::should_skip_statement;
use crate::types::{snippet, ExecuteOptions, FileReport, SkipKind, SkippedStatement, Statement};
use tokio_postgres::{Client, Transaction};
use tracing::{debug, info, instrument, warn};

/// Relaxes foreign-key and trigger enforcement until the transaction ends
const RELAX_CONSTRAINTS_SQL: &str = "SET LOCAL session_replication_role = replica";

/// Replays parsed statements inside a single transaction.
///
/// Each ordinary statement runs under its own savepoint so that failures the
/// [`ErrorPolicy`] recognises as "already applied" only roll back that
/// statement. Every other failure, any COPY failure and a failed commit abort
/// the whole file.
#[derive(Debug, Clone, Default)]
pub struct StatementExecutor {
    policy: ErrorPolicy,
}

impl StatementExecutor {
    pub fn new(policy: ErrorPolicy) -> Self {
        Self { policy }
    }

    /// Replay `statements` from `file` and commit them as one unit
    #[instrument(skip_all, fields(file = %file, statements = statements.len()))]
    pub async fn execute(
        &self,
        client: &mut Client,
        file: &str,
        statements: &[Statement],
        options: &ExecuteOptions,
    ) -> Result<FileReport, SeedError> {
        let tracker = OperationTracker::start("replay_sql_file", file);

        match self.replay(client, file, statements, options).await {
            Ok(mut report) => {
                let metric = tracker.complete_success(report.executed_statements as u64);
                report.duration_ms = metric.duration_ms.unwrap_or_default();
                info!("{}", report.summary());
                Ok(report)
            }
            Err(e) => {
                tracker.complete_failure(&e.to_string());
                Err(e)
            }
        }
    }

    async fn replay(
        &self,
        client: &mut Client,
        file: &str,
        statements: &[Statement],
        options: &ExecuteOptions,
    ) -> Result<FileReport, SeedError> {
        let mut report = FileReport::new(file, statements.len());
        let mut tx = client
            .transaction()
            .await
            .map_err(|e| SeedError::transaction(file, "begin transaction", e))?;

        if options.disable_constraints {
            tx.batch_execute(RELAX_CONSTRAINTS_SQL)
                .await
                .map_err(|e| SeedError::transaction(file, "disable constraint enforcement", e))?;
            debug!("Constraint enforcement relaxed for this transaction");
        }

        for (offset, statement) in statements.iter().enumerate() {
            let index = offset + 1;

            let decision = should_skip_statement(statement, &options.skip_identifiers);
            if decision.skip {
                info!(statement = index, reason = %decision.reason, "Skipping excluded statement");
                report.skipped.push(SkippedStatement {
                    index,
                    kind: SkipKind::Excluded,
                    reason: decision.reason,
                    snippet: snippet(&statement.sql),
                });
                continue;
            }

            if statement.is_copy {
                let rows = load_copy_payload(&tx, statement)
                    .await
                    .map_err(|e| SeedError::copy(file, index, snippet(&statement.sql), e))?;
                debug!(statement = index, rows = rows, "COPY payload loaded");
                report.copied_rows += rows;
                report.executed_statements += 1;
                continue;
            }

            self.run_in_savepoint(&mut tx, file, index, statement, &mut report).await?;
        }

        tx.commit()
            .await
            .map_err(|e| SeedError::transaction(file, "commit", e))?;
        Ok(report)
    }

    async fn run_in_savepoint(
        &self,
        tx: &mut Transaction<'_>,
        file: &str,
        index: usize,
        statement: &Statement,
        report: &mut FileReport,
    ) -> Result<(), SeedError> {
        let savepoint = tx
            .savepoint(format!("folioseed_stmt_{index}"))
            .await
            .map_err(|e| SeedError::transaction(file, "open savepoint", e))?;

        let error = match savepoint.batch_execute(&statement.sql).await {
            Ok(()) => {
                savepoint
                    .commit()
                    .await
                    .map_err(|e| SeedError::transaction(file, "release savepoint", e))?;
                report.executed_statements += 1;
                return Ok(());
            }
            Err(error) => error,
        };

        let decision = self.policy.classify_error(&error, &statement.sql);
        if let Err(rollback) = savepoint.rollback().await {
            return Err(SeedError::RollbackFailed {
                file: file.to_string(),
                index,
                snippet: snippet(&statement.sql),
                source: error,
                rollback,
            });
        }

        if !decision.skip {
            return Err(SeedError::Statement {
                file: file.to_string(),
                index,
                snippet: snippet(&statement.sql),
                source: error,
            });
        }

        warn!(statement = index, reason = %decision.reason, error = %error, "Absorbed already-applied statement failure");
        report.skipped.push(SkippedStatement {
            index,
            kind: SkipKind::AlreadyApplied,
            reason: decision.reason,
            snippet: snippet(&statement.sql),
        });
        Ok(())
    }
}
