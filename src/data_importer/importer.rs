// Seed orchestration: environment guard, path validation, truncate, migrate, replay
use crate::config::{DeployEnvironment, ImporterConfig};
use crate::data_importer::copy_loader::quote_relation;
use crate::data_importer::error_policy::ErrorPolicy;
use crate::data_importer::executor::StatementExecutor;
use crate::error::SeedError;
use crate::sql_parser::{self, excludes, should_skip_statement};
use crate::types::{
    snippet, ExecuteOptions, FileReport, SeedReport, SkipKind, SkippedStatement, Statement,
};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, info, instrument, warn};

/// Suffix identifying forward migrations in the migrations directory
pub const MIGRATION_SUFFIX: &str = ".up.sql";

/// Resets a development database to the content of a SQL dump.
pub struct SeedImporter {
    config: ImporterConfig,
    executor: StatementExecutor,
}

impl SeedImporter {
    pub fn new(config: ImporterConfig) -> Self {
        let executor = StatementExecutor::new(ErrorPolicy::new(&config.migration_tables));
        Self { config, executor }
    }

    /// Truncate managed content, replay migrations, then replay `relative_path`.
    ///
    /// Nothing touches the filesystem before the environment check, and the
    /// seed file is fully parsed before any table is truncated.
    #[instrument(skip(self, client, environment), fields(environment = %environment))]
    pub async fn seed_from_file(
        &self,
        client: &mut Client,
        environment: &DeployEnvironment,
        relative_path: &str,
    ) -> Result<SeedReport, SeedError> {
        ensure_seedable(environment)?;
        let path = resolve_seed_path(&self.config.storage_root, relative_path)?;
        let statements = load_statements(&path, relative_path, false).await?;
        info!(file = relative_path, statements = statements.len(), "Seed file parsed");

        let truncated_tables = self.truncate_managed_tables(client).await?;
        let migrations = self.replay_migrations(client).await?;

        let options = ExecuteOptions::for_seed(&self.config.excluded_tables);
        let seed = self.run_file(client, relative_path, &statements, &options).await?;

        let report = SeedReport {
            truncated_tables,
            migrations,
            seed,
        };
        info!("Seeding finished: {}", report.summary());
        Ok(report)
    }

    /// Parse `relative_path` and report which statements would be excluded.
    ///
    /// Does not connect to the database, but applies the same environment
    /// guard as [`SeedImporter::seed_from_file`].
    pub async fn plan_file(
        &self,
        environment: &DeployEnvironment,
        relative_path: &str,
    ) -> Result<FileReport, SeedError> {
        ensure_seedable(environment)?;
        let path = resolve_seed_path(&self.config.storage_root, relative_path)?;
        let statements = load_statements(&path, relative_path, false).await?;
        let options = ExecuteOptions::for_seed(&self.config.excluded_tables);

        let mut report = FileReport::new(relative_path, statements.len());
        for (offset, statement) in statements.iter().enumerate() {
            let decision = should_skip_statement(statement, &options.skip_identifiers);
            if decision.skip {
                report.skipped.push(SkippedStatement {
                    index: offset + 1,
                    kind: SkipKind::Excluded,
                    reason: decision.reason,
                    snippet: snippet(&statement.sql),
                });
            }
        }
        report.executed_statements = report.total_statements - report.skipped.len();
        Ok(report)
    }

    /// Empty every managed table that exists and is not excluded
    async fn truncate_managed_tables(&self, client: &mut Client) -> Result<Vec<String>, SeedError> {
        let excluded = ExecuteOptions::for_seed(&self.config.excluded_tables).skip_identifiers;
        let tx = client
            .transaction()
            .await
            .map_err(|e| SeedError::transaction("truncate", "begin transaction", e))?;

        let mut present = Vec::new();
        for table in self.config.managed_tables.iter().rev() {
            if excludes(table, &excluded) {
                debug!(table = %table, "Managed table is excluded; leaving its rows in place");
                continue;
            }
            let relation = quote_relation(table);
            let exists: bool = tx
                .query_one("SELECT to_regclass($1::text) IS NOT NULL", &[&relation])
                .await?
                .try_get(0)?;
            if exists {
                present.push((table.clone(), relation));
            } else {
                debug!(table = %table, "Managed table does not exist yet");
            }
        }

        // One statement so foreign keys between managed tables do not block it
        if !present.is_empty() {
            let relations: Vec<&str> = present.iter().map(|(_, relation)| relation.as_str()).collect();
            let sql = format!("TRUNCATE TABLE {} RESTART IDENTITY", relations.join(", "));
            tx.batch_execute(&sql).await?;
        }
        tx.commit()
            .await
            .map_err(|e| SeedError::transaction("truncate", "commit", e))?;

        info!(tables = present.len(), "Truncated managed tables");
        Ok(present.into_iter().map(|(table, _)| table).collect())
    }

    async fn replay_migrations(&self, client: &mut Client) -> Result<Vec<FileReport>, SeedError> {
        let files = discover_migrations(&self.config.migrations_dir).await?;
        let options = ExecuteOptions::default();

        let mut reports = Vec::with_capacity(files.len());
        for path in files {
            let label = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            let statements = load_statements(&path, &label, true).await?;
            reports.push(self.run_file(client, &label, &statements, &options).await?);
        }
        Ok(reports)
    }

    async fn run_file(
        &self,
        client: &mut Client,
        file: &str,
        statements: &[Statement],
        options: &ExecuteOptions,
    ) -> Result<FileReport, SeedError> {
        let replay = self.executor.execute(client, file, statements, options);
        match self.config.timeout_secs {
            Some(seconds) if seconds > 0 => tokio::time::timeout(Duration::from_secs(seconds), replay)
                .await
                .map_err(|_| SeedError::Timeout {
                    file: file.to_string(),
                    seconds,
                })?,
            _ => replay.await,
        }
    }
}

/// Build a connection pool for the configured database
pub fn connect_pool(config: &ImporterConfig) -> Result<Pool, SeedError> {
    let url = config
        .database_url
        .as_deref()
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| SeedError::configuration("database_url is not set"))?;
    let pg_config: tokio_postgres::Config = url.parse()?;

    let manager = Manager::from_config(
        pg_config,
        NoTls,
        ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        },
    );
    Pool::builder(manager)
        .max_size(config.max_connections)
        .build()
        .map_err(|e| SeedError::configuration(format!("failed to build connection pool: {e}")))
}

/// Refuse anything that is not a local or development database
pub fn ensure_seedable(environment: &DeployEnvironment) -> Result<(), SeedError> {
    if environment.allows_seeding() {
        Ok(())
    } else {
        warn!(environment = %environment, "Refusing to seed");
        Err(SeedError::EnvironmentRefused {
            environment: environment.to_string(),
        })
    }
}

/// Resolve a seed file name against the storage root without touching the filesystem
pub fn resolve_seed_path(storage_root: &Path, relative_path: &str) -> Result<PathBuf, SeedError> {
    let trimmed = relative_path.trim();
    if trimmed.is_empty() {
        return Err(SeedError::invalid_path(relative_path, "path is empty"));
    }

    let candidate = Path::new(trimmed);
    if candidate.has_root() || trimmed.starts_with('\\') {
        return Err(SeedError::invalid_path(relative_path, "absolute paths are not allowed"));
    }
    // Checked on its own so a root of `.` or `..` cannot absorb the escape
    if matches!(clean_path(candidate).components().next(), Some(Component::ParentDir)) {
        return Err(SeedError::invalid_path(relative_path, "path escapes the storage root"));
    }

    let is_sql = candidate
        .extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case("sql"));
    if !is_sql {
        return Err(SeedError::invalid_path(relative_path, "only .sql files can be seeded"));
    }

    let root = clean_path(storage_root);
    let resolved = clean_path(&root.join(candidate));
    if resolved == root || !resolved.starts_with(&root) {
        return Err(SeedError::invalid_path(relative_path, "path escapes the storage root"));
    }
    Ok(resolved)
}

/// Lexically normalise `.` and `..` components
pub(crate) fn clean_path(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match cleaned.components().next_back() {
                Some(Component::Normal(_)) => {
                    cleaned.pop();
                }
                // `..` at the root stays at the root
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => cleaned.push(".."),
            },
            other => cleaned.push(other.as_os_str()),
        }
    }
    cleaned
}

/// Read and parse a SQL file; `allow_empty` accepts files without statements
pub(crate) async fn load_statements(
    path: &Path,
    label: &str,
    allow_empty: bool,
) -> Result<Vec<Statement>, SeedError> {
    let bytes = tokio::fs::read(path).await?;
    let text = std::str::from_utf8(&bytes)
        .map_err(|e| SeedError::invalid_input(label, format!("file is not valid UTF-8: {e}")))?;
    if !allow_empty && text.trim().is_empty() {
        return Err(SeedError::invalid_input(label, "file is empty"));
    }

    sql_parser::parse(text.as_bytes()).map_err(|e| SeedError::in_file(label, e))
}

/// `*.up.sql` files directly inside `dir`, in lexical order
pub(crate) async fn discover_migrations(dir: &Path) -> Result<Vec<PathBuf>, SeedError> {
    if !tokio::fs::try_exists(dir).await? {
        return Err(SeedError::configuration(format!(
            "migrations directory {} does not exist",
            dir.display()
        )));
    }

    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let is_migration = entry.file_name().to_string_lossy().ends_with(MIGRATION_SUFFIX);
        if is_migration && entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();

    debug!(dir = %dir.display(), count = files.len(), "Discovered migrations");
    Ok(files)
}
