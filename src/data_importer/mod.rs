// Replay of SQL scripts into PostgreSQL
pub mod copy_loader;
pub mod error_policy;
pub mod executor;
pub mod importer;


pub use error_policy::{ErrorPolicy, DEFAULT_MIGRATION_TABLES};
pub use executor::StatementExecutor;
pub use importer::{connect_pool, ensure_seedable, resolve_seed_path, SeedImporter};
