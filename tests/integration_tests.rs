use anyhow::Result;
use std::path::Path;
use tempfile::TempDir;
use tokio_postgres::{Client, NoTls};

use folioseed::config::{DeployEnvironment, ImporterConfig};
use folioseed::data_importer::SeedImporter;
use folioseed::error::SeedError;
use folioseed::types::SkipKind;

// These tests need a PostgreSQL role allowed to set session_replication_role
// (a superuser on most development setups). They return early without
// TEST_DATABASE_URL. Every test works on its own tables so they can run in
// parallel against one database.

async fn connect() -> Result<Option<Client>> {
    let url = match std::env::var("TEST_DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("TEST_DATABASE_URL not set, skipping database test");
            return Ok(None);
        }
    };

    let (client, connection) = tokio_postgres::connect(&url, NoTls).await?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            eprintln!("Connection error: {}", e);
        }
    });
    Ok(Some(client))
}

async fn drop_tables(client: &Client, tables: &[&str]) -> Result<()> {
    for table in tables {
        client
            .batch_execute(&format!("DROP TABLE IF EXISTS {} CASCADE", table))
            .await?;
    }
    Ok(())
}

async fn count(client: &Client, table: &str) -> Result<i64> {
    let row = client
        .query_one(&format!("SELECT count(*) FROM {}", table), &[])
        .await?;
    Ok(row.get(0))
}

/// Storage root and migrations directory for one test
struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Result<Self> {
        let dir = TempDir::new()?;
        std::fs::create_dir(dir.path().join("migrations"))?;
        std::fs::create_dir(dir.path().join("sql"))?;
        Ok(Self { dir })
    }

    fn migration(&self, name: &str, sql: &str) -> Result<()> {
        std::fs::write(self.dir.path().join("migrations").join(name), sql)?;
        Ok(())
    }

    fn seed(&self, name: &str, sql: &str) -> Result<()> {
        std::fs::write(self.dir.path().join("sql").join(name), sql)?;
        Ok(())
    }

    fn config(&self, managed: &[&str], excluded: &[&str], migration_tables: &[&str]) -> ImporterConfig {
        let root: &Path = self.dir.path();
        ImporterConfig {
            environment: Some("development".to_string()),
            storage_root: root.join("sql"),
            migrations_dir: root.join("migrations"),
            managed_tables: managed.iter().map(|t| t.to_string()).collect(),
            excluded_tables: excluded.iter().map(|t| t.to_string()).collect(),
            migration_tables: migration_tables.iter().map(|t| t.to_string()).collect(),
            timeout_secs: Some(60),
            ..Default::default()
        }
    }
}

#[tokio::test]
async fn test_replaying_the_same_dump_twice_is_idempotent() -> Result<()> {
    let Some(mut client) = connect().await? else {
        return Ok(());
    };
    let tables = ["it_idem_widgets", "it_idem_api_keys", "it_idem_migrations"];
    drop_tables(&client, &tables).await?;

    let workspace = Workspace::new()?;
    workspace.migration(
        "001_create.up.sql",
        "CREATE TABLE it_idem_migrations (version text PRIMARY KEY);\n\
         CREATE TABLE it_idem_widgets (id integer PRIMARY KEY, name text NOT NULL);\n\
         CREATE TABLE it_idem_api_keys (id serial PRIMARY KEY, key text NOT NULL);\n",
    )?;
    workspace.seed(
        "seed.sql",
        "--\n-- PostgreSQL database dump\n--\n\
         SET statement_timeout = 0;\n\
         SET client_encoding = 'UTF8';\n\
         CREATE TABLE it_idem_widgets (id integer PRIMARY KEY, name text NOT NULL);\n\
         INSERT INTO it_idem_migrations (version) VALUES ('001');\n\
         COPY it_idem_widgets (id, name) FROM stdin;\n\
         1\tgear\n\
         2\tsprocket; with a semicolon\n\
         \\.\n\
         INSERT INTO it_idem_api_keys (key) VALUES ('from-dump');\n\
         SELECT pg_catalog.setval('it_idem_api_keys_id_seq', 99, true);\n",
    )?;

    let importer = SeedImporter::new(workspace.config(
        &["it_idem_widgets"],
        &["it_idem_api_keys"],
        &["it_idem_migrations"],
    ));
    let environment = DeployEnvironment::Development;

    let first = importer.seed_from_file(&mut client, &environment, "seed.sql").await?;
    assert_eq!(first.migrations.len(), 1);
    assert_eq!(first.migrations[0].executed_statements, 3);
    assert_eq!(first.seed.copied_rows, 2);
    assert_eq!(first.seed.skipped_count(SkipKind::Excluded), 2);
    assert_eq!(first.seed.skipped_count(SkipKind::AlreadyApplied), 1);

    // A real key created outside the dump must survive reseeding
    client
        .batch_execute("INSERT INTO it_idem_api_keys (key) VALUES ('local-key')")
        .await?;
    let widgets_after_first = count(&client, "it_idem_widgets").await?;

    let second = importer.seed_from_file(&mut client, &environment, "seed.sql").await?;
    assert_eq!(second.truncated_tables, vec!["it_idem_widgets"]);
    assert_eq!(second.migrations[0].skipped_count(SkipKind::AlreadyApplied), 3);
    assert_eq!(second.seed.copied_rows, 2);
    // CREATE TABLE and the duplicate migration row are both absorbed
    assert_eq!(second.seed.skipped_count(SkipKind::AlreadyApplied), 2);
    assert!(second
        .seed
        .skipped
        .iter()
        .any(|s| s.reason.contains("duplicate migration row")));

    assert_eq!(count(&client, "it_idem_widgets").await?, widgets_after_first);
    assert_eq!(count(&client, "it_idem_api_keys").await?, 1);
    assert_eq!(count(&client, "it_idem_migrations").await?, 1);

    let name: String = client
        .query_one("SELECT name FROM it_idem_widgets WHERE id = 2", &[])
        .await?
        .get(0);
    assert_eq!(name, "sprocket; with a semicolon");

    let last_value: i64 = client
        .query_one("SELECT last_value FROM it_idem_api_keys_id_seq", &[])
        .await?
        .get(0);
    assert_eq!(last_value, 1);

    drop_tables(&client, &tables).await?;
    Ok(())
}

#[tokio::test]
async fn test_copy_without_column_list_uses_catalog_order() -> Result<()> {
    let Some(mut client) = connect().await? else {
        return Ok(());
    };
    let tables = ["it_copy_items"];
    drop_tables(&client, &tables).await?;

    let workspace = Workspace::new()?;
    workspace.migration(
        "001_items.up.sql",
        "CREATE TABLE it_copy_items (\"Label\" text NOT NULL, qty integer NOT NULL);",
    )?;
    workspace.seed(
        "items.sql",
        "COPY public.it_copy_items FROM stdin;\nbolt\t3\nnut\t12\n\\.\n",
    )?;

    let importer = SeedImporter::new(workspace.config(&["it_copy_items"], &[], &[]));
    let report = importer
        .seed_from_file(&mut client, &DeployEnvironment::Local, "items.sql")
        .await?;
    assert_eq!(report.seed.copied_rows, 2);

    let qty: i32 = client
        .query_one("SELECT qty FROM it_copy_items WHERE \"Label\" = 'nut'", &[])
        .await?
        .get(0);
    assert_eq!(qty, 12);

    drop_tables(&client, &tables).await?;
    Ok(())
}

#[tokio::test]
async fn test_fatal_statement_rolls_back_the_whole_file() -> Result<()> {
    let Some(mut client) = connect().await? else {
        return Ok(());
    };
    let tables = ["it_fatal_widgets"];
    drop_tables(&client, &tables).await?;

    let workspace = Workspace::new()?;
    workspace.migration(
        "001_widgets.up.sql",
        "CREATE TABLE it_fatal_widgets (id integer PRIMARY KEY);",
    )?;
    workspace.seed(
        "broken.sql",
        "INSERT INTO it_fatal_widgets VALUES (1);\n\
         INSERT INTO it_fatal_missing_table VALUES (1);\n\
         INSERT INTO it_fatal_widgets VALUES (2);\n",
    )?;

    let importer = SeedImporter::new(workspace.config(&["it_fatal_widgets"], &[], &[]));
    let error = importer
        .seed_from_file(&mut client, &DeployEnvironment::Development, "broken.sql")
        .await
        .unwrap_err();

    match &error {
        SeedError::Statement { file, index, snippet, .. } => {
            assert_eq!(file, "broken.sql");
            assert_eq!(*index, 2);
            assert!(snippet.contains("it_fatal_missing_table"));
        }
        other => panic!("unexpected error: {other}"),
    }
    // The server's diagnosis reaches the message, not just "db error"
    let message = error.to_string();
    assert!(message.contains("42P01"), "{message}");
    assert!(message.contains("\"it_fatal_missing_table\" does not exist"), "{message}");
    assert_eq!(count(&client, "it_fatal_widgets").await?, 0);

    drop_tables(&client, &tables).await?;
    Ok(())
}

#[tokio::test]
async fn test_refused_environment_leaves_database_untouched() -> Result<()> {
    let Some(mut client) = connect().await? else {
        return Ok(());
    };
    let tables = ["it_refused_widgets"];
    drop_tables(&client, &tables).await?;
    client
        .batch_execute(
            "CREATE TABLE it_refused_widgets (id integer PRIMARY KEY);\n\
             INSERT INTO it_refused_widgets VALUES (1), (2);",
        )
        .await?;

    let workspace = Workspace::new()?;
    workspace.seed("seed.sql", "INSERT INTO it_refused_widgets VALUES (3);")?;

    let importer = SeedImporter::new(workspace.config(&["it_refused_widgets"], &[], &[]));
    let error = importer
        .seed_from_file(&mut client, &DeployEnvironment::Production, "seed.sql")
        .await
        .unwrap_err();
    assert!(matches!(error, SeedError::EnvironmentRefused { .. }));
    assert_eq!(count(&client, "it_refused_widgets").await?, 2);

    drop_tables(&client, &tables).await?;
    Ok(())
}

#[tokio::test]
async fn test_copy_failure_keeps_the_server_error() -> Result<()> {
    let Some(mut client) = connect().await? else {
        return Ok(());
    };
    let tables = ["it_copyfail_widgets"];
    drop_tables(&client, &tables).await?;

    let workspace = Workspace::new()?;
    workspace.migration(
        "001_widgets.up.sql",
        "CREATE TABLE it_copyfail_widgets (id integer PRIMARY KEY);",
    )?;
    workspace.seed(
        "seed.sql",
        "INSERT INTO it_copyfail_widgets VALUES (1);\n\
         COPY it_copyfail_widgets (id) FROM stdin;\nnot-a-number\n\\.\n",
    )?;

    let importer = SeedImporter::new(workspace.config(&["it_copyfail_widgets"], &[], &[]));
    let error = importer
        .seed_from_file(&mut client, &DeployEnvironment::Development, "seed.sql")
        .await
        .unwrap_err();

    assert!(matches!(error, SeedError::Copy { index: 2, .. }), "unexpected error: {error}");
    let source = std::error::Error::source(&error).expect("COPY error keeps its cause");
    assert!(matches!(source.downcast_ref::<SeedError>(), Some(SeedError::Database(_))));

    let message = error.to_string();
    assert!(message.contains("22P02"), "{message}");
    assert!(message.contains("not-a-number"), "{message}");
    assert_eq!(count(&client, "it_copyfail_widgets").await?, 0);

    drop_tables(&client, &tables).await?;
    Ok(())
}

#[tokio::test]
async fn test_truncate_quotes_schema_qualified_tables() -> Result<()> {
    let Some(mut client) = connect().await? else {
        return Ok(());
    };
    let tables = ["it_quoted_widgets"];
    drop_tables(&client, &tables).await?;
    client
        .batch_execute(
            "CREATE TABLE it_quoted_widgets (id integer PRIMARY KEY);\n\
             INSERT INTO it_quoted_widgets VALUES (1), (2);",
        )
        .await?;

    let workspace = Workspace::new()?;
    workspace.seed("seed.sql", "INSERT INTO it_quoted_widgets VALUES (3);")?;

    let importer = SeedImporter::new(workspace.config(&["public.IT_Quoted_Widgets"], &[], &[]));
    let report = importer
        .seed_from_file(&mut client, &DeployEnvironment::Development, "seed.sql")
        .await?;

    assert_eq!(report.truncated_tables, vec!["public.IT_Quoted_Widgets"]);
    assert_eq!(count(&client, "it_quoted_widgets").await?, 1);

    drop_tables(&client, &tables).await?;
    Ok(())
}
