// Bulk loading of inline COPY payloads
use crate::error::SeedError;
use crate::sql_parser::classifier::Cursor;
use crate::types::{snippet, Statement};
use futures::SinkExt;
use tokio_postgres::Transaction;
use tracing::debug;

/// Payload is streamed to the server in chunks of this size
const COPY_SEND_CHUNK_SIZE: usize = 64 * 1024;

/// Parsed `COPY <table> [(<columns>)] FROM STDIN [options]` clause
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyHeader {
    /// Table as written, possibly quoted and schema-qualified
    pub table: String,
    /// Column list as written, if any
    pub columns: Option<Vec<String>>,
    /// Anything after `FROM STDIN`, e.g. `WITH (FORMAT csv)`
    pub options: String,
}

impl CopyHeader {
    pub fn parse(sql: &str) -> Option<Self> {
        let mut cursor = Cursor::new(sql);
        if !cursor.keyword("COPY") {
            return None;
        }
        cursor.skip_modifiers(true);
        let table = cursor.identifier()?;

        cursor.skip_trivia();
        let columns = if cursor.peek() == Some(b'(') {
            let open = cursor.pos;
            if !cursor.skip_parenthesized() {
                return None;
            }
            Some(split_column_list(&sql[open + 1..cursor.pos - 1]))
        } else {
            None
        };

        if !cursor.keywords(&["FROM", "STDIN"]) {
            return None;
        }

        Some(Self {
            table,
            columns,
            options: cursor.rest().trim().to_string(),
        })
    }

    /// COPY command with an explicit column list
    pub fn to_sql(&self, columns: &[String]) -> String {
        let mut sql = format!("COPY {} ({}) FROM STDIN", self.table, columns.join(", "));
        if !self.options.is_empty() {
            sql.push(' ');
            sql.push_str(&self.options);
        }
        sql
    }
}

/// Stream a COPY statement's payload into the database.
///
/// Runs inside the caller's transaction. Returns the number of rows copied.
pub async fn load_copy_payload(tx: &Transaction<'_>, statement: &Statement) -> Result<u64, SeedError> {
    let header = CopyHeader::parse(&statement.sql).ok_or_else(|| {
        SeedError::configuration(format!("unsupported COPY statement: {}", snippet(&statement.sql)))
    })?;

    let columns = match &header.columns {
        Some(columns) if !columns.is_empty() => columns.clone(),
        _ => resolve_columns(tx, &header.table).await?,
    };
    if columns.is_empty() {
        return Err(SeedError::configuration(format!(
            "COPY target {} does not exist or has no columns",
            header.table
        )));
    }

    let copy_sql = header.to_sql(&columns);
    let payload = statement.copy_payload.clone().unwrap_or_default();
    debug!(table = %header.table, bytes = payload.len(), "Starting COPY: {}", copy_sql);

    let sink = tx.copy_in(copy_sql.as_str()).await?;
    futures::pin_mut!(sink);

    let mut offset = 0;
    while offset < payload.len() {
        let end = (offset + COPY_SEND_CHUNK_SIZE).min(payload.len());
        sink.send(payload.slice(offset..end)).await?;
        offset = end;
    }

    let rows = sink.finish().await?;
    debug!(table = %header.table, rows = rows, "COPY finished");
    Ok(rows)
}

/// Column order of a table from catalog metadata, as quoted identifiers
async fn resolve_columns(tx: &Transaction<'_>, table: &str) -> Result<Vec<String>, SeedError> {
    let (schema, name) = split_relation(table);
    let rows = tx
        .query(
            "SELECT column_name::text FROM information_schema.columns \
             WHERE table_schema = COALESCE($1::text, current_schema()) AND table_name = $2::text \
             ORDER BY ordinal_position",
            &[&schema, &name],
        )
        .await?;

    let mut columns = Vec::with_capacity(rows.len());
    for row in &rows {
        let column: String = row.try_get(0)?;
        columns.push(quote_ident(&column));
    }

    debug!(table = table, columns = columns.len(), "Resolved COPY column order from catalog");
    Ok(columns)
}

/// Split `schema.table` into catalog names, folding unquoted parts to lowercase
pub(crate) fn split_relation(table: &str) -> (Option<String>, String) {
    let mut parts: Vec<String> = table.split('.').map(fold_identifier).collect();
    let name = parts.pop().unwrap_or_default();
    (parts.pop(), name)
}

fn fold_identifier(segment: &str) -> String {
    let segment = segment.trim();
    match segment.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        Some(quoted) => quoted.replace("\"\"", "\""),
        None => segment.to_lowercase(),
    }
}

/// `schema.table` as quoted identifiers, folded the way the server resolves it
pub(crate) fn quote_relation(table: &str) -> String {
    match split_relation(table) {
        (Some(schema), name) => format!("{}.{}", quote_ident(&schema), quote_ident(&name)),
        (None, name) => quote_ident(&name),
    }
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Split a column list on top-level commas, keeping each entry as written
fn split_column_list(list: &str) -> Vec<String> {
    let mut columns = Vec::new();
    let mut current = String::new();
    let mut quoted = false;

    for ch in list.chars() {
        match ch {
            '"' => {
                quoted = !quoted;
                current.push(ch);
            }
            ',' if !quoted => {
                columns.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() {
        columns.push(current.trim().to_string());
    }

    columns.retain(|c| !c.is_empty());
    columns
}
