//! SQLite store backend.
//!
//! Every collection lives in a single `documents` table holding the JSON
//! body of each document. Filters are compiled to SQL over SQLite's JSON
//! functions (`json_extract`, `json_each`), so query semantics line up with
//! the in-memory evaluator in [`Filter::matches`].
//!
//! All statements run on the dedicated `tokio-rusqlite` thread; callers
//! await results without blocking the runtime.

use crate::document::{project, Collection, Document};
use crate::error::{StoreError, StoreResult};
use crate::filter::{Filter, FindOptions, SortOrder, Update, UpdateOutcome};
use crate::{require_id, Store};
use async_trait::async_trait;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter};
use serde_json::Value;
use std::path::Path;
use tokio_rusqlite::Connection;
use tracing::{debug, info};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS documents (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        collection TEXT NOT NULL,
        id TEXT NOT NULL,
        body TEXT NOT NULL,
        UNIQUE (collection, id)
    );
    CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents (collection, seq);
";

/// Convert a tokio_rusqlite::Error to StoreError.
fn from_tokio_rusqlite(e: tokio_rusqlite::Error) -> StoreError {
    match e {
        tokio_rusqlite::Error::Rusqlite(e) => StoreError::Sqlite(e),
        tokio_rusqlite::Error::Close(_) => StoreError::Connection("Connection closed".to_string()),
        other => StoreError::Connection(other.to_string()),
    }
}

/// Store backed by a SQLite database file.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Connection,
    path: String,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    ///
    /// Creates parent directories, enables WAL mode and creates the schema
    /// if it is missing.
    pub async fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let path_str = path.to_string_lossy().to_string();
        info!(path = %path_str, "Opening document store");

        let conn = Connection::open(path)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let store = Self {
            conn,
            path: path_str,
        };
        store
            .call(|conn| {
                conn.execute_batch(
                    "
                    PRAGMA journal_mode = WAL;
                    PRAGMA synchronous = NORMAL;
                    PRAGMA busy_timeout = 5000;
                    ",
                )?;
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await?;

        info!(path = %store.path, "Document store ready");
        Ok(store)
    }

    /// Open a private in-memory database.
    pub async fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let store = Self {
            conn,
            path: ":memory:".to_string(),
        };
        store
            .call(|conn| {
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await?;
        Ok(store)
    }

    /// Path of the database file.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Run a closure on the executor thread.
    ///
    /// Only SQL and light row mapping belong inside the closure; it blocks
    /// every other query while it runs.
    async fn call<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut rusqlite::Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let outer = self.conn.call(move |conn| Ok(f(conn))).await;
        match outer {
            Ok(inner) => inner,
            Err(e) => Err(from_tokio_rusqlite(e)),
        }
    }
}

/// A filter compiled to a SQL boolean expression plus its bound parameters.
#[derive(Debug, Default)]
struct CompiledQuery {
    sql: String,
    params: Vec<SqlValue>,
}

impl CompiledQuery {
    /// Start a `WHERE collection = ? AND (<filter>)` clause.
    fn scoped(collection: Collection, filter: &Filter) -> Self {
        let mut query = Self {
            sql: "collection = ? AND (".to_string(),
            params: vec![SqlValue::Text(collection.name().to_string())],
        };
        query.push_filter(filter);
        query.sql.push(')');
        query
    }

    fn push_filter(&mut self, filter: &Filter) {
        match filter {
            Filter::All => self.sql.push('1'),
            Filter::Eq(field, value) => self.push_comparison(field, "IS", value),
            Filter::Ne(field, value) => self.push_comparison(field, "IS NOT", value),
            Filter::Lt(field, value) => self.push_comparison(field, "<", value),
            Filter::Gte(field, value) => self.push_comparison(field, ">=", value),
            Filter::In(_, values) if values.is_empty() => self.sql.push('0'),
            Filter::In(field, values) => {
                self.sql.push_str("json_extract(body, ?) IN (");
                self.params.push(json_path(field));
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        self.sql.push_str(", ");
                    }
                    self.sql.push('?');
                    self.params.push(sql_value(value));
                }
                self.sql.push(')');
            }
            Filter::Contains(field, value) => self.push_membership(field, value, false),
            Filter::NotContains(field, value) => self.push_membership(field, value, true),
            Filter::And(filters) => self.push_group(filters, " AND ", '1'),
            Filter::Or(filters) => self.push_group(filters, " OR ", '0'),
        }
    }

    fn push_comparison(&mut self, field: &str, op: &str, value: &Value) {
        self.sql.push_str("json_extract(body, ?) ");
        self.sql.push_str(op);
        self.sql.push_str(" ?");
        self.params.push(json_path(field));
        self.params.push(sql_value(value));
    }

    fn push_membership(&mut self, field: &str, value: &Value, negate: bool) {
        if negate {
            self.sql.push_str("NOT ");
        }
        self.sql
            .push_str("EXISTS (SELECT 1 FROM json_each(documents.body, ?) WHERE json_each.value = ?)");
        self.params.push(json_path(field));
        self.params.push(sql_value(value));
    }

    fn push_group(&mut self, filters: &[Filter], joiner: &str, empty: char) {
        if filters.is_empty() {
            self.sql.push(empty);
            return;
        }
        self.sql.push('(');
        for (i, filter) in filters.iter().enumerate() {
            if i > 0 {
                self.sql.push_str(joiner);
            }
            self.push_filter(filter);
        }
        self.sql.push(')');
    }
}

fn json_path(field: &str) -> SqlValue {
    SqlValue::Text(format!("$.\"{field}\""))
}

fn sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn parse_body(body: &str) -> StoreResult<Document> {
    match serde_json::from_str::<Value>(body)? {
        Value::Object(doc) => Ok(doc),
        _ => Err(StoreError::InvalidDocument(
            "stored body is not an object".to_string(),
        )),
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn find_many(
        &self,
        collection: Collection,
        filter: &Filter,
        options: FindOptions,
    ) -> StoreResult<Vec<Document>> {
        let mut query = CompiledQuery::scoped(collection, filter);
        let mut sql = format!("SELECT body FROM documents WHERE {}", query.sql);

        match options.sort {
            Some(sort) => {
                let direction = match sort.order {
                    SortOrder::Ascending => "ASC",
                    SortOrder::Descending => "DESC",
                };
                sql.push_str(&format!(
                    " ORDER BY json_extract(body, ?) {direction}, seq ASC"
                ));
                query.params.push(json_path(sort.field));
            }
            None => sql.push_str(" ORDER BY seq ASC"),
        }

        if let Some(limit) = options.limit {
            sql.push_str(" LIMIT ?");
            query
                .params
                .push(SqlValue::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
        }

        let params = query.params;
        let projection = options.projection;
        self.call(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
                row.get::<_, String>(0)
            })?;

            let mut docs = Vec::new();
            for row in rows {
                let doc = parse_body(&row?)?;
                docs.push(match &projection {
                    Some(fields) => project(doc, fields),
                    None => doc,
                });
            }
            Ok(docs)
        })
        .await
    }

    async fn count(&self, collection: Collection, filter: &Filter) -> StoreResult<u64> {
        let query = CompiledQuery::scoped(collection, filter);
        let sql = format!("SELECT COUNT(*) FROM documents WHERE {}", query.sql);
        let params = query.params;

        self.call(move |conn| {
            let count: i64 =
                conn.query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))?;
            Ok(count.max(0) as u64)
        })
        .await
    }

    async fn insert_one(&self, collection: Collection, doc: Document) -> StoreResult<()> {
        let id = require_id(&doc)?;
        let body = serde_json::to_string(&doc)?;
        let name = collection.name();

        self.call(move |conn| {
            match conn.execute(
                "INSERT INTO documents (collection, id, body) VALUES (?1, ?2, ?3)",
                params![name, id, body],
            ) {
                Ok(_) => Ok(()),
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    Err(StoreError::Duplicate {
                        collection: name,
                        id,
                    })
                }
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn update_many(
        &self,
        collection: Collection,
        filter: &Filter,
        update: &Update,
    ) -> StoreResult<UpdateOutcome> {
        let query = CompiledQuery::scoped(collection, filter);
        let sql = format!("SELECT seq, body FROM documents WHERE {}", query.sql);
        let params = query.params;
        let update = update.clone();

        let outcome = self
            .call(move |conn| {
                let tx = conn.transaction()?;

                let rows = {
                    let mut stmt = tx.prepare(&sql)?;
                    let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
                        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
                    })?;
                    rows.collect::<Result<Vec<_>, _>>()?
                };

                let mut outcome = UpdateOutcome {
                    matched: rows.len() as u64,
                    modified: 0,
                };
                for (seq, body) in rows {
                    let mut doc = parse_body(&body)?;
                    if update.apply(&mut doc)? {
                        tx.execute(
                            "UPDATE documents SET body = ?1 WHERE seq = ?2",
                            params![serde_json::to_string(&doc)?, seq],
                        )?;
                        outcome.modified += 1;
                    }
                }

                tx.commit()?;
                Ok(outcome)
            })
            .await?;

        debug!(
            collection = %collection,
            matched = outcome.matched,
            modified = outcome.modified,
            "update_many"
        );
        Ok(outcome)
    }

    async fn delete_many(&self, collection: Collection, filter: &Filter) -> StoreResult<u64> {
        let query = CompiledQuery::scoped(collection, filter);
        let sql = format!("DELETE FROM documents WHERE {}", query.sql);
        let params = query.params;

        self.call(move |conn| Ok(conn.execute(&sql, params_from_iter(params.iter()))? as u64))
            .await
    }
}
