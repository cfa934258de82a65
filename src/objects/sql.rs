use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{DataObject, Row};
use crate::error::{ObjectError, OperationError};
use crate::models::Representation;
use crate::validation::SqlValidator;

/// SQLite connection that SQL objects are composed against
///
/// Every store has its own identity. Statements from two different stores
/// cannot be combined into one statement even when both sides are SQL.
/// Uses tokio::Mutex for async-friendly locking
pub struct SqlStore {
    id: Uuid,
    url: String,
    conn: Arc<Mutex<Connection>>,
}

impl SqlStore {
    /// Open a store from a path or SQLite URL (`sqlite:./path`, `sqlite://path`, `:memory:`)
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Arc<Self>, ObjectError> {
        let path_str = db_path.as_ref().to_string_lossy();
        let clean_path: &str = if path_str.starts_with("sqlite:") {
            path_str.trim_start_matches("sqlite:").trim_start_matches("//")
        } else {
            path_str.as_ref()
        };

        let conn = Connection::open(clean_path)?;
        tracing::debug!("Opened SQL store at {}", clean_path);

        Ok(Arc::new(Self {
            id: Uuid::new_v4(),
            url: clean_path.to_string(),
            conn: Arc::new(Mutex::new(conn)),
        }))
    }

    pub fn open_in_memory() -> Result<Arc<Self>, ObjectError> {
        Self::open(":memory:")
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// True when statements of both stores can be composed into one
    pub fn can_compose(&self, other: &SqlStore) -> bool {
        self.id == other.id
    }

    /// Run setup statements (DDL, inserts)
    pub async fn execute_batch(&self, sql: &str) -> Result<(), ObjectError> {
        let conn = self.conn.lock().await;
        conn.execute_batch(sql)?;
        Ok(())
    }

    /// Data object over a whole table
    pub async fn table(self: &Arc<Self>, name: &str) -> Result<SqlObject, OperationError> {
        let statement = format!("SELECT * FROM {}", SqlValidator::quote_identifier(name));
        SqlObject::compose(self.clone(), statement).await
    }

    async fn column_names(&self, statement: &str) -> Result<Vec<String>, ObjectError> {
        let conn = self.conn.lock().await;
        let stmt = conn.prepare(statement)?;
        Ok(stmt.column_names().into_iter().map(String::from).collect())
    }

    async fn fetch(&self, statement: &str) -> Result<Vec<Row>, ObjectError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(statement)?;
        let column_count = stmt.column_count();

        let rows = stmt
            .query_map([], |row| {
                (0..column_count)
                    .map(|idx| row.get_ref(idx).map(json_value))
                    .collect::<Result<Row, _>>()
            })?
            .collect::<Result<Vec<Row>, _>>()?;

        tracing::debug!("Fetched {} rows from SQL store {}", rows.len(), self.id);
        Ok(rows)
    }
}

impl fmt::Debug for SqlStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlStore")
            .field("id", &self.id)
            .field("url", &self.url)
            .finish()
    }
}

fn json_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
    }
}

/// SQL representation of an object: a SELECT statement bound to a store
#[derive(Debug, Clone)]
pub struct SqlStatement {
    pub store: Arc<SqlStore>,
    pub statement: String,
}

/// Data object backed by a SELECT statement
#[derive(Debug, Clone)]
pub struct SqlObject {
    sql: SqlStatement,
    fields: Vec<String>,
}

impl SqlObject {
    /// Wrap a SELECT statement, validating it and reading its column names
    pub async fn compose(store: Arc<SqlStore>, statement: String) -> Result<Self, OperationError> {
        SqlValidator::validate_query(&statement)?;
        let fields = store.column_names(&statement).await?;
        Ok(Self {
            sql: SqlStatement { store, statement },
            fields,
        })
    }
}

#[async_trait]
impl DataObject for SqlObject {
    fn representations(&self) -> Vec<Representation> {
        vec![Representation::Sql, Representation::Rows, Representation::Records]
    }

    fn fields(&self) -> Vec<String> {
        self.fields.clone()
    }

    async fn rows(&self) -> Result<Vec<Row>, ObjectError> {
        self.sql.store.fetch(&self.sql.statement).await
    }

    fn sql(&self) -> Result<SqlStatement, ObjectError> {
        Ok(self.sql.clone())
    }
}
