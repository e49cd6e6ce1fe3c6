//! SQLite database connector
//!
//! The connection is synchronous, so every statement runs inside
//! `spawn_blocking` with the connection behind a mutex. A send carries one
//! SQL statement; `query: true` returns rows as JSON objects keyed by column
//! name, otherwise the affected row count comes back.

use crate::connector::{require_connected, Connector};
use crate::{PipeError, PipeResult, PipeState, PipeStatus, StatusCell};
use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde_json::{json, Map, Number, Value};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// SQLite pipe
pub struct DatabasePipe {
    name: String,
    path: String,
    conn: Arc<Mutex<Option<Connection>>>,
    status: StatusCell,
}

impl DatabasePipe {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            status: StatusCell::new(&name),
            name,
            path: path.into(),
            conn: Arc::new(Mutex::new(None)),
        }
    }
}

#[async_trait]
impl Connector for DatabasePipe {
    fn kind(&self) -> &'static str {
        "database"
    }

    fn status(&self) -> PipeStatus {
        self.status.snapshot()
    }

    async fn connect(&self) -> PipeResult<()> {
        if self.status.state() == PipeState::Connected {
            return Ok(());
        }
        self.status.transition(PipeState::Connecting)?;

        let path = self.path.clone();
        let opened = tokio::task::spawn_blocking(move || Connection::open(path))
            .await
            .map_err(|err| PipeError::Connect {
                name: self.name.clone(),
                reason: err.to_string(),
            })?;

        match opened {
            Ok(conn) => {
                *self.conn.lock().unwrap_or_else(|e| e.into_inner()) = Some(conn);
                self.status.transition(PipeState::Connected)?;
                info!(pipe = %self.name, path = %self.path, "Database opened");
                Ok(())
            }
            Err(err) => {
                self.status.record_error(err.to_string());
                self.status.transition(PipeState::Failed)?;
                Err(PipeError::Database(err))
            }
        }
    }

    async fn disconnect(&self) -> PipeResult<()> {
        *self.conn.lock().unwrap_or_else(|e| e.into_inner()) = None;
        self.status.transition(PipeState::Disconnected)
    }

    async fn send(&self, message: Value) -> PipeResult<Option<Value>> {
        require_connected(&self.name, self.status.state())?;

        let sql = message
            .get("sql")
            .and_then(Value::as_str)
            .ok_or_else(|| PipeError::BadMessage("database send requires 'sql'".to_string()))?
            .to_string();
        let params: Vec<Value> = message
            .get("params")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let is_query = message
            .get("query")
            .and_then(Value::as_bool)
            .unwrap_or_else(|| sql.trim_start().to_lowercase().starts_with("select"));

        debug!(pipe = %self.name, query = is_query, "Executing statement");

        let conn = self.conn.clone();
        let name = self.name.clone();
        let result = tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(|e| e.into_inner());
            let conn = guard.as_ref().ok_or_else(|| PipeError::Unavailable {
                name: name.clone(),
                state: PipeState::Disconnected,
            })?;
            execute_statement(conn, &sql, &params, is_query)
        })
        .await
        .map_err(|err| PipeError::Send {
            name: self.name.clone(),
            reason: err.to_string(),
        })??;

        Ok(Some(result))
    }
}

fn execute_statement(
    conn: &Connection,
    sql: &str,
    params: &[Value],
    is_query: bool,
) -> PipeResult<Value> {
    let mut stmt = conn.prepare(sql)?;
    let bound = params.iter().map(json_to_sql).collect::<Vec<_>>();
    let param_refs: Vec<&dyn rusqlite::ToSql> =
        bound.iter().map(|v| v as &dyn rusqlite::ToSql).collect();

    if is_query {
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let mut rows = stmt.query(param_refs.as_slice())?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut object = Map::new();
            for (index, column) in columns.iter().enumerate() {
                object.insert(column.clone(), sql_to_json(row.get_ref(index)?));
            }
            out.push(Value::Object(object));
        }
        Ok(json!({"rows": out}))
    } else {
        let changed = stmt.execute(param_refs.as_slice())?;
        Ok(json!({"changed": changed}))
    }
}

fn json_to_sql(value: &Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as Sql;
    match value {
        Value::Null => Sql::Null,
        Value::Bool(b) => Sql::Integer(*b as i64),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Sql::Integer(i)
            } else {
                Sql::Real(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => Sql::Text(s.clone()),
        other => Sql::Text(other.to_string()),
    }
}

fn sql_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Number(i.into()),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).to_string()),
        ValueRef::Blob(b) => Value::String(hex::encode(b)),
    }
}
