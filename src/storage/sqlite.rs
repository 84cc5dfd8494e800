//! SQLite storage implementation.
//!
//! Besides plain CRUD, this layer owns the engine's only synchronization
//! primitive: conditional status updates on the executions table. Claiming
//! (`pending -> running`) and finalizing (`running -> terminal`) both key on
//! the current status, so every transition is monotonic even with several
//! workers sharing one database.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, types::Value as SqlValue, Connection, OptionalExtension};
use tokio::sync::Mutex;

use super::models::*;
use crate::error::{Error, Result};
use crate::workflow::{validate_workflow, Workflow};

/// Parse an RFC 3339 datetime string into a `chrono::DateTime<Utc>`.
///
/// Returns a `rusqlite::Error` on parse failure instead of panicking,
/// so it is safe to use inside `query_row` / `query_map` closures.
fn parse_datetime_utc(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

/// Parse a typed JSON column, surfacing corruption as a conversion error.
fn parse_json_column<T: serde::de::DeserializeOwned>(idx: usize, s: &str) -> rusqlite::Result<T> {
    serde_json::from_str(s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Default query limit.
const DEFAULT_QUERY_LIMIT: usize = 50;
/// Maximum query limit to prevent abuse.
const MAX_QUERY_LIMIT: usize = 1000;

/// SQLite-based storage.
#[derive(Clone)]
pub struct SqliteStorage {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Open or create a database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init_schema_sync(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema_sync(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema_sync(conn: &Connection) -> Result<()> {
        // WAL mode must be set before any transaction begins.
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA busy_timeout = 5000;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS workflows (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                name TEXT NOT NULL,
                trigger_kind TEXT NOT NULL,
                trigger_spec TEXT NOT NULL,
                condition TEXT,
                actions TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(tenant_id, name)
            );

            CREATE TABLE IF NOT EXISTS executions (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                status TEXT NOT NULL,
                status_detail TEXT,
                cancel_requested INTEGER NOT NULL DEFAULT 0,
                trigger_kind TEXT NOT NULL,
                triggered_by TEXT NOT NULL,
                payload TEXT NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                FOREIGN KEY (workflow_id) REFERENCES workflows(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS action_logs (
                execution_id TEXT NOT NULL,
                action_index INTEGER NOT NULL,
                action_type TEXT NOT NULL,
                status TEXT NOT NULL,
                output TEXT,
                error TEXT,
                error_code TEXT,
                started_at TEXT NOT NULL,
                finished_at TEXT NOT NULL,
                PRIMARY KEY (execution_id, action_index),
                FOREIGN KEY (execution_id) REFERENCES executions(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_workflows_tenant ON workflows(tenant_id, name);
            CREATE INDEX IF NOT EXISTS idx_workflows_trigger ON workflows(trigger_kind, active);
            CREATE INDEX IF NOT EXISTS idx_executions_workflow ON executions(workflow_id, started_at DESC);
            CREATE INDEX IF NOT EXISTS idx_executions_tenant ON executions(tenant_id, started_at DESC);
            CREATE INDEX IF NOT EXISTS idx_executions_status ON executions(status);
            CREATE INDEX IF NOT EXISTS idx_executions_schedule ON executions(trigger_kind, workflow_id, started_at DESC);
            "#,
        )?;
        Ok(())
    }

    // ========================================================================
    // Workflow operations
    // ========================================================================

    /// Insert or update a workflow definition.
    ///
    /// Definitions are validated here so no write path can store a workflow
    /// the engine would have to reject at run time. `created_at` is
    /// preserved on update.
    pub async fn save_workflow(&self, workflow: &Workflow) -> Result<()> {
        validate_workflow(workflow)?;

        let trigger_spec = serde_json::to_string(&workflow.trigger)?;
        let condition = workflow
            .condition
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let actions = serde_json::to_string(&workflow.actions)?;

        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO workflows
             (id, tenant_id, name, trigger_kind, trigger_spec, condition, actions, active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
                tenant_id = excluded.tenant_id,
                name = excluded.name,
                trigger_kind = excluded.trigger_kind,
                trigger_spec = excluded.trigger_spec,
                condition = excluded.condition,
                actions = excluded.actions,
                active = excluded.active,
                updated_at = excluded.updated_at",
            params![
                workflow.id,
                workflow.tenant_id,
                workflow.name,
                workflow.trigger.kind(),
                trigger_spec,
                condition,
                actions,
                workflow.active,
                workflow.created_at.to_rfc3339(),
                workflow.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, tenant_id, name, trigger_spec, condition, actions, active, created_at, updated_at
             FROM workflows WHERE id = ?1",
        )?;

        let workflow = stmt.query_row([id], Self::row_to_workflow).optional()?;
        Ok(workflow)
    }

    /// List workflows, optionally scoped to one tenant.
    pub async fn list_workflows(&self, tenant_id: Option<&str>) -> Result<Vec<Workflow>> {
        let conn = self.conn.lock().await;

        let mut sql = String::from(
            "SELECT id, tenant_id, name, trigger_spec, condition, actions, active, created_at, updated_at
             FROM workflows WHERE 1=1",
        );
        let mut bind: Vec<SqlValue> = Vec::new();

        if let Some(tenant_id) = tenant_id {
            sql.push_str(" AND tenant_id = ?");
            bind.push(SqlValue::Text(tenant_id.to_string()));
        }
        sql.push_str(" ORDER BY tenant_id, name");

        let mut stmt = conn.prepare(&sql)?;
        let workflows = stmt
            .query_map(params_from_iter(bind.iter()), Self::row_to_workflow)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(workflows)
    }

    /// List active workflows with the given trigger kind.
    ///
    /// Event-name and tenant matching happen in the dispatcher; the stored
    /// trigger is a JSON column, so the store only narrows by kind.
    pub async fn list_active_by_trigger_kind(&self, kind: &str) -> Result<Vec<Workflow>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, tenant_id, name, trigger_spec, condition, actions, active, created_at, updated_at
             FROM workflows WHERE active = 1 AND trigger_kind = ?1
             ORDER BY tenant_id, name",
        )?;

        let workflows = stmt
            .query_map([kind], Self::row_to_workflow)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(workflows)
    }

    /// Flip the active flag. Returns false if the workflow does not exist.
    ///
    /// Deactivation only prevents new admissions; in-flight executions are
    /// never aborted by it.
    pub async fn set_workflow_active(&self, id: &str, active: bool) -> Result<bool> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE workflows SET active = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, active, Utc::now().to_rfc3339()],
        )?;
        Ok(changed == 1)
    }

    /// Delete a workflow and, via cascade, its executions and logs.
    pub async fn delete_workflow(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        let changed = conn.execute("DELETE FROM workflows WHERE id = ?1", [id])?;
        Ok(changed == 1)
    }

    // ========================================================================
    // Execution operations
    // ========================================================================

    pub async fn save_execution(&self, execution: &Execution) -> Result<()> {
        let triggered_by = serde_json::to_string(&execution.triggered_by)?;
        let payload = serde_json::to_string(&execution.payload)?;

        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO executions
             (id, workflow_id, tenant_id, status, status_detail, trigger_kind, triggered_by, payload, started_at, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
                workflow_id = excluded.workflow_id,
                tenant_id = excluded.tenant_id,
                status = excluded.status,
                status_detail = excluded.status_detail,
                trigger_kind = excluded.trigger_kind,
                triggered_by = excluded.triggered_by,
                payload = excluded.payload,
                started_at = excluded.started_at,
                finished_at = excluded.finished_at",
            params![
                execution.id,
                execution.workflow_id,
                execution.tenant_id,
                execution.status.to_string(),
                execution.status_detail,
                execution.triggered_by.kind(),
                triggered_by,
                payload,
                execution.started_at.to_rfc3339(),
                execution.finished_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    pub async fn get_execution(&self, id: &str) -> Result<Option<Execution>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, workflow_id, tenant_id, status, status_detail, triggered_by, payload, started_at, finished_at
             FROM executions WHERE id = ?1",
        )?;

        let execution = stmt.query_row([id], Self::row_to_execution).optional()?;
        Ok(execution)
    }

    /// Claim a pending execution for running.
    ///
    /// The conditional update is the mutual-exclusion point: with several
    /// workers racing, exactly one sees a changed row. The losers get
    /// `Error::ClaimConflict`, which callers treat as a normal no-op.
    pub async fn claim_execution(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE executions SET status = 'running' WHERE id = ?1 AND status = 'pending'",
            [id],
        )?;
        if changed == 1 {
            return Ok(());
        }

        let existing: Option<String> = conn
            .query_row("SELECT status FROM executions WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .optional()?;
        match existing {
            Some(_) => Err(Error::ClaimConflict(id.to_string())),
            None => Err(Error::Execution(format!("Execution not found: {}", id))),
        }
    }

    /// Move a running execution to a terminal status.
    ///
    /// Returns false when the execution was not in `running`, meaning some
    /// other path already finalized or cancelled it; the caller must not
    /// overwrite that outcome.
    pub async fn finalize_execution(
        &self,
        id: &str,
        status: ExecutionStatus,
        status_detail: Option<&str>,
    ) -> Result<bool> {
        if !status.is_terminal() {
            return Err(Error::Execution(format!(
                "Cannot finalize execution {} to non-terminal status {}",
                id, status
            )));
        }

        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE executions
             SET status = ?2, status_detail = ?3, finished_at = ?4
             WHERE id = ?1 AND status = 'running'",
            params![id, status.to_string(), status_detail, Utc::now().to_rfc3339()],
        )?;
        Ok(changed == 1)
    }

    /// Cancel an execution that has not been claimed yet.
    ///
    /// Reuses the claim primitive: whoever flips the pending row first wins,
    /// so a racing engine claim observes `ClaimConflict` and stops.
    pub async fn cancel_pending_execution(
        &self,
        id: &str,
        status_detail: Option<&str>,
    ) -> Result<bool> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE executions
             SET status = 'cancelled', status_detail = ?2, finished_at = ?3
             WHERE id = ?1 AND status = 'pending'",
            params![id, status_detail, Utc::now().to_rfc3339()],
        )?;
        Ok(changed == 1)
    }

    /// Durably request cancellation of a not-yet-terminal execution.
    ///
    /// The flag lives on the row, so it reaches whichever engine or process
    /// holds the claim: the claim owner observes it at its next action
    /// boundary and performs the `running -> cancelled` transition itself.
    /// Returns false when the execution is already terminal.
    pub async fn request_cancel(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE executions SET cancel_requested = 1
             WHERE id = ?1 AND status IN ('pending', 'running')",
            [id],
        )?;
        Ok(changed == 1)
    }

    /// Whether cancellation has been requested for an execution.
    pub async fn cancel_requested(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        let requested: Option<i64> = conn
            .query_row(
                "SELECT cancel_requested FROM executions WHERE id = ?1",
                [id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(requested.unwrap_or(0) != 0)
    }

    pub async fn query_executions(&self, query: &ExecutionQuery) -> Result<Vec<Execution>> {
        let conn = self.conn.lock().await;

        let mut sql = String::from(
            "SELECT id, workflow_id, tenant_id, status, status_detail, triggered_by, payload, started_at, finished_at
             FROM executions WHERE 1=1",
        );
        let mut bind: Vec<SqlValue> = Vec::new();

        if let Some(workflow_id) = &query.workflow_id {
            sql.push_str(" AND workflow_id = ?");
            bind.push(SqlValue::Text(workflow_id.clone()));
        }

        if let Some(tenant_id) = &query.tenant_id {
            sql.push_str(" AND tenant_id = ?");
            bind.push(SqlValue::Text(tenant_id.clone()));
        }

        if let Some(status) = &query.status {
            sql.push_str(" AND status = ?");
            bind.push(SqlValue::Text(status.to_string()));
        }

        if let Some(trigger_kind) = &query.trigger_kind {
            sql.push_str(" AND trigger_kind = ?");
            bind.push(SqlValue::Text(trigger_kind.clone()));
        }

        if let Some(started_after) = &query.started_after {
            sql.push_str(" AND started_at >= ?");
            bind.push(SqlValue::Text(started_after.to_rfc3339()));
        }

        if let Some(started_before) = &query.started_before {
            sql.push_str(" AND started_at <= ?");
            bind.push(SqlValue::Text(started_before.to_rfc3339()));
        }

        sql.push_str(" ORDER BY started_at DESC LIMIT ? OFFSET ?");
        let limit = if query.limit == 0 {
            DEFAULT_QUERY_LIMIT
        } else {
            query.limit.min(MAX_QUERY_LIMIT)
        };
        bind.push(SqlValue::Integer(limit as i64));
        bind.push(SqlValue::Integer(query.offset as i64));

        let mut stmt = conn.prepare(&sql)?;
        let executions = stmt
            .query_map(params_from_iter(bind.iter()), Self::row_to_execution)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(executions)
    }

    /// Executions still waiting for a claim, oldest first.
    ///
    /// Used by the startup recovery sweep; safe to race with live dispatch
    /// because running them goes through `claim_execution` anyway.
    pub async fn list_pending_executions(&self) -> Result<Vec<Execution>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, workflow_id, tenant_id, status, status_detail, triggered_by, payload, started_at, finished_at
             FROM executions WHERE status = 'pending' ORDER BY started_at ASC",
        )?;

        let executions = stmt
            .query_map([], Self::row_to_execution)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(executions)
    }

    /// Most recent schedule-triggered admission per workflow.
    ///
    /// Lexicographic MAX over RFC 3339 UTC text is chronological, matching
    /// the ordering the query surface already relies on.
    pub async fn latest_schedule_admissions(&self) -> Result<HashMap<String, DateTime<Utc>>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT workflow_id, MAX(started_at) FROM executions
             WHERE trigger_kind = 'schedule'
             GROUP BY workflow_id",
        )?;

        let rows = stmt
            .query_map([], |row| {
                let workflow_id: String = row.get(0)?;
                let started_at = parse_datetime_utc(&row.get::<_, String>(1)?)?;
                Ok((workflow_id, started_at))
            })?
            .collect::<std::result::Result<HashMap<_, _>, _>>()?;

        Ok(rows)
    }

    // ========================================================================
    // Action log operations
    // ========================================================================

    /// Append one immutable action log row.
    ///
    /// The `(execution_id, action_index)` primary key makes "exactly one
    /// log per executed action" a schema guarantee; a duplicate append is a
    /// bug and surfaces as a database error.
    pub async fn append_action_log(&self, entry: &ActionLogEntry) -> Result<()> {
        let output = entry
            .output
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO action_logs
             (execution_id, action_index, action_type, status, output, error, error_code, started_at, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                entry.execution_id,
                entry.action_index,
                entry.action_type,
                entry.status.to_string(),
                output,
                entry.error,
                entry.error_code,
                entry.started_at.to_rfc3339(),
                entry.finished_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub async fn get_action_logs(&self, execution_id: &str) -> Result<Vec<ActionLogEntry>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT execution_id, action_index, action_type, status, output, error, error_code, started_at, finished_at
             FROM action_logs WHERE execution_id = ?1 ORDER BY action_index",
        )?;

        let entries = stmt
            .query_map([execution_id], |row| {
                let status_str: String = row.get(3)?;
                let status = status_str.parse().unwrap_or(ActionLogStatus::Failed);
                let output_str: Option<String> = row.get(4)?;

                Ok(ActionLogEntry {
                    execution_id: row.get(0)?,
                    action_index: row.get(1)?,
                    action_type: row.get(2)?,
                    status,
                    output: output_str.and_then(|s| serde_json::from_str(&s).ok()),
                    error: row.get(5)?,
                    error_code: row.get(6)?,
                    started_at: parse_datetime_utc(&row.get::<_, String>(7)?)?,
                    finished_at: parse_datetime_utc(&row.get::<_, String>(8)?)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(entries)
    }

    fn row_to_workflow(row: &rusqlite::Row<'_>) -> rusqlite::Result<Workflow> {
        let trigger_str: String = row.get(3)?;
        let condition_str: Option<String> = row.get(4)?;
        let actions_str: String = row.get(5)?;

        Ok(Workflow {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            name: row.get(2)?,
            trigger: parse_json_column(3, &trigger_str)?,
            condition: condition_str
                .map(|s| parse_json_column(4, &s))
                .transpose()?,
            actions: parse_json_column(5, &actions_str)?,
            active: row.get(6)?,
            created_at: parse_datetime_utc(&row.get::<_, String>(7)?)?,
            updated_at: parse_datetime_utc(&row.get::<_, String>(8)?)?,
        })
    }

    fn row_to_execution(row: &rusqlite::Row<'_>) -> rusqlite::Result<Execution> {
        let status_str: String = row.get(3)?;
        let status = status_str.parse().unwrap_or(ExecutionStatus::Failed);
        let triggered_by_str: String = row.get(5)?;
        let payload_str: String = row.get(6)?;

        Ok(Execution {
            id: row.get(0)?,
            workflow_id: row.get(1)?,
            tenant_id: row.get(2)?,
            status,
            status_detail: row.get(4)?,
            triggered_by: parse_json_column(5, &triggered_by_str)?,
            payload: serde_json::from_str(&payload_str).unwrap_or(serde_json::Value::Null),
            started_at: parse_datetime_utc(&row.get::<_, String>(7)?)?,
            finished_at: row
                .get::<_, Option<String>>(8)?
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|t| t.with_timezone(&Utc)),
        })
    }
}
