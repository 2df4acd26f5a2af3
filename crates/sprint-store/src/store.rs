//! Embedded relational state store, backed by SQLite in WAL mode.
//!
//! Grounded on the connection/pragma/migration conventions of a sibling
//! project's SQLite-backed store: a versioned, idempotent schema, foreign
//! keys enforced on every connection, and partial updates guarded by a
//! closed per-entity field whitelist rather than accepting arbitrary column
//! names from the caller.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use sprint_types::{BackgroundTask, Batch, Command, Event, Story, StoryStatus};

use crate::error::{StoreError, StoreResult};

const SCHEMA_VERSION: i64 = 1;

const BATCH_FIELDS: &[&str] = &["ended_at", "max_cycles", "cycles_completed", "status"];
const STORY_FIELDS: &[&str] = &["status", "started_at", "ended_at"];
const COMMAND_FIELDS: &[&str] = &["ended_at", "status", "output_summary"];
const BACKGROUND_TASK_FIELDS: &[&str] = &["completed_at", "status"];

pub struct StateStore {
    conn: Mutex<Connection>,
}

impl StateStore {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "busy_timeout", 5_000)?;
        migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // ---------------------------------------------------------------- Batch

    pub fn create_batch(&self, started_at: i64, max_cycles: i64) -> StoreResult<Batch> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO batches (started_at, max_cycles, cycles_completed, status) VALUES (?1, ?2, 0, 'running')",
            params![started_at, max_cycles],
        )?;
        let id = conn.last_insert_rowid();
        drop(conn);
        self.get_batch(id)
    }

    pub fn get_batch(&self, id: i64) -> StoreResult<Batch> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, started_at, ended_at, max_cycles, cycles_completed, status FROM batches WHERE id = ?1",
            params![id],
            row_to_batch,
        )
        .map_err(|_| StoreError::NotFound { entity: "batch", id })
    }

    pub fn active_batch(&self) -> StoreResult<Option<Batch>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, started_at, ended_at, max_cycles, cycles_completed, status FROM batches WHERE status = 'running' LIMIT 1",
            [],
            row_to_batch,
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn update_batch(&self, id: i64, fields: &Value) -> StoreResult<Batch> {
        self.update_entity("batch", "batches", BATCH_FIELDS, id, fields)?;
        self.get_batch(id)
    }

    pub fn list_batches(&self, limit: i64, offset: i64) -> StoreResult<(Vec<Batch>, i64)> {
        let conn = self.conn.lock().unwrap();
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM batches", [], |r| r.get(0))?;
        let mut stmt = conn.prepare(
            "SELECT id, started_at, ended_at, max_cycles, cycles_completed, status FROM batches ORDER BY id DESC LIMIT ?1 OFFSET ?2",
        )?;
        let batches = stmt
            .query_map(params![limit, offset], row_to_batch)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok((batches, total))
    }

    /// Forcibly finalizes any lingering `running` batch at process startup.
    /// Returns the ids that were finalized, for logging.
    pub fn finalize_stale_running_batches(&self, now: i64) -> StoreResult<Vec<i64>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT id FROM batches WHERE status = 'running'")?;
        let ids: Vec<i64> = stmt
            .query_map([], |r| r.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        for id in &ids {
            conn.execute(
                "UPDATE batches SET status = 'stopped', ended_at = ?1 WHERE id = ?2",
                params![now, id],
            )?;
        }
        Ok(ids)
    }

    // ---------------------------------------------------------------- Story

    pub fn create_story(
        &self,
        batch_id: i64,
        story_key: &str,
        epic_id: &str,
        started_at: i64,
    ) -> StoreResult<Story> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO stories (batch_id, story_key, epic_id, status, started_at) VALUES (?1, ?2, ?3, 'pending', ?4)",
            params![batch_id, story_key, epic_id, started_at],
        )?;
        let id = conn.last_insert_rowid();
        drop(conn);
        self.get_story(id)
    }

    pub fn get_story(&self, id: i64) -> StoreResult<Story> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, batch_id, story_key, epic_id, status, started_at, ended_at FROM stories WHERE id = ?1",
            params![id],
            row_to_story,
        )
        .map_err(|_| StoreError::NotFound { entity: "story", id })
    }

    pub fn get_story_by_key(&self, batch_id: i64, story_key: &str) -> StoreResult<Story> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, batch_id, story_key, epic_id, status, started_at, ended_at FROM stories WHERE batch_id = ?1 AND story_key = ?2",
            params![batch_id, story_key],
            row_to_story,
        )
        .map_err(|_| StoreError::StoryKeyNotFound {
            batch_id,
            story_key: story_key.to_string(),
        })
    }

    pub fn stories_of_batch(&self, batch_id: i64) -> StoreResult<Vec<Story>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, batch_id, story_key, epic_id, status, started_at, ended_at FROM stories WHERE batch_id = ?1 ORDER BY id",
        )?;
        let stories = stmt
            .query_map(params![batch_id], row_to_story)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(stories)
    }

    /// Updates a story's status, validating it against the closed status
    /// set, and sets `ended_at` atomically when entering a terminal status
    /// (`done`, `failed`, `blocked`) if the caller didn't already supply one.
    pub fn update_story(&self, id: i64, fields: &Value, now: i64) -> StoreResult<Story> {
        let mut fields = fields.clone();
        if let Some(status) = fields.get("status").and_then(Value::as_str) {
            let parsed = StoryStatus::parse(status).ok_or_else(|| StoreError::InvalidStatus {
                entity: "story",
                status: status.to_string(),
            })?;
            if parsed.is_terminal() && fields.get("ended_at").is_none() {
                if let Value::Object(ref mut map) = fields {
                    map.insert("ended_at".to_string(), Value::from(now));
                }
            }
        }
        self.update_entity("story", "stories", STORY_FIELDS, id, &fields)?;
        self.get_story(id)
    }

    // -------------------------------------------------------------- Command

    pub fn create_command(
        &self,
        story_id: i64,
        command: &str,
        task_id: &str,
        started_at: i64,
    ) -> StoreResult<Command> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO commands (story_id, command, task_id, started_at, status) VALUES (?1, ?2, ?3, ?4, 'running')",
            params![story_id, command, task_id, started_at],
        )?;
        let id = conn.last_insert_rowid();
        drop(conn);
        self.get_command(id)
    }

    pub fn get_command(&self, id: i64) -> StoreResult<Command> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, story_id, command, task_id, started_at, ended_at, status, output_summary FROM commands WHERE id = ?1",
            params![id],
            row_to_command,
        )
        .map_err(|_| StoreError::NotFound { entity: "command", id })
    }

    pub fn update_command(&self, id: i64, fields: &Value) -> StoreResult<Command> {
        self.update_entity("command", "commands", COMMAND_FIELDS, id, fields)?;
        self.get_command(id)
    }

    pub fn commands_of_story(&self, story_id: i64) -> StoreResult<Vec<Command>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, story_id, command, task_id, started_at, ended_at, status, output_summary FROM commands WHERE story_id = ?1 ORDER BY id",
        )?;
        let commands = stmt
            .query_map(params![story_id], row_to_command)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(commands)
    }

    /// True iff the three most recently-created commands of `story_id` all
    /// have status `failed`. Fewer than three commands always returns false.
    pub fn story_is_blocked(&self, story_id: i64) -> StoreResult<bool> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT status FROM commands WHERE story_id = ?1 ORDER BY id DESC LIMIT 3",
        )?;
        let statuses: Vec<String> = stmt
            .query_map(params![story_id], |r| r.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        if statuses.len() < 3 {
            return Ok(false);
        }
        Ok(statuses.iter().all(|s| s == "failed"))
    }

    // --------------------------------------------------------------- Events

    #[allow(clippy::too_many_arguments)]
    pub fn create_event(
        &self,
        batch_id: i64,
        story_id: Option<i64>,
        command_id: Option<i64>,
        timestamp: i64,
        event_type: &str,
        epic_id: Option<&str>,
        story_key: Option<&str>,
        command: Option<&str>,
        task_id: Option<&str>,
        status: Option<&str>,
        message: Option<&str>,
        payload_json: Option<&str>,
    ) -> StoreResult<Event> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO events (batch_id, story_id, command_id, timestamp, event_type, epic_id, story_key, command, task_id, status, message, payload_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![batch_id, story_id, command_id, timestamp, event_type, epic_id, story_key, command, task_id, status, message, payload_json],
        )?;
        let id = conn.last_insert_rowid();
        conn.query_row(
            "SELECT id, batch_id, story_id, command_id, timestamp, event_type, epic_id, story_key, command, task_id, status, message, payload_json FROM events WHERE id = ?1",
            params![id],
            row_to_event,
        )
        .map_err(StoreError::from)
    }

    pub fn list_events(&self, batch_id: i64, limit: i64, offset: i64) -> StoreResult<Vec<Event>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, batch_id, story_id, command_id, timestamp, event_type, epic_id, story_key, command, task_id, status, message, payload_json
             FROM events WHERE batch_id = ?1 ORDER BY id LIMIT ?2 OFFSET ?3",
        )?;
        let events = stmt
            .query_map(params![batch_id, limit, offset], row_to_event)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(events)
    }

    /// Up to `limit` most recent events of `batch_id`, newest-first, for the
    /// websocket `init` handshake.
    pub fn recent_events(&self, batch_id: i64, limit: i64) -> StoreResult<Vec<Event>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, batch_id, story_id, command_id, timestamp, event_type, epic_id, story_key, command, task_id, status, message, payload_json
             FROM events WHERE batch_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let events = stmt
            .query_map(params![batch_id, limit], row_to_event)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(events)
    }

    // --------------------------------------------------------- BackgroundTask

    pub fn create_background_task(
        &self,
        batch_id: i64,
        story_key: &str,
        task_type: &str,
        spawned_at: i64,
    ) -> StoreResult<BackgroundTask> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO background_tasks (batch_id, story_key, task_type, spawned_at, status) VALUES (?1, ?2, ?3, ?4, 'running')",
            params![batch_id, story_key, task_type, spawned_at],
        )?;
        let id = conn.last_insert_rowid();
        drop(conn);
        self.get_background_task(id)
    }

    pub fn get_background_task(&self, id: i64) -> StoreResult<BackgroundTask> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, batch_id, story_key, task_type, spawned_at, completed_at, status FROM background_tasks WHERE id = ?1",
            params![id],
            row_to_background_task,
        )
        .map_err(|_| StoreError::NotFound { entity: "background_task", id })
    }

    pub fn update_background_task(&self, id: i64, fields: &Value) -> StoreResult<BackgroundTask> {
        self.update_entity("background_task", "background_tasks", BACKGROUND_TASK_FIELDS, id, fields)?;
        self.get_background_task(id)
    }

    pub fn pending_background(&self, batch_id: i64) -> StoreResult<Vec<BackgroundTask>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, batch_id, story_key, task_type, spawned_at, completed_at, status FROM background_tasks WHERE batch_id = ?1 AND status = 'running' ORDER BY id",
        )?;
        let tasks = stmt
            .query_map(params![batch_id], row_to_background_task)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    // ------------------------------------------------------------- internal

    fn update_entity(
        &self,
        entity: &'static str,
        table: &'static str,
        whitelist: &[&str],
        id: i64,
        fields: &Value,
    ) -> StoreResult<()> {
        let object = fields.as_object().cloned().unwrap_or_default();
        for key in object.keys() {
            if !whitelist.contains(&key.as_str()) {
                return Err(StoreError::UnknownField {
                    entity,
                    field: key.clone(),
                });
            }
        }
        if object.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        for (key, value) in object.iter() {
            let sql = format!("UPDATE {table} SET {key} = ?1 WHERE id = ?2");
            tx.execute(&sql, params![json_to_sql(value), id])?;
        }
        tx.commit()?;
        Ok(())
    }
}

fn json_to_sql(value: &Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as SqlValue;
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(*b as i64),
        Value::Number(n) => n
            .as_i64()
            .map(SqlValue::Integer)
            .or_else(|| n.as_f64().map(SqlValue::Real))
            .unwrap_or(SqlValue::Null),
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn row_to_batch(row: &rusqlite::Row) -> rusqlite::Result<Batch> {
    Ok(Batch {
        id: row.get(0)?,
        started_at: row.get(1)?,
        ended_at: row.get(2)?,
        max_cycles: row.get(3)?,
        cycles_completed: row.get(4)?,
        status: row.get(5)?,
    })
}

fn row_to_story(row: &rusqlite::Row) -> rusqlite::Result<Story> {
    Ok(Story {
        id: row.get(0)?,
        batch_id: row.get(1)?,
        story_key: row.get(2)?,
        epic_id: row.get(3)?,
        status: row.get(4)?,
        started_at: row.get(5)?,
        ended_at: row.get(6)?,
    })
}

fn row_to_command(row: &rusqlite::Row) -> rusqlite::Result<Command> {
    Ok(Command {
        id: row.get(0)?,
        story_id: row.get(1)?,
        command: row.get(2)?,
        task_id: row.get(3)?,
        started_at: row.get(4)?,
        ended_at: row.get(5)?,
        status: row.get(6)?,
        output_summary: row.get(7)?,
    })
}

fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<Event> {
    Ok(Event {
        id: row.get(0)?,
        batch_id: row.get(1)?,
        story_id: row.get(2)?,
        command_id: row.get(3)?,
        timestamp: row.get(4)?,
        event_type: row.get(5)?,
        epic_id: row.get(6)?,
        story_key: row.get(7)?,
        command: row.get(8)?,
        task_id: row.get(9)?,
        status: row.get(10)?,
        message: row.get(11)?,
        payload_json: row.get(12)?,
    })
}

fn row_to_background_task(row: &rusqlite::Row) -> rusqlite::Result<BackgroundTask> {
    Ok(BackgroundTask {
        id: row.get(0)?,
        batch_id: row.get(1)?,
        story_key: row.get(2)?,
        task_type: row.get(3)?,
        spawned_at: row.get(4)?,
        completed_at: row.get(5)?,
        status: row.get(6)?,
    })
}

fn migrate(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);

         CREATE TABLE IF NOT EXISTS batches (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             started_at INTEGER NOT NULL,
             ended_at INTEGER,
             max_cycles INTEGER NOT NULL,
             cycles_completed INTEGER NOT NULL DEFAULT 0,
             status TEXT NOT NULL
         );

         CREATE TABLE IF NOT EXISTS stories (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             batch_id INTEGER NOT NULL REFERENCES batches(id) ON DELETE CASCADE,
             story_key TEXT NOT NULL,
             epic_id TEXT NOT NULL,
             status TEXT NOT NULL,
             started_at INTEGER NOT NULL,
             ended_at INTEGER,
             UNIQUE(batch_id, story_key)
         );

         CREATE TABLE IF NOT EXISTS commands (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             story_id INTEGER NOT NULL REFERENCES stories(id) ON DELETE CASCADE,
             command TEXT NOT NULL,
             task_id TEXT NOT NULL,
             started_at INTEGER NOT NULL,
             ended_at INTEGER,
             status TEXT NOT NULL,
             output_summary TEXT
         );

         CREATE TABLE IF NOT EXISTS events (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             batch_id INTEGER NOT NULL,
             story_id INTEGER,
             command_id INTEGER,
             timestamp INTEGER NOT NULL,
             event_type TEXT NOT NULL,
             epic_id TEXT,
             story_key TEXT,
             command TEXT,
             task_id TEXT,
             status TEXT,
             message TEXT,
             payload_json TEXT
         );

         CREATE TABLE IF NOT EXISTS background_tasks (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             batch_id INTEGER NOT NULL,
             story_key TEXT NOT NULL,
             task_type TEXT NOT NULL,
             spawned_at INTEGER NOT NULL,
             completed_at INTEGER,
             status TEXT NOT NULL
         );",
    )?;

    ensure_column(conn, "events", "payload_json", "TEXT")?;

    let current: Option<i64> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |r| r.get(0))
        .optional()?;
    match current {
        None => {
            conn.execute("INSERT INTO schema_version (version) VALUES (?1)", params![SCHEMA_VERSION])?;
        }
        Some(v) if v < SCHEMA_VERSION => {
            conn.execute("UPDATE schema_version SET version = ?1", params![SCHEMA_VERSION])?;
        }
        _ => {}
    }
    Ok(())
}

/// Adds `column` to `table` if it doesn't already exist. Used to keep schema
/// creation idempotent across versions without a full migration framework.
fn ensure_column(conn: &Connection, table: &str, column: &str, decl: &str) -> StoreResult<()> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let existing: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    if !existing.iter().any(|c| c == column) {
        conn.execute(&format!("ALTER TABLE {table} ADD COLUMN {column} {decl}"), [])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn migration_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");
        let store = StateStore::open(&path).unwrap();
        store.create_batch(0, 2).unwrap();
        drop(store);
        let reopened = StateStore::open(&path).unwrap();
        assert!(reopened.active_batch().unwrap().is_some());
    }

    #[test]
    fn story_is_blocked_requires_three_consecutive_failures() {
        let store = StateStore::open_in_memory().unwrap();
        let batch = store.create_batch(0, 2).unwrap();
        let story = store.create_story(batch.id, "1-1", "1", 0).unwrap();
        for _ in 0..2 {
            let cmd = store.create_command(story.id, "sprint-dev-story", "t", 0).unwrap();
            store.update_command(cmd.id, &json!({"status": "failed"})).unwrap();
        }
        assert!(!store.story_is_blocked(story.id).unwrap());

        let cmd = store.create_command(story.id, "sprint-dev-story", "t", 0).unwrap();
        store.update_command(cmd.id, &json!({"status": "failed"})).unwrap();
        assert!(store.story_is_blocked(story.id).unwrap());
    }

    #[test]
    fn story_is_blocked_resets_on_intermediate_success() {
        let store = StateStore::open_in_memory().unwrap();
        let batch = store.create_batch(0, 2).unwrap();
        let story = store.create_story(batch.id, "1-1", "1", 0).unwrap();
        for status in ["failed", "failed", "completed", "failed", "failed"] {
            let cmd = store.create_command(story.id, "sprint-dev-story", "t", 0).unwrap();
            store.update_command(cmd.id, &json!({"status": status})).unwrap();
        }
        assert!(!store.story_is_blocked(story.id).unwrap());
    }

    #[test]
    fn update_rejects_unknown_field() {
        let store = StateStore::open_in_memory().unwrap();
        let batch = store.create_batch(0, 2).unwrap();
        let err = store.update_batch(batch.id, &json!({"started_at": 5})).unwrap_err();
        assert!(matches!(err, StoreError::UnknownField { .. }));
    }

    #[test]
    fn update_story_rejects_unknown_status() {
        let store = StateStore::open_in_memory().unwrap();
        let batch = store.create_batch(0, 2).unwrap();
        let story = store.create_story(batch.id, "1-1", "1", 0).unwrap();
        let err = store.update_story(story.id, &json!({"status": "not-a-status"}), 0).unwrap_err();
        assert!(matches!(err, StoreError::InvalidStatus { .. }));
    }

    #[test]
    fn terminal_status_sets_ended_at() {
        let store = StateStore::open_in_memory().unwrap();
        let batch = store.create_batch(0, 2).unwrap();
        let story = store.create_story(batch.id, "1-1", "1", 0).unwrap();
        let updated = store.update_story(story.id, &json!({"status": "done"}), 1234).unwrap();
        assert_eq!(updated.ended_at, Some(1234));
    }

    #[test]
    fn foreign_key_cascade_deletes_commands_with_story() {
        let store = StateStore::open_in_memory().unwrap();
        let batch = store.create_batch(0, 2).unwrap();
        let story = store.create_story(batch.id, "1-1", "1", 0).unwrap();
        store.create_command(story.id, "sprint-dev-story", "t", 0).unwrap();
        {
            let conn = store.conn.lock().unwrap();
            conn.execute("DELETE FROM stories WHERE id = ?1", params![story.id]).unwrap();
        }
        assert!(store.commands_of_story(story.id).unwrap().is_empty());
    }

    #[test]
    fn at_most_one_running_batch_enforced_by_caller_via_active_batch() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.active_batch().unwrap().is_none());
        let batch = store.create_batch(0, 2).unwrap();
        assert_eq!(store.active_batch().unwrap().unwrap().id, batch.id);
    }

    #[test]
    fn finalize_stale_running_batches_marks_them_stopped() {
        let store = StateStore::open_in_memory().unwrap();
        let batch = store.create_batch(0, 2).unwrap();
        let finalized = store.finalize_stale_running_batches(999).unwrap();
        assert_eq!(finalized, vec![batch.id]);
        assert_eq!(store.get_batch(batch.id).unwrap().status, "stopped");
    }
}
