//! SQLite schema for the metadata store.
//!
//! The ownership chain User → Project → Group → Run is a strict forest
//! enforced by foreign keys with ON DELETE CASCADE. The run lifecycle
//! invariants (status/end_time/exit_code equivalences, exit code range,
//! closed status sets) live in CHECK constraints so a buggy writer cannot
//! persist an inconsistent row.

use rusqlite::Connection;

use rt_domain::error::{Error, Result};

// Schema version (increment when changing table definitions).
pub const SCHEMA_VERSION: i32 = 2;

pub fn init_schema(conn: &Connection) -> Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(|e| Error::Storage(e.to_string()))?;

    conn.execute_batch(
        r#"
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS users (
            id            TEXT PRIMARY KEY,
            username      TEXT NOT NULL UNIQUE
                          CHECK (length(username) BETWEEN 3 AND 50),
            password_hash TEXT NOT NULL,
            is_admin      INTEGER NOT NULL DEFAULT 0,
            created_at    TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS api_tokens (
            id         TEXT PRIMARY KEY,
            user_id    TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            token_hash TEXT NOT NULL UNIQUE,
            name       TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS projects (
            id         TEXT PRIMARY KEY,
            user_id    TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            name       TEXT NOT NULL CHECK (length(name) BETWEEN 1 AND 255),
            created_at TEXT NOT NULL,
            UNIQUE (user_id, name)
        );

        CREATE TABLE IF NOT EXISTS groups (
            id         TEXT PRIMARY KEY,
            project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
            name       TEXT NOT NULL CHECK (length(name) BETWEEN 1 AND 255),
            created_at TEXT NOT NULL,
            UNIQUE (project_id, name)
        );

        CREATE TABLE IF NOT EXISTS runs (
            id         TEXT PRIMARY KEY,
            group_id   TEXT NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
            start_time TEXT NOT NULL,
            end_time   TEXT,
            status     TEXT NOT NULL
                       CHECK (status IN ('running','completed','failed','aborted')),
            exit_code  INTEGER CHECK (exit_code BETWEEN -128 AND 255),
            ai_status  TEXT NOT NULL
                       CHECK (ai_status IN ('none','pending','processing','completed','failed')),
            ai_report  TEXT,
            updated_at TEXT NOT NULL,
            CHECK (end_time IS NULL OR end_time >= start_time),
            CHECK (
                (status = 'running'   AND end_time IS NULL     AND exit_code IS NULL)
             OR (status = 'completed' AND end_time IS NOT NULL AND exit_code = 0)
             OR (status = 'failed'    AND end_time IS NOT NULL AND exit_code <> 0)
             OR (status = 'aborted'   AND end_time IS NOT NULL AND exit_code IS NULL)
            )
        );

        CREATE TABLE IF NOT EXISTS user_settings (
            user_id              TEXT PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
            ai_enabled           INTEGER NOT NULL,
            ai_base_url          TEXT NOT NULL,
            ai_api_key           TEXT,
            ai_model             TEXT NOT NULL,
            ai_max_tokens        INTEGER NOT NULL,
            ai_auto_analyze      INTEGER NOT NULL,
            ai_max_log_lines     INTEGER NOT NULL,
            ai_truncate_strategy TEXT NOT NULL
                                 CHECK (ai_truncate_strategy IN ('head','tail','smart')),
            ai_system_prompt     TEXT NOT NULL,
            ai_max_concurrent    INTEGER NOT NULL
                                 CHECK (ai_max_concurrent BETWEEN 1 AND 10)
        );

        CREATE TABLE IF NOT EXISTS project_settings (
            project_id           TEXT PRIMARY KEY REFERENCES projects(id) ON DELETE CASCADE,
            ai_enabled           INTEGER,
            ai_base_url          TEXT,
            ai_api_key           TEXT,
            ai_model             TEXT,
            ai_max_tokens        INTEGER,
            ai_auto_analyze     INTEGER,
            ai_max_log_lines     INTEGER,
            ai_truncate_strategy TEXT
                                 CHECK (ai_truncate_strategy IS NULL
                                        OR ai_truncate_strategy IN ('head','tail','smart')),
            ai_system_prompt     TEXT,
            ai_max_concurrent    INTEGER
                                 CHECK (ai_max_concurrent IS NULL
                                        OR ai_max_concurrent BETWEEN 1 AND 10)
        );

        CREATE INDEX IF NOT EXISTS idx_tokens_hash     ON api_tokens(token_hash);
        CREATE INDEX IF NOT EXISTS idx_projects_user   ON projects(user_id);
        CREATE INDEX IF NOT EXISTS idx_groups_project  ON groups(project_id);
        CREATE INDEX IF NOT EXISTS idx_runs_group      ON runs(group_id);
        CREATE INDEX IF NOT EXISTS idx_runs_status     ON runs(status);
        CREATE INDEX IF NOT EXISTS idx_runs_ai_status  ON runs(ai_status);
        "#,
    )
    .map_err(|e| Error::Storage(e.to_string()))?;

    // Version-1 deployments predate the 'none' AI status; coerce the
    // value those rows carried for "no analysis yet".
    if current_version == 1 {
        conn.execute(
            "UPDATE runs SET ai_status = 'pending'
             WHERE ai_status IS NULL OR ai_status = ''",
            [],
        )
        .map_err(|e| Error::Storage(e.to_string()))?;
    }

    conn.execute(&format!("PRAGMA user_version = {SCHEMA_VERSION}"), [])
        .map_err(|e| Error::Storage(e.to_string()))?;

    Ok(())
}
