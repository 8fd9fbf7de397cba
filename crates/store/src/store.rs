//! The metadata store.
//!
//! One mutex-guarded connection; every operation is a short transaction
//! (or a single statement, which SQLite wraps implicitly). Timestamps are
//! persisted as fixed-width UTC text so lexicographic order equals
//! chronological order, which the schema's `end_time >= start_time` CHECK
//! relies on.

use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::RngCore;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use rt_domain::error::{Error, Result};
use rt_domain::run::{
    AiStatus, Credential, Group, Project, Run, RunDetail, RunStatus, StatusStatistics, User,
};
use rt_domain::settings::{EffectiveSettings, ProjectSettings, TruncateStrategy, UserSettings};
use rt_domain::validate::{validate_exit_code, validate_name, validate_username};

use crate::schema::init_schema;

const TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

fn ts_to_sql(t: DateTime<Utc>) -> String {
    t.format(TS_FORMAT).to_string()
}

fn ts_from_sql(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Storage(format!("bad timestamp {s:?}: {e}")))
}

fn uuid_from_sql(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| Error::Storage(format!("bad uuid {s:?}: {e}")))
}

fn db_err(e: rusqlite::Error) -> Error {
    Error::Storage(e.to_string())
}

/// Raw run columns as read from SQLite, parsed into a [`Run`] outside the
/// row-mapping closure.
struct RunRow {
    id: String,
    group_id: String,
    start_time: String,
    end_time: Option<String>,
    status: String,
    exit_code: Option<i32>,
    ai_status: String,
    ai_report: Option<String>,
    updated_at: String,
}

const RUN_COLUMNS: &str =
    "id, group_id, start_time, end_time, status, exit_code, ai_status, ai_report, updated_at";

impl RunRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            group_id: row.get(1)?,
            start_time: row.get(2)?,
            end_time: row.get(3)?,
            status: row.get(4)?,
            exit_code: row.get(5)?,
            ai_status: row.get(6)?,
            ai_report: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    fn into_run(self) -> Result<Run> {
        Ok(Run {
            id: uuid_from_sql(&self.id)?,
            group_id: uuid_from_sql(&self.group_id)?,
            start_time: ts_from_sql(&self.start_time)?,
            end_time: self.end_time.as_deref().map(ts_from_sql).transpose()?,
            status: RunStatus::parse(&self.status)
                .ok_or_else(|| Error::Storage(format!("bad run status {:?}", self.status)))?,
            exit_code: self.exit_code,
            ai_status: AiStatus::parse(&self.ai_status)
                .ok_or_else(|| Error::Storage(format!("bad ai status {:?}", self.ai_status)))?,
            ai_report: self.ai_report,
            updated_at: ts_from_sql(&self.updated_at)?,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct MetadataStore {
    conn: Mutex<Connection>,
}

impl MetadataStore {
    /// Open (or create) the database at `db_path` and apply the schema.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path).map_err(db_err)?;
        init_schema(&conn)?;
        tracing::info!(path = %db_path.display(), "metadata store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // ── Users & credentials ─────────────────────────────────────────

    /// Create a user and seed its default settings row.
    pub fn create_user(
        &self,
        username: &str,
        password_hash: &str,
        is_admin: bool,
    ) -> Result<User> {
        validate_username(username)?;

        let user = User {
            id: Uuid::new_v4(),
            username: username.to_owned(),
            password_hash: password_hash.to_owned(),
            is_admin,
            created_at: Utc::now(),
        };

        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        tx.execute(
            "INSERT INTO users (id, username, password_hash, is_admin, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user.id.to_string(),
                user.username,
                user.password_hash,
                user.is_admin,
                ts_to_sql(user.created_at),
            ],
        )
        .map_err(db_err)?;

        let defaults = UserSettings::defaults_for(user.id);
        Self::write_user_settings(&tx, &defaults)?;
        tx.commit().map_err(db_err)?;

        tracing::info!(user_id = %user.id, username = %user.username, "user created");
        Ok(user)
    }

    /// Mint an API token. Returns the credential row and the raw token
    /// value; the raw value is never persisted and cannot be recovered.
    pub fn create_token(&self, user_id: Uuid, name: &str) -> Result<(Credential, String)> {
        let mut material = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut material);
        let raw = hex::encode(material);
        let token_hash = hex::encode(Sha256::digest(raw.as_bytes()));

        let cred = Credential {
            id: Uuid::new_v4(),
            user_id,
            token_hash,
            name: name.to_owned(),
            created_at: Utc::now(),
        };

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO api_tokens (id, user_id, token_hash, name, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                cred.id.to_string(),
                cred.user_id.to_string(),
                cred.token_hash,
                cred.name,
                ts_to_sql(cred.created_at),
            ],
        )
        .map_err(db_err)?;

        Ok((cred, raw))
    }

    /// Resolve a presented token to its owning user.
    ///
    /// The presented value is digested and looked up by digest; the stored
    /// digest is re-compared in constant time. Every failure mode returns
    /// the same opaque [`Error::Auth`] so callers cannot enumerate users
    /// or tokens.
    pub fn authenticate_token(&self, raw: &str) -> Result<Uuid> {
        let presented = hex::encode(Sha256::digest(raw.as_bytes()));

        let conn = self.conn.lock();
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT token_hash, user_id FROM api_tokens WHERE token_hash = ?1",
                [&presented],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|_| Error::Auth)?;

        let (stored, user_id) = row.ok_or(Error::Auth)?;
        if !bool::from(stored.as_bytes().ct_eq(presented.as_bytes())) {
            return Err(Error::Auth);
        }
        uuid_from_sql(&user_id).map_err(|_| Error::Auth)
    }

    // ── Projects & groups ───────────────────────────────────────────

    /// Idempotent upsert keyed on `(user_id, name)`.
    pub fn get_or_create_project(&self, user_id: Uuid, name: &str) -> Result<Project> {
        validate_name("project", name)?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        tx.execute(
            "INSERT INTO projects (id, user_id, name, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (user_id, name) DO NOTHING",
            params![
                Uuid::new_v4().to_string(),
                user_id.to_string(),
                name,
                ts_to_sql(Utc::now()),
            ],
        )
        .map_err(db_err)?;

        let (id, created_at): (String, String) = tx
            .query_row(
                "SELECT id, created_at FROM projects WHERE user_id = ?1 AND name = ?2",
                params![user_id.to_string(), name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(db_err)?;
        tx.commit().map_err(db_err)?;

        Ok(Project {
            id: uuid_from_sql(&id)?,
            user_id,
            name: name.to_owned(),
            created_at: ts_from_sql(&created_at)?,
        })
    }

    /// Idempotent upsert keyed on `(project_id, name)`.
    pub fn get_or_create_group(&self, project_id: Uuid, name: &str) -> Result<Group> {
        validate_name("group", name)?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        tx.execute(
            "INSERT INTO groups (id, project_id, name, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (project_id, name) DO NOTHING",
            params![
                Uuid::new_v4().to_string(),
                project_id.to_string(),
                name,
                ts_to_sql(Utc::now()),
            ],
        )
        .map_err(db_err)?;

        let (id, created_at): (String, String) = tx
            .query_row(
                "SELECT id, created_at FROM groups WHERE project_id = ?1 AND name = ?2",
                params![project_id.to_string(), name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(db_err)?;
        tx.commit().map_err(db_err)?;

        Ok(Group {
            id: uuid_from_sql(&id)?,
            project_id,
            name: name.to_owned(),
            created_at: ts_from_sql(&created_at)?,
        })
    }

    // ── Runs ────────────────────────────────────────────────────────

    pub fn create_run(&self, group_id: Uuid, initial_ai_status: AiStatus) -> Result<Run> {
        let now = Utc::now();
        let run = Run {
            id: Uuid::new_v4(),
            group_id,
            start_time: now,
            end_time: None,
            status: RunStatus::Running,
            exit_code: None,
            ai_status: initial_ai_status,
            ai_report: None,
            updated_at: now,
        };

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO runs (id, group_id, start_time, end_time, status, exit_code,
                               ai_status, ai_report, updated_at)
             VALUES (?1, ?2, ?3, NULL, 'running', NULL, ?4, NULL, ?5)",
            params![
                run.id.to_string(),
                run.group_id.to_string(),
                ts_to_sql(run.start_time),
                run.ai_status.as_str(),
                ts_to_sql(run.updated_at),
            ],
        )
        .map_err(db_err)?;

        Ok(run)
    }

    /// Drive a running run to a terminal state. Rejects when the run is
    /// not currently `running`; the row keeps its prior state.
    pub fn finalize_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        exit_code: Option<i32>,
    ) -> Result<Run> {
        match (status, exit_code) {
            (RunStatus::Completed, Some(0)) => {}
            (RunStatus::Failed, Some(c)) if c != 0 => validate_exit_code(c)?,
            (RunStatus::Aborted, None) => {}
            _ => {
                return Err(Error::InvalidInput(format!(
                    "status {} is inconsistent with exit code {exit_code:?}",
                    status.as_str()
                )))
            }
        }

        let now = Utc::now();
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;

        let changed = tx
            .execute(
                "UPDATE runs
                 SET status = ?2, exit_code = ?3, end_time = ?4, updated_at = ?4
                 WHERE id = ?1 AND status = 'running'",
                params![run_id.to_string(), status.as_str(), exit_code, ts_to_sql(now)],
            )
            .map_err(db_err)?;

        if changed == 0 {
            // Distinguish a missing run from a double finalize.
            let current: Option<String> = tx
                .query_row(
                    "SELECT status FROM runs WHERE id = ?1",
                    [run_id.to_string()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db_err)?;
            return Err(match current {
                None => Error::NotFound(format!("run {run_id}")),
                Some(s) => Error::Transition(format!(
                    "cannot finalize run {run_id}: status is {s}, not running"
                )),
            });
        }

        let row = tx
            .query_row(
                &format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?1"),
                [run_id.to_string()],
                RunRow::from_row,
            )
            .map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        row.into_run()
    }

    /// Advance `ai_status`, enforcing the monotonic lifecycle.
    pub fn set_ai_status(&self, run_id: Uuid, next: AiStatus) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        Self::transition_ai_status(&tx, run_id, next, None)?;
        tx.commit().map_err(db_err)
    }

    /// Persist the analysis report together with its terminal status.
    pub fn set_ai_report(&self, run_id: Uuid, report: &str, next: AiStatus) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        Self::transition_ai_status(&tx, run_id, next, Some(report))?;
        tx.commit().map_err(db_err)
    }

    fn transition_ai_status(
        tx: &rusqlite::Transaction<'_>,
        run_id: Uuid,
        next: AiStatus,
        report: Option<&str>,
    ) -> Result<()> {
        let current: Option<String> = tx
            .query_row(
                "SELECT ai_status FROM runs WHERE id = ?1",
                [run_id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;

        let current = current.ok_or_else(|| Error::NotFound(format!("run {run_id}")))?;
        let current = AiStatus::parse(&current)
            .ok_or_else(|| Error::Storage(format!("bad ai status {current:?}")))?;

        if !current.can_transition_to(next) {
            return Err(Error::Transition(format!(
                "ai_status {} -> {} rejected for run {run_id}",
                current.as_str(),
                next.as_str()
            )));
        }

        match report {
            Some(report) => tx.execute(
                "UPDATE runs SET ai_status = ?2, ai_report = ?3, updated_at = ?4 WHERE id = ?1",
                params![
                    run_id.to_string(),
                    next.as_str(),
                    report,
                    ts_to_sql(Utc::now())
                ],
            ),
            None => tx.execute(
                "UPDATE runs SET ai_status = ?2, updated_at = ?3 WHERE id = ?1",
                params![run_id.to_string(), next.as_str(), ts_to_sql(Utc::now())],
            ),
        }
        .map_err(db_err)?;
        Ok(())
    }

    /// Load a run joined with its ownership chain.
    pub fn get_run(&self, run_id: Uuid) -> Result<RunDetail> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT r.id, r.group_id, r.start_time, r.end_time, r.status, r.exit_code,
                        r.ai_status, r.ai_report, r.updated_at,
                        g.name, p.id, p.name, p.user_id
                 FROM runs r
                 JOIN groups g   ON g.id = r.group_id
                 JOIN projects p ON p.id = g.project_id
                 WHERE r.id = ?1",
                [run_id.to_string()],
                |row| {
                    Ok((
                        RunRow::from_row(row)?,
                        row.get::<_, String>(9)?,
                        row.get::<_, String>(10)?,
                        row.get::<_, String>(11)?,
                        row.get::<_, String>(12)?,
                    ))
                },
            )
            .optional()
            .map_err(db_err)?;

        let (run_row, group_name, project_id, project_name, user_id) =
            row.ok_or_else(|| Error::NotFound(format!("run {run_id}")))?;

        Ok(RunDetail {
            run: run_row.into_run()?,
            group_name,
            project_id: uuid_from_sql(&project_id)?,
            project_name,
            user_id: uuid_from_sql(&user_id)?,
        })
    }

    /// The user owning the project a run belongs to.
    pub fn run_owner(&self, run_id: Uuid) -> Result<Uuid> {
        let conn = self.conn.lock();
        let user_id: Option<String> = conn
            .query_row(
                "SELECT p.user_id
                 FROM runs r
                 JOIN groups g   ON g.id = r.group_id
                 JOIN projects p ON p.id = g.project_id
                 WHERE r.id = ?1",
                [run_id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        let user_id = user_id.ok_or_else(|| Error::NotFound(format!("run {run_id}")))?;
        uuid_from_sql(&user_id)
    }

    // ── Settings ────────────────────────────────────────────────────

    pub fn upsert_user_settings(&self, settings: &UserSettings) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        Self::write_user_settings(&tx, settings)?;
        tx.commit().map_err(db_err)
    }

    fn write_user_settings(tx: &rusqlite::Transaction<'_>, s: &UserSettings) -> Result<()> {
        tx.execute(
            "INSERT INTO user_settings
                 (user_id, ai_enabled, ai_base_url, ai_api_key, ai_model, ai_max_tokens,
                  ai_auto_analyze, ai_max_log_lines, ai_truncate_strategy,
                  ai_system_prompt, ai_max_concurrent)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT (user_id) DO UPDATE SET
                 ai_enabled = ?2, ai_base_url = ?3, ai_api_key = ?4, ai_model = ?5,
                 ai_max_tokens = ?6, ai_auto_analyze = ?7, ai_max_log_lines = ?8,
                 ai_truncate_strategy = ?9, ai_system_prompt = ?10, ai_max_concurrent = ?11",
            params![
                s.user_id.to_string(),
                s.ai_enabled,
                s.ai_base_url,
                s.ai_api_key,
                s.ai_model,
                s.ai_max_tokens,
                s.ai_auto_analyze,
                s.ai_max_log_lines as i64,
                s.ai_truncate_strategy.as_str(),
                s.ai_system_prompt,
                s.ai_max_concurrent,
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub fn get_user_settings(&self, user_id: Uuid) -> Result<UserSettings> {
        let conn = self.conn.lock();
        Self::read_user_settings(&conn, user_id)
    }

    fn read_user_settings(conn: &Connection, user_id: Uuid) -> Result<UserSettings> {
        let row = conn
            .query_row(
                "SELECT ai_enabled, ai_base_url, ai_api_key, ai_model, ai_max_tokens,
                        ai_auto_analyze, ai_max_log_lines, ai_truncate_strategy,
                        ai_system_prompt, ai_max_concurrent
                 FROM user_settings WHERE user_id = ?1",
                [user_id.to_string()],
                |row| {
                    Ok(UserSettings {
                        user_id,
                        ai_enabled: row.get(0)?,
                        ai_base_url: row.get(1)?,
                        ai_api_key: row.get(2)?,
                        ai_model: row.get(3)?,
                        ai_max_tokens: row.get(4)?,
                        ai_auto_analyze: row.get(5)?,
                        ai_max_log_lines: row.get::<_, i64>(6)? as usize,
                        ai_truncate_strategy: TruncateStrategy::parse_or_tail(
                            &row.get::<_, String>(7)?,
                        ),
                        ai_system_prompt: row.get(8)?,
                        ai_max_concurrent: row.get(9)?,
                    })
                },
            )
            .optional()
            .map_err(db_err)?;
        row.ok_or_else(|| Error::NotFound(format!("settings for user {user_id}")))
    }

    pub fn upsert_project_settings(&self, settings: &ProjectSettings) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO project_settings
                 (project_id, ai_enabled, ai_base_url, ai_api_key, ai_model, ai_max_tokens,
                  ai_auto_analyze, ai_max_log_lines, ai_truncate_strategy,
                  ai_system_prompt, ai_max_concurrent)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT (project_id) DO UPDATE SET
                 ai_enabled = ?2, ai_base_url = ?3, ai_api_key = ?4, ai_model = ?5,
                 ai_max_tokens = ?6, ai_auto_analyze = ?7, ai_max_log_lines = ?8,
                 ai_truncate_strategy = ?9, ai_system_prompt = ?10, ai_max_concurrent = ?11",
            params![
                settings.project_id.to_string(),
                settings.ai_enabled,
                settings.ai_base_url,
                settings.ai_api_key,
                settings.ai_model,
                settings.ai_max_tokens,
                settings.ai_auto_analyze,
                settings.ai_max_log_lines.map(|v| v as i64),
                settings.ai_truncate_strategy.map(|t| t.as_str()),
                settings.ai_system_prompt,
                settings.ai_max_concurrent,
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub fn get_project_settings(&self, project_id: Uuid) -> Result<Option<ProjectSettings>> {
        let conn = self.conn.lock();
        Self::read_project_settings(&conn, project_id)
    }

    fn read_project_settings(
        conn: &Connection,
        project_id: Uuid,
    ) -> Result<Option<ProjectSettings>> {
        conn.query_row(
            "SELECT ai_enabled, ai_base_url, ai_api_key, ai_model, ai_max_tokens,
                    ai_auto_analyze, ai_max_log_lines, ai_truncate_strategy,
                    ai_system_prompt, ai_max_concurrent
             FROM project_settings WHERE project_id = ?1",
            [project_id.to_string()],
            |row| {
                Ok(ProjectSettings {
                    project_id,
                    ai_enabled: row.get(0)?,
                    ai_base_url: row.get(1)?,
                    ai_api_key: row.get(2)?,
                    ai_model: row.get(3)?,
                    ai_max_tokens: row.get(4)?,
                    ai_auto_analyze: row.get(5)?,
                    ai_max_log_lines: row.get::<_, Option<i64>>(6)?.map(|v| v as usize),
                    ai_truncate_strategy: row
                        .get::<_, Option<String>>(7)?
                        .map(|s| TruncateStrategy::parse_or_tail(&s)),
                    ai_system_prompt: row.get(8)?,
                    ai_max_concurrent: row.get(9)?,
                })
            },
        )
        .optional()
        .map_err(db_err)
    }

    /// Overlay project settings (non-null fields) on the user defaults.
    /// Errors when the user has no settings row.
    pub fn resolve_effective_settings(
        &self,
        user_id: Uuid,
        project_id: Uuid,
    ) -> Result<EffectiveSettings> {
        let conn = self.conn.lock();
        let user = Self::read_user_settings(&conn, user_id)?;
        let project = Self::read_project_settings(&conn, project_id)?;
        Ok(EffectiveSettings::resolve(&user, project.as_ref()))
    }

    // ── Statistics ──────────────────────────────────────────────────

    /// Aggregate run counts by status and by AI status.
    pub fn stats(&self) -> Result<StatusStatistics> {
        let conn = self.conn.lock();
        let mut stats = StatusStatistics::default();

        let mut stmt = conn
            .prepare("SELECT status, COUNT(*) FROM runs GROUP BY status")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .map_err(db_err)?;
        for row in rows {
            let (status, count) = row.map_err(db_err)?;
            stats.total += count as u64;
            stats.by_status.insert(status, count as u64);
        }

        let mut stmt = conn
            .prepare("SELECT ai_status, COUNT(*) FROM runs GROUP BY ai_status")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .map_err(db_err)?;
        for row in rows {
            let (status, count) = row.map_err(db_err)?;
            stats.by_ai_status.insert(status, count as u64);
        }

        Ok(stats)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use rt_domain::settings::SettingsSource;

    fn store() -> MetadataStore {
        MetadataStore::open_in_memory().unwrap()
    }

    fn seeded_run(store: &MetadataStore, initial: AiStatus) -> (Uuid, Uuid, Run) {
        let user = store.create_user("alice", "pw-hash", false).unwrap();
        let project = store.get_or_create_project(user.id, "myapp").unwrap();
        let group = store.get_or_create_group(project.id, "build").unwrap();
        let run = store.create_run(group.id, initial).unwrap();
        (user.id, project.id, run)
    }

    #[test]
    fn create_user_seeds_default_settings() {
        let store = store();
        let user = store.create_user("alice", "pw", false).unwrap();
        let settings = store.get_user_settings(user.id).unwrap();
        assert!(!settings.ai_enabled);
        assert_eq!(settings.ai_max_concurrent, 3);
    }

    #[test]
    fn invalid_username_rejected() {
        let store = store();
        assert!(store.create_user("ab", "pw", false).is_err());
        assert!(store.create_user("has space", "pw", false).is_err());
    }

    #[test]
    fn duplicate_username_rejected() {
        let store = store();
        store.create_user("alice", "pw", false).unwrap();
        assert!(store.create_user("alice", "pw", false).is_err());
    }

    #[test]
    fn token_roundtrip_authenticates_owner() {
        let store = store();
        let user = store.create_user("alice", "pw", false).unwrap();
        let (_cred, raw) = store.create_token(user.id, "ci").unwrap();

        let resolved = store.authenticate_token(&raw).unwrap();
        assert_eq!(resolved, user.id);
    }

    #[test]
    fn bad_token_is_opaque_auth_error() {
        let store = store();
        let user = store.create_user("alice", "pw", false).unwrap();
        store.create_token(user.id, "ci").unwrap();

        let err = store.authenticate_token("not-a-token").unwrap_err();
        assert!(matches!(err, Error::Auth));
        assert_eq!(err.to_string(), "authentication failed");
    }

    #[test]
    fn raw_token_is_not_persisted() {
        let store = store();
        let user = store.create_user("alice", "pw", false).unwrap();
        let (cred, raw) = store.create_token(user.id, "ci").unwrap();
        assert_ne!(cred.token_hash, raw);
        assert_eq!(
            cred.token_hash,
            hex::encode(Sha256::digest(raw.as_bytes()))
        );
    }

    #[test]
    fn get_or_create_project_is_idempotent() {
        let store = store();
        let user = store.create_user("alice", "pw", false).unwrap();
        let a = store.get_or_create_project(user.id, "myapp").unwrap();
        let b = store.get_or_create_project(user.id, "myapp").unwrap();
        assert_eq!(a.id, b.id);

        // Case-sensitive: a different casing is a different project.
        let c = store.get_or_create_project(user.id, "MyApp").unwrap();
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn same_project_name_under_different_users() {
        let store = store();
        let u1 = store.create_user("alice", "pw", false).unwrap();
        let u2 = store.create_user("bob", "pw", false).unwrap();
        let p1 = store.get_or_create_project(u1.id, "myapp").unwrap();
        let p2 = store.get_or_create_project(u2.id, "myapp").unwrap();
        assert_ne!(p1.id, p2.id);
    }

    #[test]
    fn get_or_create_group_is_idempotent() {
        let store = store();
        let user = store.create_user("alice", "pw", false).unwrap();
        let project = store.get_or_create_project(user.id, "myapp").unwrap();
        let a = store.get_or_create_group(project.id, "build").unwrap();
        let b = store.get_or_create_group(project.id, "build").unwrap();
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn create_run_is_running_without_end_state() {
        let store = store();
        let (_, _, run) = seeded_run(&store, AiStatus::None);
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.end_time.is_none());
        assert!(run.exit_code.is_none());
        assert_eq!(run.ai_status, AiStatus::None);
    }

    #[test]
    fn finalize_completed_run() {
        let store = store();
        let (_, _, run) = seeded_run(&store, AiStatus::None);
        let finalized = store
            .finalize_run(run.id, RunStatus::Completed, Some(0))
            .unwrap();
        assert_eq!(finalized.status, RunStatus::Completed);
        assert_eq!(finalized.exit_code, Some(0));
        assert!(finalized.end_time.unwrap() >= finalized.start_time);
    }

    #[test]
    fn finalize_failed_run_keeps_exit_code() {
        let store = store();
        let (_, _, run) = seeded_run(&store, AiStatus::None);
        let finalized = store
            .finalize_run(run.id, RunStatus::Failed, Some(2))
            .unwrap();
        assert_eq!(finalized.status, RunStatus::Failed);
        assert_eq!(finalized.exit_code, Some(2));
    }

    #[test]
    fn finalize_aborted_run_has_no_exit_code() {
        let store = store();
        let (_, _, run) = seeded_run(&store, AiStatus::None);
        let finalized = store
            .finalize_run(run.id, RunStatus::Aborted, None)
            .unwrap();
        assert_eq!(finalized.status, RunStatus::Aborted);
        assert_eq!(finalized.exit_code, None);
        assert!(finalized.end_time.is_some());
    }

    #[test]
    fn finalize_rejects_inconsistent_exit_codes() {
        let store = store();
        let (_, _, run) = seeded_run(&store, AiStatus::None);
        assert!(store
            .finalize_run(run.id, RunStatus::Completed, Some(1))
            .is_err());
        assert!(store
            .finalize_run(run.id, RunStatus::Failed, Some(0))
            .is_err());
        assert!(store
            .finalize_run(run.id, RunStatus::Aborted, Some(1))
            .is_err());
        assert!(store
            .finalize_run(run.id, RunStatus::Running, None)
            .is_err());
        assert!(store
            .finalize_run(run.id, RunStatus::Failed, Some(300))
            .is_err());
    }

    #[test]
    fn double_finalize_is_rejected_and_state_kept() {
        let store = store();
        let (_, _, run) = seeded_run(&store, AiStatus::None);
        store
            .finalize_run(run.id, RunStatus::Completed, Some(0))
            .unwrap();

        let err = store
            .finalize_run(run.id, RunStatus::Failed, Some(2))
            .unwrap_err();
        assert!(matches!(err, Error::Transition(_)));

        let detail = store.get_run(run.id).unwrap();
        assert_eq!(detail.run.status, RunStatus::Completed);
        assert_eq!(detail.run.exit_code, Some(0));
    }

    #[test]
    fn finalize_missing_run_is_not_found() {
        let store = store();
        seeded_run(&store, AiStatus::None);
        let err = store
            .finalize_run(Uuid::new_v4(), RunStatus::Completed, Some(0))
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn ai_status_lifecycle() {
        let store = store();
        let (_, _, run) = seeded_run(&store, AiStatus::Pending);

        store.set_ai_status(run.id, AiStatus::Processing).unwrap();
        store
            .set_ai_report(run.id, "looks fine", AiStatus::Completed)
            .unwrap();

        let detail = store.get_run(run.id).unwrap();
        assert_eq!(detail.run.ai_status, AiStatus::Completed);
        assert_eq!(detail.run.ai_report.as_deref(), Some("looks fine"));
    }

    #[test]
    fn ai_status_rejects_skipping_processing() {
        let store = store();
        let (_, _, run) = seeded_run(&store, AiStatus::Pending);
        let err = store
            .set_ai_report(run.id, "report", AiStatus::Completed)
            .unwrap_err();
        assert!(matches!(err, Error::Transition(_)));
    }

    #[test]
    fn ai_status_allows_early_failure_from_pending() {
        let store = store();
        let (_, _, run) = seeded_run(&store, AiStatus::Pending);
        store
            .set_ai_report(run.id, "AI analysis is disabled", AiStatus::Failed)
            .unwrap();
        let detail = store.get_run(run.id).unwrap();
        assert_eq!(detail.run.ai_status, AiStatus::Failed);
    }

    #[test]
    fn reanalyze_reenters_processing_from_terminal() {
        let store = store();
        let (_, _, run) = seeded_run(&store, AiStatus::Pending);
        store.set_ai_status(run.id, AiStatus::Processing).unwrap();
        store
            .set_ai_report(run.id, "first", AiStatus::Completed)
            .unwrap();

        store.set_ai_status(run.id, AiStatus::Processing).unwrap();
        store
            .set_ai_report(run.id, "second", AiStatus::Failed)
            .unwrap();

        let detail = store.get_run(run.id).unwrap();
        assert_eq!(detail.run.ai_status, AiStatus::Failed);
        assert_eq!(detail.run.ai_report.as_deref(), Some("second"));
    }

    #[test]
    fn run_detail_carries_ownership_chain() {
        let store = store();
        let (user_id, project_id, run) = seeded_run(&store, AiStatus::None);
        let detail = store.get_run(run.id).unwrap();
        assert_eq!(detail.user_id, user_id);
        assert_eq!(detail.project_id, project_id);
        assert_eq!(detail.project_name, "myapp");
        assert_eq!(detail.group_name, "build");
    }

    #[test]
    fn run_owner_is_the_project_owner() {
        let store = store();
        let (user_id, _, run) = seeded_run(&store, AiStatus::None);
        assert_eq!(store.run_owner(run.id).unwrap(), user_id);

        let other = store.create_user("mallory", "pw", false).unwrap();
        assert_ne!(store.run_owner(run.id).unwrap(), other.id);
    }

    #[test]
    fn resolve_settings_overlays_project_fields() {
        // S6: user tail/500-token gpt-4o-mini, project gpt-4 + 200 lines.
        let store = store();
        let user = store.create_user("alice", "pw", false).unwrap();
        let project = store.get_or_create_project(user.id, "myapp").unwrap();

        let mut us = UserSettings::defaults_for(user.id);
        us.ai_model = "gpt-4o-mini".into();
        us.ai_max_tokens = 500;
        us.ai_truncate_strategy = TruncateStrategy::Tail;
        store.upsert_user_settings(&us).unwrap();

        store
            .upsert_project_settings(&ProjectSettings {
                project_id: project.id,
                ai_model: Some("gpt-4".into()),
                ai_max_log_lines: Some(200),
                ..Default::default()
            })
            .unwrap();

        let eff = store
            .resolve_effective_settings(user.id, project.id)
            .unwrap();
        assert_eq!(eff.ai_model, "gpt-4");
        assert_eq!(eff.ai_max_tokens, 500);
        assert_eq!(eff.ai_max_log_lines, 200);
        assert_eq!(eff.ai_truncate_strategy, TruncateStrategy::Tail);
        assert_eq!(eff.source, SettingsSource::Merged);
    }

    #[test]
    fn resolve_settings_without_project_row_is_user_sourced() {
        let store = store();
        let user = store.create_user("alice", "pw", false).unwrap();
        let project = store.get_or_create_project(user.id, "myapp").unwrap();
        let eff = store
            .resolve_effective_settings(user.id, project.id)
            .unwrap();
        assert_eq!(eff.source, SettingsSource::User);
    }

    #[test]
    fn resolve_settings_for_unknown_user_errors() {
        let store = store();
        let user = store.create_user("alice", "pw", false).unwrap();
        let project = store.get_or_create_project(user.id, "myapp").unwrap();
        assert!(store
            .resolve_effective_settings(Uuid::new_v4(), project.id)
            .is_err());
    }

    #[test]
    fn stats_counts_by_status_and_ai_status() {
        let store = store();
        let user = store.create_user("alice", "pw", false).unwrap();
        let project = store.get_or_create_project(user.id, "myapp").unwrap();
        let group = store.get_or_create_group(project.id, "build").unwrap();

        let r1 = store.create_run(group.id, AiStatus::Pending).unwrap();
        store
            .finalize_run(r1.id, RunStatus::Completed, Some(0))
            .unwrap();
        let r2 = store.create_run(group.id, AiStatus::None).unwrap();
        store.finalize_run(r2.id, RunStatus::Failed, Some(1)).unwrap();
        store.create_run(group.id, AiStatus::None).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_status.get("completed"), Some(&1));
        assert_eq!(stats.by_status.get("failed"), Some(&1));
        assert_eq!(stats.by_status.get("running"), Some(&1));
        assert_eq!(stats.by_ai_status.get("pending"), Some(&1));
        assert_eq!(stats.by_ai_status.get("none"), Some(&2));
    }

    #[test]
    fn open_on_disk_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.db");

        let run_id = {
            let store = MetadataStore::open(&path).unwrap();
            let (_, _, run) = seeded_run(&store, AiStatus::None);
            run.id
        };

        let store = MetadataStore::open(&path).unwrap();
        let detail = store.get_run(run_id).unwrap();
        assert_eq!(detail.run.status, RunStatus::Running);
    }
}
