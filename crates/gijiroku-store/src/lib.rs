//! SQLite-backed durable state for jobs and their stage outputs.
//!
//! All writes go through short transactions on a single connection; the
//! engine is the only writer for a claimed job, so contention is limited to
//! claim/cancel races which the `claimed` flag and the terminal-state guard
//! resolve. The store does not enforce stage ordering; the engine does.

use chrono::{DateTime, SecondsFormat, Utc};
use gijiroku_common::AppError;
use gijiroku_protocol::{
    AudioMeta, AudioProps, CorrectedTranscript, Job, JobResults, JobStatus, LogEntry, LogLevel,
    NewJob, RawTranscript, Stage, StageResult, Summary, SummaryDetails, UsageType,
};
use log::debug;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, params};
use std::path::Path;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("job not found: {0}")]
    NotFound(Uuid),
    #[error("job {0} already terminal ({1:?})")]
    TerminalJob(Uuid, JobStatus),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => AppError::JobNotFound(id),
            StoreError::TerminalJob(_, _) => AppError::Cancelled,
            other => AppError::Store(other.to_string()),
        }
    }
}

const NON_TERMINAL: &str = "('UPLOADED','TRANSCRIBING','CORRECTING','SUMMARIZING')";
const TERMINAL: &str = "('COMPLETED','FAILED','CANCELLED')";

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                original_filename TEXT NOT NULL,
                stored_filename TEXT NOT NULL,
                file_size INTEGER NOT NULL,
                content_hash TEXT NOT NULL,
                mime_type TEXT NOT NULL,
                usage_type TEXT NOT NULL,
                status TEXT NOT NULL,
                progress INTEGER NOT NULL DEFAULT 0,
                message TEXT NOT NULL DEFAULT '',
                error_code TEXT,
                error_message TEXT,
                cancel_requested INTEGER NOT NULL DEFAULT 0,
                claimed INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT
            );

            CREATE TABLE IF NOT EXISTS audio_meta (
                job_id TEXT PRIMARY KEY REFERENCES jobs(id) ON DELETE CASCADE,
                file_path TEXT NOT NULL,
                duration_seconds REAL NOT NULL,
                sample_rate INTEGER NOT NULL,
                channels INTEGER NOT NULL,
                bitrate INTEGER,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS raw_transcripts (
                job_id TEXT PRIMARY KEY REFERENCES jobs(id) ON DELETE CASCADE,
                text TEXT NOT NULL,
                language TEXT NOT NULL,
                confidence REAL NOT NULL,
                model TEXT NOT NULL,
                processing_ms INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS corrected_transcripts (
                job_id TEXT PRIMARY KEY REFERENCES jobs(id) ON DELETE CASCADE,
                text TEXT NOT NULL,
                model TEXT NOT NULL,
                processing_ms INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS summaries (
                job_id TEXT PRIMARY KEY REFERENCES jobs(id) ON DELETE CASCADE,
                formatted_text TEXT NOT NULL,
                details_json TEXT NOT NULL,
                model TEXT NOT NULL,
                confidence REAL NOT NULL,
                processing_ms INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS processing_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
                level TEXT NOT NULL,
                message TEXT NOT NULL,
                details_json TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_status_created ON jobs(status, created_at);
            CREATE INDEX IF NOT EXISTS idx_jobs_hash ON jobs(content_hash);
            CREATE INDEX IF NOT EXISTS idx_logs_job ON processing_logs(job_id);
            "#,
        )?;
        Ok(())
    }

    /// Insert a job in UPLOADED together with its audio metadata, atomically.
    pub fn create_job(&self, new: &NewJob, props: &AudioProps, file_path: &str) -> Result<Job> {
        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4(),
            original_filename: new.original_filename.clone(),
            stored_filename: new.stored_filename.clone(),
            file_size: new.file_size,
            content_hash: new.content_hash.clone(),
            mime_type: new.mime_type.clone(),
            usage_type: new.usage_type,
            status: JobStatus::Uploaded,
            progress: 0,
            message: String::new(),
            error_code: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        };

        let mut conn = self.conn.lock().expect("store mutex poisoned");
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO jobs (id, original_filename, stored_filename, file_size, content_hash, \
             mime_type, usage_type, status, progress, message, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, '', ?9, ?9)",
            params![
                job.id.to_string(),
                job.original_filename,
                job.stored_filename,
                job.file_size as i64,
                job.content_hash,
                job.mime_type,
                job.usage_type.as_str(),
                job.status.as_str(),
                ts(now),
            ],
        )?;
        tx.execute(
            "INSERT INTO audio_meta (job_id, file_path, duration_seconds, sample_rate, channels, \
             bitrate, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                job.id.to_string(),
                file_path,
                props.duration_seconds,
                props.sample_rate,
                props.channels,
                props.bitrate,
                ts(now),
            ],
        )?;
        tx.commit()?;
        Ok(job)
    }

    /// Dedup probe: a live job with the same content and purpose.
    pub fn find_active_by_hash(&self, hash: &str, usage: UsageType) -> Result<Option<Job>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE content_hash = ?1 AND usage_type = ?2 \
             AND status IN {NON_TERMINAL} ORDER BY created_at ASC LIMIT 1"
        );
        let job = conn
            .query_row(&sql, params![hash, usage.as_str()], map_job)
            .optional()?;
        Ok(job)
    }

    /// Atomically hand the oldest claimable job to a worker. A freshly
    /// uploaded job transitions to TRANSCRIBING here; an interrupted job
    /// keeps its in-flight status and is re-run from its stage outputs.
    pub fn claim_next_ready(&self) -> Result<Option<Job>> {
        let mut conn = self.conn.lock().expect("store mutex poisoned");
        let tx = conn.transaction()?;
        let sql = format!(
            "SELECT id, status FROM jobs WHERE claimed = 0 AND status IN {NON_TERMINAL} \
             ORDER BY created_at ASC LIMIT 1"
        );
        let picked: Option<(String, String)> = tx
            .query_row(&sql, [], |row| Ok((row.get(0)?, row.get(1)?)))
            .optional()?;
        let Some((id, status)) = picked else {
            return Ok(None);
        };
        let now = ts(Utc::now());
        if status == JobStatus::Uploaded.as_str() {
            tx.execute(
                "UPDATE jobs SET claimed = 1, status = 'TRANSCRIBING', started_at = ?2, \
                 updated_at = ?2 WHERE id = ?1",
                params![id, now],
            )?;
        } else {
            tx.execute(
                "UPDATE jobs SET claimed = 1, updated_at = ?2 WHERE id = ?1",
                params![id, now],
            )?;
        }
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1");
        let job = tx.query_row(&sql, [&id], map_job)?;
        tx.commit()?;
        Ok(Some(job))
    }

    /// Startup recovery: requeue every job a dead worker left claimed.
    pub fn release_interrupted(&self) -> Result<usize> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let sql = format!(
            "UPDATE jobs SET claimed = 0, updated_at = ?1 \
             WHERE claimed = 1 AND status IN {NON_TERMINAL}"
        );
        let n = conn.execute(&sql, params![ts(Utc::now())])?;
        Ok(n)
    }

    /// Milestone write. Progress is clamped monotonic: a value below the
    /// stored one keeps the stored one. Writes against a terminal job are
    /// refused so results arriving after cancellation are discarded.
    pub fn update_progress(
        &self,
        id: Uuid,
        status: JobStatus,
        progress: u8,
        message: &str,
    ) -> Result<()> {
        let mut conn = self.conn.lock().expect("store mutex poisoned");
        let tx = conn.transaction()?;
        let current = job_status(&tx, id)?;
        if current.is_terminal() {
            return Err(StoreError::TerminalJob(id, current));
        }
        tx.execute(
            "UPDATE jobs SET status = ?2, progress = MAX(progress, ?3), message = ?4, \
             updated_at = ?5 WHERE id = ?1",
            params![
                id.to_string(),
                status.as_str(),
                progress as i64,
                message,
                ts(Utc::now()),
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Commit a finished stage: insert its output row (idempotent; the row
    /// is the recovery key) and advance status and progress, atomically.
    pub fn complete_stage(&self, id: Uuid, result: &StageResult, message: &str) -> Result<()> {
        let mut conn = self.conn.lock().expect("store mutex poisoned");
        let tx = conn.transaction()?;
        let current = job_status(&tx, id)?;
        if current.is_terminal() {
            return Err(StoreError::TerminalJob(id, current));
        }

        let now = ts(Utc::now());
        let id_s = id.to_string();
        match result {
            StageResult::Transcribed {
                text,
                language,
                confidence,
                model,
                processing_ms,
            } => {
                tx.execute(
                    "INSERT INTO raw_transcripts (job_id, text, language, confidence, model, \
                     processing_ms, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
                     ON CONFLICT(job_id) DO NOTHING",
                    params![id_s, text, language, confidence, model, *processing_ms as i64, now],
                )?;
            }
            StageResult::Corrected {
                text,
                model,
                processing_ms,
            } => {
                tx.execute(
                    "INSERT INTO corrected_transcripts (job_id, text, model, processing_ms, \
                     created_at) VALUES (?1, ?2, ?3, ?4, ?5) ON CONFLICT(job_id) DO NOTHING",
                    params![id_s, text, model, *processing_ms as i64, now],
                )?;
            }
            StageResult::Summarized {
                formatted_text,
                details,
                model,
                confidence,
                processing_ms,
            } => {
                let details_json = serde_json::to_string(details)?;
                tx.execute(
                    "INSERT INTO summaries (job_id, formatted_text, details_json, model, \
                     confidence, processing_ms, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
                     ON CONFLICT(job_id) DO NOTHING",
                    params![
                        id_s,
                        formatted_text,
                        details_json,
                        model,
                        confidence,
                        *processing_ms as i64,
                        now
                    ],
                )?;
            }
        }

        let stage = result.stage();
        let next = stage.next_status();
        if next == JobStatus::Completed {
            tx.execute(
                "UPDATE jobs SET status = ?2, progress = 100, message = ?3, updated_at = ?4, \
                 completed_at = ?4, claimed = 0 WHERE id = ?1",
                params![id_s, next.as_str(), message, now],
            )?;
        } else {
            tx.execute(
                "UPDATE jobs SET status = ?2, progress = MAX(progress, ?3), message = ?4, \
                 updated_at = ?5 WHERE id = ?1",
                params![id_s, next.as_str(), stage.ceiling() as i64, message, now],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Terminal failure. A no-op when the job already reached a terminal
    /// state (e.g. it was cancelled while the stage was in flight).
    pub fn mark_failed(&self, id: Uuid, code: &str, message: &str) -> Result<()> {
        let mut conn = self.conn.lock().expect("store mutex poisoned");
        let tx = conn.transaction()?;
        let current = job_status(&tx, id)?;
        if current.is_terminal() {
            debug!("mark_failed({id}): already terminal ({current:?}), skipping");
            return Ok(());
        }
        tx.execute(
            "UPDATE jobs SET status = 'FAILED', error_code = ?2, error_message = ?3, \
             updated_at = ?4, completed_at = ?4, claimed = 0 WHERE id = ?1",
            params![id.to_string(), code, message, ts(Utc::now())],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Cancel contract: any non-terminal job transitions to CANCELLED right
    /// away and the flag becomes visible to the engine; repeat calls and
    /// calls on terminal jobs are no-ops. Progress is left as observed.
    pub fn cancel(&self, id: Uuid) -> Result<()> {
        let mut conn = self.conn.lock().expect("store mutex poisoned");
        let tx = conn.transaction()?;
        let current = job_status(&tx, id)?;
        if current.is_terminal() {
            return Ok(());
        }
        tx.execute(
            "UPDATE jobs SET status = 'CANCELLED', cancel_requested = 1, updated_at = ?2, \
             completed_at = ?2, claimed = 0 WHERE id = ?1",
            params![id.to_string(), ts(Utc::now())],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn is_cancel_requested(&self, id: Uuid) -> Result<bool> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let flag: Option<i64> = conn
            .query_row(
                "SELECT cancel_requested FROM jobs WHERE id = ?1",
                [id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        match flag {
            Some(v) => Ok(v != 0),
            None => Err(StoreError::NotFound(id)),
        }
    }

    pub fn get_job(&self, id: Uuid) -> Result<Option<Job>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1");
        let job = conn.query_row(&sql, [id.to_string()], map_job).optional()?;
        Ok(job)
    }

    pub fn list_jobs(&self, limit: usize) -> Result<Vec<Job>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at DESC LIMIT ?1");
        let mut stmt = conn.prepare(&sql)?;
        let jobs = stmt
            .query_map([limit as i64], map_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    pub fn count_jobs(&self) -> Result<u64> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM jobs", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    pub fn get_audio_meta(&self, id: Uuid) -> Result<Option<AudioMeta>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let meta = conn
            .query_row(
                "SELECT job_id, file_path, duration_seconds, sample_rate, channels, bitrate, \
                 created_at FROM audio_meta WHERE job_id = ?1",
                [id.to_string()],
                |row| {
                    Ok(AudioMeta {
                        job_id: parse_uuid(row, 0)?,
                        file_path: row.get(1)?,
                        duration_seconds: row.get(2)?,
                        sample_rate: row.get::<_, i64>(3)? as u32,
                        channels: row.get::<_, i64>(4)? as u16,
                        bitrate: row.get::<_, Option<i64>>(5)?.map(|b| b as u32),
                        created_at: parse_ts(row, 6)?,
                    })
                },
            )
            .optional()?;
        Ok(meta)
    }

    pub fn stage_exists(&self, id: Uuid, stage: Stage) -> Result<bool> {
        let table = stage_table(stage);
        let conn = self.conn.lock().expect("store mutex poisoned");
        let found: Option<i64> = conn
            .query_row(
                &format!("SELECT 1 FROM {table} WHERE job_id = ?1"),
                [id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn get_raw_transcript(&self, id: Uuid) -> Result<Option<RawTranscript>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let row = conn
            .query_row(
                "SELECT job_id, text, language, confidence, model, processing_ms, created_at \
                 FROM raw_transcripts WHERE job_id = ?1",
                [id.to_string()],
                |row| {
                    Ok(RawTranscript {
                        job_id: parse_uuid(row, 0)?,
                        text: row.get(1)?,
                        language: row.get(2)?,
                        confidence: row.get(3)?,
                        model: row.get(4)?,
                        processing_ms: row.get::<_, i64>(5)? as u64,
                        created_at: parse_ts(row, 6)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn get_corrected_transcript(&self, id: Uuid) -> Result<Option<CorrectedTranscript>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let row = conn
            .query_row(
                "SELECT job_id, text, model, processing_ms, created_at \
                 FROM corrected_transcripts WHERE job_id = ?1",
                [id.to_string()],
                |row| {
                    Ok(CorrectedTranscript {
                        job_id: parse_uuid(row, 0)?,
                        text: row.get(1)?,
                        model: row.get(2)?,
                        processing_ms: row.get::<_, i64>(3)? as u64,
                        created_at: parse_ts(row, 4)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn get_summary(&self, id: Uuid) -> Result<Option<Summary>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let row = conn
            .query_row(
                "SELECT job_id, formatted_text, details_json, model, confidence, processing_ms, \
                 created_at FROM summaries WHERE job_id = ?1",
                [id.to_string()],
                |row| {
                    let details_json: String = row.get(2)?;
                    let details: SummaryDetails = serde_json::from_str(&details_json)
                        .map_err(|e| conversion_error(2, e))?;
                    Ok(Summary {
                        job_id: parse_uuid(row, 0)?,
                        formatted_text: row.get(1)?,
                        details,
                        model: row.get(3)?,
                        confidence: row.get(4)?,
                        processing_ms: row.get::<_, i64>(5)? as u64,
                        created_at: parse_ts(row, 6)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Everything the HTTP surface needs to render one job.
    pub fn get_results(&self, id: Uuid) -> Result<JobResults> {
        let job = self.get_job(id)?.ok_or(StoreError::NotFound(id))?;
        Ok(JobResults {
            raw: self.get_raw_transcript(id)?,
            corrected: self.get_corrected_transcript(id)?,
            summary: self.get_summary(id)?,
            job,
        })
    }

    /// Best-effort audit append; callers ignore failures by design of the
    /// audit contract, not the other way around.
    pub fn append_log(
        &self,
        id: Uuid,
        level: LogLevel,
        message: &str,
        details: Option<&serde_json::Value>,
    ) -> Result<()> {
        let details_json = details.map(|v| v.to_string());
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "INSERT INTO processing_logs (job_id, level, message, details_json, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id.to_string(),
                level.as_str(),
                message,
                details_json,
                ts(Utc::now()),
            ],
        )?;
        Ok(())
    }

    pub fn get_logs(&self, id: Uuid) -> Result<Vec<LogEntry>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, job_id, level, message, details_json, created_at \
             FROM processing_logs WHERE job_id = ?1 ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map([id.to_string()], |row| {
                let level_s: String = row.get(2)?;
                let level = LogLevel::parse(&level_s)
                    .ok_or_else(|| conversion_error(2, format!("unknown level {level_s}")))?;
                let details: Option<String> = row.get(4)?;
                let details = match details {
                    Some(s) => {
                        Some(serde_json::from_str(&s).map_err(|e| conversion_error(4, e))?)
                    }
                    None => None,
                };
                Ok(LogEntry {
                    id: row.get(0)?,
                    job_id: parse_uuid(row, 1)?,
                    level,
                    message: row.get(3)?,
                    details,
                    created_at: parse_ts(row, 5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// TTL purge: remove terminal jobs finished before `cutoff` (cascading
    /// into their dependent rows) and report each stored file that no
    /// surviving job references. Returns the number of removed jobs.
    pub fn purge_expired(
        &self,
        cutoff: DateTime<Utc>,
        mut on_file_orphaned: impl FnMut(&str),
    ) -> Result<usize> {
        let mut orphaned = Vec::new();
        let removed;
        {
            let mut conn = self.conn.lock().expect("store mutex poisoned");
            let tx = conn.transaction()?;
            let sql = format!(
                "SELECT j.id, a.file_path FROM jobs j \
                 LEFT JOIN audio_meta a ON a.job_id = j.id \
                 WHERE j.status IN {TERMINAL} AND j.completed_at IS NOT NULL \
                 AND j.completed_at < ?1"
            );
            let rows: Vec<(String, Option<String>)> = {
                let mut stmt = tx.prepare(&sql)?;
                stmt.query_map([ts(cutoff)], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<rusqlite::Result<_>>()?
            };
            removed = rows.len();
            for (id, _) in &rows {
                tx.execute("DELETE FROM jobs WHERE id = ?1", [id])?;
            }
            let mut paths: Vec<String> = rows.into_iter().filter_map(|(_, p)| p).collect();
            paths.sort();
            paths.dedup();
            for path in paths {
                let refs: i64 = tx.query_row(
                    "SELECT COUNT(*) FROM audio_meta WHERE file_path = ?1",
                    [&path],
                    |row| row.get(0),
                )?;
                if refs == 0 {
                    orphaned.push(path);
                }
            }
            tx.commit()?;
        }
        // Files go after the commit so a purge crash never leaves rows
        // pointing at deleted audio.
        for path in &orphaned {
            on_file_orphaned(path);
        }
        Ok(removed)
    }
}

const JOB_COLUMNS: &str = "id, original_filename, stored_filename, file_size, content_hash, \
     mime_type, usage_type, status, progress, message, error_code, error_message, created_at, \
     updated_at, started_at, completed_at";

fn stage_table(stage: Stage) -> &'static str {
    match stage {
        Stage::Transcribe => "raw_transcripts",
        Stage::Correct => "corrected_transcripts",
        Stage::Summarize => "summaries",
    }
}

fn ts(when: DateTime<Utc>) -> String {
    when.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error(
    idx: usize,
    err: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, err.into())
}

fn parse_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let s: String = row.get(idx)?;
    Uuid::parse_str(&s).map_err(|e| conversion_error(idx, e))
}

fn parse_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn parse_opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let s: Option<String> = row.get(idx)?;
    match s {
        Some(s) => DateTime::parse_from_rfc3339(&s)
            .map(|d| Some(d.with_timezone(&Utc)))
            .map_err(|e| conversion_error(idx, e)),
        None => Ok(None),
    }
}

fn map_job(row: &Row<'_>) -> rusqlite::Result<Job> {
    let status_s: String = row.get(7)?;
    let status = JobStatus::parse(&status_s)
        .ok_or_else(|| conversion_error(7, format!("unknown status {status_s}")))?;
    let usage_s: String = row.get(6)?;
    let usage_type = UsageType::parse(&usage_s)
        .ok_or_else(|| conversion_error(6, format!("unknown usage type {usage_s}")))?;
    Ok(Job {
        id: parse_uuid(row, 0)?,
        original_filename: row.get(1)?,
        stored_filename: row.get(2)?,
        file_size: row.get::<_, i64>(3)? as u64,
        content_hash: row.get(4)?,
        mime_type: row.get(5)?,
        usage_type,
        status,
        progress: row.get::<_, i64>(8)? as u8,
        message: row.get(9)?,
        error_code: row.get(10)?,
        error_message: row.get(11)?,
        created_at: parse_ts(row, 12)?,
        updated_at: parse_ts(row, 13)?,
        started_at: parse_opt_ts(row, 14)?,
        completed_at: parse_opt_ts(row, 15)?,
    })
}

fn job_status(tx: &Transaction<'_>, id: Uuid) -> Result<JobStatus> {
    let status_s: Option<String> = tx
        .query_row(
            "SELECT status FROM jobs WHERE id = ?1",
            [id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    let status_s = status_s.ok_or(StoreError::NotFound(id))?;
    JobStatus::parse(&status_s)
        .ok_or_else(|| StoreError::Database(conversion_error(0, format!("unknown status {status_s}"))))
}
