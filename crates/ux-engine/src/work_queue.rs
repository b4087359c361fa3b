//! SQLite-backed persistent job queue.
//!
//! - One row per (queue, key): re-enqueueing a pending job replaces its payload
//! - Retry with exponential backoff
//! - Dead letter table for jobs that exhausted their retries
//! - WAL mode for write performance
//! - Jobs left in "processing" by a crash are recovered on startup

use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rusqlite::{params, Connection};
use tracing::{debug, warn};
use ux_config::UxConfig;
use ux_core::{Job, JobQueue, QueueError, QueueName};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS jobs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        queue TEXT NOT NULL,
        job_key TEXT NOT NULL,
        payload TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        attempts INTEGER NOT NULL DEFAULT 0,
        last_error TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        process_after INTEGER NOT NULL,
        UNIQUE(queue, job_key)
    );
    CREATE INDEX IF NOT EXISTS idx_jobs_status_process
        ON jobs(status, process_after);
    CREATE TABLE IF NOT EXISTS dead_letter (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        queue TEXT NOT NULL,
        job_key TEXT NOT NULL,
        payload TEXT NOT NULL,
        attempts INTEGER NOT NULL,
        last_error TEXT,
        created_at INTEGER NOT NULL,
        dead_at INTEGER NOT NULL
    );";

/// Status of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Processing,
}

impl JobStatus {
    fn from_str(s: &str) -> Self {
        match s {
            "processing" => JobStatus::Processing,
            _ => JobStatus::Pending,
        }
    }
}

/// A job handed to a worker.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub id: i64,
    pub job: Job,
    pub status: JobStatus,
    /// Failed attempts before this delivery.
    pub attempts: u32,
    pub last_error: Option<String>,
}

/// A dead-lettered job.
#[derive(Debug, Clone)]
pub struct DeadJob {
    pub queue: QueueName,
    pub key: String,
    pub payload: String,
    pub attempts: u32,
    pub last_error: Option<String>,
}

/// What happened to a job after a failed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Rescheduled after `delay`.
    Retrying { attempt: u32, delay: Duration },
    /// Retries exhausted; the job was moved to the dead letter table.
    DeadLettered { attempts: u32 },
}

#[derive(Debug, Clone)]
pub struct JobQueueConfig {
    /// Deliveries before a job is dead-lettered.
    pub max_retries: u32,
    /// Doubles after each failed delivery.
    ///
    /// Retries are scheduled on wall-clock time, not tokio time, so a paused
    /// tokio clock does not bring them forward. Simulations under
    /// `start_paused` use a zero backoff.
    pub base_backoff: Duration,
}

impl Default for JobQueueConfig {
    fn default() -> Self {
        JobQueueConfig {
            max_retries: 3,
            base_backoff: Duration::from_secs(2),
        }
    }
}

impl JobQueueConfig {
    pub fn from_config(config: &UxConfig) -> Self {
        JobQueueConfig {
            max_retries: config.queue_max_retries(),
            base_backoff: config.queue_base_backoff(),
        }
    }
}

/// SQLite-backed persistent job queue. Delivery is at-least-once.
pub struct SqliteJobQueue {
    conn: Mutex<Connection>,
    config: JobQueueConfig,
}

/// Wall-clock milliseconds; `process_after` outlives the process.
fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

fn storage(context: &'static str) -> impl Fn(rusqlite::Error) -> QueueError {
    move |e| QueueError::Storage(format!("{}: {}", context, e))
}

impl SqliteJobQueue {
    /// Open (or create) a persistent queue at the given path.
    pub fn open(db_path: &Path, config: JobQueueConfig) -> Result<Self, QueueError> {
        let conn = Connection::open(db_path).map_err(storage("Failed to open job queue DB"))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")
            .map_err(storage("Failed to set pragmas"))?;
        conn.execute_batch(SCHEMA)
            .map_err(storage("Failed to create tables"))?;

        Ok(SqliteJobQueue {
            conn: Mutex::new(conn),
            config,
        })
    }

    /// Open an in-memory queue.
    pub fn open_memory(config: JobQueueConfig) -> Result<Self, QueueError> {
        let conn = Connection::open_in_memory().map_err(storage("Failed to open in-memory DB"))?;
        conn.execute_batch(SCHEMA)
            .map_err(storage("Failed to create tables"))?;

        Ok(SqliteJobQueue {
            conn: Mutex::new(conn),
            config,
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert a job, or refresh it if the same key is still pending.
    ///
    /// A job already being processed is left alone; its handler is idempotent
    /// and will observe the same state.
    pub fn push(&self, job: &Job) -> Result<(), QueueError> {
        let now = now_millis();
        let payload = serde_json::to_string(job)?;
        let queue = job.queue().as_str();
        let key = job.key();

        self.conn()
            .execute(
                "INSERT INTO jobs (queue, job_key, payload, status, attempts, created_at, updated_at, process_after)
                 VALUES (?1, ?2, ?3, 'pending', 0, ?4, ?4, ?4)
                 ON CONFLICT(queue, job_key) DO UPDATE SET
                     payload = ?3,
                     attempts = 0,
                     last_error = NULL,
                     updated_at = ?4,
                     process_after = ?4
                 WHERE jobs.status = 'pending'",
                params![queue, key, payload, now],
            )
            .map_err(storage("Failed to enqueue"))?;

        debug!(queue, key = %key, "Enqueued job");
        Ok(())
    }

    /// Fetch up to `batch_size` jobs that are due and mark them processing.
    ///
    /// Rows whose payload no longer decodes are dead-lettered immediately.
    pub fn fetch_ready(&self, batch_size: usize) -> Result<Vec<QueuedJob>, QueueError> {
        let now = now_millis();
        let conn = self.conn();

        let rows: Vec<(i64, String, String, u32, Option<String>)> = {
            let mut stmt = conn
                .prepare(
                    "SELECT id, payload, status, attempts, last_error
                     FROM jobs
                     WHERE status = 'pending' AND process_after <= ?1
                     ORDER BY process_after ASC, id ASC
                     LIMIT ?2",
                )
                .map_err(storage("Failed to prepare fetch"))?;

            let rows = stmt
                .query_map(params![now, batch_size as i64], |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                    ))
                })
                .map_err(storage("Failed to fetch"))?
                .filter_map(|r| r.ok())
                .collect();
            rows
        };

        let mut jobs = Vec::with_capacity(rows.len());
        for (id, payload, status, attempts, last_error) in rows {
            match serde_json::from_str::<Job>(&payload) {
                Ok(job) => {
                    conn.execute(
                        "UPDATE jobs SET status = 'processing', updated_at = ?1 WHERE id = ?2",
                        params![now, id],
                    )
                    .map_err(storage("Failed to mark processing"))?;
                    jobs.push(QueuedJob {
                        id,
                        job,
                        status: JobStatus::from_str(&status),
                        attempts,
                        last_error,
                    });
                }
                Err(e) => {
                    warn!(job_id = id, error = %e, "Dropping undecodable job to dead letter");
                    Self::move_to_dead_letter(&conn, id, attempts, &e.to_string(), now)?;
                }
            }
        }

        Ok(jobs)
    }

    /// Acknowledge a delivered job.
    pub fn complete(&self, id: i64) -> Result<(), QueueError> {
        self.conn()
            .execute("DELETE FROM jobs WHERE id = ?1", params![id])
            .map_err(storage("Failed to complete"))?;
        Ok(())
    }

    /// Record a failed delivery: reschedule with backoff or dead-letter.
    pub fn fail(&self, id: i64, error: &str) -> Result<FailOutcome, QueueError> {
        let now = now_millis();
        let conn = self.conn();

        let attempts: u32 = conn
            .query_row("SELECT attempts FROM jobs WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .map_err(storage("Failed to get attempts"))?;

        let new_attempts = attempts + 1;

        if new_attempts >= self.config.max_retries {
            Self::move_to_dead_letter(&conn, id, new_attempts, error, now)?;
            warn!(
                job_id = id,
                attempts = new_attempts,
                "Moved job to dead letter"
            );
            Ok(FailOutcome::DeadLettered {
                attempts: new_attempts,
            })
        } else {
            let delay = self.config.base_backoff * 2u32.pow(attempts);
            let process_after = now + delay.as_millis() as i64;

            conn.execute(
                "UPDATE jobs SET status = 'pending', attempts = ?1, last_error = ?2, updated_at = ?3, process_after = ?4 WHERE id = ?5",
                params![new_attempts, error, now, process_after, id],
            )
            .map_err(storage("Failed to schedule retry"))?;

            debug!(
                job_id = id,
                attempt = new_attempts,
                delay_ms = delay.as_millis() as u64,
                "Scheduled retry"
            );
            Ok(FailOutcome::Retrying {
                attempt: new_attempts,
                delay,
            })
        }
    }

    fn move_to_dead_letter(
        conn: &Connection,
        id: i64,
        attempts: u32,
        error: &str,
        now: i64,
    ) -> Result<(), QueueError> {
        conn.execute(
            "INSERT INTO dead_letter (queue, job_key, payload, attempts, last_error, created_at, dead_at)
             SELECT queue, job_key, payload, ?1, ?2, created_at, ?3 FROM jobs WHERE id = ?4",
            params![attempts, error, now, id],
        )
        .map_err(storage("Failed to dead-letter"))?;

        conn.execute("DELETE FROM jobs WHERE id = ?1", params![id])
            .map_err(storage("Failed to remove after dead-letter"))?;
        Ok(())
    }

    /// Jobs waiting for delivery.
    pub fn pending_count(&self) -> Result<usize, QueueError> {
        self.conn()
            .query_row(
                "SELECT COUNT(*) FROM jobs WHERE status = 'pending'",
                [],
                |row| row.get::<_, usize>(0),
            )
            .map_err(storage("Failed to count pending"))
    }

    /// Pending plus processing jobs on one queue.
    pub fn count_in(&self, queue: QueueName) -> Result<usize, QueueError> {
        self.conn()
            .query_row(
                "SELECT COUNT(*) FROM jobs WHERE queue = ?1",
                params![queue.as_str()],
                |row| row.get::<_, usize>(0),
            )
            .map_err(storage("Failed to count queue"))
    }

    pub fn dead_letter_count(&self) -> Result<usize, QueueError> {
        self.conn()
            .query_row("SELECT COUNT(*) FROM dead_letter", [], |row| {
                row.get::<_, usize>(0)
            })
            .map_err(storage("Failed to count dead letters"))
    }

    pub fn dead_letters(&self) -> Result<Vec<DeadJob>, QueueError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT queue, job_key, payload, attempts, last_error FROM dead_letter ORDER BY dead_at DESC, id DESC",
            )
            .map_err(storage("Failed to prepare dead letter query"))?;

        let items = stmt
            .query_map([], |row| {
                let queue: String = row.get(0)?;
                let queue = QueueName::parse(&queue).ok_or_else(|| {
                    rusqlite::Error::FromSqlConversionFailure(
                        0,
                        rusqlite::types::Type::Text,
                        format!("unknown queue {}", queue).into(),
                    )
                })?;
                Ok(DeadJob {
                    queue,
                    key: row.get(1)?,
                    payload: row.get(2)?,
                    attempts: row.get(3)?,
                    last_error: row.get(4)?,
                })
            })
            .map_err(storage("Failed to query dead letters"))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(items)
    }

    /// Reset jobs stuck in "processing" (e.g. after a crash) to pending.
    pub fn recover_stuck(&self) -> Result<usize, QueueError> {
        let now = now_millis();
        let count = self
            .conn()
            .execute(
                "UPDATE jobs SET status = 'pending', updated_at = ?1, process_after = ?1 WHERE status = 'processing'",
                params![now],
            )
            .map_err(storage("Failed to recover stuck jobs"))?;

        if count > 0 {
            debug!(count, "Recovered stuck jobs");
        }
        Ok(count)
    }

    /// Pending plus processing jobs across all queues.
    pub fn queue_size(&self) -> Result<usize, QueueError> {
        self.conn()
            .query_row("SELECT COUNT(*) FROM jobs", [], |row| row.get::<_, usize>(0))
            .map_err(storage("Failed to count queue"))
    }
}

#[async_trait]
impl JobQueue for SqliteJobQueue {
    async fn enqueue(&self, job: &Job) -> Result<(), QueueError> {
        self.push(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn make_queue() -> SqliteJobQueue {
        SqliteJobQueue::open_memory(JobQueueConfig {
            max_retries: 3,
            base_backoff: Duration::ZERO,
        })
        .unwrap()
    }

    fn episode_job(episode_id: Uuid) -> Job {
        Job::SimulateEpisode {
            episode_id,
            run_id: Uuid::nil(),
            model: "m".to_string(),
            max_steps: 5,
            seed: None,
        }
    }

    #[test]
    fn test_enqueue_and_fetch() {
        let q = make_queue();
        let a = episode_job(Uuid::new_v4());
        let b = Job::AggregateReport {
            run_id: Uuid::new_v4(),
        };
        q.push(&a).unwrap();
        q.push(&b).unwrap();

        assert_eq!(q.pending_count().unwrap(), 2);

        let jobs = q.fetch_ready(10).unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].job, a);
        assert_eq!(jobs[1].job, b);
        assert_eq!(q.pending_count().unwrap(), 0);
        assert_eq!(q.queue_size().unwrap(), 2);
    }

    #[test]
    fn test_same_key_deduplicates() {
        let q = make_queue();
        let episode_id = Uuid::new_v4();
        q.push(&episode_job(episode_id)).unwrap();
        q.push(&episode_job(episode_id)).unwrap();

        assert_eq!(q.queue_size().unwrap(), 1);
        assert_eq!(q.count_in(QueueName::SimulateEpisode).unwrap(), 1);
    }

    #[test]
    fn test_processing_job_not_reset_by_enqueue() {
        let q = make_queue();
        let job = episode_job(Uuid::new_v4());
        q.push(&job).unwrap();
        assert_eq!(q.fetch_ready(10).unwrap().len(), 1);

        q.push(&job).unwrap();
        assert!(q.fetch_ready(10).unwrap().is_empty());
    }

    #[test]
    fn test_complete() {
        let q = make_queue();
        q.push(&episode_job(Uuid::new_v4())).unwrap();

        let jobs = q.fetch_ready(10).unwrap();
        q.complete(jobs[0].id).unwrap();
        assert_eq!(q.queue_size().unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_uses_wall_clock() {
        let q = SqliteJobQueue::open_memory(JobQueueConfig {
            max_retries: 3,
            base_backoff: Duration::from_secs(60),
        })
        .unwrap();
        q.push(&episode_job(Uuid::new_v4())).unwrap();

        let first = q.fetch_ready(10).unwrap();
        let outcome = q.fail(first[0].id, "boom").unwrap();
        assert_eq!(
            outcome,
            FailOutcome::Retrying {
                attempt: 1,
                delay: Duration::from_secs(60)
            }
        );

        // Advancing the paused tokio clock does not make the retry due.
        tokio::time::advance(Duration::from_secs(120)).await;
        assert!(q.fetch_ready(10).unwrap().is_empty());
        assert_eq!(q.queue_size().unwrap(), 1);
    }

    #[test]
    fn test_retry_then_dead_letter() {
        let q = make_queue();
        q.push(&episode_job(Uuid::new_v4())).unwrap();

        let first = q.fetch_ready(10).unwrap();
        let outcome = q.fail(first[0].id, "boom").unwrap();
        assert!(matches!(outcome, FailOutcome::Retrying { attempt: 1, .. }));

        let second = q.fetch_ready(10).unwrap();
        assert_eq!(second[0].attempts, 1);
        assert_eq!(second[0].last_error.as_deref(), Some("boom"));
        q.fail(second[0].id, "boom").unwrap();

        let third = q.fetch_ready(10).unwrap();
        let outcome = q.fail(third[0].id, "boom again").unwrap();
        assert_eq!(outcome, FailOutcome::DeadLettered { attempts: 3 });

        assert_eq!(q.queue_size().unwrap(), 0);
        let dead = q.dead_letters().unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].queue, QueueName::SimulateEpisode);
        assert_eq!(dead[0].last_error.as_deref(), Some("boom again"));
    }

    #[test]
    fn test_backoff_delays_redelivery() {
        let q = SqliteJobQueue::open_memory(JobQueueConfig {
            max_retries: 3,
            base_backoff: Duration::from_secs(60),
        })
        .unwrap();
        q.push(&episode_job(Uuid::new_v4())).unwrap();

        let jobs = q.fetch_ready(10).unwrap();
        let outcome = q.fail(jobs[0].id, "later").unwrap();
        assert_eq!(
            outcome,
            FailOutcome::Retrying {
                attempt: 1,
                delay: Duration::from_secs(60)
            }
        );
        assert!(q.fetch_ready(10).unwrap().is_empty());
        assert_eq!(q.pending_count().unwrap(), 1);
    }

    #[test]
    fn test_recover_stuck_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("queue.db");
        let job = episode_job(Uuid::new_v4());

        {
            let q = SqliteJobQueue::open(&path, JobQueueConfig::default()).unwrap();
            q.push(&job).unwrap();
            assert_eq!(q.fetch_ready(10).unwrap().len(), 1);
        }

        let q = SqliteJobQueue::open(&path, JobQueueConfig::default()).unwrap();
        assert!(q.fetch_ready(10).unwrap().is_empty());
        assert_eq!(q.recover_stuck().unwrap(), 1);

        let jobs = q.fetch_ready(10).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].job, job);
    }
}
