//! Account scheduling: the periodic sweep, the job queue, per-account
//! locking and the run state machine (`idle → running → ok|partial|error`).

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use uuid::Uuid;

use crate::db::{DavAccountRepository, GitConfigRepository};
use crate::models::SyncStatus;

use super::error::SyncError;
use super::lock::SyncLock;
use super::{dav, git};

/// Covers the worst-case run; a crashed holder frees up after this.
pub const LOCK_TTL: Duration = Duration::from_secs(600);

/// True when an account is due for a sync sweep.
pub fn is_due(
    last_synced_at: Option<DateTime<Utc>>,
    interval_minutes: i64,
    now: DateTime<Utc>,
) -> bool {
    match last_synced_at {
        Some(last) => (now - last).num_minutes() >= interval_minutes,
        None => true,
    }
}

/// Roll per-kind failures up into the account status: `error` only when
/// every attempted kind failed, `partial` when some did.
pub fn overall_status(attempted: usize, failed: usize) -> SyncStatus {
    if failed == 0 {
        SyncStatus::Ok
    } else if failed == attempted {
        SyncStatus::Error
    } else {
        SyncStatus::Partial
    }
}

/// One unit of work for the worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncJob {
    DavAccount(Uuid),
    GitConfig(Uuid),
}

/// Sending half of the job queue. Cheap to clone into HTTP handlers.
#[derive(Clone)]
pub struct SyncQueue {
    sender: mpsc::UnboundedSender<SyncJob>,
}

impl SyncQueue {
    pub fn enqueue(&self, job: SyncJob) {
        if self.sender.send(job).is_err() {
            tracing::warn!("sync queue closed, job dropped");
        }
    }
}

pub fn sync_queue() -> (SyncQueue, mpsc::UnboundedReceiver<SyncJob>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (SyncQueue { sender }, receiver)
}

/// Runs sync jobs with per-account mutual exclusion.
///
/// The lock is injected so tests run against the in-process table; a
/// deployment fronted by several processes can swap in a shared one.
pub struct Scheduler {
    pool: SqlitePool,
    lock: Arc<dyn SyncLock>,
    git_work_dir: PathBuf,
}

impl Scheduler {
    pub fn new(pool: SqlitePool, lock: Arc<dyn SyncLock>, git_work_dir: PathBuf) -> Self {
        Self {
            pool,
            lock,
            git_work_dir,
        }
    }

    /// Enqueue one job per due account/config. Returns how many were queued.
    pub async fn sweep(&self, queue: &SyncQueue) -> Result<usize, SyncError> {
        let now = Utc::now();
        let mut enqueued = 0;

        let accounts = DavAccountRepository::new(self.pool.clone());
        for account in accounts.list_active().await? {
            if is_due(account.last_synced_at, account.sync_interval_minutes, now) {
                queue.enqueue(SyncJob::DavAccount(account.id));
                enqueued += 1;
            }
        }

        let configs = GitConfigRepository::new(self.pool.clone());
        for config in configs.list_enabled().await? {
            if is_due(config.last_synced_at, config.sync_interval_minutes, now) {
                queue.enqueue(SyncJob::GitConfig(config.id));
                enqueued += 1;
            }
        }

        Ok(enqueued)
    }

    /// Drain the queue, running up to `concurrency` jobs at once. Jobs for
    /// the same account are serialized by the per-account lock instead.
    pub async fn run_workers(
        self: Arc<Self>,
        mut receiver: mpsc::UnboundedReceiver<SyncJob>,
        concurrency: usize,
    ) {
        let semaphore = Arc::new(Semaphore::new(concurrency));
        while let Some(job) = receiver.recv().await {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let scheduler = Arc::clone(&self);
            tokio::spawn(async move {
                scheduler.run_job(job).await;
                drop(permit);
            });
        }
    }

    pub async fn run_job(&self, job: SyncJob) {
        match job {
            SyncJob::DavAccount(id) => self.run_dav_account(id).await,
            SyncJob::GitConfig(id) => self.run_git_config(id).await,
        }
    }

    /// Full run for one DAV account. Skips silently when another run holds
    /// the lock; always releases it, whatever happens inside.
    pub async fn run_dav_account(&self, account_id: Uuid) {
        let key = format!("dav_sync:{}", account_id);
        if !self.lock.acquire(&key, LOCK_TTL) {
            tracing::info!(account_id = %account_id, "dav sync already in flight, skipping");
            return;
        }

        if let Err(e) = self.dav_run(account_id).await {
            tracing::error!(account_id = %account_id, error = %e, "dav sync failed");
            let accounts = DavAccountRepository::new(self.pool.clone());
            if let Err(e) = accounts
                .finish(account_id, SyncStatus::Error, Some(e.to_string().as_str()), Utc::now())
                .await
            {
                tracing::error!(account_id = %account_id, error = %e, "failed to record sync error");
            }
        }

        self.lock.release(&key);
    }

    async fn dav_run(&self, account_id: Uuid) -> Result<(), SyncError> {
        let accounts = DavAccountRepository::new(self.pool.clone());
        let Some(account) = accounts.get_by_id(account_id).await? else {
            tracing::warn!(account_id = %account_id, "dav account gone, skipping");
            return Ok(());
        };

        accounts.mark_running(account.id).await?;
        let outcome = dav::run_account(&self.pool, &account).await?;
        let status = overall_status(outcome.attempted, outcome.failed);
        accounts.finish(account.id, status, None, Utc::now()).await?;
        tracing::info!(
            account_id = %account.id,
            status = %status,
            counts = %outcome.counts,
            "dav sync complete"
        );
        Ok(())
    }

    /// Full run for one git config, same locking discipline.
    pub async fn run_git_config(&self, config_id: Uuid) {
        let key = format!("git_sync:{}", config_id);
        if !self.lock.acquire(&key, LOCK_TTL) {
            tracing::info!(config_id = %config_id, "git sync already in flight, skipping");
            return;
        }

        if let Err(e) = self.git_run(config_id).await {
            tracing::error!(config_id = %config_id, error = %e, "git sync failed");
            let configs = GitConfigRepository::new(self.pool.clone());
            if let Err(e) = configs
                .finish(config_id, SyncStatus::Error, Some(e.to_string().as_str()), Utc::now())
                .await
            {
                tracing::error!(config_id = %config_id, error = %e, "failed to record sync error");
            }
        }

        self.lock.release(&key);
    }

    async fn git_run(&self, config_id: Uuid) -> Result<(), SyncError> {
        let configs = GitConfigRepository::new(self.pool.clone());
        let Some(config) = configs.get_by_id(config_id).await? else {
            tracing::warn!(config_id = %config_id, "git config gone, skipping");
            return Ok(());
        };
        if !config.enabled {
            return Ok(());
        }

        configs.mark_running(config.id).await?;
        let outcome = git::run_config(&self.pool, &config, &self.git_work_dir).await?;
        let status = overall_status(outcome.attempted, outcome.failed);
        configs.finish(config.id, status, None, Utc::now()).await?;
        tracing::info!(
            config_id = %config.id,
            status = %status,
            counts = %outcome.counts,
            "git sync complete"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use crate::models::DavAccount;
    use crate::sync::lock::LocalLock;
    use chrono::Duration as ChronoDuration;
    use tempfile::TempDir;

    #[test]
    fn test_is_due_never_synced() {
        assert!(is_due(None, 15, Utc::now()));
    }

    #[test]
    fn test_is_due_interval_boundaries() {
        let now = Utc::now();
        assert!(!is_due(Some(now - ChronoDuration::minutes(10)), 15, now));
        assert!(is_due(Some(now - ChronoDuration::minutes(15)), 15, now));
        assert!(is_due(Some(now - ChronoDuration::minutes(60)), 15, now));
    }

    #[test]
    fn test_overall_status() {
        assert_eq!(overall_status(4, 0), SyncStatus::Ok);
        assert_eq!(overall_status(4, 4), SyncStatus::Error);
        assert_eq!(overall_status(4, 1), SyncStatus::Partial);
        // Nothing attempted at all still reads as healthy.
        assert_eq!(overall_status(0, 0), SyncStatus::Ok);
    }

    #[test]
    fn test_queue_delivers_jobs() {
        let (queue, mut receiver) = sync_queue();
        let id = Uuid::new_v4();
        queue.enqueue(SyncJob::DavAccount(id));
        assert_eq!(receiver.try_recv().unwrap(), SyncJob::DavAccount(id));
        assert!(receiver.try_recv().is_err());
    }

    struct TestContext {
        scheduler: Scheduler,
        pool: SqlitePool,
        lock: Arc<LocalLock>,
        _temp_dir: TempDir,
    }

    async fn setup() -> TestContext {
        let temp_dir = TempDir::new().unwrap();
        let pool = init_db(Some(temp_dir.path().join("test.db"))).await.unwrap();
        let lock = Arc::new(LocalLock::new());
        let scheduler = Scheduler::new(
            pool.clone(),
            lock.clone(),
            temp_dir.path().join("git-work"),
        );
        TestContext {
            scheduler,
            pool,
            lock,
            _temp_dir: temp_dir,
        }
    }

    #[tokio::test]
    async fn test_sweep_enqueues_due_accounts() {
        let ctx = setup().await;
        let accounts = DavAccountRepository::new(ctx.pool.clone());

        let due = DavAccount::new(Uuid::new_v4(), "due", "https://dav.example.org", "a", "p");
        accounts.create(&due).await.unwrap();

        let mut fresh = DavAccount::new(Uuid::new_v4(), "fresh", "https://dav.example.org", "a", "p");
        fresh.last_synced_at = Some(Utc::now());
        accounts.create(&fresh).await.unwrap();

        let (queue, mut receiver) = sync_queue();
        let enqueued = ctx.scheduler.sweep(&queue).await.unwrap();
        assert_eq!(enqueued, 1);
        assert_eq!(receiver.try_recv().unwrap(), SyncJob::DavAccount(due.id));
    }

    #[tokio::test]
    async fn test_run_with_no_collections_finishes_ok() {
        let ctx = setup().await;
        let accounts = DavAccountRepository::new(ctx.pool.clone());
        // Both features enabled but no collection paths: every kind is a
        // no-op success.
        let account = DavAccount::new(Uuid::new_v4(), "idle", "https://dav.example.org", "a", "p");
        accounts.create(&account).await.unwrap();

        ctx.scheduler.run_dav_account(account.id).await;

        let fetched = accounts.get_by_id(account.id).await.unwrap().unwrap();
        assert_eq!(fetched.last_sync_status, Some(SyncStatus::Ok));
        assert!(fetched.last_synced_at.is_some());
        // The lock was released.
        assert!(ctx.lock.acquire(&format!("dav_sync:{}", account.id), LOCK_TTL));
    }

    #[tokio::test]
    async fn test_locked_account_is_skipped() {
        let ctx = setup().await;
        let accounts = DavAccountRepository::new(ctx.pool.clone());
        let account = DavAccount::new(Uuid::new_v4(), "busy", "https://dav.example.org", "a", "p");
        accounts.create(&account).await.unwrap();

        let key = format!("dav_sync:{}", account.id);
        assert!(ctx.lock.acquire(&key, LOCK_TTL));

        ctx.scheduler.run_dav_account(account.id).await;

        // The held lock means the run never started: no status change.
        let fetched = accounts.get_by_id(account.id).await.unwrap().unwrap();
        assert!(fetched.last_sync_status.is_none());
        assert!(fetched.last_synced_at.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_server_records_partial() {
        let ctx = setup().await;
        let accounts = DavAccountRepository::new(ctx.pool.clone());
        // CardDAV points at a closed port; CalDAV is unset, so three kinds
        // no-op and one fails: degraded but not broken.
        let mut account =
            DavAccount::new(Uuid::new_v4(), "down", "http://127.0.0.1:1", "a", "p");
        account.carddav_path = Some("/addressbooks/a/".into());
        accounts.create(&account).await.unwrap();

        ctx.scheduler.run_dav_account(account.id).await;

        let fetched = accounts.get_by_id(account.id).await.unwrap().unwrap();
        assert_eq!(fetched.last_sync_status, Some(SyncStatus::Partial));
    }

    #[tokio::test]
    async fn test_missing_git_repo_records_error() {
        let ctx = setup().await;
        let configs = GitConfigRepository::new(ctx.pool.clone());
        let config = crate::models::GitConfig::new(
            Uuid::new_v4(),
            ctx._temp_dir.path().join("does-not-exist").display().to_string(),
            crate::models::GitAuthType::Token,
            "tok",
        );
        configs.create(&config).await.unwrap();

        ctx.scheduler.run_git_config(config.id).await;

        let fetched = configs.get_by_id(config.id).await.unwrap().unwrap();
        assert_eq!(fetched.last_sync_status, Some(SyncStatus::Error));
        assert!(fetched.last_sync_error.is_some());
        // The lock was released even though the run failed.
        assert!(ctx.lock.acquire(&format!("git_sync:{}", config.id), LOCK_TTL));
    }
}
