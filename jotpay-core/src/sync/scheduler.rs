//! Single-flight sync scheduler.
//!
//! A scheduler drives one engine through one lane holding at most one
//! running job and one queued job. The engine reads the current vault when a
//! run starts, so the lane is not keyed by vault: jobs submitted before and
//! after a link or unlink still run one after the other. A request that
//! arrives while a job is queued merges into it and shares its handle, so a
//! burst of mutations costs one extra run. Runs wait for connectivity, take
//! a slot from a bounded pool, retry failures with linear backoff, and can
//! be cancelled at any point.

use crate::config::SyncOptions;
use crate::sync::engine::SyncEngine;
use crate::sync::models::{SyncOutcome, SyncRequest};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, info, warn};

/// Lifecycle of one scheduled job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Enqueued,
    /// Waiting for connectivity.
    Blocked,
    Running,
    Finished(SyncOutcome),
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished(_) | Self::Cancelled)
    }
}

struct Job {
    id: u64,
    request: Mutex<SyncRequest>,
    status: watch::Sender<JobStatus>,
    cancel: watch::Sender<bool>,
}

impl Job {
    fn new(id: u64, request: SyncRequest) -> Self {
        Self {
            id,
            request: Mutex::new(request),
            status: watch::channel(JobStatus::Enqueued).0,
            cancel: watch::channel(false).0,
        }
    }

    fn request(&self) -> SyncRequest {
        match self.request.lock() {
            Ok(request) => *request,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn merge(&self, other: SyncRequest) {
        let mut request = match self.request.lock() {
            Ok(request) => request,
            Err(poisoned) => poisoned.into_inner(),
        };
        *request = request.merge(other);
    }

    fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    async fn cancelled(&self) {
        let mut rx = self.cancel.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    fn set_status(&self, status: JobStatus) {
        self.status.send_replace(status);
    }
}

/// Handle to a submitted job; clones observe the same job.
#[derive(Clone)]
pub struct SyncHandle {
    job: Arc<Job>,
}

impl std::fmt::Debug for SyncHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncHandle")
            .field("id", &self.job.id)
            .field("status", &self.status())
            .finish()
    }
}

impl SyncHandle {
    pub fn id(&self) -> u64 {
        self.job.id
    }

    pub fn status(&self) -> JobStatus {
        self.job.status.borrow().clone()
    }

    /// Request cancellation. A running attempt is dropped at its next await.
    pub fn cancel(&self) {
        self.job.cancel.send_replace(true);
    }

    /// Wait for the terminal status.
    pub async fn wait(&self) -> JobStatus {
        let mut rx = self.job.status.subscribe();
        let status = match rx.wait_for(JobStatus::is_terminal).await {
            Ok(status) => status.clone(),
            Err(_) => self.status(),
        };
        status
    }
}

#[derive(Default)]
struct Lane {
    running: bool,
    queued: Option<Arc<Job>>,
}

struct Inner {
    engine: Arc<SyncEngine>,
    options: SyncOptions,
    lane: Mutex<Lane>,
    slots: Semaphore,
    online: watch::Sender<bool>,
    next_id: AtomicU64,
}

/// Submits sync runs for the engine's vault. Cloning shares the scheduler.
#[derive(Clone)]
pub struct SyncScheduler {
    inner: Arc<Inner>,
}

impl SyncScheduler {
    /// Must be called inside a tokio runtime; submissions spawn tasks.
    pub fn new(engine: Arc<SyncEngine>, options: SyncOptions) -> Self {
        let slots = Semaphore::new(options.max_concurrent_runs.max(1));
        Self {
            inner: Arc::new(Inner {
                engine,
                options,
                lane: Mutex::new(Lane::default()),
                slots,
                online: watch::channel(true).0,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Update connectivity. Blocked jobs start once this turns `true`.
    pub fn set_online(&self, online: bool) {
        self.inner.online.send_replace(online);
        debug!(online, "Connectivity changed");
    }

    pub fn is_online(&self) -> bool {
        *self.inner.online.borrow()
    }

    /// Queue a sync run, merging into an already queued one.
    pub fn submit(&self, request: SyncRequest) -> SyncHandle {
        let mut lane = self.inner.lock_lane();

        if let Some(job) = lane.queued.as_ref().filter(|job| !job.is_cancelled()) {
            job.merge(request);
            debug!(job = job.id, "Merged sync request into queued job");
            return SyncHandle { job: job.clone() };
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let job = Arc::new(Job::new(id, request));
        if let Some(replaced) = lane.queued.replace(job.clone()) {
            replaced.set_status(JobStatus::Cancelled);
        }
        debug!(job = id, force_push = request.force_push, "Queued sync job");

        if !lane.running {
            lane.running = true;
            let inner = self.inner.clone();
            tokio::spawn(async move { inner.drive_lane().await });
        }
        SyncHandle { job }
    }
}

impl Inner {
    fn lock_lane(&self) -> std::sync::MutexGuard<'_, Lane> {
        match self.lane.lock() {
            Ok(lane) => lane,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Take the queued job, or mark the lane idle when there is none.
    fn next_job(&self) -> Option<Arc<Job>> {
        let mut lane = self.lock_lane();
        let job = lane.queued.take();
        if job.is_none() {
            lane.running = false;
        }
        job
    }

    async fn drive_lane(self: Arc<Self>) {
        while let Some(job) = self.next_job() {
            let status = tokio::select! {
                biased;
                _ = job.cancelled() => JobStatus::Cancelled,
                status = self.run_job(&job) => status,
            };
            info!(job = job.id, ?status, "Sync job finished");
            job.set_status(status);
        }
    }

    async fn wait_online(&self, job: &Job) {
        let mut online = self.online.subscribe();
        if *online.borrow_and_update() {
            return;
        }
        job.set_status(JobStatus::Blocked);
        debug!(job = job.id, "Sync job blocked until online");
        let _ = online.wait_for(|online| *online).await;
    }

    async fn run_job(&self, job: &Job) -> JobStatus {
        let max_attempts = self.options.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            self.wait_online(job).await;
            let outcome = {
                let Ok(_permit) = self.slots.acquire().await else {
                    return JobStatus::Finished(SyncOutcome::Failed(
                        "scheduler closed".to_string(),
                    ));
                };
                job.set_status(JobStatus::Running);
                self.engine.run(&job.request()).await
            };

            match outcome {
                SyncOutcome::Failed(reason) if attempt < max_attempts => {
                    let delay = Duration::from_millis(
                        self.options.retry_backoff_ms.saturating_mul(attempt as u64),
                    );
                    warn!(job = job.id, attempt, ?delay, "Sync attempt failed, retrying: {}", reason);
                    job.set_status(JobStatus::Enqueued);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                outcome => return JobStatus::Finished(outcome),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{MemoryRecordStore, Nature, Record, RecordStore};
    use crate::settings::MemorySettings;
    use crate::sync::config::VaultConfig;
    use crate::sync::remote::{MemoryRemoteStore, RemoteStore, RemoteValue};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicUsize;

    struct Fixture {
        scheduler: SyncScheduler,
        records: Arc<MemoryRecordStore>,
        remote: Arc<MemoryRemoteStore>,
    }

    fn fixture(options: SyncOptions) -> Fixture {
        let records = Arc::new(MemoryRecordStore::new());
        let settings = Arc::new(MemorySettings::new());
        VaultConfig::ensure(settings.as_ref()).unwrap();
        let remote = Arc::new(MemoryRemoteStore::new());
        let engine = Arc::new(SyncEngine::new(records.clone(), settings, remote.clone()));
        Fixture {
            scheduler: SyncScheduler::new(engine, options),
            records,
            remote,
        }
    }

    fn quick() -> SyncOptions {
        SyncOptions {
            max_attempts: 3,
            retry_backoff_ms: 10,
            max_concurrent_runs: 1,
        }
    }

    #[tokio::test]
    async fn submitted_job_finishes() {
        let f = fixture(quick());
        f.records
            .insert(&Record::new("-1 a", -1.0, "a", 1, Nature::Normal))
            .unwrap();

        let status = f.scheduler.submit(SyncRequest::default()).wait().await;
        match status {
            JobStatus::Finished(SyncOutcome::Completed(report)) => assert_eq!(report.pushed, 1),
            other => panic!("unexpected status {:?}", other),
        }
    }

    #[tokio::test]
    async fn queued_requests_merge_and_share_handle() {
        let f = fixture(quick());
        f.scheduler.set_online(false);

        let running = f.scheduler.submit(SyncRequest::default());
        tokio::task::yield_now().await;
        let queued = f.scheduler.submit(SyncRequest::default());
        let merged = f.scheduler.submit(SyncRequest::forced());

        assert_ne!(running.id(), queued.id());
        assert_eq!(queued.id(), merged.id());
        assert!(queued.job.request().force_push);

        f.scheduler.set_online(true);
        assert!(running.wait().await.is_terminal());
        assert!(matches!(
            merged.wait().await,
            JobStatus::Finished(SyncOutcome::Completed(_))
        ));
    }

    #[tokio::test]
    async fn offline_job_is_blocked_then_runs() {
        let f = fixture(quick());
        f.scheduler.set_online(false);
        let handle = f.scheduler.submit(SyncRequest::default());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(handle.status(), JobStatus::Blocked);

        f.scheduler.set_online(true);
        assert!(matches!(handle.wait().await, JobStatus::Finished(_)));
    }

    #[tokio::test]
    async fn cancel_blocked_job() {
        let f = fixture(quick());
        f.scheduler.set_online(false);
        let handle = f.scheduler.submit(SyncRequest::default());
        tokio::task::yield_now().await;

        handle.cancel();
        assert_eq!(handle.wait().await, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn failed_runs_are_retried_then_reported() {
        let f = fixture(quick());
        f.remote.set_offline(true);

        let status = f.scheduler.submit(SyncRequest::default()).wait().await;
        assert!(matches!(
            status,
            JobStatus::Finished(SyncOutcome::Failed(_))
        ));
    }

    #[tokio::test]
    async fn retry_succeeds_once_remote_returns() {
        let f = fixture(SyncOptions {
            max_attempts: 5,
            retry_backoff_ms: 30,
            max_concurrent_runs: 1,
        });
        f.remote.set_offline(true);
        let handle = f.scheduler.submit(SyncRequest::default());

        tokio::time::sleep(Duration::from_millis(10)).await;
        f.remote.set_offline(false);
        assert!(matches!(
            handle.wait().await,
            JobStatus::Finished(SyncOutcome::Completed(_))
        ));
    }

    /// Holds every subtree read open briefly and records the most reads in
    /// flight at once.
    struct SlowRemote {
        inner: MemoryRemoteStore,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl RemoteStore for SlowRemote {
        async fn get(&self, path: &str) -> crate::Result<Option<RemoteValue>> {
            self.inner.get(path).await
        }

        async fn children(&self, path: &str) -> crate::Result<BTreeMap<String, RemoteValue>> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            let result = self.inner.children(path).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }

        async fn set(&self, path: &str, value: RemoteValue) -> crate::Result<()> {
            self.inner.set(path, value).await
        }

        async fn remove(&self, path: &str) -> crate::Result<()> {
            self.inner.remove(path).await
        }
    }

    #[tokio::test]
    async fn jobs_around_a_vault_rotation_run_one_at_a_time() {
        let records = Arc::new(MemoryRecordStore::new());
        let settings = Arc::new(MemorySettings::new());
        VaultConfig::ensure(settings.as_ref()).unwrap();
        let remote = Arc::new(SlowRemote {
            inner: MemoryRemoteStore::new(),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        });
        let engine = Arc::new(SyncEngine::new(records, settings.clone(), remote.clone()));
        let scheduler = SyncScheduler::new(
            engine,
            SyncOptions {
                max_concurrent_runs: 4,
                ..quick()
            },
        );

        scheduler.set_online(false);
        let before = scheduler.submit(SyncRequest::default());
        tokio::task::yield_now().await;
        VaultConfig::rotate(settings.as_ref()).unwrap();
        let after = scheduler.submit(SyncRequest::forced());
        assert_ne!(before.id(), after.id());
        scheduler.set_online(true);

        assert!(matches!(
            before.wait().await,
            JobStatus::Finished(SyncOutcome::Completed(_))
        ));
        assert!(matches!(
            after.wait().await,
            JobStatus::Finished(SyncOutcome::Completed(_))
        ));
        assert_eq!(remote.max_in_flight.load(Ordering::SeqCst), 1);
    }
}
