//! One-shot job scheduler with named deferred jobs, cancellable until they fire.
//!
//! The job table maps a job name to its pending timer.  Scheduling a name
//! that is already pending replaces the old timer.  Once a timer fires the
//! entry leaves the table, so a job that has started executing can no longer
//! be cancelled and runs to completion on the worker pool.  A handler may
//! ask to run again later; the rerun is dropped when a newer job under the
//! same name is already pending.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use wb_domain::FlushJobArgs;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Traits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What the scheduler should do after a job ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Done,
    /// Run the same job again after the delay, unless a newer one is pending.
    RunAgainAfter(Duration),
}

/// Body executed when a job fires.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, args: FlushJobArgs) -> JobOutcome;
}

#[derive(thiserror::Error, Debug)]
pub enum SchedulerError {
    #[error("encoding job args: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("scheduler is shut down")]
    Closed,
}

/// Deferred job table shared by ingress and workers.
#[async_trait]
pub trait JobScheduler: Send + Sync {
    /// Create a job that runs the handler with `args` at `run_at`.
    async fn schedule_once(
        &self,
        job_name: &str,
        args: &FlushJobArgs,
        run_at: DateTime<Utc>,
    ) -> Result<(), SchedulerError>;

    /// Cancel a pending job.  Returns whether one was pending; cancelling an
    /// unknown or already fired job is not an error.
    async fn cancel(&self, job_name: &str) -> Result<bool, SchedulerError>;

    async fn is_scheduled(&self, job_name: &str) -> Result<bool, SchedulerError>;

    /// Number of jobs waiting for their fire time.
    fn pending(&self) -> usize;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TokioJobScheduler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct PendingJob {
    generation: u64,
    run_at: DateTime<Utc>,
    payload: Vec<u8>,
    timer: JoinHandle<()>,
}

/// State shared between the scheduler handle and its timer tasks.
struct Shared {
    handler: Arc<dyn JobHandler>,
    jobs: Mutex<HashMap<String, PendingJob>>,
    workers: Semaphore,
    generation: AtomicU64,
}

impl Shared {
    /// Insert a timer for `job_name`.  With `replace == false` an existing
    /// entry wins and nothing is inserted.  Returns whether a timer was set.
    fn insert(
        self: &Arc<Self>,
        job_name: &str,
        payload: Vec<u8>,
        run_at: DateTime<Utc>,
        replace: bool,
    ) -> bool {
        let delay = (run_at - Utc::now()).to_std().unwrap_or_default();

        // Hold the table lock across spawn + insert so the timer cannot fire
        // and look for its entry before it exists.
        let mut jobs = self.jobs.lock();
        if !replace && jobs.contains_key(job_name) {
            return false;
        }
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let timer = tokio::spawn(fire_after(
            self.clone(),
            job_name.to_owned(),
            generation,
            delay,
        ));

        let replaced = jobs.insert(
            job_name.to_owned(),
            PendingJob {
                generation,
                run_at,
                payload,
                timer,
            },
        );
        if let Some(old) = replaced {
            old.timer.abort();
            tracing::debug!(job = %job_name, "pending job replaced");
        }
        true
    }
}

/// In-process scheduler: one sleeping task per pending job, fired jobs run
/// on a worker pool bounded by a semaphore.
pub struct TokioJobScheduler {
    shared: Arc<Shared>,
}

impl TokioJobScheduler {
    pub fn new(handler: Arc<dyn JobHandler>, workers: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                handler,
                jobs: Mutex::new(HashMap::new()),
                workers: Semaphore::new(workers.max(1)),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Fire time of a pending job.
    pub fn run_at(&self, job_name: &str) -> Option<DateTime<Utc>> {
        self.shared.jobs.lock().get(job_name).map(|j| j.run_at)
    }

    /// Stop every timer, run the pending jobs now and wait for them, then
    /// shut the scheduler down.
    ///
    /// Used on graceful shutdown so buffered conversations are answered
    /// instead of waiting for the next inbound fragment after a restart.
    /// Afterwards `schedule_once` fails with [`SchedulerError::Closed`] and
    /// reruns requested by the final jobs are dropped.
    pub async fn fire_pending_now(&self) -> usize {
        let pending: Vec<(String, PendingJob)> = self.shared.jobs.lock().drain().collect();
        let count = pending.len();

        let mut running = Vec::with_capacity(count);
        for (name, job) in pending {
            job.timer.abort();
            running.push(tokio::spawn(execute(self.shared.clone(), name, job.payload)));
        }
        for handle in running {
            let _ = handle.await;
        }

        self.shared.workers.close();
        let leftover: Vec<PendingJob> = self.shared.jobs.lock().drain().map(|(_, j)| j).collect();
        if !leftover.is_empty() {
            tracing::info!(dropped = leftover.len(), "reruns dropped at shutdown");
        }
        for job in leftover {
            job.timer.abort();
        }
        count
    }

    pub fn is_closed(&self) -> bool {
        self.shared.workers.is_closed()
    }
}

#[async_trait]
impl JobScheduler for TokioJobScheduler {
    async fn schedule_once(
        &self,
        job_name: &str,
        args: &FlushJobArgs,
        run_at: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        if self.shared.workers.is_closed() {
            return Err(SchedulerError::Closed);
        }
        let payload = serde_json::to_vec(args)?;
        self.shared.insert(job_name, payload, run_at, true);
        Ok(())
    }

    async fn cancel(&self, job_name: &str) -> Result<bool, SchedulerError> {
        match self.shared.jobs.lock().remove(job_name) {
            Some(job) => {
                job.timer.abort();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn is_scheduled(&self, job_name: &str) -> Result<bool, SchedulerError> {
        Ok(self.shared.jobs.lock().contains_key(job_name))
    }

    fn pending(&self) -> usize {
        self.shared.jobs.lock().len()
    }
}

/// Timer task: sleep, claim the table entry, then execute.
async fn fire_after(shared: Arc<Shared>, job_name: String, generation: u64, delay: Duration) {
    tokio::time::sleep(delay).await;

    let payload = {
        let mut table = shared.jobs.lock();
        let current = table.get(&job_name).map(|j| j.generation);
        if current == Some(generation) {
            table.remove(&job_name).map(|j| j.payload)
        } else {
            // Superseded between wake-up and here.
            None
        }
    };

    if let Some(payload) = payload {
        execute(shared, job_name, payload).await;
    }
}

async fn execute(shared: Arc<Shared>, job_name: String, payload: Vec<u8>) {
    let args: FlushJobArgs = match serde_json::from_slice(&payload) {
        Ok(a) => a,
        Err(e) => {
            tracing::error!(job = %job_name, error = %e, "dropping job with malformed args");
            return;
        }
    };

    let outcome = {
        let Ok(_permit) = shared.workers.acquire().await else {
            tracing::warn!(job = %job_name, "worker pool closed, job not run");
            return;
        };
        tracing::debug!(job = %job_name, "job fired");
        shared.handler.run(args).await
    };

    if let JobOutcome::RunAgainAfter(delay) = outcome {
        if shared.workers.is_closed() {
            tracing::debug!(job = %job_name, "scheduler closed, rerun dropped");
            return;
        }
        let run_at = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        if shared.insert(&job_name, payload, run_at, false) {
            tracing::debug!(
                job = %job_name,
                delay_ms = delay.as_millis() as u64,
                "job rerun queued"
            );
        } else {
            tracing::debug!(job = %job_name, "newer job pending, rerun dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wb_domain::ConversationId;

    #[derive(Default)]
    struct Recorder {
        runs: Mutex<Vec<String>>,
        /// Ask for one rerun on the first call.
        rerun_once: Option<Duration>,
    }

    #[async_trait]
    impl JobHandler for Recorder {
        async fn run(&self, args: FlushJobArgs) -> JobOutcome {
            let mut runs = self.runs.lock();
            runs.push(args.conversation_id.to_string());
            match self.rerun_once {
                Some(delay) if runs.len() == 1 => JobOutcome::RunAgainAfter(delay),
                _ => JobOutcome::Done,
            }
        }
    }

    fn args(id: &str) -> FlushJobArgs {
        FlushJobArgs::new(ConversationId::parse(id).unwrap())
    }

    fn in_secs(secs: i64) -> DateTime<Utc> {
        Utc::now() + chrono::Duration::seconds(secs)
    }

    #[tokio::test(start_paused = true)]
    async fn job_fires_once_at_run_time() {
        let recorder = Arc::new(Recorder::default());
        let scheduler = TokioJobScheduler::new(recorder.clone(), 2);

        scheduler
            .schedule_once("flush_1", &args("1"), in_secs(5))
            .await
            .unwrap();
        assert!(scheduler.is_scheduled("flush_1").await.unwrap());

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(recorder.runs.lock().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(*recorder.runs.lock(), vec!["1".to_string()]);
        assert!(!scheduler.is_scheduled("flush_1").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_job_never_fires() {
        let recorder = Arc::new(Recorder::default());
        let scheduler = TokioJobScheduler::new(recorder.clone(), 2);

        scheduler
            .schedule_once("flush_1", &args("1"), in_secs(5))
            .await
            .unwrap();
        assert!(scheduler.cancel("flush_1").await.unwrap());
        assert!(!scheduler.cancel("flush_1").await.unwrap());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(recorder.runs.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_same_name_keeps_only_latest() {
        let recorder = Arc::new(Recorder::default());
        let scheduler = TokioJobScheduler::new(recorder.clone(), 2);

        scheduler
            .schedule_once("flush_1", &args("1"), in_secs(5))
            .await
            .unwrap();
        scheduler
            .schedule_once("flush_1", &args("1"), in_secs(8))
            .await
            .unwrap();
        assert_eq!(scheduler.pending(), 1);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(recorder.runs.lock().is_empty());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(recorder.runs.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn requested_rerun_fires_after_delay() {
        let recorder = Arc::new(Recorder {
            rerun_once: Some(Duration::from_secs(3)),
            ..Default::default()
        });
        let scheduler = TokioJobScheduler::new(recorder.clone(), 2);

        scheduler
            .schedule_once("flush_1", &args("1"), in_secs(5))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(5_100)).await;
        assert_eq!(recorder.runs.lock().len(), 1);
        assert!(scheduler.is_scheduled("flush_1").await.unwrap());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(recorder.runs.lock().len(), 2);
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rerun_yields_to_newer_job() {
        let recorder = Arc::new(Recorder {
            rerun_once: Some(Duration::from_secs(1)),
            ..Default::default()
        });
        let scheduler = Arc::new(TokioJobScheduler::new(recorder.clone(), 2));

        scheduler
            .schedule_once("flush_1", &args("1"), in_secs(5))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5_100)).await;

        // The rerun is pending for 1s; a newer schedule replaces it.
        scheduler
            .schedule_once("flush_1", &args("1"), in_secs(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(recorder.runs.lock().len(), 1);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(recorder.runs.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn fire_pending_now_runs_everything_then_closes() {
        let recorder = Arc::new(Recorder::default());
        let scheduler = TokioJobScheduler::new(recorder.clone(), 1);

        scheduler
            .schedule_once("flush_1", &args("1"), in_secs(60))
            .await
            .unwrap();
        scheduler
            .schedule_once("flush_2", &args("2"), in_secs(60))
            .await
            .unwrap();

        assert_eq!(scheduler.fire_pending_now().await, 2);
        let mut runs = recorder.runs.lock().clone();
        runs.sort();
        assert_eq!(runs, vec!["1".to_string(), "2".to_string()]);
        assert_eq!(scheduler.pending(), 0);

        assert!(scheduler.is_closed());
        let late = scheduler
            .schedule_once("flush_3", &args("3"), in_secs(5))
            .await;
        assert!(matches!(late, Err(SchedulerError::Closed)));
    }

    #[tokio::test(start_paused = true)]
    async fn reruns_requested_during_shutdown_are_dropped() {
        let recorder = Arc::new(Recorder {
            rerun_once: Some(Duration::from_secs(1)),
            ..Default::default()
        });
        let scheduler = TokioJobScheduler::new(recorder.clone(), 1);

        scheduler
            .schedule_once("flush_1", &args("1"), in_secs(60))
            .await
            .unwrap();
        scheduler.fire_pending_now().await;

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(recorder.runs.lock().len(), 1);
        assert_eq!(scheduler.pending(), 0);
    }
}
