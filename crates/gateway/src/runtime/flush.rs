//! Flush coordinator: the body of every fired flush job.
//!
//! One run: take the conversation lock (try-only), confirm the job is still
//! the latest arm, drain the buffer, process the batch once, dispatch the
//! reply, release the lock.  Every failure is logged and reported as a
//! [`FlushOutcome`]; nothing propagates out, and the lock is released on
//! every path including a panic in processing.
//!
//! A fired job that finds the lock held or its arm superseded asks the
//! scheduler to run it again one debounce delay later, so fragments that
//! arrived during a slow flush are not left in the buffer without a job.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::FutureExt;
use serde::Serialize;

use wb_cache::{ArmRegistry, BufferStore, ConversationLock};
use wb_domain::trace::TraceEvent;
use wb_domain::{ConversationId, FlushJobArgs};

use super::dispatch::ReplySender;
use super::history::{HistoryEntry, HistoryStore};
use super::processing::{ConversationContext, ProcessOutcome, ProcessingError, Processor};
use super::scheduler::{JobHandler, JobOutcome};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FlushOutcome {
    /// Another run holds the lock; this fire was a no-op.
    Busy,
    /// A later arm replaced this job's; the buffer was left for that job.
    Superseded,
    /// Lock taken but nothing was buffered.
    Empty,
    Processed { batch: usize, replied: bool },
    /// Processing failed or timed out; the batch was dropped.
    ProcessingFailed { batch: usize },
    /// Processing succeeded but the reply could not be sent.
    DispatchFailed { batch: usize },
    /// Lock or buffer access failed, or processing panicked.
    Failed { reason: String },
}

impl FlushOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Busy => "busy",
            Self::Superseded => "superseded",
            Self::Empty => "empty",
            Self::Processed { .. } => "processed",
            Self::ProcessingFailed { .. } => "processing_failed",
            Self::DispatchFailed { .. } => "dispatch_failed",
            Self::Failed { .. } => "failed",
        }
    }

    pub fn batch(&self) -> usize {
        match self {
            Self::Processed { batch, .. }
            | Self::ProcessingFailed { batch }
            | Self::DispatchFailed { batch } => *batch,
            _ => 0,
        }
    }
}

pub struct FlushCoordinator {
    buffers: Arc<BufferStore>,
    lock: Arc<ConversationLock>,
    arms: Arc<ArmRegistry>,
    processor: Arc<dyn Processor>,
    sender: Arc<dyn ReplySender>,
    history: Arc<dyn HistoryStore>,
    history_limit: usize,
    processing_timeout: Duration,
    retry_delay: Duration,
}

impl FlushCoordinator {
    pub fn new(
        buffers: Arc<BufferStore>,
        lock: Arc<ConversationLock>,
        arms: Arc<ArmRegistry>,
        processor: Arc<dyn Processor>,
        sender: Arc<dyn ReplySender>,
        history: Arc<dyn HistoryStore>,
    ) -> Self {
        Self {
            buffers,
            lock,
            arms,
            processor,
            sender,
            history,
            history_limit: 20,
            processing_timeout: Duration::from_secs(30),
            retry_delay: Duration::from_secs(5),
        }
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn with_processing_timeout(mut self, timeout: Duration) -> Self {
        self.processing_timeout = timeout;
        self
    }

    /// Delay before a busy or superseded job runs again.  Normally the
    /// debounce delay.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Run one flush for the conversation regardless of arm markers.
    pub async fn flush(&self, conversation: &ConversationId) -> FlushOutcome {
        self.flush_with(conversation, None).await
    }

    /// Run the flush a scheduled job stands for.  A job whose arm token no
    /// longer matches the shared marker is [`FlushOutcome::Superseded`].
    pub async fn flush_armed(&self, args: &FlushJobArgs) -> FlushOutcome {
        self.flush_with(&args.conversation_id, args.arm_token.as_deref()).await
    }

    async fn flush_with(
        &self,
        conversation: &ConversationId,
        arm_token: Option<&str>,
    ) -> FlushOutcome {
        let started = Instant::now();

        let guard = match self.lock.try_acquire(conversation).await {
            Ok(Some(guard)) => guard,
            Ok(None) => {
                tracing::debug!(conversation_id = %conversation, "flush skipped, lock held");
                return FlushOutcome::Busy;
            }
            Err(e) => {
                tracing::error!(
                    conversation_id = %conversation,
                    error = %e,
                    "flush aborted, lock unavailable"
                );
                return FlushOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        let outcome = match AssertUnwindSafe(self.run_locked(conversation, arm_token))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                tracing::error!(
                    conversation_id = %conversation,
                    panic = %reason,
                    "flush panicked"
                );
                FlushOutcome::Failed { reason }
            }
        };

        if let Err(e) = guard.release().await {
            // The lock TTL bounds how long this leaks.
            tracing::warn!(conversation_id = %conversation, error = %e, "lock release failed");
        }

        TraceEvent::FlushCompleted {
            conversation_id: conversation.to_string(),
            outcome: outcome.label().to_owned(),
            batch: outcome.batch(),
            duration_ms: started.elapsed().as_millis() as u64,
        }
        .emit();
        outcome
    }

    async fn run_locked(
        &self,
        conversation: &ConversationId,
        arm_token: Option<&str>,
    ) -> FlushOutcome {
        if let Some(token) = arm_token {
            match self.arms.current(conversation).await {
                Ok(Some(current)) if current != token => {
                    tracing::debug!(
                        conversation_id = %conversation,
                        "flush superseded by a later arm"
                    );
                    return FlushOutcome::Superseded;
                }
                Ok(Some(_)) => {
                    if let Err(e) = self.arms.clear(conversation, token).await {
                        tracing::warn!(
                            conversation_id = %conversation,
                            error = %e,
                            "arm marker not cleared"
                        );
                    }
                }
                // Expired, or cleared by an unconditional flush.
                Ok(None) => {}
                Err(e) => {
                    // The lock still serializes runs; proceed.
                    tracing::warn!(
                        conversation_id = %conversation,
                        error = %e,
                        "arm marker unreadable"
                    );
                }
            }
        }

        let batch = match self.buffers.drain(conversation).await {
            Ok(batch) => batch,
            Err(e) => {
                tracing::error!(conversation_id = %conversation, error = %e, "drain failed");
                return FlushOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };
        if batch.is_empty() {
            tracing::debug!(conversation_id = %conversation, "nothing buffered");
            return FlushOutcome::Empty;
        }
        let size = batch.len();

        let history = match self.history.recent(conversation, self.history_limit).await {
            Ok(h) => h,
            Err(e) => {
                tracing::warn!(conversation_id = %conversation, error = %e, "history unavailable");
                Vec::new()
            }
        };
        let ctx = ConversationContext::new(conversation.clone(), batch, history);

        let processed = tokio::time::timeout(self.processing_timeout, self.processor.process(&ctx))
            .await
            .unwrap_or(Err(ProcessingError::Timeout(self.processing_timeout)));
        let outcome = match processed {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(
                    conversation_id = %conversation,
                    batch = size,
                    error = %e,
                    "processing failed, batch dropped"
                );
                return FlushOutcome::ProcessingFailed { batch: size };
            }
        };

        let mut entries: Vec<HistoryEntry> = ctx
            .messages
            .iter()
            .map(|m| HistoryEntry::user(m.clone()))
            .collect();

        let result = match outcome {
            ProcessOutcome::Reply(reply) => {
                entries.push(HistoryEntry::assistant(reply.text.clone()));
                match self.sender.send(conversation, &reply).await {
                    Ok(()) => {
                        TraceEvent::ReplyDispatched {
                            conversation_id: conversation.to_string(),
                            chars: reply.text.chars().count(),
                        }
                        .emit();
                        FlushOutcome::Processed {
                            batch: size,
                            replied: true,
                        }
                    }
                    Err(e) => {
                        tracing::error!(
                            conversation_id = %conversation,
                            batch = size,
                            error = %e,
                            "reply dispatch failed"
                        );
                        FlushOutcome::DispatchFailed { batch: size }
                    }
                }
            }
            ProcessOutcome::Escalate { reason } => {
                tracing::warn!(
                    conversation_id = %conversation,
                    reason = %reason,
                    "escalated to operator"
                );
                TraceEvent::Escalated {
                    conversation_id: conversation.to_string(),
                    reason,
                }
                .emit();
                FlushOutcome::Processed {
                    batch: size,
                    replied: false,
                }
            }
            ProcessOutcome::NoReply => FlushOutcome::Processed {
                batch: size,
                replied: false,
            },
        };

        // Recorded even when dispatch failed: the user did say it.
        if let Err(e) = self.history.append(conversation, entries).await {
            tracing::warn!(conversation_id = %conversation, error = %e, "history append failed");
        }
        result
    }
}

#[async_trait]
impl JobHandler for FlushCoordinator {
    async fn run(&self, args: FlushJobArgs) -> JobOutcome {
        match self.flush_armed(&args).await {
            FlushOutcome::Busy | FlushOutcome::Superseded => {
                JobOutcome::RunAgainAfter(self.retry_delay)
            }
            _ => JobOutcome::Done,
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::dispatch::{DispatchError, LogSender};
    use crate::runtime::history::{MemoryHistoryStore, Role};
    use crate::runtime::processing::{ProcessingError, ReplyPayload};
    use parking_lot::Mutex;
    use wb_cache::{Cache, MemoryCache};
    use wb_domain::Fragment;

    enum Behaviour {
        Reply,
        Fail,
        Panic,
        Hang,
    }

    struct ScriptedProcessor {
        behaviour: Behaviour,
        seen: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedProcessor {
        fn new(behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                behaviour,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Processor for ScriptedProcessor {
        async fn process(
            &self,
            ctx: &ConversationContext,
        ) -> Result<ProcessOutcome, ProcessingError> {
            self.seen.lock().push(ctx.messages.clone());
            match self.behaviour {
                Behaviour::Reply => Ok(ProcessOutcome::Reply(ReplyPayload {
                    text: "ok".into(),
                })),
                Behaviour::Fail => Err(ProcessingError::Other("model offline".into())),
                Behaviour::Panic => panic!("processor blew up"),
                Behaviour::Hang => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
            }
        }
    }

    struct FailingSender;

    #[async_trait]
    impl ReplySender for FailingSender {
        async fn send(&self, _: &ConversationId, _: &ReplyPayload) -> Result<(), DispatchError> {
            Err(DispatchError::Rejected {
                status: 500,
                body: "boom".into(),
            })
        }
    }

    struct Harness {
        buffers: Arc<BufferStore>,
        lock: Arc<ConversationLock>,
        arms: Arc<ArmRegistry>,
        history: Arc<MemoryHistoryStore>,
        coordinator: FlushCoordinator,
    }

    fn harness(processor: Arc<dyn Processor>, sender: Arc<dyn ReplySender>) -> Harness {
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
        let buffers = Arc::new(BufferStore::new(cache.clone(), Duration::from_secs(300)));
        let lock = Arc::new(ConversationLock::new(cache.clone(), Duration::from_secs(60)));
        let arms = Arc::new(ArmRegistry::new(cache, Duration::from_secs(300)));
        let history = Arc::new(MemoryHistoryStore::new(50));
        let coordinator = FlushCoordinator::new(
            buffers.clone(),
            lock.clone(),
            arms.clone(),
            processor,
            sender,
            history.clone(),
        )
        .with_processing_timeout(Duration::from_secs(5))
        .with_retry_delay(Duration::from_secs(5));
        Harness {
            buffers,
            lock,
            arms,
            history,
            coordinator,
        }
    }

    fn conv() -> ConversationId {
        ConversationId::parse("5511999990000").unwrap()
    }

    async fn buffer(h: &Harness, messages: &[&str]) {
        for m in messages {
            h.buffers.append(&conv(), Fragment::text(*m)).await.unwrap();
        }
    }

    #[tokio::test]
    async fn processes_batch_once_and_records_history() {
        let processor = ScriptedProcessor::new(Behaviour::Reply);
        let h = harness(processor.clone(), Arc::new(LogSender));
        buffer(&h, &["Hi", "I need help", "with my order"]).await;

        let outcome = h.coordinator.flush(&conv()).await;

        assert_eq!(outcome, FlushOutcome::Processed { batch: 3, replied: true });
        assert_eq!(
            *processor.seen.lock(),
            vec![vec!["Hi".to_string(), "I need help".into(), "with my order".into()]]
        );
        assert_eq!(h.buffers.peek_length(&conv()).await.unwrap(), 0);
        assert!(!h.lock.is_locked(&conv()).await.unwrap());

        let history = h.history.recent(&conv(), 10).await.unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(history[3].role, Role::Assistant);
    }

    #[tokio::test]
    async fn empty_buffer_is_a_silent_no_op() {
        let processor = ScriptedProcessor::new(Behaviour::Reply);
        let h = harness(processor.clone(), Arc::new(LogSender));

        assert_eq!(h.coordinator.flush(&conv()).await, FlushOutcome::Empty);
        assert!(processor.seen.lock().is_empty());
        assert!(!h.lock.is_locked(&conv()).await.unwrap());
    }

    #[tokio::test]
    async fn held_lock_means_busy_and_buffer_untouched() {
        let processor = ScriptedProcessor::new(Behaviour::Reply);
        let h = harness(processor.clone(), Arc::new(LogSender));
        buffer(&h, &["Hi"]).await;

        let guard = h.lock.try_acquire(&conv()).await.unwrap().unwrap();
        assert_eq!(h.coordinator.flush(&conv()).await, FlushOutcome::Busy);
        assert_eq!(h.buffers.peek_length(&conv()).await.unwrap(), 1);
        assert!(processor.seen.lock().is_empty());

        guard.release().await.unwrap();
    }

    #[tokio::test]
    async fn busy_job_asks_to_run_again() {
        let processor = ScriptedProcessor::new(Behaviour::Reply);
        let h = harness(processor.clone(), Arc::new(LogSender));
        buffer(&h, &["Hi"]).await;
        let guard = h.lock.try_acquire(&conv()).await.unwrap().unwrap();

        let outcome = JobHandler::run(&h.coordinator, FlushJobArgs::new(conv())).await;

        assert_eq!(outcome, JobOutcome::RunAgainAfter(Duration::from_secs(5)));
        assert_eq!(h.buffers.peek_length(&conv()).await.unwrap(), 1);
        guard.release().await.unwrap();
    }

    #[tokio::test]
    async fn superseded_job_leaves_buffer_for_latest_arm() {
        let processor = ScriptedProcessor::new(Behaviour::Reply);
        let h = harness(processor.clone(), Arc::new(LogSender));
        buffer(&h, &["Hi", "there"]).await;
        let stale = h.arms.record(&conv()).await.unwrap();
        let latest = h.arms.record(&conv()).await.unwrap();

        let stale_job = FlushJobArgs::new(conv()).with_arm_token(stale);
        assert_eq!(h.coordinator.flush_armed(&stale_job).await, FlushOutcome::Superseded);
        assert!(processor.seen.lock().is_empty());
        assert_eq!(h.buffers.peek_length(&conv()).await.unwrap(), 2);
        assert!(!h.lock.is_locked(&conv()).await.unwrap());
        assert_eq!(
            JobHandler::run(&h.coordinator, stale_job).await,
            JobOutcome::RunAgainAfter(Duration::from_secs(5))
        );

        let latest_job = FlushJobArgs::new(conv()).with_arm_token(latest);
        assert_eq!(
            h.coordinator.flush_armed(&latest_job).await,
            FlushOutcome::Processed { batch: 2, replied: true }
        );
        assert!(h.arms.current(&conv()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn processing_failure_drops_batch_and_releases_lock() {
        let h = harness(ScriptedProcessor::new(Behaviour::Fail), Arc::new(LogSender));
        buffer(&h, &["Hi", "there"]).await;

        let outcome = h.coordinator.flush(&conv()).await;

        assert_eq!(outcome, FlushOutcome::ProcessingFailed { batch: 2 });
        assert_eq!(h.buffers.peek_length(&conv()).await.unwrap(), 0);
        assert!(!h.lock.is_locked(&conv()).await.unwrap());
        assert!(h.history.recent(&conv(), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dispatch_failure_is_reported_and_lock_released() {
        let h = harness(ScriptedProcessor::new(Behaviour::Reply), Arc::new(FailingSender));
        buffer(&h, &["Hi"]).await;

        assert_eq!(
            h.coordinator.flush(&conv()).await,
            FlushOutcome::DispatchFailed { batch: 1 }
        );
        assert!(!h.lock.is_locked(&conv()).await.unwrap());
    }

    #[tokio::test]
    async fn panic_in_processing_still_releases_lock() {
        let h = harness(ScriptedProcessor::new(Behaviour::Panic), Arc::new(LogSender));
        buffer(&h, &["Hi"]).await;

        let outcome = h.coordinator.flush(&conv()).await;

        assert!(
            matches!(outcome, FlushOutcome::Failed { ref reason } if reason.contains("blew up"))
        );
        assert!(!h.lock.is_locked(&conv()).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn hung_processor_times_out() {
        let h = harness(ScriptedProcessor::new(Behaviour::Hang), Arc::new(LogSender));
        buffer(&h, &["Hi"]).await;

        let outcome = h.coordinator.flush(&conv()).await;

        assert_eq!(outcome, FlushOutcome::ProcessingFailed { batch: 1 });
        assert!(!h.lock.is_locked(&conv()).await.unwrap());
        assert_eq!(h.buffers.peek_length(&conv()).await.unwrap(), 0);
    }

    #[test]
    fn outcome_serializes_with_tag() {
        let json = serde_json::to_value(FlushOutcome::Processed {
            batch: 2,
            replied: true,
        })
        .unwrap();
        assert_eq!(json["outcome"], "processed");
        assert_eq!(json["batch"], 2);
    }
}
