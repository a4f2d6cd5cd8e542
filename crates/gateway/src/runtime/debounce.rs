//! Debounce scheduler: keeps at most one pending flush per conversation and
//! pushes it back every time a new fragment arrives.
//!
//! The pending job only lives in this process, so every arm also records a
//! token in the shared [`ArmRegistry`].  A job armed here and then overtaken
//! by an arm in another process sees a different token when it fires and
//! steps aside.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use wb_cache::ArmRegistry;
use wb_domain::trace::TraceEvent;
use wb_domain::{ConversationId, FlushJobArgs};

use super::scheduler::{JobScheduler, SchedulerError};

pub struct DebounceScheduler {
    scheduler: Arc<dyn JobScheduler>,
    arms: Arc<ArmRegistry>,
    delay: Duration,
}

impl DebounceScheduler {
    pub fn new(scheduler: Arc<dyn JobScheduler>, arms: Arc<ArmRegistry>, delay: Duration) -> Self {
        Self {
            scheduler,
            arms,
            delay,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// (Re)arm the flush for a conversation with the configured delay.
    pub async fn arm(&self, conversation: &ConversationId) {
        self.arm_with_delay(conversation, self.delay).await;
    }

    /// Cancel any pending flush and schedule a new one `delay` from now.
    ///
    /// Failures are logged and swallowed: the fragment is already buffered
    /// and the next inbound fragment re-arms.  Cancel and schedule are two
    /// separate steps, so a job firing between them can still run; the flush
    /// coordinator is safe against that.
    pub async fn arm_with_delay(&self, conversation: &ConversationId, delay: Duration) {
        if let Err(e) = self.try_arm(conversation, delay).await {
            tracing::warn!(
                conversation_id = %conversation,
                error = %e,
                "failed to arm flush job"
            );
        }
    }

    async fn try_arm(
        &self,
        conversation: &ConversationId,
        delay: Duration,
    ) -> Result<(), SchedulerError> {
        let job_name = conversation.flush_job_name();

        let mut args = FlushJobArgs::new(conversation.clone());
        match self.arms.record(conversation).await {
            Ok(token) => args = args.with_arm_token(token),
            Err(e) => {
                // A job without a token skips the marker check.
                tracing::warn!(
                    conversation_id = %conversation,
                    error = %e,
                    "arm marker not recorded"
                );
            }
        }

        // Idempotent: a missing job is fine.
        self.scheduler.cancel(&job_name).await?;

        let run_at = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        self.scheduler.schedule_once(&job_name, &args, run_at).await?;

        TraceEvent::FlushArmed {
            conversation_id: conversation.to_string(),
            job_name,
            delay_ms: delay.as_millis() as u64,
        }
        .emit();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::DateTime;
    use parking_lot::Mutex;
    use wb_cache::{Cache, MemoryCache};

    /// Records every call and optionally fails `schedule_once`.
    #[derive(Default)]
    struct ScriptedScheduler {
        calls: Mutex<Vec<String>>,
        tokens: Mutex<Vec<Option<String>>>,
        fail_schedule: bool,
    }

    fn arms(cache: Arc<dyn Cache>) -> Arc<ArmRegistry> {
        Arc::new(ArmRegistry::new(cache, Duration::from_secs(300)))
    }

    #[async_trait]
    impl JobScheduler for ScriptedScheduler {
        async fn schedule_once(
            &self,
            job_name: &str,
            args: &FlushJobArgs,
            _run_at: DateTime<Utc>,
        ) -> Result<(), SchedulerError> {
            if self.fail_schedule {
                return Err(SchedulerError::Closed);
            }
            self.calls
                .lock()
                .push(format!("schedule {job_name} {}", args.conversation_id));
            self.tokens.lock().push(args.arm_token.clone());
            Ok(())
        }

        async fn cancel(&self, job_name: &str) -> Result<bool, SchedulerError> {
            self.calls.lock().push(format!("cancel {job_name}"));
            Ok(false)
        }

        async fn is_scheduled(&self, _job_name: &str) -> Result<bool, SchedulerError> {
            Ok(false)
        }

        fn pending(&self) -> usize {
            0
        }
    }

    #[tokio::test]
    async fn arm_cancels_then_schedules_under_flush_name() {
        let scheduler = Arc::new(ScriptedScheduler::default());
        let arms = arms(Arc::new(MemoryCache::new()));
        let debounce =
            DebounceScheduler::new(scheduler.clone(), arms.clone(), Duration::from_secs(5));
        let conv = ConversationId::parse("5511").unwrap();

        debounce.arm(&conv).await;

        assert_eq!(
            *scheduler.calls.lock(),
            vec!["cancel flush_5511".to_string(), "schedule flush_5511 5511".to_string()]
        );
        // The job carries the token now held by the shared marker.
        let current = arms.current(&conv).await.unwrap();
        assert!(current.is_some());
        assert_eq!(scheduler.tokens.lock()[0], current);
    }

    #[tokio::test]
    async fn each_arm_supersedes_the_previous_token() {
        let scheduler = Arc::new(ScriptedScheduler::default());
        let arms = arms(Arc::new(MemoryCache::new()));
        let debounce =
            DebounceScheduler::new(scheduler.clone(), arms.clone(), Duration::from_secs(5));
        let conv = ConversationId::parse("5511").unwrap();

        debounce.arm(&conv).await;
        debounce.arm(&conv).await;

        let tokens = scheduler.tokens.lock().clone();
        assert_ne!(tokens[0], tokens[1]);
        assert_eq!(arms.current(&conv).await.unwrap(), tokens[1]);
    }

    #[tokio::test]
    async fn scheduling_failure_is_swallowed() {
        let scheduler = Arc::new(ScriptedScheduler {
            fail_schedule: true,
            ..Default::default()
        });
        let debounce = DebounceScheduler::new(
            scheduler.clone(),
            arms(Arc::new(MemoryCache::new())),
            Duration::from_secs(5),
        );

        // Must not panic or propagate.
        debounce.arm(&ConversationId::parse("5511").unwrap()).await;
        assert_eq!(*scheduler.calls.lock(), vec!["cancel flush_5511".to_string()]);
    }
}
