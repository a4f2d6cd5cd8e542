//! Ingress path shared by every inbound surface: de-duplicate, buffer,
//! re-arm the debounce.  Returns as soon as the fragment is buffered.

use std::sync::Arc;
use std::time::Duration;

use wb_cache::{BufferError, BufferStore, Cache};
use wb_domain::trace::TraceEvent;
use wb_domain::{ConversationId, Fragment};

use super::debounce::DebounceScheduler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accepted {
    /// Buffered; carries the new buffer length.
    Buffered { buffered: usize },
    /// The provider redelivered a message id already seen.
    Duplicate,
}

pub struct Ingress {
    cache: Arc<dyn Cache>,
    buffers: Arc<BufferStore>,
    debounce: Arc<DebounceScheduler>,
    dedupe_ttl: Duration,
}

impl Ingress {
    pub fn new(
        cache: Arc<dyn Cache>,
        buffers: Arc<BufferStore>,
        debounce: Arc<DebounceScheduler>,
        dedupe_ttl: Duration,
    ) -> Self {
        Self {
            cache,
            buffers,
            debounce,
            dedupe_ttl,
        }
    }

    /// Buffer one fragment and (re)arm the conversation's flush.
    ///
    /// A buffer write failure is returned to the caller; the debounce is not
    /// armed in that case.
    pub async fn accept(
        &self,
        conversation: &ConversationId,
        fragment: Fragment,
    ) -> Result<Accepted, BufferError> {
        let seen_key = fragment.message_id.as_deref().map(|id| format!("seen:{id}"));

        if let Some(key) = &seen_key {
            match self.cache.add(key, b"1", self.dedupe_ttl).await {
                Ok(true) => {}
                Ok(false) => {
                    TraceEvent::DuplicateDropped {
                        conversation_id: conversation.to_string(),
                        message_id: fragment.message_id.clone().unwrap_or_default(),
                    }
                    .emit();
                    return Ok(Accepted::Duplicate);
                }
                Err(e) => {
                    // Dedupe is best-effort; the append below reports the
                    // outage if the cache is really down.
                    tracing::warn!(
                        conversation_id = %conversation,
                        error = %e,
                        "dedupe check failed"
                    );
                }
            }
        }

        let kind = fragment.kind;
        let buffered = match self.buffers.append(conversation, fragment).await {
            Ok(n) => n,
            Err(e) => {
                // Let the provider's redelivery through next time.
                if let Some(key) = &seen_key {
                    if let Err(cleanup) = self.cache.delete(key).await {
                        tracing::warn!(
                            conversation_id = %conversation,
                            key = %key,
                            error = %cleanup,
                            "dedupe key not removed after failed append"
                        );
                    }
                }
                tracing::error!(
                    conversation_id = %conversation,
                    error = %e,
                    "buffer append failed"
                );
                return Err(e);
            }
        };

        self.debounce.arm(conversation).await;

        TraceEvent::FragmentBuffered {
            conversation_id: conversation.to_string(),
            kind: kind.as_str().to_owned(),
            buffered,
        }
        .emit();
        Ok(Accepted::Buffered { buffered })
    }
}
