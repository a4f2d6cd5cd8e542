use serde::Serialize;

/// Structured trace events emitted across all wabuffer crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    FragmentBuffered {
        conversation_id: String,
        kind: String,
        buffered: usize,
    },
    FlushArmed {
        conversation_id: String,
        job_name: String,
        delay_ms: u64,
    },
    FlushCompleted {
        conversation_id: String,
        outcome: String,
        batch: usize,
        duration_ms: u64,
    },
    ReplyDispatched {
        conversation_id: String,
        chars: usize,
    },
    Escalated {
        conversation_id: String,
        reason: String,
    },
    DuplicateDropped {
        conversation_id: String,
        message_id: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "wb_event");
    }
}
