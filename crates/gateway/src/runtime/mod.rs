//! Buffering runtime: the path from an accepted fragment to a dispatched
//! reply.
//!
//! [`ingress::Ingress`] buffers each fragment and re-arms the conversation's
//! debounce through [`debounce::DebounceScheduler`].  When the conversation
//! goes quiet the [`scheduler::TokioJobScheduler`] fires the pending job,
//! whose body is [`flush::FlushCoordinator`]: lock, drain, process once,
//! dispatch, release.

pub mod debounce;
pub mod dispatch;
pub mod flush;
pub mod history;
pub mod ingress;
pub mod processing;
pub mod scheduler;

pub use debounce::DebounceScheduler;
pub use dispatch::{DispatchError, LogSender, ReplySender, WhatsAppCloudSender};
pub use flush::{FlushCoordinator, FlushOutcome};
pub use history::{HistoryEntry, HistoryStore, MemoryHistoryStore, Role};
pub use ingress::{Accepted, Ingress};
pub use processing::{
    ConversationContext, EchoProcessor, HttpProcessor, ProcessOutcome, ProcessingError,
    Processor, ReplyPayload,
};
pub use scheduler::{JobHandler, JobScheduler, SchedulerError, TokioJobScheduler};
