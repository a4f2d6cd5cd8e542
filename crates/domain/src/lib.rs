pub mod config;
pub mod conversation;
pub mod error;
pub mod trace;

pub use conversation::{ConversationId, FlushJobArgs, Fragment, FragmentKind};
pub use error::{Error, Result};
