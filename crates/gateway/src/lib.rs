//! wabuffer gateway: WhatsApp webhook ingress, per-conversation buffering
//! and debounced flush dispatch.

pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod runtime;
pub mod state;
pub mod whatsapp;
