//! Generation sessions and conversation memory.
//!
//! # Architecture
//!
//! - [`SessionCache`]: bounded, expiring cache keyed by `(app id, variant)`
//! - [`GenerationSession`]: a bound [`ModelClient`](crate::llm::ModelClient)
//!   plus its memory window
//! - [`ChatMemoryStore`] / [`MessageWindowMemory`]: conversation storage
//!   keyed by app id

mod cache;
mod memory;

pub use cache::{
    DEFAULT_IDLE_TIMEOUT, DEFAULT_MAX_AGE, DEFAULT_MAX_ENTRIES, GenerationSession, ModelDrivers,
    SessionCache, SessionSettings,
};
pub use memory::{ChatMemoryStore, MessageWindowMemory};
