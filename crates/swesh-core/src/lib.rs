//! # swesh-core
//!
//! Shared domain vocabulary for the Swesh clothing-swap backend: the
//! enumerations persisted by the store, the realtime event payloads pushed
//! to clients, and the policy constants both layers agree on.

pub mod constants;
pub mod events;
pub mod types;

pub use events::{chat_room, user_room, RealtimeEvent};
pub use types::*;
