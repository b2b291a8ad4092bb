//! Conversation-side persistence: customers as known to one tenant, the
//! single live conversation per (tenant, customer), the append-only message
//! log, and the working state that drives each pipeline turn.

pub mod conversations;
pub mod customers;
pub mod db;
pub mod error;
pub mod state;
pub mod store;
pub mod types;

pub use error::{Result, SessionError};
pub use state::ConversationState;
pub use store::StateStore;
