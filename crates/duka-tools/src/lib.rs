//! The tool contract layer.
//!
//! Tools are the only path by which classifier output can cause state
//! change. Every tool input carries `{tenant_id, request_id,
//! conversation_id}`; every body re-validates its parameters and scopes
//! every query by tenant. Errors are typed `Retryable` or `Permanent` and
//! the retry helper owns the backoff schedule.

pub mod contract;
pub mod db;
pub mod handoff;
pub mod kb;
pub mod payments;
pub mod tools;

pub use contract::{with_retry, ToolContext, ToolError, ToolResult};
pub use kb::KnowledgeStore;
pub use payments::{PaymentRail, RailRequest, RailResponse};
pub use tools::Tools;
