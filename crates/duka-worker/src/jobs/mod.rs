//! Job bodies. Each implements [`crate::JobHandler`]; all persistent
//! mutations inside a body either go through one transaction or are
//! idempotent under the engine's retry policy.

pub mod process_message;
pub mod reminders;
pub mod summarize;

pub use process_message::{Pipeline, PipelineSettings, ProcessInboundMessage};
pub use reminders::{schedule_reminder, AppointmentReminder};
pub use summarize::SummarizeConversation;
