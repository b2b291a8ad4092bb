//! Outbound side of the pipeline: turn a [`duka_journey::BotAction`] into
//! WhatsApp payloads, gate on consent / quiet hours / the daily ceiling,
//! and deliver through the tenant's gateway client with retries and an
//! idempotency key per (conversation, turn, payload).

pub mod consent;
pub mod delivery;
pub mod error;
pub mod format;
pub mod limits;
pub mod quiet;

pub use delivery::{Deliverer, DeliveryReceipt, WaGateway};
pub use error::DeliveryError;
pub use format::{to_payloads, WaPayload};
