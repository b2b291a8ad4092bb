use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::contract::ToolResult;

/// Payment methods a tenant can offer. `get_methods` filters by tenant flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    MpesaStkPush,
    MpesaC2b,
    PesapalCheckout,
}

impl PaymentMethod {
    pub fn label(&self) -> &'static str {
        match self {
            PaymentMethod::MpesaStkPush => "M-Pesa (prompt on your phone)",
            PaymentMethod::MpesaC2b => "M-Pesa Paybill",
            PaymentMethod::PesapalCheckout => "Card / bank (secure checkout link)",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RailRequest {
    pub tenant_id: String,
    pub customer_phone: String,
    pub amount_cents: i64,
    pub currency: String,
    pub reference: String,
}

/// What a rail returns on initiation: the id the conversation tracks plus a
/// human-readable next step for the customer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RailResponse {
    pub payment_request_id: String,
    pub next_step: String,
    /// Checkout URL for hosted flows, paybill details for C2B.
    pub detail: Option<String>,
}

/// Abstract payment rail. Concrete HTTP bindings live outside this crate;
/// the pipeline depends only on this contract.
#[async_trait]
pub trait PaymentRail: Send + Sync {
    async fn initiate_stk_push(&self, req: &RailRequest) -> ToolResult<RailResponse>;

    async fn c2b_instructions(&self, req: &RailRequest) -> ToolResult<RailResponse>;

    async fn create_checkout(&self, req: &RailRequest) -> ToolResult<RailResponse>;
}
