use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tracing::instrument;

use duka_commerce::catalog::{self, SearchFilters, SearchResult};
use duka_commerce::orders;
use duka_commerce::types::{Offer, Order, OrderItem, Product, Service};
use duka_commerce::appointments;
use duka_commerce::types::{Appointment, AvailabilityWindow};
use duka_sessions::customers;
use duka_sessions::types::{Customer, PreferenceUpdate};
use duka_tenancy::crypto::SecretBox;
use duka_tenancy::types::{Tenant, TenantPersona};
use duka_tenancy::TenantStore;

use crate::contract::{ToolContext, ToolError, ToolResult};
use crate::handoff::{self, HandoffSnapshot, HandoffTicket};
use crate::kb::{KbHit, KnowledgeStore};
use crate::payments::{PaymentMethod, PaymentRail, RailRequest, RailResponse};

/// Bot persona and runtime flags as a tool output.
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub persona: TenantPersona,
    pub kb_score_threshold: Option<f64>,
    pub status_serviceable: bool,
}

/// Result of an order-status lookup that may need disambiguation.
#[derive(Debug)]
pub enum OrderLookup {
    One(Order),
    Many(Vec<Order>),
    None,
}

/// The full tool surface handed to subflows. Every method takes the
/// [`ToolContext`] and scopes its queries by `ctx.tenant_id` — there is no
/// other way in.
pub struct Tools {
    db: Arc<Mutex<Connection>>,
    tenants: Arc<TenantStore>,
    kb: Arc<KnowledgeStore>,
    rail: Arc<dyn PaymentRail>,
    crypto: Arc<SecretBox>,
}

impl Tools {
    pub fn new(
        db: Arc<Mutex<Connection>>,
        tenants: Arc<TenantStore>,
        kb: Arc<KnowledgeStore>,
        rail: Arc<dyn PaymentRail>,
        crypto: Arc<SecretBox>,
    ) -> Self {
        Self {
            db,
            tenants,
            kb,
            rail,
            crypto,
        }
    }

    pub fn kb_store(&self) -> &Arc<KnowledgeStore> {
        &self.kb
    }

    fn tenant(&self, ctx: &ToolContext) -> ToolResult<Tenant> {
        self.tenants
            .get(&ctx.tenant_id)?
            .ok_or_else(|| ToolError::NotFound("tenant".to_string()))
    }

    // ── tenant & customer ────────────────────────────────────────────────────

    pub fn tenant_get_context(&self, ctx: &ToolContext) -> ToolResult<TenantContext> {
        let tenant = self.tenant(ctx)?;
        Ok(TenantContext {
            persona: tenant.persona.clone(),
            kb_score_threshold: tenant.kb_score_threshold,
            status_serviceable: tenant.status.is_serviceable(),
        })
    }

    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id, request_id = %ctx.request_id))]
    pub fn customer_get_or_create(&self, ctx: &ToolContext, phone: &str) -> ToolResult<Customer> {
        let conn = self.db.lock().unwrap();
        Ok(customers::get_or_create(
            &conn,
            &self.crypto,
            &ctx.tenant_id,
            phone,
        )?)
    }

    /// STOP / UNSUBSCRIBE: reminder and promotional consent off, atomically.
    pub fn customer_revoke_messaging(
        &self,
        ctx: &ToolContext,
        customer_id: &str,
    ) -> ToolResult<()> {
        let conn = self.db.lock().unwrap();
        Ok(customers::revoke_messaging_consent(
            &conn,
            &ctx.tenant_id,
            customer_id,
        )?)
    }

    pub fn customer_update_preferences(
        &self,
        ctx: &ToolContext,
        customer_id: &str,
        update: &PreferenceUpdate,
    ) -> ToolResult<()> {
        let conn = self.db.lock().unwrap();
        customers::get(&conn, &ctx.tenant_id, customer_id)?
            .ok_or_else(|| ToolError::NotFound(format!("customer {}", customer_id)))?;
        Ok(customers::update_preferences(
            &conn,
            &ctx.tenant_id,
            customer_id,
            update,
        )?)
    }

    // ── catalog ──────────────────────────────────────────────────────────────

    #[instrument(skip(self, ctx, filters), fields(tenant_id = %ctx.tenant_id, request_id = %ctx.request_id))]
    pub fn catalog_search(
        &self,
        ctx: &ToolContext,
        query: &str,
        filters: &SearchFilters,
    ) -> ToolResult<SearchResult> {
        let conn = self.db.lock().unwrap();
        Ok(catalog::search(&conn, &ctx.tenant_id, query, filters)?)
    }

    pub fn catalog_get_item(&self, ctx: &ToolContext, item_id: &str) -> ToolResult<Product> {
        let conn = self.db.lock().unwrap();
        catalog::get_item(&conn, &ctx.tenant_id, item_id)?
            .ok_or_else(|| ToolError::NotFound(format!("product {}", item_id)))
    }

    pub fn service_search(&self, ctx: &ToolContext, query: &str) -> ToolResult<Vec<Service>> {
        let conn = self.db.lock().unwrap();
        Ok(catalog::search_services(&conn, &ctx.tenant_id, query)?)
    }

    // ── orders & offers ──────────────────────────────────────────────────────

    pub fn order_create(
        &self,
        ctx: &ToolContext,
        customer_id: &str,
        items: &[OrderItem],
    ) -> ToolResult<Order> {
        let conn = self.db.lock().unwrap();
        Ok(orders::create_draft(
            &conn,
            &ctx.tenant_id,
            customer_id,
            items,
        )?)
    }

    /// By order id when given, otherwise the customer's recent orders for
    /// disambiguation.
    pub fn order_get_status(
        &self,
        ctx: &ToolContext,
        order_id: Option<&str>,
        customer_id: &str,
    ) -> ToolResult<OrderLookup> {
        let conn = self.db.lock().unwrap();
        if let Some(id) = order_id {
            return Ok(match orders::get(&conn, &ctx.tenant_id, id)? {
                Some(o) if o.customer_id == customer_id => OrderLookup::One(o),
                _ => OrderLookup::None,
            });
        }
        let recent = orders::list_for_customer(&conn, &ctx.tenant_id, customer_id, 5)?;
        Ok(match recent.len() {
            0 => OrderLookup::None,
            1 => OrderLookup::One(recent.into_iter().next().expect("len checked")),
            _ => OrderLookup::Many(recent),
        })
    }

    pub fn order_apply_coupon(
        &self,
        ctx: &ToolContext,
        order_id: &str,
        code: &str,
    ) -> ToolResult<Order> {
        let conn = self.db.lock().unwrap();
        Ok(orders::apply_coupon(&conn, &ctx.tenant_id, order_id, code)?)
    }

    pub fn offers_get_applicable(&self, ctx: &ToolContext) -> ToolResult<Vec<Offer>> {
        let conn = self.db.lock().unwrap();
        Ok(orders::applicable_offers(&conn, &ctx.tenant_id)?)
    }

    // ── booking ──────────────────────────────────────────────────────────────

    pub fn availability_for_service(
        &self,
        ctx: &ToolContext,
        service_id: &str,
    ) -> ToolResult<Vec<AvailabilityWindow>> {
        let conn = self.db.lock().unwrap();
        Ok(appointments::windows_for_service(
            &conn,
            &ctx.tenant_id,
            service_id,
        )?)
    }

    pub fn book_appointment(
        &self,
        ctx: &ToolContext,
        service_id: &str,
        customer_id: &str,
        window_id: &str,
        scheduled_for: &str,
    ) -> ToolResult<Appointment> {
        let mut conn = self.db.lock().unwrap();
        Ok(appointments::book(
            &mut conn,
            &ctx.tenant_id,
            service_id,
            customer_id,
            window_id,
            scheduled_for,
        )?)
    }

    // ── payments ─────────────────────────────────────────────────────────────

    pub fn payment_get_methods(&self, ctx: &ToolContext) -> ToolResult<Vec<PaymentMethod>> {
        let tenant = self.tenant(ctx)?;
        if !tenant.persona.payments_enabled {
            return Ok(Vec::new());
        }
        Ok(vec![
            PaymentMethod::MpesaStkPush,
            PaymentMethod::MpesaC2b,
            PaymentMethod::PesapalCheckout,
        ])
    }

    fn rail_request(
        &self,
        ctx: &ToolContext,
        customer_phone: &str,
        amount_cents: i64,
    ) -> ToolResult<RailRequest> {
        if amount_cents <= 0 {
            return Err(ToolError::Permanent(
                "payment amount must be positive".to_string(),
            ));
        }
        Ok(RailRequest {
            tenant_id: ctx.tenant_id.clone(),
            customer_phone: customer_phone.to_string(),
            amount_cents,
            currency: "KES".to_string(),
            reference: ctx.request_id.clone(),
        })
    }

    pub async fn payment_initiate_stk_push(
        &self,
        ctx: &ToolContext,
        customer_phone: &str,
        amount_cents: i64,
    ) -> ToolResult<RailResponse> {
        let req = self.rail_request(ctx, customer_phone, amount_cents)?;
        self.rail.initiate_stk_push(&req).await
    }

    pub async fn payment_get_c2b_instructions(
        &self,
        ctx: &ToolContext,
        customer_phone: &str,
        amount_cents: i64,
    ) -> ToolResult<RailResponse> {
        let req = self.rail_request(ctx, customer_phone, amount_cents)?;
        self.rail.c2b_instructions(&req).await
    }

    pub async fn payment_create_pesapal_checkout(
        &self,
        ctx: &ToolContext,
        customer_phone: &str,
        amount_cents: i64,
    ) -> ToolResult<RailResponse> {
        let req = self.rail_request(ctx, customer_phone, amount_cents)?;
        self.rail.create_checkout(&req).await
    }

    // ── knowledge & handoff ──────────────────────────────────────────────────

    pub fn kb_retrieve(&self, ctx: &ToolContext, query: &str, k: usize) -> ToolResult<Vec<KbHit>> {
        self.kb.retrieve(
            &ctx.tenant_id,
            &KnowledgeStore::namespace(&ctx.tenant_id),
            query,
            k,
        )
    }

    pub fn handoff_create_ticket(
        &self,
        ctx: &ToolContext,
        customer_id: &str,
        reason: &str,
        snapshot: &HandoffSnapshot,
    ) -> ToolResult<HandoffTicket> {
        let tenant = self.tenant(ctx)?;
        let conn = self.db.lock().unwrap();
        handoff::create_ticket(
            &conn,
            ctx,
            customer_id,
            reason,
            snapshot,
            &tenant.persona.handoff_policy,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct NoopRail;

    #[async_trait]
    impl PaymentRail for NoopRail {
        async fn initiate_stk_push(&self, req: &RailRequest) -> ToolResult<RailResponse> {
            Ok(RailResponse {
                payment_request_id: format!("stk-{}", req.reference),
                next_step: "Enter your M-Pesa PIN on the prompt".into(),
                detail: None,
            })
        }
        async fn c2b_instructions(&self, req: &RailRequest) -> ToolResult<RailResponse> {
            Ok(RailResponse {
                payment_request_id: format!("c2b-{}", req.reference),
                next_step: "Pay via Paybill".into(),
                detail: Some("Paybill 123456, account DUKA".into()),
            })
        }
        async fn create_checkout(&self, req: &RailRequest) -> ToolResult<RailResponse> {
            Ok(RailResponse {
                payment_request_id: format!("pp-{}", req.reference),
                next_step: "Complete payment at the link".into(),
                detail: Some("https://pay.example/checkout".into()),
            })
        }
    }

    fn setup() -> (Tools, ToolContext) {
        let conn = Connection::open_in_memory().unwrap();
        duka_tenancy::db::init_db(&conn).unwrap();
        duka_sessions::db::init_db(&conn).unwrap();
        duka_commerce::db::init_db(&conn).unwrap();
        crate::db::init_db(&conn).unwrap();

        let db = Arc::new(Mutex::new(conn));
        let crypto = Arc::new(SecretBox::new(&[8u8; 32]).unwrap());
        let tenants = Arc::new(TenantStore::new(Arc::clone(&db), Arc::clone(&crypto)));
        let tenant = tenants
            .create(duka_tenancy::tenants::NewTenant {
                name: "Acme".into(),
                slug: "acme".into(),
                sender_number: "+254700000100".into(),
                account_sid: "AC1".into(),
                auth_token: "tok".into(),
                webhook_secret: "sec".into(),
                timezone: "Africa/Nairobi".into(),
                utc_offset_minutes: 180,
            })
            .unwrap();
        let kb = Arc::new(KnowledgeStore::new(Arc::clone(&db)));
        let tools = Tools::new(db, tenants, kb, Arc::new(NoopRail), crypto);
        let ctx = ToolContext::new(&tenant.id, "req-1", "conv-1");
        (tools, ctx)
    }

    #[test]
    fn cross_tenant_item_reads_are_not_found() {
        let (tools, ctx) = setup();
        {
            let conn = tools.db.lock().unwrap();
            catalog::create_product(&conn, "other-tenant", "Phone", "", None, 100).unwrap();
        }
        let search = tools
            .catalog_search(&ctx, "Phone", &SearchFilters::default())
            .unwrap();
        assert_eq!(search.total_estimate, 0);
    }

    #[test]
    fn order_status_disambiguates() {
        let (tools, ctx) = setup();
        let customer = tools.customer_get_or_create(&ctx, "+254711000001").unwrap();
        let item = vec![OrderItem {
            item_id: "p1".into(),
            name: "X".into(),
            quantity: 1,
            unit_price_cents: 100,
        }];
        tools.order_create(&ctx, &customer.id, &item).unwrap();
        tools.order_create(&ctx, &customer.id, &item).unwrap();

        match tools.order_get_status(&ctx, None, &customer.id).unwrap() {
            OrderLookup::Many(list) => assert_eq!(list.len(), 2),
            _ => panic!("expected disambiguation"),
        }
    }

    #[test]
    fn order_of_other_customer_is_hidden() {
        let (tools, ctx) = setup();
        let a = tools.customer_get_or_create(&ctx, "+254711000001").unwrap();
        let b = tools.customer_get_or_create(&ctx, "+254711000002").unwrap();
        let order = tools
            .order_create(
                &ctx,
                &a.id,
                &[OrderItem {
                    item_id: "p1".into(),
                    name: "X".into(),
                    quantity: 1,
                    unit_price_cents: 100,
                }],
            )
            .unwrap();
        match tools
            .order_get_status(&ctx, Some(&order.id), &b.id)
            .unwrap()
        {
            OrderLookup::None => {}
            _ => panic!("cross-customer order leak"),
        }
    }

    #[tokio::test]
    async fn payment_tools_return_request_id_and_next_step() {
        let (tools, ctx) = setup();
        let methods = tools.payment_get_methods(&ctx).unwrap();
        assert_eq!(methods.len(), 3);

        let resp = tools
            .payment_initiate_stk_push(&ctx, "+254711000001", 50_000)
            .await
            .unwrap();
        assert!(resp.payment_request_id.starts_with("stk-"));
        assert!(!resp.next_step.is_empty());
    }

    #[tokio::test]
    async fn zero_amount_payment_rejected() {
        let (tools, ctx) = setup();
        let err = tools
            .payment_initiate_stk_push(&ctx, "+254711000001", 0)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Permanent(_)));
    }
}
