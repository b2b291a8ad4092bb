use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{CommerceError, Result};
use crate::types::{Offer, Order, OrderItem, OrderStatus};

/// Create a draft order from the selected items. Totals are computed here,
/// not trusted from the caller.
pub fn create_draft(
    conn: &Connection,
    tenant_id: &str,
    customer_id: &str,
    items: &[OrderItem],
) -> Result<Order> {
    if items.is_empty() {
        return Err(CommerceError::InvalidInput(
            "order needs at least one item".to_string(),
        ));
    }
    let subtotal: i64 = items
        .iter()
        .map(|i| i.unit_price_cents * i.quantity as i64)
        .sum();

    let id = Uuid::now_v7().to_string();
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO orders (id, tenant_id, customer_id, status, items,
                             subtotal_cents, total_cents, created_at, updated_at)
         VALUES (?1,?2,?3,'draft',?4,?5,?5,?6,?6)",
        params![
            id,
            tenant_id,
            customer_id,
            serde_json::to_string(items)?,
            subtotal,
            now
        ],
    )?;
    get(conn, tenant_id, &id)?.ok_or(CommerceError::NotFound { kind: "order", id })
}

pub fn get(conn: &Connection, tenant_id: &str, order_id: &str) -> Result<Option<Order>> {
    let mut stmt = conn.prepare("SELECT * FROM orders WHERE tenant_id = ?1 AND id = ?2")?;
    Ok(stmt
        .query_row(params![tenant_id, order_id], row_to_order)
        .optional()?)
}

/// Latest orders for a customer, for disambiguating "where is my order?".
pub fn list_for_customer(
    conn: &Connection,
    tenant_id: &str,
    customer_id: &str,
    limit: usize,
) -> Result<Vec<Order>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM orders WHERE tenant_id = ?1 AND customer_id = ?2
         ORDER BY created_at DESC LIMIT ?3",
    )?;
    let rows = stmt.query_map(params![tenant_id, customer_id, limit as i64], row_to_order)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

pub fn set_status(
    conn: &Connection,
    tenant_id: &str,
    order_id: &str,
    status: OrderStatus,
) -> Result<()> {
    let n = conn.execute(
        "UPDATE orders SET status = ?3, updated_at = ?4 WHERE tenant_id = ?1 AND id = ?2",
        params![
            tenant_id,
            order_id,
            status.to_string(),
            Utc::now().to_rfc3339()
        ],
    )?;
    if n == 0 {
        return Err(CommerceError::NotFound {
            kind: "order",
            id: order_id.to_string(),
        });
    }
    Ok(())
}

/// Apply a coupon to a draft order. The discount comes from the offers
/// table — never from classifier output.
pub fn apply_coupon(
    conn: &Connection,
    tenant_id: &str,
    order_id: &str,
    code: &str,
) -> Result<Order> {
    let order = get(conn, tenant_id, order_id)?.ok_or(CommerceError::NotFound {
        kind: "order",
        id: order_id.to_string(),
    })?;
    if order.status != OrderStatus::Draft {
        return Err(CommerceError::Conflict(
            "coupons apply to draft orders only".to_string(),
        ));
    }

    let offer = find_offer(conn, tenant_id, code)?.ok_or(CommerceError::NotFound {
        kind: "offer",
        id: code.to_string(),
    })?;

    let discount = match (offer.percent_off, offer.amount_off_cents) {
        (Some(pct), _) => order.subtotal_cents * pct.min(100) as i64 / 100,
        (None, Some(amount)) => amount.min(order.subtotal_cents),
        (None, None) => 0,
    };

    conn.execute(
        "UPDATE orders SET discount_cents = ?3,
                total_cents = subtotal_cents - ?3,
                coupon_code = ?4, updated_at = ?5
         WHERE tenant_id = ?1 AND id = ?2",
        params![
            tenant_id,
            order_id,
            discount,
            offer.code,
            Utc::now().to_rfc3339()
        ],
    )?;
    get(conn, tenant_id, order_id)?.ok_or(CommerceError::NotFound {
        kind: "order",
        id: order_id.to_string(),
    })
}

// ── offers ───────────────────────────────────────────────────────────────────

pub fn create_offer(
    conn: &Connection,
    tenant_id: &str,
    code: &str,
    description: &str,
    percent_off: Option<u32>,
    amount_off_cents: Option<i64>,
    expires_at: Option<&str>,
) -> Result<Offer> {
    let id = Uuid::now_v7().to_string();
    conn.execute(
        "INSERT INTO offers (id, tenant_id, code, description, percent_off,
                             amount_off_cents, expires_at, created_at)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
        params![
            id,
            tenant_id,
            code,
            description,
            percent_off,
            amount_off_cents,
            expires_at,
            Utc::now().to_rfc3339()
        ],
    )?;
    find_offer(conn, tenant_id, code)?.ok_or(CommerceError::NotFound {
        kind: "offer",
        id: code.to_string(),
    })
}

/// Active, unexpired offer by code.
pub fn find_offer(conn: &Connection, tenant_id: &str, code: &str) -> Result<Option<Offer>> {
    let mut stmt = conn.prepare(
        "SELECT id, tenant_id, code, description, percent_off, amount_off_cents,
                is_active, expires_at
         FROM offers
         WHERE tenant_id = ?1 AND code = ?2 AND is_active = 1
           AND (expires_at IS NULL OR expires_at > ?3)",
    )?;
    Ok(stmt
        .query_row(
            params![tenant_id, code, Utc::now().to_rfc3339()],
            row_to_offer,
        )
        .optional()?)
}

/// Every offer a customer could currently use. The offers subflow presents
/// only what this returns — it never invents one.
pub fn applicable_offers(conn: &Connection, tenant_id: &str) -> Result<Vec<Offer>> {
    let mut stmt = conn.prepare(
        "SELECT id, tenant_id, code, description, percent_off, amount_off_cents,
                is_active, expires_at
         FROM offers
         WHERE tenant_id = ?1 AND is_active = 1
           AND (expires_at IS NULL OR expires_at > ?2)
         ORDER BY created_at DESC",
    )?;
    let rows = stmt.query_map(params![tenant_id, Utc::now().to_rfc3339()], row_to_offer)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

fn row_to_order(row: &Row<'_>) -> rusqlite::Result<Order> {
    let status: String = row.get("status")?;
    let items: String = row.get("items")?;
    Ok(Order {
        id: row.get("id")?,
        tenant_id: row.get("tenant_id")?,
        customer_id: row.get("customer_id")?,
        status: OrderStatus::from_str(&status).unwrap_or(OrderStatus::Draft),
        items: serde_json::from_str(&items).unwrap_or_default(),
        subtotal_cents: row.get("subtotal_cents")?,
        discount_cents: row.get("discount_cents")?,
        total_cents: row.get("total_cents")?,
        coupon_code: row.get("coupon_code")?,
        created_at: row.get("created_at")?,
    })
}

fn row_to_offer(row: &Row<'_>) -> rusqlite::Result<Offer> {
    Ok(Offer {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        code: row.get(2)?,
        description: row.get(3)?,
        percent_off: row.get::<_, Option<i64>>(4)?.map(|v| v as u32),
        amount_off_cents: row.get(5)?,
        is_active: row.get::<_, i64>(6)? != 0,
        expires_at: row.get(7)?,
    })
}
