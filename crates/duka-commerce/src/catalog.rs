use std::collections::BTreeMap;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::error::{CommerceError, Result};
use crate::types::{Product, Service};

/// WhatsApp shortlist hard cap — a search result never carries more.
pub const MAX_SHORTLIST: usize = 6;

pub struct SearchResult {
    pub items: Vec<Product>,
    /// Estimated total matches (exact COUNT over the same predicate).
    pub total_estimate: u64,
}

/// Structured filters extracted from slots. Unknown keys are ignored by the
/// caller before they reach here.
#[derive(Debug, Default, Clone)]
pub struct SearchFilters {
    pub category: Option<String>,
    pub max_price_cents: Option<i64>,
    pub in_stock_only: bool,
}

impl SearchFilters {
    pub fn from_slots(slots: &BTreeMap<String, serde_json::Value>) -> Self {
        Self {
            category: slots
                .get("category")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            max_price_cents: slots.get("max_price_cents").and_then(|v| v.as_i64()),
            in_stock_only: slots
                .get("in_stock")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
        }
    }
}

pub fn create_product(
    conn: &Connection,
    tenant_id: &str,
    name: &str,
    description: &str,
    category: Option<&str>,
    price_cents: i64,
) -> Result<Product> {
    let id = Uuid::now_v7().to_string();
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO products (id, tenant_id, name, description, category, price_cents, created_at, updated_at)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?7)",
        params![id, tenant_id, name, description, category, price_cents, now],
    )?;
    get_item(conn, tenant_id, &id)?.ok_or(CommerceError::NotFound {
        kind: "product",
        id,
    })
}

pub fn update_product(
    conn: &Connection,
    tenant_id: &str,
    product_id: &str,
    name: &str,
    description: &str,
    price_cents: i64,
    in_stock: bool,
) -> Result<()> {
    let n = conn.execute(
        "UPDATE products SET name = ?3, description = ?4, price_cents = ?5,
                in_stock = ?6, updated_at = ?7
         WHERE tenant_id = ?1 AND id = ?2",
        params![
            tenant_id,
            product_id,
            name,
            description,
            price_cents,
            in_stock,
            Utc::now().to_rfc3339()
        ],
    )?;
    if n == 0 {
        return Err(CommerceError::NotFound {
            kind: "product",
            id: product_id.to_string(),
        });
    }
    Ok(())
}

/// Tenant-scoped text search over name, description, and tags.
///
/// Returns at most [`MAX_SHORTLIST`] items plus an exact count of everything
/// that matched — the sales subflow uses the count to decide between a
/// shortlist and a catalog deep-link.
pub fn search(
    conn: &Connection,
    tenant_id: &str,
    query: &str,
    filters: &SearchFilters,
) -> Result<SearchResult> {
    let pattern = format!("%{}%", query.trim());
    let category_pattern = filters
        .category
        .as_deref()
        .map(|c| c.to_string())
        .unwrap_or_else(|| "%".to_string());
    let max_price = filters.max_price_cents.unwrap_or(i64::MAX);
    let min_stock = if filters.in_stock_only { 1 } else { 0 };

    let predicate = "tenant_id = ?1
         AND (name LIKE ?2 OR description LIKE ?2 OR tags LIKE ?2)
         AND IFNULL(category, '%') LIKE ?3
         AND price_cents <= ?4
         AND in_stock >= ?5";

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM products WHERE {}", predicate),
        params![tenant_id, pattern, category_pattern, max_price, min_stock],
        |row| row.get(0),
    )?;

    let mut stmt = conn.prepare(&format!(
        "SELECT * FROM products WHERE {} ORDER BY in_stock DESC, price_cents ASC LIMIT ?6",
        predicate
    ))?;
    let rows = stmt.query_map(
        params![
            tenant_id,
            pattern,
            category_pattern,
            max_price,
            min_stock,
            MAX_SHORTLIST as i64
        ],
        row_to_product,
    )?;

    Ok(SearchResult {
        items: rows.filter_map(|r| r.ok()).collect(),
        total_estimate: total as u64,
    })
}

/// Tenant-scoped fetch. A cross-tenant id yields `None`, never another
/// tenant's product.
pub fn get_item(conn: &Connection, tenant_id: &str, item_id: &str) -> Result<Option<Product>> {
    let mut stmt = conn.prepare("SELECT * FROM products WHERE tenant_id = ?1 AND id = ?2")?;
    Ok(stmt
        .query_row(params![tenant_id, item_id], row_to_product)
        .optional()?)
}

pub fn create_service(
    conn: &Connection,
    tenant_id: &str,
    name: &str,
    description: &str,
    price_cents: i64,
    duration_mins: u32,
) -> Result<Service> {
    let id = Uuid::now_v7().to_string();
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO services (id, tenant_id, name, description, price_cents, duration_mins, created_at, updated_at)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?7)",
        params![id, tenant_id, name, description, price_cents, duration_mins, now],
    )?;
    get_service(conn, tenant_id, &id)?.ok_or(CommerceError::NotFound {
        kind: "service",
        id,
    })
}

pub fn get_service(conn: &Connection, tenant_id: &str, service_id: &str) -> Result<Option<Service>> {
    let mut stmt = conn.prepare(
        "SELECT id, tenant_id, name, description, price_cents, duration_mins
         FROM services WHERE tenant_id = ?1 AND id = ?2",
    )?;
    Ok(stmt
        .query_row(params![tenant_id, service_id], |row| {
            Ok(Service {
                id: row.get(0)?,
                tenant_id: row.get(1)?,
                name: row.get(2)?,
                description: row.get(3)?,
                price_cents: row.get(4)?,
                duration_mins: row.get::<_, i64>(5)? as u32,
            })
        })
        .optional()?)
}

pub fn search_services(conn: &Connection, tenant_id: &str, query: &str) -> Result<Vec<Service>> {
    let pattern = format!("%{}%", query.trim());
    let mut stmt = conn.prepare(
        "SELECT id, tenant_id, name, description, price_cents, duration_mins
         FROM services WHERE tenant_id = ?1 AND (name LIKE ?2 OR description LIKE ?2)
         ORDER BY name LIMIT ?3",
    )?;
    let rows = stmt.query_map(params![tenant_id, pattern, MAX_SHORTLIST as i64], |row| {
        Ok(Service {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            name: row.get(2)?,
            description: row.get(3)?,
            price_cents: row.get(4)?,
            duration_mins: row.get::<_, i64>(5)? as u32,
        })
    })?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

fn row_to_product(row: &Row<'_>) -> rusqlite::Result<Product> {
    let tags: String = row.get("tags")?;
    Ok(Product {
        id: row.get("id")?,
        tenant_id: row.get("tenant_id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        category: row.get("category")?,
        price_cents: row.get("price_cents")?,
        currency: row.get("currency")?,
        in_stock: row.get::<_, i64>("in_stock")? != 0,
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        image_url: row.get("image_url")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;

    fn conn() -> Connection {
        let c = Connection::open_in_memory().unwrap();
        init_db(&c).unwrap();
        c
    }

    fn seed_laptops(conn: &Connection, tenant: &str, count: usize) {
        for i in 0..count {
            create_product(
                conn,
                tenant,
                &format!("Laptop {}", i),
                "portable computer",
                Some("electronics"),
                4_000_000 + i as i64 * 100_000,
            )
            .unwrap();
        }
    }

    #[test]
    fn search_caps_items_but_counts_all() {
        let conn = conn();
        seed_laptops(&conn, "t1", 10);
        let res = search(&conn, "t1", "laptop", &SearchFilters::default()).unwrap();
        assert_eq!(res.items.len(), MAX_SHORTLIST);
        assert_eq!(res.total_estimate, 10);
    }

    #[test]
    fn search_is_tenant_isolated() {
        let conn = conn();
        seed_laptops(&conn, "t1", 3);
        seed_laptops(&conn, "t2", 2);
        let res = search(&conn, "t1", "laptop", &SearchFilters::default()).unwrap();
        assert_eq!(res.total_estimate, 3);
        assert!(res.items.iter().all(|p| p.tenant_id == "t1"));
    }

    #[test]
    fn cross_tenant_get_item_is_none() {
        let conn = conn();
        let p = create_product(&conn, "t1", "Phone", "", None, 1_000_000).unwrap();
        assert!(get_item(&conn, "t2", &p.id).unwrap().is_none());
        assert!(get_item(&conn, "t1", &p.id).unwrap().is_some());
    }

    #[test]
    fn price_filter_applies() {
        let conn = conn();
        seed_laptops(&conn, "t1", 5);
        let filters = SearchFilters {
            max_price_cents: Some(4_100_000),
            ..Default::default()
        };
        let res = search(&conn, "t1", "laptop", &filters).unwrap();
        assert_eq!(res.total_estimate, 2);
        assert!(res.items.iter().all(|p| p.price_cents <= 4_100_000));
    }
}
