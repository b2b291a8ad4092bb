use rusqlite::Connection;

use crate::error::Result;

/// Initialise catalog, commerce, and wallet tables. Idempotent.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS products (
            id          TEXT PRIMARY KEY,
            tenant_id   TEXT NOT NULL,
            name        TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            category    TEXT,
            price_cents INTEGER NOT NULL,
            currency    TEXT NOT NULL DEFAULT 'KES',
            in_stock    INTEGER NOT NULL DEFAULT 1,
            tags        TEXT NOT NULL DEFAULT '[]',
            image_url   TEXT,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_products_tenant
            ON products(tenant_id, category);

        CREATE TABLE IF NOT EXISTS product_variants (
            id          TEXT PRIMARY KEY,
            product_id  TEXT NOT NULL REFERENCES products(id) ON DELETE CASCADE,
            tenant_id   TEXT NOT NULL,
            name        TEXT NOT NULL,
            price_cents INTEGER NOT NULL,
            in_stock    INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS services (
            id             TEXT PRIMARY KEY,
            tenant_id      TEXT NOT NULL,
            name           TEXT NOT NULL,
            description    TEXT NOT NULL DEFAULT '',
            price_cents    INTEGER NOT NULL,
            duration_mins  INTEGER NOT NULL DEFAULT 60,
            created_at     TEXT NOT NULL,
            updated_at     TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_services_tenant ON services(tenant_id);

        CREATE TABLE IF NOT EXISTS service_variants (
            id          TEXT PRIMARY KEY,
            service_id  TEXT NOT NULL REFERENCES services(id) ON DELETE CASCADE,
            tenant_id   TEXT NOT NULL,
            name        TEXT NOT NULL,
            price_cents INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS availability_windows (
            id         TEXT PRIMARY KEY,
            tenant_id  TEXT NOT NULL,
            service_id TEXT NOT NULL,
            weekday    INTEGER,
            date       TEXT,
            start_time TEXT NOT NULL,
            end_time   TEXT NOT NULL,
            capacity   INTEGER NOT NULL DEFAULT 1,
            timezone   TEXT NOT NULL DEFAULT 'Africa/Nairobi'
        );
        CREATE INDEX IF NOT EXISTS idx_windows_service
            ON availability_windows(tenant_id, service_id);

        CREATE TABLE IF NOT EXISTS appointments (
            id          TEXT PRIMARY KEY,
            tenant_id   TEXT NOT NULL,
            service_id  TEXT NOT NULL,
            customer_id TEXT NOT NULL,
            window_id   TEXT NOT NULL,
            scheduled_for TEXT NOT NULL,
            status      TEXT NOT NULL DEFAULT 'pending',
            note        TEXT,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_appointments_window
            ON appointments(tenant_id, window_id, scheduled_for);

        CREATE TABLE IF NOT EXISTS orders (
            id            TEXT PRIMARY KEY,
            tenant_id     TEXT NOT NULL,
            customer_id   TEXT NOT NULL,
            status        TEXT NOT NULL DEFAULT 'draft',
            items         TEXT NOT NULL DEFAULT '[]',
            subtotal_cents INTEGER NOT NULL DEFAULT 0,
            discount_cents INTEGER NOT NULL DEFAULT 0,
            total_cents   INTEGER NOT NULL DEFAULT 0,
            coupon_code   TEXT,
            created_at    TEXT NOT NULL,
            updated_at    TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_orders_customer
            ON orders(tenant_id, customer_id, created_at DESC);

        CREATE TABLE IF NOT EXISTS offers (
            id           TEXT PRIMARY KEY,
            tenant_id    TEXT NOT NULL,
            code         TEXT NOT NULL,
            description  TEXT NOT NULL DEFAULT '',
            percent_off  INTEGER,
            amount_off_cents INTEGER,
            is_active    INTEGER NOT NULL DEFAULT 1,
            expires_at   TEXT,
            created_at   TEXT NOT NULL,
            UNIQUE(tenant_id, code)
        );

        CREATE TABLE IF NOT EXISTS wallets (
            tenant_id     TEXT PRIMARY KEY,
            balance_cents INTEGER NOT NULL DEFAULT 0,
            currency      TEXT NOT NULL DEFAULT 'KES',
            updated_at    TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS transactions (
            id             TEXT PRIMARY KEY,
            tenant_id      TEXT NOT NULL,
            kind           TEXT NOT NULL,
            status         TEXT NOT NULL DEFAULT 'pending',
            amount_cents   INTEGER NOT NULL,
            counterpart_id TEXT,
            initiated_by   TEXT,
            approved_by    TEXT,
            reference      TEXT,
            created_at     TEXT NOT NULL,
            updated_at     TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_transactions_tenant
            ON transactions(tenant_id, created_at DESC);

        CREATE TABLE IF NOT EXISTS wallet_audit (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            tenant_id      TEXT NOT NULL,
            transaction_id TEXT NOT NULL,
            delta_cents    INTEGER NOT NULL,
            balance_after  INTEGER NOT NULL,
            note           TEXT,
            created_at     TEXT NOT NULL
        );",
    )?;
    Ok(())
}
