use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use tracing::info;
use uuid::Uuid;

use crate::error::{CommerceError, Result};
use crate::types::{Transaction, TransactionKind, TransactionStatus};

/// Platform fee charged on customer payments, in basis points.
const PLATFORM_FEE_BPS: i64 = 250;

pub fn ensure_wallet(conn: &Connection, tenant_id: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO wallets (tenant_id, updated_at) VALUES (?1, ?2)",
        params![tenant_id, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

pub fn balance(conn: &Connection, tenant_id: &str) -> Result<i64> {
    Ok(conn
        .query_row(
            "SELECT balance_cents FROM wallets WHERE tenant_id = ?1",
            params![tenant_id],
            |row| row.get(0),
        )
        .optional()?
        .unwrap_or(0))
}

/// Apply a signed delta inside an open transaction and record the audit row.
/// The UPDATE is relative — the database does the arithmetic.
fn apply_delta(
    tx: &Connection,
    tenant_id: &str,
    transaction_id: &str,
    delta_cents: i64,
    note: &str,
) -> Result<i64> {
    tx.execute(
        "UPDATE wallets SET balance_cents = balance_cents + ?2, updated_at = ?3
         WHERE tenant_id = ?1",
        params![tenant_id, delta_cents, Utc::now().to_rfc3339()],
    )?;
    let after: i64 = tx.query_row(
        "SELECT balance_cents FROM wallets WHERE tenant_id = ?1",
        params![tenant_id],
        |row| row.get(0),
    )?;
    tx.execute(
        "INSERT INTO wallet_audit (tenant_id, transaction_id, delta_cents, balance_after, note, created_at)
         VALUES (?1,?2,?3,?4,?5,?6)",
        params![
            tenant_id,
            transaction_id,
            delta_cents,
            after,
            note,
            Utc::now().to_rfc3339()
        ],
    )?;
    Ok(after)
}

fn insert_transaction(
    tx: &Connection,
    tenant_id: &str,
    kind: TransactionKind,
    status: TransactionStatus,
    amount_cents: i64,
    counterpart_id: Option<&str>,
    initiated_by: Option<&str>,
    reference: Option<&str>,
) -> Result<String> {
    let id = Uuid::now_v7().to_string();
    tx.execute(
        "INSERT INTO transactions
         (id, tenant_id, kind, status, amount_cents, counterpart_id, initiated_by, reference, created_at, updated_at)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?9)",
        params![
            id,
            tenant_id,
            kind.to_string(),
            status.to_string(),
            amount_cents,
            counterpart_id,
            initiated_by,
            reference,
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(id)
}

/// Credit a completed customer payment and record the paired platform fee as
/// its own transaction. One atomic unit: both rows land or neither does.
pub fn record_customer_payment(
    conn: &mut Connection,
    tenant_id: &str,
    amount_cents: i64,
    reference: &str,
) -> Result<(String, String)> {
    if amount_cents <= 0 {
        return Err(CommerceError::InvalidInput(
            "payment amount must be positive".to_string(),
        ));
    }
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    ensure_wallet(&tx, tenant_id)?;

    let fee = amount_cents * PLATFORM_FEE_BPS / 10_000;

    let payment_id = insert_transaction(
        &tx,
        tenant_id,
        TransactionKind::CustomerPayment,
        TransactionStatus::Completed,
        amount_cents,
        None,
        None,
        Some(reference),
    )?;
    apply_delta(&tx, tenant_id, &payment_id, amount_cents, "customer payment")?;

    let fee_id = insert_transaction(
        &tx,
        tenant_id,
        TransactionKind::PlatformFee,
        TransactionStatus::Completed,
        -fee,
        Some(&payment_id),
        None,
        Some(reference),
    )?;
    apply_delta(&tx, tenant_id, &fee_id, -fee, "platform fee")?;

    tx.commit()?;
    info!(tenant_id, amount_cents, fee, "customer payment recorded");
    Ok((payment_id, fee_id))
}

/// Start a withdrawal: validate against the minimum and the balance, create a
/// pending transaction, and debit the wallet immediately. The debit is
/// reversed only if the payout later fails.
pub fn initiate_withdrawal(
    conn: &mut Connection,
    tenant_id: &str,
    amount_cents: i64,
    min_withdrawal_cents: i64,
    initiator_id: &str,
) -> Result<Transaction> {
    if amount_cents < min_withdrawal_cents {
        return Err(CommerceError::InvalidInput(format!(
            "withdrawal below tenant minimum of {} cents",
            min_withdrawal_cents
        )));
    }
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    ensure_wallet(&tx, tenant_id)?;

    let bal: i64 = tx.query_row(
        "SELECT balance_cents FROM wallets WHERE tenant_id = ?1",
        params![tenant_id],
        |row| row.get(0),
    )?;
    if bal < amount_cents {
        return Err(CommerceError::InsufficientBalance {
            balance_cents: bal,
            amount_cents,
        });
    }

    let txn_id = insert_transaction(
        &tx,
        tenant_id,
        TransactionKind::Withdrawal,
        TransactionStatus::Pending,
        -amount_cents,
        None,
        Some(initiator_id),
        None,
    )?;
    apply_delta(&tx, tenant_id, &txn_id, -amount_cents, "withdrawal hold")?;
    tx.commit()?;

    info!(tenant_id, txn_id = %txn_id, amount_cents, "withdrawal initiated");
    get_transaction(conn, tenant_id, &txn_id)?.ok_or(CommerceError::NotFound {
        kind: "transaction",
        id: txn_id,
    })
}

/// Record the approval decision. The four-eyes check (approver ≠ initiator,
/// both active users) happens in the tenancy resolver before this is called;
/// this function re-checks the initiator mismatch as a last line of defense.
pub fn approve_withdrawal(
    conn: &Connection,
    tenant_id: &str,
    transaction_id: &str,
    approver_id: &str,
) -> Result<Transaction> {
    let txn = get_transaction(conn, tenant_id, transaction_id)?.ok_or(CommerceError::NotFound {
        kind: "transaction",
        id: transaction_id.to_string(),
    })?;
    if txn.kind != TransactionKind::Withdrawal || txn.status != TransactionStatus::Pending {
        return Err(CommerceError::Conflict(
            "only pending withdrawals can be approved".to_string(),
        ));
    }
    if txn.initiated_by.as_deref() == Some(approver_id) {
        return Err(CommerceError::Conflict(
            "withdrawal approver must differ from initiator".to_string(),
        ));
    }

    conn.execute(
        "UPDATE transactions SET status = 'completed', approved_by = ?3, updated_at = ?4
         WHERE tenant_id = ?1 AND id = ?2",
        params![
            tenant_id,
            transaction_id,
            approver_id,
            Utc::now().to_rfc3339()
        ],
    )?;
    info!(tenant_id, transaction_id, "withdrawal approved");
    get_transaction(conn, tenant_id, transaction_id)?.ok_or(CommerceError::NotFound {
        kind: "transaction",
        id: transaction_id.to_string(),
    })
}

/// External payout failed after approval: mark the transaction failed and
/// re-credit the held amount. One atomic unit.
pub fn fail_withdrawal(
    conn: &mut Connection,
    tenant_id: &str,
    transaction_id: &str,
    reason: &str,
) -> Result<()> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let amount: Option<i64> = tx
        .query_row(
            "SELECT amount_cents FROM transactions
             WHERE tenant_id = ?1 AND id = ?2 AND kind = 'withdrawal'
               AND status IN ('pending','completed')",
            params![tenant_id, transaction_id],
            |row| row.get(0),
        )
        .optional()?;
    let amount = amount.ok_or(CommerceError::NotFound {
        kind: "transaction",
        id: transaction_id.to_string(),
    })?;

    tx.execute(
        "UPDATE transactions SET status = 'failed', reference = ?3, updated_at = ?4
         WHERE tenant_id = ?1 AND id = ?2",
        params![
            tenant_id,
            transaction_id,
            reason,
            Utc::now().to_rfc3339()
        ],
    )?;
    // amount is negative for withdrawals; re-credit is its negation.
    apply_delta(
        &tx,
        tenant_id,
        transaction_id,
        -amount,
        "withdrawal payout failed; re-credit",
    )?;
    tx.commit()?;
    info!(tenant_id, transaction_id, reason, "withdrawal failed and re-credited");
    Ok(())
}

pub fn get_transaction(
    conn: &Connection,
    tenant_id: &str,
    transaction_id: &str,
) -> Result<Option<Transaction>> {
    let mut stmt = conn.prepare("SELECT * FROM transactions WHERE tenant_id = ?1 AND id = ?2")?;
    Ok(stmt
        .query_row(params![tenant_id, transaction_id], row_to_transaction)
        .optional()?)
}

/// Invariant check used by tests and the health surface: balance equals the
/// signed sum of completed transactions plus pending holds.
pub fn audited_balance(conn: &Connection, tenant_id: &str) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT IFNULL(SUM(amount_cents), 0) FROM transactions
         WHERE tenant_id = ?1
           AND (status = 'completed' OR (status = 'pending' AND kind = 'withdrawal'))",
        params![tenant_id],
        |row| row.get(0),
    )?)
}

fn row_to_transaction(row: &Row<'_>) -> rusqlite::Result<Transaction> {
    let kind: String = row.get("kind")?;
    let status: String = row.get("status")?;
    Ok(Transaction {
        id: row.get("id")?,
        tenant_id: row.get("tenant_id")?,
        kind: match kind.as_str() {
            "customer_payment" => TransactionKind::CustomerPayment,
            "platform_fee" => TransactionKind::PlatformFee,
            "refund" => TransactionKind::Refund,
            _ => TransactionKind::Withdrawal,
        },
        status: match status.as_str() {
            "completed" => TransactionStatus::Completed,
            "failed" => TransactionStatus::Failed,
            _ => TransactionStatus::Pending,
        },
        amount_cents: row.get("amount_cents")?,
        counterpart_id: row.get("counterpart_id")?,
        initiated_by: row.get("initiated_by")?,
        approved_by: row.get("approved_by")?,
        reference: row.get("reference")?,
        created_at: row.get("created_at")?,
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

    #[test]
    fn payment_credits_wallet_and_records_paired_fee() {
        let mut conn = conn();
        let (payment_id, fee_id) =
            record_customer_payment(&mut conn, "t1", 100_000, "MPESA-XYZ").unwrap();

        // 2.5% fee on 100_000 = 2_500.
        assert_eq!(balance(&conn, "t1").unwrap(), 97_500);

        let fee = get_transaction(&conn, "t1", &fee_id).unwrap().unwrap();
        assert_eq!(fee.kind, TransactionKind::PlatformFee);
        assert_eq!(fee.counterpart_id.as_deref(), Some(payment_id.as_str()));
    }

    #[test]
    fn withdrawal_debits_immediately_and_recredits_on_failure() {
        let mut conn = conn();
        record_customer_payment(&mut conn, "t1", 1_000_000, "ref").unwrap();
        let start = balance(&conn, "t1").unwrap();

        let txn = initiate_withdrawal(&mut conn, "t1", 500_000, 10_000, "u1").unwrap();
        assert_eq!(txn.status, TransactionStatus::Pending);
        assert_eq!(balance(&conn, "t1").unwrap(), start - 500_000);

        approve_withdrawal(&conn, "t1", &txn.id, "u2").unwrap();
        fail_withdrawal(&mut conn, "t1", &txn.id, "payout provider 502").unwrap();

        assert_eq!(balance(&conn, "t1").unwrap(), start);
        let txn = get_transaction(&conn, "t1", &txn.id).unwrap().unwrap();
        assert_eq!(txn.status, TransactionStatus::Failed);
    }

    #[test]
    fn same_user_approval_is_a_conflict() {
        let mut conn = conn();
        record_customer_payment(&mut conn, "t1", 1_000_000, "ref").unwrap();
        let txn = initiate_withdrawal(&mut conn, "t1", 500_000, 10_000, "u1").unwrap();
        let err = approve_withdrawal(&conn, "t1", &txn.id, "u1").unwrap_err();
        assert!(matches!(err, CommerceError::Conflict(_)));
        // No state change.
        let txn = get_transaction(&conn, "t1", &txn.id).unwrap().unwrap();
        assert_eq!(txn.status, TransactionStatus::Pending);
        assert!(txn.approved_by.is_none());
    }

    #[test]
    fn withdrawal_requires_funds_and_minimum() {
        let mut conn = conn();
        record_customer_payment(&mut conn, "t1", 20_000, "ref").unwrap();

        let err = initiate_withdrawal(&mut conn, "t1", 5_000, 10_000, "u1").unwrap_err();
        assert!(matches!(err, CommerceError::InvalidInput(_)));

        let err = initiate_withdrawal(&mut conn, "t1", 1_000_000, 10_000, "u1").unwrap_err();
        assert!(matches!(err, CommerceError::InsufficientBalance { .. }));
    }

    #[test]
    fn balance_matches_signed_transaction_sum() {
        let mut conn = conn();
        record_customer_payment(&mut conn, "t1", 300_000, "a").unwrap();
        record_customer_payment(&mut conn, "t1", 200_000, "b").unwrap();
        let txn = initiate_withdrawal(&mut conn, "t1", 100_000, 10_000, "u1").unwrap();
        approve_withdrawal(&conn, "t1", &txn.id, "u2").unwrap();

        assert_eq!(
            balance(&conn, "t1").unwrap(),
            audited_balance(&conn, "t1").unwrap()
        );
    }
}
