//! libSQL ledger backend: async `Ledger` trait implementation.
//!
//! Supports local file and in-memory databases. Batch writes run inside a
//! single SQL transaction.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use libsql::{Connection, Database as LibSqlDatabase, Value, params};
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::pipeline::types::{
    CategorizedTransaction, ExistingKeys, HistoryWindow, LedgerRef, Transaction,
};
use crate::store::migrations;
use crate::store::traits::{Ledger, WriteAck};

const HISTORY_COLUMNS: &str =
    "external_id, txn_date, amount, description, raw, category, confidence";

/// libSQL ledger backend.
///
/// Stores a single connection that is reused for all operations.
pub struct LibSqlLedger {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlLedger {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db).await?;
        info!(path = %path.display(), "Ledger opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                StoreError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, StoreError> {
        let conn = db
            .connect()
            .map_err(|e| StoreError::Connection(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }
}

// ── Helper functions ────────────────────────────────────────────────

fn opt_text(s: Option<&str>) -> Value {
    match s {
        Some(s) => Value::Text(s.to_string()),
        None => Value::Null,
    }
}

fn opt_real(v: Option<f32>) -> Value {
    match v {
        Some(v) => Value::Real(v as f64),
        None => Value::Null,
    }
}

fn text_at(row: &libsql::Row, idx: i32) -> Result<String, StoreError> {
    row.get::<String>(idx)
        .map_err(|e| StoreError::Corrupt(format!("column {idx}: {e}")))
}

fn opt_text_at(row: &libsql::Row, idx: i32) -> Result<Option<String>, StoreError> {
    match row
        .get_value(idx)
        .map_err(|e| StoreError::Corrupt(format!("column {idx}: {e}")))?
    {
        Value::Null => Ok(None),
        Value::Text(s) => Ok(Some(s)),
        other => Err(StoreError::Corrupt(format!(
            "column {idx}: expected text, got {other:?}"
        ))),
    }
}

fn opt_real_at(row: &libsql::Row, idx: i32) -> Result<Option<f32>, StoreError> {
    match row
        .get_value(idx)
        .map_err(|e| StoreError::Corrupt(format!("column {idx}: {e}")))?
    {
        Value::Null => Ok(None),
        Value::Real(v) => Ok(Some(v as f32)),
        Value::Integer(v) => Ok(Some(v as f32)),
        other => Err(StoreError::Corrupt(format!(
            "column {idx}: expected real, got {other:?}"
        ))),
    }
}

/// Map a row (in `HISTORY_COLUMNS` order) to a `CategorizedTransaction`.
fn row_to_categorized(row: &libsql::Row) -> Result<CategorizedTransaction, StoreError> {
    let external_id = opt_text_at(row, 0)?;
    let date_str = text_at(row, 1)?;
    let amount_str = text_at(row, 2)?;
    let description = text_at(row, 3)?;
    let raw_str = text_at(row, 4)?;
    let category = text_at(row, 5)?;
    let confidence = opt_real_at(row, 6)?;

    let date = NaiveDate::parse_from_str(&date_str, "%Y-%m-%d")
        .map_err(|e| StoreError::Corrupt(format!("bad date '{date_str}': {e}")))?;
    let amount = Decimal::from_str(&amount_str)
        .map_err(|e| StoreError::Corrupt(format!("bad amount '{amount_str}': {e}")))?;
    let raw: BTreeMap<String, String> = serde_json::from_str(&raw_str)
        .map_err(|e| StoreError::Corrupt(format!("bad raw payload: {e}")))?;

    Ok(CategorizedTransaction {
        transaction: Transaction {
            id: external_id,
            date,
            amount,
            description,
            raw,
        },
        category,
        confidence,
    })
}

async fn insert_row(
    conn: &Connection,
    item: &CategorizedTransaction,
    ledger: &LedgerRef,
    recorded_at: &str,
) -> Result<(), StoreError> {
    let txn = &item.transaction;
    let raw_json = serde_json::to_string(&txn.raw)
        .map_err(|e| StoreError::Write(format!("serialize raw fields: {e}")))?;

    conn.execute(
        "INSERT INTO ledger_transactions (collection, dedup_key, external_id, txn_date, amount, description, raw, category, confidence, recorded_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            ledger.collection.as_str(),
            txn.dedup_key(),
            opt_text(txn.id.as_deref()),
            txn.date.format("%Y-%m-%d").to_string(),
            txn.amount.to_string(),
            txn.description.as_str(),
            raw_json,
            item.category.as_str(),
            opt_real(item.confidence),
            recorded_at,
        ],
    )
    .await
    .map_err(|e| {
        let msg = e.to_string();
        if msg.contains("UNIQUE constraint failed") {
            StoreError::Constraint(format!("duplicate key {}: {msg}", txn.dedup_key()))
        } else {
            StoreError::Write(msg)
        }
    })?;
    Ok(())
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Ledger for LibSqlLedger {
    async fn existing_keys(&self, ledger: &LedgerRef) -> Result<ExistingKeys, StoreError> {
        let mut rows = self
            .conn
            .query(
                "SELECT dedup_key FROM ledger_transactions WHERE collection = ?1",
                params![ledger.collection.as_str()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("existing_keys: {e}")))?;

        let mut keys = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("existing_keys: {e}")))?
        {
            keys.push(text_at(&row, 0)?);
        }

        debug!(collection = %ledger.collection, count = keys.len(), "Loaded existing keys");
        Ok(ExistingKeys::new(keys))
    }

    async fn write(
        &self,
        transactions: &[CategorizedTransaction],
        ledger: &LedgerRef,
    ) -> Result<WriteAck, StoreError> {
        if transactions.is_empty() {
            return Ok(WriteAck { written: 0 });
        }

        let tx = self
            .conn
            .transaction()
            .await
            .map_err(|e| StoreError::Write(format!("begin transaction: {e}")))?;
        let recorded_at = Utc::now().to_rfc3339();

        for item in transactions {
            let inserted = insert_row(&tx, item, ledger, &recorded_at).await;
            if let Err(e) = inserted {
                if let Err(rb) = tx.rollback().await {
                    tracing::warn!(error = %rb, "Rollback after failed insert also failed");
                }
                return Err(e);
            }
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::Write(format!("commit: {e}")))?;

        info!(
            collection = %ledger.collection,
            written = transactions.len(),
            "Ledger batch committed"
        );
        Ok(WriteAck {
            written: transactions.len(),
        })
    }

    async fn read_history(
        &self,
        ledger: &LedgerRef,
        window: HistoryWindow,
    ) -> Result<Vec<CategorizedTransaction>, StoreError> {
        let mut rows = match window {
            HistoryWindow::All => {
                self.conn
                    .query(
                        &format!(
                            "SELECT {HISTORY_COLUMNS} FROM ledger_transactions WHERE collection = ?1 ORDER BY txn_date ASC, rowid ASC"
                        ),
                        params![ledger.collection.as_str()],
                    )
                    .await
            }
            HistoryWindow::Since(since) => {
                self.conn
                    .query(
                        &format!(
                            "SELECT {HISTORY_COLUMNS} FROM ledger_transactions WHERE collection = ?1 AND txn_date >= ?2 ORDER BY txn_date ASC, rowid ASC"
                        ),
                        params![
                            ledger.collection.as_str(),
                            since.format("%Y-%m-%d").to_string()
                        ],
                    )
                    .await
            }
        }
        .map_err(|e| StoreError::Query(format!("read_history: {e}")))?;

        let mut history = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("read_history: {e}")))?
        {
            history.push(row_to_categorized(&row)?);
        }

        debug!(collection = %ledger.collection, count = history.len(), "History loaded");
        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    async fn test_db() -> LibSqlLedger {
        LibSqlLedger::new_memory().await.unwrap()
    }

    fn item(id: Option<&str>, date: (i32, u32, u32), amount: Decimal, category: &str) -> CategorizedTransaction {
        let mut raw = BTreeMap::new();
        raw.insert("Memo".to_string(), "card purchase".to_string());
        CategorizedTransaction {
            transaction: Transaction {
                id: id.map(String::from),
                date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
                amount,
                description: format!("{category} shop"),
                raw,
            },
            category: category.into(),
            confidence: Some(0.75),
        }
    }

    #[tokio::test]
    async fn write_then_read_back() {
        let db = test_db().await;
        let ledger = LedgerRef::new("main");
        let batch = vec![
            item(Some("b"), (2024, 2, 1), dec!(-20.10), "Dining"),
            item(None, (2024, 1, 1), dec!(-5.00), "Groceries"),
        ];

        let ack = db.write(&batch, &ledger).await.unwrap();
        assert_eq!(ack.written, 2);

        let history = db.read_history(&ledger, HistoryWindow::All).await.unwrap();
        assert_eq!(history.len(), 2);
        // Oldest first
        assert_eq!(history[0].category, "Groceries");
        assert_eq!(history[0].transaction.id, None);
        assert_eq!(history[1].transaction.amount, dec!(-20.10));
        assert_eq!(history[1].transaction.raw["Memo"], "card purchase");
        assert!((history[1].confidence.unwrap() - 0.75).abs() < 0.001);
    }

    #[tokio::test]
    async fn existing_keys_scoped_by_collection() {
        let db = test_db().await;
        db.write(&[item(Some("a"), (2024, 1, 1), dec!(-1), "Other")], &LedgerRef::new("one"))
            .await
            .unwrap();

        let one = db.existing_keys(&LedgerRef::new("one")).await.unwrap();
        let two = db.existing_keys(&LedgerRef::new("two")).await.unwrap();
        assert!(one.contains("id|a"));
        assert!(two.is_empty());
    }

    #[tokio::test]
    async fn duplicate_in_batch_rolls_back_everything() {
        let db = test_db().await;
        let ledger = LedgerRef::new("main");
        let batch = vec![
            item(Some("x"), (2024, 1, 1), dec!(-1), "Other"),
            item(Some("y"), (2024, 1, 2), dec!(-2), "Other"),
            item(Some("x"), (2024, 1, 3), dec!(-3), "Other"),
        ];

        let err = db.write(&batch, &ledger).await.unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));

        let keys = db.existing_keys(&ledger).await.unwrap();
        assert!(keys.is_empty(), "partial batch must not be visible");
    }

    #[tokio::test]
    async fn rewriting_existing_key_fails_atomically() {
        let db = test_db().await;
        let ledger = LedgerRef::new("main");
        db.write(&[item(Some("x"), (2024, 1, 1), dec!(-1), "Other")], &ledger)
            .await
            .unwrap();

        let second = vec![
            item(Some("new"), (2024, 1, 5), dec!(-9), "Other"),
            item(Some("x"), (2024, 1, 1), dec!(-1), "Other"),
        ];
        assert!(db.write(&second, &ledger).await.is_err());
        assert_eq!(db.existing_keys(&ledger).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn history_window_filters_by_date() {
        let db = test_db().await;
        let ledger = LedgerRef::new("main");
        db.write(
            &[
                item(Some("old"), (2023, 12, 31), dec!(-1), "Other"),
                item(Some("new"), (2024, 1, 1), dec!(-2), "Other"),
            ],
            &ledger,
        )
        .await
        .unwrap();

        let since = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let history = db
            .read_history(&ledger, HistoryWindow::Since(since))
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].transaction.id.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn empty_write_is_noop() {
        let db = test_db().await;
        let ack = db.write(&[], &LedgerRef::new("main")).await.unwrap();
        assert_eq!(ack.written, 0);
    }

    #[tokio::test]
    async fn file_backed_ledger_persists_across_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("ledger.db");
        let ledger = LedgerRef::new("main");
        {
            let db = LibSqlLedger::new_local(&path).await.unwrap();
            db.write(&[item(Some("p"), (2024, 3, 3), dec!(-3), "Other")], &ledger)
                .await
                .unwrap();
        }
        assert!(path.exists());
        let db = LibSqlLedger::new_local(&path).await.unwrap();
        assert!(db.existing_keys(&ledger).await.unwrap().contains("id|p"));
    }
}
