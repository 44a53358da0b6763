//! `Ledger` trait: the persistence seam the pipeline talks to.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::pipeline::types::{CategorizedTransaction, ExistingKeys, HistoryWindow, LedgerRef};

/// Acknowledgement of a committed batch write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteAck {
    pub written: usize,
}

/// Backend-agnostic ledger of categorized transactions.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Snapshot of every dedup key recorded in the collection.
    async fn existing_keys(&self, ledger: &LedgerRef) -> Result<ExistingKeys, StoreError>;

    /// Persist a batch. All-or-nothing: on error nothing from the batch is kept.
    async fn write(
        &self,
        transactions: &[CategorizedTransaction],
        ledger: &LedgerRef,
    ) -> Result<WriteAck, StoreError>;

    /// Read categorized history, oldest first.
    async fn read_history(
        &self,
        ledger: &LedgerRef,
        window: HistoryWindow,
    ) -> Result<Vec<CategorizedTransaction>, StoreError>;
}
