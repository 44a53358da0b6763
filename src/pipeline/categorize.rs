//! Categorizer: assigns one taxonomy label to every new transaction.
//!
//! Fail-whole-batch: a transaction is never persisted without a category,
//! so any bad label fails the entire call.

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::CategorizationError;
use crate::pipeline::types::{CategorizedTransaction, Classifier, Transaction};

/// Spend categories offered to the classifier by default.
pub const DEFAULT_TAXONOMY: &[&str] = &[
    "Groceries",
    "Dining",
    "Transportation",
    "Utilities",
    "Housing",
    "Entertainment",
    "Shopping",
    "Health",
    "Travel",
    "Income",
    "Transfers",
    "Other",
];

pub struct Categorizer {
    classifier: Arc<dyn Classifier>,
    taxonomy: Vec<String>,
}

impl Categorizer {
    pub fn new(classifier: Arc<dyn Classifier>) -> Self {
        Self::with_taxonomy(
            classifier,
            DEFAULT_TAXONOMY.iter().map(|s| s.to_string()).collect(),
        )
    }

    pub fn with_taxonomy(classifier: Arc<dyn Classifier>, taxonomy: Vec<String>) -> Self {
        Self {
            classifier,
            taxonomy,
        }
    }

    pub fn taxonomy(&self) -> &[String] {
        &self.taxonomy
    }

    /// Label every transaction. Output has the same length and order as input.
    pub async fn categorize(
        &self,
        transactions: Vec<Transaction>,
    ) -> Result<Vec<CategorizedTransaction>, CategorizationError> {
        if transactions.is_empty() {
            debug!("Nothing to categorize");
            return Ok(Vec::new());
        }

        let labels = self
            .classifier
            .classify(&transactions, &self.taxonomy)
            .await?;

        if labels.len() != transactions.len() {
            return Err(CategorizationError::CardinalityMismatch {
                expected: transactions.len(),
                got: labels.len(),
            });
        }

        let mut categorized = Vec::with_capacity(transactions.len());
        for (transaction, label) in transactions.into_iter().zip(labels) {
            let category = label.category.trim();
            let Some(canonical) = self
                .taxonomy
                .iter()
                .find(|t| t.eq_ignore_ascii_case(category))
            else {
                return Err(CategorizationError::UnknownLabel {
                    label: label.category,
                });
            };
            categorized.push(CategorizedTransaction {
                transaction,
                category: canonical.clone(),
                confidence: label.confidence.map(|c| c.clamp(0.0, 1.0)),
            });
        }

        info!(count = categorized.len(), "Transactions categorized");
        Ok(categorized)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::pipeline::types::Label;

    struct FixedClassifier {
        labels: Vec<&'static str>,
        calls: AtomicUsize,
    }

    impl FixedClassifier {
        fn new(labels: Vec<&'static str>) -> Self {
            Self {
                labels,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Classifier for FixedClassifier {
        async fn classify(
            &self,
            _transactions: &[Transaction],
            _taxonomy: &[String],
        ) -> Result<Vec<Label>, CategorizationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .labels
                .iter()
                .map(|l| Label {
                    category: l.to_string(),
                    confidence: Some(0.9),
                })
                .collect())
        }
    }

    struct DownClassifier;

    #[async_trait]
    impl Classifier for DownClassifier {
        async fn classify(
            &self,
            _transactions: &[Transaction],
            _taxonomy: &[String],
        ) -> Result<Vec<Label>, CategorizationError> {
            Err(CategorizationError::Unreachable("connection refused".into()))
        }
    }

    fn txns(n: usize) -> Vec<Transaction> {
        (0..n)
            .map(|i| Transaction {
                id: Some(format!("t{i}")),
                date: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
                amount: dec!(-10),
                description: format!("shop {i}"),
                raw: BTreeMap::new(),
            })
            .collect()
    }

    #[tokio::test]
    async fn preserves_order_and_cardinality() {
        let classifier = Arc::new(FixedClassifier::new(vec!["Dining", "groceries", "Travel"]));
        let categorizer = Categorizer::new(classifier);
        let out = categorizer.categorize(txns(3)).await.unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].transaction.id.as_deref(), Some("t0"));
        assert_eq!(out[1].category, "Groceries");
        assert_eq!(out[2].transaction.id.as_deref(), Some("t2"));
    }

    #[tokio::test]
    async fn empty_input_skips_classifier() {
        let classifier = Arc::new(FixedClassifier::new(vec![]));
        let categorizer = Categorizer::new(classifier.clone());
        let out = categorizer.categorize(Vec::new()).await.unwrap();
        assert!(out.is_empty());
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn short_label_list_fails_whole_batch() {
        let categorizer = Categorizer::new(Arc::new(FixedClassifier::new(vec!["Dining"])));
        let err = categorizer.categorize(txns(2)).await.unwrap_err();
        assert!(matches!(
            err,
            CategorizationError::CardinalityMismatch { expected: 2, got: 1 }
        ));
    }

    #[tokio::test]
    async fn unknown_label_fails_whole_batch() {
        let categorizer =
            Categorizer::new(Arc::new(FixedClassifier::new(vec!["Dining", "Crypto"])));
        let err = categorizer.categorize(txns(2)).await.unwrap_err();
        assert!(matches!(err, CategorizationError::UnknownLabel { .. }));
    }

    #[tokio::test]
    async fn unreachable_classifier_propagates() {
        let categorizer = Categorizer::new(Arc::new(DownClassifier));
        let err = categorizer.categorize(txns(1)).await.unwrap_err();
        assert!(matches!(err, CategorizationError::Unreachable(_)));
    }
}
