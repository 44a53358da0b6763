//! Shared types for the advice pipeline.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::NaiveDate;
use regex::Regex;
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::{
    CategorizationError, ConfigError, DeliveryError, FetchError, GenerationError,
};

// ── Transactions ────────────────────────────────────────────────────

/// A bank transaction as fetched from the source. Never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Upstream identifier, if the source provides a stable one.
    pub id: Option<String>,
    pub date: NaiveDate,
    /// Signed amount. Negative is an outflow (spend).
    pub amount: Decimal,
    pub description: String,
    /// Every source cell, keyed by its header.
    pub raw: BTreeMap<String, String>,
}

impl Transaction {
    /// Uniqueness key used for deduplication.
    ///
    /// Uses the upstream id when present; otherwise derives a composite key
    /// from date, normalized amount and normalized description.
    pub fn dedup_key(&self) -> String {
        if let Some(id) = self.id.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            return format!("id|{id}");
        }
        format!(
            "derived|{}|{}|{}",
            self.date,
            self.amount.normalize(),
            normalize_description(&self.description)
        )
    }

    pub fn is_outflow(&self) -> bool {
        self.amount.is_sign_negative() && !self.amount.is_zero()
    }
}

fn normalize_description(description: &str) -> String {
    description
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// A transaction with its assigned spend category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorizedTransaction {
    pub transaction: Transaction,
    pub category: String,
    pub confidence: Option<f32>,
}

/// A classifier's verdict for one transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct Label {
    pub category: String,
    pub confidence: Option<f32>,
}

/// Snapshot of dedup keys already recorded in the ledger.
#[derive(Debug, Clone, Default)]
pub struct ExistingKeys(HashSet<String>);

impl ExistingKeys {
    pub fn new(keys: impl IntoIterator<Item = String>) -> Self {
        Self(keys.into_iter().collect())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ── References ──────────────────────────────────────────────────────

/// Where the raw dataset lives. The spreadsheet id is treated as a secret.
#[derive(Debug, Clone)]
pub struct DatasetRef {
    pub spreadsheet_id: SecretString,
    pub range: String,
}

/// Which ledger collection a run reads and writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerRef {
    pub collection: String,
}

impl LedgerRef {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
        }
    }
}

/// How much history to read back for advice generation.
///
/// `Since` filters what the ledger returns; a run still hands the generator
/// every transaction it persisted itself, whatever its date.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HistoryWindow {
    #[default]
    All,
    Since(NaiveDate),
}

// ── Advice ──────────────────────────────────────────────────────────

/// Natural-language advice for one run. Never blank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvicePayload {
    advice: String,
}

impl AdvicePayload {
    pub fn new(advice: impl Into<String>) -> Result<Self, GenerationError> {
        let advice = advice.into().trim().to_string();
        if advice.is_empty() {
            return Err(GenerationError::EmptyAdvice);
        }
        Ok(Self { advice })
    }

    pub fn advice(&self) -> &str {
        &self.advice
    }
}

// ── Recipients ──────────────────────────────────────────────────────

static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{7,15}$").expect("valid phone regex"));

/// A validated SMS destination, stored as digits only.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Recipient(String);

impl Recipient {
    /// Parse a phone number, ignoring spaces, dashes, dots and parentheses.
    /// A leading `+` is dropped so `+1555…` and `1555…` compare equal.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let trimmed = raw.trim_start();
        let cleaned: String = trimmed
            .strip_prefix('+')
            .unwrap_or(trimmed)
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')'))
            .collect();
        if !PHONE_RE.is_match(&cleaned) {
            return Err(ConfigError::InvalidValue {
                key: "recipient".into(),
                message: format!("'{raw}' is not a phone number"),
            });
        }
        Ok(Self(cleaned))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered, non-empty set of recipients. Duplicates keep their first position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientList(Vec<Recipient>);

impl RecipientList {
    pub fn new(recipients: Vec<Recipient>) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        let unique: Vec<Recipient> = recipients
            .into_iter()
            .filter(|r| seen.insert(r.clone()))
            .collect();
        if unique.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "recipients".into(),
                message: "at least one recipient is required".into(),
            });
        }
        Ok(Self(unique))
    }

    /// Parse a comma-separated list of phone numbers.
    pub fn parse_csv(csv: &str) -> Result<Self, ConfigError> {
        let recipients = csv
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Recipient::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(recipients)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Recipient> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ── Delivery results ────────────────────────────────────────────────

/// Outcome of delivering to one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub recipient: Recipient,
    pub success: bool,
    /// Provider message id on success, error text on failure.
    pub detail: String,
    pub attempts: u32,
}

/// Overall verdict across all recipients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryVerdict {
    AllSucceeded,
    Partial { failed: Vec<Recipient> },
    AllFailed,
}

/// Per-recipient outcomes in attempt order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryResult {
    pub outcomes: Vec<DeliveryOutcome>,
}

impl DeliveryResult {
    pub fn verdict(&self) -> DeliveryVerdict {
        let failed = self.failed_recipients();
        if failed.is_empty() {
            DeliveryVerdict::AllSucceeded
        } else if failed.len() == self.outcomes.len() {
            DeliveryVerdict::AllFailed
        } else {
            DeliveryVerdict::Partial { failed }
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|o| o.success)
    }

    pub fn failed_recipients(&self) -> Vec<Recipient> {
        self.outcomes
            .iter()
            .filter(|o| !o.success)
            .map(|o| o.recipient.clone())
            .collect()
    }

    /// Human-readable one-line summary.
    pub fn summary(&self) -> String {
        match self.verdict() {
            DeliveryVerdict::AllSucceeded => {
                format!("Advice sent to all {} recipient(s)", self.outcomes.len())
            }
            DeliveryVerdict::AllFailed => {
                let details: Vec<String> = self
                    .outcomes
                    .iter()
                    .map(|o| format!("{}: {}", o.recipient, o.detail))
                    .collect();
                format!("Delivery failed for every recipient ({})", details.join("; "))
            }
            DeliveryVerdict::Partial { failed } => {
                let names: Vec<&str> = failed.iter().map(Recipient::as_str).collect();
                format!(
                    "Advice sent to {} of {} recipient(s); failed: {}",
                    self.outcomes.len() - failed.len(),
                    self.outcomes.len(),
                    names.join(", ")
                )
            }
        }
    }
}

// ── Capability traits ───────────────────────────────────────────────

/// Fetches the raw transaction dataset from an external tabular source.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self, dataset: &DatasetRef) -> Result<Vec<Transaction>, FetchError>;
}

/// External classification capability.
///
/// Must return one label per input, in input order.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        transactions: &[Transaction],
        taxonomy: &[String],
    ) -> Result<Vec<Label>, CategorizationError>;
}

/// External generative capability producing advice from history.
#[async_trait]
pub trait AdviceGenerator: Send + Sync {
    async fn generate(
        &self,
        history: &[CategorizedTransaction],
        ledger: &LedgerRef,
    ) -> Result<AdvicePayload, GenerationError>;
}

/// Raw provider reply to one send attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderResponse {
    pub body: String,
}

/// SMS provider: pure I/O plus interpretation of its own success marker.
#[async_trait]
pub trait SmsProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Issue one delivery attempt with an already percent-encoded message.
    async fn send(
        &self,
        recipient: &Recipient,
        encoded_message: &str,
    ) -> Result<ProviderResponse, DeliveryError>;

    /// Inspect the response for the provider's success marker.
    ///
    /// Returns the detail to record (e.g. a message id) on success.
    fn check(&self, response: &ProviderResponse) -> Result<String, DeliveryError>;
}
