//! Google Sheets source: reads a value range over the Sheets v4 REST API.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::FetchError;
use crate::pipeline::types::{DatasetRef, SourceAdapter, Transaction};
use crate::sources::parse_rows;

const SOURCE_NAME: &str = "google_sheets";

pub const DEFAULT_BASE_URL: &str = "https://sheets.googleapis.com/v4";

/// Fetches a spreadsheet range and parses it as a transaction table.
pub struct SheetsSource {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
}

impl SheetsSource {
    pub fn new(api_key: SecretString) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: SecretString, base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn values_url(&self, dataset: &DatasetRef) -> String {
        format!(
            "{}/spreadsheets/{}/values/{}",
            self.base_url,
            urlencoding::encode(dataset.spreadsheet_id.expose_secret()),
            urlencoding::encode(&dataset.range)
        )
    }
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

fn cell_to_string(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[async_trait]
impl SourceAdapter for SheetsSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    async fn fetch(&self, dataset: &DatasetRef) -> Result<Vec<Transaction>, FetchError> {
        let resp = self
            .client
            .get(self.values_url(dataset))
            .query(&[("key", self.api_key.expose_secret())])
            .send()
            .await
            .map_err(|e| FetchError::Transport {
                source_name: SOURCE_NAME.into(),
                reason: e.without_url().to_string(),
            })?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(FetchError::Unauthorized {
                source_name: SOURCE_NAME.into(),
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FetchError::Http {
                source_name: SOURCE_NAME.into(),
                status: status.as_u16(),
                body,
            });
        }

        let range: ValueRange = resp.json().await.map_err(|e| FetchError::InvalidResponse {
            source_name: SOURCE_NAME.into(),
            reason: e.without_url().to_string(),
        })?;

        let rows: Vec<Vec<String>> = range
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_to_string).collect())
            .collect();

        let transactions = parse_rows(rows)?;
        tracing::debug!(count = transactions.len(), "Fetched rows from spreadsheet");
        Ok(transactions)
    }
}
