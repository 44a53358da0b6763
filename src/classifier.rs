//! Zero-shot transaction classifier backed by the Hugging Face inference API.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::CategorizationError;
use crate::pipeline::types::{Classifier, Label, Transaction};

pub const DEFAULT_BASE_URL: &str = "https://api-inference.huggingface.co";
pub const DEFAULT_MODEL: &str = "facebook/bart-large-mnli";

pub struct HuggingFaceClassifier {
    client: reqwest::Client,
    base_url: String,
    token: SecretString,
    model: String,
}

impl HuggingFaceClassifier {
    pub fn new(token: SecretString, model: impl Into<String>) -> Self {
        Self::with_base_url(token, model, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(
        token: SecretString,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            model: model.into(),
        }
    }

    fn model_url(&self) -> String {
        format!("{}/models/{}", self.base_url, self.model)
    }
}

#[derive(Debug, Deserialize)]
struct ZeroShotResult {
    labels: Vec<String>,
    scores: Vec<f32>,
}

/// A batch returns a list; a single input may come back as a bare object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ZeroShotResponse {
    Batch(Vec<ZeroShotResult>),
    Single(ZeroShotResult),
}

impl ZeroShotResponse {
    fn into_results(self) -> Vec<ZeroShotResult> {
        match self {
            Self::Batch(results) => results,
            Self::Single(result) => vec![result],
        }
    }
}

/// Pick the highest-scoring label.
fn best_label(result: ZeroShotResult) -> Result<Label, CategorizationError> {
    let best = result
        .labels
        .into_iter()
        .zip(result.scores)
        .max_by(|a, b| a.1.total_cmp(&b.1));
    match best {
        Some((category, score)) => Ok(Label {
            category,
            confidence: Some(score),
        }),
        None => Err(CategorizationError::Malformed(
            "result carried no labels".into(),
        )),
    }
}

#[async_trait]
impl Classifier for HuggingFaceClassifier {
    async fn classify(
        &self,
        transactions: &[Transaction],
        taxonomy: &[String],
    ) -> Result<Vec<Label>, CategorizationError> {
        let inputs: Vec<&str> = transactions
            .iter()
            .map(|t| t.description.as_str())
            .collect();
        let body = serde_json::json!({
            "inputs": inputs,
            "parameters": { "candidate_labels": taxonomy },
        });

        let resp = self
            .client
            .post(self.model_url())
            .bearer_auth(self.token.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| CategorizationError::Unreachable(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(CategorizationError::Unreachable(format!(
                "HTTP {status}: {text}"
            )));
        }

        let text = resp
            .text()
            .await
            .map_err(|e| CategorizationError::Unreachable(e.to_string()))?;
        let parsed: ZeroShotResponse = serde_json::from_str(&text)
            .map_err(|e| CategorizationError::Malformed(e.to_string()))?;

        let labels = parsed
            .into_results()
            .into_iter()
            .map(best_label)
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(
            model = %self.model,
            count = labels.len(),
            "Zero-shot classification complete"
        );
        Ok(labels)
    }
}
