//! TextBelt SMS provider.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::DeliveryError;
use crate::pipeline::types::{ProviderResponse, Recipient, SmsProvider};

pub const DEFAULT_BASE_URL: &str = "https://textbelt.com";

/// Sends one SMS per call through TextBelt's `/text` endpoint.
pub struct TextBeltProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
}

impl TextBeltProvider {
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

    fn api_url(&self) -> String {
        format!("{}/text", self.base_url)
    }
}

#[derive(Debug, Deserialize)]
struct TextBeltReply {
    success: bool,
    #[serde(default, rename = "textId")]
    text_id: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

#[async_trait]
impl SmsProvider for TextBeltProvider {
    fn name(&self) -> &str {
        "textbelt"
    }

    async fn send(
        &self,
        recipient: &Recipient,
        encoded_message: &str,
    ) -> Result<ProviderResponse, DeliveryError> {
        // The message is already percent-encoded; only the other fields need it.
        let form = format!(
            "phone={}&message={}&key={}",
            urlencoding::encode(recipient.as_str()),
            encoded_message,
            urlencoding::encode(self.api_key.expose_secret())
        );

        let resp = self
            .client
            .post(self.api_url())
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body(form)
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        let body = resp
            .text()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        Ok(ProviderResponse { body })
    }

    fn check(&self, response: &ProviderResponse) -> Result<String, DeliveryError> {
        let reply: TextBeltReply = serde_json::from_str(&response.body).map_err(|e| {
            DeliveryError::MalformedResponse(format!("{e}: {}", response.body.trim()))
        })?;

        if !reply.success {
            return Err(DeliveryError::Rejected(
                reply.error.unwrap_or_else(|| "unknown error".into()),
            ));
        }

        Ok(match reply.text_id {
            Some(serde_json::Value::String(id)) => id,
            Some(serde_json::Value::Null) | None => "sent".into(),
            Some(other) => other.to_string(),
        })
    }
}
