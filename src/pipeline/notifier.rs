//! Notifier: best-effort SMS broadcast of the advice text.
//!
//! Every recipient gets an attempt, in list order. A failure for one
//! recipient is recorded and the loop moves on; the caller reads the
//! aggregate `DeliveryResult` to learn which recipients were reached.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::DeliveryError;
use crate::pipeline::types::{
    DeliveryOutcome, DeliveryResult, Recipient, RecipientList, SmsProvider,
};

/// Percent-encode advice text for transport.
pub fn encode_message(text: &str) -> String {
    urlencoding::encode(text).into_owned()
}

/// Reverse of [`encode_message`].
pub fn decode_message(encoded: &str) -> Result<String, DeliveryError> {
    urlencoding::decode(encoded)
        .map(|s| s.into_owned())
        .map_err(|e| DeliveryError::MalformedResponse(format!("invalid percent-encoding: {e}")))
}

/// Per-recipient retry policy.
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    /// Attempts per recipient, including the first. Minimum 1.
    pub max_attempts: u32,
    /// Pause between attempts to the same recipient.
    pub retry_backoff: Duration,
    /// Upper bound on a single provider call. An expired attempt counts as
    /// a failed attempt for that recipient only.
    pub attempt_timeout: Option<Duration>,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            retry_backoff: Duration::from_millis(500),
            attempt_timeout: None,
        }
    }
}

pub struct Notifier {
    provider: Arc<dyn SmsProvider>,
    config: NotifierConfig,
}

impl Notifier {
    pub fn new(provider: Arc<dyn SmsProvider>, config: NotifierConfig) -> Self {
        Self { provider, config }
    }

    /// Encode `advice` and deliver it to every recipient.
    pub async fn send(&self, advice: &str, recipients: &RecipientList) -> DeliveryResult {
        let encoded = encode_message(advice);
        let mut result = DeliveryResult {
            outcomes: Vec::with_capacity(recipients.len()),
        };

        for recipient in recipients.iter() {
            let outcome = self.deliver_one(recipient, &encoded).await;
            if outcome.success {
                info!(
                    provider = self.provider.name(),
                    recipient = %recipient,
                    attempts = outcome.attempts,
                    "SMS delivered"
                );
            } else {
                warn!(
                    provider = self.provider.name(),
                    recipient = %recipient,
                    attempts = outcome.attempts,
                    error = %outcome.detail,
                    "SMS delivery failed"
                );
            }
            result.outcomes.push(outcome);
        }

        info!(
            recipients = recipients.len(),
            failed = result.failed_recipients().len(),
            "Broadcast complete"
        );
        result
    }

    async fn deliver_one(&self, recipient: &Recipient, encoded: &str) -> DeliveryOutcome {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempts = 0;

        loop {
            attempts += 1;
            match self.attempt(recipient, encoded).await {
                Ok(detail) => {
                    return DeliveryOutcome {
                        recipient: recipient.clone(),
                        success: true,
                        detail,
                        attempts,
                    };
                }
                Err(e) if attempts < max_attempts => {
                    warn!(
                        recipient = %recipient,
                        attempt = attempts,
                        error = %e,
                        "SMS attempt failed, retrying"
                    );
                    tokio::time::sleep(self.config.retry_backoff).await;
                }
                Err(e) => {
                    return DeliveryOutcome {
                        recipient: recipient.clone(),
                        success: false,
                        detail: e.to_string(),
                        attempts,
                    };
                }
            }
        }
    }

    async fn attempt(&self, recipient: &Recipient, encoded: &str) -> Result<String, DeliveryError> {
        let send = self.provider.send(recipient, encoded);
        let response = match self.config.attempt_timeout {
            Some(after) => tokio::time::timeout(after, send)
                .await
                .map_err(|_| DeliveryError::Transport(format!("timed out after {after:?}")))??,
            None => send.await?,
        };
        self.provider.check(&response)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::pipeline::types::ProviderResponse;

    /// Scripted provider: each recipient maps to a queue of replies.
    struct ScriptedSms {
        replies: Mutex<HashMap<String, Vec<Result<String, String>>>>,
        sent: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedSms {
        fn new(script: Vec<(&str, Vec<Result<&str, &str>>)>) -> Self {
            let replies = script
                .into_iter()
                .map(|(phone, rs)| {
                    let rs = rs
                        .into_iter()
                        .rev()
                        .map(|r| r.map(String::from).map_err(String::from))
                        .collect();
                    (phone.to_string(), rs)
                })
                .collect();
            Self {
                replies: Mutex::new(replies),
                sent: Mutex::new(Vec::new()),
            }
        }

        fn sent(&self) -> Vec<(String, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SmsProvider for ScriptedSms {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn send(
            &self,
            recipient: &Recipient,
            encoded_message: &str,
        ) -> Result<ProviderResponse, DeliveryError> {
            self.sent
                .lock()
                .unwrap()
                .push((recipient.to_string(), encoded_message.to_string()));
            let next = self
                .replies
                .lock()
                .unwrap()
                .get_mut(recipient.as_str())
                .and_then(|q| q.pop())
                .unwrap_or(Err("no scripted reply".to_string()));
            match next {
                Ok(body) => Ok(ProviderResponse { body }),
                Err(e) => Err(DeliveryError::Transport(e)),
            }
        }

        fn check(&self, response: &ProviderResponse) -> Result<String, DeliveryError> {
            if response.body.contains("success") {
                Ok(response.body.clone())
            } else {
                Err(DeliveryError::Rejected(response.body.clone()))
            }
        }
    }

    fn recipients(phones: &[&str]) -> RecipientList {
        RecipientList::parse_csv(&phones.join(",")).unwrap()
    }

    #[test]
    fn encoding_round_trips() {
        let samples = [
            "Spend less on dining: $120 over budget!",
            "50% of income → rent & utilities? Try 30%.",
            "line one\nline two",
            "",
        ];
        for s in samples {
            let encoded = encode_message(s);
            assert!(!encoded.contains(' '));
            assert!(!encoded.contains('&'));
            assert_eq!(decode_message(&encoded).unwrap(), s);
        }
    }

    #[tokio::test]
    async fn attempts_every_recipient_in_order() {
        let sms = Arc::new(ScriptedSms::new(vec![
            ("15550000001", vec![Ok("success")]),
            ("15550000002", vec![Ok("success")]),
            ("15550000003", vec![Ok("success")]),
        ]));
        let notifier = Notifier::new(sms.clone(), NotifierConfig::default());
        let result = notifier
            .send("hi", &recipients(&["15550000001", "15550000002", "15550000003"]))
            .await;

        assert!(result.is_success());
        let order: Vec<String> = sms.sent().into_iter().map(|(r, _)| r).collect();
        assert_eq!(order, vec!["15550000001", "15550000002", "15550000003"]);
    }

    #[tokio::test]
    async fn failure_does_not_abort_remaining_recipients() {
        let sms = Arc::new(ScriptedSms::new(vec![
            ("15550000001", vec![Err("connection reset")]),
            ("15550000002", vec![Ok("success")]),
            ("15550000003", vec![Ok("quota exceeded")]),
        ]));
        let notifier = Notifier::new(sms.clone(), NotifierConfig::default());
        let result = notifier
            .send("hi", &recipients(&["15550000001", "15550000002", "15550000003"]))
            .await;

        assert_eq!(sms.sent().len(), 3);
        assert_eq!(result.outcomes.len(), 3);
        assert!(!result.outcomes[0].success);
        assert!(result.outcomes[0].detail.contains("connection reset"));
        assert!(result.outcomes[1].success);
        assert!(!result.outcomes[2].success);
        assert_eq!(result.failed_recipients().len(), 2);
    }

    #[tokio::test]
    async fn early_failure_is_reported_even_when_last_succeeds() {
        let sms = Arc::new(ScriptedSms::new(vec![
            ("15550000001", vec![Err("down")]),
            ("15550000002", vec![Ok("success")]),
        ]));
        let notifier = Notifier::new(sms, NotifierConfig::default());
        let result = notifier
            .send("hi", &recipients(&["15550000001", "15550000002"]))
            .await;
        assert!(!result.is_success());
        assert_eq!(
            result.failed_recipients(),
            vec![Recipient::parse("15550000001").unwrap()]
        );
    }

    #[tokio::test]
    async fn sends_percent_encoded_text() {
        let sms = Arc::new(ScriptedSms::new(vec![("15550000001", vec![Ok("success")])]));
        let notifier = Notifier::new(sms.clone(), NotifierConfig::default());
        notifier
            .send("Save 10% & relax", &recipients(&["15550000001"]))
            .await;
        let (_, body) = sms.sent().remove(0);
        assert_eq!(body, "Save%2010%25%20%26%20relax");
    }

    #[tokio::test]
    async fn retries_within_recipient_when_configured() {
        let sms = Arc::new(ScriptedSms::new(vec![(
            "15550000001",
            vec![Err("timeout"), Ok("success")],
        )]));
        let config = NotifierConfig {
            max_attempts: 3,
            retry_backoff: Duration::from_millis(1),
            ..Default::default()
        };
        let notifier = Notifier::new(sms.clone(), config);
        let result = notifier.send("hi", &recipients(&["15550000001"])).await;
        assert!(result.is_success());
        assert_eq!(result.outcomes[0].attempts, 2);
        assert_eq!(sms.sent().len(), 2);
    }

    #[tokio::test]
    async fn default_config_makes_exactly_one_attempt_per_recipient() {
        let sms = Arc::new(ScriptedSms::new(vec![
            ("15550000001", vec![Err("down"), Ok("success")]),
            ("15550000002", vec![Err("down"), Ok("success")]),
        ]));
        let notifier = Notifier::new(sms.clone(), NotifierConfig::default());
        let result = notifier
            .send("hi", &recipients(&["15550000001", "15550000002"]))
            .await;
        assert_eq!(sms.sent().len(), 2);
        assert!(result.outcomes.iter().all(|o| o.attempts == 1 && !o.success));
    }

    /// Provider whose first send to `stuck` never returns in time.
    struct StallingSms {
        stuck: String,
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SmsProvider for StallingSms {
        fn name(&self) -> &str {
            "stalling"
        }

        async fn send(
            &self,
            recipient: &Recipient,
            _: &str,
        ) -> Result<ProviderResponse, DeliveryError> {
            self.sent.lock().unwrap().push(recipient.to_string());
            if recipient.as_str() == self.stuck {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            Ok(ProviderResponse {
                body: "success".into(),
            })
        }

        fn check(&self, response: &ProviderResponse) -> Result<String, DeliveryError> {
            Ok(response.body.clone())
        }
    }

    #[tokio::test]
    async fn attempt_timeout_fails_only_the_stalled_recipient() {
        let sms = Arc::new(StallingSms {
            stuck: "15550000001".into(),
            sent: Mutex::new(Vec::new()),
        });
        let config = NotifierConfig {
            attempt_timeout: Some(Duration::from_millis(20)),
            ..Default::default()
        };
        let notifier = Notifier::new(sms.clone(), config);
        let result = notifier
            .send("hi", &recipients(&["15550000001", "15550000002", "15550000003"]))
            .await;

        assert_eq!(sms.sent.lock().unwrap().len(), 3);
        assert_eq!(result.outcomes.len(), 3);
        assert!(!result.outcomes[0].success);
        assert!(result.outcomes[0].detail.contains("timed out"));
        assert!(result.outcomes[1].success);
        assert!(result.outcomes[2].success);
        assert_eq!(
            result.verdict(),
            crate::pipeline::types::DeliveryVerdict::Partial {
                failed: vec![Recipient::parse("15550000001").unwrap()]
            }
        );
    }
}
