//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use secrecy::SecretString;

use crate::channels::TextBeltProvider;
use crate::classifier::{self, HuggingFaceClassifier};
use crate::error::{self, ConfigError};
use crate::llm::{LlmConfig, create_provider};
use crate::pipeline::advice::LlmAdviceGenerator;
use crate::pipeline::categorize::Categorizer;
use crate::pipeline::notifier::{Notifier, NotifierConfig};
use crate::pipeline::types::{DatasetRef, HistoryWindow, LedgerRef, RecipientList};
use crate::pipeline::{Pipeline, PipelineDeps, PipelineOptions};
use crate::sources::SheetsSource;
use crate::store::LibSqlLedger;

const DEFAULT_SHEET_RANGE: &str = "Sheet1";
const DEFAULT_DB_PATH: &str = "./data/finadvisor.db";
const DEFAULT_COLLECTION: &str = "transactions";
const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";

/// Everything a run needs, resolved from the environment.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub sheets_api_key: SecretString,
    pub dataset: DatasetRef,
    pub db_path: PathBuf,
    pub ledger: LedgerRef,
    pub hf_token: SecretString,
    pub hf_model: String,
    pub llm: LlmConfig,
    pub textbelt_key: SecretString,
    pub recipients: RecipientList,
    /// Only advise on the last N days of history. `None` reads all of it.
    pub history_days: Option<u32>,
    pub notify_when_idle: bool,
    pub stage_timeout: Option<Duration>,
    pub sms_max_attempts: u32,
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Parse configuration through `lookup` instead of the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &str| get(key).ok_or_else(|| ConfigError::MissingEnvVar(key.into()));
        let secret = |key: &str| required(key).map(SecretString::from);

        let recipients = RecipientList::parse_csv(&required("FINADVISOR_RECIPIENTS")?).map_err(
            |e| match e {
                ConfigError::InvalidValue { message, .. } => ConfigError::InvalidValue {
                    key: "FINADVISOR_RECIPIENTS".into(),
                    message,
                },
                other => other,
            },
        )?;

        let history_days = parse_opt::<u32>(get("FINADVISOR_HISTORY_DAYS"), "FINADVISOR_HISTORY_DAYS")?;
        if history_days == Some(0) {
            return Err(ConfigError::InvalidValue {
                key: "FINADVISOR_HISTORY_DAYS".into(),
                message: "must be at least 1".into(),
            });
        }

        let stage_timeout = parse_opt::<u64>(
            get("FINADVISOR_STAGE_TIMEOUT_SECS"),
            "FINADVISOR_STAGE_TIMEOUT_SECS",
        )?
        .map(Duration::from_secs);

        let sms_max_attempts =
            parse_opt::<u32>(get("FINADVISOR_SMS_MAX_ATTEMPTS"), "FINADVISOR_SMS_MAX_ATTEMPTS")?
                .unwrap_or(1);
        if sms_max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "FINADVISOR_SMS_MAX_ATTEMPTS".into(),
                message: "must be at least 1".into(),
            });
        }

        let notify_when_idle = match get("FINADVISOR_NOTIFY_WHEN_IDLE") {
            Some(v) => parse_bool(&v, "FINADVISOR_NOTIFY_WHEN_IDLE")?,
            None => true,
        };

        Ok(Self {
            sheets_api_key: secret("FINADVISOR_SHEETS_API_KEY")?,
            dataset: DatasetRef {
                spreadsheet_id: secret("FINADVISOR_SHEET_ID")?,
                range: get("FINADVISOR_SHEET_RANGE").unwrap_or_else(|| DEFAULT_SHEET_RANGE.into()),
            },
            db_path: PathBuf::from(
                get("FINADVISOR_DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.into()),
            ),
            ledger: LedgerRef::new(
                get("FINADVISOR_COLLECTION").unwrap_or_else(|| DEFAULT_COLLECTION.into()),
            ),
            hf_token: secret("FINADVISOR_HF_TOKEN")?,
            hf_model: get("FINADVISOR_HF_MODEL").unwrap_or_else(|| classifier::DEFAULT_MODEL.into()),
            llm: LlmConfig {
                api_key: secret("FINADVISOR_OPENAI_API_KEY")?,
                model: get("FINADVISOR_MODEL").unwrap_or_else(|| DEFAULT_LLM_MODEL.into()),
                base_url: get("FINADVISOR_OPENAI_BASE_URL"),
            },
            textbelt_key: secret("FINADVISOR_TEXTBELT_KEY")?,
            recipients,
            history_days,
            notify_when_idle,
            stage_timeout,
            sms_max_attempts,
        })
    }

    /// History window ending at `today`.
    pub fn history_window(&self, today: NaiveDate) -> HistoryWindow {
        match self.history_days {
            Some(days) => HistoryWindow::Since(today - chrono::Days::new(u64::from(days))),
            None => HistoryWindow::All,
        }
    }

    pub fn pipeline_options(&self, today: NaiveDate) -> PipelineOptions {
        PipelineOptions {
            notify_when_idle: self.notify_when_idle,
            history_window: self.history_window(today),
            stage_timeout: self.stage_timeout,
        }
    }

    /// The stage timeout bounds each SMS attempt, never the whole broadcast.
    pub fn notifier_config(&self) -> NotifierConfig {
        NotifierConfig {
            max_attempts: self.sms_max_attempts,
            attempt_timeout: self.stage_timeout,
            ..NotifierConfig::default()
        }
    }

    /// Open the ledger and wire the production adapters into a pipeline.
    pub async fn build_pipeline(&self, today: NaiveDate) -> error::Result<Pipeline> {
        let ledger = Arc::new(LibSqlLedger::new_local(&self.db_path).await?);
        let classifier = Arc::new(HuggingFaceClassifier::new(
            self.hf_token.clone(),
            &self.hf_model,
        ));
        let sms = Arc::new(TextBeltProvider::new(self.textbelt_key.clone()));

        let deps = PipelineDeps {
            source: Arc::new(SheetsSource::new(self.sheets_api_key.clone())),
            ledger,
            categorizer: Categorizer::new(classifier),
            generator: Arc::new(LlmAdviceGenerator::new(create_provider(&self.llm))),
            notifier: Notifier::new(sms, self.notifier_config()),
        };
        Ok(Pipeline::new(deps, self.pipeline_options(today)))
    }
}

fn parse_opt<T: FromStr>(value: Option<String>, key: &str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .map(|v| {
            v.parse::<T>().map_err(|e| ConfigError::InvalidValue {
                key: key.into(),
                message: format!("'{v}': {e}"),
            })
        })
        .transpose()
}

fn parse_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.into(),
            message: format!("'{value}' is not a boolean"),
        }),
    }
}
