//! Pipeline orchestrator: runs the seven stages in fixed order.
//!
//! fetch → filter → categorize → persist → retrieve → generate → notify
//!
//! A stage starts only after the previous one succeeded; the first failure
//! aborts the run and is reported as a `PipelineError` naming the stage.
//! Persist always completes before retrieve, so advice is generated from
//! history that includes this run's transactions.
//!
//! The stage timeout bounds every stage except notify. A broadcast always
//! attempts every recipient; single attempts are bounded by the notifier.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{Instrument, debug, error, info};
use uuid::Uuid;

use crate::error::{PipelineError, Stage, StageError};
use crate::pipeline::categorize::Categorizer;
use crate::pipeline::dedup::filter_new;
use crate::pipeline::notifier::Notifier;
use crate::pipeline::types::{
    AdviceGenerator, CategorizedTransaction, DatasetRef, DeliveryResult, HistoryWindow,
    LedgerRef, RecipientList, SourceAdapter,
};
use crate::store::Ledger;

/// Collaborators a pipeline runs against.
pub struct PipelineDeps {
    pub source: Arc<dyn SourceAdapter>,
    pub ledger: Arc<dyn Ledger>,
    pub categorizer: Categorizer,
    pub generator: Arc<dyn AdviceGenerator>,
    pub notifier: Notifier,
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Still generate and send advice when a run found nothing new.
    pub notify_when_idle: bool,
    pub history_window: HistoryWindow,
    /// Upper bound on each stage before notify. `None` lets stages run
    /// unbounded.
    pub stage_timeout: Option<Duration>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            notify_when_idle: true,
            history_window: HistoryWindow::All,
            stage_timeout: None,
        }
    }
}

/// What one run did.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub fetched: usize,
    pub new_transactions: usize,
    pub persisted: usize,
    /// The advice that was broadcast, if the notify stage ran.
    pub advice: Option<String>,
    /// `None` when an idle run skipped notification.
    pub delivery: Option<DeliveryResult>,
}

pub struct Pipeline {
    deps: PipelineDeps,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(deps: PipelineDeps, options: PipelineOptions) -> Self {
        Self { deps, options }
    }

    /// Execute one full run.
    pub async fn run(
        &self,
        dataset: &DatasetRef,
        ledger: &LedgerRef,
        recipients: &RecipientList,
    ) -> Result<RunReport, PipelineError> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("pipeline_run", %run_id, collection = %ledger.collection);
        self.run_inner(run_id, dataset, ledger, recipients)
            .instrument(span)
            .await
    }

    async fn run_inner(
        &self,
        run_id: Uuid,
        dataset: &DatasetRef,
        ledger: &LedgerRef,
        recipients: &RecipientList,
    ) -> Result<RunReport, PipelineError> {
        info!(source = self.deps.source.name(), "Pipeline run started");

        let raw = self
            .run_stage(Stage::Fetch, self.deps.source.fetch(dataset))
            .await?;
        info!(fetched = raw.len(), "Fetched raw dataset");

        // The existing-keys snapshot is the filter stage's only I/O.
        let existing = self
            .run_stage(Stage::Filter, self.deps.ledger.existing_keys(ledger))
            .await?;
        let dedup = filter_new(&raw, &existing);
        let new_count = dedup.new_transactions.len();
        info!(
            new = new_count,
            skipped_existing = dedup.skipped_existing,
            skipped_in_batch = dedup.skipped_in_batch,
            "Filtered already-recorded transactions"
        );

        let mut report = RunReport {
            run_id,
            fetched: raw.len(),
            new_transactions: new_count,
            persisted: 0,
            advice: None,
            delivery: None,
        };

        let mut written = Vec::new();
        if new_count == 0 {
            info!("No new transactions, skipping categorize and persist");
            if !self.options.notify_when_idle {
                info!("Idle run, notification disabled");
                return Ok(report);
            }
        } else {
            let categorized = self
                .run_stage(
                    Stage::Categorize,
                    self.deps.categorizer.categorize(dedup.new_transactions),
                )
                .await?;

            let ack = self
                .run_stage(Stage::Persist, self.deps.ledger.write(&categorized, ledger))
                .await?;
            report.persisted = ack.written;
            info!(written = ack.written, "Persisted categorized transactions");
            written = categorized;
        }

        let mut history = self
            .run_stage(
                Stage::Retrieve,
                self.deps
                    .ledger
                    .read_history(ledger, self.options.history_window),
            )
            .await?;
        let outside_window = include_run_batch(&mut history, written);
        info!(
            history = history.len(),
            outside_window,
            "Retrieved ledger history"
        );

        let payload = self
            .run_stage(Stage::Generate, self.deps.generator.generate(&history, ledger))
            .await?;
        debug!(chars = payload.advice().len(), "Advice generated");

        let started = Instant::now();
        debug!(stage = %Stage::Notify, "Stage started");
        let delivery = self.deps.notifier.send(payload.advice(), recipients).await;
        debug!(
            stage = %Stage::Notify,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Stage finished"
        );
        info!(summary = %delivery.summary(), "Pipeline run finished");

        report.advice = Some(payload.advice().to_string());
        report.delivery = Some(delivery);
        Ok(report)
    }

    /// Broadcast a given message without running the other stages.
    pub async fn send_advice(&self, message: &str, recipients: &RecipientList) -> DeliveryResult {
        self.deps.notifier.send(message, recipients).await
    }

    async fn run_stage<T, E, F>(&self, stage: Stage, fut: F) -> Result<T, PipelineError>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<StageError>,
    {
        let started = Instant::now();
        debug!(stage = %stage, "Stage started");

        let result = match self.options.stage_timeout {
            Some(after) => match tokio::time::timeout(after, fut).await {
                Ok(inner) => inner.map_err(Into::into),
                Err(_) => Err(StageError::Timeout { after }),
            },
            None => fut.await.map_err(Into::into),
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(value) => {
                debug!(stage = %stage, elapsed_ms, "Stage finished");
                Ok(value)
            }
            Err(source) => {
                error!(stage = %stage, elapsed_ms, error = %source, "Stage failed");
                Err(PipelineError { stage, source })
            }
        }
    }
}

/// Append batch items the history window filtered out, keeping date order.
/// Returns how many were appended.
fn include_run_batch(
    history: &mut Vec<CategorizedTransaction>,
    batch: Vec<CategorizedTransaction>,
) -> usize {
    let present: HashSet<String> = history.iter().map(|c| c.transaction.dedup_key()).collect();
    let before = history.len();
    history.extend(
        batch
            .into_iter()
            .filter(|c| !present.contains(&c.transaction.dedup_key())),
    );
    let appended = history.len() - before;
    if appended > 0 {
        history.sort_by_key(|c| c.transaction.date);
    }
    appended
}
