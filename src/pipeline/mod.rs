//! Advice pipeline.
//!
//! Every run flows through the same stages:
//! 1. `SourceAdapter::fetch()`: raw transactions from the tabular source
//! 2. `dedup::filter_new()`: drop what the ledger already holds
//! 3. `Categorizer::categorize()`: one taxonomy label per new transaction
//! 4. `Ledger::write()`: atomic batch persist
//! 5. `Ledger::read_history()`: full categorized history
//! 6. `AdviceGenerator::generate()`: advice text from the history
//! 7. `Notifier::send()`: SMS broadcast to every recipient
//!
//! **Nothing is advised on before it is persisted.**

pub mod advice;
pub mod categorize;
pub mod dedup;
pub mod notifier;
pub mod orchestrator;
pub mod summary;
pub mod types;

pub use orchestrator::{Pipeline, PipelineDeps, PipelineOptions, RunReport};
