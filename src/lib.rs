//! Finadvisor: personal finance advice pipeline.
//!
//! Pulls bank transactions from a spreadsheet, records the new ones in a
//! categorized ledger, and texts advice generated from the full history.

pub mod channels;
pub mod classifier;
pub mod config;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod sources;
pub mod store;
