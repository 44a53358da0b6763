//! Transaction sources: turn tabular rows into `Transaction`s.
//!
//! Adapters handle transport only; header mapping and cell parsing live
//! here so every tabular source shares them.

pub mod sheets;

pub use sheets::SheetsSource;

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::error::FetchError;
use crate::pipeline::types::Transaction;

const ID_ALIASES: &[&str] = &["id", "transaction id", "transaction_id", "reference"];
const DATE_ALIASES: &[&str] = &["date", "posted", "posted date", "transaction date"];
const AMOUNT_ALIASES: &[&str] = &["amount", "value"];
const DESCRIPTION_ALIASES: &[&str] = &["description", "merchant", "payee", "details", "memo"];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%d %b %Y"];

/// Column positions resolved from the header row.
struct Columns {
    id: Option<usize>,
    date: usize,
    amount: usize,
    description: usize,
}

fn find_column(headers: &[String], aliases: &[&str]) -> Option<usize> {
    let normalized: Vec<String> = headers.iter().map(|h| h.trim().to_lowercase()).collect();
    aliases
        .iter()
        .find_map(|alias| normalized.iter().position(|h| h == alias))
}

fn resolve_columns(headers: &[String]) -> Result<Columns, FetchError> {
    let required = |aliases: &[&str], name: &str| {
        find_column(headers, aliases).ok_or_else(|| FetchError::MissingColumn(name.to_string()))
    };
    Ok(Columns {
        id: find_column(headers, ID_ALIASES),
        date: required(DATE_ALIASES, "date")?,
        amount: required(AMOUNT_ALIASES, "amount")?,
        description: required(DESCRIPTION_ALIASES, "description")?,
    })
}

/// Parse a date cell in any of the accepted formats.
pub fn parse_date(cell: &str) -> Option<NaiveDate> {
    let cell = cell.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(cell, fmt).ok())
}

/// Parse an amount cell: `$1,234.50`, `-12`, `(45.00)` for a negative.
pub fn parse_amount(cell: &str) -> Option<Decimal> {
    let mut s = cell.trim();
    let mut negative = false;
    if let Some(inner) = s.strip_prefix('(').and_then(|r| r.strip_suffix(')')) {
        negative = true;
        s = inner.trim();
    }
    let cleaned: String = s
        .chars()
        .filter(|c| !matches!(c, '$' | '€' | '£' | ',' | ' '))
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    let value = Decimal::from_str(&cleaned).ok()?;
    Some(if negative { -value.abs() } else { value })
}

/// Convert header + data rows into transactions.
///
/// The first row is the header. Blank rows are skipped; short rows are
/// padded with empty cells. `row` numbers in errors are 1-based sheet rows.
pub fn parse_rows(rows: Vec<Vec<String>>) -> Result<Vec<Transaction>, FetchError> {
    let mut iter = rows.into_iter();
    let Some(headers) = iter.next() else {
        return Ok(Vec::new());
    };
    let columns = resolve_columns(&headers)?;

    let mut transactions = Vec::new();
    for (index, mut row) in iter.enumerate() {
        let sheet_row = index + 2;
        if row.iter().all(|c| c.trim().is_empty()) {
            continue;
        }
        if row.len() < headers.len() {
            row.resize(headers.len(), String::new());
        }

        let date_cell = &row[columns.date];
        let date = parse_date(date_cell).ok_or_else(|| FetchError::MalformedRow {
            row: sheet_row,
            reason: format!("unrecognized date '{date_cell}'"),
        })?;
        let amount_cell = &row[columns.amount];
        let amount = parse_amount(amount_cell).ok_or_else(|| FetchError::MalformedRow {
            row: sheet_row,
            reason: format!("unrecognized amount '{amount_cell}'"),
        })?;
        let description = row[columns.description].trim().to_string();
        let id = columns
            .id
            .map(|i| row[i].trim().to_string())
            .filter(|s| !s.is_empty());

        let raw: BTreeMap<String, String> = headers
            .iter()
            .cloned()
            .zip(row.iter().cloned())
            .collect();

        transactions.push(Transaction {
            id,
            date,
            amount,
            description,
            raw,
        });
    }

    Ok(transactions)
}
