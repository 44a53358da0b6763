//! Aggregates ledger history into the figures the advice prompt needs.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::pipeline::types::CategorizedTransaction;

/// How many of the largest outflows to surface.
const TOP_OUTFLOWS: usize = 5;

/// A single large outflow, for the prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct Outflow {
    pub date: NaiveDate,
    pub description: String,
    pub category: String,
    /// Positive magnitude of the spend.
    pub amount: Decimal,
}

/// Totals derived from categorized history. Spend figures are magnitudes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpendingSummary {
    pub count: usize,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    pub total_spend: Decimal,
    pub total_income: Decimal,
    pub spend_by_category: BTreeMap<String, Decimal>,
    /// Keyed by `YYYY-MM`.
    pub spend_by_month: BTreeMap<String, Decimal>,
    pub largest_outflows: Vec<Outflow>,
}

impl SpendingSummary {
    pub fn from_history(history: &[CategorizedTransaction]) -> Self {
        let mut summary = Self {
            count: history.len(),
            ..Self::default()
        };
        let mut outflows = Vec::new();

        for item in history {
            let txn = &item.transaction;
            summary.first_date = Some(summary.first_date.map_or(txn.date, |d| d.min(txn.date)));
            summary.last_date = Some(summary.last_date.map_or(txn.date, |d| d.max(txn.date)));

            if txn.is_outflow() {
                let spend = txn.amount.abs();
                summary.total_spend += spend;
                *summary
                    .spend_by_category
                    .entry(item.category.clone())
                    .or_default() += spend;
                *summary
                    .spend_by_month
                    .entry(txn.date.format("%Y-%m").to_string())
                    .or_default() += spend;
                outflows.push(Outflow {
                    date: txn.date,
                    description: txn.description.clone(),
                    category: item.category.clone(),
                    amount: spend,
                });
            } else {
                summary.total_income += txn.amount;
            }
        }

        outflows.sort_by(|a, b| b.amount.cmp(&a.amount).then(a.date.cmp(&b.date)));
        outflows.truncate(TOP_OUTFLOWS);
        summary.largest_outflows = outflows;
        summary
    }

    /// Categories sorted by spend, largest first.
    pub fn top_categories(&self) -> Vec<(&str, Decimal)> {
        let mut cats: Vec<(&str, Decimal)> = self
            .spend_by_category
            .iter()
            .map(|(k, v)| (k.as_str(), *v))
            .collect();
        cats.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        cats
    }

    /// Render as plain-text lines for an LLM prompt.
    pub fn to_prompt_text(&self) -> String {
        let mut out = String::with_capacity(512);
        out.push_str(&format!("Transactions: {}\n", self.count));
        if let (Some(first), Some(last)) = (self.first_date, self.last_date) {
            out.push_str(&format!("Period: {first} to {last}\n"));
        }
        out.push_str(&format!("Total spend: {:.2}\n", self.total_spend));
        out.push_str(&format!("Total income: {:.2}\n", self.total_income));

        if !self.spend_by_category.is_empty() {
            out.push_str("\nSpend by category:\n");
            for (category, amount) in self.top_categories() {
                out.push_str(&format!("  {category}: {amount:.2}\n"));
            }
        }

        if !self.spend_by_month.is_empty() {
            out.push_str("\nSpend by month:\n");
            for (month, amount) in &self.spend_by_month {
                out.push_str(&format!("  {month}: {amount:.2}\n"));
            }
        }

        if !self.largest_outflows.is_empty() {
            out.push_str("\nLargest purchases:\n");
            for o in &self.largest_outflows {
                let description: String = o.description.chars().take(60).collect();
                out.push_str(&format!(
                    "  {} {} ({}): {:.2}\n",
                    o.date, description, o.category, o.amount
                ));
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use rust_decimal_macros::dec;

    use super::*;
    use crate::pipeline::types::Transaction;

    fn item(date: (i32, u32, u32), amount: Decimal, desc: &str, cat: &str) -> CategorizedTransaction {
        CategorizedTransaction {
            transaction: Transaction {
                id: None,
                date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
                amount,
                description: desc.into(),
                raw: BTreeMap::new(),
            },
            category: cat.into(),
            confidence: None,
        }
    }

    fn history() -> Vec<CategorizedTransaction> {
        vec![
            item((2024, 1, 3), dec!(-45.20), "Trader Joe's", "Groceries"),
            item((2024, 1, 15), dec!(2500.00), "Payroll", "Income"),
            item((2024, 1, 20), dec!(-1200.00), "Rent", "Housing"),
            item((2024, 2, 2), dec!(-60.00), "Whole Foods", "Groceries"),
            item((2024, 2, 9), dec!(-32.50), "Bistro", "Dining"),
        ]
    }

    #[test]
    fn totals_split_spend_and_income() {
        let s = SpendingSummary::from_history(&history());
        assert_eq!(s.count, 5);
        assert_eq!(s.total_spend, dec!(1337.70));
        assert_eq!(s.total_income, dec!(2500.00));
        assert_eq!(s.spend_by_category["Groceries"], dec!(105.20));
        assert_eq!(s.spend_by_month["2024-01"], dec!(1245.20));
        assert_eq!(s.spend_by_month["2024-02"], dec!(92.50));
        assert_eq!(s.first_date, NaiveDate::from_ymd_opt(2024, 1, 3));
        assert_eq!(s.last_date, NaiveDate::from_ymd_opt(2024, 2, 9));
    }

    #[test]
    fn largest_outflows_sorted_descending() {
        let s = SpendingSummary::from_history(&history());
        let amounts: Vec<Decimal> = s.largest_outflows.iter().map(|o| o.amount).collect();
        assert_eq!(amounts, vec![dec!(1200.00), dec!(60.00), dec!(45.20), dec!(32.50)]);
    }

    #[test]
    fn top_categories_largest_first() {
        let s = SpendingSummary::from_history(&history());
        let names: Vec<&str> = s.top_categories().into_iter().map(|(c, _)| c).collect();
        assert_eq!(names, vec!["Housing", "Groceries", "Dining"]);
    }

    #[test]
    fn empty_history_is_zeroed() {
        let s = SpendingSummary::from_history(&[]);
        assert_eq!(s.count, 0);
        assert!(s.first_date.is_none());
        assert!(s.total_spend.is_zero());
    }

    #[test]
    fn prompt_text_includes_sections() {
        let text = SpendingSummary::from_history(&history()).to_prompt_text();
        assert!(text.contains("Transactions: 5"));
        assert!(text.contains("Period: 2024-01-03 to 2024-02-09"));
        assert!(text.contains("Housing: 1200.00"));
        assert!(text.contains("2024-02: 92.50"));
        assert!(text.contains("Rent (Housing)"));
    }
}
