use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
#[cfg(feature = "ts")]
use ts_rs::TS;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct BudgetItem {
    pub category: String,
    pub amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Monthly budget; `month` is `YYYY-MM`. Posting one for an existing month
/// replaces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct BudgetRequest {
    pub user_id: String,
    pub month: String,
    pub total_budget: f64,
    pub categories: Vec<BudgetItem>,
}

impl BudgetRequest {
    /// Sum of the category amounts, for checking against `total_budget`.
    pub fn allocated(&self) -> f64 {
        self.categories.iter().map(|c| c.amount).sum()
    }
}

/// A budget as stored by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct SavedBudget {
    #[serde(rename = "_id", alias = "id", default)]
    pub id: Option<String>,
    pub user_id: String,
    pub month: String,
    pub total_budget: f64,
    #[serde(default)]
    pub categories: Vec<BudgetItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct TransactionSummary {
    pub total_expenses: f64,
    pub total_income: f64,
    pub net_cash_flow: f64,
    #[serde(default)]
    pub expense_by_category: HashMap<String, f64>,
    #[serde(default)]
    pub expense_by_high_level_category: HashMap<String, f64>,
    #[serde(default)]
    pub largest_expenses: Vec<Value>,
    #[serde(default)]
    pub largest_income: Vec<Value>,
    #[serde(default)]
    pub transaction_count: u64,
    /// `start_date` / `end_date` as `YYYY-MM-DD`.
    #[serde(default)]
    pub date_range: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
#[serde(rename_all = "snake_case")]
pub enum BudgetStatus {
    OnTrack,
    Warning,
    Exceeded,
}

impl std::fmt::Display for BudgetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BudgetStatus::OnTrack => write!(f, "On track"),
            BudgetStatus::Warning => write!(f, "Warning"),
            BudgetStatus::Exceeded => write!(f, "Exceeded"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct BudgetProgressItem {
    pub category: String,
    pub budget_amount: f64,
    pub spent_amount: f64,
    pub remaining_amount: f64,
    /// 0-100, may exceed 100 when over budget.
    pub percentage_used: f64,
    pub status: BudgetStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct BudgetProgress {
    pub user_id: String,
    pub month: String,
    pub total_budget: f64,
    pub total_spent: f64,
    pub remaining_budget: f64,
    pub percentage_used: f64,
    #[serde(default)]
    pub categories: Vec<BudgetProgressItem>,
    #[serde(default)]
    pub last_updated: Option<String>,
}

impl BudgetProgress {
    pub fn exceeded_categories(&self) -> impl Iterator<Item = &BudgetProgressItem> {
        self.categories
            .iter()
            .filter(|c| c.status == BudgetStatus::Exceeded)
    }
}
