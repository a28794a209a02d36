use serde::Deserialize;

use crate::api::{ApiError, RequestDispatcher};
use crate::models::{BudgetProgress, BudgetRequest, SavedBudget, TransactionSummary};

use super::api_path;

#[derive(Debug, Deserialize)]
struct BudgetsResponse {
    #[serde(default)]
    budgets: Vec<SavedBudget>,
}

#[derive(Debug, Deserialize)]
struct SaveBudgetResponse {
    budget: SavedBudget,
}

#[derive(Clone)]
pub struct FinanceService {
    dispatcher: RequestDispatcher,
}

impl FinanceService {
    pub fn new(dispatcher: RequestDispatcher) -> Self {
        Self { dispatcher }
    }

    pub async fn summary(&self, user_id: &str) -> Result<TransactionSummary, ApiError> {
        self.dispatcher
            .get(&api_path(&["finance", "summary", user_id], &[]))
            .await
    }

    /// Summary over an explicit `YYYY-MM-DD` range.
    pub async fn summary_between(
        &self,
        user_id: &str,
        start_date: &str,
        end_date: &str,
    ) -> Result<TransactionSummary, ApiError> {
        let path = api_path(
            &["finance", "summary", user_id],
            &[
                ("start_date", start_date.to_string()),
                ("end_date", end_date.to_string()),
            ],
        );
        self.dispatcher.get(&path).await
    }

    /// Create or replace the budget for `budget.month`.
    pub async fn set_budget(&self, budget: &BudgetRequest) -> Result<SavedBudget, ApiError> {
        let response: SaveBudgetResponse = self.dispatcher.post("/finance/budget", budget).await?;
        Ok(response.budget)
    }

    /// Progress against a month's budget; the server defaults to the
    /// current month.
    pub async fn progress(&self, user_id: &str, month: Option<&str>) -> Result<BudgetProgress, ApiError> {
        let query: Vec<(&str, String)> = month.map(|m| ("month", m.to_string())).into_iter().collect();
        self.dispatcher
            .get(&api_path(&["finance", "progress", user_id], &query))
            .await
    }

    pub async fn budgets(&self, user_id: &str) -> Result<Vec<SavedBudget>, ApiError> {
        let response: BudgetsResponse = self
            .dispatcher
            .get(&api_path(&["finance", "budgets", user_id], &[]))
            .await?;
        Ok(response.budgets)
    }
}
