//! Paid-API budget tracking.
//!
//! Daily call counts and monthly dollar accrual per external service, priced
//! from invoice-verified token rates. The gate fails closed: if the counters
//! cannot be read, the budget is treated as exhausted and callers route to
//! their free fallback.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::domain::Money;
use crate::error::{AppError, AppResult};
use crate::infra::retry_db_once;
use crate::market;
use crate::storage::Store;

/// Token pricing per (model, token class), dollars per token, from the
/// provider invoice. Search requests are a flat fee per request.
fn output_token_price(model: &str) -> Decimal {
    match model {
        "sonar-pro" => Decimal::new(15, 6), // $15 / 1M
        _ => Decimal::new(1, 6),            // $1 / 1M
    }
}

const REASONING_TOKEN_PRICE: Decimal = Decimal::from_parts(3, 0, 0, false, 6); // $3 / 1M
const SEARCH_REQUEST_PRICE: Decimal = Decimal::from_parts(5, 0, 0, false, 3); // $5 / 1k

/// Sanity bound: a single call never legitimately reports more than this.
pub const MAX_TOKENS_PER_CALL: u64 = 10_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetStatus {
    Ok,
    Warning,
    Exhausted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetLimits {
    pub daily_calls: u32,
    pub monthly_dollars: f64,
}

impl Default for BudgetLimits {
    fn default() -> Self {
        Self {
            daily_calls: 40,
            monthly_dollars: 25.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BudgetSummary {
    pub service: String,
    pub today_calls: u32,
    pub daily_limit: u32,
    pub month_cost: Money,
    pub monthly_budget: Money,
    pub can_call: bool,
}

pub struct BudgetTracker {
    store: Arc<Store>,
    limits: HashMap<String, BudgetLimits>,
}

impl BudgetTracker {
    pub fn new(store: Arc<Store>, limits: HashMap<String, BudgetLimits>) -> Self {
        Self { store, limits }
    }

    fn limits_for(&self, service: &str) -> BudgetLimits {
        self.limits.get(service).cloned().unwrap_or_default()
    }

    /// Cost of one call from its token counts.
    pub fn call_cost(
        model: &str,
        output_tokens: u64,
        reasoning_tokens: u64,
        search_requests: u64,
    ) -> Money {
        let mut cost = Decimal::ZERO;
        cost += Decimal::from(output_tokens) * output_token_price(model);
        cost += Decimal::from(reasoning_tokens) * REASONING_TOKEN_PRICE;
        cost += Decimal::from(search_requests) * SEARCH_REQUEST_PRICE;
        Money::new(cost)
    }

    /// Budget state for a service on a given day. Fail-closed on store errors.
    pub fn check_at(&self, service: &str, today: NaiveDate) -> BudgetStatus {
        let limits = self.limits_for(service);
        let month = format!("{:04}-{:02}", today.year(), today.month());

        let calls = match retry_db_once("budget_day_calls", || {
            self.store.budget_day_calls(service, today)
        }) {
            Ok(c) => c,
            Err(e) => {
                error!(service, error = %e, "budget counters unreadable, failing closed");
                return BudgetStatus::Exhausted;
            }
        };
        let month_cost = match retry_db_once("budget_month_cost", || {
            self.store.budget_month_cost(service, &month)
        }) {
            Ok(c) => c,
            Err(e) => {
                error!(service, error = %e, "budget counters unreadable, failing closed");
                return BudgetStatus::Exhausted;
            }
        };

        let monthly_cap = Decimal::from_f64(limits.monthly_dollars).unwrap_or_default();
        let call_frac = if limits.daily_calls > 0 {
            f64::from(calls) / f64::from(limits.daily_calls)
        } else {
            1.0
        };
        let cost_frac = if monthly_cap > Decimal::ZERO {
            (month_cost.amount() / monthly_cap).to_f64().unwrap_or(1.0)
        } else {
            1.0
        };

        let worst = call_frac.max(cost_frac);
        if worst >= 1.0 {
            BudgetStatus::Exhausted
        } else if worst >= 0.8 {
            BudgetStatus::Warning
        } else {
            BudgetStatus::Ok
        }
    }

    pub fn check(&self, service: &str) -> BudgetStatus {
        self.check_at(service, market::today_et())
    }

    /// Error when the gate is shut, so callers can route to a fallback.
    pub fn ensure_can_call(&self, service: &str) -> AppResult<()> {
        match self.check(service) {
            BudgetStatus::Exhausted => {
                let summary = self.summary(service)?;
                Err(AppError::Exhausted(format!(
                    "{service} budget exhausted ({}/{} calls today, {} of {} this month)",
                    summary.today_calls,
                    summary.daily_limit,
                    summary.month_cost,
                    summary.monthly_budget
                )))
            }
            BudgetStatus::Warning => {
                warn!(service, "budget above 80%");
                Ok(())
            }
            BudgetStatus::Ok => Ok(()),
        }
    }

    pub fn record_at(
        &self,
        service: &str,
        model: &str,
        output_tokens: u64,
        reasoning_tokens: u64,
        search_requests: u64,
        today: NaiveDate,
    ) -> AppResult<Money> {
        for (name, value) in [
            ("output_tokens", output_tokens),
            ("reasoning_tokens", reasoning_tokens),
            ("search_requests", search_requests),
        ] {
            if value > MAX_TOKENS_PER_CALL {
                return Err(AppError::Invalid(format!(
                    "{name} = {value} exceeds per-call maximum {MAX_TOKENS_PER_CALL}"
                )));
            }
        }

        let cost = Self::call_cost(model, output_tokens, reasoning_tokens, search_requests);
        retry_db_once("budget_increment", || {
            self.store.budget_increment(service, today, 1, cost)
        })?;
        Ok(cost)
    }

    pub fn record(
        &self,
        service: &str,
        model: &str,
        output_tokens: u64,
        reasoning_tokens: u64,
        search_requests: u64,
    ) -> AppResult<Money> {
        self.record_at(
            service,
            model,
            output_tokens,
            reasoning_tokens,
            search_requests,
            market::today_et(),
        )
    }

    pub fn summary_at(&self, service: &str, today: NaiveDate) -> AppResult<BudgetSummary> {
        let limits = self.limits_for(service);
        let month = format!("{:04}-{:02}", today.year(), today.month());
        let today_calls =
            retry_db_once("budget_day_calls", || self.store.budget_day_calls(service, today))?;
        let month_cost = retry_db_once("budget_month_cost", || {
            self.store.budget_month_cost(service, &month)
        })?;
        let can_call = self.check_at(service, today) != BudgetStatus::Exhausted;
        Ok(BudgetSummary {
            service: service.to_string(),
            today_calls,
            daily_limit: limits.daily_calls,
            month_cost,
            monthly_budget: Money::new(
                Decimal::from_f64(limits.monthly_dollars).unwrap_or_default(),
            ),
            can_call,
        })
    }

    pub fn summary(&self, service: &str) -> AppResult<BudgetSummary> {
        self.summary_at(service, market::today_et())
    }
}
