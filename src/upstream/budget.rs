//! Request budget for one rate-limited upstream source.
//!
//! The monthly quota is a hard stop: once `used` reaches it, further
//! requests are denied until the calendar month rolls over. The daily budget
//! is advisory and only produces a warning. Counters only ever grow within a
//! period; the month rollover is the one reset.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Default monthly request quota (paid odds-feed tier).
pub const DEFAULT_MONTHLY_QUOTA: u32 = 20_000;
/// Default advisory daily budget (quota spread over 30 days).
pub const DEFAULT_DAILY_BUDGET: u32 = 666;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetLimits {
    pub monthly_quota: u32,
    pub daily_budget: u32,
}

impl Default for BudgetLimits {
    fn default() -> Self {
        Self {
            monthly_quota: DEFAULT_MONTHLY_QUOTA,
            daily_budget: DEFAULT_DAILY_BUDGET,
        }
    }
}

/// Answer to "may I make `n` more requests?".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum BudgetDecision {
    Allowed,
    /// Allowed, but today's usage is over the advisory daily budget
    DailyBudgetLow { used_today: u32, daily_budget: u32 },
    QuotaExhausted { used: u32, quota: u32 },
}

impl BudgetDecision {
    pub fn allowed(&self) -> bool {
        !matches!(self, BudgetDecision::QuotaExhausted { .. })
    }

    pub fn reason(&self) -> Option<String> {
        match self {
            BudgetDecision::Allowed => None,
            BudgetDecision::DailyBudgetLow {
                used_today,
                daily_budget,
            } => Some(format!(
                "Daily budget low: {used_today}/{daily_budget} requests used today"
            )),
            BudgetDecision::QuotaExhausted { used, quota } => {
                Some(format!("Monthly quota exceeded: {used}/{quota}"))
            }
        }
    }
}

impl fmt::Display for BudgetDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason() {
            Some(reason) => f.write_str(&reason),
            None => f.write_str("allowed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateBudget {
    pub source: String,
    pub limits: BudgetLimits,
    /// Requests used since `period_start`
    pub used: u32,
    pub daily_usage: BTreeMap<NaiveDate, u32>,
    /// First day of the current calendar month
    pub period_start: NaiveDate,
}

pub fn month_start(day: NaiveDate) -> NaiveDate {
    day.with_day(1).unwrap_or(day)
}

fn days_in_month(day: NaiveDate) -> u32 {
    let start = month_start(day);
    let next = if start.month() == 12 {
        NaiveDate::from_ymd_opt(start.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(start.year(), start.month() + 1, 1)
    };
    next.map(|n| (n - start).num_days() as u32).unwrap_or(30)
}

/// Reporting view of a budget on a given day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetStatus {
    pub source: String,
    pub period_start: NaiveDate,
    pub monthly_quota: u32,
    pub used: u32,
    pub remaining: u32,
    pub daily_budget: u32,
    pub used_today: u32,
    pub remaining_today: u32,
    /// Days left in the month, today included
    pub days_remaining: u32,
    pub recommended_daily: u32,
}

impl RateBudget {
    pub fn new(source: impl Into<String>, limits: BudgetLimits, today: NaiveDate) -> Self {
        Self {
            source: source.into(),
            limits,
            used: 0,
            daily_usage: BTreeMap::new(),
            period_start: month_start(today),
        }
    }

    /// Reset the counters when `today` falls in a later month than the
    /// current period. Returns true if a reset happened.
    pub fn roll_over(&mut self, today: NaiveDate) -> bool {
        let start = month_start(today);
        if start > self.period_start {
            self.used = 0;
            self.daily_usage.clear();
            self.period_start = start;
            true
        } else {
            false
        }
    }

    pub fn used_on(&self, day: NaiveDate) -> u32 {
        self.daily_usage.get(&day).copied().unwrap_or(0)
    }

    pub fn remaining(&self) -> u32 {
        self.limits.monthly_quota.saturating_sub(self.used)
    }

    pub fn can_consume(&mut self, n: u32, today: NaiveDate) -> BudgetDecision {
        self.roll_over(today);
        if self.used.saturating_add(n) > self.limits.monthly_quota {
            return BudgetDecision::QuotaExhausted {
                used: self.used,
                quota: self.limits.monthly_quota,
            };
        }
        let used_today = self.used_on(today);
        if used_today.saturating_add(n) > self.limits.daily_budget {
            return BudgetDecision::DailyBudgetLow {
                used_today,
                daily_budget: self.limits.daily_budget,
            };
        }
        BudgetDecision::Allowed
    }

    /// Count `n` requests made today.
    pub fn record(&mut self, n: u32, today: NaiveDate) {
        self.roll_over(today);
        self.used = self.used.saturating_add(n);
        let day = self.daily_usage.entry(today).or_insert(0);
        *day = day.saturating_add(n);
    }

    /// Check and, when allowed, record in one step.
    pub fn try_consume(&mut self, n: u32, today: NaiveDate) -> BudgetDecision {
        let decision = self.can_consume(n, today);
        if decision.allowed() {
            self.record(n, today);
        }
        decision
    }

    pub fn status(&self, today: NaiveDate) -> BudgetStatus {
        let mut view = self.clone();
        view.roll_over(today);
        let remaining = view.remaining();
        let used_today = view.used_on(today);
        let days_remaining = (days_in_month(today) + 1).saturating_sub(today.day()).max(1);
        BudgetStatus {
            source: view.source.clone(),
            period_start: view.period_start,
            monthly_quota: view.limits.monthly_quota,
            used: view.used,
            remaining,
            daily_budget: view.limits.daily_budget,
            used_today,
            remaining_today: view.limits.daily_budget.saturating_sub(used_today),
            days_remaining,
            recommended_daily: remaining / days_remaining,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn budget(quota: u32, daily: u32) -> RateBudget {
        RateBudget::new(
            "odds",
            BudgetLimits {
                monthly_quota: quota,
                daily_budget: daily,
            },
            day(2025, 3, 1),
        )
    }

    #[test]
    fn quota_is_a_hard_stop() {
        let mut b = budget(100, 1000);
        let today = day(2025, 3, 10);
        b.record(60, today);
        b.record(40, day(2025, 3, 11));
        assert_eq!(
            b.can_consume(1, day(2025, 3, 11)),
            BudgetDecision::QuotaExhausted {
                used: 100,
                quota: 100
            }
        );
        assert!(!b.can_consume(1, day(2025, 3, 31)).allowed());
    }

    #[test]
    fn month_rollover_resets_counters() {
        let mut b = budget(100, 1000);
        b.record(100, day(2025, 3, 20));
        assert!(b.can_consume(100, day(2025, 4, 1)).allowed());
        assert_eq!(b.used, 0);
        assert!(b.daily_usage.is_empty());
        assert_eq!(b.period_start, day(2025, 4, 1));
    }

    #[test]
    fn clock_going_backwards_does_not_reset() {
        let mut b = budget(100, 1000);
        b.record(30, day(2025, 3, 5));
        assert!(!b.roll_over(day(2025, 2, 27)));
        assert_eq!(b.used, 30);
    }

    #[test]
    fn daily_budget_is_advisory() {
        let mut b = budget(1000, 10);
        let today = day(2025, 3, 4);
        b.record(10, today);
        let decision = b.can_consume(1, today);
        assert!(decision.allowed());
        assert_eq!(
            decision,
            BudgetDecision::DailyBudgetLow {
                used_today: 10,
                daily_budget: 10
            }
        );
        assert!(decision.reason().unwrap().starts_with("Daily budget low"));
        assert_eq!(b.can_consume(1, day(2025, 3, 5)), BudgetDecision::Allowed);
    }

    #[test]
    fn try_consume_does_not_record_denied_requests() {
        let mut b = budget(2, 10);
        let today = day(2025, 3, 4);
        assert!(b.try_consume(2, today).allowed());
        assert!(!b.try_consume(1, today).allowed());
        assert_eq!(b.used, 2);
    }

    #[test]
    fn status_recommends_even_spread_of_remaining() {
        let mut b = budget(20_000, 666);
        b.record(5_000, day(2025, 3, 1));
        b.record(200, day(2025, 3, 22));
        let s = b.status(day(2025, 3, 22));
        assert_eq!(s.remaining, 14_800);
        assert_eq!(s.used_today, 200);
        assert_eq!(s.remaining_today, 466);
        // 22nd through 31st
        assert_eq!(s.days_remaining, 10);
        assert_eq!(s.recommended_daily, 1_480);
    }

    #[test]
    fn days_in_month_handles_december_and_leap_years() {
        assert_eq!(days_in_month(day(2024, 12, 15)), 31);
        assert_eq!(days_in_month(day(2024, 2, 3)), 29);
        assert_eq!(days_in_month(day(2025, 2, 3)), 28);
    }
}
