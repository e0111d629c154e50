//! Error budget for crawl and scrape runs.
//!
//! Stops a run that is failing too often instead of hammering a broken site.
//! Discovery uses an adaptive budget, where the allowance grows with
//! successful fetches. Scraping uses a fixed allowance computed up front from
//! the amount of work.

use crate::error::{AppError, Result};

/// Discovery's base allowance when none is configured.
pub const DEFAULT_BASE_ERRORS: usize = 5;

/// Scraping's base allowance, before the per-article share.
pub const SCRAPE_BASE_ERRORS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Allowance {
    /// `base + successes / 10`
    Adaptive { base: usize },
    Fixed(usize),
}

/// Counts successes and failures against a tolerated-failure allowance.
#[derive(Debug, Clone)]
pub struct ErrorBudget {
    allowance: Allowance,
    errors: usize,
    successes: usize,
}

/// Result of an error budget check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BudgetStatus {
    /// Still within the allowance
    Within { errors: usize, allowance: usize },
    /// Abort the run
    Exceeded { errors: usize, allowance: usize },
}

impl ErrorBudget {
    /// Allow `base` errors plus one for every ten successes. `0` means the default.
    pub fn adaptive(base: usize) -> Self {
        let base = if base == 0 { DEFAULT_BASE_ERRORS } else { base };
        Self {
            allowance: Allowance::Adaptive { base },
            errors: 0,
            successes: 0,
        }
    }

    /// Allow exactly `limit` errors.
    pub fn fixed(limit: usize) -> Self {
        Self {
            allowance: Allowance::Fixed(limit),
            errors: 0,
            successes: 0,
        }
    }

    /// Budget for scraping `new_count` articles.
    pub fn for_scrape(new_count: usize) -> Self {
        Self::fixed(SCRAPE_BASE_ERRORS + new_count / 10)
    }

    pub fn record_success(&mut self) {
        self.successes += 1;
    }

    pub fn record_error(&mut self) {
        self.errors += 1;
    }

    pub fn errors(&self) -> usize {
        self.errors
    }

    pub fn successes(&self) -> usize {
        self.successes
    }

    /// Current number of tolerated errors.
    pub fn allowance(&self) -> usize {
        match self.allowance {
            Allowance::Adaptive { base } => base + self.successes / 10,
            Allowance::Fixed(limit) => limit,
        }
    }

    pub fn check(&self) -> BudgetStatus {
        let errors = self.errors;
        let allowance = self.allowance();
        if errors > allowance {
            BudgetStatus::Exceeded { errors, allowance }
        } else {
            BudgetStatus::Within { errors, allowance }
        }
    }

    /// Ok while within budget, `ErrorThresholdExceeded` otherwise.
    pub fn validate(&self) -> Result<()> {
        match self.check() {
            BudgetStatus::Within { .. } => Ok(()),
            BudgetStatus::Exceeded { errors, allowance } => {
                log::error!(
                    "Error budget exceeded: {} errors > {} allowed ({} ok)",
                    errors,
                    allowance,
                    self.successes
                );
                Err(AppError::ErrorThresholdExceeded { errors, allowance })
            }
        }
    }

    /// Record a failure and check the budget in one step.
    pub fn fail(&mut self) -> Result<()> {
        self.record_error();
        self.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adaptive_zero_uses_default() {
        let budget = ErrorBudget::adaptive(0);
        assert_eq!(budget.allowance(), DEFAULT_BASE_ERRORS);
    }

    #[test]
    fn test_adaptive_allows_base_errors() {
        let mut budget = ErrorBudget::adaptive(5);
        for _ in 0..5 {
            assert!(budget.fail().is_ok());
        }
        // errors must exceed the allowance, not merely reach it
        assert!(matches!(
            budget.fail(),
            Err(AppError::ErrorThresholdExceeded {
                errors: 6,
                allowance: 5
            })
        ));
    }

    #[test]
    fn test_adaptive_grows_with_successes() {
        let mut budget = ErrorBudget::adaptive(5);
        for _ in 0..20 {
            budget.record_success();
        }
        assert_eq!(budget.allowance(), 7);
        for _ in 0..7 {
            budget.record_error();
        }
        assert!(matches!(budget.check(), BudgetStatus::Within { .. }));
        budget.record_error();
        assert_eq!(
            budget.check(),
            BudgetStatus::Exceeded {
                errors: 8,
                allowance: 7
            }
        );
    }

    #[test]
    fn test_fixed_ignores_successes() {
        let mut budget = ErrorBudget::fixed(1);
        for _ in 0..100 {
            budget.record_success();
        }
        assert!(budget.fail().is_ok());
        assert!(budget.fail().is_err());
    }

    #[test]
    fn test_scrape_budget() {
        assert_eq!(ErrorBudget::for_scrape(0).allowance(), 50);
        assert_eq!(ErrorBudget::for_scrape(250).allowance(), 75);
    }
}
