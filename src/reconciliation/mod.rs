//! Balance reconciliation for imported statements
//!
//! Three derivations are supported, chosen per institution:
//!
//! - **Forward**: a known opening balance is rolled forward row by row.
//! - **Backward**: only the closing balance is known (credit cards); the walk
//!   starts at the newest row and peels amounts off going back in time. Rows
//!   must already carry their sequence numbers so "newest" is well defined.
//! - **Embedded check**: every row reports its own balance; consecutive
//!   balances must differ by exactly the row's amount, within tolerance.

use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;

use crate::traits::*;
use crate::types::*;

/// One row of a balance walk, oldest first
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceRow {
    pub date: NaiveDateTime,
    pub amount: BigDecimal,
    /// Balance reported by the source for this row
    pub embedded: Option<BigDecimal>,
    /// Balance derived by the reconciler
    pub balance: Option<BigDecimal>,
}

impl BalanceRow {
    pub fn new(date: NaiveDateTime, amount: BigDecimal, embedded: Option<BigDecimal>) -> Self {
        Self {
            date,
            amount,
            embedded,
            balance: None,
        }
    }
}

/// Balances known from outside the rows themselves
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BalanceAnchors {
    pub opening: Option<BigDecimal>,
    pub closing: Option<BigDecimal>,
}

/// Derives running balances for a run's rows
#[derive(Debug, Clone)]
pub struct BalanceReconciler {
    tolerance: BigDecimal,
}

impl Default for BalanceReconciler {
    fn default() -> Self {
        Self::new(BigDecimal::new(5.into(), 3))
    }
}

impl BalanceReconciler {
    /// Create a reconciler accepting embedded-balance drift up to `tolerance`
    pub fn new(tolerance: BigDecimal) -> Self {
        Self {
            tolerance: tolerance.abs(),
        }
    }

    /// Fill `balance` on every row and return the newest balance
    ///
    /// Missing anchors leave balances unset rather than failing; only the
    /// embedded check can reject a run.
    pub fn reconcile(
        &self,
        mode: BalanceMode,
        anchors: &BalanceAnchors,
        rows: &mut [BalanceRow],
    ) -> PipelineResult<Option<BigDecimal>> {
        match mode {
            BalanceMode::Forward => Ok(anchors
                .opening
                .as_ref()
                .map(|opening| self.forward(opening, rows))),
            BalanceMode::Backward => Ok(anchors
                .closing
                .as_ref()
                .map(|closing| self.backward(closing, rows))),
            BalanceMode::EmbeddedCheck => self.check_embedded(rows),
            BalanceMode::Unavailable => Ok(None),
        }
    }

    /// `balance[i] = balance[i-1] + amount[i]`, starting from `opening`
    pub fn forward(&self, opening: &BigDecimal, rows: &mut [BalanceRow]) -> BigDecimal {
        let mut running = opening.clone();
        for row in rows.iter_mut() {
            running += &row.amount;
            row.balance = Some(running.clone());
        }
        running
    }

    /// Newest row takes `closing`; each older row is the newer balance minus
    /// the newer row's amount
    pub fn backward(&self, closing: &BigDecimal, rows: &mut [BalanceRow]) -> BigDecimal {
        let mut running = closing.clone();
        for row in rows.iter_mut().rev() {
            row.balance = Some(running.clone());
            running -= &row.amount;
        }
        closing.clone()
    }

    /// Verify consecutive embedded balances against the row amounts
    pub fn check_embedded(&self, rows: &mut [BalanceRow]) -> PipelineResult<Option<BigDecimal>> {
        let mut previous: Option<BigDecimal> = None;
        for row in rows.iter_mut() {
            let reported = match &row.embedded {
                Some(reported) => reported.clone(),
                None => {
                    // A row without a balance breaks the chain; restart after it
                    previous = None;
                    continue;
                }
            };

            if let Some(prev) = &previous {
                let drift = (prev + &row.amount - &reported).abs();
                if drift > self.tolerance {
                    return Err(ImportError::BalanceConsistency {
                        date: row.date,
                        previous: prev.clone(),
                        amount: row.amount.clone(),
                        reported,
                    });
                }
            }

            row.balance = Some(reported.clone());
            previous = Some(reported);
        }
        Ok(rows.last().and_then(|row| row.balance.clone()))
    }
}

/// Picks a mode from what the run knows
///
/// Embedded balances win, then a closing balance, then an opening (or prior)
/// balance.
#[derive(Debug, Clone, Copy, Default)]
pub struct CapabilitySelector;

impl BalanceModeSelector for CapabilitySelector {
    fn select(&self, capabilities: &BalanceCapabilities) -> BalanceMode {
        if capabilities.rows_carry_balance {
            BalanceMode::EmbeddedCheck
        } else if capabilities.has_closing_balance {
            BalanceMode::Backward
        } else if capabilities.has_opening_balance || capabilities.has_prior_balance {
            BalanceMode::Forward
        } else {
            BalanceMode::Unavailable
        }
    }
}

/// Always uses the same mode
#[derive(Debug, Clone, Copy)]
pub struct FixedMode(pub BalanceMode);

impl BalanceModeSelector for FixedMode {
    fn select(&self, _capabilities: &BalanceCapabilities) -> BalanceMode {
        self.0
    }
}
