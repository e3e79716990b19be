//! Per-connection budget accounting: reservation/commit/release bookkeeping
//! against a connection's spending cap, plus renewal-window advancement for
//! periodic budgets.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

/// Read methods, always eligible regardless of budget.
pub const READ_METHODS: &[&str] = &[
    "make_invoice",
    "lookup_invoice",
    "list_transactions",
    "get_balance",
    "get_info",
];

/// Invoice/keysend payment methods, eligible only while the budget allows spending.
pub const PAYMENT_METHODS: &[&str] = &[
    "pay_invoice",
    "multi_pay_invoice",
    "pay_keysend",
    "multi_pay_keysend",
];

/// BOLT-12 offer read methods, always eligible.
pub const OFFER_READ_METHODS: &[&str] = &["make_offer", "lookup_offer"];

/// BOLT-12 offer payment methods, eligible only while the budget allows spending.
pub const OFFER_PAYMENT_METHODS: &[&str] = &["pay_offer", "multi_pay_offer"];

/// A parsed renewal interval, e.g. `"10sec"`, `"15s"`, `"1h"`, `"7d"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    /// The interval's length in seconds.
    pub secs: u64,
}

impl FromStr for Interval {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split_at = s
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| Error::InvalidBudgetConfig(format!("missing unit in interval {s}")))?;
        let (magnitude, unit) = s.split_at(split_at);
        let magnitude: u64 = magnitude
            .parse()
            .map_err(|_| Error::InvalidBudgetConfig(format!("not an integer magnitude: {s}")))?;
        let unit_secs = match unit {
            "sec" | "s" => 1,
            "min" | "m" => 60,
            "h" => 60 * 60,
            "d" => 60 * 60 * 24,
            other => {
                return Err(Error::InvalidBudgetConfig(format!(
                    "unrecognized interval unit: {other}"
                )))
            }
        };
        Ok(Interval {
            secs: magnitude * unit_secs,
        })
    }
}

/// Budget configuration for a connection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum BudgetConfig {
    /// No cap; all payment methods are always eligible.
    Unlimited,
    /// A one-time cap; once spent, payment methods become permanently ineligible.
    Fixed {
        /// The cap, in millisatoshis. `0` disables payments permanently.
        cap_msat: u64,
    },
    /// A cap that resets every `interval` after `anchor`.
    Renewing {
        /// The cap, in millisatoshis.
        cap_msat: u64,
        /// The renewal interval.
        interval: Interval,
        /// The wall-clock anchor the renewal boundaries are computed from.
        anchor: u64,
    },
}

impl BudgetConfig {
    /// Validates the configuration (`Renewing` requires `cap_msat > 0`).
    pub fn validate(&self) -> Result<(), Error> {
        if let BudgetConfig::Renewing { cap_msat, .. } = self {
            if *cap_msat == 0 {
                return Err(Error::InvalidBudgetConfig(
                    "renewing budgets require cap_msat > 0".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn cap_msat(&self) -> Option<u64> {
        match self {
            BudgetConfig::Unlimited => None,
            BudgetConfig::Fixed { cap_msat } => Some(*cap_msat),
            BudgetConfig::Renewing { cap_msat, .. } => Some(*cap_msat),
        }
    }

    /// Whether payment methods should be advertised/admitted for this configuration,
    /// ignoring the current ledger balance (i.e. a nonzero cap, or unlimited).
    pub fn payments_enabled(&self) -> bool {
        !matches!(self.cap_msat(), Some(0))
    }
}

/// Per-connection mutable ledger state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Current headroom, in millisatoshis.
    pub remaining_msat: u64,
    /// Wall-clock start of the current renewal window (Renewing only).
    pub period_start: u64,
}

impl LedgerEntry {
    /// A fresh ledger entry for a newly (re)configured budget.
    pub fn fresh(config: &BudgetConfig, now: u64) -> Self {
        LedgerEntry {
            remaining_msat: config.cap_msat().unwrap_or(u64::MAX),
            period_start: now,
        }
    }
}

/// A reservation token returned by [`try_reserve`]; must be settled with
/// [`commit`] or [`release`] exactly once.
#[derive(Debug, Clone, Copy)]
pub struct Reservation {
    /// Opaque id, useful for logging/tracing correlation.
    pub id: Uuid,
    amount_msat: u64,
    consumed: bool,
}

/// Lazily advances a `Renewing` ledger entry to the window that contains `now`,
/// resetting `remaining_msat` to the cap if a boundary was crossed. No-op for
/// `Unlimited`/`Fixed`.
pub fn renew_if_due(config: &BudgetConfig, entry: &mut LedgerEntry, now: u64) {
    if let BudgetConfig::Renewing {
        cap_msat, interval, ..
    } = config
    {
        if interval.secs == 0 {
            return;
        }
        if now >= entry.period_start.saturating_add(interval.secs) {
            let elapsed = now - entry.period_start;
            let k = elapsed / interval.secs;
            entry.period_start += k * interval.secs;
            entry.remaining_msat = *cap_msat;
        }
    }
}

/// Attempts to reserve `amount_msat` against `entry`, renewing first if due.
pub fn try_reserve(
    config: &BudgetConfig,
    entry: &mut LedgerEntry,
    amount_msat: u64,
    now: u64,
) -> Result<Reservation, Error> {
    if matches!(config, BudgetConfig::Unlimited) {
        return Ok(Reservation {
            id: Uuid::new_v4(),
            amount_msat,
            consumed: false,
        });
    }
    renew_if_due(config, entry, now);
    if amount_msat > entry.remaining_msat {
        return Err(Error::QuotaExceeded);
    }
    entry.remaining_msat -= amount_msat;
    Ok(Reservation {
        id: Uuid::new_v4(),
        amount_msat,
        consumed: false,
    })
}

/// Finalizes a reservation after the node confirmed settlement. No-op bookkeeping
/// beyond marking it consumed: the debit already happened in [`try_reserve`].
pub fn commit(reservation: &mut Reservation) -> Result<(), Error> {
    if reservation.consumed {
        return Err(Error::ReservationConsumed);
    }
    reservation.consumed = true;
    Ok(())
}

/// Restores a reservation's amount because the payment failed before settlement.
pub fn release(config: &BudgetConfig, entry: &mut LedgerEntry, reservation: &mut Reservation) {
    if reservation.consumed {
        return;
    }
    reservation.consumed = true;
    if !matches!(config, BudgetConfig::Unlimited) {
        entry.remaining_msat = entry.remaining_msat.saturating_add(reservation.amount_msat);
    }
}

/// Operator-initiated cap/interval change.
pub fn adjust(new_cap: u64, new_interval: Option<Interval>, now: u64) -> (BudgetConfig, LedgerEntry) {
    let config = match new_interval {
        Some(interval) => BudgetConfig::Renewing {
            cap_msat: new_cap,
            interval,
            anchor: now,
        },
        None => BudgetConfig::Fixed { cap_msat: new_cap },
    };
    let entry = LedgerEntry {
        remaining_msat: new_cap,
        period_start: now,
    };
    (config, entry)
}

/// The balance to report for `get_balance`/`nip47-list`: for `Unlimited` this is
/// `None` (the caller falls back to the node's spendable channel balance); for
/// `Fixed`/`Renewing` this is the ledger's `remaining_msat` after a lazy renewal pass.
pub fn remaining_balance(config: &BudgetConfig, entry: &mut LedgerEntry, now: u64) -> Option<u64> {
    match config {
        BudgetConfig::Unlimited => None,
        _ => {
            renew_if_due(config, entry, now);
            Some(entry.remaining_msat)
        }
    }
}

/// Methods advertised/admitted for a connection's current budget
/// configuration, in a fixed canonical order: read methods, then payment
/// methods if enabled, then offer-read, then offer-payment if enabled.
pub fn eligible_methods(config: &BudgetConfig) -> Vec<&'static str> {
    let mut methods: Vec<&'static str> = READ_METHODS.to_vec();
    if config.payments_enabled() {
        methods.extend_from_slice(PAYMENT_METHODS);
    }
    methods.extend_from_slice(OFFER_READ_METHODS);
    if config.payments_enabled() {
        methods.extend_from_slice(OFFER_PAYMENT_METHODS);
    }
    methods
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_interval_units() {
        assert_eq!(Interval::from_str("10sec").unwrap().secs, 10);
        assert_eq!(Interval::from_str("15s").unwrap().secs, 15);
        assert_eq!(Interval::from_str("1h").unwrap().secs, 3600);
        assert_eq!(Interval::from_str("7d").unwrap().secs, 7 * 86400);
        assert_eq!(Interval::from_str("3min").unwrap().secs, 180);
        assert!(Interval::from_str("abc").is_err());
        assert!(Interval::from_str("10parsecs").is_err());
    }

    #[test]
    fn zero_cap_fixed_always_quota_exceeded() {
        let config = BudgetConfig::Fixed { cap_msat: 0 };
        let mut entry = LedgerEntry::fresh(&config, 0);
        let err = try_reserve(&config, &mut entry, 1, 0).unwrap_err();
        assert!(matches!(err, Error::QuotaExceeded));
    }

    #[test]
    fn budget_exhaustion_scenario() {
        let config = BudgetConfig::Fixed { cap_msat: 3001 };
        let mut entry = LedgerEntry::fresh(&config, 0);
        let mut r1 = try_reserve(&config, &mut entry, 3000, 0).unwrap();
        commit(&mut r1).unwrap();
        assert_eq!(entry.remaining_msat, 1);
        let err = try_reserve(&config, &mut entry, 2, 0).unwrap_err();
        assert!(matches!(err, Error::QuotaExceeded));
    }

    #[test]
    fn release_restores_amount() {
        let config = BudgetConfig::Fixed { cap_msat: 1000 };
        let mut entry = LedgerEntry::fresh(&config, 0);
        let mut r = try_reserve(&config, &mut entry, 500, 0).unwrap();
        assert_eq!(entry.remaining_msat, 500);
        release(&config, &mut entry, &mut r);
        assert_eq!(entry.remaining_msat, 1000);
    }

    #[test]
    fn renewing_budget_advances_by_whole_intervals() {
        let config = BudgetConfig::Renewing {
            cap_msat: 3000,
            interval: Interval { secs: 10 },
            anchor: 0,
        };
        let mut entry = LedgerEntry::fresh(&config, 0);
        let mut r = try_reserve(&config, &mut entry, 3000, 0).unwrap();
        commit(&mut r).unwrap();
        assert_eq!(entry.remaining_msat, 0);

        // Not yet due.
        assert_eq!(remaining_balance(&config, &mut entry, 9), Some(0));

        // 11s later, one interval has fully elapsed.
        assert_eq!(remaining_balance(&config, &mut entry, 11), Some(3000));
        let mut r2 = try_reserve(&config, &mut entry, 3000, 11).unwrap();
        commit(&mut r2).unwrap();
        assert_eq!(entry.remaining_msat, 0);
    }

    #[test]
    fn eligible_methods_includes_payments_iff_cap_nonzero() {
        let unlimited = eligible_methods(&BudgetConfig::Unlimited);
        assert!(unlimited.contains(&"pay_invoice"));
        assert!(unlimited.contains(&"pay_offer"));

        let zero = eligible_methods(&BudgetConfig::Fixed { cap_msat: 0 });
        assert!(!zero.contains(&"pay_invoice"));
        assert!(!zero.contains(&"pay_offer"));
        assert!(zero.contains(&"make_invoice"));
        assert!(zero.contains(&"make_offer"));

        let funded = eligible_methods(&BudgetConfig::Fixed { cap_msat: 3000 });
        assert_eq!(
            funded,
            vec![
                "make_invoice",
                "lookup_invoice",
                "list_transactions",
                "get_balance",
                "get_info",
                "pay_invoice",
                "multi_pay_invoice",
                "pay_keysend",
                "multi_pay_keysend",
                "make_offer",
                "lookup_offer",
                "pay_offer",
                "multi_pay_offer",
            ]
        );
    }

    #[test]
    fn payment_of_exactly_remaining_succeeds_one_more_fails() {
        let config = BudgetConfig::Fixed { cap_msat: 100 };
        let mut entry = LedgerEntry::fresh(&config, 0);
        let mut r = try_reserve(&config, &mut entry, 100, 0).unwrap();
        commit(&mut r).unwrap();
        assert_eq!(entry.remaining_msat, 0);

        let config2 = BudgetConfig::Fixed { cap_msat: 100 };
        let mut entry2 = LedgerEntry::fresh(&config2, 0);
        assert!(try_reserve(&config2, &mut entry2, 101, 0).is_err());
    }
}
