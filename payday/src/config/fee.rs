//! Card charge fee schedule
//!
//! The processor charges a fixed fee plus a percentage on card debits, and
//! refuses charges below a minimum. Patron passes the fee through to the
//! charged participant: the card is hit for the upcharged total, the
//! participant's balance is credited with the nominal amount, and the
//! difference is recorded as the exchange fee.
//!
//! Bank credits carry no fee under the current processor contract.

use patron_types::Cents;
use std::env;

/// Fixed portion of the card charge fee, in cents.
pub const CHARGE_FEE_FIXED_CENTS: i64 = 30;

/// Variable portion of the card charge fee, in basis points (2.9%).
pub const CHARGE_FEE_VAR_BASIS_POINTS: i64 = 290;

/// Default minimum card charge in cents. Chosen so that the upcharged
/// total lands on an even $10.00.
pub const DEFAULT_MINIMUM_CHARGE_CENTS: i64 = 941;

/// Default minimum bank credit in cents. Payouts below this are held over
/// to a later cycle.
pub const DEFAULT_MINIMUM_CREDIT_CENTS: i64 = 1000;

/// Fee on bank credits, in cents. Zero under the current contract.
pub const CREDIT_FEE_CENTS: i64 = 0;

/// Get the configured minimum card charge.
///
/// Reads from MINIMUM_CHARGE_CENTS, falling back to the default. Values
/// below the fixed fee make no sense and are rejected with a warning.
pub fn minimum_charge() -> Cents {
    let cents = env::var("MINIMUM_CHARGE_CENTS")
        .ok()
        .and_then(|v| v.parse().ok())
        .map(|c: i64| {
            if c <= CHARGE_FEE_FIXED_CENTS {
                tracing::warn!(
                    configured = c,
                    default = DEFAULT_MINIMUM_CHARGE_CENTS,
                    "MINIMUM_CHARGE_CENTS not above the fixed fee, using default"
                );
                DEFAULT_MINIMUM_CHARGE_CENTS
            } else {
                c
            }
        })
        .unwrap_or(DEFAULT_MINIMUM_CHARGE_CENTS);
    Cents(cents)
}

/// Get the configured minimum bank credit.
pub fn minimum_credit() -> Cents {
    let cents = env::var("MINIMUM_CREDIT_CENTS")
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|c: &i64| *c > 0)
        .unwrap_or(DEFAULT_MINIMUM_CREDIT_CENTS);
    Cents(cents)
}

/// Compute the total to put on a card so that `nominal` lands in the
/// ledger after fees, along with the recorded fee.
///
/// Charges below the processor minimum are rounded up to the minimum
/// first; the recorded fee is the rounded, upcharged total minus the
/// nominal amount, so it absorbs both the processor fee and any
/// minimum-charge rounding. Always >= 0.
pub fn upcharge(nominal: Cents) -> (Cents, Cents) {
    let rounded = nominal.max(minimum_charge());
    // total = (rounded + fixed) / (1 - var), rounded up to the next cent
    let numerator = (rounded.cents() + CHARGE_FEE_FIXED_CENTS) * 10_000;
    let denominator = 10_000 - CHARGE_FEE_VAR_BASIS_POINTS;
    let total = Cents((numerator + denominator - 1) / denominator);
    let fee = total - nominal;
    (total, fee)
}
