//! Line-item calculator.
//!
//! Rounding policy: amounts are rounded to whole currency units with
//! midpoint-away-from-zero ([`ROUNDING`]). The line amount is rounded first and the VAT amount is
//! computed from the *rounded* amount, then rounded again. Document totals are plain sums of the
//! rounded line values, so they can always be reproduced exactly from the lines.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use homeledger_core::{DomainError, DomainResult, Money};

/// Rounding applied everywhere an amount is derived.
pub const ROUNDING: RoundingStrategy = RoundingStrategy::MidpointAwayFromZero;

/// Derived amounts of one line.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineAmounts {
    pub amount: Money,
    pub vat_amount: Money,
}

/// Derived totals of a document.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentTotals {
    pub subtotal: Money,
    pub tax: Money,
    pub total: Money,
}

impl DocumentTotals {
    pub const ZERO: DocumentTotals = DocumentTotals {
        subtotal: Money::ZERO,
        tax: Money::ZERO,
        total: Money::ZERO,
    };

    /// `subtotal = Σ amount`, `tax = Σ vat_amount`, `total = subtotal + tax`.
    pub fn from_lines<I>(lines: I) -> DomainResult<Self>
    where
        I: IntoIterator<Item = LineAmounts>,
    {
        let mut subtotal = Money::ZERO;
        let mut tax = Money::ZERO;
        for line in lines {
            subtotal = subtotal.checked_add(line.amount)?;
            tax = tax.checked_add(line.vat_amount)?;
        }
        Ok(Self {
            subtotal,
            tax,
            total: subtotal.checked_add(tax)?,
        })
    }
}

/// Round a decimal to whole currency units.
pub fn round_to_money(value: Decimal) -> DomainResult<Money> {
    value
        .round_dp_with_strategy(0, ROUNDING)
        .to_i64()
        .map(Money::new)
        .ok_or_else(|| DomainError::invariant(format!("amount {value} is out of range")))
}

/// (quantity, unit price, VAT rate) → (amount, VAT amount).
///
/// - quantity must be > 0
/// - unit price must be >= 0
/// - VAT rate is a percentage in `[0, 100]`
pub fn calculate_line(
    quantity: Decimal,
    unit_price: Decimal,
    vat_rate: Decimal,
) -> DomainResult<LineAmounts> {
    if quantity <= Decimal::ZERO {
        return Err(DomainError::InvalidQuantity {
            quantity: quantity.to_string(),
        });
    }
    if unit_price < Decimal::ZERO {
        return Err(DomainError::InvalidPrice(format!(
            "unit price {unit_price} must not be negative"
        )));
    }
    if vat_rate < Decimal::ZERO || vat_rate > Decimal::ONE_HUNDRED {
        return Err(DomainError::InvalidVatRate {
            rate: vat_rate.to_string(),
        });
    }

    let raw = quantity
        .checked_mul(unit_price)
        .ok_or_else(|| DomainError::invariant("line amount overflow"))?;
    let amount = round_to_money(raw)?;

    let raw_vat = Decimal::from(amount.units())
        .checked_mul(vat_rate)
        .and_then(|v| v.checked_div(Decimal::ONE_HUNDRED))
        .ok_or_else(|| DomainError::invariant("VAT amount overflow"))?;
    let vat_amount = round_to_money(raw_vat)?;

    Ok(LineAmounts { amount, vat_amount })
}
