//! Money/tax calculation for invoices.
//!
//! All amounts are integer minor currency units (`u64`). Tax rates are basis
//! points (500 = 5%). Line quantities are thousandths of a unit (1500 = 1.5)
//! so fractional quantities stay in deterministic integer arithmetic.
//! Every division rounds half-up; the helpers below are the only place
//! rounding happens.

use serde::{Deserialize, Serialize};

use tally_core::{DomainError, ValueObject};

/// Maximum accepted line-item description length.
pub const MAX_DESCRIPTION_LEN: usize = 500;

/// Quantity fixed-point scale: thousandths of a unit.
const QUANTITY_SCALE: u128 = 1_000;

/// Tax rate scale: basis points per whole.
const BPS_SCALE: u128 = 10_000;

/// One billable entry on an invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    /// Stable ordering within the invoice.
    pub sort_order: u32,
    pub description: String,
    /// Quantity in thousandths of a unit (1500 = 1.5 units). Must be > 0.
    pub quantity_milli: u64,
    /// Price per whole unit in minor currency units.
    pub unit_price: u64,
}

impl LineItem {
    /// Line amount: quantity x unit price, rounded half-up to the minor unit.
    pub fn amount(&self) -> Result<u64, DomainError> {
        let raw = u128::from(self.quantity_milli) * u128::from(self.unit_price);
        round_half_up(raw, QUANTITY_SCALE)
    }

    /// Field-level validation; the message names the violated field.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.description.trim().is_empty() {
            return Err(DomainError::validation("line item description must not be empty"));
        }
        if self.description.len() > MAX_DESCRIPTION_LEN {
            return Err(DomainError::validation(format!(
                "line item description exceeds {MAX_DESCRIPTION_LEN} characters"
            )));
        }
        if self.quantity_milli == 0 {
            return Err(DomainError::validation("line item quantity must be positive"));
        }
        Ok(())
    }
}

/// Computed monetary summary of an invoice.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceTotals {
    pub subtotal: u64,
    pub tax_amount: u64,
    pub total: u64,
}

impl ValueObject for InvoiceTotals {}

/// Compute subtotal, tax, and grand total for a set of line items.
///
/// Pure and deterministic: identical input always yields identical output.
///
/// - `subtotal` = sum of line amounts
/// - taxable base = `subtotal - discount`, clamped at zero when the discount
///   exceeds the subtotal (a discount can never produce negative tax)
/// - `tax_amount` = taxable base x rate, rounded half-up
/// - `total` = taxable base + tax
///
/// Overflow anywhere is a validation error, never a silent wrap.
pub fn compute_totals(
    items: &[LineItem],
    tax_rate_bps: u32,
    discount: u64,
) -> Result<InvoiceTotals, DomainError> {
    let mut subtotal: u64 = 0;
    for item in items {
        subtotal = subtotal
            .checked_add(item.amount()?)
            .ok_or_else(|| DomainError::validation("invoice subtotal overflow"))?;
    }

    let taxable_base = subtotal.saturating_sub(discount);

    let tax_amount = round_half_up(
        u128::from(taxable_base) * u128::from(tax_rate_bps),
        BPS_SCALE,
    )?;

    let total = taxable_base
        .checked_add(tax_amount)
        .ok_or_else(|| DomainError::validation("invoice total overflow"))?;

    Ok(InvoiceTotals {
        subtotal,
        tax_amount,
        total,
    })
}

fn round_half_up(numerator: u128, denominator: u128) -> Result<u64, DomainError> {
    let rounded = (numerator + denominator / 2) / denominator;
    u64::try_from(rounded).map_err(|_| DomainError::validation("amount overflow"))
}
