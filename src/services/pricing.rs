//! Money and tax engine.
//!
//! Pure functions over a cart snapshot. All monetary values are
//! `rust_decimal::Decimal` with a 2-digit scale in outputs; rounding is
//! half-up (midpoint away from zero) applied per line before summing, never
//! sum-then-round.

use crate::config::TaxConfig;
use crate::entities::discount::{self, DiscountKind};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Rounds to the currency's minor unit (2 decimals), half-up.
pub fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// One cart line as the engine sees it: snapshotted prices plus the tax
/// category of the underlying product.
#[derive(Debug, Clone)]
pub struct LineInput {
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub sale_price: Option<Decimal>,
    pub tax_category: Option<String>,
}

impl LineInput {
    /// Sale price wins only when strictly positive and strictly below list.
    pub fn effective_unit_price(&self) -> Decimal {
        match self.sale_price {
            Some(sale) if sale > Decimal::ZERO && sale < self.unit_price => sale,
            _ => self.unit_price,
        }
    }
}

/// A priced line in the totals output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricedLine {
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
    pub tax_rate: Decimal,
    pub tax_amount: Decimal,
}

/// Tax aggregated per distinct rate, for order-scoped tax line snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxLineSummary {
    pub title: String,
    pub rate: Decimal,
    pub amount: Decimal,
}

/// Full totals summary for a cart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartTotals {
    pub subtotal: Decimal,
    pub discount_total: Decimal,
    pub tax_total: Decimal,
    pub shipping_total: Decimal,
    pub grand_total: Decimal,
    pub lines: Vec<PricedLine>,
    pub tax_lines: Vec<TaxLineSummary>,
}

impl CartTotals {
    pub fn empty() -> Self {
        Self {
            subtotal: Decimal::ZERO,
            discount_total: Decimal::ZERO,
            tax_total: Decimal::ZERO,
            shipping_total: Decimal::ZERO,
            grand_total: Decimal::ZERO,
            lines: Vec::new(),
            tax_lines: Vec::new(),
        }
    }
}

/// Discount applied to a subtotal. Percentage is clamped to `[0, subtotal]`,
/// fixed amounts to `min(value, subtotal)`; the result is always rounded to
/// the minor unit.
pub fn discount_amount(discount: &discount::Model, subtotal: Decimal) -> Decimal {
    if subtotal <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let raw = match discount.kind {
        DiscountKind::Percentage => round2(subtotal * discount.value / Decimal::from(100)),
        DiscountKind::FixedAmount => round2(discount.value),
    };
    raw.clamp(Decimal::ZERO, subtotal)
}

/// Computes the full totals summary.
///
/// Tax is applied to `subtotal - discount_total`, distributed across lines
/// in proportion to their line totals so per-category rates stay exact; when
/// `tax.prices_include_tax` is set the tax share is backed out of the
/// discounted line amount instead of added on top.
pub fn compute_totals(
    lines: &[LineInput],
    discount: Option<&discount::Model>,
    tax: &TaxConfig,
    shipping_total: Option<Decimal>,
) -> CartTotals {
    if lines.is_empty() {
        let shipping = shipping_total.map(round2).unwrap_or(Decimal::ZERO);
        let mut totals = CartTotals::empty();
        totals.shipping_total = shipping;
        totals.grand_total = shipping;
        return totals;
    }

    // Line totals: round each line before summing
    let mut line_totals: Vec<Decimal> = Vec::with_capacity(lines.len());
    let mut subtotal = Decimal::ZERO;
    for line in lines {
        let total = round2(line.effective_unit_price() * Decimal::from(line.quantity));
        subtotal += total;
        line_totals.push(total);
    }

    let discount_total = discount
        .map(|d| discount_amount(d, subtotal))
        .unwrap_or(Decimal::ZERO);

    // Tax per line on the line's share of the discounted base
    let discount_factor = if subtotal > Decimal::ZERO {
        (subtotal - discount_total) / subtotal
    } else {
        Decimal::ONE
    };

    let mut priced_lines: Vec<PricedLine> = Vec::with_capacity(lines.len());
    let mut tax_total = Decimal::ZERO;
    let mut tax_lines: Vec<TaxLineSummary> = Vec::new();

    for (line, line_total) in lines.iter().zip(line_totals.iter()) {
        let rate = line
            .tax_category
            .as_deref()
            .and_then(|cat| tax.category_rates.get(cat).copied())
            .unwrap_or(tax.default_rate);

        let taxable = *line_total * discount_factor;
        let tax_amount = if tax.prices_include_tax {
            round2(taxable - taxable / (Decimal::ONE + rate))
        } else {
            round2(taxable * rate)
        };
        tax_total += tax_amount;

        match tax_lines.iter_mut().find(|t| t.rate == rate) {
            Some(existing) => existing.amount += tax_amount,
            None => tax_lines.push(TaxLineSummary {
                title: format!("Tax {}%", round2(rate * Decimal::from(100)).normalize()),
                rate,
                amount: tax_amount,
            }),
        }

        priced_lines.push(PricedLine {
            product_id: line.product_id,
            quantity: line.quantity,
            unit_price: round2(line.effective_unit_price()),
            line_total: *line_total,
            tax_rate: rate,
            tax_amount,
        });
    }

    // Prices-include-tax means the tax is already inside the subtotal
    let tax_added = if tax.prices_include_tax {
        Decimal::ZERO
    } else {
        tax_total
    };

    let shipping = shipping_total.map(round2).unwrap_or(Decimal::ZERO);
    let grand_total = round2(subtotal - discount_total) + tax_added + shipping;

    CartTotals {
        subtotal,
        discount_total,
        tax_total,
        shipping_total: shipping,
        grand_total,
        lines: priced_lines,
        tax_lines,
    }
}
