use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::Error;
use crate::models::SymbolRule;
use crate::Result;

fn to_decimal(field: &str, value: f64) -> Result<Decimal> {
    Decimal::from_f64(value).ok_or_else(|| {
        Error::Validation(format!("{} {} is out of decimal range", field, value))
    })
}

fn to_f64(value: Decimal) -> f64 {
    value.normalize().to_f64().unwrap_or(0.0)
}

/// Round a quantity down onto the LOT_SIZE grid
///
/// The result is clamped into `[min_qty, max_qty]` first and then floored to a
/// multiple of `step_size` counted from `min_qty`, so it never leaves the
/// range. A zero `step_size` falls back to truncating at `quantity_precision`
/// decimals; a zero `max_qty` means unbounded.
pub fn adjust_quantity(quantity: f64, rule: &SymbolRule) -> Result<f64> {
    let min = to_decimal("minQty", rule.min_qty)?;
    let max = to_decimal("maxQty", rule.max_qty)?;
    let step = to_decimal("stepSize", rule.step_size)?;
    let mut qty = to_decimal("quantity", quantity)?;

    if max > Decimal::ZERO && qty > max {
        qty = max;
    }
    if qty < min {
        qty = min;
    }

    if step > Decimal::ZERO {
        let steps = ((qty - min) / step).floor();
        qty = min + steps * step;
    } else {
        qty = qty.round_dp_with_strategy(rule.quantity_precision, RoundingStrategy::ToZero);
        if qty < min {
            qty = min;
        }
    }

    Ok(to_f64(qty))
}

/// Round a price to the nearest PRICE_FILTER tick and `price_precision`
pub fn adjust_price(price: f64, rule: &SymbolRule) -> Result<f64> {
    let min = to_decimal("minPrice", rule.min_price)?;
    let max = to_decimal("maxPrice", rule.max_price)?;
    let tick = to_decimal("tickSize", rule.tick_size)?;
    let mut px = to_decimal("price", price)?;

    if tick > Decimal::ZERO {
        let ticks = ((px - min) / tick).round();
        px = min + ticks * tick;
    }
    px = px.round_dp(rule.price_precision);

    if px < min {
        px = min;
    }
    if max > Decimal::ZERO && px > max {
        px = max;
    }

    Ok(to_f64(px))
}

/// Render a value with at most `precision` decimals and no trailing zeros
pub fn format_decimal(value: f64, precision: u32) -> Result<String> {
    Ok(to_decimal("value", value)?
        .round_dp(precision)
        .normalize()
        .to_string())
}

/// Refuse quantities that rounded to zero or fall under MIN_NOTIONAL
pub fn check_notional(quantity: f64, reference_price: f64, rule: &SymbolRule) -> Result<()> {
    if quantity <= 0.0 {
        return Err(Error::Validation(format!(
            "quantity rounds to zero for {}",
            rule.symbol
        )));
    }

    let notional = quantity * reference_price;
    if rule.min_notional > 0.0 && notional < rule.min_notional {
        return Err(Error::Validation(format!(
            "notional {:.4} below minimum {} for {}",
            notional, rule.min_notional, rule.symbol
        )));
    }

    Ok(())
}
