//! Pricing rules shared by invoices and vouchers.
//!
//! Pure domain logic only: the line-item calculator and the resolution of date-effective
//! service prices. No IO; price rows come from a [`ServicePriceSource`] supplied by the caller.

pub mod calculator;
pub mod service_price;

pub use calculator::{DocumentTotals, LineAmounts, ROUNDING, calculate_line, round_to_money};
pub use service_price::{
    PriceStatus, ServicePrice, ServicePriceId, ServicePriceResolver, ServicePriceSource,
};
