//! Pricewise
//!
//! Pricewise totals a list of line items after a global discount, rule-based
//! conditions and stateful coupons, adds tax, and reports a breakdown of the
//! result.

pub mod breakdown;
pub mod calculator;
pub mod conditions;
pub mod config;
pub mod coupons;
pub mod events;
pub mod fields;
pub mod items;
pub mod prelude;
