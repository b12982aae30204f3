//! Breakdown

use std::io;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tabled::{
    builder::Builder,
    settings::{Alignment, Color, Style, object::Columns, object::Rows},
};
use thiserror::Error;

/// Errors that can occur when rendering a breakdown.
#[derive(Debug, Error)]
pub enum BreakdownError {
    /// Writing to the output failed.
    #[error("failed to write breakdown: {0}")]
    Io(#[from] io::Error),
}

/// Summary of a single calculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breakdown {
    /// Final total (taxes included, discount applied), rounded to 3dp
    pub total: Decimal,

    /// Sum of quantity × price over every item
    pub subtotal: Decimal,

    /// Tax on the undiscounted subtotal
    pub tax_amount: Decimal,

    /// Subtotal after the combined discount rate, before tax
    pub total_after_discount: Decimal,

    /// Discounted share of the taxed total, rounded to 3dp
    pub savings: Decimal,

    /// Tax percentage used
    pub tax_rate: Decimal,

    /// Combined discount percentage used
    pub discount_rate: Decimal,
}

impl Breakdown {
    /// Render the breakdown as a table.
    ///
    /// # Errors
    ///
    /// Returns [`BreakdownError::Io`] if writing fails.
    pub fn write_to(&self, mut out: impl io::Write) -> Result<(), BreakdownError> {
        let mut builder = Builder::default();

        builder.push_record(["", "Amount"]);
        builder.push_record(["Subtotal".to_string(), self.subtotal.to_string()]);
        builder.push_record([
            format!("Tax ({}%)", self.tax_rate.normalize()),
            self.tax_amount.to_string(),
        ]);
        builder.push_record([
            format!("Discount ({}%)", self.discount_rate.normalize()),
            format!("-{}", self.savings),
        ]);
        builder.push_record([
            "After discount".to_string(),
            self.total_after_discount.to_string(),
        ]);
        builder.push_record(["Total".to_string(), self.total.to_string()]);

        let mut table = builder.build();

        table.with(Style::modern_rounded());
        table.modify(Rows::first(), Color::BOLD);
        table.modify(Rows::last(), Color::BOLD);
        table.modify(Columns::new(1..2), Alignment::right());

        writeln!(out, "{table}")?;

        Ok(())
    }
}
