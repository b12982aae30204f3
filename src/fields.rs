//! Field Resolution
//!
//! Items are opaque records, so the engine never reads `price` or `quantity`
//! directly. It asks a [`FieldResolver`] which physical key holds each logical
//! field. Lookup order:
//!
//! 1. per-instance overrides (`set_field` / `set_fields`)
//! 2. configured defaults
//! 3. the logical name itself

use rust_decimal::Decimal;
use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::items::{Item, OutOfRange, decimal_from_value};

/// Logical name of the unit price field.
pub const PRICE: &str = "price";

/// Logical name of the quantity field.
pub const QUANTITY: &str = "quantity";

/// Two-level logical → physical key mapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldResolver {
    overrides: FxHashMap<String, String>,
    defaults: FxHashMap<String, String>,
}

impl FieldResolver {
    /// Create a resolver seeded with the configured default mapping.
    pub fn new<I, K, V>(defaults: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            overrides: FxHashMap::default(),
            defaults: defaults
                .into_iter()
                .map(|(logical, physical)| (logical.into(), physical.into()))
                .collect(),
        }
    }

    /// Override the physical key for one logical field.
    pub fn set_field(
        &mut self,
        logical: impl Into<String>,
        physical: impl Into<String>,
    ) -> &mut Self {
        self.overrides.insert(logical.into(), physical.into());
        self
    }

    /// Override several logical fields at once.
    pub fn set_fields<I, K, V>(&mut self, fields: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (logical, physical) in fields {
            self.set_field(logical, physical);
        }

        self
    }

    /// Instance-level overrides only; configured defaults are not included.
    pub fn fields(&self) -> &FxHashMap<String, String> {
        &self.overrides
    }

    /// The physical key that `logical` maps to.
    pub fn key_for<'k>(&'k self, logical: &'k str) -> &'k str {
        self.overrides
            .get(logical)
            .or_else(|| self.defaults.get(logical))
            .map_or(logical, String::as_str)
    }

    /// Resolve a logical field on an item. Absence is not an error.
    pub fn resolve<'i>(&self, item: &'i Item, logical: &str) -> Option<&'i Value> {
        item.get(self.key_for(logical))
    }

    /// Resolve a logical field as a decimal; `Ok(None)` when absent or not numeric.
    ///
    /// # Errors
    ///
    /// Returns [`OutOfRange`] if the value is numeric but does not fit a [`Decimal`].
    pub fn decimal(&self, item: &Item, logical: &str) -> Result<Option<Decimal>, OutOfRange> {
        self.resolve(item, logical).map_or(Ok(None), decimal_from_value)
    }

    /// Unit price of an item, if present and numeric.
    ///
    /// # Errors
    ///
    /// See [`Self::decimal`].
    pub fn price(&self, item: &Item) -> Result<Option<Decimal>, OutOfRange> {
        self.decimal(item, PRICE)
    }

    /// Quantity of an item, if present and numeric.
    ///
    /// # Errors
    ///
    /// See [`Self::decimal`].
    pub fn quantity(&self, item: &Item) -> Result<Option<Decimal>, OutOfRange> {
        self.decimal(item, QUANTITY)
    }
}
