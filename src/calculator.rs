//! Calculator
//!
//! Combines the three discount sources (the global rate, matching conditions
//! and applied coupons) with the global tax rate to price a list of items.
//!
//! The combined discount rate is capped at 100% but never floored. Tax is
//! charged on the undiscounted subtotal and the discount rate is then applied
//! to the taxed total.

use std::{mem, sync::Arc};

use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;
use tracing::debug;

use crate::{
    breakdown::Breakdown,
    conditions::{Condition, ConditionError, ConditionRegistry, ConditionSpec, Rule, RuleCatalog},
    config::Settings,
    coupons::{Coupon, CouponError, CouponRegistry, JsonFileStore, StoreError, UserId},
    events::{ConditionEvaluated, DiscountObserver, NoopObserver},
    fields::FieldResolver,
    items::{Item, OutOfRange},
};

/// Scale used for reported totals and savings.
const REPORTED_SCALE: u32 = 3;

/// Errors raised by a calculation.
///
/// Money arithmetic is checked: a figure that leaves the [`Decimal`] range is
/// reported as an error rather than wrapped or panicked on.
#[derive(Debug, Error)]
pub enum CalculationError {
    /// An item's resolved quantity is exactly zero.
    #[error("item {index} has a quantity of zero")]
    ZeroQuantity {
        /// Position of the offending item
        index: usize,
    },

    /// An item's price or quantity is a number too large for a [`Decimal`].
    #[error("item {index} has an unrepresentable {field}")]
    OutOfRange {
        /// Position of the offending item
        index: usize,

        /// Logical field that failed, `price` or `quantity`
        field: &'static str,

        /// The rejected value
        #[source]
        source: OutOfRange,
    },

    /// An item's line total, or the subtotal once it is added, overflows.
    #[error("item {index} overflows the subtotal")]
    Overflow {
        /// Position of the item whose line could not be added
        index: usize,
    },

    /// A figure derived from the subtotal (tax, discount or total) overflows.
    #[error("total exceeds the representable range")]
    TotalOverflow,
}

/// Errors raised while assembling a calculator from settings.
#[derive(Debug, Error)]
pub enum SetupError {
    /// The coupon state file could not be opened.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The stored coupons could not be loaded.
    #[error(transparent)]
    Coupon(#[from] CouponError),

    /// Rule discovery failed.
    #[error(transparent)]
    Condition(#[from] ConditionError),
}

/// Discount and tax calculator.
#[derive(Debug)]
pub struct Calculator {
    items: Vec<Item>,
    global_discount: Decimal,
    global_tax_rate: Decimal,
    fields: FieldResolver,
    conditions: ConditionRegistry,
    coupons: CouponRegistry,
    observer: Arc<dyn DiscountObserver>,
    fire_events: bool,
}

impl Calculator {
    /// Create a calculator with empty, in-memory registries.
    pub fn new(settings: &Settings) -> Self {
        Self::with_registries(settings, ConditionRegistry::new(), CouponRegistry::new())
    }

    /// Create a calculator around existing registries.
    pub fn with_registries(
        settings: &Settings,
        conditions: ConditionRegistry,
        coupons: CouponRegistry,
    ) -> Self {
        Self {
            items: Vec::new(),
            global_discount: clamp_rate(settings.global_discount),
            global_tax_rate: clamp_rate(settings.global_tax_rate),
            fields: FieldResolver::new(settings.fields.clone()),
            conditions,
            coupons,
            observer: Arc::new(NoopObserver),
            fire_events: settings.fire_events,
        }
    }

    /// Create a calculator wired up from `settings`: coupons persisted to
    /// [`Settings::state_file_path`] and rules discovered from `catalog` under
    /// [`Settings::condition_path`].
    ///
    /// # Errors
    ///
    /// Returns a [`SetupError`] if the coupon state cannot be opened or
    /// loaded, or if a discovered rule cannot be registered.
    pub fn from_settings(settings: &Settings, catalog: &RuleCatalog) -> Result<Self, SetupError> {
        let store = JsonFileStore::open(&settings.state_file_path)?;
        let coupons = CouponRegistry::with_store(store)?;

        let mut conditions = ConditionRegistry::new();
        conditions.discover(
            catalog,
            &settings.condition_namespace,
            &settings.condition_path,
        )?;

        Ok(Self::with_registries(settings, conditions, coupons))
    }

    /// Send notifications to `observer`, for both conditions and coupons.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn DiscountObserver>) -> Self {
        self.coupons =
            mem::take(&mut self.coupons).with_observer(Arc::clone(&observer), self.fire_events);
        self.observer = observer;
        self
    }

    /// Replace the items being priced.
    pub fn set_items(&mut self, items: impl Into<Vec<Item>>) -> &mut Self {
        self.items = items.into();
        self
    }

    /// Items being priced
    pub fn items(&self) -> &[Item] {
        &self.items
    }

    /// Set the global discount percentage, clamped to `[0, 100]`.
    pub fn set_global_discount(&mut self, rate: Decimal) -> &mut Self {
        self.global_discount = clamp_rate(rate);
        self
    }

    /// Alias for [`Self::set_global_discount`].
    pub fn discount(&mut self, rate: Decimal) -> &mut Self {
        self.set_global_discount(rate)
    }

    /// Global discount percentage
    pub fn global_discount(&self) -> Decimal {
        self.global_discount
    }

    /// Set the global tax percentage, clamped to `[0, 100]`.
    pub fn set_global_tax_rate(&mut self, rate: Decimal) -> &mut Self {
        self.global_tax_rate = clamp_rate(rate);
        self
    }

    /// Global tax percentage
    pub fn global_tax_rate(&self) -> Decimal {
        self.global_tax_rate
    }

    /// Field mapping
    pub fn fields(&self) -> &FieldResolver {
        &self.fields
    }

    /// Mutable field mapping
    pub fn fields_mut(&mut self) -> &mut FieldResolver {
        &mut self.fields
    }

    /// Map a logical field to an item key.
    pub fn set_field(
        &mut self,
        logical: impl Into<String>,
        physical: impl Into<String>,
    ) -> &mut Self {
        self.fields.set_field(logical, physical);
        self
    }

    /// Map several logical fields at once.
    pub fn set_fields<I, K, V>(&mut self, fields: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.fields.set_fields(fields);
        self
    }

    /// Condition registry
    pub fn conditions(&self) -> &ConditionRegistry {
        &self.conditions
    }

    /// Mutable condition registry
    pub fn conditions_mut(&mut self) -> &mut ConditionRegistry {
        &mut self.conditions
    }

    /// Coupon registry
    pub fn coupons(&self) -> &CouponRegistry {
        &self.coupons
    }

    /// Mutable coupon registry
    pub fn coupons_mut(&mut self) -> &mut CouponRegistry {
        &mut self.coupons
    }

    /// See [`ConditionRegistry::add`].
    ///
    /// # Errors
    ///
    /// Propagates the registry's [`ConditionError`].
    pub fn add(
        &mut self,
        specs: impl IntoIterator<Item = ConditionSpec>,
    ) -> Result<&mut Self, ConditionError> {
        self.conditions.add(specs)?;
        Ok(self)
    }

    /// See [`ConditionRegistry::define`].
    ///
    /// # Errors
    ///
    /// Propagates the registry's [`ConditionError`].
    pub fn define(
        &mut self,
        slug: impl Into<String>,
        rule: impl Into<Rule>,
        discount: Decimal,
        skip: bool,
    ) -> Result<&mut Self, ConditionError> {
        self.conditions.define(slug, rule, discount, skip)?;
        Ok(self)
    }

    /// See [`ConditionRegistry::define_if`].
    ///
    /// # Errors
    ///
    /// Propagates the registry's [`ConditionError`].
    pub fn define_if(
        &mut self,
        slug: impl Into<String>,
        accepted: bool,
        discount: Decimal,
    ) -> Result<&mut Self, ConditionError> {
        self.conditions.define_if(slug, accepted, discount)?;
        Ok(self)
    }

    /// See [`CouponRegistry::add`].
    ///
    /// # Errors
    ///
    /// Propagates the registry's [`CouponError`].
    pub fn add_coupon(&mut self, coupon: Coupon) -> Result<&mut Self, CouponError> {
        self.coupons.add(coupon)?;
        Ok(self)
    }

    /// See [`CouponRegistry::remove`].
    ///
    /// # Errors
    ///
    /// Propagates the registry's [`CouponError`].
    pub fn remove_coupon(&mut self, code: &str) -> Result<&mut Self, CouponError> {
        self.coupons.remove(code)?;
        Ok(self)
    }

    /// See [`CouponRegistry::apply`].
    ///
    /// # Errors
    ///
    /// Propagates the registry's [`CouponError`].
    pub fn apply_coupon(&mut self, code: &str, user: Option<UserId>) -> Result<bool, CouponError> {
        self.coupons.apply(code, user)
    }

    /// Look up a stored coupon.
    pub fn coupon(&self, code: &str) -> Option<&Coupon> {
        self.coupons.get(code)
    }

    /// Sum of applied coupon percentages.
    pub fn coupon_discount(&self) -> Decimal {
        self.coupons.coupon_discount()
    }

    /// Coupons currently applied.
    pub fn applied_coupons(&self) -> Vec<&Coupon> {
        self.coupons.applied_coupons()
    }

    /// See [`CouponRegistry::remove_applied_coupons`].
    ///
    /// # Errors
    ///
    /// Propagates the registry's [`CouponError`].
    pub fn remove_applied_coupons(&mut self) -> Result<&mut Self, CouponError> {
        self.coupons.remove_applied_coupons()?;
        Ok(self)
    }

    /// See [`CouponRegistry::clear`].
    ///
    /// # Errors
    ///
    /// Propagates the registry's [`CouponError`].
    pub fn clear_coupons(&mut self) -> Result<&mut Self, CouponError> {
        self.coupons.clear()?;
        Ok(self)
    }

    /// Sum of quantity × price over every item.
    ///
    /// A missing or non-numeric price or quantity contributes nothing.
    ///
    /// # Errors
    ///
    /// Returns, for the first offending item:
    ///
    /// - [`CalculationError::OutOfRange`] if its price or quantity is a
    ///   number too large for a [`Decimal`];
    /// - [`CalculationError::ZeroQuantity`] if its quantity is exactly zero;
    /// - [`CalculationError::Overflow`] if its line total, or the running
    ///   subtotal, exceeds the [`Decimal`] range.
    pub fn subtotal(&self) -> Result<Decimal, CalculationError> {
        self.items
            .iter()
            .enumerate()
            .try_fold(Decimal::ZERO, |subtotal, (index, item)| {
                let quantity = self.fields.quantity(item).map_err(|source| {
                    CalculationError::OutOfRange {
                        index,
                        field: "quantity",
                        source,
                    }
                })?;

                if quantity.is_some_and(|quantity| quantity.is_zero()) {
                    return Err(CalculationError::ZeroQuantity { index });
                }

                let price = self.fields.price(item).map_err(|source| {
                    CalculationError::OutOfRange {
                        index,
                        field: "price",
                        source,
                    }
                })?;

                quantity
                    .unwrap_or_default()
                    .checked_mul(price.unwrap_or_default())
                    .and_then(|line| subtotal.checked_add(line))
                    .ok_or(CalculationError::Overflow { index })
            })
    }

    /// Sum of the discounts of every condition whose rule holds, saturating
    /// at the [`Decimal`] bounds.
    pub fn condition_discount(&self) -> Decimal {
        self.conditions
            .conditions()
            .iter()
            .filter(|condition| self.evaluate(condition))
            .map(Condition::discount)
            .fold(Decimal::ZERO, Decimal::saturating_add)
    }

    /// Combined discount percentage, capped at 100.
    ///
    /// `global` replaces the configured global discount for this call and,
    /// like the configured rate, is clamped to `[0, 100]`.
    pub fn discount_rate(&self, global: Option<Decimal>) -> Decimal {
        let global = global.map_or(self.global_discount, clamp_rate);

        global
            .saturating_add(self.condition_discount())
            .saturating_add(self.coupon_discount())
            .min(Decimal::ONE_HUNDRED)
    }

    /// Subtotal × global discount.
    ///
    /// # Errors
    ///
    /// See [`Self::subtotal`]. Also returns
    /// [`CalculationError::TotalOverflow`] if the amount overflows.
    pub fn global_discount_amount(&self) -> Result<Decimal, CalculationError> {
        percent_of(self.subtotal()?, self.global_discount)
    }

    /// Tax on the undiscounted subtotal.
    ///
    /// `rate` replaces the global tax rate for this call and is clamped to
    /// `[0, 100]`.
    ///
    /// # Errors
    ///
    /// See [`Self::subtotal`]. Also returns
    /// [`CalculationError::TotalOverflow`] if the tax overflows.
    pub fn global_tax(&self, rate: Option<Decimal>) -> Result<Decimal, CalculationError> {
        percent_of(self.subtotal()?, self.tax_rate(rate))
    }

    /// Tax on the undiscounted subtotal at the global rate.
    ///
    /// # Errors
    ///
    /// See [`Self::global_tax`].
    pub fn tax_amount(&self) -> Result<Decimal, CalculationError> {
        self.global_tax(None)
    }

    /// Tax on the discounted subtotal at the global rate.
    ///
    /// # Errors
    ///
    /// See [`Self::total_with_discount`].
    pub fn tax_amount_after_discount(&self) -> Result<Decimal, CalculationError> {
        percent_of(self.total_with_discount(None)?, self.global_tax_rate)
    }

    /// Subtotal plus tax.
    ///
    /// `rate` replaces the global tax rate for this call and is clamped to
    /// `[0, 100]`.
    ///
    /// # Errors
    ///
    /// See [`Self::subtotal`]. Also returns
    /// [`CalculationError::TotalOverflow`] if the taxed total overflows.
    pub fn total_with_taxes(&self, rate: Option<Decimal>) -> Result<Decimal, CalculationError> {
        let subtotal = self.subtotal()?;

        with_tax(subtotal, percent_of(subtotal, self.tax_rate(rate))?)
    }

    /// Subtotal less the combined discount, before tax.
    ///
    /// `global` replaces the global discount for this call and is clamped to
    /// `[0, 100]`.
    ///
    /// # Errors
    ///
    /// See [`Self::subtotal`]. Also returns
    /// [`CalculationError::TotalOverflow`] if the discounted total overflows.
    pub fn total_with_discount(
        &self,
        global: Option<Decimal>,
    ) -> Result<Decimal, CalculationError> {
        let subtotal = self.subtotal()?;

        less_discount(subtotal, self.discount_rate(global))
    }

    /// Discounted share of the taxed total, rounded to 3dp.
    ///
    /// `global` replaces the global discount for this call and is clamped to
    /// `[0, 100]`.
    ///
    /// # Errors
    ///
    /// See [`Self::total_with_taxes`].
    pub fn savings(&self, global: Option<Decimal>) -> Result<Decimal, CalculationError> {
        let taxed = self.total_with_taxes(None)?;

        percent_of(taxed, self.discount_rate(global)).map(round_reported)
    }

    /// Final amount payable, rounded to 3dp and never negative.
    ///
    /// # Errors
    ///
    /// See [`Self::total_with_taxes`].
    pub fn total(&self) -> Result<Decimal, CalculationError> {
        let taxed = self.total_with_taxes(None)?;

        discounted_total(taxed, self.discount_rate(None)).map(round_reported)
    }

    /// Compute every reported figure in one pass.
    ///
    /// Conditions are evaluated once per call.
    ///
    /// # Errors
    ///
    /// See [`Self::subtotal`] and [`CalculationError::TotalOverflow`].
    #[tracing::instrument(
        name = "calculator.breakdown",
        skip(self),
        fields(items = self.items.len()),
        err
    )]
    pub fn breakdown(&self) -> Result<Breakdown, CalculationError> {
        let subtotal = self.subtotal()?;
        let discount_rate = self.discount_rate(None);
        let tax_amount = percent_of(subtotal, self.global_tax_rate)?;
        let taxed = with_tax(subtotal, tax_amount)?;

        let breakdown = Breakdown {
            total: round_reported(discounted_total(taxed, discount_rate)?),
            subtotal,
            tax_amount,
            total_after_discount: less_discount(subtotal, discount_rate)?,
            savings: round_reported(percent_of(taxed, discount_rate)?),
            tax_rate: self.global_tax_rate,
            discount_rate,
        };

        debug!(total = %breakdown.total, discount_rate = %discount_rate, "breakdown computed");

        Ok(breakdown)
    }

    fn tax_rate(&self, rate: Option<Decimal>) -> Decimal {
        rate.map_or(self.global_tax_rate, clamp_rate)
    }

    fn evaluate(&self, condition: &Condition) -> bool {
        let matched = condition.evaluate(&self.items);

        if self.fire_events {
            self.observer.on_condition_evaluated(&ConditionEvaluated {
                slug: condition.slug().to_string(),
                discount: condition.discount(),
                rule: condition.rule().clone(),
                matched,
            });
        }

        matched
    }
}

fn clamp_rate(rate: Decimal) -> Decimal {
    rate.clamp(Decimal::ZERO, Decimal::ONE_HUNDRED)
}

fn percent_of(amount: Decimal, rate: Decimal) -> Result<Decimal, CalculationError> {
    amount
        .checked_mul(rate / Decimal::ONE_HUNDRED)
        .ok_or(CalculationError::TotalOverflow)
}

fn with_tax(subtotal: Decimal, tax: Decimal) -> Result<Decimal, CalculationError> {
    subtotal
        .checked_add(tax)
        .ok_or(CalculationError::TotalOverflow)
}

fn less_discount(subtotal: Decimal, rate: Decimal) -> Result<Decimal, CalculationError> {
    subtotal
        .checked_sub(percent_of(subtotal, rate)?)
        .ok_or(CalculationError::TotalOverflow)
}

fn discounted_total(taxed: Decimal, rate: Decimal) -> Result<Decimal, CalculationError> {
    Decimal::ONE
        .checked_sub(rate / Decimal::ONE_HUNDRED)
        .and_then(|factor| taxed.checked_mul(factor))
        .map(|total| total.max(Decimal::ZERO))
        .ok_or(CalculationError::TotalOverflow)
}

fn round_reported(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(REPORTED_SCALE, RoundingStrategy::MidpointAwayFromZero)
}
