//! Conditions
//!
//! Named discount rules. A condition contributes its discount percentage when
//! its rule holds for the current items. Conditions accumulate in insertion
//! order and are never removed individually.

use std::{fmt, sync::Arc};

use rust_decimal::Decimal;
use rustc_hash::FxHashSet;
use thiserror::Error;
use tracing::debug;

use crate::items::Item;

pub mod discovery;

pub use discovery::{ConditionRule, DiscoveryError, RuleCatalog};

/// Errors raised while registering conditions.
#[derive(Debug, Error)]
pub enum ConditionError {
    /// A condition was given an empty slug.
    #[error("slug must be provided")]
    EmptySlug,

    /// A condition with this slug is already registered.
    #[error("condition slug already exists: {0}")]
    DuplicateSlug(String),

    /// Rule discovery failed.
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
}

type RuleFn = dyn Fn(&[Item]) -> bool + Send + Sync;

/// Rule deciding whether a condition applies.
#[derive(Clone)]
pub enum Rule {
    /// Evaluated against the items on every calculation.
    Callback(Arc<RuleFn>),

    /// Fixed outcome, independent of the items.
    Literal(bool),
}

impl Rule {
    /// Wrap a closure as a rule.
    pub fn new(rule: impl Fn(&[Item]) -> bool + Send + Sync + 'static) -> Self {
        Self::Callback(Arc::new(rule))
    }

    /// Evaluate the rule against the given items.
    pub fn evaluate(&self, items: &[Item]) -> bool {
        match self {
            Rule::Callback(rule) => rule(items),
            Rule::Literal(value) => *value,
        }
    }
}

impl From<bool> for Rule {
    fn from(value: bool) -> Self {
        Self::Literal(value)
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rule::Callback(_) => f.write_str("Callback(..)"),
            Rule::Literal(value) => f.debug_tuple("Literal").field(value).finish(),
        }
    }
}

/// A stored condition.
#[derive(Debug, Clone)]
pub struct Condition {
    slug: String,
    rule: Rule,
    discount: Decimal,
}

impl Condition {
    /// Unique slug
    pub fn slug(&self) -> &str {
        &self.slug
    }

    /// Rule deciding whether the condition applies
    pub fn rule(&self) -> &Rule {
        &self.rule
    }

    /// Discount percentage contributed when the rule holds
    pub fn discount(&self) -> Decimal {
        self.discount
    }

    /// Evaluate this condition's rule.
    pub fn evaluate(&self, items: &[Item]) -> bool {
        self.rule.evaluate(items)
    }
}

/// Input for [`ConditionRegistry::add`].
#[derive(Debug, Clone)]
pub struct ConditionSpec {
    /// Unique slug
    pub slug: String,

    /// Rule to evaluate
    pub rule: Rule,

    /// Discount percentage
    pub discount: Decimal,

    /// Validate but do not store
    pub skip: bool,
}

impl ConditionSpec {
    /// Create a spec that will be stored.
    pub fn new(slug: impl Into<String>, rule: impl Into<Rule>, discount: Decimal) -> Self {
        Self {
            slug: slug.into(),
            rule: rule.into(),
            discount,
            skip: false,
        }
    }

    /// Mark the spec as skipped (or not).
    #[must_use]
    pub fn skip(mut self, skip: bool) -> Self {
        self.skip = skip;
        self
    }
}

/// Registry of named conditions.
#[derive(Debug, Default, Clone)]
pub struct ConditionRegistry {
    conditions: Vec<Condition>,
    slugs: FxHashSet<String>,
}

impl ConditionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add several conditions at once.
    ///
    /// The batch is validated before anything is stored, so a failure leaves
    /// the registry unchanged. Skipped specs are validated but not stored.
    ///
    /// # Errors
    ///
    /// - [`ConditionError::EmptySlug`] if any spec has an empty slug.
    /// - [`ConditionError::DuplicateSlug`] if a slug is already stored or
    ///   appears earlier in the same batch.
    pub fn add(
        &mut self,
        specs: impl IntoIterator<Item = ConditionSpec>,
    ) -> Result<&mut Self, ConditionError> {
        let mut accepted = Vec::new();
        let mut batch_slugs = FxHashSet::default();

        for spec in specs {
            self.check_slug(&spec.slug)?;

            if batch_slugs.contains(&spec.slug) {
                return Err(ConditionError::DuplicateSlug(spec.slug));
            }

            if !spec.skip {
                batch_slugs.insert(spec.slug.clone());
                accepted.push(spec);
            }
        }

        for spec in accepted {
            self.store(spec.slug, spec.rule, spec.discount);
        }

        Ok(self)
    }

    /// Define a single condition.
    ///
    /// # Errors
    ///
    /// - [`ConditionError::EmptySlug`] if `slug` is empty.
    /// - [`ConditionError::DuplicateSlug`] if `slug` is already stored.
    pub fn define(
        &mut self,
        slug: impl Into<String>,
        rule: impl Into<Rule>,
        discount: Decimal,
        skip: bool,
    ) -> Result<&mut Self, ConditionError> {
        let slug = slug.into();

        self.check_slug(&slug)?;

        if skip {
            debug!(slug = %slug, "condition skipped");
        } else {
            self.store(slug, rule.into(), discount);
        }

        Ok(self)
    }

    /// Define a condition whose outcome is fixed.
    ///
    /// # Errors
    ///
    /// Same as [`ConditionRegistry::define`].
    pub fn define_if(
        &mut self,
        slug: impl Into<String>,
        accepted: bool,
        discount: Decimal,
    ) -> Result<&mut Self, ConditionError> {
        self.define(slug, Rule::Literal(accepted), discount, false)
    }

    /// All stored conditions in insertion order.
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Whether a condition with `slug` is stored.
    pub fn contains(&self, slug: &str) -> bool {
        self.slugs.contains(slug)
    }

    /// Number of stored conditions.
    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    /// Whether no conditions are stored.
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    fn check_slug(&self, slug: &str) -> Result<(), ConditionError> {
        if slug.is_empty() {
            return Err(ConditionError::EmptySlug);
        }

        if self.slugs.contains(slug) {
            return Err(ConditionError::DuplicateSlug(slug.to_string()));
        }

        Ok(())
    }

    fn store(&mut self, slug: String, rule: Rule, discount: Decimal) {
        debug!(slug = %slug, discount = %discount, "condition defined");

        self.slugs.insert(slug.clone());
        self.conditions.push(Condition {
            slug,
            rule,
            discount,
        });
    }
}
