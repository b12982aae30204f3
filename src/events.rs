//! Domain notifications
//!
//! Fire-and-forget hooks for "a condition was evaluated" and "a coupon was
//! applied". Emission is gated by [`Settings::fire_events`](crate::config::Settings::fire_events).

use std::fmt::Debug;

use rust_decimal::Decimal;
use tracing::info;

use crate::{conditions::Rule, coupons::Coupon};

/// A condition was evaluated against the current items.
#[derive(Debug, Clone)]
pub struct ConditionEvaluated {
    /// Condition slug
    pub slug: String,

    /// Discount percentage the condition carries
    pub discount: Decimal,

    /// The rule that was evaluated
    pub rule: Rule,

    /// Whether the rule held
    pub matched: bool,
}

/// A coupon was applied successfully.
#[derive(Debug, Clone)]
pub struct CouponApplied {
    /// Snapshot of the coupon after application
    pub coupon: Coupon,
}

/// Observer for discount notifications.
///
/// All methods default to doing nothing, so implementors only override what they need.
pub trait DiscountObserver: Debug + Send + Sync {
    /// Called once per condition each time conditions are evaluated.
    fn on_condition_evaluated(&self, _event: &ConditionEvaluated) {}

    /// Called after a coupon has been applied.
    fn on_coupon_applied(&self, _event: &CouponApplied) {}
}

/// Observer that discards every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl DiscountObserver for NoopObserver {}

/// Observer that forwards notifications to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl DiscountObserver for TracingObserver {
    fn on_condition_evaluated(&self, event: &ConditionEvaluated) {
        info!(
            slug = %event.slug,
            discount = %event.discount,
            matched = event.matched,
            "condition evaluated"
        );
    }

    fn on_coupon_applied(&self, event: &CouponApplied) {
        info!(
            code = %event.coupon.code,
            discount = %event.coupon.discount,
            usage_limit = ?event.coupon.usage_limit,
            "coupon applied"
        );
    }
}
