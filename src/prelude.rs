//! Pricewise prelude.
//!
//! Convenience exports for common library consumers.

pub use crate::{
    breakdown::{Breakdown, BreakdownError},
    calculator::{CalculationError, Calculator, SetupError},
    conditions::{
        Condition, ConditionError, ConditionRegistry, ConditionRule, ConditionSpec,
        DiscoveryError, Rule, RuleCatalog,
    },
    config::{ConfigError, Settings},
    coupons::{
        Coupon, CouponError, CouponMap, CouponRegistry, CouponStore, JsonFileStore, Rejection,
        StoreError, UserId, Verdict,
    },
    events::{ConditionEvaluated, CouponApplied, DiscountObserver, NoopObserver, TracingObserver},
    fields::FieldResolver,
    items::{Item, OutOfRange},
};
