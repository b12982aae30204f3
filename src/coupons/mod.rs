//! Coupons
//!
//! Stateful discount vouchers keyed by code. The registry owns validation
//! (expiry, user restriction, single use, usage limit) and every mutation;
//! callers only ever see borrowed views or clones.
//!
//! Verification checks run in a fixed order and the first failure wins:
//!
//! 1. the coupon exists
//! 2. it has not expired
//! 3. a restricted coupon was given a user
//! 4. that user is on the allow list
//! 5. a single-use coupon has not been applied yet
//! 6. the usage limit is not exhausted (an exhausted coupon is evicted)

use std::{collections::BTreeMap, convert::Infallible, fmt, str::FromStr, sync::Arc};

use jiff::Timestamp;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::events::{CouponApplied, DiscountObserver, NoopObserver};

pub mod store;

pub use store::{CouponStore, JsonFileStore, StoreError};

/// Coupons keyed by code.
pub type CouponMap = BTreeMap<String, Coupon>;

/// Errors raised by coupon registry mutations.
#[derive(Debug, Error)]
pub enum CouponError {
    /// A coupon with this code is already stored.
    #[error("coupon code already exists: {0}")]
    Duplicate(String),

    /// The backing store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Identifier of a coupon user. Integer and string ids never compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserId {
    /// Numeric id
    Int(i64),

    /// String id
    Str(String),
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        Self::Int(id)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self::Str(id.to_string())
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self::Str(id)
    }
}

impl FromStr for UserId {
    type Err = Infallible;

    /// Integer-looking input becomes [`UserId::Int`], anything else [`UserId::Str`].
    fn from_str(id: &str) -> Result<Self, Self::Err> {
        Ok(id
            .trim()
            .parse::<i64>()
            .map_or_else(|_| Self::Str(id.to_string()), Self::Int))
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserId::Int(id) => write!(f, "{id}"),
            UserId::Str(id) => f.write_str(id),
        }
    }
}

/// A discount voucher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coupon {
    /// Unique code
    #[serde(default)]
    pub code: String,

    /// Discount percentage
    #[serde(alias = "discountPercent")]
    pub discount: Decimal,

    /// Start of validity (informational)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<Timestamp>,

    /// End of validity; no end date means the coupon never expires
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<Timestamp>,

    /// Reject once applied
    #[serde(default)]
    pub single_use: bool,

    /// Remaining applications
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_limit: Option<u32>,

    /// Users allowed to apply the coupon
    #[serde(
        default,
        alias = "restrictedUserIds",
        skip_serializing_if = "Option::is_none"
    )]
    pub user_ids: Option<Vec<UserId>>,

    /// Whether the coupon counts towards the current discount
    #[serde(default)]
    pub applied: bool,

    /// Users that applied the coupon, in order
    #[serde(default)]
    pub used_by: Vec<UserId>,
}

impl Coupon {
    /// Create an unrestricted coupon.
    pub fn new(code: impl Into<String>, discount: Decimal) -> Self {
        Self {
            code: code.into(),
            discount,
            start_date: None,
            end_date: None,
            single_use: false,
            usage_limit: None,
            user_ids: None,
            applied: false,
            used_by: Vec::new(),
        }
    }

    /// Set the start of validity.
    #[must_use]
    pub fn with_start_date(mut self, start: Timestamp) -> Self {
        self.start_date = Some(start);
        self
    }

    /// Set the end of validity.
    #[must_use]
    pub fn with_end_date(mut self, end: Timestamp) -> Self {
        self.end_date = Some(end);
        self
    }

    /// Make the coupon single use.
    #[must_use]
    pub fn single_use(mut self) -> Self {
        self.single_use = true;
        self
    }

    /// Limit the number of applications.
    #[must_use]
    pub fn with_usage_limit(mut self, limit: u32) -> Self {
        self.usage_limit = Some(limit);
        self
    }

    /// Restrict the coupon to the given users.
    #[must_use]
    pub fn restricted_to<I, U>(mut self, users: I) -> Self
    where
        I: IntoIterator<Item = U>,
        U: Into<UserId>,
    {
        self.user_ids = Some(users.into_iter().map(Into::into).collect());
        self
    }

    /// Whether the end date lies before `now`.
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        self.end_date.is_some_and(|end| end < now)
    }

    fn rejection(&self, user: Option<&UserId>, now: Timestamp) -> Option<Rejection> {
        if self.is_expired_at(now) {
            return Some(Rejection::Expired);
        }

        if let Some(allowed) = &self.user_ids {
            match user {
                None => return Some(Rejection::UserRequired),
                Some(user) if !allowed.contains(user) => return Some(Rejection::UserNotAllowed),
                Some(_) => {}
            }
        }

        if self.single_use && self.applied {
            return Some(Rejection::AlreadyApplied);
        }

        if self.usage_limit == Some(0) {
            return Some(Rejection::UsageExhausted);
        }

        None
    }
}

/// Why a coupon failed verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// No coupon with the code is stored
    NotFound,

    /// The end date has passed
    Expired,

    /// The coupon is restricted and no user was given
    UserRequired,

    /// The user is not on the allow list
    UserNotAllowed,

    /// A single-use coupon was already applied
    AlreadyApplied,

    /// The usage limit reached zero; the coupon has been evicted
    UsageExhausted,
}

/// Outcome of [`CouponRegistry::verify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The coupon may be applied
    Valid,

    /// The coupon may not be applied
    Rejected(Rejection),
}

impl Verdict {
    /// Whether the verdict is [`Verdict::Valid`].
    pub fn is_valid(self) -> bool {
        matches!(self, Verdict::Valid)
    }
}

/// Registry of coupons, optionally backed by a [`CouponStore`].
///
/// With a store attached the full map is saved after every mutation.
#[derive(Debug)]
pub struct CouponRegistry {
    coupons: CouponMap,
    store: Option<Box<dyn CouponStore>>,
    observer: Arc<dyn DiscountObserver>,
    fire_events: bool,
    clock: fn() -> Timestamp,
}

impl Default for CouponRegistry {
    fn default() -> Self {
        Self {
            coupons: CouponMap::new(),
            store: None,
            observer: Arc::new(NoopObserver),
            fire_events: false,
            clock: Timestamp::now,
        }
    }
}

impl CouponRegistry {
    /// Create an in-memory registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry backed by `store`, loading its current contents.
    ///
    /// # Errors
    ///
    /// Returns [`CouponError::Store`] if the store cannot be read.
    pub fn with_store(store: impl CouponStore + 'static) -> Result<Self, CouponError> {
        let coupons = store.load()?;

        debug!(count = coupons.len(), "loaded coupons from store");

        Ok(Self {
            coupons,
            store: Some(Box::new(store)),
            ..Self::default()
        })
    }

    /// Send coupon notifications to `observer` when `fire_events` is set.
    #[must_use]
    pub fn with_observer(
        mut self,
        observer: Arc<dyn DiscountObserver>,
        fire_events: bool,
    ) -> Self {
        self.observer = observer;
        self.fire_events = fire_events;
        self
    }

    /// Replace the clock used for expiry checks.
    #[must_use]
    pub fn with_clock(mut self, clock: fn() -> Timestamp) -> Self {
        self.clock = clock;
        self
    }

    /// Store a new coupon.
    ///
    /// # Errors
    ///
    /// - [`CouponError::Duplicate`] if the code is already stored.
    /// - [`CouponError::Store`] if persisting fails.
    pub fn add(&mut self, coupon: Coupon) -> Result<&mut Self, CouponError> {
        if self.coupons.contains_key(&coupon.code) {
            return Err(CouponError::Duplicate(coupon.code));
        }

        let code = coupon.code.clone();
        let discount = coupon.discount;

        let mut coupons = self.coupons.clone();
        coupons.insert(code.clone(), coupon);
        self.commit(coupons)?;

        debug!(code = %code, discount = %discount, "coupon added");

        Ok(self)
    }

    /// Insert or replace the coupon stored under the coupon's code.
    ///
    /// # Errors
    ///
    /// Returns [`CouponError::Store`] if persisting fails.
    pub fn update(&mut self, coupon: Coupon) -> Result<&mut Self, CouponError> {
        let mut coupons = self.coupons.clone();
        coupons.insert(coupon.code.clone(), coupon);
        self.commit(coupons)?;

        Ok(self)
    }

    /// Remove a coupon; removing an unknown code is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`CouponError::Store`] if persisting fails.
    pub fn remove(&mut self, code: &str) -> Result<&mut Self, CouponError> {
        let mut coupons = self.coupons.clone();
        let removed = coupons.remove(code).is_some();
        self.commit(coupons)?;

        if removed {
            debug!(code, "coupon removed");
        }

        Ok(self)
    }

    /// Remove every coupon.
    ///
    /// # Errors
    ///
    /// Returns [`CouponError::Store`] if persisting fails.
    pub fn clear(&mut self) -> Result<&mut Self, CouponError> {
        self.commit(CouponMap::new())?;

        Ok(self)
    }

    /// Remove every coupon currently flagged as applied.
    ///
    /// # Errors
    ///
    /// Returns [`CouponError::Store`] if persisting fails.
    pub fn remove_applied_coupons(&mut self) -> Result<&mut Self, CouponError> {
        let mut coupons = self.coupons.clone();
        coupons.retain(|_, coupon| !coupon.applied);
        self.commit(coupons)?;

        Ok(self)
    }

    /// Look up a coupon by code.
    pub fn get(&self, code: &str) -> Option<&Coupon> {
        self.coupons.get(code)
    }

    /// Every stored coupon.
    pub fn all(&self) -> &CouponMap {
        &self.coupons
    }

    /// Number of stored coupons.
    pub fn len(&self) -> usize {
        self.coupons.len()
    }

    /// Whether no coupons are stored.
    pub fn is_empty(&self) -> bool {
        self.coupons.is_empty()
    }

    /// Whether the coupon exists and its end date has passed.
    pub fn is_expired(&self, code: &str) -> bool {
        self.coupons
            .get(code)
            .is_some_and(|coupon| coupon.is_expired_at((self.clock)()))
    }

    /// Check whether a coupon may be applied by `user`.
    ///
    /// A coupon whose usage limit has reached zero is evicted as a side effect.
    ///
    /// # Errors
    ///
    /// Returns [`CouponError::Store`] if persisting an eviction fails.
    pub fn verify(&mut self, code: &str, user: Option<&UserId>) -> Result<Verdict, CouponError> {
        let Some(coupon) = self.coupons.get(code) else {
            return Ok(Verdict::Rejected(Rejection::NotFound));
        };

        match coupon.rejection(user, (self.clock)()) {
            None => Ok(Verdict::Valid),
            Some(Rejection::UsageExhausted) => {
                let mut coupons = self.coupons.clone();
                coupons.remove(code);
                self.commit(coupons)?;

                info!(code, "coupon usage exhausted; evicted");

                Ok(Verdict::Rejected(Rejection::UsageExhausted))
            }
            Some(rejection) => Ok(Verdict::Rejected(rejection)),
        }
    }

    /// Apply a coupon, returning whether it was accepted.
    ///
    /// On success the coupon is flagged as applied, `user` is appended to its
    /// usage history and a positive usage limit is decremented. A rejected
    /// coupon is left untouched (apart from eviction, see [`Self::verify`]).
    ///
    /// # Errors
    ///
    /// Returns [`CouponError::Store`] if persisting fails.
    pub fn apply(&mut self, code: &str, user: Option<UserId>) -> Result<bool, CouponError> {
        if let Verdict::Rejected(reason) = self.verify(code, user.as_ref())? {
            warn!(code, ?reason, "coupon rejected");
            return Ok(false);
        }

        let Some(mut coupon) = self.coupons.get(code).cloned() else {
            return Ok(false);
        };

        coupon.applied = true;

        if let Some(user) = user {
            coupon.used_by.push(user);
        }

        coupon.usage_limit = coupon.usage_limit.map(|limit| limit.saturating_sub(1));

        let usage_limit = coupon.usage_limit;
        let snapshot = self.fire_events.then(|| coupon.clone());

        let mut coupons = self.coupons.clone();
        coupons.insert(code.to_string(), coupon);
        self.commit(coupons)?;

        info!(code, usage_limit = ?usage_limit, "coupon applied");

        if let Some(coupon) = snapshot {
            self.observer.on_coupon_applied(&CouponApplied { coupon });
        }

        Ok(true)
    }

    /// Coupons currently flagged as applied, ordered by code.
    pub fn applied_coupons(&self) -> Vec<&Coupon> {
        self.coupons.values().filter(|coupon| coupon.applied).collect()
    }

    /// Sum of the discount percentages of every applied coupon, saturating at
    /// the bounds of [`Decimal`].
    pub fn coupon_discount(&self) -> Decimal {
        self.coupons
            .values()
            .filter(|coupon| coupon.applied)
            .fold(Decimal::ZERO, |total, coupon| total.saturating_add(coupon.discount))
    }

    /// Save `coupons` and only then make them current, so a failed save
    /// leaves the registry as it was.
    fn commit(&mut self, coupons: CouponMap) -> Result<(), CouponError> {
        if let Some(store) = &self.store {
            store.save(&coupons)?;
        }

        self.coupons = coupons;

        Ok(())
    }
}
