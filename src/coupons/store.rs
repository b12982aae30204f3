//! Coupon persistence
//!
//! The registry talks to storage only through [`CouponStore`]. The bundled
//! [`JsonFileStore`] keeps the whole coupon map in one JSON object keyed by
//! code, with dates as ISO-8601 strings. It assumes a single writer.

use std::{
    fmt::Debug,
    fs, io,
    path::{Path, PathBuf},
};

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::coupons::CouponMap;

/// Errors raised by a coupon store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing the backing file failed.
    #[error("coupon store I/O failed: {0}")]
    Io(#[from] io::Error),

    /// The backing file does not hold a valid coupon map.
    #[error("coupon store is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Save/load contract for coupon state.
pub trait CouponStore: Debug + Send {
    /// Load every stored coupon.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the state cannot be read or decoded.
    fn load(&self) -> Result<CouponMap, StoreError>;

    /// Replace the stored state with `coupons`.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the state cannot be encoded or written.
    fn save(&self, coupons: &CouponMap) -> Result<(), StoreError>;
}

/// Coupon state kept in a single JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Open the store at `path`, creating the file (and its directory) with an
    /// empty object when absent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the directory or file cannot be created.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();

        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        if !path.exists() {
            debug!(path = %path.display(), "creating empty coupon state file");
            fs::write(&path, "{}")?;
        }

        Ok(Self { path })
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CouponStore for JsonFileStore {
    fn load(&self) -> Result<CouponMap, StoreError> {
        let contents = fs::read_to_string(&self.path)?;

        if contents.trim().is_empty() {
            return Ok(CouponMap::new());
        }

        let value: Value = serde_json::from_str(&contents)?;

        let mut coupons: CouponMap = match value {
            Value::Null => CouponMap::new(),
            Value::Array(entries) if entries.is_empty() => CouponMap::new(),
            other => serde_json::from_value(other)?,
        };

        for (code, coupon) in &mut coupons {
            if coupon.code.is_empty() {
                coupon.code.clone_from(code);
            }
        }

        Ok(coupons)
    }

    fn save(&self, coupons: &CouponMap) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(coupons)?;

        fs::write(&self.path, json)?;

        Ok(())
    }
}
