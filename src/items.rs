//! Items

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// A line item: an opaque, string-keyed record owned by the caller.
///
/// The engine only ever reads from items, through a
/// [`FieldResolver`](crate::fields::FieldResolver).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Item(Map<String, Value>);

impl Item {
    /// Create an empty item.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Builder-style insert of a single field.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Insert or replace a field.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Returns the raw value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Returns whether the item has a field named `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Iterate over the item's fields.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl From<Map<String, Value>> for Item {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl<K, V> FromIterator<(K, V)> for Item
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

/// A numeric value that does not fit in a [`Decimal`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{value} cannot be represented as a decimal")]
pub struct OutOfRange {
    /// The offending value, as written
    pub value: String,
}

/// Interpret a JSON value as a decimal.
///
/// Numbers and numeric strings are accepted; `null`, booleans, arrays,
/// objects and non-numeric strings yield `Ok(None)`.
///
/// # Errors
///
/// Returns [`OutOfRange`] for a number (or numeric string) whose magnitude or
/// precision exceeds what a [`Decimal`] can hold.
pub fn decimal_from_value(value: &Value) -> Result<Option<Decimal>, OutOfRange> {
    match value {
        Value::Number(number) => {
            if let Some(int) = number.as_i64() {
                return Ok(Some(Decimal::from(int)));
            }

            if let Some(uint) = number.as_u64() {
                return Ok(Some(Decimal::from(uint)));
            }

            let text = number.to_string();

            parse_decimal(&text)
                .map(Some)
                .ok_or(OutOfRange { value: text })
        }
        Value::String(text) => {
            let text = text.trim();

            match parse_decimal(text) {
                Some(decimal) => Ok(Some(decimal)),
                None if looks_numeric(text) => Err(OutOfRange {
                    value: text.to_string(),
                }),
                None => Ok(None),
            }
        }
        Value::Null | Value::Bool(_) | Value::Array(_) | Value::Object(_) => Ok(None),
    }
}

fn looks_numeric(text: &str) -> bool {
    text.parse::<f64>().is_ok_and(f64::is_finite)
}

fn parse_decimal(text: &str) -> Option<Decimal> {
    Decimal::from_str(text)
        .or_else(|_err| Decimal::from_scientific(text))
        .ok()
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;
    use serde_json::json;
    use testresult::TestResult;

    use super::*;

    #[test]
    fn builder_sets_fields() {
        let item = Item::new().with("price", 50).with("quantity", 2);

        assert_eq!(item.get("price"), Some(&json!(50)));
        assert_eq!(item.get("quantity"), Some(&json!(2)));
        assert!(!item.contains_key("sku"));
    }

    #[test]
    fn collects_from_pairs() {
        let item: Item = [("id", json!("a")), ("price", json!(9.5))]
            .into_iter()
            .collect();

        assert_eq!(item.iter().count(), 2);
        assert_eq!(item.get("id"), Some(&json!("a")));
    }

    #[test]
    fn deserializes_from_yaml_mapping() -> TestResult {
        let item: Item = serde_norway::from_str("price: 19.99\nquantity: 3\nname: mug\n")?;

        assert_eq!(item.get("name"), Some(&json!("mug")));
        assert_eq!(item.get("quantity"), Some(&json!(3)));

        Ok(())
    }

    #[test]
    fn decimal_from_integer_and_float() -> TestResult {
        assert_eq!(decimal_from_value(&json!(42))?, Some(dec!(42)));
        assert_eq!(decimal_from_value(&json!(0.1))?, Some(dec!(0.1)));
        assert_eq!(decimal_from_value(&json!(19.99))?, Some(dec!(19.99)));

        Ok(())
    }

    #[test]
    fn decimal_from_numeric_string() -> TestResult {
        assert_eq!(decimal_from_value(&json!(" 12.50 "))?, Some(dec!(12.50)));
        assert_eq!(decimal_from_value(&json!("1e3"))?, Some(dec!(1000)));

        Ok(())
    }

    #[test]
    fn decimal_from_non_numeric_is_none() -> TestResult {
        assert_eq!(decimal_from_value(&json!(null))?, None);
        assert_eq!(decimal_from_value(&json!(true))?, None);
        assert_eq!(decimal_from_value(&json!("twelve"))?, None);
        assert_eq!(decimal_from_value(&json!([1]))?, None);

        Ok(())
    }

    #[test]
    fn huge_numbers_are_out_of_range() {
        assert!(matches!(
            decimal_from_value(&json!(1e30)),
            Err(OutOfRange { .. })
        ));
        assert!(matches!(
            decimal_from_value(&json!("1e30")),
            Err(OutOfRange { value }) if value == "1e30"
        ));
        assert!(matches!(
            decimal_from_value(&json!("-99999999999999999999999999999999")),
            Err(OutOfRange { .. })
        ));
    }
}
