// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Builder for event properties.

use serde_json::{Map, Value};
use tally_core::DeviceProperties;

/// Event property builder.
///
/// # Example
///
/// ```
/// use tally::Properties;
///
/// let props = Properties::new()
///     .insert("plan", "pro")
///     .insert("seats", 5)
///     .insert_opt("coupon", None::<String>);
/// assert_eq!(props.len(), 3);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Properties {
	inner: Map<String, Value>,
}

impl Properties {
	pub fn new() -> Self {
		Self { inner: Map::new() }
	}

	pub fn insert<K, V>(mut self, key: K, value: V) -> Self
	where
		K: Into<String>,
		V: Into<Value>,
	{
		self.inner.insert(key.into(), value.into());
		self
	}

	/// Inserts `value`, or JSON `null` when it is `None`.
	pub fn insert_opt<K, V>(self, key: K, value: Option<V>) -> Self
	where
		K: Into<String>,
		V: Into<Value>,
	{
		self.insert(key, value.map_or(Value::Null, Into::into))
	}

	/// Copies every key of `other` into this builder. Keys from `other` win.
	pub fn merge(mut self, other: impl Into<Properties>) -> Self {
		self.inner.extend(other.into().inner);
		self
	}

	/// Flattens device properties into top-level keys.
	pub fn with_device(self, device: &DeviceProperties) -> Self {
		match serde_json::to_value(device) {
			Ok(value) => self.merge(value),
			Err(_) => self,
		}
	}

	pub fn is_empty(&self) -> bool {
		self.inner.is_empty()
	}

	pub fn len(&self) -> usize {
		self.inner.len()
	}

	pub fn get(&self, key: &str) -> Option<&Value> {
		self.inner.get(key)
	}

	pub fn into_value(self) -> Value {
		Value::Object(self.inner)
	}
}

impl From<Properties> for Value {
	fn from(props: Properties) -> Self {
		props.into_value()
	}
}

/// Non-object values convert to an empty set of properties.
impl From<Value> for Properties {
	fn from(value: Value) -> Self {
		match value {
			Value::Object(inner) => Self { inner },
			_ => Self::new(),
		}
	}
}

impl From<Map<String, Value>> for Properties {
	fn from(inner: Map<String, Value>) -> Self {
		Self { inner }
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;
	use serde_json::json;

	#[test]
	fn test_insert_opt_writes_null_for_none() {
		let props = Properties::new().insert_opt("deepLink", None::<String>);
		assert_eq!(props.get("deepLink"), Some(&Value::Null));
	}

	#[test]
	fn test_merge_prefers_other() {
		let props = Properties::new()
			.insert("screenName", "Home")
			.merge(json!({"screenName": "Settings", "tab": 2}));

		assert_eq!(props.get("screenName"), Some(&json!("Settings")));
		assert_eq!(props.get("tab"), Some(&json!(2)));
	}

	#[test]
	fn test_merge_ignores_non_object() {
		let props = Properties::new().insert("a", 1).merge(json!([1, 2, 3]));
		assert_eq!(props.into_value(), json!({"a": 1}));
	}

	#[test]
	fn test_with_device_flattens_present_fields() {
		let device = DeviceProperties {
			platform: Some("ios".to_string()),
			screen_width: Some(390.0),
			..Default::default()
		};
		let props = Properties::new().insert("deepLink", "app://home").with_device(&device);

		assert_eq!(props.get("platform"), Some(&json!("ios")));
		assert_eq!(props.get("screenWidth"), Some(&json!(390.0)));
		assert_eq!(props.get("deepLink"), Some(&json!("app://home")));
		assert!(props.get("carrier").is_none());
	}

	proptest! {
		#[test]
		fn merge_len_is_bounded(
			left in proptest::collection::btree_map("[a-z]{1,6}", 0i64..100, 0..10),
			right in proptest::collection::btree_map("[a-z]{1,6}", 0i64..100, 0..10),
		) {
			let l = left.iter().fold(Properties::new(), |p, (k, v)| p.insert(k.clone(), *v));
			let r = right.iter().fold(Properties::new(), |p, (k, v)| p.insert(k.clone(), *v));
			let merged = l.merge(r);

			prop_assert!(merged.len() >= left.len().max(right.len()));
			prop_assert!(merged.len() <= left.len() + right.len());
			for (k, v) in &right {
				prop_assert_eq!(merged.get(k), Some(&Value::from(*v)));
			}
		}
	}
}
