//! Call record and typed attribute map
//!
//! A [`CallRecord`] is the identity of one call leg plus a free-form set of
//! string attributes (number, display name, last DTMF digit, application
//! annotations). The call id is mirrored into the attribute map under
//! [`keys::CALL_ID`] for as long as the record lives, so any snapshot handed
//! to the application carries the id with it.

use std::collections::HashMap;
use std::collections::hash_map::Iter;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CallKeepError, Result};

/// Reserved attribute keys
pub mod keys {
    /// Call identifier, always present
    pub const CALL_ID: &str = "callId";
    /// Display name of the remote party
    pub const CALLER_NAME: &str = "callerName";
    /// Phone number or address of the remote party
    pub const NUMBER: &str = "number";
    /// Last DTMF digit played on the call
    pub const DTMF_DIGIT: &str = "dtmfDigit";
}

/// String-to-string attribute map attached to a call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallAttributes(HashMap<String, String>);

impl CallAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode attributes from an untyped JSON payload.
    ///
    /// The payload must be an object whose values are all strings.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| CallKeepError::malformed(format!("expected attribute object, got {}", value)))?;

        let mut attributes = HashMap::with_capacity(object.len());
        for (key, value) in object {
            let value = value.as_str().ok_or_else(|| {
                CallKeepError::malformed(format!("attribute '{}' is not a string: {}", key, value))
            })?;
            attributes.insert(key.clone(), value.to_string());
        }
        Ok(Self(attributes))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> Iter<'_, String, String> {
        self.0.iter()
    }

    pub fn into_inner(self) -> HashMap<String, String> {
        self.0
    }
}

impl From<HashMap<String, String>> for CallAttributes {
    fn from(map: HashMap<String, String>) -> Self {
        Self(map)
    }
}

impl<K, V> FromIterator<(K, V)> for CallAttributes
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Identity and attributes of one call leg
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    call_id: String,
    attributes: CallAttributes,
}

impl CallRecord {
    /// Create a record, inserting the call id under the reserved key
    pub fn new(call_id: impl Into<String>, mut attributes: CallAttributes) -> Self {
        let call_id = call_id.into();
        attributes.insert(keys::CALL_ID, call_id.clone());
        Self { call_id, attributes }
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    /// Read an attribute
    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes.get(key)
    }

    /// Upsert an attribute.
    ///
    /// Writes to [`keys::CALL_ID`] cannot change the id; they are dropped.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if key == keys::CALL_ID && value != self.call_id {
            debug!("Ignoring attempt to rewrite call id {} to {}", self.call_id, value);
            return;
        }
        self.attributes.insert(key, value);
    }

    /// Replace the whole attribute map, keeping the call id entry
    pub fn replace_attributes(&mut self, mut attributes: CallAttributes) {
        attributes.insert(keys::CALL_ID, self.call_id.clone());
        self.attributes = attributes;
    }

    pub fn caller_name(&self) -> Option<&str> {
        self.get(keys::CALLER_NAME)
    }

    pub fn number(&self) -> Option<&str> {
        self.get(keys::NUMBER)
    }

    pub fn attributes(&self) -> &CallAttributes {
        &self.attributes
    }

    /// Owned copy of the current attributes
    pub fn snapshot(&self) -> CallAttributes {
        self.attributes.clone()
    }
}
