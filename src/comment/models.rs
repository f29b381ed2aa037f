/// Comment record models
use crate::error::{CommentError, CommentResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

/// Field names of the built-in record fields; never usable as attribute names
pub const RESERVED_FIELD_NAMES: [&str; 5] = ["subjectId", "author", "created", "lastModified", "content"];

/// Extra attribute value attached to a comment
///
/// Doubles compare and hash by bit pattern so that records stay `Eq` and
/// survive a storage round-trip unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum AttributeValue {
    String(String),
    Boolean(bool),
    Long(i64),
    Double(f64),
    Date(DateTime<Utc>),
    StringArray(Vec<String>),
    BooleanArray(Vec<bool>),
    LongArray(Vec<i64>),
    DoubleArray(Vec<f64>),
    DateArray(Vec<DateTime<Utc>>),
}

impl AttributeValue {
    pub fn is_array(&self) -> bool {
        matches!(
            self,
            AttributeValue::StringArray(_)
                | AttributeValue::BooleanArray(_)
                | AttributeValue::LongArray(_)
                | AttributeValue::DoubleArray(_)
                | AttributeValue::DateArray(_)
        )
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl PartialEq for AttributeValue {
    fn eq(&self, other: &Self) -> bool {
        use AttributeValue::*;
        match (self, other) {
            (String(a), String(b)) => a == b,
            (Boolean(a), Boolean(b)) => a == b,
            (Long(a), Long(b)) => a == b,
            (Double(a), Double(b)) => a.to_bits() == b.to_bits(),
            (Date(a), Date(b)) => a == b,
            (StringArray(a), StringArray(b)) => a == b,
            (BooleanArray(a), BooleanArray(b)) => a == b,
            (LongArray(a), LongArray(b)) => a == b,
            (DoubleArray(a), DoubleArray(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
            }
            (DateArray(a), DateArray(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for AttributeValue {}

impl Hash for AttributeValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            AttributeValue::String(v) => v.hash(state),
            AttributeValue::Boolean(v) => v.hash(state),
            AttributeValue::Long(v) => v.hash(state),
            AttributeValue::Double(v) => v.to_bits().hash(state),
            AttributeValue::Date(v) => v.hash(state),
            AttributeValue::StringArray(v) => v.hash(state),
            AttributeValue::BooleanArray(v) => v.hash(state),
            AttributeValue::LongArray(v) => v.hash(state),
            AttributeValue::DoubleArray(v) => {
                v.len().hash(state);
                for x in v {
                    x.to_bits().hash(state);
                }
            }
            AttributeValue::DateArray(v) => v.hash(state),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::String(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Boolean(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Long(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Double(value)
    }
}

impl From<DateTime<Utc>> for AttributeValue {
    fn from(value: DateTime<Utc>) -> Self {
        AttributeValue::Date(value)
    }
}

impl From<Vec<String>> for AttributeValue {
    fn from(value: Vec<String>) -> Self {
        AttributeValue::StringArray(value)
    }
}

impl From<Vec<bool>> for AttributeValue {
    fn from(value: Vec<bool>) -> Self {
        AttributeValue::BooleanArray(value)
    }
}

impl From<Vec<i64>> for AttributeValue {
    fn from(value: Vec<i64>) -> Self {
        AttributeValue::LongArray(value)
    }
}

impl From<Vec<f64>> for AttributeValue {
    fn from(value: Vec<f64>) -> Self {
        AttributeValue::DoubleArray(value)
    }
}

impl From<Vec<DateTime<Utc>>> for AttributeValue {
    fn from(value: Vec<DateTime<Utc>>) -> Self {
        AttributeValue::DateArray(value)
    }
}

/// A comment attached to a subject document
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentRecord {
    /// Repository identifier, present once the record has been persisted
    pub id: Option<String>,
    pub subject_id: String,
    pub author: String,
    pub created: Option<DateTime<Utc>>,
    pub last_modified: Option<DateTime<Utc>>,
    pub content: String,
    #[serde(default)]
    pub(crate) attributes: BTreeMap<String, AttributeValue>,
}

impl CommentRecord {
    /// Create an unsaved record with the given content
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    /// Non-blank identifier, if the record has one
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.trim().is_empty())
    }

    pub fn is_persisted(&self) -> bool {
        self.id().is_some()
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    /// Set an extra attribute, returning the previous value.
    ///
    /// Names of built-in fields, in either their record or storage form,
    /// are rejected with `InvalidArgument`.
    pub fn set_attribute(
        &mut self,
        name: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> CommentResult<Option<AttributeValue>> {
        let name = name.into();
        if is_reserved_name(&name) {
            return Err(CommentError::InvalidArgument(format!(
                "attribute name {} is reserved for a built-in field",
                name
            )));
        }
        if name.trim().is_empty() {
            return Err(CommentError::InvalidArgument("attribute name cannot be blank".to_string()));
        }

        Ok(self.attributes.insert(name, value.into()))
    }

    pub fn remove_attribute(&mut self, name: &str) -> Option<AttributeValue> {
        self.attributes.remove(name)
    }

    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Insert without the reserved-name check; the mapper filters storage names itself
    pub(crate) fn insert_attribute(&mut self, name: String, value: AttributeValue) {
        self.attributes.insert(name, value);
    }
}

/// Whether `name` collides with a built-in field
pub fn is_reserved_name(name: &str) -> bool {
    RESERVED_FIELD_NAMES.contains(&name) || crate::comment::mapper::BUILTIN_PROPERTY_NAMES.contains(&name)
}
