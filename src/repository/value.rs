/// Repository property value model
///
/// Shared by every repository backend. Values carry their own type tag;
/// multi-valued properties declare one type for all of their elements.
use crate::error::{RepositoryError, RepositoryResult};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Property type tags understood by the repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    String,
    Boolean,
    Long,
    Double,
    Date,
    Name,
    Reference,
    Binary,
}

impl PropertyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyType::String => "string",
            PropertyType::Boolean => "boolean",
            PropertyType::Long => "long",
            PropertyType::Double => "double",
            PropertyType::Date => "date",
            PropertyType::Name => "name",
            PropertyType::Reference => "reference",
            PropertyType::Binary => "binary",
        }
    }
}

/// A single typed value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    String(String),
    Boolean(bool),
    Long(i64),
    Double(#[serde(with = "double_bits")] f64),
    Date(DateTime<Utc>),
    Name(String),
    Reference(String),
    Binary(Vec<u8>),
}

/// Doubles are stored by bit pattern; JSON numbers cannot hold NaN or infinities
mod double_bits {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.to_bits())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        u64::deserialize(deserializer).map(f64::from_bits)
    }
}

impl Value {
    pub fn value_type(&self) -> PropertyType {
        match self {
            Value::String(_) => PropertyType::String,
            Value::Boolean(_) => PropertyType::Boolean,
            Value::Long(_) => PropertyType::Long,
            Value::Double(_) => PropertyType::Double,
            Value::Date(_) => PropertyType::Date,
            Value::Name(_) => PropertyType::Name,
            Value::Reference(_) => PropertyType::Reference,
            Value::Binary(_) => PropertyType::Binary,
        }
    }

    /// Order-preserving string key used for equality lookups and sorting.
    ///
    /// Keys of the same value type compare lexically in the same order as
    /// the values themselves. Binary values are not indexed.
    pub fn index_key(&self) -> Option<String> {
        match self {
            Value::String(s) | Value::Name(s) | Value::Reference(s) => Some(s.clone()),
            Value::Boolean(b) => Some(b.to_string()),
            // Flipping the sign bit maps i64 order onto u64 order
            Value::Long(v) => Some(format!("{:020}", (*v as u64) ^ (1 << 63))),
            Value::Double(v) => {
                let bits = v.to_bits();
                let key = if bits >> 63 == 1 { !bits } else { bits | (1 << 63) };
                Some(format!("{:020}", key))
            }
            Value::Date(d) => Some(d.to_rfc3339_opts(SecondsFormat::Nanos, true)),
            Value::Binary(_) => None,
        }
    }
}

/// Value of a property: single, or multi-valued with a declared type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Single(Value),
    Multiple {
        value_type: PropertyType,
        values: Vec<Value>,
    },
}

impl PropertyValue {
    pub fn value_type(&self) -> PropertyType {
        match self {
            PropertyValue::Single(value) => value.value_type(),
            PropertyValue::Multiple { value_type, .. } => *value_type,
        }
    }

    pub fn is_multiple(&self) -> bool {
        matches!(self, PropertyValue::Multiple { .. })
    }

    pub fn as_single(&self) -> Option<&Value> {
        match self {
            PropertyValue::Single(value) => Some(value),
            PropertyValue::Multiple { .. } => None,
        }
    }

    /// Index key of a single-valued property
    pub fn index_key(&self) -> Option<String> {
        self.as_single().and_then(Value::index_key)
    }

    /// Reject multi-valued properties whose elements disagree with the declared type
    pub fn validate(&self) -> RepositoryResult<()> {
        if let PropertyValue::Multiple { value_type, values } = self {
            if let Some(bad) = values.iter().find(|v| v.value_type() != *value_type) {
                return Err(RepositoryError::ValueFormat(format!(
                    "{} value in a multi-valued {} property",
                    bad.value_type().as_str(),
                    value_type.as_str()
                )));
            }
        }
        Ok(())
    }
}

/// A named property as read from a node
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub name: String,
    pub value: PropertyValue,
    /// System-managed properties cannot be written through a session
    pub protected: bool,
}

impl Property {
    pub fn property_type(&self) -> PropertyType {
        self.value.value_type()
    }

    pub fn is_multiple(&self) -> bool {
        self.value.is_multiple()
    }
}
