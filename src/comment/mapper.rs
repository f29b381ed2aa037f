/// Record Mapper - converts between comment records and repository nodes
use crate::{
    comment::models::{is_reserved_name, AttributeValue, CommentRecord},
    error::RepositoryResult,
    repository::{NodeRef, Property, PropertyType, PropertyValue, Session, Value},
};
use chrono::{DateTime, Utc};

/// Node type of the bucket containers
pub const NT_COMMENTS_CONTAINER: &str = "doccommenting:commentdatacontainer";

/// Node type of a stored comment
pub const NT_COMMENT: &str = "doccommenting:commentdata";

pub const PROP_SUBJECT_ID: &str = "doccommenting:subjectid";
pub const PROP_AUTHOR: &str = "doccommenting:author";
pub const PROP_CREATED: &str = "doccommenting:created";
pub const PROP_LAST_MODIFIED: &str = "doccommenting:lastModified";
pub const PROP_CONTENT: &str = "doccommenting:content";

/// Storage names of the built-in fields
pub const BUILTIN_PROPERTY_NAMES: [&str; 5] = [
    PROP_SUBJECT_ID,
    PROP_AUTHOR,
    PROP_CREATED,
    PROP_LAST_MODIFIED,
    PROP_CONTENT,
];

/// Maps [`CommentRecord`]s onto nodes and back
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordMapper;

impl RecordMapper {
    /// Read a record from a comment node
    pub async fn to_record(&self, session: &dyn Session, node: &NodeRef) -> RepositoryResult<CommentRecord> {
        let properties = session.properties(node).await?;

        let mut record = CommentRecord {
            id: Some(session.identifier(node).await?),
            subject_id: string_of(&properties, PROP_SUBJECT_ID),
            author: string_of(&properties, PROP_AUTHOR),
            created: date_of(&properties, PROP_CREATED),
            last_modified: date_of(&properties, PROP_LAST_MODIFIED),
            content: string_of(&properties, PROP_CONTENT),
            ..CommentRecord::default()
        };

        for property in &properties {
            if property.protected || is_reserved_name(&property.name) {
                continue;
            }
            if let Some(value) = attribute_from_property(property) {
                record.insert_attribute(property.name.clone(), value);
            }
        }

        Ok(record)
    }

    /// Write a record onto a comment node.
    ///
    /// `created` is only written when the node has none yet; every bind
    /// refreshes `lastModified`. Protected properties are never touched.
    pub async fn bind_record(&self, session: &dyn Session, node: &NodeRef, record: &CommentRecord) -> RepositoryResult<()> {
        session
            .set_property(node, PROP_SUBJECT_ID, string_value(&record.subject_id))
            .await?;
        session
            .set_property(node, PROP_AUTHOR, string_value(&record.author))
            .await?;

        let now = PropertyValue::Single(Value::Date(Utc::now()));
        if !session.has_property(node, PROP_CREATED).await? {
            session.set_property(node, PROP_CREATED, now.clone()).await?;
        }
        session.set_property(node, PROP_LAST_MODIFIED, now).await?;

        session
            .set_property(node, PROP_CONTENT, string_value(&record.content))
            .await?;

        for (name, value) in record.attributes() {
            // Records deserialized from elsewhere bypass set_attribute's check
            if is_reserved_name(name) {
                continue;
            }
            if let Some(existing) = session.property(node, name).await? {
                if existing.protected {
                    continue;
                }
            }
            session
                .set_property(node, name, property_from_attribute(value))
                .await?;
        }

        Ok(())
    }
}

fn single<'a>(properties: &'a [Property], name: &str) -> Option<&'a Value> {
    properties
        .iter()
        .find(|p| p.name == name)
        .and_then(|p| p.value.as_single())
}

fn string_of(properties: &[Property], name: &str) -> String {
    match single(properties, name) {
        Some(Value::String(s)) => s.clone(),
        _ => String::new(),
    }
}

fn date_of(properties: &[Property], name: &str) -> Option<DateTime<Utc>> {
    match single(properties, name) {
        Some(Value::Date(d)) => Some(*d),
        _ => None,
    }
}

fn string_value(value: &str) -> PropertyValue {
    let value = if value.trim().is_empty() { "" } else { value };
    PropertyValue::Single(Value::String(value.to_string()))
}

fn multiple<T: Clone>(value_type: PropertyType, items: &[T], wrap: fn(T) -> Value) -> PropertyValue {
    PropertyValue::Multiple {
        value_type,
        values: items.iter().cloned().map(wrap).collect(),
    }
}

fn property_from_attribute(value: &AttributeValue) -> PropertyValue {
    match value {
        AttributeValue::String(v) => PropertyValue::Single(Value::String(v.clone())),
        AttributeValue::Boolean(v) => PropertyValue::Single(Value::Boolean(*v)),
        AttributeValue::Long(v) => PropertyValue::Single(Value::Long(*v)),
        AttributeValue::Double(v) => PropertyValue::Single(Value::Double(*v)),
        AttributeValue::Date(v) => PropertyValue::Single(Value::Date(*v)),
        AttributeValue::StringArray(v) => multiple(PropertyType::String, v, Value::String),
        AttributeValue::BooleanArray(v) => multiple(PropertyType::Boolean, v, Value::Boolean),
        AttributeValue::LongArray(v) => multiple(PropertyType::Long, v, Value::Long),
        AttributeValue::DoubleArray(v) => multiple(PropertyType::Double, v, Value::Double),
        AttributeValue::DateArray(v) => multiple(PropertyType::Date, v, Value::Date),
    }
}

/// Convert a stored property; types other than the five attribute types yield `None`
fn attribute_from_property(property: &Property) -> Option<AttributeValue> {
    match &property.value {
        PropertyValue::Single(value) => match value {
            Value::String(v) => Some(AttributeValue::String(v.clone())),
            Value::Boolean(v) => Some(AttributeValue::Boolean(*v)),
            Value::Long(v) => Some(AttributeValue::Long(*v)),
            Value::Double(v) => Some(AttributeValue::Double(*v)),
            Value::Date(v) => Some(AttributeValue::Date(*v)),
            Value::Name(_) | Value::Reference(_) | Value::Binary(_) => None,
        },
        PropertyValue::Multiple { value_type, values } => match value_type {
            PropertyType::String => Some(AttributeValue::StringArray(
                values.iter().filter_map(|v| match v {
                    Value::String(s) => Some(s.clone()),
                    _ => None,
                })
                .collect(),
            )),
            PropertyType::Boolean => Some(AttributeValue::BooleanArray(
                values.iter().filter_map(|v| match v {
                    Value::Boolean(b) => Some(*b),
                    _ => None,
                })
                .collect(),
            )),
            PropertyType::Long => Some(AttributeValue::LongArray(
                values.iter().filter_map(|v| match v {
                    Value::Long(l) => Some(*l),
                    _ => None,
                })
                .collect(),
            )),
            PropertyType::Double => Some(AttributeValue::DoubleArray(
                values.iter().filter_map(|v| match v {
                    Value::Double(d) => Some(*d),
                    _ => None,
                })
                .collect(),
            )),
            PropertyType::Date => Some(AttributeValue::DateArray(
                values.iter().filter_map(|v| match v {
                    Value::Date(d) => Some(*d),
                    _ => None,
                })
                .collect(),
            )),
            PropertyType::Name | PropertyType::Reference | PropertyType::Binary => None,
        },
    }
}
