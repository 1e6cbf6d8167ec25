//! JSON codec contract
//!
//! Every message type is read field by field through [`JsonObject`] so that the
//! first missing or malformed property is reported by name, and written through
//! [`ObjectWriter`] so that callers can override the wire form of whole types or
//! single properties with [`CustomSerializers`].

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::any::{Any, TypeId};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Malformed wire input, displayed as `"<field>: <reason>"`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    field: String,
    reason: String,
}

impl ParseError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Error about a value whose property name is not known yet.
    pub fn value(reason: impl Into<String>) -> Self {
        Self::new(String::new(), reason)
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Prefixes the field path with the enclosing property.
    pub fn within(mut self, parent: &str) -> Self {
        self.field = if self.field.is_empty() {
            parent.to_string()
        } else if self.field.starts_with('[') {
            format!("{parent}{}", self.field)
        } else {
            format!("{parent}.{}", self.field)
        };
        self
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.field.is_empty() {
            f.write_str(&self.reason)
        } else {
            write!(f, "{}: {}", self.field, self.reason)
        }
    }
}

impl std::error::Error for ParseError {}

/// Failure of the text-level `parse` entry points
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

pub trait FromJson: Sized {
    fn from_json(value: &Value) -> Result<Self, ParseError>;
}

pub trait ToJson {
    fn to_json(&self, custom: &CustomSerializers) -> Value;
}

type TypeSerializer<T> = dyn Fn(&T, Value) -> Value + Send + Sync;
type FieldSerializer = dyn Fn(Value) -> Value + Send + Sync;

/// Caller-supplied wire overrides.
///
/// A type override receives the typed value and its default JSON and returns
/// the JSON to emit. A field override receives the default JSON of one
/// property of one type; returning `Value::Null` drops the property.
#[derive(Clone, Default)]
pub struct CustomSerializers {
    types: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    fields: HashMap<(TypeId, String), Arc<FieldSerializer>>,
}

impl CustomSerializers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type<T: 'static>(
        mut self,
        serializer: impl Fn(&T, Value) -> Value + Send + Sync + 'static,
    ) -> Self {
        let boxed: Box<TypeSerializer<T>> = Box::new(serializer);
        self.types.insert(TypeId::of::<T>(), Arc::new(boxed));
        self
    }

    pub fn with_field<T: 'static>(
        mut self,
        property: &str,
        serializer: impl Fn(Value) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.fields
            .insert((TypeId::of::<T>(), property.to_string()), Arc::new(serializer));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty() && self.fields.is_empty()
    }

    fn apply_type<T: 'static>(&self, value: &T, json: Value) -> Value {
        match self
            .types
            .get(&TypeId::of::<T>())
            .and_then(|any| any.downcast_ref::<Box<TypeSerializer<T>>>())
        {
            Some(serializer) => serializer(value, json),
            None => json,
        }
    }

    fn apply_field(&self, owner: TypeId, property: &str, json: Value) -> Value {
        match self.fields.get(&(owner, property.to_string())) {
            Some(serializer) => serializer(json),
            None => json,
        }
    }
}

impl fmt::Debug for CustomSerializers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomSerializers")
            .field("types", &self.types.len())
            .field("fields", &self.fields.len())
            .finish()
    }
}

/// Field reader over one JSON object
#[derive(Debug, Clone, Copy)]
pub struct JsonObject<'a> {
    map: &'a Map<String, Value>,
}

impl<'a> JsonObject<'a> {
    pub fn new(value: &'a Value) -> Result<Self, ParseError> {
        value
            .as_object()
            .map(|map| Self { map })
            .ok_or_else(|| ParseError::value("expected a JSON object"))
    }

    pub fn get(&self, property: &str) -> Option<&'a Value> {
        match self.map.get(property) {
            None | Some(Value::Null) => None,
            Some(value) => Some(value),
        }
    }

    pub fn contains(&self, property: &str) -> bool {
        self.get(property).is_some()
    }

    pub fn mandatory<T: FromJson>(&self, property: &str) -> Result<T, ParseError> {
        let value = self
            .get(property)
            .ok_or_else(|| ParseError::new(property, "missing mandatory property"))?;
        T::from_json(value).map_err(|e| e.within(property))
    }

    pub fn optional<T: FromJson>(&self, property: &str) -> Result<Option<T>, ParseError> {
        self.get(property)
            .map(|value| T::from_json(value).map_err(|e| e.within(property)))
            .transpose()
    }

    /// Mandatory array read as a set; an empty array is rejected before any
    /// element is looked at.
    pub fn mandatory_set<T: FromJson + Ord>(&self, property: &str) -> Result<BTreeSet<T>, ParseError> {
        let value = self
            .get(property)
            .ok_or_else(|| ParseError::new(property, "missing mandatory property"))?;
        let items = value
            .as_array()
            .ok_or_else(|| ParseError::new(property, "expected an array"))?;
        if items.is_empty() {
            return Err(ParseError::new(property, "must contain at least one element"));
        }
        read_elements(property, items)
    }

    pub fn optional_set<T: FromJson + Ord>(&self, property: &str) -> Result<BTreeSet<T>, ParseError> {
        match self.get(property) {
            None => Ok(BTreeSet::new()),
            Some(value) => {
                let items = value
                    .as_array()
                    .ok_or_else(|| ParseError::new(property, "expected an array"))?;
                read_elements(property, items)
            }
        }
    }
}

fn read_elements<T: FromJson + Ord>(property: &str, items: &[Value]) -> Result<BTreeSet<T>, ParseError> {
    items
        .iter()
        .enumerate()
        .map(|(index, item)| T::from_json(item).map_err(|e| e.within(&format!("{property}[{index}]"))))
        .collect()
}

/// Builder for one JSON object, applying field and type overrides
pub struct ObjectWriter<'c> {
    owner: TypeId,
    custom: &'c CustomSerializers,
    map: Map<String, Value>,
}

impl<'c> ObjectWriter<'c> {
    pub fn new<T: 'static>(custom: &'c CustomSerializers) -> Self {
        Self {
            owner: TypeId::of::<T>(),
            custom,
            map: Map::new(),
        }
    }

    pub fn custom(&self) -> &'c CustomSerializers {
        self.custom
    }

    pub fn field(mut self, property: &str, value: Value) -> Self {
        let value = self.custom.apply_field(self.owner, property, value);
        if !value.is_null() {
            self.map.insert(property.to_string(), value);
        }
        self
    }

    pub fn optional(self, property: &str, value: Option<Value>) -> Self {
        match value {
            Some(value) => self.field(property, value),
            None => self,
        }
    }

    pub fn set<T: ToJson>(self, property: &str, items: &BTreeSet<T>) -> Self {
        let custom = self.custom;
        let array = items.iter().map(|item| item.to_json(custom)).collect();
        self.field(property, Value::Array(array))
    }

    pub fn finish<T: 'static>(self, value: &T) -> Value {
        debug_assert_eq!(self.owner, TypeId::of::<T>());
        self.custom.apply_type(value, Value::Object(self.map))
    }
}

impl FromJson for String {
    fn from_json(value: &Value) -> Result<Self, ParseError> {
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ParseError::value("expected a string"))
    }
}

impl FromJson for bool {
    fn from_json(value: &Value) -> Result<Self, ParseError> {
        value.as_bool().ok_or_else(|| ParseError::value("expected a boolean"))
    }
}

impl FromJson for i32 {
    fn from_json(value: &Value) -> Result<Self, ParseError> {
        value
            .as_i64()
            .and_then(|n| i32::try_from(n).ok())
            .ok_or_else(|| ParseError::value("expected a 32-bit integer"))
    }
}

impl FromJson for DateTime<Utc> {
    fn from_json(value: &Value) -> Result<Self, ParseError> {
        let text = value
            .as_str()
            .ok_or_else(|| ParseError::value("expected an RFC 3339 timestamp"))?;
        DateTime::parse_from_rfc3339(text)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| ParseError::value(format!("invalid timestamp ({e})")))
    }
}

impl FromJson for Value {
    fn from_json(value: &Value) -> Result<Self, ParseError> {
        Ok(value.clone())
    }
}

impl ToJson for DateTime<Utc> {
    fn to_json(&self, custom: &CustomSerializers) -> Value {
        custom.apply_type(self, Value::String(self.to_rfc3339_opts(SecondsFormat::AutoSi, true)))
    }
}

/// String with an upper length bound, as used throughout the OCPP schemas.
pub fn bounded_string(value: &Value, max_len: usize) -> Result<String, ParseError> {
    let text = String::from_json(value)?;
    if text.chars().count() > max_len {
        return Err(ParseError::value(format!(
            "exceeds maximum length of {max_len} characters"
        )));
    }
    Ok(text)
}

/// Reads a closed enumeration from its string form.
pub fn enum_from_json<E: std::str::FromStr>(value: &Value) -> Result<E, ParseError> {
    let text = value
        .as_str()
        .ok_or_else(|| ParseError::value("expected a string"))?;
    text.parse()
        .map_err(|_| ParseError::value(format!("unknown value '{text}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Widget;

    #[test]
    fn test_missing_mandatory_property_is_named() {
        let doc = json!({"other": 1});
        let object = JsonObject::new(&doc).unwrap();
        let error = object.mandatory::<i32>("evseId").unwrap_err();
        assert_eq!(error.to_string(), "evseId: missing mandatory property");
    }

    #[test]
    fn test_null_reads_as_absent() {
        let doc = json!({"info": null});
        let object = JsonObject::new(&doc).unwrap();
        assert_eq!(object.optional::<String>("info").unwrap(), None);
        assert!(object.mandatory::<String>("info").is_err());
    }

    #[test]
    fn test_empty_set_rejected_before_elements() {
        let doc = json!({"id": []});
        let object = JsonObject::new(&doc).unwrap();
        let error = object.mandatory_set::<i32>("id").unwrap_err();
        assert_eq!(error.to_string(), "id: must contain at least one element");
    }

    #[test]
    fn test_element_errors_carry_index() {
        let doc = json!({"id": [1, "two"]});
        let object = JsonObject::new(&doc).unwrap();
        let error = object.mandatory_set::<i32>("id").unwrap_err();
        assert_eq!(error.field(), "id[1]");
    }

    #[test]
    fn test_nested_error_paths() {
        let error = ParseError::new("status", "unknown value 'Maybe'")
            .within("clearMonitoringResult[0]");
        assert_eq!(error.to_string(), "clearMonitoringResult[0].status: unknown value 'Maybe'");
    }

    #[test]
    fn test_not_an_object() {
        let doc = json!([1, 2]);
        assert_eq!(
            JsonObject::new(&doc).unwrap_err().to_string(),
            "expected a JSON object"
        );
    }

    #[test]
    fn test_field_and_type_overrides() {
        let custom = CustomSerializers::new()
            .with_field::<Widget>("drop", |_| Value::Null)
            .with_field::<Widget>("count", |v| json!(v.as_i64().unwrap_or(0) * 10))
            .with_type::<Widget>(|_, mut json| {
                json["vendor"] = json!("ACME");
                json
            });

        let out = ObjectWriter::new::<Widget>(&custom)
            .field("count", json!(2))
            .field("drop", json!("gone"))
            .optional("absent", None)
            .finish(&Widget);

        assert_eq!(out, json!({"count": 20, "vendor": "ACME"}));
    }

    #[test]
    fn test_overrides_are_scoped_to_their_type() {
        struct Other;
        let custom = CustomSerializers::new().with_field::<Widget>("count", |_| json!(0));
        let out = ObjectWriter::new::<Other>(&custom)
            .field("count", json!(5))
            .finish(&Other);
        assert_eq!(out, json!({"count": 5}));
    }

    #[test]
    fn test_timestamp_round_trip_keeps_precision() {
        let ts = DateTime::parse_from_rfc3339("2026-03-01T10:15:30.123456Z")
            .unwrap()
            .with_timezone(&Utc);
        let json = ts.to_json(&CustomSerializers::default());
        assert_eq!(DateTime::<Utc>::from_json(&json).unwrap(), ts);
    }

    #[test]
    fn test_bounded_string() {
        assert!(bounded_string(&json!("short"), 20).is_ok());
        assert_eq!(
            bounded_string(&json!("x".repeat(21)), 20).unwrap_err().reason(),
            "exceeds maximum length of 20 characters"
        );
    }
}
