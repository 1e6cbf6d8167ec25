//! Common data types shared by message payloads

use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use super::codec::{bounded_string, CustomSerializers, FromJson, JsonObject, ObjectWriter, ParseError, ToJson};
use super::envelope::ConstructionError;

/// Vendor-keyed extension bag.
///
/// `vendorId` is mandatory; every other property is preserved as-is so that
/// peers which do not understand an extension still round-trip it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomData {
    vendor_id: String,
    properties: Map<String, Value>,
}

impl CustomData {
    pub const VENDOR_ID_MAX_LENGTH: usize = 255;

    pub fn new(vendor_id: impl Into<String>) -> Result<Self, ConstructionError> {
        let vendor_id = vendor_id.into();
        if vendor_id.trim().is_empty() {
            return Err(ConstructionError::InvalidField {
                field: "vendorId",
                reason: "must not be empty".to_string(),
            });
        }
        if vendor_id.chars().count() > Self::VENDOR_ID_MAX_LENGTH {
            return Err(ConstructionError::InvalidField {
                field: "vendorId",
                reason: format!("exceeds maximum length of {} characters", Self::VENDOR_ID_MAX_LENGTH),
            });
        }
        Ok(Self {
            vendor_id,
            properties: Map::new(),
        })
    }

    /// Adds a vendor property; `vendorId` itself cannot be overwritten.
    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        let key = key.into();
        if key != "vendorId" {
            self.properties.insert(key, value);
        }
        self
    }

    pub fn vendor_id(&self) -> &str {
        &self.vendor_id
    }

    pub fn properties(&self) -> &Map<String, Value> {
        &self.properties
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    fn canonical_properties(&self) -> String {
        // serde_json maps are key-ordered, so the text form is canonical.
        Value::Object(self.properties.clone()).to_string()
    }
}

impl Hash for CustomData {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.vendor_id.hash(state);
        self.canonical_properties().hash(state);
    }
}

impl PartialOrd for CustomData {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CustomData {
    fn cmp(&self, other: &Self) -> Ordering {
        self.vendor_id
            .cmp(&other.vendor_id)
            .then_with(|| self.canonical_properties().cmp(&other.canonical_properties()))
    }
}

impl FromJson for CustomData {
    fn from_json(value: &Value) -> Result<Self, ParseError> {
        let object = JsonObject::new(value)?;
        let vendor_id: Value = object.mandatory("vendorId")?;
        let vendor_id = bounded_string(&vendor_id, Self::VENDOR_ID_MAX_LENGTH)
            .map_err(|e| e.within("vendorId"))?;
        let mut custom_data =
            Self::new(vendor_id).map_err(|e| ParseError::new("vendorId", e.reason()))?;
        if let Value::Object(map) = value {
            for (key, property) in map {
                if key != "vendorId" {
                    custom_data.properties.insert(key.clone(), property.clone());
                }
            }
        }
        Ok(custom_data)
    }
}

impl ToJson for CustomData {
    fn to_json(&self, custom: &CustomSerializers) -> Value {
        let mut writer = ObjectWriter::new::<Self>(custom)
            .field("vendorId", Value::String(self.vendor_id.clone()));
        for (key, value) in &self.properties {
            writer = writer.field(key, value.clone());
        }
        writer.finish(self)
    }
}

/// Additional detail on a response status
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatusInfo {
    reason_code: String,
    additional_info: Option<String>,
    custom_data: Option<CustomData>,
}

impl StatusInfo {
    pub const REASON_CODE_MAX_LENGTH: usize = 20;
    pub const ADDITIONAL_INFO_MAX_LENGTH: usize = 1024;

    pub fn new(reason_code: impl Into<String>) -> Result<Self, ConstructionError> {
        let reason_code = reason_code.into();
        if reason_code.trim().is_empty() {
            return Err(ConstructionError::InvalidField {
                field: "reasonCode",
                reason: "must not be empty".to_string(),
            });
        }
        if reason_code.chars().count() > Self::REASON_CODE_MAX_LENGTH {
            return Err(ConstructionError::InvalidField {
                field: "reasonCode",
                reason: format!(
                    "exceeds maximum length of {} characters",
                    Self::REASON_CODE_MAX_LENGTH
                ),
            });
        }
        Ok(Self {
            reason_code,
            additional_info: None,
            custom_data: None,
        })
    }

    pub fn with_additional_info(mut self, info: impl Into<String>) -> Self {
        self.additional_info = Some(info.into());
        self
    }

    pub fn with_custom_data(mut self, custom_data: CustomData) -> Self {
        self.custom_data = Some(custom_data);
        self
    }

    pub fn reason_code(&self) -> &str {
        &self.reason_code
    }

    pub fn additional_info(&self) -> Option<&str> {
        self.additional_info.as_deref()
    }

    pub fn custom_data(&self) -> Option<&CustomData> {
        self.custom_data.as_ref()
    }
}

impl FromJson for StatusInfo {
    fn from_json(value: &Value) -> Result<Self, ParseError> {
        let object = JsonObject::new(value)?;
        let reason_code: Value = object.mandatory("reasonCode")?;
        let reason_code = bounded_string(&reason_code, Self::REASON_CODE_MAX_LENGTH)
            .map_err(|e| e.within("reasonCode"))?;
        let additional_info = object
            .get("additionalInfo")
            .map(|v| bounded_string(v, Self::ADDITIONAL_INFO_MAX_LENGTH).map_err(|e| e.within("additionalInfo")))
            .transpose()?;
        let custom_data = object.optional::<CustomData>("customData")?;

        let mut info = Self::new(reason_code).map_err(|e| ParseError::new("reasonCode", e.reason()))?;
        info.additional_info = additional_info;
        info.custom_data = custom_data;
        Ok(info)
    }
}

impl ToJson for StatusInfo {
    fn to_json(&self, custom: &CustomSerializers) -> Value {
        ObjectWriter::new::<Self>(custom)
            .field("reasonCode", Value::String(self.reason_code.clone()))
            .optional("additionalInfo", self.additional_info.clone().map(Value::String))
            .optional("customData", self.custom_data.as_ref().map(|c| c.to_json(custom)))
            .finish(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_custom_data_requires_vendor_id() {
        let error = CustomData::from_json(&json!({"mode": 1})).unwrap_err();
        assert_eq!(error.to_string(), "vendorId: missing mandatory property");

        let error = CustomData::from_json(&json!({"vendorId": "  "})).unwrap_err();
        assert_eq!(error.to_string(), "vendorId: must not be empty");
    }

    #[test]
    fn test_custom_data_preserves_unknown_properties() {
        let doc = json!({"vendorId": "com.acme", "mode": "eco", "limits": {"max": 16}});
        let data = CustomData::from_json(&doc).unwrap();

        assert_eq!(data.vendor_id(), "com.acme");
        assert_eq!(data.get("mode"), Some(&json!("eco")));
        assert_eq!(data.to_json(&CustomSerializers::default()), doc);
    }

    #[test]
    fn test_custom_data_vendor_id_is_not_overwritten() {
        let data = CustomData::new("com.acme")
            .unwrap()
            .with_property("vendorId", json!("evil"));
        assert_eq!(data.vendor_id(), "com.acme");
        assert!(data.properties().is_empty());
    }

    #[test]
    fn test_status_info_round_trip() {
        let info = StatusInfo::new("UnknownMonitor")
            .unwrap()
            .with_additional_info("monitor 12 is not configured");
        let json = info.to_json(&CustomSerializers::default());
        assert_eq!(
            json,
            json!({"reasonCode": "UnknownMonitor", "additionalInfo": "monitor 12 is not configured"})
        );
        assert_eq!(StatusInfo::from_json(&json).unwrap(), info);
    }

    #[test]
    fn test_status_info_reason_code_limit() {
        let error = StatusInfo::from_json(&json!({"reasonCode": "x".repeat(21)})).unwrap_err();
        assert_eq!(error.field(), "reasonCode");
    }
}
