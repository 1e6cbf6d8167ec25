//! Result taxonomy for protocol-level outcomes
//!
//! Every response carries an [`OcppResult`]. Failures never travel as panics
//! or errors across the wire: a caller learns about a rejected request by
//! inspecting the result of an otherwise ordinary response value.

use serde_json::Value;
use std::hash::{Hash, Hasher};
use strum::{AsRefStr, Display, EnumString};

use super::codec::{enum_from_json, CustomSerializers, FromJson, JsonObject, ObjectWriter, ParseError, ToJson};

/// Closed set of round-trip outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString, AsRefStr)]
pub enum ResultCode {
    /// Business fields are meaningful
    #[strum(serialize = "OK")]
    Ok,
    /// The incoming document failed structural or field validation
    FormationViolation,
    /// Structurally valid, but signature verification failed
    SignatureError,
    /// The handler actively rejected the request for protocol reasons
    RequestError,
    /// Handler-internal failure
    Failed,
    /// An unexpected fault was caught at the handler boundary
    ExceptionOccurred,
}

/// OCPP-J CALLERROR codes (1.6 and 2.x)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString, AsRefStr)]
pub enum ErrorCode {
    FormatViolation,
    FormationViolation,
    GenericError,
    InternalError,
    MessageTypeNotSupported,
    NotImplemented,
    NotSupported,
    OccurrenceConstraintViolation,
    PropertyConstraintViolation,
    ProtocolError,
    RpcFrameworkError,
    SecurityError,
    TypeConstraintViolation,
}

/// Outcome of a round trip
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcppResult {
    code: ResultCode,
    error_code: Option<ErrorCode>,
    description: Option<String>,
    details: Option<Value>,
}

impl OcppResult {
    fn with_code(code: ResultCode, description: Option<String>) -> Self {
        Self {
            code,
            error_code: None,
            description,
            details: None,
        }
    }

    pub fn ok() -> Self {
        Self::with_code(ResultCode::Ok, None)
    }

    pub fn formation_violation(description: impl Into<String>) -> Self {
        Self::with_code(ResultCode::FormationViolation, Some(description.into()))
    }

    pub fn signature_error(description: impl Into<String>) -> Self {
        Self::with_code(ResultCode::SignatureError, Some(description.into()))
    }

    pub fn request_error(error_code: ErrorCode, description: impl Into<String>, details: Option<Value>) -> Self {
        Self {
            code: ResultCode::RequestError,
            error_code: Some(error_code),
            description: Some(description.into()),
            details,
        }
    }

    pub fn failed(description: Option<String>) -> Self {
        Self::with_code(ResultCode::Failed, description)
    }

    pub fn exception_occurred(description: impl Into<String>) -> Self {
        Self::with_code(ResultCode::ExceptionOccurred, Some(description.into()))
    }

    /// Maps a received CALLERROR back onto the taxonomy.
    pub fn from_call_error(error_code: ErrorCode, description: impl Into<String>, details: Value) -> Self {
        let description = description.into();
        let details = match details {
            Value::Object(ref map) if map.is_empty() => None,
            Value::Null => None,
            other => Some(other),
        };
        let code = match error_code {
            ErrorCode::FormationViolation | ErrorCode::FormatViolation => ResultCode::FormationViolation,
            ErrorCode::SecurityError => ResultCode::SignatureError,
            ErrorCode::InternalError => ResultCode::Failed,
            _ => ResultCode::RequestError,
        };
        Self {
            code,
            error_code: Some(error_code),
            description: (!description.is_empty()).then_some(description),
            details,
        }
    }

    pub fn code(&self) -> ResultCode {
        self.code
    }

    pub fn is_ok(&self) -> bool {
        self.code == ResultCode::Ok
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error_code
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn details(&self) -> Option<&Value> {
        self.details.as_ref()
    }

    /// CALLERROR code used when this result has to leave as an OCPP-J error frame.
    pub fn ocpp_error_code(&self) -> Option<ErrorCode> {
        match self.code {
            ResultCode::Ok => None,
            ResultCode::FormationViolation => Some(self.error_code.unwrap_or(ErrorCode::FormationViolation)),
            ResultCode::SignatureError => Some(ErrorCode::SecurityError),
            ResultCode::RequestError => Some(self.error_code.unwrap_or(ErrorCode::GenericError)),
            ResultCode::Failed | ResultCode::ExceptionOccurred => Some(ErrorCode::InternalError),
        }
    }
}

impl Default for OcppResult {
    fn default() -> Self {
        Self::ok()
    }
}

impl Hash for OcppResult {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.code.hash(state);
        self.error_code.hash(state);
        self.description.hash(state);
        self.details.as_ref().map(Value::to_string).hash(state);
    }
}

impl FromJson for OcppResult {
    fn from_json(value: &Value) -> Result<Self, ParseError> {
        let object = JsonObject::new(value)?;
        let code = object
            .get("code")
            .ok_or_else(|| ParseError::new("code", "missing mandatory property"))
            .and_then(|v| enum_from_json::<ResultCode>(v).map_err(|e| e.within("code")))?;
        let error_code = object
            .get("errorCode")
            .map(|v| enum_from_json::<ErrorCode>(v).map_err(|e| e.within("errorCode")))
            .transpose()?;
        let description = object.optional::<String>("description")?;
        let details = object.optional::<Value>("details")?;
        Ok(Self {
            code,
            error_code,
            description,
            details,
        })
    }
}

impl ToJson for OcppResult {
    fn to_json(&self, custom: &CustomSerializers) -> Value {
        ObjectWriter::new::<Self>(custom)
            .field("code", Value::String(self.code.to_string()))
            .optional("errorCode", self.error_code.map(|c| Value::String(c.to_string())))
            .optional("description", self.description.clone().map(Value::String))
            .optional("details", self.details.clone())
            .finish(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[test]
    fn test_ok_code_text() {
        assert_eq!(ResultCode::Ok.to_string(), "OK");
        assert_eq!("OK".parse::<ResultCode>().unwrap(), ResultCode::Ok);
        assert_eq!(
            "SignatureError".parse::<ResultCode>().unwrap(),
            ResultCode::SignatureError
        );
    }

    #[rstest]
    #[case(OcppResult::ok(), None)]
    #[case(OcppResult::formation_violation("id: missing"), Some(ErrorCode::FormationViolation))]
    #[case(OcppResult::signature_error("bad"), Some(ErrorCode::SecurityError))]
    #[case(OcppResult::request_error(ErrorCode::NotSupported, "no", None), Some(ErrorCode::NotSupported))]
    #[case(OcppResult::failed(None), Some(ErrorCode::InternalError))]
    #[case(OcppResult::exception_occurred("boom"), Some(ErrorCode::InternalError))]
    fn test_ocpp_error_code_mapping(#[case] result: OcppResult, #[case] expected: Option<ErrorCode>) {
        assert_eq!(result.ocpp_error_code(), expected);
    }

    #[rstest]
    #[case(ErrorCode::FormationViolation, ResultCode::FormationViolation)]
    #[case(ErrorCode::FormatViolation, ResultCode::FormationViolation)]
    #[case(ErrorCode::SecurityError, ResultCode::SignatureError)]
    #[case(ErrorCode::InternalError, ResultCode::Failed)]
    #[case(ErrorCode::NotImplemented, ResultCode::RequestError)]
    fn test_call_error_mapping(#[case] error_code: ErrorCode, #[case] expected: ResultCode) {
        let result = OcppResult::from_call_error(error_code, "remote said no", json!({}));
        assert_eq!(result.code(), expected);
        assert_eq!(result.error_code(), Some(error_code));
        assert_eq!(result.details(), None);
    }

    #[test]
    fn test_json_round_trip() {
        let result = OcppResult::request_error(
            ErrorCode::PropertyConstraintViolation,
            "evseId out of range",
            Some(json!({"max": 4})),
        );
        let json = result.to_json(&CustomSerializers::default());
        assert_eq!(
            json,
            json!({
                "code": "RequestError",
                "errorCode": "PropertyConstraintViolation",
                "description": "evseId out of range",
                "details": {"max": 4}
            })
        );
        assert_eq!(OcppResult::from_json(&json).unwrap(), result);
    }

    #[test]
    fn test_unknown_code_is_named() {
        let error = OcppResult::from_json(&json!({"code": "Maybe"})).unwrap_err();
        assert_eq!(error.to_string(), "code: unknown value 'Maybe'");
    }
}
