//! OCPP-J RPC framing
//!
//! ```text
//! [2, "<id>", "<action>", {payload}]                      CALL
//! [3, "<id>", {payload}]                                  CALLRESULT
//! [4, "<id>", "<errorCode>", "<description>", {details}]  CALLERROR
//! ```

use serde_json::{json, Value};
use std::str::FromStr;
use thiserror::Error;

use super::identifiers::RequestId;
use super::result::ErrorCode;

/// OCPP message type id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Call = 2,
    CallResult = 3,
    CallError = 4,
}

impl TryFrom<u64> for MessageType {
    type Error = FrameError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match value {
            2 => Ok(Self::Call),
            3 => Ok(Self::CallResult),
            4 => Ok(Self::CallError),
            other => Err(FrameError::UnknownMessageType(other)),
        }
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame is not a JSON array")]
    NotAnArray,

    #[error("unknown message type {0}")]
    UnknownMessageType(u64),

    #[error("malformed frame: {0}")]
    Malformed(String),
}

/// One RPC frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Call {
        request_id: RequestId,
        action: String,
        payload: Value,
    },
    CallResult {
        request_id: RequestId,
        payload: Value,
    },
    CallError {
        request_id: RequestId,
        error_code: ErrorCode,
        description: String,
        details: Value,
    },
}

fn element<'a>(items: &'a [Value], index: usize, name: &str) -> Result<&'a Value, FrameError> {
    items
        .get(index)
        .ok_or_else(|| FrameError::Malformed(format!("missing {name}")))
}

fn text<'a>(items: &'a [Value], index: usize, name: &str) -> Result<&'a str, FrameError> {
    element(items, index, name)?
        .as_str()
        .ok_or_else(|| FrameError::Malformed(format!("{name} must be a string")))
}

impl Frame {
    pub fn parse(text_frame: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(text_frame)?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self, FrameError> {
        let items = value.as_array().ok_or(FrameError::NotAnArray)?;
        let message_type = element(items, 0, "message type")?
            .as_u64()
            .ok_or_else(|| FrameError::Malformed("message type must be an integer".into()))?;
        let message_type = MessageType::try_from(message_type)?;

        let request_id = RequestId::parse(text(items, 1, "message id")?)
            .map_err(|e| FrameError::Malformed(e.to_string()))?;

        match message_type {
            MessageType::Call => Ok(Self::Call {
                request_id,
                action: text(items, 2, "action")?.to_string(),
                payload: element(items, 3, "payload")?.clone(),
            }),
            MessageType::CallResult => Ok(Self::CallResult {
                request_id,
                payload: element(items, 2, "payload")?.clone(),
            }),
            MessageType::CallError => {
                let error_code = text(items, 2, "error code")?;
                Ok(Self::CallError {
                    request_id,
                    // peers may send codes from newer protocol revisions
                    error_code: ErrorCode::from_str(error_code).unwrap_or(ErrorCode::GenericError),
                    description: items.get(3).and_then(Value::as_str).unwrap_or_default().to_string(),
                    details: items.get(4).cloned().unwrap_or_else(|| json!({})),
                })
            }
        }
    }

    /// CALLERROR answering an unparseable frame, when its message id can
    /// still be read. Frames that look like responses are never answered.
    pub fn rejection_for(text_frame: &str, error: &FrameError) -> Option<Self> {
        let value: Value = serde_json::from_str(text_frame).ok()?;
        let items = value.as_array()?;
        let request_id = RequestId::parse(items.get(1)?.as_str()?).ok()?;
        let error_code = match items.first().and_then(Value::as_u64) {
            Some(3) | Some(4) => return None,
            Some(2) => ErrorCode::FormatViolation,
            Some(_) => ErrorCode::MessageTypeNotSupported,
            None => ErrorCode::RpcFrameworkError,
        };
        Some(Self::CallError {
            request_id,
            error_code,
            description: error.to_string(),
            details: json!({}),
        })
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Call { .. } => MessageType::Call,
            Self::CallResult { .. } => MessageType::CallResult,
            Self::CallError { .. } => MessageType::CallError,
        }
    }

    pub fn request_id(&self) -> &RequestId {
        match self {
            Self::Call { request_id, .. }
            | Self::CallResult { request_id, .. }
            | Self::CallError { request_id, .. } => request_id,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Call {
                request_id,
                action,
                payload,
            } => json!([MessageType::Call as u8, request_id.as_str(), action, payload]),
            Self::CallResult { request_id, payload } => {
                json!([MessageType::CallResult as u8, request_id.as_str(), payload])
            }
            Self::CallError {
                request_id,
                error_code,
                description,
                details,
            } => json!([
                MessageType::CallError as u8,
                request_id.as_str(),
                error_code.to_string(),
                description,
                details
            ]),
        }
    }

    pub fn to_text(&self) -> String {
        self.to_value().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_parse_call() {
        let frame = Frame::parse(r#"[2, "19223201", "CancelReservation", {"reservationId": 5}]"#).unwrap();
        match &frame {
            Frame::Call { request_id, action, payload } => {
                assert_eq!(request_id.as_str(), "19223201");
                assert_eq!(action, "CancelReservation");
                assert_eq!(payload, &json!({"reservationId": 5}));
            }
            other => panic!("expected CALL, got {other:?}"),
        }
        assert_eq!(Frame::parse(&frame.to_text()).unwrap(), frame);
    }

    #[test]
    fn test_parse_call_error_with_unknown_code() {
        let frame = Frame::parse(r#"[4, "abc", "SomethingNew", "odd", {"x": 1}]"#).unwrap();
        assert_eq!(frame.message_type(), MessageType::CallError);
        assert!(matches!(
            frame,
            Frame::CallError { error_code: ErrorCode::GenericError, .. }
        ));
    }

    #[test]
    fn test_call_error_defaults() {
        let frame = Frame::parse(r#"[4, "abc", "NotImplemented"]"#).unwrap();
        match frame {
            Frame::CallError { description, details, .. } => {
                assert_eq!(description, "");
                assert_eq!(details, json!({}));
            }
            other => panic!("expected CALLERROR, got {other:?}"),
        }
    }

    #[rstest]
    #[case(r#"{"a": 1}"#)]
    #[case(r#"[9, "abc", {}]"#)]
    #[case(r#"[2, 17, "Heartbeat", {}]"#)]
    #[case(r#"[2, "abc", "Heartbeat"]"#)]
    #[case(r#"[3, "", {}]"#)]
    #[case("[2, ")]
    fn test_rejects_malformed_frames(#[case] input: &str) {
        assert!(Frame::parse(input).is_err());
    }

    #[rstest]
    #[case(r#"[2, "abc", "Heartbeat"]"#, ErrorCode::FormatViolation)]
    #[case(r#"[2, "abc", 5, {}]"#, ErrorCode::FormatViolation)]
    #[case(r#"[9, "abc", {}]"#, ErrorCode::MessageTypeNotSupported)]
    #[case(r#"["2", "abc", "Heartbeat", {}]"#, ErrorCode::RpcFrameworkError)]
    fn test_rejection_keeps_message_id(#[case] input: &str, #[case] expected: ErrorCode) {
        let error = Frame::parse(input).unwrap_err();
        match Frame::rejection_for(input, &error) {
            Some(Frame::CallError { request_id, error_code, description, .. }) => {
                assert_eq!(request_id.as_str(), "abc");
                assert_eq!(error_code, expected);
                assert_eq!(description, error.to_string());
            }
            other => panic!("expected CALLERROR, got {other:?}"),
        }
    }

    #[rstest]
    #[case("[2, ")]
    #[case(r#"{"a": 1}"#)]
    #[case(r#"[2, 17, "Heartbeat", {}]"#)]
    #[case(r#"[3, "abc"]"#)]
    #[case(r#"[4, "abc"]"#)]
    fn test_no_rejection_without_answerable_id(#[case] input: &str) {
        let error = Frame::parse(input).unwrap_err();
        assert_eq!(Frame::rejection_for(input, &error), None);
    }
}
