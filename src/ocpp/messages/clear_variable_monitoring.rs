//! ClearVariableMonitoring: remove monitors from a charging station

use serde_json::Value;
use std::collections::BTreeSet;
use strum::{Display, EnumString};

use crate::ocpp::codec::{enum_from_json, CustomSerializers, FromJson, JsonObject, ObjectWriter, ParseError, ToJson};
use crate::ocpp::envelope::{ConstructionError, RequestPayload, ResponsePayload};
use crate::ocpp::identifiers::MonitoringId;
use crate::ocpp::types::{CustomData, StatusInfo};

/// Monitors to clear, by id
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClearVariableMonitoringRequest {
    ids: BTreeSet<MonitoringId>,
}

impl ClearVariableMonitoringRequest {
    pub fn new(ids: impl IntoIterator<Item = MonitoringId>) -> Result<Self, ConstructionError> {
        let request = Self {
            ids: ids.into_iter().collect(),
        };
        request.validate()?;
        Ok(request)
    }

    pub fn ids(&self) -> &BTreeSet<MonitoringId> {
        &self.ids
    }
}

impl RequestPayload for ClearVariableMonitoringRequest {
    const ACTION: &'static str = "ClearVariableMonitoring";
    const CONTEXT: &'static str = "urn:ocpp:2.1:ClearVariableMonitoringRequest";

    type Response = ClearVariableMonitoringResponse;

    fn validate(&self) -> Result<(), ConstructionError> {
        if self.ids.is_empty() {
            return Err(ConstructionError::EmptyCollection { field: "id" });
        }
        Ok(())
    }

    fn read(object: &JsonObject<'_>) -> Result<Self, ParseError> {
        Ok(Self {
            ids: object.mandatory_set("id")?,
        })
    }

    fn write<'c>(&self, writer: ObjectWriter<'c>) -> ObjectWriter<'c> {
        writer.set("id", &self.ids)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString)]
pub enum ClearMonitoringStatus {
    Accepted,
    Rejected,
    NotFound,
}

/// Outcome for one monitor
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClearMonitoringResult {
    pub id: MonitoringId,
    pub status: ClearMonitoringStatus,
    pub status_info: Option<StatusInfo>,
    pub custom_data: Option<CustomData>,
}

impl ClearMonitoringResult {
    pub fn new(id: MonitoringId, status: ClearMonitoringStatus) -> Self {
        Self {
            id,
            status,
            status_info: None,
            custom_data: None,
        }
    }

    pub fn with_status_info(mut self, status_info: StatusInfo) -> Self {
        self.status_info = Some(status_info);
        self
    }
}

impl FromJson for ClearMonitoringResult {
    fn from_json(value: &Value) -> Result<Self, ParseError> {
        let object = JsonObject::new(value)?;
        let id = object.mandatory("id")?;
        let status = object
            .get("status")
            .ok_or_else(|| ParseError::new("status", "missing mandatory property"))
            .and_then(|v| enum_from_json(v).map_err(|e| e.within("status")))?;
        Ok(Self {
            id,
            status,
            status_info: object.optional("statusInfo")?,
            custom_data: object.optional("customData")?,
        })
    }
}

impl ToJson for ClearMonitoringResult {
    fn to_json(&self, custom: &CustomSerializers) -> Value {
        ObjectWriter::new::<Self>(custom)
            .field("id", self.id.to_json(custom))
            .field("status", Value::String(self.status.to_string()))
            .optional("statusInfo", self.status_info.as_ref().map(|s| s.to_json(custom)))
            .optional("customData", self.custom_data.as_ref().map(|c| c.to_json(custom)))
            .finish(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClearVariableMonitoringResponse {
    results: BTreeSet<ClearMonitoringResult>,
}

impl ClearVariableMonitoringResponse {
    pub fn new(results: impl IntoIterator<Item = ClearMonitoringResult>) -> Self {
        Self {
            results: results.into_iter().collect(),
        }
    }

    pub fn results(&self) -> &BTreeSet<ClearMonitoringResult> {
        &self.results
    }
}

impl ResponsePayload for ClearVariableMonitoringResponse {
    const CONTEXT: &'static str = "urn:ocpp:2.1:ClearVariableMonitoringResponse";

    fn fallback() -> Self {
        Self {
            results: BTreeSet::new(),
        }
    }

    fn read(object: &JsonObject<'_>) -> Result<Self, ParseError> {
        Ok(Self {
            results: object.mandatory_set("clearMonitoringResult")?,
        })
    }

    fn write<'c>(&self, writer: ObjectWriter<'c>) -> ObjectWriter<'c> {
        writer.set("clearMonitoringResult", &self.results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocpp::envelope::{Request, Response, TransportContext};
    use crate::ocpp::identifiers::RequestId;
    use crate::ocpp::result::{ErrorCode, ResultCode};
    use crate::ocpp::routing::NetworkPath;
    use rstest::rstest;
    use serde_json::json;

    fn monitor(id: i32) -> MonitoringId {
        MonitoringId::from_value(id).unwrap()
    }

    fn parse_request(document: Value) -> Result<Request<ClearVariableMonitoringRequest>, ParseError> {
        Request::try_parse(&document, TransportContext::new(RequestId::parse("m-1").unwrap()))
    }

    #[test]
    fn test_empty_id_set_is_rejected_on_construction() {
        let error = ClearVariableMonitoringRequest::new(std::iter::empty()).unwrap_err();
        assert_eq!(error, ConstructionError::EmptyCollection { field: "id" });
    }

    #[test]
    fn test_duplicate_ids_collapse() {
        let request = ClearVariableMonitoringRequest::new([monitor(7), monitor(7), monitor(12)]).unwrap();
        assert_eq!(request.ids().len(), 2);
    }

    #[rstest]
    #[case(json!({}), "id", "missing mandatory property")]
    #[case(json!({"id": []}), "id", "must contain at least one element")]
    #[case(json!({"id": 7}), "id", "expected an array")]
    #[case(json!({"id": [7, "x"]}), "id[1]", "expected an integer")]
    #[case(json!({"id": [-1]}), "id[0]", "must not be negative")]
    fn test_request_parse_failures(#[case] document: Value, #[case] field: &str, #[case] reason: &str) {
        let error = parse_request(document).unwrap_err();
        assert_eq!(error.field(), field);
        assert!(error.reason().contains(reason), "unexpected reason: {}", error.reason());
    }

    #[test]
    fn test_response_round_trip() {
        let request = Request::new(ClearVariableMonitoringRequest::new([monitor(7), monitor(12)]).unwrap()).unwrap();
        let payload = ClearVariableMonitoringResponse::new([
            ClearMonitoringResult::new(monitor(7), ClearMonitoringStatus::Accepted),
            ClearMonitoringResult::new(monitor(12), ClearMonitoringStatus::NotFound)
                .with_status_info(StatusInfo::new("UnknownMonitor").unwrap()),
        ]);
        let response = Response::new(request.clone(), payload);

        let document = response.to_json();
        assert_eq!(
            document,
            json!({"clearMonitoringResult": [
                {"id": 7, "status": "Accepted"},
                {"id": 12, "status": "NotFound", "statusInfo": {"reasonCode": "UnknownMonitor"}}
            ]})
        );
        let parsed = Response::try_parse(&request, &document, NetworkPath::direct()).unwrap();
        assert_eq!(parsed, response);
    }

    fn negative(
        code: ResultCode,
        request: Request<ClearVariableMonitoringRequest>,
    ) -> Response<ClearVariableMonitoringRequest> {
        match code {
            ResultCode::FormationViolation => Response::formation_violation(request, "id: missing"),
            ResultCode::SignatureError => Response::signature_error(request, "bad signature"),
            ResultCode::RequestError => Response::request_error(request, ErrorCode::NotSupported, "no", None),
            ResultCode::Failed => Response::failed(request, Some("monitoring store offline".into())),
            _ => Response::exception_occurred(request, "boom"),
        }
    }

    #[rstest]
    #[case(ResultCode::FormationViolation, "FormationViolation")]
    #[case(ResultCode::SignatureError, "SignatureError")]
    #[case(ResultCode::RequestError, "RequestError")]
    #[case(ResultCode::Failed, "Failed")]
    #[case(ResultCode::ExceptionOccurred, "ExceptionOccurred")]
    fn test_negative_response_writes_empty_result_array(#[case] code: ResultCode, #[case] wire: &str) {
        let request = Request::new(ClearVariableMonitoringRequest::new([monitor(1)]).unwrap()).unwrap();
        let response = negative(code, request.clone());
        assert_eq!(response.result().code(), code);
        assert_eq!(response.payload(), &ClearVariableMonitoringResponse::fallback());

        let document = response.to_json();
        assert_eq!(document["clearMonitoringResult"], json!([]));
        assert_eq!(document["result"]["code"], json!(wire));

        let parsed = Response::try_parse(&request, &document, NetworkPath::direct()).unwrap();
        assert_eq!(parsed.result().code(), code);
        assert!(parsed.payload().results().is_empty());
    }

    #[test]
    fn test_unknown_status_names_path() {
        let request = Request::new(ClearVariableMonitoringRequest::new([monitor(1)]).unwrap()).unwrap();
        let document = json!({"clearMonitoringResult": [{"id": 1, "status": "Maybe"}]});
        let error = Response::try_parse(&request, &document, NetworkPath::direct()).unwrap_err();
        assert_eq!(error.field(), "clearMonitoringResult[0].status");
    }
}
