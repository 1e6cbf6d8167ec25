//! CancelReservation

use serde_json::Value;
use strum::{Display, EnumString};

use crate::ocpp::codec::{enum_from_json, JsonObject, ObjectWriter, ParseError, ToJson};
use crate::ocpp::envelope::{RequestPayload, ResponsePayload};
use crate::ocpp::identifiers::ReservationId;
use crate::ocpp::types::StatusInfo;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CancelReservationRequest {
    pub reservation_id: ReservationId,
}

impl CancelReservationRequest {
    pub fn new(reservation_id: ReservationId) -> Self {
        Self { reservation_id }
    }
}

impl RequestPayload for CancelReservationRequest {
    const ACTION: &'static str = "CancelReservation";
    const CONTEXT: &'static str = "urn:ocpp:2.1:CancelReservationRequest";

    type Response = CancelReservationResponse;

    fn read(object: &JsonObject<'_>) -> Result<Self, ParseError> {
        Ok(Self {
            reservation_id: object.mandatory("reservationId")?,
        })
    }

    fn write<'c>(&self, writer: ObjectWriter<'c>) -> ObjectWriter<'c> {
        let reservation_id = self.reservation_id.to_json(writer.custom());
        writer.field("reservationId", reservation_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
pub enum CancelReservationStatus {
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CancelReservationResponse {
    pub status: CancelReservationStatus,
    pub status_info: Option<StatusInfo>,
}

impl CancelReservationResponse {
    pub fn new(status: CancelReservationStatus) -> Self {
        Self {
            status,
            status_info: None,
        }
    }

    pub fn with_status_info(mut self, status_info: StatusInfo) -> Self {
        self.status_info = Some(status_info);
        self
    }
}

impl ResponsePayload for CancelReservationResponse {
    const CONTEXT: &'static str = "urn:ocpp:2.1:CancelReservationResponse";

    fn fallback() -> Self {
        Self::new(CancelReservationStatus::Rejected)
    }

    fn read(object: &JsonObject<'_>) -> Result<Self, ParseError> {
        let status = object
            .get("status")
            .ok_or_else(|| ParseError::new("status", "missing mandatory property"))
            .and_then(|v| enum_from_json(v).map_err(|e| e.within("status")))?;
        Ok(Self {
            status,
            status_info: object.optional("statusInfo")?,
        })
    }

    fn write<'c>(&self, writer: ObjectWriter<'c>) -> ObjectWriter<'c> {
        let status_info = self.status_info.as_ref().map(|s| s.to_json(writer.custom()));
        writer
            .field("status", Value::String(self.status.to_string()))
            .optional("statusInfo", status_info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocpp::codec::CustomSerializers;
    use crate::ocpp::envelope::{Request, Response, TransportContext};
    use crate::ocpp::identifiers::RequestId;
    use crate::ocpp::routing::NetworkPath;
    use serde_json::json;

    #[test]
    fn test_request_round_trip() {
        let document = json!({"reservationId": 42});
        let request = Request::<CancelReservationRequest>::try_parse(
            &document,
            TransportContext::new(RequestId::parse("r-42").unwrap()),
        )
        .unwrap();
        assert_eq!(request.payload().reservation_id.value(), 42);
        assert_eq!(request.to_json(), document);
    }

    #[test]
    fn test_field_override_changes_wire_value() {
        let request = Request::new(CancelReservationRequest::new(ReservationId::from_value(7).unwrap())).unwrap();
        let custom = CustomSerializers::new()
            .with_field::<CancelReservationRequest>("reservationId", |v| json!(v.to_string()));
        assert_eq!(request.to_json_with(&custom), json!({"reservationId": "7"}));
    }

    #[test]
    fn test_response_with_status_info() {
        let request = Request::new(CancelReservationRequest::new(ReservationId::from_value(7).unwrap())).unwrap();
        let payload = CancelReservationResponse::new(CancelReservationStatus::Rejected)
            .with_status_info(StatusInfo::new("NoReservation").unwrap());
        let response = Response::new(request.clone(), payload);

        let document = response.to_json();
        assert_eq!(
            document,
            json!({"status": "Rejected", "statusInfo": {"reasonCode": "NoReservation"}})
        );
        let parsed = Response::try_parse(&request, &document, NetworkPath::direct()).unwrap();
        assert_eq!(parsed, response);
    }

    #[test]
    fn test_missing_status() {
        let request = Request::new(CancelReservationRequest::new(ReservationId::from_value(7).unwrap())).unwrap();
        let error = Response::try_parse(&request, &json!({}), NetworkPath::direct()).unwrap_err();
        assert_eq!(error.to_string(), "status: missing mandatory property");
    }
}
