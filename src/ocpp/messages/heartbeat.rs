//! Heartbeat

use chrono::{DateTime, Utc};

use crate::ocpp::codec::{JsonObject, ObjectWriter, ParseError, ToJson};
use crate::ocpp::envelope::{RequestPayload, ResponsePayload};

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct HeartbeatRequest;

impl RequestPayload for HeartbeatRequest {
    const ACTION: &'static str = "Heartbeat";
    const CONTEXT: &'static str = "urn:ocpp:2.1:HeartbeatRequest";

    type Response = HeartbeatResponse;

    fn read(_object: &JsonObject<'_>) -> Result<Self, ParseError> {
        Ok(Self)
    }

    fn write<'c>(&self, writer: ObjectWriter<'c>) -> ObjectWriter<'c> {
        writer
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HeartbeatResponse {
    pub current_time: DateTime<Utc>,
}

impl HeartbeatResponse {
    pub fn new(current_time: DateTime<Utc>) -> Self {
        Self { current_time }
    }

    pub fn now() -> Self {
        Self::new(Utc::now())
    }
}

impl ResponsePayload for HeartbeatResponse {
    const CONTEXT: &'static str = "urn:ocpp:2.1:HeartbeatResponse";

    fn fallback() -> Self {
        Self::new(DateTime::<Utc>::default())
    }

    fn read(object: &JsonObject<'_>) -> Result<Self, ParseError> {
        Ok(Self {
            current_time: object.mandatory("currentTime")?,
        })
    }

    fn write<'c>(&self, writer: ObjectWriter<'c>) -> ObjectWriter<'c> {
        let current_time = self.current_time.to_json(writer.custom());
        writer.field("currentTime", current_time)
    }
}
