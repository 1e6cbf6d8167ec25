//! Generic request/response envelope
//!
//! Concrete messages only describe their business payload through
//! [`RequestPayload`] and [`ResponsePayload`]; everything else (correlation,
//! routing, signatures, custom data, codec, negative responses) is provided
//! once here by [`Request`] and [`Response`].
//!
//! Envelopes are immutable. Relaying or signing yields a new value, and the
//! hash over the semantically significant fields is computed once when a value
//! is built.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::codec::{CodecError, CustomSerializers, JsonObject, ObjectWriter, ParseError, ToJson};
use super::frame::Frame;
use super::identifiers::{EventTrackingId, RequestId};
use super::result::{ErrorCode, OcppResult};
use super::routing::{NetworkPath, Routable, SourceRouting};
use super::signature::{Signable, Signature, Signatures, SIGNATURES_PROPERTY};
use super::types::CustomData;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const CUSTOM_DATA_PROPERTY: &str = "customData";
const RESULT_PROPERTY: &str = "result";

/// Caller misuse detected while building a message
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConstructionError {
    #[error("{field}: mandatory collection must not be empty")]
    EmptyCollection { field: &'static str },

    #[error("{field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

impl ConstructionError {
    pub fn field(&self) -> &'static str {
        match self {
            Self::EmptyCollection { field } | Self::InvalidField { field, .. } => field,
        }
    }

    pub fn reason(&self) -> String {
        match self {
            Self::EmptyCollection { .. } => "mandatory collection must not be empty".to_string(),
            Self::InvalidField { reason, .. } => reason.clone(),
        }
    }
}

impl From<ConstructionError> for ParseError {
    fn from(error: ConstructionError) -> Self {
        ParseError::new(error.field(), error.reason())
    }
}

/// Text form used by [`Request::to_text`] / [`Response::to_text`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SerializationFormat {
    #[default]
    Json,
    /// RFC 8785 canonical JSON
    CanonicalJson,
}

impl SerializationFormat {
    fn render(&self, document: &Value) -> String {
        match self {
            Self::Json => document.to_string(),
            Self::CanonicalJson => serde_jcs::to_string(document).unwrap_or_else(|_| document.to_string()),
        }
    }
}

/// Business payload of a concrete request type
pub trait RequestPayload: Clone + fmt::Debug + Eq + Hash + Send + Sync + 'static {
    /// OCPP action name
    const ACTION: &'static str;
    /// Versioned context URI, informational only
    const CONTEXT: &'static str;
    /// Properties left out of signature digests
    const NON_CANONICAL_FIELDS: &'static [&'static str] = &[];

    type Response: ResponsePayload;

    /// Mandatory-field checks run on every construction path.
    fn validate(&self) -> Result<(), ConstructionError> {
        Ok(())
    }

    /// Reads mandatory properties first, then optional ones.
    fn read(object: &JsonObject<'_>) -> Result<Self, ParseError>;

    fn write<'c>(&self, writer: ObjectWriter<'c>) -> ObjectWriter<'c>;
}

/// Business payload of a concrete response type
pub trait ResponsePayload: Clone + fmt::Debug + Eq + Hash + Send + Sync + 'static {
    const CONTEXT: &'static str;
    const NON_CANONICAL_FIELDS: &'static [&'static str] = &[];

    /// Business fields carried by negative responses.
    fn fallback() -> Self;

    fn read(object: &JsonObject<'_>) -> Result<Self, ParseError>;

    fn write<'c>(&self, writer: ObjectWriter<'c>) -> ObjectWriter<'c>;
}

/// Metadata the transport supplies alongside a received document
#[derive(Debug, Clone)]
pub struct TransportContext {
    pub request_id: RequestId,
    pub destination: SourceRouting,
    pub network_path: NetworkPath,
}

impl TransportContext {
    pub fn new(request_id: RequestId) -> Self {
        Self {
            request_id,
            destination: SourceRouting::link_peer(),
            network_path: NetworkPath::direct(),
        }
    }

    pub fn with_destination(mut self, destination: SourceRouting) -> Self {
        self.destination = destination;
        self
    }

    pub fn with_network_path(mut self, network_path: NetworkPath) -> Self {
        self.network_path = network_path;
        self
    }
}

fn request_hash<P: RequestPayload>(
    payload: &P,
    destination: &SourceRouting,
    signatures: &Signatures,
    custom_data: &Option<CustomData>,
) -> u64 {
    let mut hasher = DefaultHasher::new();
    P::ACTION.hash(&mut hasher);
    payload.hash(&mut hasher);
    destination.hash(&mut hasher);
    signatures.hash(&mut hasher);
    custom_data.hash(&mut hasher);
    hasher.finish()
}

/// Request envelope around a business payload
#[derive(Debug, Clone)]
pub struct Request<P: RequestPayload> {
    payload: P,
    destination: SourceRouting,
    network_path: NetworkPath,
    request_id: RequestId,
    timestamp: DateTime<Utc>,
    timeout: Duration,
    event_tracking_id: EventTrackingId,
    signatures: Signatures,
    custom_data: Option<CustomData>,
    format: SerializationFormat,
    cancellation: CancellationToken,
    hash: u64,
}

/// Builder for [`Request`]; unset fields get their defaults in [`build`](Self::build)
#[derive(Debug)]
pub struct RequestBuilder<P: RequestPayload> {
    payload: P,
    destination: SourceRouting,
    network_path: NetworkPath,
    request_id: Option<RequestId>,
    timestamp: Option<DateTime<Utc>>,
    timeout: Duration,
    event_tracking_id: Option<EventTrackingId>,
    signatures: Signatures,
    custom_data: Option<CustomData>,
    format: SerializationFormat,
    cancellation: Option<CancellationToken>,
}

impl<P: RequestPayload> RequestBuilder<P> {
    pub fn destination(mut self, destination: SourceRouting) -> Self {
        self.destination = destination;
        self
    }

    pub fn network_path(mut self, network_path: NetworkPath) -> Self {
        self.network_path = network_path;
        self
    }

    pub fn request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }

    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn event_tracking_id(mut self, event_tracking_id: EventTrackingId) -> Self {
        self.event_tracking_id = Some(event_tracking_id);
        self
    }

    pub fn signatures(mut self, signatures: Signatures) -> Self {
        self.signatures = signatures;
        self
    }

    pub fn custom_data(mut self, custom_data: CustomData) -> Self {
        self.custom_data = Some(custom_data);
        self
    }

    pub fn format(mut self, format: SerializationFormat) -> Self {
        self.format = format;
        self
    }

    pub fn cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = Some(cancellation);
        self
    }

    pub fn build(self) -> Result<Request<P>, ConstructionError> {
        self.payload.validate()?;
        let hash = request_hash(&self.payload, &self.destination, &self.signatures, &self.custom_data);
        Ok(Request {
            request_id: self
                .request_id
                .unwrap_or_else(|| RequestId::random(&mut rand::thread_rng())),
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            event_tracking_id: self
                .event_tracking_id
                .unwrap_or_else(|| EventTrackingId::random(&mut rand::thread_rng())),
            cancellation: self.cancellation.unwrap_or_default(),
            payload: self.payload,
            destination: self.destination,
            network_path: self.network_path,
            timeout: self.timeout,
            signatures: self.signatures,
            custom_data: self.custom_data,
            format: self.format,
            hash,
        })
    }
}

impl<P: RequestPayload> Request<P> {
    /// Request with default envelope fields.
    pub fn new(payload: P) -> Result<Self, ConstructionError> {
        Self::builder(payload).build()
    }

    pub fn builder(payload: P) -> RequestBuilder<P> {
        RequestBuilder {
            payload,
            destination: SourceRouting::link_peer(),
            network_path: NetworkPath::direct(),
            request_id: None,
            timestamp: None,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            event_tracking_id: None,
            signatures: Signatures::new(),
            custom_data: None,
            format: SerializationFormat::default(),
            cancellation: None,
        }
    }

    pub fn action(&self) -> &'static str {
        P::ACTION
    }

    pub fn context(&self) -> &'static str {
        P::CONTEXT
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Advisory; waiting on the response is where it gets applied.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn event_tracking_id(&self) -> &EventTrackingId {
        &self.event_tracking_id
    }

    pub fn custom_data(&self) -> Option<&CustomData> {
        self.custom_data.as_ref()
    }

    pub fn format(&self) -> SerializationFormat {
        self.format
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn to_json(&self) -> Value {
        self.to_json_with(&CustomSerializers::default())
    }

    pub fn to_json_with(&self, custom: &CustomSerializers) -> Value {
        let writer = self.payload.write(ObjectWriter::new::<P>(custom));
        write_envelope(writer, &self.signatures, &self.custom_data).finish(&self.payload)
    }

    pub fn to_text(&self) -> String {
        self.format.render(&self.to_json())
    }

    /// OCPP-J CALL frame for this request.
    pub fn to_frame(&self) -> Frame {
        Frame::Call {
            request_id: self.request_id.clone(),
            action: P::ACTION.to_string(),
            payload: self.to_json(),
        }
    }

    /// Reads a request document. Never panics; the error names the first
    /// offending property.
    pub fn try_parse(document: &Value, transport: TransportContext) -> Result<Self, ParseError> {
        let object = JsonObject::new(document)?;
        let payload = P::read(&object)?;
        let signatures = object.optional::<Signatures>(SIGNATURES_PROPERTY)?.unwrap_or_default();
        let custom_data = object.optional::<CustomData>(CUSTOM_DATA_PROPERTY)?;

        let mut builder = Self::builder(payload)
            .request_id(transport.request_id)
            .destination(transport.destination)
            .network_path(transport.network_path)
            .signatures(signatures);
        if let Some(custom_data) = custom_data {
            builder = builder.custom_data(custom_data);
        }
        Ok(builder.build()?)
    }

    pub fn parse(text: &str, transport: TransportContext) -> Result<Self, CodecError> {
        let document: Value = serde_json::from_str(text)?;
        Ok(Self::try_parse(&document, transport)?)
    }

    fn rehashed(mut self) -> Self {
        self.hash = request_hash(&self.payload, &self.destination, &self.signatures, &self.custom_data);
        self
    }
}

fn write_envelope<'c>(
    writer: ObjectWriter<'c>,
    signatures: &Signatures,
    custom_data: &Option<CustomData>,
) -> ObjectWriter<'c> {
    let custom = writer.custom();
    writer
        .optional(
            SIGNATURES_PROPERTY,
            (!signatures.is_empty()).then(|| signatures.to_json(custom)),
        )
        .optional(CUSTOM_DATA_PROPERTY, custom_data.as_ref().map(|c| c.to_json(custom)))
}

impl<P: RequestPayload> PartialEq for Request<P> {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
            && self.payload == other.payload
            && self.destination == other.destination
            && self.signatures == other.signatures
            && self.custom_data == other.custom_data
    }
}

impl<P: RequestPayload> Eq for Request<P> {}

impl<P: RequestPayload> Hash for Request<P> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl<P: RequestPayload> Routable for Request<P> {
    fn destination(&self) -> &SourceRouting {
        &self.destination
    }

    fn network_path(&self) -> &NetworkPath {
        &self.network_path
    }

    fn with_network_path(&self, network_path: NetworkPath) -> Self {
        Self {
            network_path,
            ..self.clone()
        }
    }
}

impl<P: RequestPayload> Signable for Request<P> {
    fn signable_document(&self) -> Value {
        self.to_json()
    }

    fn non_canonical_fields(&self) -> &'static [&'static str] {
        P::NON_CANONICAL_FIELDS
    }

    fn signatures(&self) -> &Signatures {
        &self.signatures
    }

    fn with_signature(&self, signature: Signature) -> Self {
        Self {
            signatures: self.signatures.with(signature),
            ..self.clone()
        }
        .rehashed()
    }
}

fn response_hash<P: RequestPayload>(
    request: &Request<P>,
    payload: &P::Response,
    result: &OcppResult,
    destination: &SourceRouting,
    signatures: &Signatures,
    custom_data: &Option<CustomData>,
) -> u64 {
    let mut hasher = DefaultHasher::new();
    request.hash.hash(&mut hasher);
    payload.hash(&mut hasher);
    result.hash(&mut hasher);
    destination.hash(&mut hasher);
    signatures.hash(&mut hasher);
    custom_data.hash(&mut hasher);
    hasher.finish()
}

/// Response envelope; owns the request it answers
#[derive(Debug, Clone)]
pub struct Response<P: RequestPayload> {
    request: Request<P>,
    payload: P::Response,
    result: OcppResult,
    timestamp: DateTime<Utc>,
    destination: SourceRouting,
    network_path: NetworkPath,
    signatures: Signatures,
    custom_data: Option<CustomData>,
    hash: u64,
}

impl<P: RequestPayload> Response<P> {
    fn assemble(request: Request<P>, payload: P::Response, result: OcppResult) -> Self {
        let destination = request.network_path.reply_routing();
        Self {
            request,
            payload,
            result,
            timestamp: Utc::now(),
            destination,
            network_path: NetworkPath::direct(),
            signatures: Signatures::new(),
            custom_data: None,
            hash: 0,
        }
        .rehashed()
    }

    /// Successful response. The return leg retraces the request's path.
    pub fn new(request: Request<P>, payload: P::Response) -> Self {
        Self::assemble(request, payload, OcppResult::ok())
    }

    /// Negative response around the fallback payload. Successful responses
    /// go through [`Response::new`].
    pub(crate) fn with_result(request: Request<P>, result: OcppResult) -> Self {
        debug_assert!(!result.is_ok(), "negative response built with an OK result");
        Self::assemble(request, P::Response::fallback(), result)
    }

    pub fn request_error(
        request: Request<P>,
        error_code: ErrorCode,
        description: impl Into<String>,
        details: Option<Value>,
    ) -> Self {
        Self::with_result(request, OcppResult::request_error(error_code, description, details))
    }

    pub fn formation_violation(request: Request<P>, description: impl Into<String>) -> Self {
        Self::with_result(request, OcppResult::formation_violation(description))
    }

    pub fn signature_error(request: Request<P>, description: impl Into<String>) -> Self {
        Self::with_result(request, OcppResult::signature_error(description))
    }

    pub fn failed(request: Request<P>, description: Option<String>) -> Self {
        Self::with_result(request, OcppResult::failed(description))
    }

    pub fn exception_occurred(request: Request<P>, error: impl fmt::Display) -> Self {
        Self::with_result(request, OcppResult::exception_occurred(error.to_string()))
    }

    /// Overrides the derived return-leg routing.
    pub fn with_destination(self, destination: SourceRouting) -> Self {
        Self { destination, ..self }.rehashed()
    }

    pub fn with_custom_data(self, custom_data: CustomData) -> Self {
        Self {
            custom_data: Some(custom_data),
            ..self
        }
        .rehashed()
    }

    pub fn with_timestamp(self, timestamp: DateTime<Utc>) -> Self {
        Self { timestamp, ..self }
    }

    pub fn request(&self) -> &Request<P> {
        &self.request
    }

    pub fn payload(&self) -> &P::Response {
        &self.payload
    }

    pub fn result(&self) -> &OcppResult {
        &self.result
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn runtime(&self) -> chrono::Duration {
        self.timestamp - self.request.timestamp
    }

    pub fn custom_data(&self) -> Option<&CustomData> {
        self.custom_data.as_ref()
    }

    pub fn context(&self) -> &'static str {
        <P::Response as ResponsePayload>::CONTEXT
    }

    pub fn to_json(&self) -> Value {
        self.to_json_with(&CustomSerializers::default())
    }

    /// Negative responses carry their result under `result`; OK responses
    /// are plain payload documents.
    pub fn to_json_with(&self, custom: &CustomSerializers) -> Value {
        let mut writer = self.payload.write(ObjectWriter::new::<P::Response>(custom));
        if !self.result.is_ok() {
            let result = self.result.to_json(custom);
            writer = writer.field(RESULT_PROPERTY, result);
        }
        write_envelope(writer, &self.signatures, &self.custom_data).finish(&self.payload)
    }

    pub fn to_text(&self) -> String {
        self.request.format.render(&self.to_json())
    }

    /// CALLRESULT for OK responses, CALLERROR otherwise.
    pub fn to_frame(&self) -> Frame {
        let request_id = self.request.request_id.clone();
        match self.result.ocpp_error_code() {
            None => Frame::CallResult {
                request_id,
                payload: self.to_json(),
            },
            Some(error_code) => Frame::CallError {
                request_id,
                error_code,
                description: self.result.description().unwrap_or_default().to_string(),
                details: self
                    .result
                    .details()
                    .cloned()
                    .unwrap_or_else(|| Value::Object(Default::default())),
            },
        }
    }

    /// Response built from a received CALLERROR.
    pub fn from_call_error(request: Request<P>, error_code: ErrorCode, description: &str, details: Value) -> Self {
        Self::with_result(request, OcppResult::from_call_error(error_code, description, details))
    }

    /// Reads a response document for `request`.
    pub fn try_parse(request: &Request<P>, document: &Value, network_path: NetworkPath) -> Result<Self, ParseError> {
        let object = JsonObject::new(document)?;
        let result = object.optional::<OcppResult>(RESULT_PROPERTY)?.unwrap_or_default();
        let payload = if result.is_ok() {
            <P::Response as ResponsePayload>::read(&object)?
        } else {
            P::Response::fallback()
        };
        let signatures = object.optional::<Signatures>(SIGNATURES_PROPERTY)?.unwrap_or_default();
        let custom_data = object.optional::<CustomData>(CUSTOM_DATA_PROPERTY)?;

        Ok(Self {
            network_path,
            signatures,
            custom_data,
            ..Self::assemble(request.clone(), payload, result)
        }
        .rehashed())
    }

    pub fn parse(request: &Request<P>, text: &str) -> Result<Self, CodecError> {
        let document: Value = serde_json::from_str(text)?;
        Ok(Self::try_parse(request, &document, NetworkPath::direct())?)
    }

    fn rehashed(mut self) -> Self {
        self.hash = response_hash(
            &self.request,
            &self.payload,
            &self.result,
            &self.destination,
            &self.signatures,
            &self.custom_data,
        );
        self
    }
}

impl<P: RequestPayload> PartialEq for Response<P> {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
            && self.request == other.request
            && self.payload == other.payload
            && self.result == other.result
            && self.destination == other.destination
            && self.signatures == other.signatures
            && self.custom_data == other.custom_data
    }
}

impl<P: RequestPayload> Eq for Response<P> {}

impl<P: RequestPayload> Hash for Response<P> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl<P: RequestPayload> Routable for Response<P> {
    fn destination(&self) -> &SourceRouting {
        &self.destination
    }

    fn network_path(&self) -> &NetworkPath {
        &self.network_path
    }

    fn with_network_path(&self, network_path: NetworkPath) -> Self {
        Self {
            network_path,
            ..self.clone()
        }
    }
}

impl<P: RequestPayload> Signable for Response<P> {
    fn signable_document(&self) -> Value {
        self.to_json()
    }

    fn non_canonical_fields(&self) -> &'static [&'static str] {
        <P::Response as ResponsePayload>::NON_CANONICAL_FIELDS
    }

    fn signatures(&self) -> &Signatures {
        &self.signatures
    }

    fn with_signature(&self, signature: Signature) -> Self {
        Self {
            signatures: self.signatures.with(signature),
            ..self.clone()
        }
        .rehashed()
    }
}
