//! OCPP message contract
//!
//! - identifier value types ([`identifiers`])
//! - JSON codec with per-type and per-field overrides ([`codec`])
//! - result taxonomy ([`result`]) and OCPP-J framing ([`frame`])
//! - detached signatures ([`signature`]) and source routing ([`routing`])
//! - the generic [`Request`] / [`Response`] envelope ([`envelope`])
//! - the handler boundary ([`endpoint`]) and outbound correlation ([`pending`])

pub mod codec;
pub mod endpoint;
pub mod envelope;
pub mod frame;
pub mod identifiers;
pub mod messages;
pub mod pending;
pub mod result;
pub mod routing;
pub mod signature;
pub mod types;

pub use codec::{CodecError, CustomSerializers, ParseError};
pub use endpoint::{Endpoint, Reply, RequestHandler, Router};
pub use envelope::{ConstructionError, Request, RequestPayload, Response, ResponsePayload, TransportContext};
pub use frame::{Frame, FrameError, MessageType};
pub use pending::{PendingCallError, PendingCalls, PendingResponse};
pub use result::{ErrorCode, OcppResult, ResultCode};
pub use routing::{NetworkPath, Relay, Relayed, Routable, SourceRouting, StaticTopology, Topology};
pub use signature::{Signable, Signature, SignaturePolicy, Signatures, SigningKey};
