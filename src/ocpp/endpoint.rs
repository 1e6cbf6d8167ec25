//! Handler boundary
//!
//! An [`Endpoint`] turns one received CALL into exactly one reply. Parse
//! failures, signature failures, handler errors and handler panics all
//! become negative results; nothing escapes to the transport.

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn};

use super::envelope::{Request, RequestPayload, Response, TransportContext};
use super::frame::Frame;
use super::identifiers::RequestId;
use super::result::{ErrorCode, OcppResult};
use super::signature::{verify_document, Signable, SignaturePolicy};

/// Business logic for one request type
#[async_trait]
pub trait RequestHandler<P: RequestPayload>: Send + Sync {
    async fn handle(&self, request: &Request<P>) -> anyhow::Result<Response<P>>;
}

/// Reply produced for one received request
#[derive(Debug, Clone)]
pub enum Reply<P: RequestPayload> {
    Response(Response<P>),
    /// The document never became a typed request
    Rejected { request_id: RequestId, result: OcppResult },
}

impl<P: RequestPayload> Reply<P> {
    pub fn result(&self) -> &OcppResult {
        match self {
            Self::Response(response) => response.result(),
            Self::Rejected { result, .. } => result,
        }
    }

    pub fn to_frame(&self) -> Frame {
        match self {
            Self::Response(response) => response.to_frame(),
            Self::Rejected { request_id, result } => Frame::CallError {
                request_id: request_id.clone(),
                error_code: result.ocpp_error_code().unwrap_or(ErrorCode::GenericError),
                description: result.description().unwrap_or_default().to_string(),
                details: result.details().cloned().unwrap_or_else(|| json!({})),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Endpoint {
    policy: SignaturePolicy,
}

impl Endpoint {
    pub fn new(policy: SignaturePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> SignaturePolicy {
        self.policy
    }

    pub async fn process<P, H>(&self, handler: &H, document: &Value, transport: TransportContext) -> Reply<P>
    where
        P: RequestPayload,
        H: RequestHandler<P> + ?Sized,
    {
        let request_id = transport.request_id.clone();
        let request = match Request::<P>::try_parse(document, transport) {
            Ok(request) => request,
            Err(e) => {
                warn!(action = P::ACTION, request_id = %request_id, error = %e, "rejecting malformed request");
                return Reply::Rejected {
                    request_id,
                    result: OcppResult::formation_violation(e.to_string()),
                };
            }
        };

        let verifications = verify_document(document, P::NON_CANONICAL_FIELDS, request.signatures());
        if let Err(reason) = self.policy.evaluate(&verifications) {
            warn!(action = P::ACTION, request_id = %request_id, %reason, "signature check failed");
            return Reply::Response(Response::signature_error(request, reason));
        }

        match AssertUnwindSafe(handler.handle(&request)).catch_unwind().await {
            Ok(Ok(response)) => {
                debug!(action = P::ACTION, request_id = %request_id, result = %response.result().code(), "handled");
                Reply::Response(response)
            }
            Ok(Err(e)) => {
                warn!(action = P::ACTION, request_id = %request_id, error = %e, "handler failed");
                Reply::Response(Response::exception_occurred(request, e))
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                warn!(action = P::ACTION, request_id = %request_id, %message, "handler panicked");
                Reply::Response(Response::exception_occurred(request, message))
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "handler panicked".to_string())
}

#[async_trait]
trait ActionHandler: Send + Sync {
    async fn dispatch(&self, endpoint: &Endpoint, document: &Value, transport: TransportContext) -> Frame;
}

struct Bound<P, H> {
    handler: H,
    _payload: std::marker::PhantomData<fn() -> P>,
}

#[async_trait]
impl<P, H> ActionHandler for Bound<P, H>
where
    P: RequestPayload,
    H: RequestHandler<P>,
{
    async fn dispatch(&self, endpoint: &Endpoint, document: &Value, transport: TransportContext) -> Frame {
        endpoint.process::<P, H>(&self.handler, document, transport).await.to_frame()
    }
}

/// Dispatches CALL frames to handlers by action name
#[derive(Clone, Default)]
pub struct Router {
    endpoint: Endpoint,
    handlers: HashMap<&'static str, Arc<dyn ActionHandler>>,
}

impl Router {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            handlers: HashMap::new(),
        }
    }

    pub fn route<P, H>(mut self, handler: H) -> Self
    where
        P: RequestPayload,
        H: RequestHandler<P> + 'static,
    {
        self.handlers.insert(
            P::ACTION,
            Arc::new(Bound {
                handler,
                _payload: std::marker::PhantomData,
            }),
        );
        self
    }

    pub fn actions(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.handlers.keys().copied()
    }

    /// Reply frame for a CALL; `None` for frames that are not calls.
    pub async fn handle(&self, frame: Frame, transport: impl FnOnce(RequestId) -> TransportContext) -> Option<Frame> {
        let Frame::Call {
            request_id,
            action,
            payload,
        } = frame
        else {
            return None;
        };

        let Some(handler) = self.handlers.get(action.as_str()) else {
            warn!(%action, request_id = %request_id, "no handler for action");
            return Some(Frame::CallError {
                request_id,
                error_code: ErrorCode::NotImplemented,
                description: format!("action '{action}' is not implemented"),
                details: json!({}),
            });
        };
        Some(handler.dispatch(&self.endpoint, &payload, transport(request_id)).await)
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("endpoint", &self.endpoint)
            .field("actions", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
