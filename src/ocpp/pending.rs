//! Outstanding outbound calls, correlated by request id

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::envelope::{Request, RequestPayload, Response, ResponsePayload};
use super::frame::Frame;
use super::identifiers::RequestId;
use super::routing::NetworkPath;
use super::signature::{verify_document, Signable, SignaturePolicy};

#[derive(Debug, Error)]
pub enum PendingCallError {
    #[error("request id {0} is already awaiting a response")]
    DuplicateRequestId(RequestId),

    #[error("{action} timed out after {timeout:?}")]
    Timeout { action: &'static str, timeout: Duration },

    #[error("{action} was cancelled")]
    Cancelled { action: &'static str },

    #[error("pending call registry dropped the call")]
    Closed,
}

/// Waiting callers; the token tells one registration of a reused id from another.
type Waiters = Arc<Mutex<HashMap<RequestId, (u64, oneshot::Sender<Frame>)>>>;

/// Registry of calls sent but not yet answered
#[derive(Debug, Clone, Default)]
pub struct PendingCalls {
    waiters: Waiters,
    next_token: Arc<AtomicU64>,
    policy: SignaturePolicy,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signature policy applied to every CALLRESULT before it reaches a waiter.
    pub fn with_policy(mut self, policy: SignaturePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn register<P: RequestPayload>(&self, request: Request<P>) -> Result<PendingResponse<P>, PendingCallError> {
        let (sender, receiver) = oneshot::channel();
        let request_id = request.request_id().clone();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        {
            let mut waiters = self.waiters.lock();
            if waiters.contains_key(&request_id) {
                return Err(PendingCallError::DuplicateRequestId(request_id));
            }
            waiters.insert(request_id.clone(), (token, sender));
        }
        debug!(action = P::ACTION, request_id = %request_id, "call registered");
        Ok(PendingResponse {
            request,
            receiver,
            policy: self.policy,
            _registration: Registration {
                waiters: self.waiters.clone(),
                request_id,
                token,
            },
        })
    }

    /// Hands a CALLRESULT or CALLERROR to its waiter. Returns false when
    /// nobody is waiting for it.
    pub fn complete(&self, frame: Frame) -> bool {
        if matches!(frame, Frame::Call { .. }) {
            return false;
        }
        let Some((_, sender)) = self.waiters.lock().remove(frame.request_id()) else {
            warn!(request_id = %frame.request_id(), "dropping unsolicited response");
            return false;
        };
        let request_id = frame.request_id().clone();
        if sender.send(frame).is_err() {
            debug!(request_id = %request_id, "waiter went away before the response arrived");
            return false;
        }
        true
    }

    pub fn in_flight(&self) -> usize {
        self.waiters.lock().len()
    }
}

struct Registration {
    waiters: Waiters,
    request_id: RequestId,
    token: u64,
}

impl Drop for Registration {
    fn drop(&mut self) {
        let mut waiters = self.waiters.lock();
        // the id may already belong to a later call
        if waiters.get(&self.request_id).is_some_and(|(token, _)| *token == self.token) {
            waiters.remove(&self.request_id);
        }
    }
}

/// Handle for the response to one registered call
pub struct PendingResponse<P: RequestPayload> {
    request: Request<P>,
    receiver: oneshot::Receiver<Frame>,
    policy: SignaturePolicy,
    _registration: Registration,
}

impl<P: RequestPayload> PendingResponse<P> {
    pub fn request(&self) -> &Request<P> {
        &self.request
    }

    /// Waits for the reply, bounded by the request's timeout and
    /// cancellation token.
    pub async fn wait(self) -> Result<Response<P>, PendingCallError> {
        let Self {
            request,
            receiver,
            policy,
            _registration,
        } = self;
        let timeout = request.timeout();
        let cancellation = request.cancellation().clone();

        let frame = tokio::select! {
            _ = cancellation.cancelled() => {
                return Err(PendingCallError::Cancelled { action: P::ACTION });
            }
            received = tokio::time::timeout(timeout, receiver) => match received {
                Ok(Ok(frame)) => frame,
                Ok(Err(_)) => return Err(PendingCallError::Closed),
                Err(_) => {
                    warn!(action = P::ACTION, request_id = %request.request_id(), ?timeout, "call timed out");
                    return Err(PendingCallError::Timeout { action: P::ACTION, timeout });
                }
            },
        };

        Ok(match frame {
            Frame::CallResult { payload, .. } => accept_result(request, &payload, policy),
            Frame::CallError {
                error_code,
                description,
                details,
                ..
            } => Response::from_call_error(request, error_code, &description, details),
            Frame::Call { .. } => return Err(PendingCallError::Closed),
        })
    }
}

fn accept_result<P: RequestPayload>(request: Request<P>, payload: &Value, policy: SignaturePolicy) -> Response<P> {
    let response = match Response::try_parse(&request, payload, NetworkPath::direct()) {
        Ok(response) => response,
        Err(e) => {
            warn!(action = P::ACTION, error = %e, "malformed response payload");
            return Response::formation_violation(request, e.to_string());
        }
    };
    let verifications = verify_document(
        payload,
        <P::Response as ResponsePayload>::NON_CANONICAL_FIELDS,
        response.signatures(),
    );
    match policy.evaluate(&verifications) {
        Ok(()) => response,
        Err(reason) => {
            warn!(action = P::ACTION, request_id = %request.request_id(), %reason, "response signature check failed");
            Response::signature_error(request, reason)
        }
    }
}
