//! Concrete OCPP messages
//!
//! Each message only describes its business payload; the generic
//! [`Request`](super::envelope::Request) / [`Response`](super::envelope::Response)
//! envelope adds everything else.

mod cancel_reservation;
mod clear_variable_monitoring;
mod heartbeat;

pub use cancel_reservation::{CancelReservationRequest, CancelReservationResponse, CancelReservationStatus};
pub use clear_variable_monitoring::{
    ClearMonitoringResult, ClearMonitoringStatus, ClearVariableMonitoringRequest, ClearVariableMonitoringResponse,
};
pub use heartbeat::{HeartbeatRequest, HeartbeatResponse};
