use anyhow::Result;
use async_trait::async_trait;
use ocpp_toolkit::config::Config;
use ocpp_toolkit::ocpp::identifiers::{MonitoringId, ReservationId};
use ocpp_toolkit::ocpp::messages::{
    CancelReservationRequest, CancelReservationResponse, CancelReservationStatus, ClearMonitoringResult,
    ClearMonitoringStatus, ClearVariableMonitoringRequest, ClearVariableMonitoringResponse, HeartbeatRequest,
    HeartbeatResponse,
};
use ocpp_toolkit::ocpp::types::StatusInfo;
use ocpp_toolkit::ocpp::{Endpoint, Frame, PendingCalls, Request, RequestHandler, Response, Router, TransportContext};
use ocpp_toolkit::telemetry;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{info, warn};

/// Monitors and reservations known to this simulated station
#[derive(Debug, Clone)]
struct Station {
    monitors: Arc<Mutex<BTreeSet<MonitoringId>>>,
    reservations: Arc<Mutex<BTreeSet<ReservationId>>>,
}

impl Station {
    fn seeded() -> Result<Self> {
        let monitors = (1..=4).map(MonitoringId::from_value).collect::<Result<_, _>>()?;
        let reservations = (1..=4).map(ReservationId::from_value).collect::<Result<_, _>>()?;
        Ok(Self {
            monitors: Arc::new(Mutex::new(monitors)),
            reservations: Arc::new(Mutex::new(reservations)),
        })
    }
}

#[async_trait]
impl RequestHandler<ClearVariableMonitoringRequest> for Station {
    async fn handle(
        &self,
        request: &Request<ClearVariableMonitoringRequest>,
    ) -> Result<Response<ClearVariableMonitoringRequest>> {
        let mut monitors = self.monitors.lock();
        let results = request.payload().ids().iter().map(|id| {
            if monitors.remove(id) {
                Ok(ClearMonitoringResult::new(*id, ClearMonitoringStatus::Accepted))
            } else {
                StatusInfo::new("UnknownMonitor")
                    .map(|info| ClearMonitoringResult::new(*id, ClearMonitoringStatus::NotFound).with_status_info(info))
            }
        });
        let payload = ClearVariableMonitoringResponse::new(results.collect::<Result<Vec<_>, _>>()?);
        Ok(Response::new(request.clone(), payload))
    }
}

#[async_trait]
impl RequestHandler<CancelReservationRequest> for Station {
    async fn handle(&self, request: &Request<CancelReservationRequest>) -> Result<Response<CancelReservationRequest>> {
        let status = if self.reservations.lock().remove(&request.payload().reservation_id) {
            CancelReservationStatus::Accepted
        } else {
            CancelReservationStatus::Rejected
        };
        Ok(Response::new(request.clone(), CancelReservationResponse::new(status)))
    }
}

struct Clock;

#[async_trait]
impl RequestHandler<HeartbeatRequest> for Clock {
    async fn handle(&self, request: &Request<HeartbeatRequest>) -> Result<Response<HeartbeatRequest>> {
        Ok(Response::new(request.clone(), HeartbeatResponse::now()))
    }
}

async fn send<W: AsyncWrite + Unpin>(out: &mut W, frame: &Frame) -> Result<()> {
    out.write_all(frame.to_text().as_bytes()).await?;
    out.write_all(b"\n").await?;
    out.flush().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::load()?;
    telemetry::init_tracing(&cfg.telemetry.log_filter);

    let station = Station::seeded()?;
    let router = Router::new(Endpoint::new(cfg.signature_policy()))
        .route::<ClearVariableMonitoringRequest, _>(station.clone())
        .route::<CancelReservationRequest, _>(station)
        .route::<HeartbeatRequest, _>(Clock);
    let pending = PendingCalls::new().with_policy(cfg.signature_policy());
    let ids = cfg.request_id_generator();

    info!(node = %cfg.node_id()?, actions = ?router.actions().collect::<Vec<_>>(), "ocpp loopback ready");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    // announce ourselves to the link peer
    let heartbeat = cfg.outbound(&ids, HeartbeatRequest).build()?;
    let waiter = pending.register(heartbeat.clone())?;
    send(&mut stdout, &heartbeat.to_frame()).await?;
    tokio::spawn(async move {
        match waiter.wait().await {
            Ok(response) if response.is_ok() => {
                info!(current_time = %response.payload().current_time, "peer answered heartbeat");
            }
            Ok(response) => warn!(result = ?response.result(), "peer rejected heartbeat"),
            Err(e) => warn!(error = %e, "heartbeat unanswered"),
        }
    });
    let shutdown = telemetry::shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        let line = tokio::select! {
            _ = &mut shutdown => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        let frame = match Frame::parse(&line) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "malformed frame");
                if let Some(rejection) = Frame::rejection_for(&line, &e) {
                    send(&mut stdout, &rejection).await?;
                }
                continue;
            }
        };

        match frame {
            Frame::Call { .. } => {
                if let Some(reply) = router.handle(frame, TransportContext::new).await {
                    send(&mut stdout, &reply).await?;
                }
            }
            other => {
                pending.complete(other);
            }
        }
    }

    warn!(in_flight = pending.in_flight(), "shutdown complete");
    Ok(())
}
