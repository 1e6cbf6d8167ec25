//! OCPP generic message contract: typed request/response envelopes with
//! JSON codecs, result taxonomy, signatures and source routing.

pub mod config;
pub mod ocpp;
pub mod telemetry;
