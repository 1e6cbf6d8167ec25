//! OCPP identifier value types
//!
//! Identifiers are immutable values that can only be obtained by parsing
//! untrusted text (or JSON) or by explicit generation from a caller-supplied
//! source of randomness or sequence numbers.
//!
//! - String-backed identifiers are trimmed on parse and compare, order and
//!   hash case-insensitively.
//! - Numeric identifiers are non-negative integers and compare by value.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use thiserror::Error;

use super::codec::{CustomSerializers, FromJson, ParseError, ToJson};

/// Identifier parse failure, naming the identifier kind that was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {reason}")]
pub struct IdentifierError {
    pub field: &'static str,
    pub reason: String,
}

impl IdentifierError {
    fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

impl From<IdentifierError> for ParseError {
    fn from(error: IdentifierError) -> Self {
        // The enclosing property name is attached by the JSON reader.
        ParseError::value(error.reason)
    }
}

/// Monotonic counter for sequential identifier generation.
///
/// The caller owns the sequence; there is no process-wide counter.
#[derive(Debug, Default)]
pub struct IdSequence {
    next: AtomicU64,
}

impl IdSequence {
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    pub fn next_value(&self) -> u64 {
        self.next.fetch_add(1, AtomicOrdering::Relaxed)
    }
}

fn validate_text(field: &'static str, text: &str, max_len: usize) -> Result<String, IdentifierError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(IdentifierError::new(field, "must not be empty"));
    }
    if trimmed.chars().count() > max_len {
        return Err(IdentifierError::new(
            field,
            format!("exceeds maximum length of {max_len} characters"),
        ));
    }
    if trimmed.chars().any(char::is_control) {
        return Err(IdentifierError::new(field, "contains control characters"));
    }
    Ok(trimmed.to_string())
}

fn random_text<R: Rng + ?Sized>(rng: &mut R) -> String {
    let bytes: [u8; 16] = rng.gen();
    uuid::Builder::from_random_bytes(bytes).into_uuid().to_string()
}

fn cmp_ignore_ascii_case(a: &str, b: &str) -> Ordering {
    a.bytes()
        .map(|b| b.to_ascii_lowercase())
        .cmp(b.bytes().map(|b| b.to_ascii_lowercase()))
}

macro_rules! string_identifier {
    ($(#[$meta:meta])* $name:ident, $field:literal, $max_len:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone)]
        pub struct $name(String);

        impl $name {
            pub const FIELD: &'static str = $field;
            pub const MAX_LENGTH: usize = $max_len;

            pub fn parse(text: &str) -> Result<Self, IdentifierError> {
                validate_text($field, text, $max_len).map(Self)
            }

            pub fn try_parse(text: &str) -> Option<Self> {
                Self::parse(text).ok()
            }

            /// Random identifier in UUID text form.
            pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
                Self(random_text(rng))
            }

            pub fn from_sequence(sequence: &IdSequence) -> Self {
                Self(sequence.next_value().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Blank text never parses, so a constructed identifier is never empty.
            pub fn is_empty(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                self.0.eq_ignore_ascii_case(&other.0)
            }
        }

        impl Eq for $name {}

        impl PartialOrd for $name {
            fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                Some(self.cmp(other))
            }
        }

        impl Ord for $name {
            fn cmp(&self, other: &Self) -> Ordering {
                cmp_ignore_ascii_case(&self.0, &other.0)
            }
        }

        impl Hash for $name {
            fn hash<H: Hasher>(&self, state: &mut H) {
                for byte in self.0.bytes() {
                    state.write_u8(byte.to_ascii_lowercase());
                }
                state.write_u8(0xff);
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdentifierError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl FromJson for $name {
            fn from_json(value: &Value) -> Result<Self, ParseError> {
                let text = value
                    .as_str()
                    .ok_or_else(|| ParseError::value("expected a string"))?;
                Ok(Self::parse(text)?)
            }
        }

        impl ToJson for $name {
            fn to_json(&self, _custom: &CustomSerializers) -> Value {
                Value::String(self.0.clone())
            }
        }
    };
}

macro_rules! numeric_identifier {
    ($(#[$meta:meta])* $name:ident, $field:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(i32);

        impl $name {
            pub const FIELD: &'static str = $field;

            pub fn parse(text: &str) -> Result<Self, IdentifierError> {
                let value = text
                    .trim()
                    .parse::<i32>()
                    .map_err(|e| IdentifierError::new($field, format!("not an integer ({e})")))?;
                Self::from_value(value)
            }

            pub fn try_parse(text: &str) -> Option<Self> {
                Self::parse(text).ok()
            }

            pub fn from_value(value: i32) -> Result<Self, IdentifierError> {
                if value < 0 {
                    return Err(IdentifierError::new($field, "must not be negative"));
                }
                Ok(Self(value))
            }

            pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
                Self(rng.gen_range(0..=i32::MAX))
            }

            /// Wraps around after `i32::MAX`.
            pub fn from_sequence(sequence: &IdSequence) -> Self {
                Self((sequence.next_value() % (i32::MAX as u64 + 1)) as i32)
            }

            pub fn value(&self) -> i32 {
                self.0
            }

            /// Zero is a valid id, so numeric identifiers have no empty state.
            pub const fn is_empty(&self) -> bool {
                false
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdentifierError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl FromJson for $name {
            fn from_json(value: &Value) -> Result<Self, ParseError> {
                let number = value
                    .as_i64()
                    .ok_or_else(|| ParseError::value("expected an integer"))?;
                let number = i32::try_from(number)
                    .map_err(|_| ParseError::value("integer out of range"))?;
                Ok(Self::from_value(number)?)
            }
        }

        impl ToJson for $name {
            fn to_json(&self, _custom: &CustomSerializers) -> Value {
                Value::from(self.0)
            }
        }
    };
}

string_identifier!(
    /// Identity of a charging station as presented on its connection
    ChargingStationId,
    "chargingStationId",
    48
);
string_identifier!(
    /// Identity of a node in the networking overlay (station, relay or CSMS)
    NetworkingNodeId,
    "networkingNodeId",
    48
);
string_identifier!(
    /// Correlates one response with one request on a channel
    RequestId,
    "requestId",
    36
);
string_identifier!(
    /// Opaque token for correlating log events of one round trip
    EventTrackingId,
    "eventTrackingId",
    64
);

numeric_identifier!(ConnectorId, "connectorId");
numeric_identifier!(EvseId, "evseId");
numeric_identifier!(
    /// Integer transaction id (OCPP 1.6 style)
    TransactionId,
    "transactionId"
);
numeric_identifier!(ReservationId, "reservationId");
numeric_identifier!(
    /// Id of a variable monitor configured on a station
    MonitoringId,
    "monitoringId"
);

/// Request id source chosen by the caller
#[derive(Debug)]
pub enum RequestIdGenerator {
    Random(Mutex<StdRng>),
    Sequential(IdSequence),
}

impl RequestIdGenerator {
    pub fn random() -> Self {
        Self::Random(Mutex::new(StdRng::from_entropy()))
    }

    pub fn seeded(seed: u64) -> Self {
        Self::Random(Mutex::new(StdRng::seed_from_u64(seed)))
    }

    pub fn sequential(first: u64) -> Self {
        Self::Sequential(IdSequence::starting_at(first))
    }

    pub fn next_request_id(&self) -> RequestId {
        match self {
            Self::Random(rng) => RequestId::random(&mut *rng.lock()),
            Self::Sequential(sequence) => RequestId::from_sequence(sequence),
        }
    }
}
