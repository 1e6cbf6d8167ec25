use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

use crate::ocpp::envelope::{Request, RequestBuilder, RequestPayload};
use crate::ocpp::identifiers::{NetworkingNodeId, RequestIdGenerator};
use crate::ocpp::signature::SignaturePolicy;

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct Config {
    #[validate(nested)]
    pub node: NodeConfig,
    #[validate(nested)]
    pub requests: RequestsConfig,
    #[serde(default)]
    pub signatures: SignaturesConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NodeConfig {
    /// Networking node id of this process
    #[validate(length(min = 1, max = 48))]
    pub id: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self { id: "local".into() }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdGeneration {
    #[default]
    Random,
    Sequential,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RequestsConfig {
    #[validate(range(min = 1, max = 3600))]
    pub default_timeout_seconds: u64,
    pub id_generation: IdGeneration,
}

impl Default for RequestsConfig {
    fn default() -> Self {
        Self {
            default_timeout_seconds: 30,
            id_generation: IdGeneration::Random,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignaturesConfig {
    pub require_signatures: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub log_filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_filter: "info".into(),
        }
    }
}

impl Config {
    /// Defaults, then `config/default.toml`, then `OCPP__` environment overrides.
    pub fn load() -> Result<Self> {
        Self::from_figment(
            Figment::from(Serialized::defaults(Config::default()))
                .merge(Toml::file("config/default.toml"))
                .merge(Env::prefixed("OCPP__").split("__")),
        )
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract().context("invalid configuration")?;
        config.validate().context("configuration out of range")?;
        config.node_id()?;
        Ok(config)
    }

    pub fn node_id(&self) -> Result<NetworkingNodeId> {
        NetworkingNodeId::parse(&self.node.id).context("node.id")
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.requests.default_timeout_seconds)
    }

    pub fn signature_policy(&self) -> SignaturePolicy {
        SignaturePolicy {
            require_signatures: self.signatures.require_signatures,
        }
    }

    pub fn request_id_generator(&self) -> RequestIdGenerator {
        match self.requests.id_generation {
            IdGeneration::Random => RequestIdGenerator::random(),
            IdGeneration::Sequential => RequestIdGenerator::sequential(1),
        }
    }

    /// Outbound request carrying the next generated id and the configured timeout.
    pub fn outbound<P: RequestPayload>(&self, ids: &RequestIdGenerator, payload: P) -> RequestBuilder<P> {
        Request::builder(payload)
            .request_id(ids.next_request_id())
            .timeout(self.default_timeout())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocpp::messages::HeartbeatRequest;

    fn figment(toml: &str) -> Figment {
        Figment::from(Serialized::defaults(Config::default())).merge(Toml::string(toml))
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::from_figment(figment("")).unwrap();
        assert_eq!(config.default_timeout(), Duration::from_secs(30));
        assert!(!config.signature_policy().require_signatures);
    }

    #[test]
    fn test_file_values_override_defaults() {
        let config = Config::from_figment(figment(
            r#"
            [node]
            id = "csms-1"

            [requests]
            default_timeout_seconds = 10
            id_generation = "sequential"

            [signatures]
            require_signatures = true
            "#,
        ))
        .unwrap();

        assert_eq!(config.node_id().unwrap().as_str(), "csms-1");
        assert_eq!(config.requests.id_generation, IdGeneration::Sequential);
        assert_eq!(config.request_id_generator().next_request_id().as_str(), "1");
        assert!(config.signature_policy().require_signatures);
    }

    #[test]
    fn test_out_of_range_values_are_rejected() {
        assert!(Config::from_figment(figment(&format!("[node]\nid = \"{}\"", "n".repeat(49)))).is_err());
        assert!(Config::from_figment(figment("[requests]\ndefault_timeout_seconds = 7200")).is_err());
        assert!(Config::from_figment(figment("[node]\nid = \"  \"")).is_err());
    }

    #[test]
    fn test_outbound_requests_use_configured_ids_and_timeout() {
        let config = Config::from_figment(figment(
            "[requests]\ndefault_timeout_seconds = 10\nid_generation = \"sequential\"",
        ))
        .unwrap();
        let ids = config.request_id_generator();

        let first = config.outbound(&ids, HeartbeatRequest).build().unwrap();
        let second = config.outbound(&ids, HeartbeatRequest).build().unwrap();
        assert_eq!(first.request_id().as_str(), "1");
        assert_eq!(second.request_id().as_str(), "2");
        assert_eq!(first.timeout(), Duration::from_secs(10));
    }
}
