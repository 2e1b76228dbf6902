//! The parsed compose document model.
//!
//! YAML parsing happens upstream; the admin surface receives the document
//! already lowered to this shape as JSON. Maps are ordered so translation
//! is deterministic (the "first network" rules below depend on it).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct ComposeDocument {
    pub version: Option<String>,
    pub services: BTreeMap<String, ComposeService>,
    pub networks: BTreeMap<String, ComposeNetwork>,
    pub volumes: BTreeMap<String, ComposeVolume>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct ComposeService {
    pub image: String,
    pub command: Option<String>,
    pub hostname: Option<String>,
    pub container_name: Option<String>,
    /// `NAME=VALUE` entries; values may be `vault://` secret references.
    pub environment: Vec<String>,
    /// Port strings: `port`, `host:container`, `ip:host:container`,
    /// optionally suffixed `/udp`.
    pub ports: Vec<String>,
    /// `source:target[:mode]` entries.
    pub volumes: Vec<String>,
    pub labels: BTreeMap<String, String>,
    pub cap_add: Vec<String>,
    pub cap_drop: Vec<String>,
    pub privileged: bool,
    pub pull_policy: Option<String>,
    pub network: Option<String>,
    pub networks: BTreeMap<String, ComposeAttachedNetwork>,
    pub network_mode: Option<String>,
    pub deploy: ComposeDeploy,
}

impl ComposeService {
    /// The network this service attaches to: the singular `network` field
    /// wins, otherwise the first entry of `networks`.
    pub fn first_network(&self) -> Option<&str> {
        self.network
            .as_deref()
            .or_else(|| self.networks.keys().next().map(String::as_str))
    }

    pub fn first_network_alias(&self) -> Option<&str> {
        self.networks
            .values()
            .next()
            .and_then(|n| n.aliases.first())
            .map(String::as_str)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct ComposeAttachedNetwork {
    pub aliases: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct ComposeNetwork {
    pub name: Option<String>,
    pub driver: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct ComposeVolume {
    pub driver: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct ComposeDeploy {
    pub replicas: Option<u32>,
    pub resources: ComposeResources,
    pub placement: ComposePlacement,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct ComposeResources {
    pub limits: ComposeLimits,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct ComposeLimits {
    pub cpus: Option<String>,
    pub memory: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct ComposePlacement {
    pub constraints: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_service_document_decodes() {
        let doc: ComposeDocument = serde_json::from_str(
            r#"{"services":{"web":{"image":"nginx","ports":["80"],"deploy":{"replicas":2}}}}"#,
        )
        .unwrap();
        let web = &doc.services["web"];
        assert_eq!(web.image, "nginx");
        assert_eq!(web.deploy.replicas, Some(2));
        assert!(web.network_mode.is_none());
    }

    #[test]
    fn singular_network_wins_over_networks_map() {
        let svc: ComposeService = serde_json::from_str(
            r#"{"image":"app","network":"backend","networks":{"frontend":{"aliases":["fe"]}}}"#,
        )
        .unwrap();
        assert_eq!(svc.first_network(), Some("backend"));
        assert_eq!(svc.first_network_alias(), Some("fe"));
    }
}
