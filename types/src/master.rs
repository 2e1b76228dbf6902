//! JSON shapes of the master's out-of-band REST endpoints
//! (`/slaves/<agent-id>`, `/tasks?task_id=...&framework_id=...`).

use serde::{Deserialize, Serialize};

use crate::protocol::NetworkInfo;

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct AgentsResponse {
    #[serde(default)]
    pub slaves: Vec<AgentInfo>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct AgentInfo {
    pub id: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub attributes: Option<serde_json::Value>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct TasksResponse {
    #[serde(default)]
    pub tasks: Vec<MasterTask>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct MasterTask {
    pub id: String,
    #[serde(default)]
    pub framework_id: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub statuses: Vec<MasterTaskStatus>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct MasterTaskStatus {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub timestamp: Option<f64>,
    #[serde(default)]
    pub container_status: Option<MasterContainerStatus>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct MasterContainerStatus {
    #[serde(default)]
    pub network_infos: Vec<NetworkInfo>,
}
