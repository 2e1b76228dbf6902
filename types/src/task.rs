//! The persistent task record and its lifecycle states.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::protocol::{Label, Parameter};

/// Lifecycle state of a task record. Dunder states (`__NEW`, `__STAGING`,
/// `__KILL`, `__RESTART`) are scheduler-internal; the rest mirror the
/// master's task states with the `TASK_` prefix stripped.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Written out-of-band without a state; adopted on the next tick.
    #[default]
    #[serde(rename = "")]
    Unset,
    #[serde(rename = "__NEW")]
    New,
    /// An ACCEPT with a LAUNCH for this task went out; waiting for the
    /// master to report staging.
    #[serde(rename = "__STAGING")]
    Launched,
    #[serde(rename = "STAGING")]
    Staging,
    #[serde(rename = "STARTING")]
    Starting,
    #[serde(rename = "RUNNING")]
    Running,
    /// Kill requested through the admin surface; KILL call emitted.
    #[serde(rename = "__KILL")]
    KillRequested,
    #[serde(rename = "KILLING")]
    Killing,
    #[serde(rename = "KILLED")]
    Killed,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "ERROR")]
    Error,
    #[serde(rename = "LOST")]
    Lost,
    #[serde(rename = "FINISHED")]
    Finished,
    /// Replacement record awaiting placement after a restart.
    #[serde(rename = "__RESTART")]
    Restart,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Unset => "",
            TaskState::New => "__NEW",
            TaskState::Launched => "__STAGING",
            TaskState::Staging => "STAGING",
            TaskState::Starting => "STARTING",
            TaskState::Running => "RUNNING",
            TaskState::KillRequested => "__KILL",
            TaskState::Killing => "KILLING",
            TaskState::Killed => "KILLED",
            TaskState::Failed => "FAILED",
            TaskState::Error => "ERROR",
            TaskState::Lost => "LOST",
            TaskState::Finished => "FINISHED",
            TaskState::Restart => "__RESTART",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Killed
                | TaskState::Failed
                | TaskState::Error
                | TaskState::Lost
                | TaskState::Finished
        )
    }

    /// Pending states are the ones the offer matcher places.
    pub fn is_pending(&self) -> bool {
        matches!(self, TaskState::New | TaskState::Restart)
    }

    /// Map a master task state (`TASK_RUNNING`, ...) onto a record state.
    /// Unreachable/gone/unknown all collapse into `LOST` so the restart
    /// policy treats them uniformly.
    pub fn from_wire(state: &str) -> Option<TaskState> {
        match state {
            "TASK_STAGING" => Some(TaskState::Staging),
            "TASK_STARTING" => Some(TaskState::Starting),
            "TASK_RUNNING" => Some(TaskState::Running),
            "TASK_KILLING" => Some(TaskState::Killing),
            "TASK_KILLED" => Some(TaskState::Killed),
            "TASK_FAILED" => Some(TaskState::Failed),
            "TASK_ERROR" => Some(TaskState::Error),
            "TASK_FINISHED" => Some(TaskState::Finished),
            "TASK_LOST" | "TASK_DROPPED" | "TASK_GONE" | "TASK_GONE_BY_OPERATOR"
            | "TASK_UNREACHABLE" | "TASK_UNKNOWN" => Some(TaskState::Lost),
            _ => None,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContainerKind {
    #[default]
    Docker,
    Mesos,
    Custom,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    Host,
    #[default]
    Bridge,
    User,
}

impl NetworkMode {
    /// The docker containerizer's network enum value.
    pub fn docker_network(&self) -> &'static str {
        match self {
            NetworkMode::Host => "HOST",
            NetworkMode::Bridge => "BRIDGE",
            NetworkMode::User => "USER",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PortProtocol {
    #[default]
    Tcp,
    Udp,
}

impl PortProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            PortProtocol::Tcp => "tcp",
            PortProtocol::Udp => "udp",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PortMapping {
    pub container_port: u32,
    pub host_port: u32,
    pub protocol: PortProtocol,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VolumeMode {
    Ro,
    #[default]
    Rw,
}

impl VolumeMode {
    pub fn as_wire(&self) -> &'static str {
        match self {
            VolumeMode::Ro => "RO",
            VolumeMode::Rw => "RW",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct VolumeSpec {
    pub source: String,
    pub container_path: String,
    pub mode: VolumeMode,
    pub driver: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct DiscoveryPort {
    pub name: String,
    pub number: u32,
    pub protocol: PortProtocol,
}

/// Name and ports advertised to service discovery.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct DiscoverySpec {
    pub name: String,
    pub ports: Vec<DiscoveryPort>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutorUri {
    pub value: String,
    #[serde(default)]
    pub output_file: Option<String>,
}

/// Custom executor synthesized from service labels.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutorSpec {
    pub executor_id: String,
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub uris: Vec<ExecutorUri>,
}

/// The scheduler's persistent representation of one desired task instance.
///
/// Records serialize as self-describing JSON so fields can be added without
/// invalidating stored state; every field below the identity block carries a
/// default for that reason. Stored under `<task_name>:<task_id>`, where
/// `task_name` is `<framework>:<project>:<service>`.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct TaskRecord {
    pub task_id: String,
    pub task_name: String,
    pub project: String,
    pub service: String,

    #[serde(default)]
    pub cpu: f64,
    #[serde(default)]
    pub memory: f64,
    #[serde(default)]
    pub disk: f64,
    #[serde(default)]
    pub instances: u32,

    #[serde(default)]
    pub container_kind: ContainerKind,
    #[serde(default)]
    pub container_image: String,
    #[serde(default)]
    pub pull_policy: String,
    #[serde(default)]
    pub privileged: bool,
    #[serde(default)]
    pub cap_add: Vec<String>,
    #[serde(default)]
    pub cap_drop: Vec<String>,
    #[serde(default)]
    pub docker_parameters: Vec<Parameter>,

    #[serde(default)]
    pub network_mode: NetworkMode,
    #[serde(default)]
    pub network_name: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub port_mappings: Vec<PortMapping>,

    #[serde(default)]
    pub labels: Vec<Label>,
    #[serde(default)]
    pub environment: Vec<EnvVar>,
    #[serde(default)]
    pub volumes: Vec<VolumeSpec>,

    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub shell: bool,
    #[serde(default)]
    pub discovery: DiscoverySpec,
    #[serde(default)]
    pub executor: Option<ExecutorSpec>,

    #[serde(default)]
    pub state: TaskState,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub agent_hostname: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub restarts: u32,
}

/// Label key carrying a lowered `node.hostname ==` placement constraint.
pub const PLACEMENT_HOSTNAME_LABEL: &str = "__mc_placement_node_hostname";

impl TaskRecord {
    pub fn storage_key(&self) -> String {
        format!("{}:{}", self.task_name, self.task_id)
    }

    pub fn is_pending(&self) -> bool {
        self.state.is_pending()
    }

    pub fn label_value(&self, key: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|l| l.key == key)
            .and_then(|l| l.value.as_deref())
    }

    /// Hostname pin, if placement constraints requested one.
    pub fn pinned_hostname(&self) -> Option<&str> {
        self.label_value(PLACEMENT_HOSTNAME_LABEL)
    }

    /// Host ports this task needs an offer to cover.
    pub fn host_ports(&self) -> impl Iterator<Item = u32> + '_ {
        self.port_mappings.iter().map(|m| m.host_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_strings_round_trip() {
        for state in [
            TaskState::New,
            TaskState::Launched,
            TaskState::Staging,
            TaskState::Running,
            TaskState::KillRequested,
            TaskState::Restart,
            TaskState::Finished,
        ] {
            let json = serde_json::to_string(&state).unwrap();
            let back: TaskState = serde_json::from_str(&json).unwrap();
            assert_eq!(back, state);
            assert_eq!(json, format!("\"{}\"", state.as_str()));
        }
    }

    #[test]
    fn record_serialization_is_stable() {
        let record = TaskRecord {
            task_id: "demo_web.b2c9".into(),
            task_name: "stevedore:demo:web".into(),
            project: "demo".into(),
            service: "web".into(),
            cpu: 0.5,
            memory: 512.0,
            disk: 1000.0,
            instances: 2,
            container_image: "nginx".into(),
            state: TaskState::New,
            port_mappings: vec![PortMapping {
                container_port: 80,
                host_port: 31_000,
                protocol: PortProtocol::Tcp,
            }],
            ..Default::default()
        };
        let first = serde_json::to_vec(&record).unwrap();
        let back: TaskRecord = serde_json::from_slice(&first).unwrap();
        let second = serde_json::to_vec(&back).unwrap();
        assert_eq!(first, second);
        assert_eq!(back, record);
    }

    #[test]
    fn missing_fields_decode_with_defaults() {
        let record: TaskRecord = serde_json::from_str(
            r#"{"task_id":"a.1","task_name":"s:p:a","project":"p","service":"a"}"#,
        )
        .unwrap();
        assert_eq!(record.state, TaskState::Unset);
        assert_eq!(record.restarts, 0);
        assert!(record.agent_id.is_none());
    }

    #[test]
    fn unreachable_wire_states_collapse_to_lost() {
        assert_eq!(TaskState::from_wire("TASK_UNKNOWN"), Some(TaskState::Lost));
        assert_eq!(TaskState::from_wire("TASK_GONE"), Some(TaskState::Lost));
        assert_eq!(TaskState::from_wire("TASK_BOGUS"), None);
    }
}
