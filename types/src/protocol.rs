//! Wire shapes for the master's v1 scheduler API.
//!
//! Calls and events travel as JSON renderings of the protocol buffer
//! messages: snake_case field names, SCREAMING_CASE enum values, a `type`
//! discriminator on the envelope and one optional payload struct per
//! variant. Empty repeated fields are omitted.

use serde::{Deserialize, Serialize};

/// A string-valued protocol identifier (framework, offer, agent, task,
/// executor ids all share this shape on the wire).
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Id {
    pub value: String,
}

impl Id {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallType {
    Subscribe,
    Accept,
    Decline,
    Revive,
    Suppress,
    Kill,
    Reconcile,
    Acknowledge,
}

/// Outbound envelope. `framework_id` is stamped by the client on every call
/// once the master has assigned one.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Call {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub framework_id: Option<Id>,
    #[serde(rename = "type")]
    pub call_type: CallType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscribe: Option<Subscribe>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accept: Option<Accept>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decline: Option<Decline>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kill: Option<Kill>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconcile: Option<Reconcile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acknowledge: Option<Acknowledge>,
}

impl Call {
    fn empty(call_type: CallType) -> Self {
        Self {
            framework_id: None,
            call_type,
            subscribe: None,
            accept: None,
            decline: None,
            kill: None,
            reconcile: None,
            acknowledge: None,
        }
    }

    pub fn subscribe(framework_info: FrameworkInfo) -> Self {
        Self {
            framework_id: framework_info.id.clone(),
            subscribe: Some(Subscribe { framework_info }),
            ..Self::empty(CallType::Subscribe)
        }
    }

    pub fn accept(offer_ids: Vec<Id>, task_infos: Vec<TaskInfo>, refuse_seconds: f64) -> Self {
        Self {
            accept: Some(Accept {
                offer_ids,
                operations: vec![Operation {
                    operation_type: "LAUNCH".into(),
                    launch: Some(Launch { task_infos }),
                }],
                filters: Some(Filters { refuse_seconds }),
            }),
            ..Self::empty(CallType::Accept)
        }
    }

    pub fn decline(offer_ids: Vec<Id>, refuse_seconds: f64) -> Self {
        Self {
            decline: Some(Decline {
                offer_ids,
                filters: Some(Filters { refuse_seconds }),
            }),
            ..Self::empty(CallType::Decline)
        }
    }

    pub fn revive() -> Self {
        Self::empty(CallType::Revive)
    }

    pub fn suppress() -> Self {
        Self::empty(CallType::Suppress)
    }

    pub fn kill(task_id: Id, agent_id: Option<Id>) -> Self {
        Self {
            kill: Some(Kill { task_id, agent_id }),
            ..Self::empty(CallType::Kill)
        }
    }

    pub fn reconcile(tasks: Vec<ReconcileTask>) -> Self {
        Self {
            reconcile: Some(Reconcile { tasks }),
            ..Self::empty(CallType::Reconcile)
        }
    }

    pub fn acknowledge(agent_id: Id, task_id: Id, uuid: String) -> Self {
        Self {
            acknowledge: Some(Acknowledge {
                agent_id,
                task_id,
                uuid,
            }),
            ..Self::empty(CallType::Acknowledge)
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Subscribe {
    pub framework_info: FrameworkInfo,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct FrameworkInfo {
    pub user: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Id>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<String>,
    pub checkpoint: bool,
    pub failover_timeout: f64,
}

/// Subscription state persisted across scheduler restarts. The framework id
/// is immutable once the master has assigned it; the stream id is refreshed
/// on every (re)subscribe.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct FrameworkRecord {
    pub info: FrameworkInfo,
    #[serde(default)]
    pub stream_id: Option<String>,
}

impl FrameworkRecord {
    pub fn framework_id(&self) -> Option<&str> {
        self.info.id.as_ref().map(|id| id.value.as_str())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Accept {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub offer_ids: Vec<Id>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operations: Vec<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<Filters>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Operation {
    #[serde(rename = "type")]
    pub operation_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub launch: Option<Launch>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Launch {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub task_infos: Vec<TaskInfo>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Decline {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub offer_ids: Vec<Id>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<Filters>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug)]
pub struct Filters {
    pub refuse_seconds: f64,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Kill {
    pub task_id: Id,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<Id>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Reconcile {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<ReconcileTask>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ReconcileTask {
    pub task_id: Id,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<Id>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Acknowledge {
    pub agent_id: Id,
    pub task_id: Id,
    pub uuid: String,
}

/// Inbound envelope. The discriminator stays a plain string so unknown
/// event types decode cleanly and can be skipped.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Event {
    #[serde(rename = "type", default)]
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscribed: Option<Subscribed>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offers: Option<Offers>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rescind: Option<Rescind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update: Option<Update>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Subscribed,
    Offers,
    Rescind,
    Update,
    Heartbeat,
    Failure,
    Error,
    Unknown,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self.event_type.as_str() {
            "SUBSCRIBED" => EventKind::Subscribed,
            "OFFERS" => EventKind::Offers,
            "RESCIND" => EventKind::Rescind,
            "UPDATE" => EventKind::Update,
            "HEARTBEAT" => EventKind::Heartbeat,
            "FAILURE" => EventKind::Failure,
            "ERROR" => EventKind::Error,
            _ => EventKind::Unknown,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Subscribed {
    pub framework_id: Id,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat_interval_seconds: Option<f64>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Offers {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub offers: Vec<Offer>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Offer {
    pub id: Id,
    pub agent_id: Id,
    #[serde(default)]
    pub hostname: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<Attribute>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<Resource>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Attribute {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<Text>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Text {
    pub value: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Resource {
    pub name: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scalar: Option<Scalar>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ranges: Option<Ranges>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl Resource {
    pub fn scalar(name: &str, value: f64) -> Self {
        Self {
            name: name.into(),
            resource_type: Some("SCALAR".into()),
            scalar: Some(Scalar { value }),
            ranges: None,
            role: None,
        }
    }

    pub fn ranges(name: &str, range: Vec<ValueRange>) -> Self {
        Self {
            name: name.into(),
            resource_type: Some("RANGES".into()),
            scalar: None,
            ranges: Some(Ranges { range }),
            role: None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default)]
pub struct Scalar {
    pub value: f64,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Ranges {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub range: Vec<ValueRange>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ValueRange {
    pub begin: u64,
    pub end: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Rescind {
    pub offer_id: Id,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Update {
    pub status: TaskStatus,
}

/// Wire task status. `uuid` is null on synthetic (reconciliation) statuses,
/// which must not be acknowledged.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct TaskStatus {
    pub task_id: Id,
    #[serde(default)]
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<Id>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Failure {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<Id>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executor_id: Option<Id>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<i32>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ErrorInfo {
    #[serde(default)]
    pub message: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct TaskInfo {
    pub name: String,
    pub task_id: Id,
    pub agent_id: Id,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<Resource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<CommandInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<ContainerInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executor: Option<ExecutorInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discovery: Option<DiscoveryInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<Labels>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct CommandInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shell: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<Environment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uris: Vec<CommandUri>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Environment {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<EnvironmentVariable>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct EnvironmentVariable {
    pub name: String,
    pub value: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct CommandUri {
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extract: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_file: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ContainerInfo {
    #[serde(rename = "type")]
    pub container_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker: Option<DockerInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linux_info: Option<LinuxInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub network_infos: Vec<NetworkInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct DockerInfo {
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub port_mappings: Vec<DockerPortMapping>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<Parameter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub privileged: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force_pull_image: Option<bool>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct DockerPortMapping {
    pub host_port: u32,
    pub container_port: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Parameter {
    pub key: String,
    pub value: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct LinuxInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_capabilities: Option<CapabilityInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounding_capabilities: Option<CapabilityInfo>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct CapabilityInfo {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Volume {
    pub container_path: String,
    pub mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<VolumeSource>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct VolumeSource {
    #[serde(rename = "type")]
    pub source_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_volume: Option<DockerVolume>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct DockerVolume {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct NetworkInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ip_addresses: Vec<IpAddress>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct IpAddress {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct DiscoveryInfo {
    pub visibility: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ports: Option<Ports>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Ports {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<Port>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Port {
    pub number: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ExecutorInfo {
    #[serde(rename = "type")]
    pub executor_type: String,
    pub executor_id: Id,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub framework_id: Option<Id>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<CommandInfo>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Labels {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<Label>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Label {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl Label {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_envelope_carries_type_discriminator() {
        let call = Call::decline(vec![Id::new("offer-1")], 120.0);
        let json = serde_json::to_value(&call).unwrap();
        assert_eq!(json["type"], "DECLINE");
        assert_eq!(json["decline"]["offer_ids"][0]["value"], "offer-1");
        assert_eq!(json["decline"]["filters"]["refuse_seconds"], 120.0);
        assert!(json.get("accept").is_none());
    }

    #[test]
    fn unknown_event_type_decodes_and_classifies() {
        let event: Event =
            serde_json::from_str(r#"{"type":"INVERSE_OFFERS","offers":{}}"#).unwrap();
        assert_eq!(event.kind(), EventKind::Unknown);
        assert_eq!(event.event_type, "INVERSE_OFFERS");
    }

    #[test]
    fn update_event_keeps_null_uuid_distinct() {
        let event: Event = serde_json::from_str(
            r#"{"type":"UPDATE","update":{"status":{"task_id":{"value":"t1"},"state":"TASK_RUNNING"}}}"#,
        )
        .unwrap();
        assert_eq!(event.kind(), EventKind::Update);
        let status = &event.update.unwrap().status;
        assert_eq!(status.state, "TASK_RUNNING");
        assert!(status.uuid.is_none());
    }
}
