//! Compose-to-task translation.
//!
//! A parsed compose document plus a project name become one task record per
//! replica per service. Translation is all-or-nothing per service: an
//! unresolved secret or a malformed port rejects the service without
//! writing partial records.

use rand::{Rng, SeedableRng};
use stevedore_types::{
    ComposeDocument, ComposeService, ContainerKind, DiscoveryPort, DiscoverySpec, EnvVar,
    ExecutorSpec, ExecutorUri, Label, NetworkMode, PLACEMENT_HOSTNAME_LABEL, Parameter,
    PortMapping, PortProtocol, TaskRecord, TaskState, VolumeMode, VolumeSpec,
};
use uuid::Uuid;

use crate::context::SchedulerConfig;
use crate::secrets::{SecretStore, is_secret_reference};

#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    #[error("service {service}: invalid port {spec:?}")]
    InvalidPort { service: String, spec: String },

    #[error("service {service}: secret for {name} did not resolve: {source}")]
    Secret {
        service: String,
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("service {service}: executor uri list did not parse: {source}")]
    ExecutorUris {
        service: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("service {service}: {count} ports cannot fit in range {from}-{to}")]
    PortRangeExhausted {
        service: String,
        count: usize,
        from: u32,
        to: u32,
    },

    #[error("service {service}: resource limit {value:?} is not a number")]
    InvalidResource { service: String, value: String },
}

pub fn new_task_id(project: &str, service: &str) -> String {
    format!("{}_{}.{}", project, service, Uuid::new_v4())
}

/// Translate every service of the document into its replica task records,
/// all in state `__NEW`. Nothing is persisted here; the admin surface owns
/// writing the result.
pub async fn translate_project(
    doc: &ComposeDocument,
    project: &str,
    cfg: &SchedulerConfig,
    secrets: &dyn SecretStore,
) -> Result<Vec<TaskRecord>, TranslateError> {
    let mut rng = rand::rngs::StdRng::from_os_rng();
    let mut records = Vec::new();
    for (name, service) in &doc.services {
        let replicas = service.deploy.replicas.unwrap_or(1).max(1);
        let base = translate_service(doc, project, name, service, replicas, cfg, secrets).await?;
        let container_ports = parse_container_ports(name, service)?;
        for _ in 0..replicas {
            let mut record = base.clone();
            record.task_id = new_task_id(project, name);
            let host_ports = draw_host_ports(
                container_ports.len(),
                cfg.port_range_from,
                cfg.port_range_to,
                &mut rng,
            )
            .ok_or_else(|| TranslateError::PortRangeExhausted {
                service: name.clone(),
                count: container_ports.len(),
                from: cfg.port_range_from,
                to: cfg.port_range_to,
            })?;
            record.port_mappings = container_ports
                .iter()
                .zip(host_ports)
                .map(|(&(container_port, protocol), host_port)| PortMapping {
                    container_port,
                    host_port,
                    protocol,
                })
                .collect();
            record.discovery = discovery_for(&record.task_name, &record.port_mappings);
            records.push(record);
        }
    }
    Ok(records)
}

async fn translate_service(
    doc: &ComposeDocument,
    project: &str,
    name: &str,
    service: &ComposeService,
    replicas: u32,
    cfg: &SchedulerConfig,
    secrets: &dyn SecretStore,
) -> Result<TaskRecord, TranslateError> {
    let network_mode = network_mode_for(doc, service);
    let command = service.command.clone().filter(|c| !c.is_empty());
    let shell = command.is_some();
    let kind = container_kind_for(service);
    let hostname = hostname_for(service, network_mode);
    let executor = executor_for(name, service, command.as_deref())?;
    let environment = environment_for(name, service, secrets).await?;

    let mut labels: Vec<Label> = service
        .labels
        .iter()
        .map(|(k, v)| Label::new(k.clone(), v.clone()))
        .collect();
    labels.extend(placement_labels(service));

    Ok(TaskRecord {
        task_id: String::new(),
        task_name: format!("{}:{}:{}", cfg.framework_name, project, name),
        project: project.to_string(),
        service: name.to_string(),
        cpu: limit_or(name, service.deploy.resources.limits.cpus.as_deref(), cfg.default_cpu)?,
        memory: limit_or(
            name,
            service.deploy.resources.limits.memory.as_deref(),
            cfg.default_memory,
        )?,
        disk: cfg.default_disk,
        instances: replicas,
        container_kind: kind,
        container_image: service.image.clone(),
        pull_policy: service.pull_policy.clone().unwrap_or_default(),
        privileged: service.privileged,
        cap_add: service.cap_add.clone(),
        cap_drop: service.cap_drop.clone(),
        docker_parameters: docker_parameters_for(service, network_mode, kind, hostname.as_deref()),
        network_mode,
        network_name: network_name_for(doc, service),
        hostname,
        port_mappings: Vec::new(),
        labels,
        environment,
        volumes: volumes_for(doc, service),
        command,
        shell,
        discovery: DiscoverySpec::default(),
        executor,
        state: TaskState::New,
        agent_id: None,
        agent_hostname: None,
        message: None,
        restarts: 0,
    })
}

fn limit_or(service: &str, limit: Option<&str>, default: f64) -> Result<f64, TranslateError> {
    match limit {
        None | Some("") => Ok(default),
        Some(raw) => raw.parse().map_err(|_| TranslateError::InvalidResource {
            service: service.to_string(),
            value: raw.to_string(),
        }),
    }
}

fn network_mode_for(doc: &ComposeDocument, service: &ComposeService) -> NetworkMode {
    if service.network_mode.is_none()
        && let Some(key) = service.first_network()
    {
        let declared = doc
            .networks
            .get(key)
            .and_then(|n| n.name.as_deref())
            .unwrap_or("");
        return if declared.eq_ignore_ascii_case("host") {
            NetworkMode::Host
        } else {
            NetworkMode::User
        };
    }
    match service.network_mode.as_deref() {
        Some("host") => NetworkMode::Host,
        Some("user") => NetworkMode::User,
        _ => NetworkMode::Bridge,
    }
}

fn network_name_for(doc: &ComposeDocument, service: &ComposeService) -> Option<String> {
    let key = service.first_network()?;
    Some(
        doc.networks
            .get(key)
            .and_then(|n| n.name.clone())
            .unwrap_or_else(|| key.to_string()),
    )
}

fn hostname_for(service: &ComposeService, mode: NetworkMode) -> Option<String> {
    if mode == NetworkMode::Host {
        return None;
    }
    service
        .hostname
        .clone()
        .filter(|h| !h.is_empty())
        .or_else(|| service.container_name.clone().filter(|c| !c.is_empty()))
        .or_else(|| Some(Uuid::new_v4().to_string()))
}

fn container_kind_for(service: &ComposeService) -> ContainerKind {
    match label_suffix(service, ".container_type").map(str::to_ascii_lowercase) {
        Some(kind) if kind == "mesos" => ContainerKind::Mesos,
        Some(kind) if kind == "custom" => ContainerKind::Custom,
        Some(_) => ContainerKind::Docker,
        None if label_suffix(service, ".executor").is_some() => ContainerKind::Custom,
        None => ContainerKind::Docker,
    }
}

fn label_suffix<'a>(service: &'a ComposeService, suffix: &str) -> Option<&'a str> {
    service
        .labels
        .iter()
        .find(|(key, _)| key.ends_with(suffix))
        .map(|(_, value)| value.as_str())
}

async fn environment_for(
    service_name: &str,
    service: &ComposeService,
    secrets: &dyn SecretStore,
) -> Result<Vec<EnvVar>, TranslateError> {
    let mut env = Vec::new();
    for entry in &service.environment {
        let Some((name, value)) = entry.split_once('=') else {
            continue;
        };
        let value = if is_secret_reference(value) {
            secrets
                .resolve(value)
                .await
                .map_err(|source| TranslateError::Secret {
                    service: service_name.to_string(),
                    name: name.to_string(),
                    source,
                })?
        } else {
            value.to_string()
        };
        env.push(EnvVar {
            name: name.to_string(),
            value,
        });
    }
    Ok(env)
}

fn volumes_for(doc: &ComposeDocument, service: &ComposeService) -> Vec<VolumeSpec> {
    let mut volumes = Vec::new();
    for spec in &service.volumes {
        let parts: Vec<&str> = spec.split(':').collect();
        if parts.len() < 2 {
            continue;
        }
        let mode = if parts.len() >= 3 && parts[2].eq_ignore_ascii_case("ro") {
            VolumeMode::Ro
        } else {
            VolumeMode::Rw
        };
        let driver = doc
            .volumes
            .get(parts[0])
            .and_then(|v| v.driver.clone())
            .unwrap_or_else(|| "local".to_string());
        volumes.push(VolumeSpec {
            source: parts[0].to_string(),
            container_path: parts[1].to_string(),
            mode,
            driver,
        });
    }
    volumes
}

fn docker_parameters_for(
    service: &ComposeService,
    mode: NetworkMode,
    kind: ContainerKind,
    hostname: Option<&str>,
) -> Vec<Parameter> {
    let mut params = Vec::new();
    if mode != NetworkMode::Bridge
        && kind == ContainerKind::Docker
        && hostname.is_some()
        && let Some(alias) = service.first_network_alias()
    {
        params.push(Parameter {
            key: "net-alias".to_string(),
            value: alias.to_string(),
        });
    }
    params
}

fn executor_for(
    service_name: &str,
    service: &ComposeService,
    command: Option<&str>,
) -> Result<Option<ExecutorSpec>, TranslateError> {
    let Some(executor_command) = label_suffix(service, ".executor") else {
        return Ok(None);
    };
    let command_line = format!("exec '{}' {}", executor_command, command.unwrap_or(""))
        .trim_end()
        .to_string();
    let uris = match label_suffix(service, ".executor_uri") {
        Some(raw) => serde_json::from_str::<Vec<ExecutorUri>>(raw).map_err(|source| {
            TranslateError::ExecutorUris {
                service: service_name.to_string(),
                source,
            }
        })?,
        None => Vec::new(),
    };
    let name = command_line
        .rsplit('/')
        .next()
        .unwrap_or(command_line.as_str())
        .to_string();
    Ok(Some(ExecutorSpec {
        executor_id: Uuid::new_v4().to_string(),
        name,
        command: command_line,
        uris,
    }))
}

fn placement_labels(service: &ComposeService) -> Vec<Label> {
    service
        .deploy
        .placement
        .constraints
        .iter()
        .filter_map(|constraint| constraint.split_once("=="))
        .filter(|(key, _)| key.trim() == "node.hostname")
        .map(|(_, value)| Label::new(PLACEMENT_HOSTNAME_LABEL, value.trim()))
        .collect()
}

fn parse_container_ports(
    service_name: &str,
    service: &ComposeService,
) -> Result<Vec<(u32, PortProtocol)>, TranslateError> {
    service
        .ports
        .iter()
        .map(|spec| {
            parse_port_spec(spec).ok_or_else(|| TranslateError::InvalidPort {
                service: service_name.to_string(),
                spec: spec.clone(),
            })
        })
        .collect()
}

/// Parse one compose port string into its container port and protocol.
/// Accepted: `port`, `host:container`, `ip:host:container`, each optionally
/// suffixed `/udp` or `/tcp`. The host side is ignored; host ports are
/// always drawn from the configured range.
pub fn parse_port_spec(spec: &str) -> Option<(u32, PortProtocol)> {
    let (ports, protocol) = match spec.rsplit_once('/') {
        Some((ports, suffix)) => match suffix.to_ascii_lowercase().as_str() {
            "udp" => (ports, PortProtocol::Udp),
            "tcp" => (ports, PortProtocol::Tcp),
            _ => return None,
        },
        None => (spec, PortProtocol::Tcp),
    };
    if ports.split(':').count() > 3 {
        return None;
    }
    let container = ports.rsplit(':').next()?;
    container.parse().ok().map(|port| (port, protocol))
}

const MAX_DRAW_ATTEMPTS: usize = 32;

/// Draw `count` sequential host ports from `[from, to]`: a random base,
/// re-drawn until the whole run stays in range.
pub fn draw_host_ports(
    count: usize,
    from: u32,
    to: u32,
    rng: &mut impl Rng,
) -> Option<Vec<u32>> {
    if count == 0 {
        return Some(Vec::new());
    }
    if from > to || (to - from + 1) < count as u32 {
        return None;
    }
    let span = count as u32 - 1;
    for _ in 0..MAX_DRAW_ATTEMPTS {
        let base = rng.random_range(from..=to);
        if base.checked_add(span).is_some_and(|end| end <= to) {
            return Some((base..=base + span).collect());
        }
    }
    // Every base in this narrower range fits, so the draw cannot miss.
    let base = rng.random_range(from..=to - span);
    Some((base..=base + span).collect())
}

pub fn discovery_for(task_name: &str, mappings: &[PortMapping]) -> DiscoverySpec {
    DiscoverySpec {
        name: task_name.to_string(),
        ports: mappings
            .iter()
            .map(|m| DiscoveryPort {
                name: format!("{}:{}", task_name, m.container_port),
                number: m.host_port,
                protocol: m.protocol,
            })
            .collect(),
    }
}

/// Plan of registry writes for applying a freshly translated project on top
/// of whatever is already live.
#[derive(Debug, Default)]
pub struct ApplyPlan {
    /// Records to write. Fresh records arrive in `__NEW`; records paired
    /// with a live instance carry its identity and placement forward.
    pub put: Vec<TaskRecord>,
    /// Surplus live instances beyond the desired replica count.
    pub kill: Vec<TaskRecord>,
}

pub fn reconcile_replicas(existing: Vec<TaskRecord>, desired: Vec<TaskRecord>) -> ApplyPlan {
    use std::collections::BTreeMap;

    let mut live: BTreeMap<String, Vec<TaskRecord>> = BTreeMap::new();
    for record in existing {
        live.entry(record.task_name.clone()).or_default().push(record);
    }
    let mut fresh: BTreeMap<String, Vec<TaskRecord>> = BTreeMap::new();
    for record in desired {
        fresh
            .entry(record.task_name.clone())
            .or_default()
            .push(record);
    }

    let mut plan = ApplyPlan::default();
    for (name, records) in fresh {
        let mut current = live.remove(&name).unwrap_or_default();
        current.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        let mut current = current.into_iter();
        for mut record in records {
            if let Some(old) = current.next() {
                // The paired instance keeps its identity and its actual
                // placement; the refreshed spec takes effect on restart.
                record.task_id = old.task_id;
                record.state = old.state;
                record.agent_id = old.agent_id;
                record.agent_hostname = old.agent_hostname;
                record.restarts = old.restarts;
                record.port_mappings = old.port_mappings;
                record.discovery = old.discovery;
            }
            plan.put.push(record);
        }
        plan.kill.extend(current);
    }
    plan
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use proptest::prelude::*;

    use super::*;

    struct StaticSecrets(HashMap<String, String>);

    #[async_trait]
    impl SecretStore for StaticSecrets {
        async fn resolve(&self, reference: &str) -> anyhow::Result<String> {
            self.0
                .get(reference)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("unknown secret {reference}"))
        }
    }

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            framework_name: "stevedore".into(),
            master_url: "http://127.0.0.1:5050".into(),
            default_cpu: 0.1,
            default_memory: 128.0,
            default_disk: 1000.0,
            port_range_from: 31000,
            port_range_to: 32000,
            refuse_seconds: 120.0,
            reconcile_interval_seconds: 15,
            demand_tick_seconds: 10,
            parallel_handlers: false,
            state_file: "framework.json".into(),
        }
    }

    fn doc(json: &str) -> ComposeDocument {
        serde_json::from_str(json).unwrap()
    }

    #[tokio::test]
    async fn two_replicas_become_two_new_records() {
        let doc = doc(
            r#"{"services":{"svc":{"image":"nginx","ports":["80"],"deploy":{"replicas":2}}}}"#,
        );
        let records = translate_project(&doc, "demo", &config(), &DenyAll)
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_ne!(records[0].task_id, records[1].task_id);
        for record in &records {
            assert_eq!(record.task_name, "stevedore:demo:svc");
            assert_eq!(record.state, TaskState::New);
            assert_eq!(record.instances, 2);
            assert_eq!(record.port_mappings.len(), 1);
            assert_eq!(record.port_mappings[0].container_port, 80);
            assert!((31000..=32000).contains(&record.port_mappings[0].host_port));
        }
    }

    struct DenyAll;

    #[async_trait]
    impl SecretStore for DenyAll {
        async fn resolve(&self, reference: &str) -> anyhow::Result<String> {
            anyhow::bail!("unexpected secret lookup for {reference}")
        }
    }

    #[tokio::test]
    async fn replica_count_is_honored_for_each_service() {
        for k in 1u32..=5 {
            let doc = doc(&format!(
                r#"{{"services":{{"a":{{"image":"a","deploy":{{"replicas":{k}}}}},"b":{{"image":"b"}}}}}}"#,
            ));
            let records = translate_project(&doc, "p", &config(), &DenyAll)
                .await
                .unwrap();
            let a: Vec<_> = records.iter().filter(|r| r.service == "a").collect();
            let b: Vec<_> = records.iter().filter(|r| r.service == "b").collect();
            assert_eq!(a.len(), k as usize);
            assert_eq!(b.len(), 1);
            let mut ids: Vec<_> = a.iter().map(|r| r.task_id.clone()).collect();
            ids.sort();
            ids.dedup();
            assert_eq!(ids.len(), k as usize);
            assert!(a.iter().all(|r| r.task_name == a[0].task_name));
        }
    }

    #[tokio::test]
    async fn resources_fall_back_to_scheduler_defaults() {
        let doc = doc(
            r#"{"services":{"svc":{"image":"app","deploy":{"resources":{"limits":{"cpus":"1.5"}}}}}}"#,
        );
        let records = translate_project(&doc, "p", &config(), &DenyAll)
            .await
            .unwrap();
        assert_eq!(records[0].cpu, 1.5);
        assert_eq!(records[0].memory, 128.0);
        assert_eq!(records[0].disk, 1000.0);
    }

    #[tokio::test]
    async fn host_network_clears_the_hostname() {
        let doc = doc(
            r#"{"services":{"svc":{"image":"app","hostname":"pinned","network_mode":"host"}}}"#,
        );
        let records = translate_project(&doc, "p", &config(), &DenyAll)
            .await
            .unwrap();
        assert_eq!(records[0].network_mode, NetworkMode::Host);
        assert!(records[0].hostname.is_none());
    }

    #[tokio::test]
    async fn hostname_prefers_explicit_then_container_name_then_uuid() {
        let explicit = doc(
            r#"{"services":{"svc":{"image":"app","hostname":"h1","container_name":"c1"}}}"#,
        );
        let records = translate_project(&explicit, "p", &config(), &DenyAll)
            .await
            .unwrap();
        assert_eq!(records[0].hostname.as_deref(), Some("h1"));

        let container = doc(r#"{"services":{"svc":{"image":"app","container_name":"c1"}}}"#);
        let records = translate_project(&container, "p", &config(), &DenyAll)
            .await
            .unwrap();
        assert_eq!(records[0].hostname.as_deref(), Some("c1"));

        let generated = doc(r#"{"services":{"svc":{"image":"app"}}}"#);
        let records = translate_project(&generated, "p", &config(), &DenyAll)
            .await
            .unwrap();
        assert!(records[0].hostname.as_deref().is_some_and(|h| !h.is_empty()));
    }

    #[tokio::test]
    async fn attached_network_implies_user_mode_and_net_alias() {
        let doc = doc(
            r#"{"services":{"svc":{"image":"app","hostname":"svc1","networks":{"backend":{"aliases":["svc.internal"]}}}},"networks":{"backend":{"name":"backend-net"}}}"#,
        );
        let records = translate_project(&doc, "p", &config(), &DenyAll)
            .await
            .unwrap();
        let record = &records[0];
        assert_eq!(record.network_mode, NetworkMode::User);
        assert_eq!(record.network_name.as_deref(), Some("backend-net"));
        assert_eq!(
            record.docker_parameters,
            vec![Parameter {
                key: "net-alias".into(),
                value: "svc.internal".into()
            }]
        );
    }

    #[tokio::test]
    async fn network_named_host_implies_host_mode() {
        let doc = doc(
            r#"{"services":{"svc":{"image":"app","networks":{"ext":{}}}},"networks":{"ext":{"name":"host"}}}"#,
        );
        let records = translate_project(&doc, "p", &config(), &DenyAll)
            .await
            .unwrap();
        assert_eq!(records[0].network_mode, NetworkMode::Host);
    }

    #[tokio::test]
    async fn volumes_pick_up_driver_and_mode() {
        let doc = doc(
            r#"{"services":{"svc":{"image":"app","volumes":["data:/var/lib/data","logs:/var/log:ro"]}},"volumes":{"data":{"driver":"rexray"}}}"#,
        );
        let records = translate_project(&doc, "p", &config(), &DenyAll)
            .await
            .unwrap();
        let volumes = &records[0].volumes;
        assert_eq!(volumes.len(), 2);
        assert_eq!(volumes[0].driver, "rexray");
        assert_eq!(volumes[0].mode, VolumeMode::Rw);
        assert_eq!(volumes[1].driver, "local");
        assert_eq!(volumes[1].mode, VolumeMode::Ro);
        assert_eq!(volumes[1].container_path, "/var/log");
    }

    #[tokio::test]
    async fn secret_references_resolve_before_persisting() {
        let doc = doc(
            r#"{"services":{"svc":{"image":"app","environment":["PLAIN=1","TOKEN=vault://secret/app/token"]}}}"#,
        );
        let secrets = StaticSecrets(HashMap::from([(
            "vault://secret/app/token".to_string(),
            "s3cr3t".to_string(),
        )]));
        let records = translate_project(&doc, "p", &config(), &secrets)
            .await
            .unwrap();
        let env = &records[0].environment;
        assert_eq!(env.len(), 2);
        assert_eq!(env[0].name, "PLAIN");
        assert_eq!(env[1].value, "s3cr3t");
    }

    #[tokio::test]
    async fn unresolved_secret_rejects_the_service() {
        let doc = doc(
            r#"{"services":{"svc":{"image":"app","environment":["TOKEN=vault://secret/missing"]}}}"#,
        );
        let secrets = StaticSecrets(HashMap::new());
        let err = translate_project(&doc, "p", &config(), &secrets)
            .await
            .unwrap_err();
        assert!(matches!(err, TranslateError::Secret { .. }));
    }

    #[tokio::test]
    async fn placement_constraint_lowers_to_hostname_label() {
        let doc = doc(
            r#"{"services":{"svc":{"image":"app","deploy":{"placement":{"constraints":["node.hostname == worker-3"]}}}}}"#,
        );
        let records = translate_project(&doc, "p", &config(), &DenyAll)
            .await
            .unwrap();
        assert_eq!(records[0].pinned_hostname(), Some("worker-3"));
    }

    #[tokio::test]
    async fn executor_labels_synthesize_a_custom_executor() {
        let doc = doc(
            r#"{"services":{"svc":{"image":"app","command":"run --fast","labels":{"io.stevedore.executor":"/opt/exec","io.stevedore.executor_uri":"[{\"value\":\"http://repo/exec\",\"output_file\":\"exec\"}]"}}}}"#,
        );
        let records = translate_project(&doc, "p", &config(), &DenyAll)
            .await
            .unwrap();
        let record = &records[0];
        assert_eq!(record.container_kind, ContainerKind::Custom);
        let executor = record.executor.as_ref().unwrap();
        assert_eq!(executor.command, "exec '/opt/exec' run --fast");
        assert_eq!(executor.uris.len(), 1);
        assert_eq!(executor.uris[0].value, "http://repo/exec");
        assert!(!executor.executor_id.is_empty());
    }

    #[tokio::test]
    async fn cap_add_and_cap_drop_are_both_kept() {
        let doc = doc(
            r#"{"services":{"svc":{"image":"app","cap_add":["NET_ADMIN"],"cap_drop":["MKNOD"]}}}"#,
        );
        let records = translate_project(&doc, "p", &config(), &DenyAll)
            .await
            .unwrap();
        assert_eq!(records[0].cap_add, vec!["NET_ADMIN"]);
        assert_eq!(records[0].cap_drop, vec!["MKNOD"]);
    }

    #[test]
    fn port_spec_grammar() {
        assert_eq!(parse_port_spec("80"), Some((80, PortProtocol::Tcp)));
        assert_eq!(parse_port_spec("8080:80"), Some((80, PortProtocol::Tcp)));
        assert_eq!(
            parse_port_spec("127.0.0.1:8080:80"),
            Some((80, PortProtocol::Tcp))
        );
        assert_eq!(parse_port_spec("53/udp"), Some((53, PortProtocol::Udp)));
        assert_eq!(
            parse_port_spec("8053:53/udp"),
            Some((53, PortProtocol::Udp))
        );
        assert_eq!(parse_port_spec("80/sctp"), None);
        assert_eq!(parse_port_spec("a:b:c:80"), None);
        assert_eq!(parse_port_spec("http"), None);
    }

    #[test]
    fn apply_plan_carries_identity_and_kills_surplus() {
        let old = TaskRecord {
            task_id: "p_svc.1".into(),
            task_name: "stevedore:p:svc".into(),
            project: "p".into(),
            service: "svc".into(),
            state: TaskState::Running,
            agent_id: Some("agent-1".into()),
            restarts: 3,
            ..Default::default()
        };
        let surplus = TaskRecord {
            task_id: "p_svc.2".into(),
            task_name: "stevedore:p:svc".into(),
            state: TaskState::Running,
            ..old.clone()
        };
        let fresh = TaskRecord {
            task_id: "p_svc.9".into(),
            task_name: "stevedore:p:svc".into(),
            project: "p".into(),
            service: "svc".into(),
            cpu: 2.0,
            state: TaskState::New,
            ..Default::default()
        };
        let plan = reconcile_replicas(vec![old, surplus], vec![fresh]);
        assert_eq!(plan.put.len(), 1);
        assert_eq!(plan.put[0].task_id, "p_svc.1");
        assert_eq!(plan.put[0].state, TaskState::Running);
        assert_eq!(plan.put[0].cpu, 2.0);
        assert_eq!(plan.put[0].restarts, 3);
        assert_eq!(plan.kill.len(), 1);
        assert_eq!(plan.kill[0].task_id, "p_svc.2");
    }

    proptest! {
        #[test]
        fn drawn_ports_stay_in_range_and_never_collide(
            count in 0usize..8,
            from in 30000u32..31000,
            width in 8u32..2000,
            seed in any::<u64>(),
        ) {
            let to = from + width;
            let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
            let ports = draw_host_ports(count, from, to, &mut rng).unwrap();
            prop_assert_eq!(ports.len(), count);
            for &port in &ports {
                prop_assert!((from..=to).contains(&port));
            }
            let mut unique = ports.clone();
            unique.sort_unstable();
            unique.dedup();
            prop_assert_eq!(unique.len(), count);
        }

        #[test]
        fn impossible_port_runs_are_refused(seed in any::<u64>()) {
            let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
            prop_assert!(draw_host_ports(11, 100, 109, &mut rng).is_none());
            prop_assert!(draw_host_ports(1, 110, 109, &mut rng).is_none());
        }
    }
}
