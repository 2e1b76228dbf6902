//! First-fit matching of pending tasks onto offer batches, and assembly of
//! the launch payload for a matched pair.
//!
//! Every offer in a batch ends up in exactly one ACCEPT or in the single
//! trailing DECLINE; nothing is silently dropped. No bin-packing, no
//! preemption: offers are walked in the order the master delivered them.

use std::collections::HashSet;

use stevedore_types::{
    CapabilityInfo, CommandInfo, CommandUri, ContainerInfo, ContainerKind, DiscoveryInfo,
    DockerInfo, DockerPortMapping, Environment, EnvironmentVariable, ExecutorInfo, Id, LinuxInfo,
    NetworkInfo, NetworkMode, Offer, Port, Ports, Resource, TaskInfo, TaskRecord, ValueRange,
    Volume, VolumeSource, Labels,
};

#[derive(Debug, Default)]
pub struct MatchPlan {
    pub assignments: Vec<Assignment>,
    /// Offer ids of the batch that no task consumed.
    pub declined: Vec<Id>,
}

#[derive(Debug)]
pub struct Assignment {
    pub record: TaskRecord,
    pub offer: Offer,
}

/// Walk the batch once per pending task, first fit wins. Tasks that match
/// nothing stay pending and the caller raises demand again.
pub fn match_offers(pending: Vec<TaskRecord>, offers: &[Offer]) -> MatchPlan {
    let mut consumed: HashSet<String> = HashSet::new();
    let mut assignments = Vec::new();
    for record in pending {
        let chosen = offers
            .iter()
            .find(|offer| !consumed.contains(&offer.id.value) && offer_matches(offer, &record));
        if let Some(offer) = chosen {
            consumed.insert(offer.id.value.clone());
            assignments.push(Assignment {
                record,
                offer: offer.clone(),
            });
        }
    }
    let declined = offers
        .iter()
        .filter(|offer| !consumed.contains(&offer.id.value))
        .map(|offer| offer.id.clone())
        .collect();
    MatchPlan {
        assignments,
        declined,
    }
}

/// Resource and placement check, AND semantics across all constraints.
pub fn offer_matches(offer: &Offer, record: &TaskRecord) -> bool {
    if let Some(pin) = record.pinned_hostname()
        && offer.hostname != pin
    {
        return false;
    }
    if scalar_resource(offer, "cpus") < record.cpu
        || scalar_resource(offer, "mem") < record.memory
        || scalar_resource(offer, "disk") < record.disk
    {
        return false;
    }
    record
        .host_ports()
        .all(|port| port_covered(offer, u64::from(port)))
}

fn scalar_resource(offer: &Offer, name: &str) -> f64 {
    offer
        .resources
        .iter()
        .filter(|r| r.name == name)
        .filter_map(|r| r.scalar.as_ref())
        .map(|s| s.value)
        .sum()
}

fn port_covered(offer: &Offer, port: u64) -> bool {
    offer
        .resources
        .iter()
        .filter(|r| r.name == "ports")
        .filter_map(|r| r.ranges.as_ref())
        .flat_map(|ranges| ranges.range.iter())
        .any(|range| range.begin <= port && port <= range.end)
}

/// Build the LAUNCH task payload for a matched (task, offer) pair.
pub fn task_info(record: &TaskRecord, offer: &Offer, framework_id: Option<Id>) -> TaskInfo {
    let environment = Environment {
        variables: record
            .environment
            .iter()
            .map(|env| EnvironmentVariable {
                name: env.name.clone(),
                value: env.value.clone(),
            })
            .collect(),
    };

    let mut resources = vec![
        Resource::scalar("cpus", record.cpu),
        Resource::scalar("mem", record.memory),
        Resource::scalar("disk", record.disk),
    ];
    if !record.port_mappings.is_empty() {
        resources.push(Resource::ranges(
            "ports",
            record
                .host_ports()
                .map(|port| ValueRange {
                    begin: u64::from(port),
                    end: u64::from(port),
                })
                .collect(),
        ));
    }

    let docker = (record.container_kind == ContainerKind::Docker).then(|| DockerInfo {
        image: record.container_image.clone(),
        network: Some(record.network_mode.docker_network().to_string()),
        port_mappings: (record.network_mode != NetworkMode::Host)
            .then(|| {
                record
                    .port_mappings
                    .iter()
                    .map(|m| DockerPortMapping {
                        host_port: m.host_port,
                        container_port: m.container_port,
                        protocol: Some(m.protocol.as_str().to_string()),
                    })
                    .collect()
            })
            .unwrap_or_default(),
        parameters: record.docker_parameters.clone(),
        privileged: Some(record.privileged),
        force_pull_image: Some(record.pull_policy == "always"),
    });

    let linux_info = (!record.cap_add.is_empty() || !record.cap_drop.is_empty()).then(|| {
        LinuxInfo {
            effective_capabilities: (!record.cap_add.is_empty()).then(|| CapabilityInfo {
                capabilities: record.cap_add.clone(),
            }),
            bounding_capabilities: (!record.cap_drop.is_empty()).then(|| CapabilityInfo {
                capabilities: record.cap_drop.clone(),
            }),
        }
    });

    let container = ContainerInfo {
        container_type: match record.container_kind {
            ContainerKind::Docker => "DOCKER".to_string(),
            ContainerKind::Mesos | ContainerKind::Custom => "MESOS".to_string(),
        },
        docker,
        linux_info,
        volumes: record
            .volumes
            .iter()
            .map(|v| Volume {
                container_path: v.container_path.clone(),
                mode: v.mode.as_wire().to_string(),
                source: Some(VolumeSource {
                    source_type: "DOCKER_VOLUME".to_string(),
                    docker_volume: Some(stevedore_types::DockerVolume {
                        name: v.source.clone(),
                        driver: Some(v.driver.clone()),
                    }),
                }),
            })
            .collect(),
        network_infos: record
            .network_name
            .iter()
            .map(|name| NetworkInfo {
                name: Some(name.clone()),
                ip_addresses: Vec::new(),
            })
            .collect(),
        hostname: record.hostname.clone(),
    };

    // With a custom executor the command moves into the executor; the task
    // itself carries no command of its own.
    let executor = record.executor.as_ref().map(|spec| ExecutorInfo {
        executor_type: "CUSTOM".to_string(),
        executor_id: Id::new(spec.executor_id.clone()),
        framework_id: framework_id.clone(),
        name: Some(spec.name.clone()),
        command: Some(CommandInfo {
            value: Some(spec.command.clone()),
            shell: Some(true),
            environment: Some(environment.clone()),
            uris: spec
                .uris
                .iter()
                .map(|uri| CommandUri {
                    value: uri.value.clone(),
                    extract: Some(false),
                    executable: Some(true),
                    cache: Some(false),
                    output_file: uri.output_file.clone(),
                })
                .collect(),
        }),
    });
    let command = executor.is_none().then(|| CommandInfo {
        value: record.command.clone(),
        shell: Some(record.shell),
        environment: Some(environment),
        uris: Vec::new(),
    });

    let discovery = DiscoveryInfo {
        visibility: "EXTERNAL".to_string(),
        name: Some(record.discovery.name.clone()),
        ports: Some(Ports {
            ports: record
                .discovery
                .ports
                .iter()
                .map(|p| Port {
                    number: p.number,
                    name: Some(p.name.clone()),
                    protocol: Some(p.protocol.as_str().to_string()),
                })
                .collect(),
        }),
    };

    TaskInfo {
        name: record.task_name.clone(),
        task_id: Id::new(record.task_id.clone()),
        agent_id: offer.agent_id.clone(),
        resources,
        command,
        container: Some(container),
        executor,
        discovery: Some(discovery),
        labels: (!record.labels.is_empty()).then(|| Labels {
            labels: record.labels.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use stevedore_types::{Attribute, PortMapping, PortProtocol, TaskState, Text};

    use super::*;

    fn offer(id: &str, hostname: &str, cpus: f64, mem: f64, ports: Option<(u64, u64)>) -> Offer {
        let mut resources = vec![
            Resource::scalar("cpus", cpus),
            Resource::scalar("mem", mem),
            Resource::scalar("disk", 10_000.0),
        ];
        if let Some((begin, end)) = ports {
            resources.push(Resource::ranges("ports", vec![ValueRange { begin, end }]));
        }
        Offer {
            id: Id::new(id),
            agent_id: Id::new(format!("agent-{id}")),
            hostname: hostname.to_string(),
            attributes: vec![Attribute {
                name: "rack".into(),
                text: Some(Text {
                    value: "r1".into(),
                }),
            }],
            resources,
        }
    }

    fn task(cpu: f64, memory: f64, host_port: Option<u32>) -> TaskRecord {
        TaskRecord {
            task_id: "demo_web.1".into(),
            task_name: "stevedore:demo:web".into(),
            project: "demo".into(),
            service: "web".into(),
            cpu,
            memory,
            disk: 1000.0,
            instances: 1,
            container_image: "nginx".into(),
            state: TaskState::New,
            port_mappings: host_port
                .map(|port| {
                    vec![PortMapping {
                        container_port: 80,
                        host_port: port,
                        protocol: PortProtocol::Tcp,
                    }]
                })
                .unwrap_or_default(),
            ..Default::default()
        }
    }

    #[test]
    fn sufficient_offer_is_accepted() {
        let offers = vec![offer("o1", "h1", 4.0, 8192.0, Some((31000, 32000)))];
        let plan = match_offers(vec![task(1.0, 512.0, Some(31000))], &offers);
        assert_eq!(plan.assignments.len(), 1);
        assert_eq!(plan.assignments[0].offer.id.value, "o1");
        assert!(plan.declined.is_empty());
    }

    #[test]
    fn starved_offer_is_declined() {
        let offers = vec![offer("o1", "h1", 0.5, 8192.0, Some((31000, 32000)))];
        let plan = match_offers(vec![task(1.0, 512.0, Some(31000))], &offers);
        assert!(plan.assignments.is_empty());
        assert_eq!(plan.declined, vec![Id::new("o1")]);
    }

    #[test]
    fn port_outside_every_range_fails_the_match() {
        let offers = vec![offer("o1", "h1", 4.0, 8192.0, Some((31000, 31500)))];
        let plan = match_offers(vec![task(1.0, 512.0, Some(31900))], &offers);
        assert!(plan.assignments.is_empty());
        assert_eq!(plan.declined.len(), 1);
    }

    #[test]
    fn hostname_pin_restricts_placement() {
        let mut pinned = task(0.1, 64.0, None);
        pinned
            .labels
            .push(stevedore_types::Label::new("__mc_placement_node_hostname", "h2"));
        let offers = vec![
            offer("o1", "h1", 4.0, 8192.0, None),
            offer("o2", "h2", 4.0, 8192.0, None),
        ];
        let plan = match_offers(vec![pinned], &offers);
        assert_eq!(plan.assignments.len(), 1);
        assert_eq!(plan.assignments[0].offer.id.value, "o2");
        assert_eq!(plan.declined, vec![Id::new("o1")]);
    }

    #[test]
    fn first_fit_takes_offers_in_delivery_order() {
        let offers = vec![
            offer("o1", "h1", 4.0, 8192.0, Some((31000, 32000))),
            offer("o2", "h2", 4.0, 8192.0, Some((31000, 32000))),
        ];
        let plan = match_offers(
            vec![task(1.0, 512.0, Some(31000)), task(1.0, 512.0, Some(31001))],
            &offers,
        );
        assert_eq!(plan.assignments.len(), 2);
        assert_eq!(plan.assignments[0].offer.id.value, "o1");
        assert_eq!(plan.assignments[1].offer.id.value, "o2");
        assert!(plan.declined.is_empty());
    }

    #[test]
    fn launch_payload_references_the_offer_agent() {
        let record = task(1.0, 512.0, Some(31000));
        let offer = offer("o1", "h1", 4.0, 8192.0, Some((31000, 32000)));
        let info = task_info(&record, &offer, Some(Id::new("fw-1")));
        assert_eq!(info.agent_id, offer.agent_id);
        assert_eq!(info.task_id.value, record.task_id);
        let docker = info.container.as_ref().unwrap().docker.as_ref().unwrap();
        assert_eq!(docker.image, "nginx");
        assert_eq!(docker.port_mappings.len(), 1);
        assert!(info.command.as_ref().unwrap().shell == Some(false));
        let ports: Vec<_> = info
            .resources
            .iter()
            .filter(|r| r.name == "ports")
            .collect();
        assert_eq!(ports.len(), 1);
    }

    #[test]
    fn capabilities_keep_adds_and_drops_apart() {
        let mut record = task(1.0, 512.0, None);
        record.cap_add = vec!["NET_ADMIN".into()];
        record.cap_drop = vec!["MKNOD".into()];
        let offer = offer("o1", "h1", 4.0, 8192.0, None);
        let info = task_info(&record, &offer, None);
        let linux = info
            .container
            .as_ref()
            .unwrap()
            .linux_info
            .as_ref()
            .unwrap();
        assert_eq!(
            linux.effective_capabilities.as_ref().unwrap().capabilities,
            vec!["NET_ADMIN"]
        );
        assert_eq!(
            linux.bounding_capabilities.as_ref().unwrap().capabilities,
            vec!["MKNOD"]
        );
    }

    proptest! {
        #[test]
        fn every_offer_is_either_accepted_or_declined(
            offer_count in 0usize..6,
            task_count in 0usize..6,
            cpu in 0.1f64..4.0,
            mem in 16.0f64..2048.0,
            seed in any::<u64>(),
        ) {
            let offers: Vec<Offer> = (0..offer_count)
                .map(|i| {
                    // Vary resources deterministically off the seed.
                    let wiggle = ((seed >> (i % 16)) & 0xff) as f64;
                    offer(
                        &format!("o{i}"),
                        &format!("h{i}"),
                        cpu * wiggle / 128.0,
                        mem * wiggle / 128.0,
                        Some((31000, 32000)),
                    )
                })
                .collect();
            let tasks: Vec<TaskRecord> = (0..task_count)
                .map(|i| {
                    let mut t = task(cpu, mem, Some(31000 + i as u32));
                    t.task_id = format!("demo_web.{i}");
                    t
                })
                .collect();

            let plan = match_offers(tasks, &offers);

            let accepted: Vec<String> = plan
                .assignments
                .iter()
                .map(|a| a.offer.id.value.clone())
                .collect();
            let declined: Vec<String> =
                plan.declined.iter().map(|id| id.value.clone()).collect();

            // Disjoint, and together they cover the whole batch.
            prop_assert_eq!(accepted.len() + declined.len(), offer_count);
            for id in &accepted {
                prop_assert!(!declined.contains(id));
            }
            let mut all: Vec<String> = accepted.iter().chain(declined.iter()).cloned().collect();
            all.sort();
            all.dedup();
            prop_assert_eq!(all.len(), offer_count);
        }
    }
}
