use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use anyhow::{Context as _, Result};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use stevedore_types::{Call, FrameworkRecord, Update};

use crate::args::ServerArgs;
use crate::client::MasterClient;
use crate::demand::DemandController;
use crate::heartbeat::Watchdog;
use crate::observer::EventObserver;
use crate::registry::TaskRegistry;
use crate::secrets::SecretStore;

/// Updates held back while the registry is unavailable. Anything beyond
/// this is dropped and left to reconciliation.
pub const DEGRADED_BUFFER_CAP: usize = 1024;

/// Immutable per-process settings, snapshotted to the registry on every
/// SUBSCRIBED event.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SchedulerConfig {
    pub framework_name: String,
    pub master_url: String,
    pub default_cpu: f64,
    pub default_memory: f64,
    pub default_disk: f64,
    pub port_range_from: u32,
    pub port_range_to: u32,
    pub refuse_seconds: f64,
    pub reconcile_interval_seconds: u64,
    pub demand_tick_seconds: u64,
    pub parallel_handlers: bool,
    pub state_file: String,
}

impl SchedulerConfig {
    pub fn from_args(args: &ServerArgs) -> Self {
        Self {
            framework_name: args.framework.framework_name.clone(),
            master_url: args.master.base_url(),
            default_cpu: args.defaults.default_cpu,
            default_memory: args.defaults.default_memory,
            default_disk: args.defaults.default_disk,
            port_range_from: args.framework.port_range_from,
            port_range_to: args.framework.port_range_to,
            refuse_seconds: args.refuse_seconds,
            reconcile_interval_seconds: args.reconcile_interval_seconds,
            demand_tick_seconds: args.demand_tick_seconds,
            parallel_handlers: args.parallel_handlers,
            state_file: args.framework.state_file.clone(),
        }
    }
}

/// Everything the event handlers share. Threaded through as an `Arc` so
/// tests can build a fresh one per case.
pub struct SchedulerContext {
    pub config: SchedulerConfig,
    pub framework: RwLock<FrameworkRecord>,
    pub registry: TaskRegistry,
    pub master: MasterClient,
    pub secrets: Arc<dyn SecretStore>,
    pub demand: DemandController,
    pub watchdog: Watchdog,
    pub observers: Vec<Arc<dyn EventObserver>>,

    /// Registry unavailable; admin writes are refused and updates buffer.
    pub degraded: AtomicBool,
    pub buffered_updates: Mutex<VecDeque<Update>>,

    /// Offer ids currently being matched; RESCIND voids entries here.
    pub inflight_offers: Mutex<HashSet<String>>,
}

pub type Ctx = Arc<SchedulerContext>;

impl SchedulerContext {
    /// Stamp the persisted framework id and stream id onto a call and send
    /// it to the master.
    pub async fn call_master(&self, call: Call) -> Result<()> {
        let (framework_id, stream_id) = {
            let fw = self.framework.read();
            (fw.info.id.clone(), fw.stream_id.clone().unwrap_or_default())
        };
        metrics::counter!("stevedore_calls_total", "type" => format!("{:?}", call.call_type))
            .increment(1);
        let call = Call {
            framework_id,
            ..call
        };
        self.master.call(&call, &stream_id).await
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Queue an update for replay once the registry is back. Returns false
    /// when the buffer is full and the update was dropped.
    pub fn buffer_update(&self, update: Update) -> bool {
        let mut buffer = self.buffered_updates.lock();
        if buffer.len() >= DEGRADED_BUFFER_CAP {
            return false;
        }
        buffer.push_back(update);
        true
    }
}

/// On-disk snapshot rewritten on every SUBSCRIBED event so a restarted
/// scheduler reattaches under its old framework id instead of registering a
/// new framework.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct StateSnapshot {
    pub framework: FrameworkRecord,
    pub master_url: String,
}

pub async fn write_state_file(path: &str, snapshot: &StateSnapshot) -> Result<()> {
    let contents =
        serde_json::to_string_pretty(snapshot).context("serialize framework state to JSON")?;
    if let Some(parent) = Path::new(path).parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .context("create state file directory")?;
    }
    tokio::fs::write(path, contents)
        .await
        .context("write framework state file")?;
    Ok(())
}

pub async fn read_state_file(path: &str) -> Result<Option<StateSnapshot>> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).context("read framework state file"),
    };
    let snapshot =
        serde_json::from_str(&contents).context("parse framework state file as JSON")?;
    Ok(Some(snapshot))
}

#[cfg(test)]
mod tests {
    use stevedore_types::{FrameworkInfo, Id};

    use super::*;

    #[tokio::test]
    async fn state_file_round_trips_framework_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("framework.json");
        let path = path.to_str().unwrap();

        assert!(read_state_file(path).await.unwrap().is_none());

        let snapshot = StateSnapshot {
            framework: FrameworkRecord {
                info: FrameworkInfo {
                    user: "root".into(),
                    name: "stevedore".into(),
                    id: Some(Id::new("fw-123")),
                    roles: vec!["*".into()],
                    principal: None,
                    checkpoint: true,
                    failover_timeout: 86400.0,
                },
                stream_id: Some("stream-1".into()),
            },
            master_url: "http://master:5050".into(),
        };
        write_state_file(path, &snapshot).await.unwrap();

        let back = read_state_file(path).await.unwrap().unwrap();
        assert_eq!(back.framework.framework_id(), Some("fw-123"));
        assert_eq!(back.framework.stream_id.as_deref(), Some("stream-1"));
    }
}
