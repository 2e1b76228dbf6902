use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use anyhow::Result;
use clap::Parser;
use owo_colors::OwoColorize;
use parking_lot::{Mutex, RwLock};
use stevedore_common::response::print_warning;
use stevedore_types::{FrameworkInfo, FrameworkRecord};
use tokio_util::sync::CancellationToken;

mod args;
mod cli;
mod client;
mod codec;
mod context;
mod demand;
mod events;
mod heartbeat;
mod lifecycle;
mod matcher;
mod observer;
mod reconcile;
mod registry;
mod secrets;
mod server;
mod translate;

use args::{Cli, Commands, ServerArgs};
use client::MasterClient;
use context::{Ctx, SchedulerConfig, SchedulerContext};
use demand::DemandController;
use heartbeat::Watchdog;
use observer::{EventObserver, TraceObserver};
use registry::TaskRegistry;
use secrets::DenyAllSecrets;

#[tokio::main]
async fn main() -> Result<()> {
    stevedore_common::init();

    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Server(args) => run_server(args).await,
        Commands::Kill(args) => cli::run_kill(args).await,
        Commands::Health(args) => cli::run_health(args).await,
    }
}

async fn run_server(args: ServerArgs) -> Result<()> {
    stevedore_common::metrics::maybe_spawn_metrics_server();

    let pool = stevedore_common::redis::init_redis(&args.redis).await;
    let registry = TaskRegistry::new(pool, &args.framework.framework_name);
    let master = MasterClient::new(&args.master)?;
    let config = SchedulerConfig::from_args(&args);

    let mut framework = FrameworkRecord {
        info: FrameworkInfo {
            user: args.framework.framework_user.clone(),
            name: args.framework.framework_name.clone(),
            id: None,
            roles: vec![args.framework.framework_role.clone()],
            principal: args.framework.framework_principal.clone(),
            checkpoint: true,
            failover_timeout: args.framework.framework_failover_timeout,
        },
        stream_id: None,
    };

    // Reattach to a persisted framework id rather than registering anew:
    // the registry singleton wins, the on-disk snapshot is the fallback.
    match registry.load_framework().await {
        Ok(Some(saved)) => {
            if let Some(id) = saved.info.id {
                println!(
                    "{}{}",
                    "🔁 Reattaching to framework • id=".green(),
                    id.value.green().dimmed(),
                );
                framework.info.id = Some(id);
            }
            framework.stream_id = saved.stream_id;
        }
        Ok(None) => match context::read_state_file(&config.state_file).await {
            Ok(Some(snapshot)) => {
                if let Some(id) = snapshot.framework.info.id {
                    println!(
                        "{}{}",
                        "🔁 Reattaching to framework from state file • id=".green(),
                        id.value.green().dimmed(),
                    );
                    framework.info.id = Some(id);
                }
            }
            Ok(None) => {}
            Err(e) => print_warning(e.context("read framework state file")),
        },
        Err(e) => print_warning(e.context("load framework record")),
    }

    let observers: Vec<Arc<dyn EventObserver>> = if args.trace_events {
        vec![Arc::new(TraceObserver)]
    } else {
        Vec::new()
    };

    let ctx: Ctx = Arc::new(SchedulerContext {
        config,
        framework: RwLock::new(framework),
        registry,
        master,
        secrets: Arc::new(DenyAllSecrets),
        demand: DemandController::new(),
        watchdog: Watchdog::new(),
        observers,
        degraded: AtomicBool::new(false),
        buffered_updates: Mutex::new(VecDeque::new()),
        inflight_offers: Mutex::new(HashSet::new()),
    });

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            stevedore_common::shutdown::shutdown_signal().await;
            cancel.cancel();
        }
    });

    let api = tokio::spawn(server::run_server(ctx.clone(), args.api.clone(), cancel.clone()));
    let reconcile_timer = tokio::spawn(reconcile::run_timer(ctx.clone(), cancel.clone()));
    let supervision = tokio::spawn(heartbeat::run_timer(ctx.clone(), cancel.clone()));

    // The event loop runs until shutdown or a fatal subscription error.
    let result = events::run(ctx, cancel.clone()).await;
    cancel.cancel();

    if let Ok(Err(e)) = api.await {
        print_warning(e.context("admin API server"));
    }
    let _ = reconcile_timer.await;
    let _ = supervision.await;

    result
}
