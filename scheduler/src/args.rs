use clap::{Parser, Subcommand};
use stevedore_common::args::{ApiArgs, MasterArgs, RedisArgs};

#[derive(Parser, Debug)]
#[command(name = "stevedore")]
#[command(about = "Compose-driven scheduler for Mesos-family cluster masters")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the scheduler
    Server(ServerArgs),

    /// Kill a task through a running scheduler's admin API
    Kill(KillArgs),

    /// Check a running scheduler's health
    Health(HealthArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct ServerArgs {
    #[clap(flatten)]
    pub master: MasterArgs,

    #[clap(flatten)]
    pub redis: RedisArgs,

    #[clap(flatten)]
    pub api: ApiArgs,

    #[clap(flatten)]
    pub framework: FrameworkArgs,

    #[clap(flatten)]
    pub defaults: DefaultResourceArgs,

    /// Handle OFFERS and UPDATE events on spawned workers instead of inline
    /// on the event loop
    #[arg(long, env = "PARALLEL_HANDLERS", default_value_t = false)]
    pub parallel_handlers: bool,

    /// Log every decoded master event
    #[arg(long, env = "TRACE_EVENTS", default_value_t = false)]
    pub trace_events: bool,

    /// Interval between implicit reconciliations, in seconds
    #[arg(long, env = "RECONCILE_INTERVAL_SECONDS", default_value_t = 15)]
    pub reconcile_interval_seconds: u64,

    /// Interval between registry health / revive-suppress ticks, in seconds
    #[arg(long, env = "DEMAND_TICK_SECONDS", default_value_t = 10)]
    pub demand_tick_seconds: u64,

    /// Refuse-seconds filter attached to offer declines
    #[arg(long, env = "REFUSE_SECONDS", default_value_t = 120.0)]
    pub refuse_seconds: f64,
}

#[derive(Parser, Debug, Clone)]
pub struct FrameworkArgs {
    /// Framework name; also the registry key prefix
    #[arg(long, env = "FRAMEWORK_NAME", default_value = "stevedore")]
    pub framework_name: String,

    #[arg(long, env = "FRAMEWORK_USER", default_value = "root")]
    pub framework_user: String,

    #[arg(long, env = "FRAMEWORK_ROLE", default_value = "*")]
    pub framework_role: String,

    #[arg(long, env = "FRAMEWORK_PRINCIPAL")]
    pub framework_principal: Option<String>,

    /// How long the master keeps tasks alive waiting for this framework to
    /// failover back, in seconds
    #[arg(long, env = "FRAMEWORK_FAILOVER_TIMEOUT", default_value_t = 86400.0)]
    pub framework_failover_timeout: f64,

    /// Path of the on-disk framework state snapshot
    #[arg(long, env = "FRAMEWORK_STATE_FILE", default_value = "framework.json")]
    pub state_file: String,

    #[arg(long, env = "PORT_RANGE_FROM", default_value_t = 31000)]
    pub port_range_from: u32,

    #[arg(long, env = "PORT_RANGE_TO", default_value_t = 32000)]
    pub port_range_to: u32,
}

#[derive(Parser, Debug, Clone)]
pub struct DefaultResourceArgs {
    /// CPU share given to services that do not declare a limit
    #[arg(long, env = "DEFAULT_CPU", default_value_t = 0.1)]
    pub default_cpu: f64,

    /// Memory (MiB) given to services that do not declare a limit
    #[arg(long, env = "DEFAULT_MEMORY", default_value_t = 128.0)]
    pub default_memory: f64,

    /// Disk (MiB); compose documents do not carry a disk limit
    #[arg(long, env = "DEFAULT_DISK", default_value_t = 1000.0)]
    pub default_disk: f64,
}

#[derive(Parser, Debug, Clone)]
pub struct KillArgs {
    /// Admin API endpoint of the running scheduler
    #[arg(long, env = "STEVEDORE_ENDPOINT", default_value = "http://127.0.0.1:10000")]
    pub endpoint: String,

    #[arg(long, env = "API_USERNAME", default_value = "user")]
    pub username: String,

    #[arg(long, env = "API_PASSWORD", default_value = "password")]
    pub password: String,

    /// Task id to kill
    pub task_id: String,
}

#[derive(Parser, Debug, Clone)]
pub struct HealthArgs {
    /// Admin API endpoint of the running scheduler
    #[arg(long, env = "STEVEDORE_ENDPOINT", default_value = "http://127.0.0.1:10000")]
    pub endpoint: String,

    #[arg(long, env = "API_USERNAME", default_value = "user")]
    pub username: String,

    #[arg(long, env = "API_PASSWORD", default_value = "password")]
    pub password: String,
}
