use std::sync::OnceLock;

use axum::Router;
use http::StatusCode;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use owo_colors::OwoColorize;
use tokio::net::TcpListener;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static SERVER_STARTED: OnceLock<()> = OnceLock::new();

fn install_recorder_once() -> &'static PrometheusHandle {
    PROM_HANDLE.get_or_init(|| {
        PrometheusBuilder::new()
            .install_recorder()
            .expect("install global metrics recorder")
    })
}

/// Start the Prometheus scrape endpoint when `METRICS_PORT` is set. Safe to
/// call more than once; only the first call spawns the server.
pub fn maybe_spawn_metrics_server() {
    let Some(port) = metric_port_env() else {
        return;
    };
    // Exit the whole process when any thread panics. The scheduler runs in a
    // container and a restart is always preferable to a half-alive process.
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_panic(info);
        std::process::exit(1);
    }));

    if SERVER_STARTED.set(()).is_ok() {
        let _ = install_recorder_once();
        tokio::spawn(run_metrics_server(port));
    }
}

pub async fn run_metrics_server(port: u16) {
    let handle = install_recorder_once().clone();
    let app = Router::new()
        .route(
            "/metrics",
            axum::routing::get(move || async move { handle.render() }),
        )
        .route(
            "/healthz",
            axum::routing::get(|| async { (StatusCode::OK, "ok") }),
        );
    let addr = format!("0.0.0.0:{}", port);
    println!(
        "{}{}",
        "📈 Serving metrics • addr=".green(),
        addr.green().dimmed()
    );
    let listener = TcpListener::bind(&addr)
        .await
        .expect("bind metrics listener");
    axum::serve(listener, app).await.expect("serve metrics");
}

fn metric_port_env() -> Option<u16> {
    std::env::var("METRICS_PORT").ok()?.parse().ok()
}
