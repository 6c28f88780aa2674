use anyhow::Result;
use kernelmon::*;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

use host_info::HostInfoSource;
use state_store::{SHOW_CPU_KEY, SHOW_MEMORY_KEY, WorkspaceState};

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    let app_config = config::AppConfig::load()?;

    let state = Arc::new(
        WorkspaceState::connect(&app_config.state.path, &app_config.state.workspace).await?,
    );
    state.init().await?;
    let show_cpu = state.get_bool(SHOW_CPU_KEY, true).await?;
    let show_memory = state.get_bool(SHOW_MEMORY_KEY, true).await?;

    let host: Arc<dyn HostInfoSource> = host_info::acquire(Duration::from_millis(
        app_config.monitoring.host_cpu_refresh_ms,
    ));
    let (samples_tx, samples_rx) = mpsc::unbounded_channel();
    let launcher = Arc::new(sampler::ProcessSamplerLauncher::new(
        &app_config.sampler.script,
        host.clone(),
        samples_tx,
    ));
    let bridge = kernel::bridge::HostBridge::new();
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

    let (supervisor, supervisor_handle) = supervisor::spawn(
        supervisor::SupervisorDeps {
            runtime: bridge.clone(),
            launcher,
            host,
            samples_rx,
            state: Some(state),
            shutdown_rx,
        },
        supervisor::SupervisorConfig {
            initial_settings: app_config.initial_settings(show_cpu, show_memory),
            retry_delays: app_config.retry_delays(),
            introspection_timeout: Duration::from_millis(
                app_config.monitoring.introspection_timeout_ms,
            ),
            stats_log_interval: Duration::from_secs(app_config.monitoring.stats_log_interval_secs),
            client_queue_capacity: app_config.publishing.client_queue_capacity,
        },
    );

    let preview = if app_config.preview.enabled {
        let (preview, _) = client::preview::spawn(
            supervisor.clone(),
            client::PreviewConfig {
                width: f64::from(app_config.preview.width),
                height: f64::from(app_config.preview.height),
            },
        );
        Some(preview)
    } else {
        None
    };

    let ws_realtime_connections = Arc::new(AtomicUsize::new(0));
    let app = routes::app(
        supervisor,
        bridge,
        preview,
        ws_realtime_connections,
        app_config.clone(),
    );
    let addr = format!("{}:{}", app_config.server.host, app_config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", addr);

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = async {
            #[cfg(unix)]
            {
                let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(s) => s,
                    Err(_) => {
                        let _ = tokio::signal::ctrl_c().await;
                        return;
                    }
                };
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            #[cfg(not(unix))]
            {
                let _ = tokio::signal::ctrl_c().await;
            }
        } => {
            tracing::info!("Received shutdown signal");
            let _ = shutdown_tx.send(());
            let _ = supervisor_handle.await;
        }
    }

    Ok(())
}
