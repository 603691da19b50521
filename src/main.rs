use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use popular_worker::{
    app::{ComponentRegistry, build_router},
    config::Config,
    observability::Telemetry,
    scheduler::daemon::spawn_jst_sync_daemon,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    std::panic::set_hook(Box::new(|panic_info| {
        let thread = std::thread::current();
        let thread_name = thread.name().unwrap_or("unnamed");
        let message = panic_info
            .payload()
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| {
                panic_info
                    .payload()
                    .downcast_ref::<String>()
                    .map(String::as_str)
            })
            .unwrap_or("unknown panic payload");

        if let Some(location) = panic_info.location() {
            error!(
                thread = thread_name,
                file = location.file(),
                line = location.line(),
                column = location.column(),
                message,
                "panic occurred"
            );
        } else {
            error!(
                thread = thread_name,
                message, "panic occurred without location information"
            );
        }
    }));

    let telemetry = Telemetry::new().context("failed to initialize telemetry")?;
    let config = Config::from_env()
        .inspect_err(|error| error!(%error, "invalid configuration"))
        .context("failed to load configuration")?;
    info!(config = ?config, "configuration loaded");
    let bind_addr = config.http_bind();
    let registry =
        ComponentRegistry::build(config, telemetry).context("failed to build component registry")?;
    let config = registry.config();

    if config.sync_schedule_enabled() {
        let _sync_daemon = spawn_jst_sync_daemon(
            registry.sync_job().clone(),
            config.sync_schedule_at(),
            config.popular_default_limit(),
            config.default_date_range(),
        )
        .context("failed to start daily sync daemon")?;
        info!(at = %config.sync_schedule_at().format("%H:%M"), "daily sync daemon enabled (JST)");
    }

    let router = build_router(registry);

    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind listener on {bind_addr}"))?;

    info!(%bind_addr, "listening");

    if let Err(error) = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        warn!(error = %error, "server exited with error");
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(%error, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
