use std::net::SocketAddr;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chatwall::{config, middleware::MiddlewareChain, routes, state::AppState, sweeper};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logging (stdout + daily file rotation under ./logs)
    std::fs::create_dir_all("logs").ok();
    let (stdout_nb, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    let file_appender = tracing_appender::rolling::daily("logs", "chatwall.log");
    let (file_nb, file_guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=info".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(stdout_nb))
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(file_nb))
        .init();
    // Keep the guards alive so the non-blocking writers flush on exit
    let _log_guards = (stdout_guard, file_guard);

    // Load configuration (embedded defaults -> chatwall.toml -> env/.env)
    let app_cfg = config::load()?;
    if app_cfg.security.csrf_secret.is_none() {
        info!("No security.csrf_secret configured; CSRF tokens will not survive a restart");
    }

    let state = AppState::new(app_cfg.clone());

    let cancel = CancellationToken::new();
    let sweeper = sweeper::spawn(
        state.clone(),
        Duration::from_secs(app_cfg.security.sweep_interval_secs),
        cancel.clone(),
    );

    let chain = MiddlewareChain::standard();
    let app = routes::build_router(state, &chain).layer(TraceLayer::new_for_http());

    let port: u16 = app_cfg.server.port;
    let host: String = app_cfg.server.host.clone();
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid listen addr {}:{} - {}", host, port, e))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!(
        env = %app_cfg.app_env,
        rps = app_cfg.security.rate_limit_rps,
        session_ttl = app_cfg.security.session_ttl,
        freshness_window = app_cfg.security.freshness_window,
        "Chatwall listening on http://{}",
        listener.local_addr()?
    );
    info!("State is per-process; run a single worker or externalise it before scaling out");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cancel.cancel();
    sweeper.await.ok();
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("Shutdown signal received. Stopping server...");
}
