//! # Live Call Bridge - Main Application Entry Point
//!
//! Starts the admin HTTP server and, when a remote RTP address is configured,
//! a call bridging that RTP stream to a Gemini Live session.
//!
//! ## Startup:
//! 1. Load `.env`, configuration and logging
//! 2. Start the static call (if `media.remote_rtp_addr` is set)
//! 3. Serve the health and call endpoints
//!
//! ## Shutdown:
//! On SIGINT/SIGTERM every registered call is hung up and the server stops.

use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Result;
use live_call_bridge::call::Call;
use live_call_bridge::config::{AppConfig, LoggingConfig};
use live_call_bridge::session::GeminiLiveConnector;
use live_call_bridge::state::AppState;
use live_call_bridge::telephony::RtpEndpoint;
use live_call_bridge::{handlers, health};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Set by the signal handler task once SIGINT or SIGTERM arrives.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let config = AppConfig::load()?;
    init_tracing(&config.logging)?;
    config.validate()?;

    info!("Starting live-call-bridge v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);

    let app_state = AppState::new(config.clone());
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    if let Some(remote) = config.media.remote_addr()? {
        start_static_call(&app_state, remote).await?;
    } else {
        info!("No remote RTP address configured, serving admin API only");
    }

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server_state = app_state.clone();
    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(server_state.clone()))
            .wrap(Logger::default())
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/calls", web::get().to(handlers::list_calls))
                    .route("/calls/{id}", web::get().to(handlers::get_call))
                    .route("/calls/{id}", web::delete().to(handlers::hangup_call)),
            )
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    for call in app_state.all_calls() {
        call.hangup().await;
        app_state.remove_call(call.id());
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Bind the local RTP socket and bridge it to a new AI session.
async fn start_static_call(state: &AppState, remote: SocketAddr) -> Result<()> {
    let config = state.get_config();
    let connector = GeminiLiveConnector::from_config(&config.gemini)?;

    let socket = UdpSocket::bind(&config.media.local_rtp_addr).await?;
    info!("RTP socket bound on {}", socket.local_addr()?);

    let endpoint = RtpEndpoint {
        socket: Arc::new(socket),
        remote,
        codec: config.media.codec()?,
    };

    let call = Call::start(
        uuid::Uuid::new_v4().to_string(),
        endpoint,
        Some(config.session.clone()),
        Arc::new(connector),
        &config.gemini.model,
        config.media.max_outbound_frames,
    )
    .await?;

    info!("Static call {} bridging {}", call.id(), remote);
    state.register_call(Arc::new(call));
    Ok(())
}

/// Install the global tracing subscriber.
///
/// ## What this does:
/// 1. Build the filter from `RUST_LOG`, falling back to `logging.level`
/// 2. Pick the text or JSON formatter from `logging.format`
/// 3. Install it once for the whole process
///
/// ## Rust Concepts:
/// - **Layers**: `registry().with(...)` stacks the filter and formatter
/// - **try_init**: returns an error instead of panicking if a subscriber exists
fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,                           // e.g. RUST_LOG=live_call_bridge=debug
        Err(_) => EnvFilter::try_new(&logging.level)?,  // e.g. "info"
    };

    let registry = tracing_subscriber::registry().with(filter);
    if logging.is_json() {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()?;
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()?;
    }

    Ok(())
}

fn setup_signal_handlers() {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async {
        let (mut sigterm, mut sigint) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            (Err(e), _) | (_, Err(e)) => {
                warn!("Failed to install signal handlers: {}", e);
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Poll the shutdown flag every 100ms.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
