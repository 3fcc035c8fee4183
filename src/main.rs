//! Agent softphone daemon
//!
//! Connects one agent's softphone to FreeSWITCH, keeps the agent's presence
//! in sync with the CRM backend and serves the local control API.

use actix_cors::Cors;
use actix_web::{http::header, middleware, web, App, HttpServer};
use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use agent_softphone::api;
use agent_softphone::backend::{AgentBackend, BackendClient};
use agent_softphone::esl::EslSoftphone;
use agent_softphone::models::AgentStatus;
use agent_softphone::sdk::TelephonySdk;
use agent_softphone::services::{AgentStatusCoordinator, CallStateClient};
use agent_softphone::AppConfig;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level)),
        )
        .json()
        .init();

    info!("🚀 Starting agent softphone v{}", env!("CARGO_PKG_VERSION"));

    let config = match std::env::var("SOFTPHONE_CONFIG") {
        Ok(path) => AppConfig::from_file(&path),
        Err(_) => AppConfig::load(),
    }
    .context("Failed to load configuration")?;
    info!(
        "Agent {} on extension {} via {}:{}",
        config.backend.agent_id,
        config.freeswitch.extension,
        config.freeswitch.host,
        config.freeswitch.port
    );

    // Backend
    let client =
        BackendClient::from_config(&config.backend).context("Failed to create backend client")?;
    info!("✅ Backend client ready: {}", client.base_url());
    let backend: Arc<dyn AgentBackend> = Arc::new(client);

    // Softphone
    let sdk: Arc<dyn TelephonySdk> = Arc::new(EslSoftphone::new(config.freeswitch.clone()));
    let calls = CallStateClient::new(sdk, config.softphone.ended_display());
    let agent = AgentStatusCoordinator::new(
        calls.clone(),
        backend.clone(),
        config.softphone.default_acw_secs,
    );

    if let Err(e) = agent.refresh_settings().await {
        warn!("⚠️  Voice settings unavailable, ACW defaults to {}s: {}", config.softphone.default_acw_secs, e);
    }
    match agent.refresh_status().await {
        Ok(status) => info!("Agent status on server: {}", status),
        Err(e) => warn!("⚠️  Could not read agent status: {}", e),
    }

    if config.softphone.auto_available {
        match agent.handle_status_change(AgentStatus::Available).await {
            Ok(status) => info!("✅ Agent {}", status),
            Err(e) => error!("❌ Could not go available at startup: {}", e),
        }
    }

    let poller = (config.backend.status_poll_secs > 0).then(|| {
        agent.spawn_status_poller(Duration::from_secs(config.backend.status_poll_secs))
    });

    // HTTP Server
    let bind_address = config.server_addr();
    let origins = config.server.allowed_origins();
    info!("🌐 Starting control API on {}", bind_address);

    let server_calls = calls.clone();
    let server_agent = agent.clone();
    let server_backend = backend.clone();

    HttpServer::new(move || {
        let cors = origins
            .iter()
            .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
            .allowed_methods(vec!["GET", "POST", "OPTIONS"])
            .allowed_headers(vec![header::ACCEPT, header::CONTENT_TYPE])
            .max_age(3600);

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .wrap(tracing_actix_web::TracingLogger::default())
            .app_data(web::Data::new(server_calls.clone()))
            .app_data(web::Data::new(server_agent.clone()))
            .app_data(web::Data::new(server_backend.clone()))
            .configure(api::configure)
    })
    .workers(config.server.workers)
    .bind(&bind_address)
    .with_context(|| format!("Failed to bind {}", bind_address))?
    .run()
    .await
    .context("HTTP server error")?;

    info!("🛑 Shutting down");
    if let Some(poller) = poller {
        poller.abort();
    }

    match agent.handle_status_change(AgentStatus::Offline).await {
        Ok(_) => info!("Agent set offline"),
        Err(e) => warn!("Could not set agent offline: {}", e),
    }
    if calls.is_ready() {
        if let Err(e) = calls.shutdown().await {
            warn!("Softphone disconnect failed: {}", e);
        }
    }

    Ok(())
}
