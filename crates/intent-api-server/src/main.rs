use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use intent_api_server::build_router;
use intent_api_server::config::Settings;
use intent_api_server::services::{
    ClassifierService, DispatchConfig, DispatchService, ProcessActionRunner, SessionStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,intent_api_server=debug".to_string()),
        )
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .init();

    info!("Starting intent API server...");

    let settings = Settings::load()?;
    info!(
        "Configuration loaded: {} allowed actions, cache capacity {}",
        settings.actions.allowed.len(),
        settings.sessions.cache_capacity
    );

    let store = Arc::new(
        SessionStore::new(settings.sessions.cache_capacity)
            .with_max_sessions(settings.sessions.max_sessions),
    );

    let dispatch_config = DispatchConfig::from_settings(&settings);
    let classifier = Arc::new(ClassifierService::new(
        &settings.classifier,
        dispatch_config.system_instruction.clone(),
    )?);
    let runner = Arc::new(ProcessActionRunner::new(&settings.actions));
    info!("Actions resolved from {}", settings.actions.directory);

    let dispatch = Arc::new(DispatchService::new(
        store,
        classifier,
        runner,
        dispatch_config,
    ));

    let app = build_router(dispatch);

    let addr = SocketAddr::from((
        settings.server.host.parse::<std::net::IpAddr>()?,
        settings.server.port,
    ));
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
