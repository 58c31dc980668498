use dealergate::{
    cache::create_redis_pool, create_db_pool, create_router, init_tracing,
    permissions::spawn_idle_sweeper, shutdown_telemetry, AppState, Config,
};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_tracing(&config);

    info!(
        service = "dealergate",
        version = env!("CARGO_PKG_VERSION"),
        environment = ?config.server.environment,
        "Starting server"
    );

    let issues = config.validate_for_production();
    for issue in &issues {
        warn!(issue = %issue, "Configuration warning");
    }

    info!(
        database_url = %config.database.url.split('@').next_back().unwrap_or("***"),
        max_connections = config.database.max_connections,
        "Connecting to database"
    );

    let db_pool = create_db_pool(&config).unwrap_or_else(|e| {
        error!(error = %e, "Failed to create database pool");
        std::process::exit(1);
    });

    info!("Database connection pool created");

    let redis_pool = create_redis_pool(&config.redis);

    let state = AppState::new(db_pool, redis_pool, &config).unwrap_or_else(|e| {
        error!(error = %e, "Failed to load JWT signing key");
        std::process::exit(1);
    });

    info!(
        cache_enabled = config.permissions.cache_enabled,
        cache_backend = if state.permissions.cache().redis_pool().is_some() { "redis" } else { "memory" },
        cache_ttl_secs = config.permissions.cache_ttl_secs,
        session_idle_timeout_secs = config.permissions.session_idle_timeout_secs,
        "Permission service ready"
    );

    let sweeper = spawn_idle_sweeper(state.sessions.clone());

    let app = create_router(state, &config);

    let http_addr = config.server_addr();
    let listener = tokio::net::TcpListener::bind(&http_addr)
        .await
        .unwrap_or_else(|e| {
            error!(error = %e, address = %http_addr, "Failed to bind HTTP server");
            std::process::exit(1);
        });

    info!(
        http_address = %http_addr,
        docs_url = %format!("http://{}/swagger-ui", http_addr),
        "HTTP server ready"
    );

    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install CTRL+C signal handler");
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
    };

    if let Err(e) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal)
    .await
    {
        error!(error = %e, "HTTP server error");
    }

    sweeper.abort();
    shutdown_telemetry();

    info!("Server shutdown complete");
}
