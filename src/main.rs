use actix_multipart::form::MultipartFormConfig;
use actix_web::{App, HttpServer, web};
use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{Layer, filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod ai;
mod api;
mod cli;
mod config;
mod db;
mod extract;
mod quota;
mod shutdown;

use crate::ai::openai::OpenAiBackend;
use crate::api::analysis::AnalysisService;
use crate::api::analysis::handlers::analysis_config;
use crate::api::health::health_config;
use crate::db::job_repository::PgJobStore;
use crate::db::user_repository::PgUserStore;
use crate::extract::FileExtractor;
use crate::shutdown::ShutdownCoordinator;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let cli = cli::Cli::parse();

    // Load configuration from environment
    let config = config::Config::from_env().expect("Failed to load configuration");

    // Create logs directory if it doesn't exist
    std::fs::create_dir_all(&config.log_dir).expect("Failed to create logs directory");

    // Initialize file-based logging with daily rotation and level separation
    // Log files will be created as: logs/info.2024-12-22.log, logs/error.2024-12-22.log, etc.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());

    // Create daily rotating file appenders for each log level
    let info_file = tracing_appender::rolling::daily(&config.log_dir, "info.log");
    let warn_file = tracing_appender::rolling::daily(&config.log_dir, "warn.log");
    let error_file = tracing_appender::rolling::daily(&config.log_dir, "error.log");
    let debug_file = tracing_appender::rolling::daily(&config.log_dir, "debug.log");

    let info_layer = tracing_subscriber::fmt::layer()
        .with_writer(info_file)
        .with_ansi(false)
        .with_filter(LevelFilter::INFO);

    let warn_layer = tracing_subscriber::fmt::layer()
        .with_writer(warn_file)
        .with_ansi(false)
        .with_filter(LevelFilter::WARN);

    let error_layer = tracing_subscriber::fmt::layer()
        .with_writer(error_file)
        .with_ansi(false)
        .with_filter(LevelFilter::ERROR);

    let debug_layer = tracing_subscriber::fmt::layer()
        .with_writer(debug_file)
        .with_ansi(false)
        .with_filter(LevelFilter::DEBUG);

    // Console layer for terminal output
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_ansi(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(info_layer)
        .with(warn_layer)
        .with(error_layer)
        .with(debug_layer)
        .init();

    // Get database connection pool
    let pool = db::connection::get_connection(&config.database_url, config.max_db_connections)
        .await
        .expect("Failed to connect to database");

    info!("Starting statement-analyzer");
    info!("Configuration loaded successfully:");
    info!("  - Bind address: {}:{}", config.host, config.port);
    info!("  - Max payload size: {} bytes", config.max_payload_size);
    info!("  - Max database connections: {}", config.max_db_connections);
    info!(
        "  - Analysis timeout: {}s",
        config.analysis_timeout.as_secs()
    );
    info!(
        "  - Analysis strategy: {}",
        if config.ai.use_file_upload {
            "raw file upload"
        } else {
            "local text extraction"
        }
    );
    info!("Database connection pool established");

    // Run migrations on startup (auto-migrate when starting server)
    db::migrations::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");

    // Admin subcommands run against the migrated database and exit.
    if cli::run(cli, pool.clone())
        .await
        .expect("admin command failed")
    {
        return Ok(());
    }

    let service = web::Data::new(AnalysisService::new(
        Arc::new(PgUserStore::new(pool.clone())),
        Arc::new(PgJobStore::new(pool.clone())),
        Arc::new(FileExtractor),
        Arc::new(OpenAiBackend::new(config.ai.clone())),
        config.analysis_timeout,
        config.ai.use_file_upload,
    ));

    // Jobs left pending by an unclean shutdown can never complete
    // (their tasks lived only in the previous process), so sweep them
    // before the server starts accepting traffic.
    service
        .recover_on_startup()
        .await
        .expect("Startup recovery sweep failed");

    let server_pool = pool.clone();
    let app_service = service.clone();
    let max_payload_size = config.max_payload_size;

    let server = HttpServer::new(move || {
        // Configure payload size limits globally
        let payload_config = web::PayloadConfig::default().limit(max_payload_size);
        let multipart_config = MultipartFormConfig::default().total_limit(max_payload_size);

        App::new()
            .app_data(web::Data::new(server_pool.clone())) // Share DB pool across workers
            .app_data(app_service.clone()) // Inject the orchestrator
            .app_data(payload_config)
            .app_data(multipart_config)
            .configure(health_config)
            .configure(analysis_config)
    });

    info!("Server starting on http://{}:{}", config.host, config.port);

    let server = server.bind((config.host.as_str(), config.port))?.run();

    // Get server handle for graceful shutdown
    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    let coordinator = ShutdownCoordinator::new(server_handle, server_task, pool);
    coordinator.wait_for_shutdown().await
}
