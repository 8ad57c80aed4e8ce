use actix_multipart::form::MultipartFormConfig;
use actix_web::{App, HttpServer, web};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer, filter::LevelFilter};
mod api;
use crate::api::{
    health::health_config,
    job::{handlers::job_config, JobService},
    validation,
};
mod config;
mod job;
mod shutdown;
mod worker;
use crate::job::SlotAllocator;
use crate::shutdown::ShutdownCoordinator;
use crate::worker::{JobRunner, WorkerCommand};

/// Upload, run and manage driver scripts as external worker processes
#[derive(Parser, Debug)]
#[command(name = "job-lifecycle", version, about)]
struct Cli {
    /// Job directory root (overrides UPLOADS_PATH)
    #[arg(long)]
    uploads_path: Option<PathBuf>,

    /// Worker program (overrides SUBMIT_COMMAND)
    #[arg(long)]
    submit_command: Option<String>,

    /// Bind host (overrides HOST)
    #[arg(long)]
    host: Option<String>,

    /// Bind port (overrides PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Service log directory (overrides LOG_DIR)
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let cli = Cli::parse();

    // Load configuration from environment, then apply command-line overrides
    let mut config = config::Config::from_env()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    if let Some(path) = cli.uploads_path {
        config.uploads_path = path;
    }
    if let Some(command) = cli.submit_command {
        config.submit_command = command;
    }
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(dir) = cli.log_dir {
        config.log_dir = dir;
    }

    // Create logs directory if it doesn't exist
    std::fs::create_dir_all(&config.log_dir)?;

    // Log files will be created as: logs/info.log.2024-12-22, logs/error.log.2024-12-22, etc.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());

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

    std::fs::create_dir_all(&config.uploads_path)?;

    info!("Starting job-lifecycle application");
    info!("Configuration loaded successfully:");
    info!("  - Uploads path: {}", config.uploads_path.display());
    info!("  - Upload slots: {} (width {})", config.max_slots, config.slot_width);
    info!("  - Worker command: {} {}", config.submit_command, config.submit_args.join(" "));
    info!("  - Max payload size: {} bytes", config.max_payload_size);
    info!("  - Shutdown grace: {:?}", config.shutdown_grace);

    // Created on the main runtime so completion watchers outlive the HTTP workers
    let runner = Arc::new(JobRunner::new(WorkerCommand::new(
        config.submit_command.clone(),
        config.submit_args.clone(),
    )));
    let allocator = SlotAllocator::new(&config.uploads_path, config.slot_width, config.max_slots);
    let job_service = web::Data::new(JobService::new(allocator, runner.clone()));

    let max_payload_size = config.max_payload_size;
    let server = HttpServer::new(move || {
        // Configure payload size limits globally
        let payload_config = web::PayloadConfig::default()
            .limit(max_payload_size);

        let multipart_config = MultipartFormConfig::default()
            .total_limit(max_payload_size)
            .memory_limit(max_payload_size);

        App::new()
            .app_data(job_service.clone())
            .app_data(payload_config) // Global payload size limit
            .app_data(multipart_config) // Global multipart/file upload size limit
            .app_data(validation::json_config()) // Global validation config
            .app_data(validation::query_config())
            .configure(health_config) // Health check endpoints
            .configure(job_config)
    });

    info!("Server starting on http://{}:{}", config.host, config.port);

    // Bind and start the server
    let server = server
        .bind((config.host.as_str(), config.port))?
        .run();

    // Get server handle for graceful shutdown
    let server_handle = server.handle();

    // Spawn server in background
    let server_task = tokio::spawn(server);

    let coordinator = ShutdownCoordinator::new(
        server_handle,
        server_task,
        runner,
        config.shutdown_grace,
    );

    coordinator.wait_for_shutdown().await
}
