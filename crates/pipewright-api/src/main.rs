//! pipewright server: HTTP API plus the job worker.

use clap::Parser;
use pipewright_api::{AppState, routes};
use pipewright_config::{LogConfig, LogFormat, SystemConfig};
use pipewright_db::{
    ExecutionStore, MessageQueueRepo, PgExecutionStore, PgMessageQueue, create_pool,
    run_migrations,
};
use pipewright_executor::DockerJobRuntime;
use pipewright_scheduler::{DispatchConfig, JobDispatchQueue, PgMessageFeed, Worker};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pipewright-server")]
#[command(about = "Pipeline status API and job worker", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to system.kdl
    #[arg(long, env = "PIPEWRIGHT_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on, overriding the config file
    #[arg(long)]
    bind: Option<String>,
}

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.filter));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match log.format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Pretty => subscriber.init(),
    }
}

async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "Failed to listen for ctrl-c");
            }
        }
        _ = shutdown.cancelled() => {}
    }
    info!("Shutting down");
    shutdown.cancel();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = SystemConfig::load(cli.config.as_deref())?;
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }
    init_tracing(&config.log);

    info!("Connecting to database...");
    let pool = create_pool(&config.database.url, config.database.max_connections).await?;
    run_migrations(&pool).await?;
    info!("Database connected");

    let store: Arc<dyn ExecutionStore> = Arc::new(PgExecutionStore::new(pool.clone()));
    let messages: Arc<dyn MessageQueueRepo> = Arc::new(PgMessageQueue::new(pool.clone()));
    let runtime = DockerJobRuntime::new()?;

    let dispatcher = Arc::new(JobDispatchQueue::new(
        store.clone(),
        Arc::new(runtime),
        DispatchConfig {
            concurrency: config.worker.concurrency,
            job_timeout: config.worker.job_timeout,
        },
    ));

    let feed = PgMessageFeed::new(
        messages.clone(),
        config.worker.id.clone(),
        config.worker.poll_interval,
    );
    let worker = Worker::new(config.worker.id.clone(), Arc::new(feed), dispatcher.clone());

    let shutdown = CancellationToken::new();
    let worker_handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { worker.run(shutdown).await }
    });

    let state = AppState::new(store, dispatcher, messages).with_pool(pool);
    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let listener = TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "Starting server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    // Also reached when the server exits on its own.
    shutdown.cancel();
    worker_handle.await?;

    Ok(())
}
