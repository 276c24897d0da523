use std::sync::Arc;

use activity_pipeline::{
    api::{AppState, run_api_server},
    clients::{database::DatabaseClient, health::HealthChecker, publisher::EventPublisher},
    config::Config,
    utils::{init_tracing, shutdown_signal},
    worker::{Worker, WorkerConfig},
};
use anyhow::{Error, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_tracing();

    let config = Config::load()?;

    info!(
        queue = %config.queue_name,
        server_port = config.server_port,
        run_worker = config.run_worker,
        "Configuration loaded"
    );

    let shutdown = CancellationToken::new();

    let worker = if config.run_worker {
        let store = Arc::new(DatabaseClient::from_config(&config));
        let worker = Worker::new(WorkerConfig::from_config(&config), store);
        Some(worker.spawn(shutdown.child_token()))
    } else {
        None
    };

    let mut state = AppState::new(
        Arc::new(EventPublisher::from_config(&config)),
        Arc::new(HealthChecker::from_config(&config)),
    );
    if let Some(handle) = &worker {
        state = state.with_worker_state(handle.subscribe());
    }

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    let served = run_api_server(&config, state, shutdown.clone()).await;
    if let Err(e) = &served {
        error!(error = %e, "API server exited with an error");
    }

    shutdown.cancel();
    if let Some(handle) = worker {
        handle.shutdown();
        handle.join().await;
    }

    info!("Shutdown complete");

    served
}
