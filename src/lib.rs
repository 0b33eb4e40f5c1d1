use ibdesk_gateway::{ClientPortalGateway, DryRunGateway, Gateway};
use rocket::Config;
use tracing::{error, info};

pub mod api;
pub mod cli;
pub mod env;
pub mod error;
pub mod order;
pub mod queue;
pub mod telemetry;
pub mod valuation;
pub mod worker;

pub use env::{Env, GatewayKind, LogLevel};
pub use error::{QueryError, SubmitError, ValidationError, WorkerError};
pub use order::{OrderRequest, OrderResult, OrderStatus, OrderType, PlaceOrder};
pub use queue::OrderQueue;
pub use valuation::{Position, valuate};
pub use worker::{WorkerConfig, WorkerHandle, spawn_worker};

pub async fn launch(env: Env) -> anyhow::Result<()> {
    match env.gateway {
        GatewayKind::DryRun => serve::<DryRunGateway>(env.dry_run_config(), &env).await,
        GatewayKind::ClientPortal => {
            serve::<ClientPortalGateway>(env.gateway_env.clone(), &env).await
        }
    }
}

async fn serve<G: Gateway>(gateway_config: G::Config, env: &Env) -> anyhow::Result<()> {
    let (queue, mut worker) = spawn_worker::<G>(gateway_config, env.worker_config()).await?;
    info!(gateway = ?env.gateway, "Gateway session established");

    let config = Config::figment()
        .merge(("port", env.http_port))
        .merge(("address", env.http_address.clone()));

    let rocket = rocket::custom(config)
        .mount("/", api::routes())
        .manage(queue);

    let server_task = tokio::spawn(rocket.launch());

    let worker_exit = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal, shutting down gracefully...");
            None
        }

        result = server_task => {
            match result {
                Ok(Ok(_)) => info!("Server completed successfully"),
                Ok(Err(e)) => error!("Server failed: {e}"),
                Err(e) => error!("Server task panicked: {e}"),
            }
            None
        }

        result = worker.exited() => Some(result),
    };

    match worker_exit {
        Some(Ok(())) => info!("Order worker stopped"),
        Some(Err(e)) => {
            error!("Order worker failed: {e}");
            return Err(e.into());
        }
        None => worker.stop().await?,
    }

    info!("Shutdown complete");
    Ok(())
}
