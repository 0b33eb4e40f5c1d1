use clap::Parser;
use ibdesk::env::{Env, setup_tracing};
use ibdesk::launch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv_override().ok();
    let env = Env::try_parse()?;
    let _telemetry_guard = setup_tracing(&env);

    launch(env).await
}
