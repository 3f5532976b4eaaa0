//! Arena Server
//!
//! Runs one authoritative arena on the address from `ARENA_BIND_ADDR`.

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use arena::{
    VERSION,
    game::rules::TICKS_PER_SECOND,
    network::server::{GameServer, ServerConfig},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let default_level = if cfg!(feature = "debug-tracing") { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = ServerConfig::from_env().context("invalid server configuration")?;
    info!("Arena Server v{}", VERSION);
    info!(
        "Tick Rate: {} Hz (gameplay tuned for {} Hz), seed {}",
        config.tick_rate, TICKS_PER_SECOND, config.rng_seed
    );

    let server = GameServer::new(config);
    let run = server.run();
    tokio::pin!(run);

    tokio::select! {
        result = &mut run => {
            return result.context("server stopped");
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for ctrl-c")?;
            info!("Interrupted, shutting down");
        }
    }

    server.shutdown();
    run.await.context("server stopped")?;
    Ok(())
}
