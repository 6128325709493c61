use anyhow::Result;
use clap::Parser;
use tracing::warn;

use listd::{
    cli::Cli,
    config::ServerConfig,
    connector,
    listener::{self, serve},
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = ServerConfig::from(Cli::parse());
    let (downstream, upstream) = connector::channel(config.downstream_capacity);
    connector::spawn_echo(upstream);

    if let Err(err) = serve(&config, downstream, listener::ctrl_c()).await {
        warn!("server exited with error: {err:?}");
        return Err(err);
    }

    Ok(())
}
