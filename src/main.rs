mod constants;
mod http;
mod models;
mod prometheus;
mod scraper;
mod substrate;
mod utils;

use clap::Parser;
use log::info;
use std::sync::Arc;

use crate::http::State;
use crate::prometheus::Exporter;
use crate::scraper::Scraper;
use crate::substrate::SubstrateConnector;
use crate::utils::{Args, Config};

#[async_std::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();
    let config = Config::from_args(&args)?;

    // RUST_LOG wins over the configured level
    env_logger::Builder::new()
        .parse_filters(&config.log_level)
        .parse_default_env()
        .init();

    info!(
        "{} {} starting",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );
    info!("Loaded config: {:?}", config);

    // an unreachable node at startup is fatal, later failures only fail scrapes
    let connector = SubstrateConnector::bootstrap(config.ws_endpoint.clone()).await?;

    let exporter = Exporter::new(
        connector,
        Scraper::new(config.address_prefix()),
        config.scrape_timeout(),
    );
    let listen = config.listen_addr()?;
    let state = State {
        config: Arc::new(config),
        exporter: Arc::new(exporter),
    };

    info!(
        "Server is ready to handle incoming scrape requests on http://{}{}",
        listen, state.config.metrics_path
    );
    http::app(state).listen(listen).await?;
    Ok(())
}
