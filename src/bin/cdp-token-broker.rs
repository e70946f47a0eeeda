use anyhow::{anyhow, Result};
use clap::Parser;
use tracing::{error, info};

use cdp_token_broker::context::BrokerContext;
use cdp_token_broker::server;
use cdp_token_broker::utils::config_loader;
use cdp_token_broker::utils::logging::{self, LogLevel};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, env = "CONFIG", default_value = "cdp-token-broker.yaml")]
    config: String,
    #[arg(long, env = "LOG_LEVEL", value_enum)]
    log_level: Option<LogLevel>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // -------------------------------
    // 1. Load YAML config
    // -------------------------------

    let service_config = config_loader::run(&args.config).await?;
    logging::run(&service_config, args.log_level);

    // -------------------------------
    // 2. Build signer, exchanger, token manager and query relay
    // -------------------------------

    let context = BrokerContext::build(service_config)?;

    // -------------------------------
    // 3. Parse the private key now; a broken key must stop the service
    // -------------------------------

    context.manager.signer().preload().await.map_err(|e| {
        error!("cannot load assertion signing key: {}", e);
        anyhow!("cannot load assertion signing key: {}", e)
    })?;

    // -------------------------------
    // 4. Serve
    // -------------------------------

    info!("Service starting...");
    server::server::start(context).await
}
