use tracing::error;

use mailbridge::service::{run_server, ServiceConfig};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().init();

    let config = match ServiceConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!("failed to load configuration: {}", err);
            std::process::exit(1);
        }
    };

    let shutdown = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("failed to listen for shutdown signal: {}", err);
        }
    };

    if let Err(err) = run_server(config, shutdown).await {
        error!("server exited with error: {}", err);
        std::process::exit(1);
    }
}
