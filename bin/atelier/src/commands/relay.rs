use atelier_core::{Config, Paths};
use atelier_relay::RelayServer;
use tracing::info;

pub async fn run(host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let paths = Paths::new();
    let mut config = Config::load(&paths)?;

    if let Some(host) = host {
        config.relay.host = host;
    }
    if let Some(port) = port {
        config.relay.port = port;
    }

    info!(addr = %config.relay_addr(), "Starting relay");
    let server = RelayServer::bind(&config.relay_addr()).await?;
    server.run().await?;
    Ok(())
}
