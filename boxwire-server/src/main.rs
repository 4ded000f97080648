use boxwire_collab::{ServerConfig, SyncServer};
use log::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();

    let config = ServerConfig::from_env();
    info!(
        "Starting Boxwire sync server (outbox capacity {}, heartbeat {:?})",
        config.outbox_capacity,
        config.heartbeat_interval()
    );

    SyncServer::new(config).run().await
}
