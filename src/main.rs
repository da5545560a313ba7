/// Flowgrid: workflow execution engine for energy-management automation
///
/// Main entry point. Loads configuration from the environment and starts the
/// engine, the cron scheduler and the health endpoint.

use flowgrid::{config::Config, server::start_server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration (defaults to 0.0.0.0:3004 and sqlite://data/flowgrid.db)
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}
