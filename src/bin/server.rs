use anyhow::Result;
use verdant::ServerSettings;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    log::info!("Verdant remote service starting up...");

    let settings = ServerSettings::from_env()?;
    verdant::server::run(settings).await
}
