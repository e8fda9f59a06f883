use anyhow::Result;
use verdant::AppSettings;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    log::info!("Verdant app starting up...");

    let settings = AppSettings::from_env()?;
    verdant::local::run(settings).await
}
