use tracing::error;
use tracing_subscriber::EnvFilter;
use video_card::Config;

fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tower_http=info"));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    // Load configuration from CLI and/or config file
    let config = Config::load()?;
    if let Err(error) = video_card::run(config).await {
        error!(?error, "Server stopped");
        return Err(error);
    }
    Ok(())
}
