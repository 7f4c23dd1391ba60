use brightcal::startup;
use tracing::info;

#[tokio::main]
async fn main() -> miette::Result<()> {
    // Load .env before logging so APP_ENV and RUST_LOG apply
    dotenvy::dotenv().ok();

    // Initialize logging
    startup::init_logging()?;

    info!("Starting brightcal");

    // Load configuration
    let config = startup::load_config()?;

    // Start the server
    startup::serve(config).await
}
