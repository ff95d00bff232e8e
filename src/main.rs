use footfall::{AppError, Coordinator, Settings};
use tracing::{info, Level};

fn init_logging(level: Level) {
    tracing_subscriber::fmt().with_max_level(level).init();
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let settings = Settings::load(std::env::args().nth(1).as_deref())?;
    init_logging(settings.log_level());

    let coordinator = Coordinator::builder(settings).start().await?;
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Cannot listen for shutdown signal: {}", e);
    }
    info!("Shutting down");
    coordinator.stop().await;
    Ok(())
}
