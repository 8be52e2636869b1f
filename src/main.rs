use loyalty_ledger::config::EngineConfig;
use loyalty_ledger::{db, LoyaltyEngine};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Loads .env before reading any setting
    let config = EngineConfig::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_level(true)
        .init();

    tracing::info!("Loyalty ledger - Starting...");

    let database_url = config.require_database_url()?.to_string();
    tracing::info!("Connecting to database...");
    let pool = db::create_pool(&database_url, &config).await?;
    db::run_migrations(&pool).await?;

    let engine = LoyaltyEngine::postgres(pool, config.clone());
    engine.warm_cache().await?;

    if !config.enable_jobs {
        tracing::info!("Scheduled jobs are disabled; set ENABLE_JOBS=true to run them");
        engine.metrics().log_summary();
        return Ok(());
    }

    tracing::info!(interval_secs = config.job_interval.as_secs(), "Scheduled jobs enabled");
    let mut ticker = tokio::time::interval(config.job_interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => run_jobs(&engine).await,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
                break;
            }
        }
    }

    engine.metrics().log_summary();
    tracing::info!("Loyalty ledger stopped");
    Ok(())
}

async fn run_jobs(engine: &LoyaltyEngine) {
    if let Err(e) = engine.expiration_warnings().run().await {
        tracing::error!("Points expiration job failed: {}", e);
    }
    if let Err(e) = engine.late_clock_in_report().run().await {
        tracing::error!("Late clock-in job failed: {}", e);
    }
}
