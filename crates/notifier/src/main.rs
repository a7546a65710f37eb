use std::time::Duration;

use hotelops_common::config::AppConfig;
use hotelops_common::db;
use hotelops_notifier::dispatcher::{CycleOptions, Dispatcher};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hotelops_notifier=info".into()),
        )
        .json()
        .init();

    tracing::info!("HotelOps notification worker starting...");

    let config = AppConfig::from_env()?;
    let pool = db::create_pool(&config).await?;

    let dispatcher = Dispatcher::from_config(pool, &config)?;
    let opts = CycleOptions::from_config(&config);
    let poll_interval = Duration::from_millis(config.dispatch_poll_interval_ms);

    tracing::info!(
        batch_size = opts.batch_size,
        max_runtime_ms = config.dispatch_max_runtime_ms,
        poll_interval_ms = config.dispatch_poll_interval_ms,
        "Dispatch loop configured"
    );

    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let summary = dispatcher.run_cycle(opts).await;
                if !summary.success {
                    tracing::error!(
                        error = summary.error.as_deref().unwrap_or("unknown"),
                        processed = summary.processed,
                        "Dispatch cycle aborted"
                    );
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received shutdown signal, stopping gracefully...");
                break;
            }
        }
    }

    tracing::info!("HotelOps notification worker stopped.");
    Ok(())
}
