//! Xuangu Screener - stock screening service over Redis inverted indexes.

use anyhow::{Context, Result};
use std::sync::Arc;
use xuangu_common::config::Config;
use xuangu_common::logging::init_logging_with_exclusions;
use xuangu_screener::store::{KvStore, RedisStore};
use xuangu_screener::ScreenerService;

#[tokio::main]
async fn main() -> Result<()> {
    // Start timing immediately for cold-start measurement
    let startup_start = std::time::Instant::now();

    let config = Config::load_and_validate()?;

    init_logging_with_exclusions(
        &config.observability.log_level,
        &config.observability.log_format,
        &config.observability.excluded_targets,
    );

    tracing::info!("Xuangu Screener v{}", env!("CARGO_PKG_VERSION"));

    let store = RedisStore::connect(&config.redis)
        .await
        .with_context(|| format!("Failed to connect to Redis at {}", config.redis.url))?;
    if let Err(e) = store.ping().await {
        tracing::warn!(error = %e, "Redis ping failed, screens will return empty results until it recovers");
    }

    let service = ScreenerService::new(config, Arc::new(store));

    let startup_duration = startup_start.elapsed();
    tracing::info!(
        duration_ms = startup_duration.as_millis() as u64,
        "Service initialized in {:?}",
        startup_duration
    );

    service.start().await
}
