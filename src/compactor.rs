use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::engine::StoreError;
use crate::registry::Registry;

/// Compact the registry's WAL once it has taken `threshold` appends since the
/// last rewrite. Returns whether a compaction ran.
pub async fn compact_if_needed(registry: &Registry, threshold: u64) -> Result<bool, StoreError> {
    let appends = registry.appends_since_compact().await;
    if appends < threshold {
        return Ok(false);
    }
    registry.compact().await?;
    info!("compacted WAL after {appends} appends");
    Ok(true)
}

/// Background task that keeps a tenant's WAL bounded.
pub async fn run_compactor(registry: Arc<Registry>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(10));
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_needed(&registry, threshold).await {
            // Booking keeps working on the old log; retried next tick.
            warn!("compaction failed: {e}");
        }
    }
}
