use anyhow::{Result, bail};
use serde_json::json;
use shardscan_config::ShardscanConfig;
use shardscan_core::{Offset, ShardId, offsets::OffsetTracker, store::OffsetStore};
use tracing::{info, warn};

use crate::wiring;

pub(crate) async fn show(config: &ShardscanConfig) -> Result<()> {
    let redis = wiring::redis(config).await?;
    let kind = config.scan.offset_kind;

    for index in 0..config.table.resolved_shard_count() {
        let shard = ShardId(index);
        let raw = redis.offsets.get_field(&shard.field_key()).await?;
        let valid = raw.as_deref().map(|value| kind.parse(value).is_some());
        println!(
            "{}",
            json!({
                "shard": index,
                "field": shard.field_key(),
                "offset": raw,
                "valid": valid,
            })
        );
    }
    Ok(())
}

/// Offset about to be overwritten. A read failure or an undecodable value
/// does not block the overwrite.
async fn replaced_offset(tracker: &OffsetTracker, shard: ShardId) -> Option<Offset> {
    match tracker.get(shard).await {
        Ok(previous) => previous,
        Err(err) => {
            warn!(shard = %shard, error = %err, "could not read the offset being replaced");
            None
        }
    }
}

pub(crate) async fn set(config: &ShardscanConfig, shard: usize, value: &str) -> Result<()> {
    let shard_count = config.table.resolved_shard_count();
    if shard >= shard_count {
        bail!("shard {shard} does not exist ({shard_count} configured)");
    }
    let kind = config.scan.offset_kind;
    let Some(offset) = kind.parse(value) else {
        bail!("{value:?} is not a {kind} offset");
    };

    let redis = wiring::redis(config).await?;
    let tracker = wiring::tracker(config, &redis);
    let shard = ShardId(shard);
    let previous = replaced_offset(&tracker, shard).await;
    tracker.set(shard, &offset).await?;
    info!(
        shard = %shard,
        previous = ?previous.map(|offset| offset.encode()),
        offset = %offset,
        "offset overwritten"
    );
    Ok(())
}
