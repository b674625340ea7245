use std::io::{self, Write};

use anyhow::{Context, Result};
use futures::StreamExt;
use serde::Serialize;
use shardscan_config::ShardscanConfig;
use shardscan_core::{Batch, Offset, Row, ScanRequest, ShardId};
use tracing::{info, warn};

use crate::{ScanArgs, wiring};

#[derive(Serialize)]
struct BatchLine<'a> {
    shard: ShardId,
    from: &'a Offset,
    to: &'a Offset,
    count: usize,
}

fn emit(batch: &Batch<Row>, summary: bool) -> Result<()> {
    let mut out = io::stdout().lock();
    if summary {
        let line = BatchLine {
            shard: batch.shard,
            from: &batch.from,
            to: &batch.to,
            count: batch.len(),
        };
        serde_json::to_writer(&mut out, &line)?;
        writeln!(out)?;
    } else {
        for record in &batch.records {
            serde_json::to_writer(&mut out, record)?;
            writeln!(out)?;
        }
    }
    out.flush().context("failed to write to stdout")
}

pub(crate) async fn run(mut config: ShardscanConfig, args: ScanArgs) -> Result<()> {
    if let Some(workers) = args.workers {
        config.run.worker_count = workers;
    }
    if let Some(shards) = args.shards {
        config.run.shard_limit = Some(shards);
    }
    if let Some(seed) = args.seed {
        config.run.seed_start = Some(seed);
    }
    if args.follow {
        config.run.follow = true;
    }

    let seed = config.run.seed(config.scan.offset_kind)?;
    let mut request = ScanRequest::new(seed, config.table.scan_key.clone())
        .workers(config.run.worker_count)
        .wait_mode(config.run.wait_mode());
    if let Some(limit) = config.run.shard_limit {
        request = request.shard_limit(limit);
    }
    if let Some(rows) = args.batch_size {
        request = request.batch_size(rows);
    }

    let scheduler = wiring::scheduler(&config).await?;
    let mut stream = scheduler.run(request).await?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut failures = 0u64;
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupted, stopping scan");
                break;
            }
            item = stream.next() => match item {
                None => break,
                Some(Ok(batch)) => emit(&batch, args.summary)?,
                Some(Err(err)) if err.is_fatal() => return Err(err.into()),
                Some(Err(err)) => {
                    failures += 1;
                    warn!(error = %err, "shard failure, will retry");
                }
            }
        }
    }

    drop(stream);
    if failures > 0 {
        warn!(failures, "scan finished with shard failures");
    }
    Ok(())
}
