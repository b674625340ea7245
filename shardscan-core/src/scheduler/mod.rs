//! Coordinates scans across every shard of a logical table.
//!
//! One coordinating loop owns the per-shard state. Each inspection pass it
//! reconciles idle shards with the offset store, dispatches the most-behind
//! eligible shards onto a bounded [`JoinSet`], and turns finished scans into
//! [`Batch`]es. A shard's offset is committed before its batch is yielded, so
//! a caller that stops reading never loses rows and a new run resumes from
//! the last yielded batch.

mod state;

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub use self::state::ShardPhase;
use self::state::{ShardBoard, ShardState};
use crate::{
    config::SchedulerConfig,
    error::{Result, ScanError, StoreError},
    lease::{LeaseKeeper, ScanLease},
    offset::{Offset, ShardId},
    offsets::OffsetTracker,
    record::RecordDecoder,
    scanner::{ScanPage, ShardScanner},
    store::validate_column_name,
};

/// Records read from one shard by one scan.
#[derive(Clone, Debug)]
pub struct Batch<R> {
    /// Shard the records came from.
    pub shard: ShardId,
    /// Offset the scan started after.
    pub from: Offset,
    /// Offset committed for the shard once this batch was produced.
    pub to: Offset,
    /// Decoded records in scan-key order. Empty when the shard had nothing new.
    pub records: Vec<R>,
}

impl<R> Batch<R> {
    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the batch carries no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Whether the shard's offset moved. A batch can advance and still be
    /// empty when every row in it failed to decode.
    pub fn made_progress(&self) -> bool {
        self.from != self.to
    }
}

/// When a run ends.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum WaitMode {
    /// Stop once every shard's latest scan came back without progress.
    #[default]
    OneShot,
    /// Never stop; re-poll an exhausted shard `poll_interval` after its last
    /// empty scan. Dropping the stream ends the run.
    Continuous {
        /// Minimum delay before re-polling an exhausted shard.
        poll_interval: Duration,
    },
}

/// Parameters for one [`ScanScheduler::run`].
#[derive(Clone, Debug)]
pub struct ScanRequest {
    seed: Offset,
    scan_key: String,
    workers: usize,
    shard_limit: Option<usize>,
    batch_size: Option<usize>,
    wait_mode: WaitMode,
}

impl ScanRequest {
    /// `seed` is written for shards with no durable offset yet; existing
    /// offsets win.
    pub fn new(seed: Offset, scan_key: impl Into<String>) -> Self {
        Self {
            seed,
            scan_key: scan_key.into(),
            workers: 1,
            shard_limit: None,
            batch_size: None,
            wait_mode: WaitMode::OneShot,
        }
    }

    /// Maximum scans in flight at once.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Scan only the first `shards` shards.
    pub fn shard_limit(mut self, shards: usize) -> Self {
        self.shard_limit = Some(shards);
        self
    }

    /// Override the configured rows per batch.
    pub fn batch_size(mut self, rows: usize) -> Self {
        self.batch_size = Some(rows);
        self
    }

    /// Stop when every shard is exhausted, or keep tailing.
    pub fn wait_mode(mut self, mode: WaitMode) -> Self {
        self.wait_mode = mode;
        self
    }

    /// Offset written for shards with no durable offset.
    pub fn seed(&self) -> &Offset {
        &self.seed
    }

    /// Column the shards are scanned by.
    pub fn scan_key(&self) -> &str {
        &self.scan_key
    }
}

/// Stream of committed batches and per-shard failures from a run.
pub type ScanStream<R> = Pin<Box<dyn Stream<Item = Result<Batch<R>>> + Send>>;

type ScanOutcome<R> = std::result::Result<ScanPage<R>, StoreError>;

#[derive(Debug, Default)]
struct RunSummary {
    batches: u64,
    records: u64,
    failures: u64,
}

/// Scans every shard of a table concurrently with resumable offsets.
pub struct ScanScheduler<D: RecordDecoder> {
    scanners: Vec<ShardScanner<D>>,
    tracker: OffsetTracker,
    config: SchedulerConfig,
    lease: Option<Arc<dyn ScanLease>>,
}

impl<D: RecordDecoder> fmt::Debug for ScanScheduler<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanScheduler")
            .field("shard_count", &self.scanners.len())
            .field("tracker", &self.tracker)
            .field("config", &self.config)
            .field("lease", &self.lease.as_ref().map(|lease| lease.key().to_string()))
            .finish()
    }
}

impl<D: RecordDecoder> ScanScheduler<D> {
    /// `scanners[i]` must scan shard `i`.
    pub fn new(
        scanners: Vec<ShardScanner<D>>,
        tracker: OffsetTracker,
        config: SchedulerConfig,
    ) -> Result<Self> {
        if scanners.is_empty() {
            return Err(ScanError::NoShardsConfigured);
        }
        if let Some((index, scanner)) = scanners
            .iter()
            .enumerate()
            .find(|(index, scanner)| scanner.shard().index() != *index)
        {
            return Err(ScanError::InvalidShardArgument(format!(
                "scanner at position {index} targets shard {}",
                scanner.shard()
            )));
        }
        Ok(Self {
            scanners,
            tracker,
            config,
            lease: None,
        })
    }

    /// Hold `lease` for the duration of every run.
    pub fn with_lease(mut self, lease: Arc<dyn ScanLease>) -> Self {
        self.lease = Some(lease);
        self
    }

    /// Shards this scheduler can scan.
    pub fn shard_count(&self) -> usize {
        self.scanners.len()
    }

    /// Offset tracker shared by every run.
    pub fn tracker(&self) -> &OffsetTracker {
        &self.tracker
    }

    fn validate(&self, request: &ScanRequest) -> Result<usize> {
        validate_column_name(&request.scan_key)
            .map_err(|_| ScanError::InvalidShardArgument(format!("invalid scan key {:?}", request.scan_key)))?;
        if request.workers == 0 {
            return Err(ScanError::InvalidShardArgument("worker count must be positive".into()));
        }
        if request.batch_size == Some(0) {
            return Err(ScanError::InvalidShardArgument("batch size must be positive".into()));
        }
        let shard_count = match request.shard_limit {
            None => self.scanners.len(),
            Some(limit) if limit == 0 || limit > self.scanners.len() => {
                return Err(ScanError::InvalidShardArgument(format!(
                    "shard limit {limit} outside 1..={}",
                    self.scanners.len()
                )));
            }
            Some(limit) => limit,
        };
        if request.seed.kind() != self.tracker.kind() {
            return Err(ScanError::InvalidShardArgument(format!(
                "seed {} is a {} offset, shards store {} offsets",
                request.seed,
                request.seed.kind(),
                self.tracker.kind()
            )));
        }
        Ok(shard_count)
    }

    async fn seed(&self, request: &ScanRequest, shard_count: usize) -> Result<Vec<ShardState>> {
        let mut shards = Vec::with_capacity(shard_count);
        for scanner in &self.scanners[..shard_count] {
            let offset = self.tracker.ensure_seeded(scanner.shard(), &request.seed).await?;
            debug!(shard = %scanner.shard(), table = scanner.table(), offset = %offset, "shard ready");
            shards.push(ShardState::new(scanner.shard(), offset));
        }
        Ok(shards)
    }

    /// Start a run.
    ///
    /// Validation, lease acquisition and offset seeding happen before this
    /// returns, so their failures are returned directly. Everything after
    /// that is reported through the stream: per-shard failures as `Err`
    /// items that do not end the run, a lost lease as a final `Err`.
    pub async fn run(&self, request: ScanRequest) -> Result<ScanStream<D::Record>> {
        let shard_count = self.validate(&request)?;

        let keeper = match &self.lease {
            Some(lease) => Some(LeaseKeeper::acquire(Arc::clone(lease), self.config.lease).await?),
            None => None,
        };

        let shards = match self.seed(&request, shard_count).await {
            Ok(shards) => shards,
            Err(err) => {
                if let Some(keeper) = keeper {
                    keeper.release().await;
                }
                return Err(err);
            }
        };

        info!(
            shards = shard_count,
            workers = request.workers,
            scan_key = %request.scan_key,
            mode = ?request.wait_mode,
            "starting shard scan"
        );

        Ok(Box::pin(drive(
            self.scanners[..shard_count].to_vec(),
            self.tracker.clone(),
            self.config,
            request,
            ShardBoard::new(shards),
            keeper,
        )))
    }
}

fn drive<D: RecordDecoder>(
    scanners: Vec<ShardScanner<D>>,
    tracker: OffsetTracker,
    config: SchedulerConfig,
    request: ScanRequest,
    mut board: ShardBoard,
    mut keeper: Option<LeaseKeeper>,
) -> impl Stream<Item = Result<Batch<D::Record>>> + Send {
    let idle_wait = config.idle_wait();
    let scan_key: Arc<str> = Arc::from(request.scan_key.as_str());

    async_stream::stream! {
        let started = Instant::now();
        let mut summary = RunSummary::default();
        let mut tasks: JoinSet<ScanOutcome<D::Record>> = JoinSet::new();
        let mut in_flight: HashMap<Id, ShardId> = HashMap::new();

        loop {
            if let Some(keeper) = keeper.as_mut()
                && let Err(err) = keeper.maintain().await
            {
                warn!(error = %err, "stopping shard scan");
                yield Err(err);
                break;
            }

            // Reconcile every shard that is not scanning with its durable offset.
            let resting: Vec<ShardId> = board
                .iter()
                .filter(|state| state.phase != ShardPhase::Scanning)
                .map(|state| state.shard)
                .collect();
            for shard in resting {
                let durable = match tracker.ensure_seeded(shard, &request.seed).await {
                    Ok(offset) => offset,
                    Err(err) => {
                        summary.failures += 1;
                        if let Some(state) = board.get_mut(shard)
                            && state.phase == ShardPhase::Idle
                        {
                            state.fail(Instant::now() + idle_wait);
                        }
                        warn!(shard = %shard, error = %err, "offset reconciliation failed");
                        yield Err(err);
                        continue;
                    }
                };
                if let Some(state) = board.get_mut(shard)
                    && let Some(previous) = state.adopt(durable)
                {
                    warn!(shard = %shard, previous = %previous, current = %state.offset, "offset changed outside this run");
                }
            }

            if request.wait_mode == WaitMode::OneShot && board.is_exhausted() {
                break;
            }

            let now = Instant::now();
            let capacity = request.workers.saturating_sub(tasks.len());
            let dispatch = board.next_dispatch(now, capacity);
            for shard in &dispatch {
                let Some(from) = board.begin_scan(*shard) else {
                    continue;
                };
                let scanner = scanners[shard.index()].clone();
                let limit = request.batch_size.unwrap_or_else(|| scanner.batch_size());
                let scan_key = Arc::clone(&scan_key);
                debug!(shard = %shard, from = %from, limit, "dispatching shard scan");
                let handle = tasks.spawn(async move { scanner.scan(&from, &scan_key, limit).await });
                in_flight.insert(handle.id(), *shard);
            }
            debug_assert!(board.scanning() <= request.workers);

            let mut finished: Vec<std::result::Result<(Id, ScanOutcome<D::Record>), JoinError>> = Vec::new();
            if !tasks.is_empty() {
                if let Ok(Some(first)) = tokio::time::timeout(idle_wait, tasks.join_next_with_id()).await {
                    finished.push(first);
                    while let Some(more) = tasks.try_join_next_with_id() {
                        finished.push(more);
                    }
                }
            } else if dispatch.is_empty() {
                tokio::time::sleep(idle_wait).await;
            }

            for joined in finished {
                let (id, outcome) = match joined {
                    Ok((id, outcome)) => (id, Ok(outcome)),
                    Err(join_error) => (join_error.id(), Err(join_error)),
                };
                let Some(shard) = in_flight.remove(&id) else {
                    continue;
                };
                let Some(state) = board.get_mut(shard) else {
                    continue;
                };
                let from = state.offset.clone();

                let page = match outcome {
                    Ok(Ok(page)) => page,
                    Ok(Err(source)) => {
                        summary.failures += 1;
                        state.fail(Instant::now() + idle_wait);
                        warn!(shard = %shard, from = %from, error = %source, "shard scan failed");
                        yield Err(ScanError::StorageUnavailable { shard, source });
                        continue;
                    }
                    Err(join_error) => {
                        summary.failures += 1;
                        state.fail(Instant::now() + idle_wait);
                        warn!(shard = %shard, from = %from, error = %join_error, "shard scan task failed");
                        yield Err(ScanError::TaskFailed { shard, message: join_error.to_string() });
                        continue;
                    }
                };

                if state.advances(&page.next_offset)
                    && let Err(err) = tracker.set(shard, &page.next_offset).await
                {
                    summary.failures += 1;
                    state.fail(Instant::now() + idle_wait);
                    warn!(
                        shard = %shard,
                        from = %from,
                        to = %page.next_offset,
                        discarded = page.records.len(),
                        error = %err,
                        "offset commit failed, batch will be rescanned"
                    );
                    yield Err(err);
                    continue;
                }

                state.complete(page.next_offset.clone(), request.wait_mode, Instant::now());
                summary.batches += 1;
                summary.records += page.records.len() as u64;
                info!(
                    shard = %shard,
                    from = %from,
                    to = %page.next_offset,
                    count = page.records.len(),
                    scanned = page.rows_scanned,
                    "shard batch committed"
                );
                yield Ok(Batch {
                    shard,
                    from,
                    to: page.next_offset,
                    records: page.records,
                });
            }
        }

        if let Some(keeper) = keeper.take() {
            keeper.release().await;
        }
        info!(
            batches = summary.batches,
            records = summary.records,
            failures = summary.failures,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "shard scan finished"
        );
    }
}
