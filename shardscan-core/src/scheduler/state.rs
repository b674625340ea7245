use std::fmt;

use tokio::time::Instant;

use super::WaitMode;
use crate::offset::{Offset, ShardId};

/// Where a shard is within the current run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ShardPhase {
    /// Waiting for dispatch.
    Idle,
    /// A scan task is in flight.
    Scanning,
    /// Last scan made no progress (one-shot runs only).
    Terminated,
}

pub(super) struct ShardState {
    pub(super) shard: ShardId,
    pub(super) phase: ShardPhase,
    /// Durable offset while idle, pre-scan offset while scanning.
    pub(super) offset: Offset,
    /// Earliest instant the shard may be dispatched again.
    pub(super) not_before: Option<Instant>,
}

impl ShardState {
    pub(super) fn new(shard: ShardId, offset: Offset) -> Self {
        Self {
            shard,
            phase: ShardPhase::Idle,
            offset,
            not_before: None,
        }
    }

    fn is_eligible(&self, now: Instant) -> bool {
        self.phase == ShardPhase::Idle && self.not_before.is_none_or(|at| at <= now)
    }

    /// Adopt a durable offset read while the shard is not scanning. Returns
    /// the replaced offset when it differed. A moved offset revives a
    /// terminated shard.
    pub(super) fn adopt(&mut self, durable: Offset) -> Option<Offset> {
        if self.phase == ShardPhase::Scanning || durable == self.offset {
            return None;
        }
        if self.phase == ShardPhase::Terminated {
            self.phase = ShardPhase::Idle;
        }
        Some(std::mem::replace(&mut self.offset, durable))
    }

    /// Whether a completed scan ending at `next` made progress.
    pub(super) fn advances(&self, next: &Offset) -> bool {
        *next != self.offset
    }

    /// Record a committed scan.
    pub(super) fn complete(&mut self, next: Offset, mode: WaitMode, now: Instant) {
        let empty = !self.advances(&next);
        self.offset = next;
        self.not_before = None;
        self.phase = match (empty, mode) {
            (false, _) => ShardPhase::Idle,
            (true, WaitMode::OneShot) => ShardPhase::Terminated,
            (true, WaitMode::Continuous { poll_interval }) => {
                self.not_before = Some(now + poll_interval);
                ShardPhase::Idle
            }
        };
    }

    /// Back to idle at the pre-scan offset, not to be retried before
    /// `retry_at`.
    pub(super) fn fail(&mut self, retry_at: Instant) {
        self.phase = ShardPhase::Idle;
        self.not_before = Some(retry_at);
    }
}

impl fmt::Debug for ShardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardState")
            .field("shard", &self.shard)
            .field("phase", &self.phase)
            .field("offset", &self.offset)
            .finish()
    }
}

/// Scheduling state of every shard in a run, indexed by shard.
#[derive(Debug)]
pub(super) struct ShardBoard {
    shards: Vec<ShardState>,
}

impl ShardBoard {
    pub(super) fn new(shards: Vec<ShardState>) -> Self {
        Self { shards }
    }

    pub(super) fn get_mut(&mut self, shard: ShardId) -> Option<&mut ShardState> {
        self.shards.get_mut(shard.index())
    }

    pub(super) fn iter(&self) -> impl Iterator<Item = &ShardState> {
        self.shards.iter()
    }

    pub(super) fn scanning(&self) -> usize {
        self.shards
            .iter()
            .filter(|state| state.phase == ShardPhase::Scanning)
            .count()
    }

    /// Every shard is done for this round and nothing is in flight.
    pub(super) fn is_exhausted(&self) -> bool {
        self.shards
            .iter()
            .all(|state| state.phase == ShardPhase::Terminated)
    }

    /// Shards to dispatch now: eligible idle shards, most-behind offset first
    /// (ties by shard index), at most `capacity` of them.
    pub(super) fn next_dispatch(&self, now: Instant, capacity: usize) -> Vec<ShardId> {
        let mut eligible: Vec<&ShardState> = self
            .shards
            .iter()
            .filter(|state| state.is_eligible(now))
            .collect();
        eligible.sort_by(|a, b| a.offset.cmp(&b.offset).then(a.shard.cmp(&b.shard)));
        eligible
            .into_iter()
            .take(capacity)
            .map(|state| state.shard)
            .collect()
    }

    /// Mark a shard as scanning and return its pre-scan offset.
    pub(super) fn begin_scan(&mut self, shard: ShardId) -> Option<Offset> {
        let state = self.shards.get_mut(shard.index())?;
        state.phase = ShardPhase::Scanning;
        Some(state.offset.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn board(offsets: &[i64]) -> ShardBoard {
        ShardBoard::new(
            offsets
                .iter()
                .enumerate()
                .map(|(index, offset)| ShardState::new(ShardId(index), Offset::Int(*offset)))
                .collect(),
        )
    }

    #[test]
    fn dispatches_most_behind_shards_first() {
        let board = board(&[30, 10, 20, 10]);
        let now = Instant::now();
        assert_eq!(board.next_dispatch(now, 3), vec![ShardId(1), ShardId(3), ShardId(2)]);
        assert!(board.next_dispatch(now, 0).is_empty());
    }

    #[test]
    fn scanning_and_backed_off_shards_are_skipped() {
        let mut board = board(&[1, 2, 3]);
        let now = Instant::now();
        board.begin_scan(ShardId(0));
        if let Some(state) = board.get_mut(ShardId(1)) {
            state.fail(now + Duration::from_secs(5));
        }
        assert_eq!(board.next_dispatch(now, 3), vec![ShardId(2)]);
        assert_eq!(board.scanning(), 1);
        assert_eq!(
            board.next_dispatch(now + Duration::from_secs(6), 3),
            vec![ShardId(1), ShardId(2)]
        );
    }

    #[test]
    fn empty_scans_terminate_one_shot_shards() {
        let mut board = board(&[5]);
        let now = Instant::now();
        board.begin_scan(ShardId(0));
        let state = board.get_mut(ShardId(0)).expect("shard 0");
        state.complete(Offset::Int(5), WaitMode::OneShot, now);
        assert_eq!(state.phase, ShardPhase::Terminated);
        assert!(board.is_exhausted());
    }

    #[test]
    fn empty_scans_delay_continuous_shards() {
        let mut board = board(&[5]);
        let now = Instant::now();
        let poll = Duration::from_millis(200);
        board.begin_scan(ShardId(0));
        if let Some(state) = board.get_mut(ShardId(0)) {
            state.complete(Offset::Int(5), WaitMode::Continuous { poll_interval: poll }, now);
        }
        assert!(!board.is_exhausted());
        assert!(board.next_dispatch(now, 1).is_empty());
        assert_eq!(board.next_dispatch(now + poll, 1), vec![ShardId(0)]);
    }

    #[test]
    fn moved_offsets_revive_terminated_shards() {
        let mut board = board(&[5]);
        let now = Instant::now();
        let state = board.get_mut(ShardId(0)).expect("shard 0");
        state.complete(Offset::Int(5), WaitMode::OneShot, now);
        assert_eq!(state.adopt(Offset::Int(5)), None);
        assert_eq!(state.adopt(Offset::Int(2)), Some(Offset::Int(5)));
        assert_eq!(state.phase, ShardPhase::Idle);
    }
}
