//! Per-channel statistics (§4.5 Stats, §5 concurrency notes).
//!
//! Counters use relaxed atomics because `swap()` may be called from a
//! monitor thread while the owning loop keeps posting/receiving.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

///////////////////////////////////////////////////////////////////////////////
//  structs
///////////////////////////////////////////////////////////////////////////////

/// A paired (messages, bytes) counter.
#[derive(Default)]
pub struct PairCounter {
  messages: AtomicU64,
  bytes: AtomicU64,
}

/// A snapshot of a [`PairCounter`] taken by `swap`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub struct PairSnapshot {
  pub messages: u64,
  pub bytes: u64,
}

/// Tracks per-message processing duration: count, sum, min, max (all in ns).
#[derive(Default)]
pub struct TimeAggregator {
  count: AtomicU64,
  sum_ns: AtomicU64,
  min_ns: AtomicI64,
  max_ns: AtomicU64,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub struct TimeSnapshot {
  pub count: u64,
  pub sum_ns: u64,
  pub min_ns: i64,
  pub max_ns: u64,
}

/// The stat entry contributed to the context's stat list by a channel
/// constructed with `stat=yes`.
#[derive(Default)]
pub struct StatBlock {
  pub name: String,
  pub rx: PairCounter,
  pub tx: PairCounter,
  pub time: TimeAggregator,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub struct StatSnapshot {
  pub rx: PairSnapshot,
  pub tx: PairSnapshot,
  pub time: TimeSnapshot,
}

///////////////////////////////////////////////////////////////////////////////
//  impls
///////////////////////////////////////////////////////////////////////////////

impl PairCounter {
  pub fn add(&self, messages: u64, bytes: u64) {
    self.messages.fetch_add(messages, Ordering::Relaxed);
    self.bytes.fetch_add(bytes, Ordering::Relaxed);
  }

  /// Atomically read and zero the counters.
  pub fn swap(&self) -> PairSnapshot {
    PairSnapshot {
      messages: self.messages.swap(0, Ordering::Relaxed),
      bytes: self.bytes.swap(0, Ordering::Relaxed),
    }
  }
}

impl TimeAggregator {
  pub fn observe(&self, duration_ns: i64) {
    self.count.fetch_add(1, Ordering::Relaxed);
    self.sum_ns.fetch_add(duration_ns as u64, Ordering::Relaxed);
    self.max_ns.fetch_max(duration_ns as u64, Ordering::Relaxed);
    // AtomicI64::fetch_min keeps the *smallest observed* value; initialize
    // lazily by racing the first observation in as a floor via fetch_min
    // against i64::MAX on first use is unnecessary: fetch_min with the
    // default-initialized 0 would never let a positive duration win, so we
    // special-case the "never observed" state as `count == 0` upstream.
    self
      .min_ns
      .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cur| {
        Some(if self.count.load(Ordering::Relaxed) <= 1 { duration_ns } else { cur.min(duration_ns) })
      })
      .ok();
  }

  pub fn swap(&self) -> TimeSnapshot {
    TimeSnapshot {
      count: self.count.swap(0, Ordering::Relaxed),
      sum_ns: self.sum_ns.swap(0, Ordering::Relaxed),
      min_ns: self.min_ns.swap(0, Ordering::Relaxed),
      max_ns: self.max_ns.swap(0, Ordering::Relaxed),
    }
  }
}

impl StatBlock {
  pub fn new(name: impl Into<String>) -> Self {
    StatBlock { name: name.into(), rx: PairCounter::default(), tx: PairCounter::default(), time: TimeAggregator::default() }
  }

  /// Atomically read and zero every counter in this block.
  pub fn swap(&self) -> StatSnapshot {
    StatSnapshot { rx: self.rx.swap(), tx: self.tx.swap(), time: self.time.swap() }
  }
}

///////////////////////////////////////////////////////////////////////////////
//  tests
///////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn swap_is_idempotent_when_quiescent() {
    let block = StatBlock::new("c");
    let first = block.swap();
    let second = block.swap();
    assert_eq!(first, second);
    assert_eq!(first, StatSnapshot::default());
  }

  #[test]
  fn pair_counter_accumulates_then_resets() {
    let pair = PairCounter::default();
    pair.add(1, 3);
    pair.add(1, 4);
    let snap = pair.swap();
    assert_eq!(snap, PairSnapshot { messages: 2, bytes: 7 });
    assert_eq!(pair.swap(), PairSnapshot::default());
  }

  #[test]
  fn time_aggregator_tracks_min_max() {
    let agg = TimeAggregator::default();
    agg.observe(100);
    agg.observe(10);
    agg.observe(50);
    let snap = agg.swap();
    assert_eq!(snap.count, 3);
    assert_eq!(snap.sum_ns, 160);
    assert_eq!(snap.min_ns, 10);
    assert_eq!(snap.max_ns, 100);
  }
}
