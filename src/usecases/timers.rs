//! Per-match timer queue and clock.
//!
//! Each match session owns one `MatchTimers`: an ordered queue of
//! deadlines keyed by what they are for. The session loop sleeps on
//! the earliest entry only, so a match costs one pending sleep no
//! matter how many deadlines it tracks.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// What a scheduled deadline is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKey {
  /// Per-pick deadline for a global pick index.
  PickDeadline(u32),
  /// Both participants absent (or draft never started) past the ceiling.
  Abandonment,
  /// Retry fetching the draftable list.
  DraftableRetry,
  /// Competition window close.
  WindowClose,
}

/// Ordered deadline queue. Scheduling an existing key replaces it.
#[derive(Debug, Default)]
pub struct MatchTimers {
  queue: BTreeMap<(Instant, u64), TimerKey>,
  index: HashMap<TimerKey, (Instant, u64)>,
  seq: u64,
}

impl MatchTimers {
  pub fn new() -> Self {
    Self::default()
  }

  /// Schedule `key` at `at`, replacing any earlier schedule for it.
  pub fn schedule(&mut self, key: TimerKey, at: Instant) {
    self.cancel(key);
    self.seq += 1;
    let slot = (at, self.seq);
    self.queue.insert(slot, key);
    self.index.insert(key, slot);
  }

  /// Cancel `key`. Returns whether it was pending.
  pub fn cancel(&mut self, key: TimerKey) -> bool {
    match self.index.remove(&key) {
      Some(slot) => {
        self.queue.remove(&slot);
        true
      }
      None => false,
    }
  }

  pub fn cancel_all(&mut self) {
    self.queue.clear();
    self.index.clear();
  }

  pub fn is_scheduled(&self, key: TimerKey) -> bool {
    self.index.contains_key(&key)
  }

  pub fn next_deadline(&self) -> Option<Instant> {
    self.queue.keys().next().map(|(at, _)| *at)
  }

  /// Remove and return the earliest key due at or before `now`.
  pub fn pop_due(&mut self, now: Instant) -> Option<TimerKey> {
    let (&slot, &key) = self.queue.iter().next()?;
    if slot.0 > now {
      return None;
    }
    self.queue.remove(&slot);
    self.index.remove(&key);
    Some(key)
  }

  pub fn len(&self) -> usize {
    self.queue.len()
  }

  pub fn is_empty(&self) -> bool {
    self.queue.is_empty()
  }
}

/// Wall clock anchored to the tokio clock.
///
/// Wall time advances with `tokio::time::Instant`, so deadlines in
/// `TurnState` and the timers that enforce them never drift apart,
/// and paused-time tests see both move together.
#[derive(Debug, Clone, Copy)]
pub struct MatchClock {
  base_wall: DateTime<Utc>,
  base_instant: Instant,
}

impl MatchClock {
  pub fn start() -> Self {
    Self {
      base_wall: Utc::now(),
      base_instant: Instant::now(),
    }
  }

  pub fn now(&self) -> DateTime<Utc> {
    self.wall_at(Instant::now())
  }

  pub fn wall_at(&self, instant: Instant) -> DateTime<Utc> {
    let elapsed = instant.saturating_duration_since(self.base_instant);
    self.base_wall + chrono::Duration::from_std(elapsed).unwrap_or_default()
  }

  /// Tokio instant corresponding to a wall-clock deadline.
  pub fn instant_at(&self, wall: DateTime<Utc>) -> Instant {
    let offset = (wall - self.base_wall).to_std().unwrap_or(Duration::ZERO);
    self.base_instant + offset
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_pop_in_deadline_order() {
    let base = Instant::now();
    let mut timers = MatchTimers::new();
    timers.schedule(TimerKey::WindowClose, base + Duration::from_secs(30));
    timers.schedule(TimerKey::PickDeadline(0), base + Duration::from_secs(10));
    timers.schedule(TimerKey::Abandonment, base + Duration::from_secs(20));

    let now = base + Duration::from_secs(25);
    assert_eq!(timers.pop_due(now), Some(TimerKey::PickDeadline(0)));
    assert_eq!(timers.pop_due(now), Some(TimerKey::Abandonment));
    assert_eq!(timers.pop_due(now), None);
    assert_eq!(timers.len(), 1);
  }

  #[test]
  fn test_reschedule_replaces() {
    let base = Instant::now();
    let mut timers = MatchTimers::new();
    timers.schedule(TimerKey::PickDeadline(3), base + Duration::from_secs(10));
    timers.schedule(TimerKey::PickDeadline(3), base + Duration::from_secs(40));
    assert_eq!(timers.len(), 1);
    assert_eq!(timers.next_deadline(), Some(base + Duration::from_secs(40)));
  }

  #[test]
  fn test_cancel() {
    let base = Instant::now();
    let mut timers = MatchTimers::new();
    timers.schedule(TimerKey::PickDeadline(1), base);
    assert!(timers.cancel(TimerKey::PickDeadline(1)));
    assert!(!timers.cancel(TimerKey::PickDeadline(1)));
    assert!(timers.is_empty());
    assert_eq!(timers.pop_due(base + Duration::from_secs(1)), None);
  }

  #[tokio::test(start_paused = true)]
  async fn test_clock_tracks_tokio_time() {
    let clock = MatchClock::start();
    let t0 = clock.now();
    tokio::time::advance(Duration::from_secs(90)).await;
    let elapsed = clock.now() - t0;
    assert!(elapsed >= chrono::Duration::seconds(90));

    let deadline = t0 + chrono::Duration::seconds(120);
    let at = clock.instant_at(deadline);
    assert!(at > Instant::now());
  }
}
