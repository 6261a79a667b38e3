//! Sliding-window counters keyed by caller and window.
//!
//! Each window is a ring of fixed sub-buckets ("slots"). A touch lands in the
//! slot covering `now`; a read sums the slots still inside the window. With
//! `N` slots over a window of length `W`, a touch stops counting somewhere
//! between `W - W/N` and `W` after it happened, so the boundary error is at
//! most one slot (100 ms for the per-second window, 1 s for per-minute ones).
//!
//! Entries live in a sharded concurrent map. Touches on the same key are
//! serialized by the shard lock; unrelated keys in other shards never wait on
//! each other. Memory is bounded two ways: entries idle for twice their
//! window expire, and a new key must reserve one of `max_entries` slots
//! before it is inserted. At capacity the store first purges expired entries
//! and otherwise evicts the least recently touched entry in the whole map,
//! rejecting the key only if that cannot make room. Eviction scans the map,
//! so it only runs once the store is full.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::clock::Clock;
use super::identity::Identifier;

/// Default bound on the number of live counter entries.
pub const DEFAULT_MAX_ENTRIES: usize = 100_000;

/// Evictions attempted before a new key is rejected.
const EVICTION_ATTEMPTS: usize = 4;

/// The windows a tier quota can be enforced over.
///
/// Variants are ordered smallest window first; when several windows are
/// exceeded at once the first one in this order is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    /// Requests per second
    Second,
    /// Requests per minute
    Minute,
    /// Uploaded bytes per minute
    BytesIn,
    /// Downloaded bytes per minute
    BytesOut,
}

impl WindowKind {
    /// Every window, in reporting order.
    pub const ALL: [WindowKind; 4] = [
        WindowKind::Second,
        WindowKind::Minute,
        WindowKind::BytesIn,
        WindowKind::BytesOut,
    ];

    /// Get the duration of this window.
    pub fn duration(&self) -> Duration {
        match self {
            WindowKind::Second => Duration::from_secs(1),
            WindowKind::Minute | WindowKind::BytesIn | WindowKind::BytesOut => {
                Duration::from_secs(60)
            }
        }
    }

    /// Number of slots the window is divided into.
    pub fn slots(&self) -> usize {
        match self {
            WindowKind::Second => 10,
            WindowKind::Minute | WindowKind::BytesIn | WindowKind::BytesOut => 60,
        }
    }

    /// Length of one slot.
    pub fn slot_length(&self) -> Duration {
        self.duration() / self.slots() as u32
    }

    /// Idle time after which an entry for this window may be evicted.
    pub fn ttl(&self) -> Duration {
        self.duration() * 2
    }

    /// Whether the window accumulates bytes rather than requests.
    pub fn counts_bytes(&self) -> bool {
        matches!(self, WindowKind::BytesIn | WindowKind::BytesOut)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WindowKind::Second => "second",
            WindowKind::Minute => "minute",
            WindowKind::BytesIn => "bytes_in",
            WindowKind::BytesOut => "bytes_out",
        }
    }
}

impl fmt::Display for WindowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A key that uniquely identifies one counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    pub identifier: Identifier,
    pub window: WindowKind,
}

impl CounterKey {
    pub fn new(identifier: Identifier, window: WindowKind) -> Self {
        Self { identifier, window }
    }
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.identifier, self.window)
    }
}

/// The store is full and no room could be made for a new key.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("counter store is at capacity ({capacity} entries)")]
pub struct CapacityExceeded {
    pub capacity: usize,
}

/// A counter value together with when it will next drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowReading {
    /// Sum of everything touched inside the window.
    pub value: u64,
    /// Time until the oldest in-window slot rolls out; zero when empty.
    pub reset_in: Duration,
}

impl WindowReading {
    /// Reading of a window with nothing in it.
    pub const EMPTY: WindowReading = WindowReading {
        value: 0,
        reset_in: Duration::ZERO,
    };
}

#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    index: u64,
    value: u64,
}

/// Ring of slots covering one window.
#[derive(Debug, Clone)]
struct SlidingWindow {
    slot_ms: u64,
    slots: Box<[Slot]>,
    /// Newest slot index written. Late writers are folded into it so a
    /// stale `now` can never overwrite newer data.
    head: u64,
}

impl SlidingWindow {
    fn new(window: WindowKind) -> Self {
        Self {
            slot_ms: window.slot_length().as_millis() as u64,
            slots: vec![Slot::default(); window.slots()].into_boxed_slice(),
            head: 0,
        }
    }

    fn len(&self) -> u64 {
        self.slots.len() as u64
    }

    fn slot_at(&self, now_ms: u64) -> u64 {
        (now_ms / self.slot_ms).max(self.head)
    }

    fn add(&mut self, now_ms: u64, amount: u64) {
        let index = self.slot_at(now_ms);
        self.head = index;
        let position = (index % self.len()) as usize;
        let slot = &mut self.slots[position];
        if slot.index != index {
            *slot = Slot { index, value: 0 };
        }
        slot.value = slot.value.saturating_add(amount);
    }

    fn in_window(&self, slot: &Slot, current: u64) -> bool {
        slot.value > 0 && slot.index <= current && slot.index + self.len() > current
    }

    fn read(&self, now_ms: u64) -> WindowReading {
        let current = self.slot_at(now_ms);
        let mut value = 0u64;
        let mut oldest: Option<u64> = None;

        for slot in self.slots.iter().filter(|s| self.in_window(s, current)) {
            value = value.saturating_add(slot.value);
            oldest = Some(oldest.map_or(slot.index, |o| o.min(slot.index)));
        }

        let reset_in = oldest.map_or(Duration::ZERO, |index| {
            let rolls_out_ms = (index + self.len()) * self.slot_ms;
            Duration::from_millis(rolls_out_ms.saturating_sub(now_ms))
        });

        WindowReading { value, reset_in }
    }

    fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = Slot::default());
    }
}

/// State for one (identifier, window) pair.
#[derive(Debug, Clone)]
struct CounterEntry {
    window: SlidingWindow,
    ttl: Duration,
    last_touched: Instant,
    expires_at: Instant,
}

impl CounterEntry {
    fn new(window: WindowKind, now: Instant) -> Self {
        Self {
            window: SlidingWindow::new(window),
            ttl: window.ttl(),
            last_touched: now,
            expires_at: now + window.ttl(),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    fn record(&mut self, amount: u64, now: Instant, now_ms: u64) -> WindowReading {
        if self.is_expired(now) {
            self.window.clear();
        }
        self.window.add(now_ms, amount);
        if now > self.last_touched {
            self.last_touched = now;
            self.expires_at = now + self.ttl;
        }
        self.window.read(now_ms)
    }

    fn read(&self, now: Instant, now_ms: u64) -> WindowReading {
        if self.is_expired(now) {
            return WindowReading::EMPTY;
        }
        self.window.read(now_ms)
    }
}

/// Concurrent, bounded store of sliding-window counters.
#[derive(Debug)]
pub struct CounterStore {
    entries: DashMap<CounterKey, CounterEntry>,
    max_entries: usize,
    /// Slots held by live entries and by admissions about to insert.
    reserved: AtomicUsize,
    /// Origin of slot numbering.
    epoch: Instant,
}

impl CounterStore {
    /// Create a store bounded to `max_entries` live counters.
    pub fn new(max_entries: usize) -> Self {
        Self::with_epoch(max_entries, Instant::now())
    }

    /// Create a store whose slot boundaries are aligned to `epoch`.
    ///
    /// Instants earlier than `epoch` are treated as `epoch`.
    pub fn with_epoch(max_entries: usize, epoch: Instant) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries,
            reserved: AtomicUsize::new(0),
            epoch,
        }
    }

    fn millis(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.epoch).as_millis() as u64
    }

    /// Add `amount` to the counter for `key` and return the new in-window total.
    pub fn touch(
        &self,
        key: &CounterKey,
        amount: u64,
        now: Instant,
    ) -> Result<u64, CapacityExceeded> {
        self.touch_reading(key, amount, now).map(|reading| reading.value)
    }

    /// Like [`touch`](Self::touch), also reporting when the window next drops.
    pub fn touch_reading(
        &self,
        key: &CounterKey,
        amount: u64,
        now: Instant,
    ) -> Result<WindowReading, CapacityExceeded> {
        let now_ms = self.millis(now);

        if let Some(mut entry) = self.entries.get_mut(key) {
            return Ok(entry.record(amount, now, now_ms));
        }

        self.admit(now)?;

        match self.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                // another caller inserted the key first
                self.release(1);
                Ok(occupied.get_mut().record(amount, now, now_ms))
            }
            Entry::Vacant(vacant) => {
                trace!(key = %key, "Creating counter entry");
                let mut entry = vacant.insert(CounterEntry::new(key.window, now));
                Ok(entry.record(amount, now, now_ms))
            }
        }
    }

    /// Read the in-window total for `key` without modifying it.
    pub fn peek(&self, key: &CounterKey, now: Instant) -> u64 {
        self.reading(key, now).value
    }

    /// Read the in-window total and reset hint for `key`.
    pub fn reading(&self, key: &CounterKey, now: Instant) -> WindowReading {
        let now_ms = self.millis(now);
        self.entries
            .get(key)
            .map_or(WindowReading::EMPTY, |entry| entry.read(now, now_ms))
    }

    /// Reserve a slot for one new entry, evicting if the store is full.
    fn admit(&self, now: Instant) -> Result<(), CapacityExceeded> {
        for _ in 0..EVICTION_ATTEMPTS {
            if self.try_reserve() {
                return Ok(());
            }
            if !self.evict_one(now) {
                break;
            }
        }

        if self.try_reserve() {
            return Ok(());
        }

        warn!(
            capacity = self.max_entries,
            "Counter store full, rejecting new key"
        );
        Err(CapacityExceeded {
            capacity: self.max_entries,
        })
    }

    fn try_reserve(&self) -> bool {
        self.reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |held| {
                (held < self.max_entries).then_some(held + 1)
            })
            .is_ok()
    }

    fn release(&self, count: usize) {
        if count > 0 {
            self.reserved.fetch_sub(count, Ordering::AcqRel);
        }
    }

    /// Free at least one slot.
    ///
    /// Expired entries go first. Otherwise the least recently touched entry
    /// in the map is removed, unless it was touched again meanwhile.
    fn evict_one(&self, now: Instant) -> bool {
        if self.purge_expired(now) > 0 {
            return true;
        }

        let victim = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().last_touched)
            .map(|entry| (entry.key().clone(), entry.value().last_touched));

        let Some((key, seen)) = victim else {
            return false;
        };

        let removed = self
            .entries
            .remove_if(&key, |_, entry| entry.last_touched <= seen);
        if removed.is_some() {
            debug!(key = %key, "Evicting counter entry to admit a new key");
            self.release(1);
        }
        true
    }

    /// Remove every entry idle for longer than twice its window.
    ///
    /// Returns the number of entries removed.
    pub fn purge_expired(&self, now: Instant) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let keep = !entry.is_expired(now);
            if !keep {
                removed += 1;
            }
            keep
        });
        self.release(removed);
        if removed > 0 {
            debug!(
                removed = removed,
                remaining = self.entries.len(),
                "Purged expired counters"
            );
        }
        removed
    }

    /// Spawn a background task purging expired entries every `interval`.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.purge_expired(clock.now());
            }
        })
    }

    /// Get the number of live entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get the configured entry bound.
    pub fn capacity(&self) -> usize {
        self.max_entries
    }

    /// Clear all counters.
    pub fn clear(&self) {
        let mut removed = 0;
        self.entries.retain(|_, _| {
            removed += 1;
            false
        });
        self.release(removed);
    }
}

impl Default for CounterStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(id: &str, window: WindowKind) -> CounterKey {
        CounterKey::new(Identifier::from(id), window)
    }

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn test_window_durations() {
        assert_eq!(WindowKind::Second.duration(), Duration::from_secs(1));
        assert_eq!(WindowKind::Minute.duration(), Duration::from_secs(60));
        assert_eq!(WindowKind::BytesIn.slot_length(), Duration::from_secs(1));
        assert_eq!(WindowKind::Second.slot_length(), ms(100));
        assert_eq!(WindowKind::BytesOut.ttl(), Duration::from_secs(120));
    }

    #[test]
    fn test_windows_order_smallest_first() {
        let mut windows = vec![WindowKind::BytesOut, WindowKind::Minute, WindowKind::Second];
        windows.sort();
        assert_eq!(windows, vec![WindowKind::Second, WindowKind::Minute, WindowKind::BytesOut]);
    }

    #[test]
    fn test_touch_returns_post_increment_value() {
        let start = Instant::now();
        let store = CounterStore::with_epoch(100, start);
        let k = key("a", WindowKind::Minute);

        assert_eq!(store.touch(&k, 1, start).unwrap(), 1);
        assert_eq!(store.touch(&k, 1, start + ms(10)).unwrap(), 2);
        assert_eq!(store.touch(&k, 5, start + ms(20)).unwrap(), 7);
        assert_eq!(store.peek(&k, start + ms(30)), 7);
    }

    #[test]
    fn test_peek_does_not_create_entries() {
        let store = CounterStore::new(10);
        assert_eq!(store.peek(&key("ghost", WindowKind::Second), Instant::now()), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn test_second_window_rolls_after_one_second() {
        let start = Instant::now();
        let store = CounterStore::with_epoch(100, start);
        let k = key("a", WindowKind::Second);

        for i in 0..5 {
            store.touch(&k, 1, start + ms(i * 10)).unwrap();
        }
        assert_eq!(store.peek(&k, start + ms(900)), 5);
        assert_eq!(store.peek(&k, start + ms(1000)), 0);
    }

    #[test]
    fn test_sliding_window_drops_only_aged_slots() {
        let start = Instant::now();
        let store = CounterStore::with_epoch(100, start);
        let k = key("a", WindowKind::Minute);

        store.touch(&k, 3, start).unwrap();
        store.touch(&k, 4, start + Duration::from_secs(30)).unwrap();

        assert_eq!(store.peek(&k, start + Duration::from_secs(59)), 7);
        assert_eq!(store.peek(&k, start + Duration::from_secs(60)), 4);
        assert_eq!(store.peek(&k, start + Duration::from_secs(90)), 0);
    }

    #[test]
    fn test_reset_hint_points_at_oldest_slot() {
        let start = Instant::now();
        let store = CounterStore::with_epoch(100, start);
        let k = key("a", WindowKind::Minute);

        store.touch(&k, 1, start + Duration::from_secs(10)).unwrap();
        store.touch(&k, 1, start + Duration::from_secs(20)).unwrap();

        let reading = store.reading(&k, start + Duration::from_secs(25));
        assert_eq!(reading.value, 2);
        assert_eq!(reading.reset_in, Duration::from_secs(45));
    }

    #[test]
    fn test_byte_accumulation() {
        let start = Instant::now();
        let store = CounterStore::with_epoch(100, start);
        let k = key("a", WindowKind::BytesIn);

        store.touch(&k, 1_048_576, start).unwrap();
        store.touch(&k, 512, start + ms(1500)).unwrap();
        assert_eq!(store.peek(&k, start + ms(2000)), 1_049_088);

        // zero-amount touches read without adding
        assert_eq!(store.touch(&k, 0, start + ms(2500)).unwrap(), 1_049_088);
    }

    #[test]
    fn test_stale_now_does_not_clobber_newer_slot() {
        let start = Instant::now();
        let store = CounterStore::with_epoch(100, start);
        let k = key("a", WindowKind::Second);

        // slot 10 shares a ring position with slot 0
        store.touch(&k, 2, start + ms(1000)).unwrap();
        store.touch(&k, 3, start).unwrap();

        assert_eq!(store.peek(&k, start + ms(1000)), 5);
    }

    #[test]
    fn test_expired_entry_reads_zero_and_is_purged() {
        let start = Instant::now();
        let store = CounterStore::with_epoch(100, start);
        let k = key("a", WindowKind::Second);

        store.touch(&k, 1, start).unwrap();
        assert_eq!(store.purge_expired(start + ms(1999)), 0);
        assert_eq!(store.peek(&k, start + ms(2000)), 0);
        assert_eq!(store.purge_expired(start + ms(2000)), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_touch_refreshes_expiry() {
        let start = Instant::now();
        let store = CounterStore::with_epoch(100, start);
        let k = key("a", WindowKind::Second);

        store.touch(&k, 1, start).unwrap();
        store.touch(&k, 1, start + ms(1500)).unwrap();
        assert_eq!(store.purge_expired(start + ms(2500)), 0);
        assert_eq!(store.peek(&k, start + ms(2400)), 1);
    }

    #[test]
    fn test_capacity_evicts_least_recently_touched() {
        let start = Instant::now();
        let store = CounterStore::with_epoch(3, start);

        store.touch(&key("old", WindowKind::Minute), 1, start).unwrap();
        store.touch(&key("mid", WindowKind::Minute), 1, start + ms(10)).unwrap();
        store.touch(&key("new", WindowKind::Minute), 1, start + ms(20)).unwrap();

        store.touch(&key("next", WindowKind::Minute), 1, start + ms(30)).unwrap();

        assert_eq!(store.len(), 3);
        assert_eq!(store.peek(&key("old", WindowKind::Minute), start + ms(40)), 0);
        assert_eq!(store.peek(&key("mid", WindowKind::Minute), start + ms(40)), 1);
        assert_eq!(store.peek(&key("next", WindowKind::Minute), start + ms(40)), 1);
    }

    #[test]
    fn test_eviction_picks_the_stalest_key_across_the_whole_map() {
        let start = Instant::now();
        let store = CounterStore::with_epoch(256, start);
        let names: Vec<String> = (0..256).map(|i| format!("key-{}", i)).collect();

        for name in &names {
            store.touch(&key(name, WindowKind::Minute), 1, start).unwrap();
        }

        let stale = "key-173";
        let later = start + Duration::from_secs(30);
        for name in names.iter().filter(|n| n.as_str() != stale) {
            store.touch(&key(name, WindowKind::Minute), 1, later).unwrap();
        }

        let admitted = start + Duration::from_secs(31);
        store.touch(&key("newcomer", WindowKind::Minute), 1, admitted).unwrap();

        assert_eq!(store.len(), 256);
        assert_eq!(store.peek(&key(stale, WindowKind::Minute), admitted), 0);
        for name in names.iter().filter(|n| n.as_str() != stale) {
            assert_eq!(store.peek(&key(name, WindowKind::Minute), admitted), 2, "{}", name);
        }
    }

    #[test]
    fn test_capacity_prefers_expired_entries() {
        let start = Instant::now();
        let store = CounterStore::with_epoch(2, start);

        store.touch(&key("burst", WindowKind::Second), 1, start).unwrap();
        store.touch(&key("steady", WindowKind::Minute), 1, start).unwrap();

        let later = start + Duration::from_secs(5);
        store.touch(&key("next", WindowKind::Minute), 1, later).unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.peek(&key("steady", WindowKind::Minute), later), 1);
        assert_eq!(store.peek(&key("next", WindowKind::Minute), later), 1);
    }

    #[test]
    fn test_concurrent_new_keys_never_exceed_capacity() {
        use std::thread;

        let start = Instant::now();
        let store = Arc::new(CounterStore::with_epoch(50, start));
        let mut handles = vec![];

        for t in 0..8u64 {
            let store = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                for i in 0..200u64 {
                    let k = key(&format!("t{}-{}", t, i), WindowKind::Minute);
                    let _ = store.touch(&k, 1, start + ms(i));
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(store.len() <= 50);
        assert!(!store.is_empty());
    }

    #[test]
    fn test_clear_frees_capacity() {
        let start = Instant::now();
        let store = CounterStore::with_epoch(1, start);

        store.touch(&key("a", WindowKind::Minute), 1, start).unwrap();
        store.clear();
        assert!(store.is_empty());
        store.touch(&key("b", WindowKind::Minute), 1, start).unwrap();
        assert_eq!(store.peek(&key("a", WindowKind::Minute), start), 0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_existing_keys_are_never_rejected_at_capacity() {
        let start = Instant::now();
        let store = CounterStore::with_epoch(1, start);
        let k = key("only", WindowKind::Second);

        store.touch(&k, 1, start).unwrap();
        assert_eq!(store.touch(&k, 1, start + ms(1)).unwrap(), 2);
    }

    #[test]
    fn test_zero_capacity_rejects_new_keys() {
        let store = CounterStore::new(0);
        let result = store.touch(&key("a", WindowKind::Second), 1, Instant::now());
        assert_eq!(result, Err(CapacityExceeded { capacity: 0 }));
    }

    #[test]
    fn test_concurrent_touches_lose_no_updates() {
        use std::thread;

        let start = Instant::now();
        let store = Arc::new(CounterStore::with_epoch(100, start));
        let k = key("shared", WindowKind::Minute);
        let mut handles = vec![];

        for _ in 0..8 {
            let store = Arc::clone(&store);
            let k = k.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    store.touch(&k, 3, start + ms(5)).unwrap();
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.peek(&k, start + ms(10)), 8 * 1000 * 3);
    }

    #[tokio::test]
    async fn test_sweeper_purges_expired_entries() {
        use crate::ratelimit::clock::ManualClock;

        let start = Instant::now();
        let clock = ManualClock::new(start);
        let store = Arc::new(CounterStore::with_epoch(100, start));
        store.touch(&key("a", WindowKind::Second), 1, start).unwrap();
        store.touch(&key("b", WindowKind::Minute), 1, start).unwrap();

        clock.advance(Duration::from_secs(3));
        let handle = Arc::clone(&store).spawn_sweeper(Arc::new(clock), ms(10));
        tokio::time::sleep(ms(100)).await;
        handle.abort();

        assert_eq!(store.len(), 1);
        let later = start + Duration::from_secs(3);
        assert_eq!(store.peek(&key("b", WindowKind::Minute), later), 1);
    }
}
