//! A cache of already-answered source events, keyed by event id.
//!
//! Bounded by count (LRU, floor 1024 entries) and by age (entries older
//! than 10 minutes are evicted lazily on insert/lookup), so a relay
//! retransmission of a request already answered replays the cached
//! response instead of re-executing a payment.

use std::num::NonZeroUsize;

use lru::LruCache;
use nostr_sdk::EventId;

/// Minimum cache capacity, enforced regardless of the configured value.
pub const MIN_CAPACITY: usize = 1024;
/// Minimum retention window, in seconds, enforced regardless of the
/// configured value.
pub const MIN_RETENTION_SECS: u64 = 10 * 60;

/// A cached outcome for a previously handled source event.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    /// The serialized, already-encrypted response content(s), one per
    /// response event that was published for this source event (more
    /// than one for multi-* methods).
    pub response_events: Vec<nostr_sdk::Event>,
    /// Wall-clock time the entry was inserted, for age-based eviction.
    pub inserted_at: u64,
}

/// An LRU cache of [`CachedResponse`] keyed by source event id.
#[derive(Debug)]
pub struct PendingCache {
    inner: LruCache<EventId, CachedResponse>,
    retention_secs: u64,
}

impl PendingCache {
    /// Creates a cache with at least [`MIN_CAPACITY`] entries and at least
    /// [`MIN_RETENTION_SECS`] retention.
    pub fn new(capacity: usize, retention_secs: u64) -> Self {
        let capacity = capacity.max(MIN_CAPACITY);
        let retention_secs = retention_secs.max(MIN_RETENTION_SECS);
        PendingCache {
            inner: LruCache::new(NonZeroUsize::new(capacity).expect("capacity is nonzero")),
            retention_secs,
        }
    }

    /// Looks up a cached response, treating entries older than the
    /// retention window as absent (but not evicting them here — eviction
    /// happens lazily on the next [`insert`](Self::insert)).
    pub fn get(&mut self, event_id: &EventId, now: u64) -> Option<&CachedResponse> {
        let entry = self.inner.get(event_id)?;
        if now.saturating_sub(entry.inserted_at) > self.retention_secs {
            return None;
        }
        self.inner.get(event_id)
    }

    /// Records the outcome for a source event id, evicting any entries
    /// that have aged out of the retention window.
    pub fn insert(&mut self, event_id: EventId, response_events: Vec<nostr_sdk::Event>, now: u64) {
        self.evict_expired(now);
        self.inner.put(
            event_id,
            CachedResponse {
                response_events,
                inserted_at: now,
            },
        );
    }

    fn evict_expired(&mut self, now: u64) {
        let stale: Vec<EventId> = self
            .inner
            .iter()
            .filter(|(_, entry)| now.saturating_sub(entry.inserted_at) > self.retention_secs)
            .map(|(id, _)| *id)
            .collect();
        for id in stale {
            self.inner.pop(&id);
        }
    }
}

impl Default for PendingCache {
    fn default() -> Self {
        Self::new(MIN_CAPACITY, MIN_RETENTION_SECS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nostr_sdk::{EventBuilder, Keys, Kind};

    fn dummy_event() -> nostr_sdk::Event {
        EventBuilder::new(Kind::TextNote, "x", vec![])
            .to_event(&Keys::generate())
            .unwrap()
    }

    #[test]
    fn enforces_capacity_and_retention_floors() {
        let cache = PendingCache::new(1, 1);
        assert_eq!(cache.inner.cap().get(), MIN_CAPACITY);
        assert_eq!(cache.retention_secs, MIN_RETENTION_SECS);
    }

    fn dummy_id() -> EventId {
        EventId::from_hex("d30e6c857a900ebefbf7dc3b678ead9215f4345476067e146ded973971286529")
            .unwrap()
    }

    #[test]
    fn replays_cached_response_within_window() {
        let mut cache = PendingCache::new(MIN_CAPACITY, MIN_RETENTION_SECS);
        let id = dummy_id();
        cache.insert(id, vec![dummy_event()], 1_000);
        assert!(cache.get(&id, 1_000 + 60).is_some());
    }

    #[test]
    fn treats_entries_outside_retention_as_absent() {
        let mut cache = PendingCache::new(MIN_CAPACITY, MIN_RETENTION_SECS);
        let id = dummy_id();
        cache.insert(id, vec![dummy_event()], 1_000);
        assert!(cache.get(&id, 1_000 + MIN_RETENTION_SECS + 1).is_none());
    }
}
