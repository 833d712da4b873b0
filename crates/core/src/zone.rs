//! Per-zone monotonic revision counters (§3/§4.L): every write bumps
//! its zone's revision before the backend I/O completes, so read sets
//! recorded concurrently are never stamped with a revision that a
//! racing write could still invalidate.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

#[derive(Default)]
pub struct ZoneRevisionCounter {
    counters: DashMap<String, AtomicU64>,
}

impl ZoneRevisionCounter {
    pub fn new() -> Self {
        Self { counters: DashMap::new() }
    }

    /// Atomic increment-and-return for `zone` (`"default"` when the
    /// caller has no zone context).
    pub fn bump(&self, zone: Option<&str>) -> u64 {
        let zone = zone.unwrap_or("default");
        self.counters
            .entry(zone.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::SeqCst)
            + 1
    }

    pub fn current(&self, zone: Option<&str>) -> u64 {
        let zone = zone.unwrap_or("default");
        self.counters.get(zone).map(|c| c.load(Ordering::SeqCst)).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_is_monotonic_per_zone() {
        let counter = ZoneRevisionCounter::new();
        assert_eq!(counter.bump(Some("zoneA")), 1);
        assert_eq!(counter.bump(Some("zoneA")), 2);
        assert_eq!(counter.bump(Some("zoneB")), 1);
        assert_eq!(counter.current(Some("zoneA")), 2);
    }

    #[test]
    fn missing_zone_defaults_to_default_bucket() {
        let counter = ZoneRevisionCounter::new();
        counter.bump(None);
        assert_eq!(counter.current(Some("default")), 1);
    }
}
