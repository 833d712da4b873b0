//! Background-recomputation work queue (§4.F "Background updater").

use std::collections::VecDeque;
use std::sync::Mutex;

use super::{now_secs, BitmapKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub key: BitmapKey,
    pub priority: i32,
    pub status: QueueStatus,
    pub enqueued_at: u64,
    pub status_changed_at: u64,
}

/// `pending -> processing -> completed | failed`; completed rows are
/// reaped after 24h; stuck `processing` rows are demoted back to
/// `pending` by a max-age sweep (§16 open-question decision: 5 minutes).
pub struct TigerUpdateQueue {
    entries: Mutex<VecDeque<QueueEntry>>,
    reap_after_secs: u64,
    stale_processing_secs: u64,
}

impl TigerUpdateQueue {
    pub fn new() -> Self {
        Self { entries: Mutex::new(VecDeque::new()), reap_after_secs: 24 * 3600, stale_processing_secs: 300 }
    }

    pub fn queue_update(&self, key: BitmapKey, priority: i32) {
        let mut entries = self.entries.lock().unwrap();
        if entries.iter().any(|e| e.key == key && e.status == QueueStatus::Pending) {
            return;
        }
        let now = now_secs();
        entries.push_back(QueueEntry { key, priority, status: QueueStatus::Pending, enqueued_at: now, status_changed_at: now });
    }

    /// Pop the highest-priority pending entry and mark it `processing`.
    pub fn pop_next(&self) -> Option<QueueEntry> {
        let mut entries = self.entries.lock().unwrap();
        let idx = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.status == QueueStatus::Pending)
            .max_by_key(|(_, e)| e.priority)
            .map(|(i, _)| i)?;
        entries[idx].status = QueueStatus::Processing;
        entries[idx].status_changed_at = now_secs();
        Some(entries[idx].clone())
    }

    pub fn mark_completed(&self, key: &BitmapKey) {
        self.set_status(key, QueueStatus::Completed);
    }

    /// A database-lock error during processing does not re-throw; the
    /// row is left in `processing` for retry (§4.F "Background
    /// updater").
    pub fn mark_failed_leave_for_retry(&self, _key: &BitmapKey) {}

    fn set_status(&self, key: &BitmapKey, status: QueueStatus) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.iter_mut().find(|e| &e.key == key) {
            entry.status = status;
            entry.status_changed_at = now_secs();
        }
    }

    /// Opportunistic maintenance tick (§16 decision): reap old
    /// `completed` rows and demote stuck `processing` rows back to
    /// `pending`.
    pub fn tick(&self) {
        let now = now_secs();
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|e| !(e.status == QueueStatus::Completed && now.saturating_sub(e.status_changed_at) > self.reap_after_secs));
        for entry in entries.iter_mut() {
            if entry.status == QueueStatus::Processing && now.saturating_sub(entry.status_changed_at) > self.stale_processing_secs {
                entry.status = QueueStatus::Pending;
                entry.status_changed_at = now;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TigerUpdateQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> BitmapKey {
        BitmapKey {
            subject_type: "user".to_string(),
            subject_id: "alice".to_string(),
            permission: "read".to_string(),
            resource_type: "file".to_string(),
            zone_id: None,
        }
    }

    #[test]
    fn queue_then_pop_transitions_to_processing() {
        let q = TigerUpdateQueue::new();
        q.queue_update(key(), 1);
        let entry = q.pop_next().unwrap();
        assert_eq!(entry.status, QueueStatus::Processing);
        assert!(q.pop_next().is_none(), "no other pending entries");
    }

    #[test]
    fn higher_priority_pops_first() {
        let q = TigerUpdateQueue::new();
        let low = BitmapKey { subject_id: "low".to_string(), ..key() };
        let high = BitmapKey { subject_id: "high".to_string(), ..key() };
        q.queue_update(low, 1);
        q.queue_update(high.clone(), 10);
        let entry = q.pop_next().unwrap();
        assert_eq!(entry.key, high);
    }

    #[test]
    fn duplicate_pending_entries_are_not_queued_twice() {
        let q = TigerUpdateQueue::new();
        q.queue_update(key(), 1);
        q.queue_update(key(), 1);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn mark_completed_then_reaped_after_max_age() {
        let q = TigerUpdateQueue::new();
        q.queue_update(key(), 1);
        q.pop_next();
        q.mark_completed(&key());
        // simulate age by rewriting status_changed_at directly
        {
            let mut entries = q.entries.lock().unwrap();
            entries[0].status_changed_at = 0;
        }
        q.tick();
        assert!(q.is_empty());
    }
}
