//! Change feed backing the polling and snapshot endpoints.
//!
//! Keeps the latest event for every record the publisher has seen. Polling
//! clients ask for everything changed after a cursor; new clients ask for the
//! current collection.
//!
//! Cursors are positions on the feed's own clock, not event timestamps. Every
//! accepted change is stamped from that clock while its entry is locked, and a
//! page only covers stamps up to the clock value read before scanning, so a
//! change recorded while a poll is running always lands after the cursor that
//! poll returns.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

use crate::event::{current_time_ms, Event, EventBody, LinkRecord};
use crate::metrics::FeedMetrics;

struct Change {
    event: Arc<Event>,
    /// Feed clock value when this change was accepted
    stamp: i64,
}

/// Latest known state of every record.
pub struct ChangeFeed {
    /// record id -> last change applied to it
    latest: DashMap<String, Change>,
    /// Monotonic millisecond clock; never behind the wall clock it was read from
    clock: AtomicI64,
    tombstones: AtomicUsize,
    /// Deletions remembered before the oldest are forgotten. Live records
    /// are never evicted.
    max_tombstones: usize,
}

/// One polling page
#[derive(Debug, Clone)]
pub struct FeedPage {
    /// Cursor for the next request
    pub cursor: i64,
    /// Changes after the requested cursor, oldest event first
    pub updates: Vec<Event>,
}

/// Summary for `/stats`
#[derive(Debug, Clone, Serialize)]
pub struct FeedStats {
    pub records: usize,
    pub deleted: usize,
    pub max_tombstones: usize,
    pub cursor: i64,
}

impl ChangeFeed {
    pub fn new(max_tombstones: usize) -> Self {
        Self {
            latest: DashMap::new(),
            clock: AtomicI64::new(current_time_ms()),
            tombstones: AtomicUsize::new(0),
            max_tombstones,
        }
    }

    /// Apply an event. Snapshots are ignored; stale updates lose to newer ones.
    pub fn record(&self, event: &Event) {
        self.apply(event, None);
    }

    /// Load existing records, e.g. from the link store at startup. They keep
    /// their own update time as feed position, so clients already past it do
    /// not see them as changes.
    pub fn seed(&self, records: impl IntoIterator<Item = LinkRecord>) {
        for record in records {
            let at = record.updated_at_ms().unwrap_or(0);
            self.apply(&Event::stamped(EventBody::Created(record), at), Some(at));
        }
    }

    fn apply(&self, event: &Event, seeded_at: Option<i64>) {
        let Some(id) = event.record_id() else {
            return;
        };
        let incoming_time = event.effective_time();
        let deleting = is_deletion(event);

        // (applied, tombstone delta)
        let mut outcome = (false, 0isize);
        self.latest
            .entry(id.to_string())
            .and_modify(|current| {
                if incoming_time >= current.event.effective_time() {
                    let was_deleted = is_deletion(&current.event);
                    *current = Change {
                        event: Arc::new(event.clone()),
                        stamp: self.stamp(seeded_at),
                    };
                    outcome = (true, deleting as isize - was_deleted as isize);
                }
            })
            .or_insert_with(|| {
                outcome = (true, deleting as isize);
                Change {
                    event: Arc::new(event.clone()),
                    stamp: self.stamp(seeded_at),
                }
            });

        match outcome {
            (false, _) => tracing::debug!(
                record_id = %id,
                event_id = %event.id(),
                "Ignoring out-of-date change"
            ),
            (true, 1) => {
                self.tombstones.fetch_add(1, Ordering::SeqCst);
            }
            (true, -1) => {
                self.tombstones.fetch_sub(1, Ordering::SeqCst);
            }
            _ => {}
        }

        if self.tombstones.load(Ordering::SeqCst) > self.max_tombstones {
            self.forget_oldest_deletions();
        }
        FeedMetrics::set_retained(self.latest.len());
    }

    /// Next clock value. Seeded records keep their own time and only pull
    /// the clock forward.
    fn stamp(&self, seeded_at: Option<i64>) -> i64 {
        match seeded_at {
            Some(at) => {
                self.clock.fetch_max(at, Ordering::SeqCst);
                at
            }
            None => {
                let now = current_time_ms();
                let previous = self
                    .clock
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                        Some(now.max(last + 1))
                    })
                    .unwrap_or_else(|last| last);
                now.max(previous + 1)
            }
        }
    }

    /// Latest change of every record accepted strictly after `since`, oldest
    /// event first, with the cursor to ask from next.
    pub fn changes_since(&self, since: i64) -> FeedPage {
        // Read before scanning: anything stamped later belongs to the next page
        let high_water = self.clock.load(Ordering::SeqCst);

        let mut updates: Vec<Event> = self
            .latest
            .iter()
            .filter(|entry| entry.stamp > since && entry.stamp <= high_water)
            .map(|entry| entry.event.as_ref().clone())
            .collect();
        updates.sort_by_key(|e| e.effective_time());

        FeedPage {
            cursor: high_water.max(since),
            updates,
        }
    }

    /// Current collection: live records, most recently changed first.
    pub fn snapshot(&self) -> Vec<LinkRecord> {
        let mut records: Vec<(i64, LinkRecord)> = self
            .latest
            .iter()
            .filter_map(|entry| {
                let event = &entry.event;
                match event.body() {
                    EventBody::Created(r) | EventBody::Updated(r) if !r.deleted => {
                        Some((event.effective_time(), r.clone()))
                    }
                    _ => None,
                }
            })
            .collect();

        records.sort_by(|a, b| b.0.cmp(&a.0));
        records.into_iter().map(|(_, r)| r).collect()
    }

    pub fn stats(&self) -> FeedStats {
        FeedStats {
            records: self.latest.len(),
            deleted: self.tombstones.load(Ordering::SeqCst),
            max_tombstones: self.max_tombstones,
            cursor: self.clock.load(Ordering::SeqCst),
        }
    }

    fn forget_oldest_deletions(&self) {
        let excess = self
            .tombstones
            .load(Ordering::SeqCst)
            .saturating_sub(self.max_tombstones);
        let mut deletions: Vec<(i64, String)> = self
            .latest
            .iter()
            .filter(|entry| is_deletion(&entry.event))
            .map(|entry| (entry.event.effective_time(), entry.key().clone()))
            .collect();
        deletions.sort();

        for (_, id) in deletions.into_iter().take(excess) {
            // A re-creation may have replaced it since the scan
            if self
                .latest
                .remove_if(&id, |_, change| is_deletion(&change.event))
                .is_some()
            {
                self.tombstones.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }
}

fn is_deletion(event: &Event) -> bool {
    match event.body() {
        EventBody::Deleted(_) => true,
        EventBody::Created(r) | EventBody::Updated(r) => r.deleted,
        EventBody::InitialStateSnapshot(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::DeletedLink;

    fn created(id: &str, at: i64) -> Event {
        Event::stamped(
            EventBody::Created(LinkRecord::new(id, "http://x").touched_at(at)),
            at,
        )
    }

    fn deleted(id: &str, at: i64) -> Event {
        Event::stamped(EventBody::Deleted(DeletedLink::new(id, "Link")), at)
    }

    fn record_ids(page: &FeedPage) -> Vec<String> {
        page.updates
            .iter()
            .map(|e| e.record_id().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_changes_since_is_sorted_and_exclusive() {
        let feed = ChangeFeed::new(100);
        feed.record(&created("a", 1000));
        let cursor = feed.changes_since(0).cursor;

        feed.record(&created("b", 3000));
        feed.record(&created("c", 2000));

        let page = feed.changes_since(cursor);
        assert_eq!(record_ids(&page), vec!["c", "b"]);
        assert!(page.cursor > cursor);
        assert!(feed.changes_since(page.cursor).updates.is_empty());
    }

    #[test]
    fn test_change_recorded_after_a_poll_reaches_the_next_poll() {
        let feed = ChangeFeed::new(100);
        feed.record(&created("a", 5000));
        let first = feed.changes_since(0);
        assert_eq!(record_ids(&first), vec!["a"]);

        // Stamped well before the cursor the client now holds
        feed.record(&created("late", 1000));

        let second = feed.changes_since(first.cursor);
        assert_eq!(record_ids(&second), vec!["late"]);
        assert!(second.cursor > first.cursor);
    }

    #[test]
    fn test_cursor_never_moves_backwards() {
        let feed = ChangeFeed::new(100);
        let ahead = current_time_ms() + 60_000;
        assert_eq!(feed.changes_since(ahead).cursor, ahead);
    }

    #[test]
    fn test_deletion_replaces_record() {
        let feed = ChangeFeed::new(100);
        feed.record(&created("a", 1000));
        let cursor = feed.changes_since(0).cursor;
        feed.record(&deleted("a", 2000));

        assert!(feed.snapshot().is_empty());
        let changes = feed.changes_since(cursor).updates;
        assert_eq!(changes.len(), 1);
        assert!(matches!(changes[0].body(), EventBody::Deleted(_)));
        assert_eq!(feed.stats().deleted, 1);
    }

    #[test]
    fn test_stale_update_is_ignored() {
        let feed = ChangeFeed::new(100);
        let newer = LinkRecord::new("a", "http://new").touched_at(5000);
        let older = LinkRecord::new("a", "http://old").touched_at(4000);

        feed.record(&Event::stamped(EventBody::Updated(newer), 5000));
        let cursor = feed.changes_since(0).cursor;
        feed.record(&Event::stamped(EventBody::Updated(older), 6000));

        assert_eq!(feed.snapshot()[0].url, "http://new");
        assert!(feed.changes_since(cursor).updates.is_empty());
    }

    #[test]
    fn test_snapshot_newest_first() {
        let feed = ChangeFeed::new(100);
        feed.seed(vec![
            LinkRecord::new("old", "http://a").touched_at(1000),
            LinkRecord::new("new", "http://b").touched_at(9000),
        ]);

        let ids: Vec<_> = feed.snapshot().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["new", "old"]);
    }

    #[test]
    fn test_seeded_records_keep_their_own_position() {
        let feed = ChangeFeed::new(100);
        feed.seed(vec![
            LinkRecord::new("old", "http://a").touched_at(1000),
            LinkRecord::new("new", "http://b").touched_at(9000),
        ]);

        assert_eq!(record_ids(&feed.changes_since(5000)), vec!["new"]);
    }

    #[test]
    fn test_tombstone_budget_forgets_oldest_deletions_first() {
        let feed = ChangeFeed::new(1);
        feed.record(&deleted("gone", 100));
        feed.record(&created("a", 200));
        feed.record(&deleted("later", 300));

        let stats = feed.stats();
        assert_eq!(stats.deleted, 1);
        assert_eq!(stats.records, 2);
        let ids = record_ids(&feed.changes_since(0));
        assert_eq!(ids, vec!["a", "later"]);
    }

    #[test]
    fn test_live_records_are_never_evicted() {
        let feed = ChangeFeed::new(1);
        for i in 0..50 {
            feed.record(&created(&format!("r{}", i), 1000 + i));
        }
        feed.record(&deleted("r0", 5000));

        let stats = feed.stats();
        assert_eq!(stats.records, 50);
        assert_eq!(stats.deleted, 1);
        assert_eq!(feed.snapshot().len(), 49);
    }

    #[test]
    fn test_recreation_clears_tombstone() {
        let feed = ChangeFeed::new(10);
        feed.record(&deleted("a", 100));
        feed.record(&created("a", 200));

        assert_eq!(feed.stats().deleted, 0);
        assert_eq!(feed.snapshot().len(), 1);
    }
}
