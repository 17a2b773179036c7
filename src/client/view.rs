//! Client-side projection of the bookmark collection.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;

use crate::event::{Event, EventBody, LinkRecord};

use super::{ClientConnectionManager, Subscription};

#[derive(Clone)]
struct Versioned {
    record: LinkRecord,
    version: i64,
}

/// Current records as seen through the event stream.
///
/// Events can arrive twice or out of order (a live session and the polling
/// feed overlap, reconnects reorder), so every write is last-write-wins on
/// the record's update time and deletions leave a tombstone that older
/// writes cannot resurrect.
#[derive(Clone, Default)]
pub struct LinkView {
    records: Arc<DashMap<String, Versioned>>,
    tombstones: Arc<DashMap<String, i64>>,
}

impl LinkView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep this view updated from a manager's events
    pub fn attach(&self, manager: &ClientConnectionManager) -> Subscription {
        let view = self.clone();
        manager.subscribe(move |event| {
            view.apply(event);
            Ok(())
        })
    }

    /// Apply one event. Returns false when it lost to newer state.
    pub fn apply(&self, event: &Event) -> bool {
        match event.body() {
            EventBody::Created(record) | EventBody::Updated(record) => {
                self.upsert(record, record.updated_at_ms().unwrap_or(event.timestamp()))
            }
            EventBody::Deleted(deleted) => self.remove(&deleted.id, event.timestamp()),
            EventBody::InitialStateSnapshot(records) => {
                self.replace_all(records, event.timestamp());
                true
            }
        }
    }

    fn upsert(&self, record: &LinkRecord, version: i64) -> bool {
        if record.deleted {
            return self.remove(&record.id, version);
        }
        if self
            .tombstones
            .get(&record.id)
            .is_some_and(|deleted_at| *deleted_at >= version)
        {
            return false;
        }

        let mut applied = false;
        self.records
            .entry(record.id.clone())
            .and_modify(|current| {
                if version >= current.version {
                    *current = Versioned {
                        record: record.clone(),
                        version,
                    };
                    applied = true;
                }
            })
            .or_insert_with(|| {
                applied = true;
                Versioned {
                    record: record.clone(),
                    version,
                }
            });
        applied
    }

    fn remove(&self, id: &str, version: i64) -> bool {
        if self
            .records
            .get(id)
            .is_some_and(|current| current.version > version)
        {
            return false;
        }

        self.records.remove(id);
        self.tombstones
            .entry(id.to_string())
            .and_modify(|deleted_at| *deleted_at = (*deleted_at).max(version))
            .or_insert(version);
        true
    }

    /// The snapshot is authoritative for everything it does not contradict:
    /// records missing from it are dropped, and newer live writes survive.
    fn replace_all(&self, records: &[LinkRecord], snapshot_time: i64) {
        let ids: HashSet<&str> = records.iter().map(|r| r.id.as_str()).collect();
        self.records
            .retain(|id, current| ids.contains(id.as_str()) || current.version > snapshot_time);

        for record in records {
            self.upsert(record, record.updated_at_ms().unwrap_or(snapshot_time));
        }
    }

    pub fn get(&self, id: &str) -> Option<LinkRecord> {
        self.records.get(id).map(|v| v.record.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    /// Records newest first
    pub fn records(&self) -> Vec<LinkRecord> {
        let mut records: Vec<Versioned> = self.records.iter().map(|e| e.value().clone()).collect();
        records.sort_by(|a, b| b.version.cmp(&a.version).then_with(|| a.record.id.cmp(&b.record.id)));
        records.into_iter().map(|v| v.record).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::DeletedLink;

    fn created(id: &str, at: i64) -> Event {
        Event::from_parts(
            EventBody::Created(LinkRecord::new(id, "http://x").touched_at(at)),
            at,
            format!("c-{}-{}", id, at),
        )
    }

    fn updated(id: &str, title: &str, at: i64) -> Event {
        Event::from_parts(
            EventBody::Updated(LinkRecord::new(id, "http://x").with_title(title).touched_at(at)),
            at,
            format!("u-{}-{}", id, at),
        )
    }

    fn deleted(id: &str, at: i64) -> Event {
        Event::from_parts(
            EventBody::Deleted(DeletedLink::new(id, "x")),
            at,
            format!("d-{}-{}", id, at),
        )
    }

    #[test]
    fn test_stale_update_loses() {
        let view = LinkView::new();
        assert!(view.apply(&updated("L1", "new", 2000)));
        assert!(!view.apply(&updated("L1", "old", 1000)));

        assert_eq!(view.get("L1").unwrap().title.as_deref(), Some("new"));
    }

    #[test]
    fn test_deletion_is_not_resurrected_by_older_write() {
        let view = LinkView::new();
        view.apply(&created("L1", 1000));
        assert!(view.apply(&deleted("L1", 2000)));

        // Same create arriving late over the polling path
        assert!(!view.apply(&created("L1", 1000)));
        assert!(!view.contains("L1"));

        // A genuinely newer write brings it back
        assert!(view.apply(&updated("L1", "restored", 3000)));
        assert!(view.contains("L1"));
    }

    #[test]
    fn test_snapshot_replaces_collection() {
        let view = LinkView::new();
        view.apply(&created("gone", 100));
        view.apply(&created("fresh", 9000));

        let snapshot = Event::from_parts(
            EventBody::InitialStateSnapshot(vec![
                LinkRecord::new("A", "http://a").touched_at(500),
                LinkRecord::new("B", "http://b").touched_at(700),
            ]),
            5000,
            "snap",
        );
        view.apply(&snapshot);

        let ids: Vec<String> = view.records().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["fresh", "B", "A"]);
    }
}
