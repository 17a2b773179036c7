use serde::de::Error as _;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use super::record::{DeletedLink, LinkRecord};
use super::current_time_ms;

/// Errors raised while decoding events from the wire
#[derive(Debug, Error)]
pub enum EventError {
    #[error("Malformed event JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Invalid payload for {kind} event: {source}")]
    InvalidPayload {
        kind: EventKind,
        #[source]
        source: serde_json::Error,
    },
}

/// Event type tag as it appears in the `type` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Created,
    Updated,
    Deleted,
    InitialStateSnapshot,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Created => "created",
            EventKind::Updated => "updated",
            EventKind::Deleted => "deleted",
            EventKind::InitialStateSnapshot => "initial_state_snapshot",
        }
    }

    /// Kinds that are dispatched before anything else happens on receipt.
    pub fn is_latency_sensitive(&self) -> bool {
        matches!(self, EventKind::Created | EventKind::Deleted)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific event content
#[derive(Debug, Clone, PartialEq)]
pub enum EventBody {
    Created(LinkRecord),
    Updated(LinkRecord),
    Deleted(DeletedLink),
    InitialStateSnapshot(Vec<LinkRecord>),
}

impl EventBody {
    pub fn kind(&self) -> EventKind {
        match self {
            EventBody::Created(_) => EventKind::Created,
            EventBody::Updated(_) => EventKind::Updated,
            EventBody::Deleted(_) => EventKind::Deleted,
            EventBody::InitialStateSnapshot(_) => EventKind::InitialStateSnapshot,
        }
    }

    /// Id of the single record this body refers to (none for snapshots)
    pub fn record_id(&self) -> Option<&str> {
        match self {
            EventBody::Created(r) | EventBody::Updated(r) => Some(&r.id),
            EventBody::Deleted(d) => Some(&d.id),
            EventBody::InitialStateSnapshot(_) => None,
        }
    }

    fn from_parts(kind: EventKind, payload: Value) -> Result<Self, EventError> {
        let invalid = |source| EventError::InvalidPayload { kind, source };
        Ok(match kind {
            EventKind::Created => EventBody::Created(serde_json::from_value(payload).map_err(invalid)?),
            EventKind::Updated => EventBody::Updated(serde_json::from_value(payload).map_err(invalid)?),
            EventKind::Deleted => EventBody::Deleted(serde_json::from_value(payload).map_err(invalid)?),
            EventKind::InitialStateSnapshot => {
                EventBody::InitialStateSnapshot(serde_json::from_value(payload).map_err(invalid)?)
            }
        })
    }

    fn serialize_payload<S: SerializeStruct>(&self, state: &mut S) -> Result<(), S::Error> {
        match self {
            EventBody::Created(r) | EventBody::Updated(r) => state.serialize_field("payload", r),
            EventBody::Deleted(d) => state.serialize_field("payload", d),
            EventBody::InitialStateSnapshot(records) => state.serialize_field("payload", records),
        }
    }
}

/// A single notification.
///
/// Constructed once (stamped with `timestamp` and `id`) and never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    body: EventBody,
    timestamp: i64,
    id: String,
}

impl Event {
    /// Stamp a body with the current time and a fresh message id
    pub fn new(body: EventBody) -> Self {
        Self::stamped(body, current_time_ms())
    }

    /// Stamp a body with a caller-provided timestamp and a fresh message id
    pub fn stamped(body: EventBody, timestamp: i64) -> Self {
        Self {
            body,
            timestamp,
            id: generate_message_id(timestamp),
        }
    }

    /// Rebuild an event whose identity was assigned elsewhere
    pub fn from_parts(body: EventBody, timestamp: i64, id: impl Into<String>) -> Self {
        Self {
            body,
            timestamp,
            id: id.into(),
        }
    }

    pub fn kind(&self) -> EventKind {
        self.body.kind()
    }

    pub fn body(&self) -> &EventBody {
        &self.body
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn record_id(&self) -> Option<&str> {
        self.body.record_id()
    }

    /// Time used for last-write-wins: the record's own update time when it
    /// has one, otherwise the publish timestamp.
    pub fn effective_time(&self) -> i64 {
        match &self.body {
            EventBody::Created(r) | EventBody::Updated(r) => {
                r.updated_at_ms().unwrap_or(self.timestamp)
            }
            _ => self.timestamp,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> Result<Self, EventError> {
        let raw: RawEvent = serde_json::from_str(text)?;
        raw.into_event()
    }
}

impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Event", 4)?;
        state.serialize_field("type", &self.body.kind())?;
        self.body.serialize_payload(&mut state)?;
        state.serialize_field("timestamp", &self.timestamp)?;
        state.serialize_field("id", &self.id)?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for Event {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        RawEvent::deserialize(deserializer)?
            .into_event()
            .map_err(D::Error::custom)
    }
}

#[derive(Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    kind: EventKind,
    payload: Value,
    timestamp: i64,
    id: String,
}

impl RawEvent {
    fn into_event(self) -> Result<Event, EventError> {
        Ok(Event {
            body: EventBody::from_parts(self.kind, self.payload)?,
            timestamp: self.timestamp,
            id: self.id,
        })
    }
}

/// A domain event as handed over by a producer, before stamping.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDraft {
    pub body: EventBody,
    pub timestamp: Option<i64>,
}

impl EventDraft {
    pub fn at(body: EventBody, timestamp: i64) -> Self {
        Self {
            body,
            timestamp: Some(timestamp),
        }
    }

    /// Stamp the draft, keeping a producer-supplied timestamp
    pub fn into_event(self) -> Event {
        match self.timestamp {
            Some(ts) => Event::stamped(self.body, ts),
            None => Event::new(self.body),
        }
    }
}

impl From<EventBody> for EventDraft {
    fn from(body: EventBody) -> Self {
        Self {
            body,
            timestamp: None,
        }
    }
}

impl<'de> Deserialize<'de> for EventDraft {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct RawDraft {
            #[serde(rename = "type")]
            kind: EventKind,
            payload: Value,
            #[serde(default)]
            timestamp: Option<i64>,
        }

        let raw = RawDraft::deserialize(deserializer)?;
        let body = EventBody::from_parts(raw.kind, raw.payload).map_err(D::Error::custom)?;
        Ok(Self {
            body,
            timestamp: raw.timestamp,
        })
    }
}

/// `msg_<millis>_<random>`; unique per process run
fn generate_message_id(timestamp: i64) -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("msg_{}_{}", timestamp, &random[..9])
}
