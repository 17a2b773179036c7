//! HTTP read paths: the snapshot and the polling feed.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::config::ClientConfig;
use crate::event::{Event, LinkRecord};

use super::ClientError;

/// One response of the polling feed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdatesPage {
    /// Server time of the response; the next cursor
    pub timestamp: i64,
    pub updates: Vec<Event>,
}

/// Source of the initial snapshot and of polled updates
#[async_trait]
pub trait UpdatesSource: Send + Sync {
    /// Current collection for the initial state
    async fn fetch_snapshot(&self) -> Result<Vec<LinkRecord>, ClientError>;

    /// Events after `since`, in whatever order the server returns them
    async fn fetch_updates(&self, since: i64) -> Result<UpdatesPage, ClientError>;
}

#[derive(Deserialize)]
struct RawPage {
    #[serde(default)]
    timestamp: i64,
    #[serde(default)]
    updates: Vec<Value>,
}

/// [`UpdatesSource`] over the service's HTTP API
pub struct HttpUpdatesSource {
    http: reqwest::Client,
    snapshot_url: String,
    updates_url: String,
}

impl HttpUpdatesSource {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        Self::with_urls(
            config.snapshot_url(),
            config.updates_url(),
            config.request_timeout(),
        )
    }

    pub fn with_urls(
        snapshot_url: impl Into<String>,
        updates_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            snapshot_url: snapshot_url.into(),
            updates_url: updates_url.into(),
        })
    }
}

#[async_trait]
impl UpdatesSource for HttpUpdatesSource {
    async fn fetch_snapshot(&self) -> Result<Vec<LinkRecord>, ClientError> {
        let records = self
            .http
            .get(&self.snapshot_url)
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<LinkRecord>>()
            .await?;
        Ok(records)
    }

    async fn fetch_updates(&self, since: i64) -> Result<UpdatesPage, ClientError> {
        let raw = self
            .http
            .get(&self.updates_url)
            .query(&[("since", since)])
            .send()
            .await?
            .error_for_status()?
            .json::<RawPage>()
            .await?;

        Ok(UpdatesPage {
            timestamp: raw.timestamp,
            updates: decode_updates(raw.updates),
        })
    }
}

/// Decode each update on its own so one malformed entry does not cost the page
fn decode_updates(raw: Vec<Value>) -> Vec<Event> {
    raw.into_iter()
        .filter_map(|value| match serde_json::from_value::<Event>(value) {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed polled update");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_malformed_updates_are_skipped() {
        let events = decode_updates(vec![
            json!({"type": "deleted", "payload": {"id": "L1", "label": "x"}, "timestamp": 5, "id": "m1"}),
            json!({"type": "renamed", "payload": {}, "timestamp": 6, "id": "m2"}),
            json!("garbage"),
        ]);

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id(), "m1");
    }

    #[test]
    fn test_urls_follow_client_config() {
        let config = ClientConfig {
            base_url: "https://links.example.com/".to_string(),
            ..Default::default()
        };
        let source = HttpUpdatesSource::new(&config).unwrap();

        assert_eq!(source.snapshot_url, "https://links.example.com/api/links");
        assert_eq!(source.updates_url, "https://links.example.com/api/updates");
    }
}
