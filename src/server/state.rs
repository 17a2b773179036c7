use std::sync::Arc;
use std::time::Instant;

use crate::config::Settings;
use crate::connection_manager::ConnectionRegistry;
use crate::feed::ChangeFeed;
use crate::gateway::Gateway;
use crate::publisher::BroadcastPublisher;
use crate::relay::Relay;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub relay: Arc<dyn Relay>,
    pub registry: Arc<ConnectionRegistry>,
    pub gateway: Arc<Gateway>,
    pub publisher: Arc<BroadcastPublisher>,
    pub feed: Arc<ChangeFeed>,
    pub start_time: Instant,
}

impl AppState {
    /// Wire the services around an already chosen relay backend
    pub fn new(settings: Settings, relay: Arc<dyn Relay>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(settings.websocket.send_timeout()));
        let gateway = Arc::new(Gateway::new(
            registry.clone(),
            relay.clone(),
            &settings.relay,
            &settings.websocket,
        ));
        let feed = Arc::new(ChangeFeed::new(settings.feed.max_tombstones));
        let publisher = Arc::new(
            BroadcastPublisher::new(relay.clone(), &settings.relay, &settings.publisher)
                .with_feed(feed.clone())
                .with_gateway(gateway.clone()),
        );

        Self {
            settings: Arc::new(settings),
            relay,
            registry,
            gateway,
            publisher,
            feed,
            start_time: Instant::now(),
        }
    }
}
