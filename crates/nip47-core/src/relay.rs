//! The Relay Pool: a thin wrapper over `nostr-sdk`'s `Client`.
//!
//! `nostr-sdk` already implements per-relay WebSocket dial with backoff,
//! automatic resubscription after reconnect, fan-out publish, and
//! event-id deduplication, so this module does none of that itself — it
//! just owns the `Client`, keeps the configured relay set connected, and
//! exposes the subscribe/publish/notification-stream surface the
//! connection actors and notification pump need.

use std::time::Duration;

use nostr_sdk::{Client, Event, Filter, Keys, RelayPoolNotification};
use tokio::sync::broadcast;
use tracing::{debug, warn};
use url::Url;

use crate::error::Error;

/// How long to wait for a relay's initial connection at startup before
/// moving on; ongoing reconnection after that is the pool's own backoff.
const RELAY_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Thin wrapper over [`nostr_sdk::Client`] scoped to this plugin's wallet
/// identity and configured relay set.
pub struct RelayPool {
    client: Client,
}

impl RelayPool {
    /// Builds a pool signing outgoing events with `keys` and connects to
    /// every URL in `relays`.
    pub async fn connect(keys: &Keys, relays: &[Url]) -> Result<Self, Error> {
        let client = Client::builder().signer(keys).build();
        for relay in relays {
            client.add_relay(relay.as_str()).await?;
        }
        client.connect().await;
        for relay in relays {
            match client.relay(relay.as_str()).await {
                Ok(relay_handle) => {
                    relay_handle.connect(Some(RELAY_CONNECT_TIMEOUT)).await;
                }
                Err(e) => warn!(relay = %relay, error = %e, "relay not registered after add_relay"),
            }
        }
        Ok(RelayPool { client })
    }

    /// Subscribes to a set of filters, replacing any prior subscription
    /// with the same id. `nostr-sdk` replays this subscription to relays
    /// automatically after a reconnect.
    pub async fn subscribe(&self, filters: Vec<Filter>) -> Result<(), Error> {
        for filter in filters {
            self.client.subscribe(vec![filter], None).await?;
        }
        Ok(())
    }

    /// The stream of pool notifications (incoming events, relay status
    /// changes). The Dispatcher's fan-out task drains this and routes by
    /// `p`-tag to the owning connection's mailbox.
    pub fn notifications(&self) -> broadcast::Receiver<RelayPoolNotification> {
        self.client.notifications()
    }

    /// Publishes an event to every connected relay; succeeds once at least
    /// one relay accepts it. Failures on individual relays are logged,
    /// never surfaced to the caller.
    pub async fn publish(&self, event: Event) -> Result<(), Error> {
        let event_id = event.id;
        match self.client.send_event(event).await {
            Ok(output) => {
                debug!(
                    event_id = %event_id,
                    accepted = output.success.len(),
                    failed = output.failed.len(),
                    "published event"
                );
                Ok(())
            }
            Err(e) => {
                warn!(event_id = %event_id, error = %e, "failed to publish event to any relay");
                Err(Error::from(e))
            }
        }
    }
}
