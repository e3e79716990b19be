//! Startup wiring and the notification-routing loop: loads every active
//! connection, spawns its actor, subscribes its request filter, and fans
//! inbound relay events out to the right mailbox by `p`-tag.

use std::sync::Arc;

use nip47_core::connection::Connection;
use nip47_core::dispatcher::{request_filter, ConnectionActor};
use nip47_core::info_event::InfoEventState;
use nostr_sdk::{Alphabet, Event, RelayPoolNotification, SingleLetterTag, Timestamp};
use tracing::{debug, info, warn};

use crate::state::PluginState;

/// Spawns an actor for `connection`, subscribes its request filter, and
/// publishes its info event if the connection's capability fingerprint
/// changed since the last publication.
pub async fn register_connection(state: &PluginState, connection: Connection) {
    let wallet_pubkey = connection.wallet_pubkey();
    let name = connection.name.clone();

    let filter = request_filter(&connection, Timestamp::now());
    if let Err(e) = state.relay_pool.subscribe(vec![filter]).await {
        warn!(connection = %name, error = %e, "failed to subscribe connection's request filter");
    }

    let mut info_states = state.info_states.lock().await;
    let entry = info_states.entry(name.clone()).or_default();
    publish_info_if_changed(state, entry, &connection).await;
    drop(info_states);

    if connection.revoked {
        return;
    }
    let sender = ConnectionActor::spawn(
        connection,
        Arc::clone(&state.store),
        Arc::clone(&state.node),
        Arc::clone(&state.relay_pool),
        state.notifications_enabled,
    );
    state.actors.write().await.insert(wallet_pubkey, sender);
}

/// Removes a revoked connection's mailbox so no further requests reach it
/// (the actor task itself exits once its `Sender` side is dropped).
pub async fn deregister_connection(state: &PluginState, wallet_pubkey: nostr_sdk::PublicKey) {
    state.actors.write().await.remove(&wallet_pubkey);
}

async fn publish_info_if_changed(
    state: &PluginState,
    entry: &mut InfoEventState,
    connection: &Connection,
) {
    if !entry.needs_republish(connection, state.notifications_enabled) {
        return;
    }
    match entry.build(connection, state.notifications_enabled) {
        Ok(event) => {
            if let Err(e) = state.relay_pool.publish(event).await {
                warn!(connection = %connection.name, error = %e, "failed to publish info event");
            }
        }
        Err(e) => warn!(connection = %connection.name, error = %e, "failed to build info event"),
    }
}

/// Loads every non-revoked connection and wires it up at plugin startup.
pub async fn load_active_connections(state: &PluginState) -> anyhow::Result<()> {
    let connections = state.store.load_active().await?;
    info!(count = connections.len(), "loaded active NIP-47 connections");
    for connection in connections {
        register_connection(state, connection).await;
    }
    Ok(())
}

/// Drains the Relay Pool's notification stream for the plugin's lifetime,
/// routing each inbound request event to its connection's mailbox by the
/// `p`-tag value.
pub async fn run_routing_loop(state: Arc<PluginState>) {
    let mut notifications = state.relay_pool.notifications();
    loop {
        let notification = match notifications.recv().await {
            Ok(n) => n,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "relay notification stream lagged, continuing");
                continue;
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                info!("relay notification stream closed, routing loop exiting");
                return;
            }
        };
        if let RelayPoolNotification::Event { event, .. } = notification {
            route_event(&state, *event).await;
        }
    }
}

async fn route_event(state: &PluginState, event: Event) {
    let Some(wallet_pubkey) = event
        .tags
        .find(nostr_sdk::TagKind::SingleLetter(SingleLetterTag::lowercase(
            Alphabet::P,
        )))
        .and_then(|tag| tag.content())
        .and_then(|hex| nostr_sdk::PublicKey::from_hex(hex).ok())
    else {
        debug!(event_id = %event.id, "inbound event has no p-tag, dropping");
        return;
    };

    let actors = state.actors.read().await;
    match actors.get(&wallet_pubkey) {
        Some(sender) => {
            if sender.send(event).await.is_err() {
                debug!(wallet = %wallet_pubkey, "actor mailbox closed, dropping event");
            }
        }
        None => debug!(wallet = %wallet_pubkey, "no live connection for p-tag, dropping event"),
    }
}
