//! Shared plugin state: the node/store handles, the Relay Pool, and the
//! live per-connection actor mailboxes. One `Arc<PluginState>` is handed
//! to `cln-plugin` at `start()` and cloned into every RPC method, hook,
//! and the notification-routing task.

use std::collections::HashMap;
use std::sync::Arc;

use nip47_cln::{ClnConnectionStore, ClnNode};
use nip47_core::info_event::InfoEventState;
use nip47_core::node::LightningNode;
use nip47_core::relay::RelayPool;
use nostr_sdk::{Event, PublicKey};
use tokio::sync::{mpsc, Mutex, RwLock};
use url::Url;

/// Everything a running plugin instance needs, shared across tasks.
pub struct PluginState {
    /// The Lightning node seam, shared with every connection actor.
    pub node: Arc<dyn LightningNode>,
    /// The `datastore`-backed connection store.
    pub store: Arc<ClnConnectionStore>,
    /// The configured relay set.
    pub relay_pool: Arc<RelayPool>,
    /// `nip47-notifications` plugin option.
    pub notifications_enabled: bool,
    /// `nip47-relays`, used to render pairing URIs on `nip47-create`/`nip47-list`.
    pub relays: Vec<Url>,
    /// One mailbox per live, non-revoked connection, keyed by wallet pubkey
    /// (the `p`-tag value inbound request events carry).
    pub actors: RwLock<HashMap<PublicKey, mpsc::Sender<Event>>>,
    /// Last-published info event fingerprint per connection name, guarding
    /// republication to only-on-change.
    pub info_states: Mutex<HashMap<String, InfoEventState>>,
}

impl PluginState {
    /// Builds state with empty actor/info-event maps; callers register
    /// existing connections via [`crate::engine::register_connection`] after
    /// construction.
    pub fn new(
        node: Arc<ClnNode>,
        store: Arc<ClnConnectionStore>,
        relay_pool: Arc<RelayPool>,
        notifications_enabled: bool,
        relays: Vec<Url>,
    ) -> Self {
        PluginState {
            node,
            store,
            relay_pool,
            notifications_enabled,
            relays,
            actors: RwLock::new(HashMap::new()),
            info_states: Mutex::new(HashMap::new()),
        }
    }
}
