//! Core Lightning plugin binary bridging NIP-47 to the node's JSON-RPC
//! surface. Wires `nip47-core`'s protocol engine and `nip47-cln`'s backend
//! to `cln-plugin`: option/RPC-method/hook registration and the startup
//! sequence live here, leaving `main.rs` a thin entrypoint.
#![warn(missing_docs)]
#![warn(rustdoc::bare_urls)]

pub mod engine;
pub mod hooks;
pub mod rpcmethods;
pub mod state;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use nip47_cln::{ClnConnectionStore, ClnNode};
use nip47_core::relay::RelayPool;
use nostr_sdk::Keys;
use tracing_appender::non_blocking;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;
use url::Url;

use crate::state::PluginState;

/// `nip47-relays` plugin option: comma-separated relay URLs.
pub const OPT_RELAYS: &str = "nip47-relays";
/// `nip47-notifications` plugin option: default on.
pub const OPT_NOTIFICATIONS: &str = "nip47-notifications";

/// Sets up a `tracing` subscriber writing to stderr only — CLN captures a
/// plugin's stderr into its own logging pipeline, and stdout is reserved for
/// the JSON-RPC framing `cln-plugin` speaks with the node, so nothing may
/// ever be written there.
pub fn setup_tracing() -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let default_filter = "nip47_core=debug,nip47_cln=debug,nip47_plugind=debug,info";
    let noise_filter = "hyper=warn,h2=warn,rustls=warn,tungstenite=warn";
    let env_filter = EnvFilter::try_new(format!("{default_filter},{noise_filter}"))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let (writer, guard) = non_blocking(std::io::stderr());
    let writer = writer.with_max_level(tracing::Level::TRACE);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();

    Ok(guard)
}

/// Parses `nip47-relays` into a relay list, erroring if empty: a plugin
/// with zero relays can never receive or answer a request, so refuse to
/// start rather than run silently inert.
pub fn parse_relays(raw: &str) -> Result<Vec<Url>> {
    let relays: Result<Vec<Url>, _> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Url::parse)
        .collect();
    let relays = relays.map_err(|e| anyhow!("invalid nip47-relays url: {e}"))?;
    if relays.is_empty() {
        return Err(anyhow!(
            "nip47-relays must name at least one relay URL"
        ));
    }
    Ok(relays)
}

/// Builds the shared [`PluginState`] and loads every persisted active
/// connection, ready to hand to `cln-plugin`'s `start()`.
pub async fn build_state(
    rpc_socket: PathBuf,
    relays: Vec<Url>,
    notifications_enabled: bool,
) -> Result<Arc<PluginState>> {
    let node = Arc::new(ClnNode::new(rpc_socket));
    let store = Arc::new(ClnConnectionStore::new(node.client()));

    // The Relay Pool's own signer identity is never used to sign outgoing
    // events (every request/response/notification is pre-signed with its
    // owning connection's wallet key before publish, see
    // `nip47_core::dispatcher`/`notifications`); it only needs to exist
    // because `nostr_sdk::Client::builder` requires one.
    let pool_identity = Keys::generate();
    let relay_pool = Arc::new(RelayPool::connect(&pool_identity, &relays).await?);

    let state = Arc::new(PluginState::new(
        node,
        store,
        relay_pool,
        notifications_enabled,
        relays,
    ));
    engine::load_active_connections(&state).await?;
    Ok(state)
}
