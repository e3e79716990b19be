//! NIP-47 (Nostr Wallet Connect) bridge plugin entrypoint.
#![warn(missing_docs)]
#![warn(rustdoc::bare_urls)]

use std::path::PathBuf;

use anyhow::Result;
use cln_plugin::options::{ConfigOption, Value as OptValue};
use cln_plugin::Builder;
use nip47_plugind::{
    build_state, parse_relays, setup_tracing, OPT_NOTIFICATIONS, OPT_RELAYS,
};
use tokio::io::{stdin, stdout};

#[tokio::main]
async fn main() -> Result<()> {
    let _tracing_guard = setup_tracing()?;

    let configured_plugin = match Builder::new(stdin(), stdout())
        .option(ConfigOption::new(
            OPT_RELAYS,
            OptValue::OptString,
            "Comma-separated Nostr relay URLs used as the NWC transport",
        ))
        .option(ConfigOption::new(
            OPT_NOTIFICATIONS,
            OptValue::Boolean(true),
            "Publish payment_received/payment_sent notifications to connected clients",
        ))
        .rpcmethod(
            "nip47-create",
            "Create a new NWC connection: nip47-create name [cap_msat] [interval]",
            nip47_plugind::rpcmethods::nip47_create,
        )
        .rpcmethod(
            "nip47-revoke",
            "Revoke an NWC connection: nip47-revoke name",
            nip47_plugind::rpcmethods::nip47_revoke,
        )
        .rpcmethod(
            "nip47-list",
            "List NWC connections: nip47-list [name]",
            nip47_plugind::rpcmethods::nip47_list,
        )
        .rpcmethod(
            "nip47-budget",
            "Adjust an NWC connection's budget: nip47-budget name cap_msat [interval]",
            nip47_plugind::rpcmethods::nip47_budget,
        )
        .hook("invoice_payment", nip47_plugind::hooks::on_invoice_payment)
        .hook("sendpay_success", nip47_plugind::hooks::on_sendpay_success)
        .configure()
        .await?
    {
        Some(p) => p,
        None => return Ok(()),
    };

    let relays_raw = match configured_plugin.option(OPT_RELAYS) {
        Some(OptValue::String(s)) => Some(s),
        Some(OptValue::OptString(s)) => s,
        _ => None,
    }
    .ok_or_else(|| anyhow::anyhow!("nip47-relays is required"))?;
    let relays = parse_relays(&relays_raw)?;
    let notifications_enabled = matches!(
        configured_plugin.option(OPT_NOTIFICATIONS),
        Some(OptValue::Boolean(true)) | None
    );
    let rpc_socket = PathBuf::from(&configured_plugin.configuration().rpc_file);

    let state = build_state(rpc_socket, relays, notifications_enabled).await?;

    let routing_state = state.clone();
    tokio::spawn(async move {
        nip47_plugind::engine::run_routing_loop(routing_state).await;
    });

    let plugin = configured_plugin.start(state).await?;
    plugin.join().await
}
