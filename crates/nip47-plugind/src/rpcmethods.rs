//! The four operator RPC commands (`nip47-create`, `nip47-revoke`,
//! `nip47-list`, `nip47-budget`), registered with `cln-plugin`'s
//! `Builder::rpcmethod`. Each takes the node's own positional-or-named
//! JSON-RPC params and returns a JSON object, or an `anyhow::Error` whose
//! message becomes the node's RPC error (CLN renders a handler `Err` as
//! `{"code": ..., "message": ...}`).

use std::sync::Arc;

use anyhow::{anyhow, bail};
use cln_plugin::Plugin;
use nip47_core::connection::Connection;
use nip47_core::ledger::{self, BudgetConfig, Interval};
use serde_json::{json, Value};

use crate::engine;
use crate::state::PluginState;

/// Reads a param by position (array-style call) or by name (object-style
/// call) — CLN accepts both for plugin-registered RPC methods.
fn param<'a>(request: &'a Value, index: usize, name: &str) -> Option<&'a Value> {
    match request {
        Value::Array(items) => items.get(index),
        Value::Object(map) => map.get(name),
        _ => None,
    }
}

fn param_str(request: &Value, index: usize, name: &str) -> Option<String> {
    param(request, index, name)
        .and_then(|v| v.as_str().map(str::to_string).or_else(|| Some(v.to_string())))
}

/// Parses an optional `cap_msat` argument, rejecting negative numbers.
fn parse_cap_msat(request: &Value, index: usize) -> anyhow::Result<Option<u64>> {
    let Some(raw) = param(request, index, "cap_msat") else {
        return Ok(None);
    };
    if raw.is_null() {
        return Ok(None);
    }
    let signed = raw
        .as_i64()
        .ok_or_else(|| anyhow!("not an integer"))?;
    if signed < 0 {
        bail!("not an integer");
    }
    Ok(Some(signed as u64))
}

fn parse_interval(request: &Value, index: usize) -> anyhow::Result<Option<Interval>> {
    match param_str(request, index, "interval") {
        Some(s) => Ok(Some(s.parse::<Interval>().map_err(|e| anyhow!(e.to_string()))?)),
        None => Ok(None),
    }
}

fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Builds the `{budget_msat, cap_msat, interval?, next_renewal?,
/// client_pubkey, revoked}` summary returned by `nip47-list`, falling back
/// to the node's spendable balance for `Unlimited` connections per
/// [`ledger::remaining_balance`]'s documented contract.
async fn connection_summary(state: &PluginState, connection: &mut Connection) -> Value {
    let now = now_unix();
    let remaining = ledger::remaining_balance(&connection.budget, &mut connection.ledger, now);
    let budget_msat = match remaining {
        Some(msat) => msat,
        None => state.node.spendable_balance_msat().await.unwrap_or(0),
    };
    let (cap_msat, interval, next_renewal) = match connection.budget {
        BudgetConfig::Unlimited => (None, None, None),
        BudgetConfig::Fixed { cap_msat } => (Some(cap_msat), None, None),
        BudgetConfig::Renewing {
            cap_msat, interval, ..
        } => (
            Some(cap_msat),
            Some(interval.secs),
            Some(connection.ledger.period_start.saturating_add(interval.secs)),
        ),
    };
    json!({
        "budget_msat": budget_msat,
        "cap_msat": cap_msat,
        "interval": interval,
        "next_renewal": next_renewal,
        "client_pubkey": connection.client_pubkey.to_hex(),
        "revoked": connection.revoked,
    })
}

/// `nip47-create <name> [cap_msat] [interval]`.
pub async fn nip47_create(
    plugin: Plugin<Arc<PluginState>>,
    request: Value,
) -> Result<Value, anyhow::Error> {
    let state = plugin.state().clone();
    let name = param_str(&request, 0, "name").ok_or_else(|| anyhow!("missing required parameter: name"))?;
    let cap_msat = parse_cap_msat(&request, 1)?;
    let interval = parse_interval(&request, 2)?;

    let budget = match (cap_msat, interval) {
        (None, _) => BudgetConfig::Unlimited,
        (Some(cap_msat), Some(interval)) => BudgetConfig::Renewing {
            cap_msat,
            interval,
            anchor: now_unix(),
        },
        (Some(cap_msat), None) => BudgetConfig::Fixed { cap_msat },
    };

    let connection = state.store.create(&name, budget, now_unix()).await?;
    let uri = connection.pairing_uri(&state.relays, None);
    let client_pubkey = connection.client_pubkey.to_hex();
    engine::register_connection(&state, connection).await;

    Ok(json!({
        "uri": uri,
        "clientkey_public": client_pubkey,
    }))
}

/// `nip47-revoke <name>`.
pub async fn nip47_revoke(
    plugin: Plugin<Arc<PluginState>>,
    request: Value,
) -> Result<Value, anyhow::Error> {
    let state = plugin.state().clone();
    let name = param_str(&request, 0, "name").ok_or_else(|| anyhow!("missing required parameter: name"))?;

    state.store.revoke(&name).await?;
    if let Some(connection) = state.store.get(&name).await? {
        let wallet_pubkey = connection.wallet_pubkey();
        engine::deregister_connection(&state, wallet_pubkey).await;
    }

    Ok(json!({ "revoked": name }))
}

/// `nip47-list [name]`.
pub async fn nip47_list(
    plugin: Plugin<Arc<PluginState>>,
    request: Value,
) -> Result<Value, anyhow::Error> {
    let state = plugin.state().clone();
    let filter_name = param_str(&request, 0, "name");

    let mut connections = state.store.list().await?;
    if let Some(name) = &filter_name {
        connections.retain(|c| &c.name == name);
        if connections.is_empty() {
            bail!("connection not found: {name}");
        }
    }

    let mut out = serde_json::Map::new();
    for mut connection in connections {
        let name = connection.name.clone();
        out.insert(name, connection_summary(&state, &mut connection).await);
    }
    Ok(Value::Object(out))
}

/// `nip47-budget <name> <cap_msat> [interval]`.
pub async fn nip47_budget(
    plugin: Plugin<Arc<PluginState>>,
    request: Value,
) -> Result<Value, anyhow::Error> {
    let state = plugin.state().clone();
    let name = param_str(&request, 0, "name").ok_or_else(|| anyhow!("missing required parameter: name"))?;
    let cap_msat = parse_cap_msat(&request, 1)?.ok_or_else(|| anyhow!("missing required parameter: cap_msat"))?;
    let interval = parse_interval(&request, 2)?;

    let mut connection = state
        .store
        .adjust_budget(&name, cap_msat, interval, now_unix())
        .await?;

    {
        let mut info_states = state.info_states.lock().await;
        let entry = info_states.entry(name.clone()).or_default();
        if entry.needs_republish(&connection, state.notifications_enabled) {
            if let Ok(event) = entry.build(&connection, state.notifications_enabled) {
                let _ = state.relay_pool.publish(event).await;
            }
        }
    }

    Ok(connection_summary(&state, &mut connection).await)
}
