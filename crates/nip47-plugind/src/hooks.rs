//! Node-emitted payment hooks, opt-in via the `nip47-notifications` plugin
//! option, translated into node-agnostic [`PaymentEvent`]s and fanned out
//! by [`nip47_core::notifications::notify`]. Both hooks must
//! answer `{"result": "continue"}` promptly — CLN blocks the triggering
//! action on the hook's response, so translation work happens after that
//! reply is queued, never before.

use std::sync::Arc;

use nip47_core::notifications::{notify, PaymentEvent, PaymentReceived, PaymentSent};
use nip47_core::node::Transaction;
use cln_plugin::Plugin;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::state::PluginState;

fn continue_result() -> Value {
    json!({ "result": "continue" })
}

fn payment_hash_from_preimage(preimage_hex: &str) -> Option<String> {
    let bytes = hex::decode(preimage_hex).ok()?;
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    Some(hex::encode(hasher.finalize()))
}

/// `invoice_payment`: a settled incoming payment. The hook
/// payload carries only `label`/`preimage`/`msat`; the payment hash is
/// derived from the preimage and used to fetch the full transaction record
/// from the node rather than duplicating invoice-decoding logic here.
pub async fn on_invoice_payment(
    plugin: Plugin<Arc<PluginState>>,
    request: Value,
) -> Result<Value, anyhow::Error> {
    let state = plugin.state().clone();
    if !state.notifications_enabled {
        return Ok(continue_result());
    }

    let payment = request.get("payment").cloned().unwrap_or(Value::Null);
    let Some(preimage) = payment.get("preimage").and_then(|v| v.as_str()) else {
        warn!("invoice_payment hook fired without a preimage");
        return Ok(continue_result());
    };
    let Some(payment_hash) = payment_hash_from_preimage(preimage) else {
        warn!("invoice_payment hook carried an unparseable preimage");
        return Ok(continue_result());
    };

    match state.node.lookup_by_payment_hash(&payment_hash).await {
        Ok(Some(Transaction {
            transaction_type: _,
            state: _,
            invoice,
            preimage: _,
            description,
            description_hash,
            payment_hash,
            amount_msat,
            fees_paid_msat: _,
            created_at,
            settled_at,
            expires_at,
        })) => {
            let connections = state.store.list().await.unwrap_or_default();
            let event = PaymentEvent::Received(PaymentReceived {
                invoice,
                description,
                description_hash,
                preimage: preimage.to_string(),
                payment_hash,
                amount_msat,
                created_at,
                settled_at: settled_at.unwrap_or(created_at),
                expires_at,
            });
            notify(&state.relay_pool, &connections, &event).await;
        }
        Ok(None) => warn!(payment_hash, "invoice_payment hook fired for unknown transaction"),
        Err(e) => warn!(payment_hash, error = %e, "failed to look up settled invoice"),
    }

    Ok(continue_result())
}

/// `sendpay_success`: a settled outgoing payment.
pub async fn on_sendpay_success(
    plugin: Plugin<Arc<PluginState>>,
    request: Value,
) -> Result<Value, anyhow::Error> {
    let state = plugin.state().clone();
    if !state.notifications_enabled {
        return Ok(continue_result());
    }

    let payload = request
        .get("sendpay_success")
        .cloned()
        .unwrap_or(request.clone());

    let (Some(payment_hash), Some(preimage)) = (
        payload.get("payment_hash").and_then(|v| v.as_str()),
        payload.get("preimage").and_then(|v| v.as_str()),
    ) else {
        warn!("sendpay_success hook missing payment_hash/preimage");
        return Ok(continue_result());
    };

    let amount_msat = payload
        .get("amount_msat")
        .and_then(msat_value)
        .unwrap_or(0);
    let amount_sent_msat = payload
        .get("amount_sent_msat")
        .and_then(msat_value)
        .unwrap_or(amount_msat);
    let created_at = payload.get("created_at").and_then(|v| v.as_u64()).unwrap_or(0);
    let settled_at = payload
        .get("completed_at")
        .and_then(|v| v.as_u64())
        .unwrap_or(created_at);

    let connections = state.store.list().await.unwrap_or_default();
    let event = PaymentEvent::Sent(PaymentSent {
        invoice: payload.get("bolt11").and_then(|v| v.as_str()).map(str::to_string),
        description: None,
        preimage: preimage.to_string(),
        payment_hash: payment_hash.to_string(),
        amount_msat,
        fees_paid_msat: amount_sent_msat.saturating_sub(amount_msat),
        created_at,
        settled_at,
    });
    notify(&state.relay_pool, &connections, &event).await;

    Ok(continue_result())
}

/// CLN reports millisat amounts either as a bare integer or a `"123msat"`
/// string depending on RPC/hook version; accept both.
fn msat_value(value: &Value) -> Option<u64> {
    if let Some(n) = value.as_u64() {
        return Some(n);
    }
    value
        .as_str()?
        .strip_suffix("msat")
        .and_then(|s| s.parse().ok())
}
