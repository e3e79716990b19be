//! Translates NIP-47 method params into node calls, enforcing per-method
//! invariants and budget admission. Each handler returns a typed JSON
//! result or a `(Nip47ErrorCode, message)` pair — never a panic.

use lightning_invoice::Bolt11Invoice;
use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::str::FromStr;

use crate::error::{HandlerResult, Nip47ErrorCode};
use crate::ledger::{self, BudgetConfig, LedgerEntry};
use crate::node::{
    ListTransactionsFilter, NodeError, PaymentResult, Transaction, TransactionType,
};
use crate::wire::*;

/// Per-request handle to the connection's budget and node client. Owned
/// by the per-connection actor, which holds `&mut LedgerEntry` for the
/// lifetime of one admission decision, so reservations against a single
/// connection are always serialized.
pub struct HandlerContext<'a> {
    /// The connection's budget configuration.
    pub config: &'a BudgetConfig,
    /// The connection's mutable ledger state.
    pub ledger: &'a mut LedgerEntry,
    /// The node RPC client.
    pub node: &'a dyn crate::node::LightningNode,
    /// Wall-clock time, injected for deterministic tests.
    pub now: u64,
}

fn node_error_code(e: &NodeError) -> (Nip47ErrorCode, String) {
    match e {
        NodeError::PaymentFailed(msg) => (Nip47ErrorCode::PaymentFailed, msg.clone()),
        NodeError::NotFound => (Nip47ErrorCode::Other, "not found".to_string()),
        NodeError::Timeout => (Nip47ErrorCode::Internal, "node rpc timed out".to_string()),
        NodeError::Rpc(msg) => (Nip47ErrorCode::Internal, msg.clone()),
    }
}

/// Wire shape for a transaction record. Optional fields are omitted from
/// the JSON rather than emitted as `null` when absent.
#[derive(Serialize)]
struct TransactionWire<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    invoice: &'a Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: &'a Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description_hash: &'a Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    preimage: &'a Option<String>,
    payment_hash: &'a str,
    amount: u64,
    fees_paid: u64,
    created_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    settled_at: &'a Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: &'a Option<u64>,
}

fn transaction_json(tx: &Transaction) -> Value {
    serde_json::to_value(TransactionWire {
        kind: match tx.transaction_type {
            TransactionType::Incoming => "incoming",
            TransactionType::Outgoing => "outgoing",
        },
        state: match tx.state {
            crate::node::TransactionState::Pending => "pending",
            crate::node::TransactionState::Settled => "settled",
            crate::node::TransactionState::Failed => "failed",
            crate::node::TransactionState::Expired => "expired",
        },
        invoice: &tx.invoice,
        description: &tx.description,
        description_hash: &tx.description_hash,
        preimage: &tx.preimage,
        payment_hash: &tx.payment_hash,
        amount: tx.amount_msat,
        fees_paid: tx.fees_paid_msat,
        created_at: tx.created_at,
        settled_at: &tx.settled_at,
        expires_at: &tx.expires_at,
    })
    .expect("TransactionWire always serializes")
}

fn payment_result_json(result: &PaymentResult) -> Value {
    json!({
        "preimage": result.preimage,
        "fees_paid": result.amount_sent_msat.saturating_sub(result.amount_msat),
    })
}

/// `get_info`.
pub async fn get_info(
    ctx: &mut HandlerContext<'_>,
    eligible_methods: &[&'static str],
    notifications_enabled: bool,
) -> HandlerResult<Value> {
    let info = ctx
        .node
        .get_info()
        .await
        .map_err(|e| node_error_code(&e))?;
    let notifications: &[&str] = if notifications_enabled {
        &["payment_received", "payment_sent"]
    } else {
        &[]
    };
    Ok(json!({
        "alias": info.alias,
        "color": info.color,
        "pubkey": info.pubkey,
        "network": match info.network {
            crate::node::Network::Mainnet => "mainnet",
            crate::node::Network::Testnet => "testnet",
            crate::node::Network::Signet => "signet",
            crate::node::Network::Regtest => "regtest",
        },
        "block_height": info.block_height,
        "methods": eligible_methods,
        "notifications": notifications,
    }))
}

/// `get_balance`.
pub async fn get_balance(ctx: &mut HandlerContext<'_>) -> HandlerResult<Value> {
    let balance = match ledger::remaining_balance(ctx.config, ctx.ledger, ctx.now) {
        Some(remaining) => remaining,
        None => ctx
            .node
            .spendable_balance_msat()
            .await
            .map_err(|e| node_error_code(&e))?,
    };
    Ok(json!({ "balance": balance }))
}

/// `make_invoice`.
pub async fn make_invoice(ctx: &mut HandlerContext<'_>, params: Value) -> HandlerResult<Value> {
    let params: MakeInvoiceParams = serde_json::from_value(params)
        .map_err(|e| (Nip47ErrorCode::Internal, e.to_string()))?;

    if let Some(hash) = &params.description_hash {
        let description = params.description.as_ref().ok_or_else(|| {
            (
                Nip47ErrorCode::Other,
                "Must have description when using description_hash".to_string(),
            )
        })?;
        let computed = hex::encode(Sha256::digest(description.as_bytes()));
        if &computed != hash {
            return Err((
                Nip47ErrorCode::Other,
                "description_hash not matching description".to_string(),
            ));
        }
    }

    let invoice = ctx
        .node
        .make_invoice(
            params.amount,
            params.description,
            params.description_hash,
            params.expiry,
        )
        .await
        .map_err(|e| node_error_code(&e))?;

    Ok(json!({
        "type": "incoming",
        "invoice": invoice.bolt11,
        "description": invoice.description,
        "description_hash": invoice.description_hash,
        "payment_hash": invoice.payment_hash,
        "amount": invoice.amount_msat,
        "created_at": invoice.created_at,
        "expires_at": invoice.expires_at,
    }))
}

/// `lookup_invoice`.
pub async fn lookup_invoice(ctx: &mut HandlerContext<'_>, params: Value) -> HandlerResult<Value> {
    let params: LookupInvoiceParams = serde_json::from_value(params)
        .map_err(|e| (Nip47ErrorCode::Internal, e.to_string()))?;

    let transaction = match (params.payment_hash, params.invoice) {
        (Some(hash), None) => ctx.node.lookup_by_payment_hash(&hash).await,
        (None, Some(invoice)) => ctx.node.lookup_by_invoice(&invoice).await,
        _ => {
            return Err((
                Nip47ErrorCode::Other,
                "Neither invoice nor payment_hash given".to_string(),
            ))
        }
    }
    .map_err(|e| node_error_code(&e))?
    .ok_or((Nip47ErrorCode::Other, "transaction not found".to_string()))?;

    Ok(transaction_json(&transaction))
}

/// `list_transactions`.
pub async fn list_transactions(
    ctx: &mut HandlerContext<'_>,
    params: Value,
) -> HandlerResult<Value> {
    let params: ListTransactionsParams = serde_json::from_value(params)
        .map_err(|e| (Nip47ErrorCode::Internal, e.to_string()))?;

    let transaction_type = match params.transaction_type.as_deref() {
        Some("incoming") => Some(TransactionType::Incoming),
        Some("outgoing") => Some(TransactionType::Outgoing),
        Some(other) => {
            return Err((
                Nip47ErrorCode::Other,
                format!("unrecognized transaction type: {other}"),
            ))
        }
        None => None,
    };

    let filter = ListTransactionsFilter {
        from: params.from,
        until: params.until,
        limit: params.limit,
        offset: params.offset,
        unpaid: params.unpaid,
        transaction_type,
    };

    let transactions = ctx
        .node
        .list_transactions(filter)
        .await
        .map_err(|e| node_error_code(&e))?;

    Ok(json!({
        "transactions": transactions.iter().map(transaction_json).collect::<Vec<_>>(),
    }))
}

/// Decodes a BOLT-11 invoice's embedded amount, if any.
fn invoice_embedded_amount_msat(invoice: &str) -> HandlerResult<Option<u64>> {
    let parsed = Bolt11Invoice::from_str(invoice)
        .map_err(|e| (Nip47ErrorCode::Other, format!("invalid invoice: {e}")))?;
    Ok(parsed.amount_milli_satoshis())
}

/// Resolves the amount to reserve/pay for `pay_invoice`: an
/// amount-bearing invoice must not also carry an explicit amount.
fn resolve_pay_invoice_amount(invoice: &str, amount: Option<u64>) -> HandlerResult<u64> {
    match (invoice_embedded_amount_msat(invoice)?, amount) {
        (Some(_), Some(_)) => Err((
            Nip47ErrorCode::Other,
            "amount parameter is unnecessary for invoices with an embedded amount".to_string(),
        )),
        (Some(embedded), None) => Ok(embedded),
        (None, Some(amount)) => Ok(amount),
        (None, None) => Err((
            Nip47ErrorCode::Other,
            "amount_msat parameter required for amountless invoices".to_string(),
        )),
    }
}

/// A reserved, ready-to-send `pay_invoice` call.
pub(crate) struct PreparedInvoicePayment {
    pub(crate) reservation: ledger::Reservation,
    pub(crate) invoice: String,
    pub(crate) explicit_amount: Option<u64>,
}

/// Validates params, resolves the amount to reserve, and reserves it
/// against `ctx.ledger`. Does not touch the node.
pub(crate) fn prepare_pay_invoice(
    ctx: &mut HandlerContext<'_>,
    params: Value,
) -> HandlerResult<PreparedInvoicePayment> {
    let params: PayInvoiceParams = serde_json::from_value(params)
        .map_err(|e| (Nip47ErrorCode::Internal, e.to_string()))?;
    let amount_msat = resolve_pay_invoice_amount(&params.invoice, params.amount)?;
    // Only forward an explicit amount to the node when the invoice is
    // amountless; an amount-bearing invoice is paid for its embedded amount.
    let explicit_amount = if invoice_embedded_amount_msat(&params.invoice)?.is_none() {
        Some(amount_msat)
    } else {
        None
    };
    let reservation = ledger::try_reserve(ctx.config, ctx.ledger, amount_msat, ctx.now)
        .map_err(|_| (Nip47ErrorCode::QuotaExceeded, "budget exceeded".to_string()))?;
    Ok(PreparedInvoicePayment {
        reservation,
        invoice: params.invoice,
        explicit_amount,
    })
}

/// Issues the node RPC call for a prepared `pay_invoice`. Only borrows
/// `node`, so independent calls can run concurrently.
pub(crate) async fn execute_pay_invoice(
    node: &dyn crate::node::LightningNode,
    invoice: String,
    explicit_amount: Option<u64>,
) -> Result<PaymentResult, NodeError> {
    node.pay_invoice(&invoice, explicit_amount).await
}

/// Commits or releases a reservation against the node's payment outcome.
pub(crate) fn finish_payment(
    config: &BudgetConfig,
    ledger: &mut LedgerEntry,
    mut reservation: ledger::Reservation,
    outcome: Result<PaymentResult, NodeError>,
) -> HandlerResult<Value> {
    match outcome {
        Ok(result) => {
            let _ = ledger::commit(&mut reservation);
            Ok(payment_result_json(&result))
        }
        Err(e) => {
            ledger::release(config, ledger, &mut reservation);
            Err(node_error_code(&e))
        }
    }
}

/// `pay_invoice`.
pub async fn pay_invoice(ctx: &mut HandlerContext<'_>, params: Value) -> HandlerResult<Value> {
    let prepared = prepare_pay_invoice(ctx, params)?;
    let outcome = execute_pay_invoice(ctx.node, prepared.invoice, prepared.explicit_amount).await;
    finish_payment(ctx.config, ctx.ledger, prepared.reservation, outcome)
}

/// A reserved, ready-to-send `pay_keysend` call.
pub(crate) struct PreparedKeysendPayment {
    pub(crate) reservation: ledger::Reservation,
    pub(crate) pubkey: String,
    pub(crate) amount_msat: u64,
    pub(crate) tlv_records: Vec<(u64, Vec<u8>)>,
}

/// Validates params and reserves the amount against `ctx.ledger`. Does not
/// touch the node.
pub(crate) fn prepare_pay_keysend(
    ctx: &mut HandlerContext<'_>,
    params: Value,
) -> HandlerResult<PreparedKeysendPayment> {
    let params: PayKeysendParams = serde_json::from_value(params)
        .map_err(|e| (Nip47ErrorCode::Internal, e.to_string()))?;
    if params.preimage.is_some() {
        return Err((
            Nip47ErrorCode::Other,
            "CLN generates the preimage itself".to_string(),
        ));
    }
    let tlv_records = params
        .tlv_records
        .iter()
        .map(|r| Ok((r.record_type, hex::decode(&r.value).map_err(|e| {
            (Nip47ErrorCode::Internal, format!("invalid tlv value hex: {e}"))
        })?)))
        .collect::<HandlerResult<Vec<_>>>()?;
    let reservation = ledger::try_reserve(ctx.config, ctx.ledger, params.amount, ctx.now)
        .map_err(|_| (Nip47ErrorCode::QuotaExceeded, "budget exceeded".to_string()))?;
    Ok(PreparedKeysendPayment {
        reservation,
        pubkey: params.pubkey,
        amount_msat: params.amount,
        tlv_records,
    })
}

/// Issues the node RPC call for a prepared `pay_keysend`. Only borrows
/// `node`, so independent calls can run concurrently.
pub(crate) async fn execute_pay_keysend(
    node: &dyn crate::node::LightningNode,
    pubkey: String,
    amount_msat: u64,
    tlv_records: Vec<(u64, Vec<u8>)>,
) -> Result<PaymentResult, NodeError> {
    node.pay_keysend(&pubkey, amount_msat, tlv_records).await
}

/// `pay_keysend`.
pub async fn pay_keysend(ctx: &mut HandlerContext<'_>, params: Value) -> HandlerResult<Value> {
    let prepared = prepare_pay_keysend(ctx, params)?;
    let outcome = execute_pay_keysend(
        ctx.node,
        prepared.pubkey,
        prepared.amount_msat,
        prepared.tlv_records,
    )
    .await;
    finish_payment(ctx.config, ctx.ledger, prepared.reservation, outcome)
}

/// `make_offer`. Not budget-gated: creating an offer spends nothing.
pub async fn make_offer(ctx: &mut HandlerContext<'_>, params: Value) -> HandlerResult<Value> {
    let params: MakeOfferParams = serde_json::from_value(params)
        .map_err(|e| (Nip47ErrorCode::Internal, e.to_string()))?;
    let offer = ctx
        .node
        .make_offer(
            params.amount,
            params.description,
            params.issuer,
            params.absolute_expiry,
        )
        .await
        .map_err(|e| node_error_code(&e))?;
    Ok(json!({
        "offer": offer.bolt12,
        "amount": offer.info.amount_msat,
        "description": offer.info.description,
        "issuer": offer.info.issuer,
        "expires_at": offer.info.expires_at,
    }))
}

/// `lookup_offer`/`get_offer_info`. Not budget-gated: decoding spends nothing.
pub async fn lookup_offer(ctx: &mut HandlerContext<'_>, params: Value) -> HandlerResult<Value> {
    let params: LookupOfferParams = serde_json::from_value(params)
        .map_err(|e| (Nip47ErrorCode::Internal, e.to_string()))?;
    let info = ctx
        .node
        .decode_offer(&params.offer)
        .await
        .map_err(|e| node_error_code(&e))?;
    Ok(json!({
        "amount": info.amount_msat,
        "description": info.description,
        "issuer": info.issuer,
        "expires_at": info.expires_at,
    }))
}

/// A reserved, ready-to-send `pay_offer` call.
pub(crate) struct PreparedOfferPayment {
    pub(crate) reservation: ledger::Reservation,
    pub(crate) offer: String,
    pub(crate) amount_msat: Option<u64>,
    pub(crate) payer_note: Option<String>,
}

/// Parses params and decodes the offer. A node RPC call, so independent
/// sub-requests can decode concurrently before the ledger is touched.
pub(crate) async fn decode_pay_offer(
    node: &dyn crate::node::LightningNode,
    params: Value,
) -> HandlerResult<(PayOfferParams, crate::node::OfferInfo)> {
    let params: PayOfferParams = serde_json::from_value(params)
        .map_err(|e| (Nip47ErrorCode::Internal, e.to_string()))?;
    let offer_info = node
        .decode_offer(&params.offer)
        .await
        .map_err(|e| node_error_code(&e))?;
    Ok((params, offer_info))
}

/// Resolves the amount to reserve from the decoded offer and reserves it
/// against `ctx.ledger`. Does not touch the node.
pub(crate) fn prepare_pay_offer(
    ctx: &mut HandlerContext<'_>,
    params: PayOfferParams,
    offer_info: crate::node::OfferInfo,
) -> HandlerResult<PreparedOfferPayment> {
    let amount_msat = match (offer_info.amount_msat, params.amount) {
        (Some(embedded), _) => embedded,
        (None, Some(amount)) => amount,
        (None, None) => {
            return Err((
                Nip47ErrorCode::Other,
                "amount_msat parameter required".to_string(),
            ))
        }
    };
    let reservation = ledger::try_reserve(ctx.config, ctx.ledger, amount_msat, ctx.now)
        .map_err(|_| (Nip47ErrorCode::QuotaExceeded, "budget exceeded".to_string()))?;
    Ok(PreparedOfferPayment {
        reservation,
        offer: params.offer,
        amount_msat: params.amount,
        payer_note: params.payer_note,
    })
}

/// Issues the node RPC call for a prepared `pay_offer`. Only borrows
/// `node`, so independent calls can run concurrently.
pub(crate) async fn execute_pay_offer(
    node: &dyn crate::node::LightningNode,
    offer: String,
    amount_msat: Option<u64>,
    payer_note: Option<String>,
) -> Result<PaymentResult, NodeError> {
    node.pay_offer(&offer, amount_msat, payer_note).await
}

/// `pay_offer`. Idempotency across relay retransmission of the
/// same source event id is enforced by the Dispatcher's pending-request
/// cache, not here.
pub async fn pay_offer(ctx: &mut HandlerContext<'_>, params: Value) -> HandlerResult<Value> {
    let (params, offer_info) = decode_pay_offer(ctx.node, params).await?;
    let prepared = prepare_pay_offer(ctx, params, offer_info)?;
    let outcome = execute_pay_offer(
        ctx.node,
        prepared.offer,
        prepared.amount_msat,
        prepared.payer_note,
    )
    .await;
    finish_payment(ctx.config, ctx.ledger, prepared.reservation, outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn description_hash_must_match_description() {
        let description = "coffee";
        let good_hash = hex::encode(Sha256::digest(description.as_bytes()));
        assert_eq!(good_hash.len(), 64);
    }

    #[test]
    fn resolve_pay_invoice_amount_rejects_amount_on_amount_bearing_invoice() {
        // A syntactically-invalid invoice is enough to exercise the decode-error path.
        let err = invoice_embedded_amount_msat("not-an-invoice").unwrap_err();
        assert_eq!(err.0, Nip47ErrorCode::Other);
    }
}
