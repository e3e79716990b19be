//! NIP-47 wire-level request/response shapes.
//!
//! These types are owned by this crate rather than borrowed from
//! `nostr_sdk::nips::nip47`: the handler surface here covers every NIP-47
//! method this wallet implements (including the offer and multi-*
//! methods), and defining the shapes directly keeps method dispatch a
//! straightforward match on the `method` string rather than a dependency
//! on a third-party enum's exact variant set.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Nip47ErrorCode;

/// A decrypted, JSON-parsed request payload.
#[derive(Debug, Clone, Deserialize)]
pub struct RawRequest {
    /// The method name, e.g. `"pay_invoice"`.
    pub method: String,
    /// Method-specific parameters, parsed once the method is known.
    #[serde(default)]
    pub params: Value,
}

/// `{result_type, result}` on success, or `{result_type, error}` on failure.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseEnvelope {
    /// Echoes the request's method name.
    pub result_type: String,
    /// Present on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Present on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

impl ResponseEnvelope {
    /// Builds a successful envelope.
    pub fn ok(method: &str, result: Value) -> Self {
        ResponseEnvelope {
            result_type: method.to_string(),
            result: Some(result),
            error: None,
        }
    }

    /// Builds an error envelope.
    pub fn err(method: &str, code: Nip47ErrorCode, message: impl Into<String>) -> Self {
        ResponseEnvelope {
            result_type: method.to_string(),
            result: None,
            error: Some(ErrorPayload {
                code: code.as_str().to_string(),
                message: message.into(),
            }),
        }
    }
}

/// The NIP-47 wire error shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// One of the NIP-47 wire error codes.
    pub code: String,
    /// A human-readable message.
    pub message: String,
}

// --- Params -----------------------------------------------------------

/// `make_invoice` params.
#[derive(Debug, Clone, Deserialize)]
pub struct MakeInvoiceParams {
    /// Amount in millisatoshis; `0` for a zero-amount invoice.
    pub amount: u64,
    /// Plaintext description.
    #[serde(default)]
    pub description: Option<String>,
    /// Hex-encoded SHA-256 of a description not embedded in the invoice.
    #[serde(default)]
    pub description_hash: Option<String>,
    /// Expiry in seconds; defaults to the node's own default when absent.
    #[serde(default)]
    pub expiry: Option<u64>,
}

/// `lookup_invoice` params. Exactly one of `payment_hash`/`invoice` is required.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LookupInvoiceParams {
    /// Hex-encoded payment hash.
    #[serde(default)]
    pub payment_hash: Option<String>,
    /// BOLT-11 invoice string.
    #[serde(default)]
    pub invoice: Option<String>,
}

/// `list_transactions` params.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListTransactionsParams {
    /// Inclusive lower bound, Unix seconds.
    #[serde(default)]
    pub from: Option<u64>,
    /// Inclusive upper bound, Unix seconds.
    #[serde(default)]
    pub until: Option<u64>,
    /// Maximum number of results.
    #[serde(default)]
    pub limit: Option<u64>,
    /// Offset into the result set.
    #[serde(default)]
    pub offset: Option<u64>,
    /// Include unpaid incoming invoices.
    #[serde(default)]
    pub unpaid: bool,
    /// Restrict to `"incoming"` or `"outgoing"`.
    #[serde(default, rename = "type")]
    pub transaction_type: Option<String>,
}

/// `pay_invoice` params.
#[derive(Debug, Clone, Deserialize)]
pub struct PayInvoiceParams {
    /// BOLT-11 invoice string.
    pub invoice: String,
    /// Required only for amountless invoices.
    #[serde(default)]
    pub amount: Option<u64>,
    /// Caller-supplied correlation id, echoed in the `d` tag for multi-*.
    #[serde(default)]
    pub id: Option<String>,
}

/// One sub-request of `multi_pay_invoice`.
#[derive(Debug, Clone, Deserialize)]
pub struct MultiPayInvoiceParams {
    /// The sub-invoices to pay independently.
    pub invoices: Vec<PayInvoiceParams>,
}

/// `pay_keysend` params.
#[derive(Debug, Clone, Deserialize)]
pub struct PayKeysendParams {
    /// Recipient node pubkey, hex-encoded.
    pub pubkey: String,
    /// Amount in millisatoshis.
    pub amount: u64,
    /// Caller-supplied preimage; always rejected, since the node generates
    /// its own.
    #[serde(default)]
    pub preimage: Option<String>,
    /// Caller-supplied correlation id.
    #[serde(default)]
    pub id: Option<String>,
    /// Extra TLV records, as `{type, value}` with hex-encoded `value`.
    #[serde(default)]
    pub tlv_records: Vec<TlvRecordParam>,
}

/// A single custom TLV record.
#[derive(Debug, Clone, Deserialize)]
pub struct TlvRecordParam {
    /// TLV type number.
    #[serde(rename = "type")]
    pub record_type: u64,
    /// Hex-encoded value.
    pub value: String,
}

/// One sub-request of `multi_pay_keysend`.
#[derive(Debug, Clone, Deserialize)]
pub struct MultiPayKeysendParams {
    /// The sub-keysends to send independently.
    pub keysends: Vec<PayKeysendParams>,
}

/// `make_offer` params.
#[derive(Debug, Clone, Deserialize)]
pub struct MakeOfferParams {
    /// Amount in millisatoshis; absent for an amount-on-request offer.
    #[serde(default)]
    pub amount: Option<u64>,
    /// Offer description.
    pub description: String,
    /// Offer issuer.
    #[serde(default)]
    pub issuer: Option<String>,
    /// Unix timestamp the offer stops being valid.
    #[serde(default)]
    pub absolute_expiry: Option<u64>,
}

/// `lookup_offer`/`get_offer_info` params.
#[derive(Debug, Clone, Deserialize)]
pub struct LookupOfferParams {
    /// The bolt12 offer string.
    pub offer: String,
}

/// `pay_offer` params.
#[derive(Debug, Clone, Deserialize)]
pub struct PayOfferParams {
    /// The bolt12 offer string.
    pub offer: String,
    /// Required only if the offer has no embedded amount.
    #[serde(default)]
    pub amount: Option<u64>,
    /// Optional note attached to the payment.
    #[serde(default)]
    pub payer_note: Option<String>,
    /// Caller-supplied correlation id.
    #[serde(default)]
    pub id: Option<String>,
}

/// One sub-request of `multi_pay_offer`.
#[derive(Debug, Clone, Deserialize)]
pub struct MultiPayOfferParams {
    /// The sub-offers to pay independently.
    pub offers: Vec<PayOfferParams>,
}
