//! Translates node-side payment events into encrypted kind-23196 events
//! fanned out to every opted-in connection. The node-side hook names
//! (`invoice_payment`, `sendpay_success`) are `nip47-plugind`'s concern;
//! this module only consumes the node-agnostic [`PaymentEvent`] they're
//! translated into, keeping the fan-out/encryption logic testable without
//! a real node.

use nostr_sdk::nips::nip04;
use nostr_sdk::{EventBuilder, Kind, Tag, TagStandard};
use serde::Serialize;
use tracing::warn;

use crate::connection::Connection;
use crate::relay::RelayPool;

/// The NIP-47 notification event kind. No dedicated `nostr_sdk::Kind`
/// constant exists for kind 23196 (unlike 13194/23194/23195, which are
/// dedicated enum variants), so it is addressed via the `Kind::Custom`
/// escape hatch.
pub const NOTIFICATION_KIND: Kind = Kind::Custom(23196);

/// A settled incoming payment (from the `invoice_payment` hook).
#[derive(Debug, Clone)]
pub struct PaymentReceived {
    /// BOLT-11 invoice string.
    pub invoice: Option<String>,
    /// Invoice description.
    pub description: Option<String>,
    /// Hex-encoded description hash, if any.
    pub description_hash: Option<String>,
    /// Hex-encoded preimage.
    pub preimage: String,
    /// Hex-encoded payment hash.
    pub payment_hash: String,
    /// Amount received, in millisatoshis.
    pub amount_msat: u64,
    /// Unix creation timestamp.
    pub created_at: u64,
    /// Unix settlement timestamp.
    pub settled_at: u64,
    /// Unix expiry timestamp, if any.
    pub expires_at: Option<u64>,
}

/// A settled outgoing payment (from the `sendpay_success` hook).
#[derive(Debug, Clone)]
pub struct PaymentSent {
    /// BOLT-11/BOLT-12 request string.
    pub invoice: Option<String>,
    /// Invoice description.
    pub description: Option<String>,
    /// Hex-encoded preimage.
    pub preimage: String,
    /// Hex-encoded payment hash.
    pub payment_hash: String,
    /// Amount the recipient was owed, in millisatoshis.
    pub amount_msat: u64,
    /// Routing fees paid, in millisatoshis.
    pub fees_paid_msat: u64,
    /// Unix creation timestamp.
    pub created_at: u64,
    /// Unix settlement timestamp.
    pub settled_at: u64,
}

/// A node-agnostic payment event, produced by translating a CLN hook
/// payload (`nip47-plugind`'s concern).
#[derive(Debug, Clone)]
pub enum PaymentEvent {
    /// `invoice_payment` → `payment_received`.
    Received(PaymentReceived),
    /// `sendpay_success` → `payment_sent`.
    Sent(PaymentSent),
}

#[derive(Serialize)]
struct NotificationEnvelope {
    notification_type: &'static str,
    notification: serde_json::Value,
}

/// Wire shape for a `payment_received` notification. Optional fields are
/// omitted from the JSON rather than emitted as `null` when absent.
#[derive(Serialize)]
struct PaymentReceivedWire<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    invoice: &'a Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: &'a Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description_hash: &'a Option<String>,
    preimage: &'a str,
    payment_hash: &'a str,
    amount: u64,
    fees_paid: u64,
    created_at: u64,
    settled_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: &'a Option<u64>,
}

/// Wire shape for a `payment_sent` notification.
#[derive(Serialize)]
struct PaymentSentWire<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    invoice: &'a Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: &'a Option<String>,
    preimage: &'a str,
    payment_hash: &'a str,
    amount: u64,
    fees_paid: u64,
    created_at: u64,
    settled_at: u64,
}

impl PaymentEvent {
    fn envelope(&self) -> NotificationEnvelope {
        match self {
            PaymentEvent::Received(p) => NotificationEnvelope {
                notification_type: "payment_received",
                notification: serde_json::to_value(PaymentReceivedWire {
                    kind: "incoming",
                    invoice: &p.invoice,
                    description: &p.description,
                    description_hash: &p.description_hash,
                    preimage: &p.preimage,
                    payment_hash: &p.payment_hash,
                    amount: p.amount_msat,
                    fees_paid: 0,
                    created_at: p.created_at,
                    settled_at: p.settled_at,
                    expires_at: &p.expires_at,
                })
                .expect("PaymentReceivedWire always serializes"),
            },
            PaymentEvent::Sent(p) => NotificationEnvelope {
                notification_type: "payment_sent",
                notification: serde_json::to_value(PaymentSentWire {
                    kind: "outgoing",
                    invoice: &p.invoice,
                    description: &p.description,
                    preimage: &p.preimage,
                    payment_hash: &p.payment_hash,
                    amount: p.amount_msat,
                    fees_paid: p.fees_paid_msat,
                    created_at: p.created_at,
                    settled_at: p.settled_at,
                })
                .expect("PaymentSentWire always serializes"),
            },
        }
    }
}

/// Fans a [`PaymentEvent`] out to every non-revoked, opted-in connection.
/// Encrypted with NIP-04 (upgrading to NIP-44 once both sides advertise
/// support is left for later, see DESIGN.md).
pub async fn notify(relay_pool: &RelayPool, connections: &[Connection], event: &PaymentEvent) {
    let envelope = event.envelope();
    let Ok(plaintext) = serde_json::to_string(&envelope) else {
        warn!("failed to serialize notification payload");
        return;
    };

    for connection in connections {
        if connection.revoked {
            continue;
        }
        let Ok(encrypted) = nip04::encrypt(
            &connection.wallet_secret,
            &connection.client_pubkey,
            &plaintext,
        ) else {
            warn!(connection = %connection.name, "failed to encrypt notification");
            continue;
        };
        let tags = vec![Tag::from_standardized(TagStandard::public_key(
            connection.client_pubkey,
        ))];
        let Ok(notification_event) =
            EventBuilder::new(NOTIFICATION_KIND, encrypted, tags).to_event(&connection.wallet_keys())
        else {
            warn!(connection = %connection.name, "failed to build notification event");
            continue;
        };
        if let Err(e) = relay_pool.publish(notification_event).await {
            warn!(connection = %connection.name, error = %e, "failed to publish notification");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn received_envelope_uses_payment_received_type() {
        let event = PaymentEvent::Received(PaymentReceived {
            invoice: Some("lnbc1...".to_string()),
            description: None,
            description_hash: None,
            preimage: "aa".repeat(32),
            payment_hash: "bb".repeat(32),
            amount_msat: 1000,
            created_at: 0,
            settled_at: 1,
            expires_at: None,
        });
        let envelope = event.envelope();
        assert_eq!(envelope.notification_type, "payment_received");
        assert_eq!(envelope.notification["fees_paid"], 0);
    }

    #[test]
    fn sent_envelope_uses_payment_sent_type() {
        let event = PaymentEvent::Sent(PaymentSent {
            invoice: Some("lnbc1...".to_string()),
            description: None,
            preimage: "aa".repeat(32),
            payment_hash: "bb".repeat(32),
            amount_msat: 1000,
            fees_paid_msat: 5,
            created_at: 0,
            settled_at: 1,
        });
        let envelope = event.envelope();
        assert_eq!(envelope.notification_type, "payment_sent");
        assert_eq!(envelope.notification["fees_paid"], 5);
    }
}
