//! The request dispatcher: one Tokio task per connection, owning a mailbox
//! of inbound request events and serializing every admission decision
//! against that connection's ledger. A channel of typed requests drained
//! by an owned task, narrowed from "N workers share one channel" to "one
//! task per connection, total order per connection".

use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use nostr_sdk::nips::{nip04, nip44};
use nostr_sdk::{Alphabet, Event, EventBuilder, Kind, PublicKey, SecretKey, SingleLetterTag};
use nostr_sdk::{Tag, TagStandard};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::connection::{Connection, ConnectionStore};
use crate::error::{HandlerResult, Nip47ErrorCode};
use crate::handlers::{self, HandlerContext};
use crate::ledger;
use crate::node::{LightningNode, NodeError, PaymentResult};
use crate::pending::PendingCache;
use crate::relay::RelayPool;
use crate::wire::{RawRequest, ResponseEnvelope};

/// A request older than this (vs. local wall-clock) is discarded unanswered.
pub const MAX_REQUEST_AGE_SECS: u64 = 10 * 60;

/// The NIP-47 request event kind.
pub const REQUEST_KIND: Kind = Kind::WalletConnectRequest;
/// The NIP-47 response event kind.
pub const RESPONSE_KIND: Kind = Kind::WalletConnectResponse;

/// Which scheme successfully decrypted a request; the response is
/// encrypted back with the same one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scheme {
    Nip44,
    Nip04,
}

fn decrypt(secret_key: &SecretKey, client_pubkey: &PublicKey, content: &str) -> Option<(String, Scheme)> {
    if let Ok(plaintext) = nip44::decrypt(secret_key, client_pubkey, content) {
        return Some((plaintext, Scheme::Nip44));
    }
    if let Ok(plaintext) = nip04::decrypt(secret_key, client_pubkey, content) {
        return Some((plaintext, Scheme::Nip04));
    }
    None
}

fn encrypt(secret_key: &SecretKey, client_pubkey: &PublicKey, plaintext: &str, scheme: Scheme) -> Option<String> {
    match scheme {
        Scheme::Nip44 => nip44::encrypt(secret_key, client_pubkey, plaintext, nip44::Version::V2).ok(),
        Scheme::Nip04 => nip04::encrypt(secret_key, client_pubkey, plaintext).ok(),
    }
}

/// The per-connection actor. Owns the mutable `Connection` row and the
/// connection's pending-request cache; all three are only ever touched
/// from this task, giving a single connection a total order on its own
/// admission decisions while distinct connections progress in parallel.
pub struct ConnectionActor<S: ConnectionStore> {
    connection: Connection,
    store: Arc<S>,
    node: Arc<dyn LightningNode>,
    relay_pool: Arc<RelayPool>,
    pending: PendingCache,
    notifications_enabled: bool,
    mailbox: mpsc::Receiver<Event>,
}

impl<S: ConnectionStore + 'static> ConnectionActor<S> {
    /// Spawns the actor and returns a handle to feed it inbound request
    /// events (fed by the Relay Pool fan-out task, routed by `p`-tag).
    pub fn spawn(
        connection: Connection,
        store: Arc<S>,
        node: Arc<dyn LightningNode>,
        relay_pool: Arc<RelayPool>,
        notifications_enabled: bool,
    ) -> mpsc::Sender<Event> {
        let (tx, rx) = mpsc::channel(64);
        let actor = ConnectionActor {
            connection,
            store,
            node,
            relay_pool,
            pending: PendingCache::default(),
            notifications_enabled,
            mailbox: rx,
        };
        tokio::spawn(actor.run());
        tx
    }

    async fn run(mut self) {
        while let Some(event) = self.mailbox.recv().await {
            self.handle_event(event).await;
        }
        debug!(connection = %self.connection.name, "dispatcher mailbox closed");
    }

    /// Processes one inbound request event end to end: intake, decrypt,
    /// parse, idempotency, admission, dispatch, response. Each stage can
    /// end the pipeline early by dropping the event unanswered.
    async fn handle_event(&mut self, event: Event) {
        let now = now_unix();

        if event.kind != REQUEST_KIND || event.pubkey != self.connection.client_pubkey {
            return;
        }
        if now.saturating_sub(event.created_at.as_u64()) > MAX_REQUEST_AGE_SECS {
            debug!(event_id = %event.id, "dropping stale request");
            return;
        }

        if let Some(cached) = self.pending.get(&event.id, now) {
            info!(event_id = %event.id, connection = %self.connection.name, "replaying cached response");
            for response_event in cached.response_events.clone() {
                if let Err(e) = self.relay_pool.publish(response_event).await {
                    warn!(error = %e, "failed to republish cached response");
                }
            }
            return;
        }

        let Some((plaintext, scheme)) = decrypt(
            &self.connection.wallet_secret,
            &self.connection.client_pubkey,
            &event.content,
        ) else {
            debug!(event_id = %event.id, "discarding request: decryption failed under both schemes");
            return;
        };

        let raw: Result<RawRequest, _> = serde_json::from_str(&plaintext);
        let responses = match raw {
            Err(_) => vec![(
                None,
                ResponseEnvelope::err(
                    "unknown",
                    Nip47ErrorCode::Internal,
                    "malformed request payload",
                ),
            )],
            Ok(raw) => self.dispatch(raw, now).await,
        };

        let mut response_events = Vec::with_capacity(responses.len());
        for (sub_id, envelope) in responses {
            if let Some(response_event) =
                self.build_response_event(&event, &envelope, sub_id.as_deref(), scheme)
            {
                response_events.push(response_event);
            }
        }
        for response_event in &response_events {
            if let Err(e) = self.relay_pool.publish(response_event.clone()).await {
                warn!(error = %e, "failed to publish response");
            }
        }
        self.pending.insert(event.id, response_events, now);
    }

    fn build_response_event(
        &self,
        source: &Event,
        envelope: &ResponseEnvelope,
        sub_id: Option<&str>,
        scheme: Scheme,
    ) -> Option<Event> {
        let plaintext = serde_json::to_string(envelope).ok()?;
        let encrypted = encrypt(
            &self.connection.wallet_secret,
            &self.connection.client_pubkey,
            &plaintext,
            scheme,
        )?;
        let mut tags = vec![
            Tag::from_standardized(TagStandard::public_key(self.connection.client_pubkey)),
            Tag::from_standardized(TagStandard::event(source.id)),
        ];
        if let Some(sub_id) = sub_id {
            tags.push(Tag::from_standardized(TagStandard::Identifier(
                sub_id.to_string(),
            )));
        }
        EventBuilder::new(RESPONSE_KIND, encrypted, tags)
            .to_event(&self.connection.wallet_keys())
            .ok()
    }

    /// Checks eligibility and invokes the named method, producing one or
    /// more `(sub_id, envelope)` pairs (more than one only for multi-*
    /// methods).
    async fn dispatch(&mut self, raw: RawRequest, now: u64) -> Vec<(Option<String>, ResponseEnvelope)> {
        let eligible = ledger::eligible_methods(&self.connection.budget);
        if !eligible.contains(&raw.method.as_str()) {
            if !is_known_method(&raw.method) {
                return vec![(
                    None,
                    ResponseEnvelope::err(&raw.method, Nip47ErrorCode::NotImplemented, "unknown method"),
                )];
            }
            return vec![(
                None,
                ResponseEnvelope::err(
                    &raw.method,
                    Nip47ErrorCode::Restricted,
                    "method not eligible for this connection's budget",
                ),
            )];
        }

        let results = self.dispatch_eligible(&raw.method, raw.params, now).await;
        let method = raw.method;
        let envelopes = results
            .into_iter()
            .map(|(sub_id, result)| {
                let envelope = match result {
                    Ok(value) => ResponseEnvelope::ok(&method, value),
                    Err((code, message)) => ResponseEnvelope::err(&method, code, message),
                };
                (sub_id, envelope)
            })
            .collect();

        if let Err(e) = self
            .store
            .persist_ledger(&self.connection.name, &self.connection.ledger)
            .await
        {
            warn!(connection = %self.connection.name, error = %e, "failed to persist ledger after dispatch");
        }

        envelopes
    }

    async fn dispatch_eligible(
        &mut self,
        method: &str,
        params: serde_json::Value,
        now: u64,
    ) -> Vec<(Option<String>, crate::error::HandlerResult<serde_json::Value>)> {
        let node = self.node.as_ref();
        let mut ctx = HandlerContext {
            config: &self.connection.budget,
            ledger: &mut self.connection.ledger,
            node,
            now,
        };
        match method {
            "get_info" => {
                let eligible = ledger::eligible_methods(ctx.config);
                vec![(
                    None,
                    handlers::get_info(&mut ctx, &eligible, self.notifications_enabled).await,
                )]
            }
            "get_balance" => vec![(None, handlers::get_balance(&mut ctx).await)],
            "make_invoice" => vec![(None, handlers::make_invoice(&mut ctx, params).await)],
            "lookup_invoice" => vec![(None, handlers::lookup_invoice(&mut ctx, params).await)],
            "list_transactions" => vec![(None, handlers::list_transactions(&mut ctx, params).await)],
            "pay_invoice" => {
                let id = params.get("id").and_then(|v| v.as_str()).map(str::to_string);
                vec![(id, handlers::pay_invoice(&mut ctx, params).await)]
            }
            "pay_keysend" => {
                let id = params.get("id").and_then(|v| v.as_str()).map(str::to_string);
                vec![(id, handlers::pay_keysend(&mut ctx, params).await)]
            }
            "make_offer" => vec![(None, handlers::make_offer(&mut ctx, params).await)],
            "lookup_offer" | "get_offer_info" => {
                vec![(None, handlers::lookup_offer(&mut ctx, params).await)]
            }
            "pay_offer" => {
                let id = params.get("id").and_then(|v| v.as_str()).map(str::to_string);
                vec![(id, handlers::pay_offer(&mut ctx, params).await)]
            }
            "multi_pay_invoice" => {
                let invoices = params
                    .get("invoices")
                    .and_then(|v| v.as_array())
                    .cloned()
                    .unwrap_or_default();
                let mut ids = Vec::with_capacity(invoices.len());
                let mut items = Vec::with_capacity(invoices.len());
                for (index, sub) in invoices.into_iter().enumerate() {
                    ids.push(
                        sub.get("id")
                            .and_then(|v| v.as_str())
                            .map(str::to_string)
                            .unwrap_or_else(|| index.to_string()),
                    );
                    items.push(handlers::prepare_pay_invoice(&mut ctx, sub).map(|p| {
                        let fut = handlers::execute_pay_invoice(node, p.invoice, p.explicit_amount);
                        (p.reservation, fut)
                    }));
                }
                let results = join_payments(&mut ctx, items).await;
                ids.into_iter()
                    .zip(results)
                    .map(|(id, r)| (Some(id), r))
                    .collect()
            }
            "multi_pay_keysend" => {
                let keysends = params
                    .get("keysends")
                    .and_then(|v| v.as_array())
                    .cloned()
                    .unwrap_or_default();
                let mut ids = Vec::with_capacity(keysends.len());
                let mut items = Vec::with_capacity(keysends.len());
                for (index, sub) in keysends.into_iter().enumerate() {
                    ids.push(
                        sub.get("id")
                            .and_then(|v| v.as_str())
                            .map(str::to_string)
                            .unwrap_or_else(|| index.to_string()),
                    );
                    items.push(handlers::prepare_pay_keysend(&mut ctx, sub).map(|p| {
                        let fut =
                            handlers::execute_pay_keysend(node, p.pubkey, p.amount_msat, p.tlv_records);
                        (p.reservation, fut)
                    }));
                }
                let results = join_payments(&mut ctx, items).await;
                ids.into_iter()
                    .zip(results)
                    .map(|(id, r)| (Some(id), r))
                    .collect()
            }
            "multi_pay_offer" => {
                let offers = params
                    .get("offers")
                    .and_then(|v| v.as_array())
                    .cloned()
                    .unwrap_or_default();
                let mut ids = Vec::with_capacity(offers.len());
                for (index, sub) in offers.iter().enumerate() {
                    ids.push(
                        sub.get("id")
                            .and_then(|v| v.as_str())
                            .map(str::to_string)
                            .unwrap_or_else(|| index.to_string()),
                    );
                }
                let decoded = join_all(
                    offers
                        .into_iter()
                        .map(|sub| handlers::decode_pay_offer(node, sub)),
                )
                .await;
                let mut items = Vec::with_capacity(decoded.len());
                for decoded_one in decoded {
                    items.push(
                        decoded_one
                            .and_then(|(params, info)| {
                                handlers::prepare_pay_offer(&mut ctx, params, info)
                            })
                            .map(|p| {
                                let fut = handlers::execute_pay_offer(
                                    node,
                                    p.offer,
                                    p.amount_msat,
                                    p.payer_note,
                                );
                                (p.reservation, fut)
                            }),
                    );
                }
                let results = join_payments(&mut ctx, items).await;
                ids.into_iter()
                    .zip(results)
                    .map(|(id, r)| (Some(id), r))
                    .collect()
            }
            _ => vec![(
                None,
                Err((Nip47ErrorCode::NotImplemented, "unknown method".to_string())),
            )],
        }
    }
}

/// Runs every already-reserved sub-request's node RPC call concurrently,
/// then serializes the commit/release against the connection's ledger.
/// Sub-requests that failed to reserve pass their error straight through
/// without a future to await.
async fn join_payments<F>(
    ctx: &mut HandlerContext<'_>,
    items: Vec<HandlerResult<(ledger::Reservation, F)>>,
) -> Vec<HandlerResult<serde_json::Value>>
where
    F: Future<Output = Result<PaymentResult, NodeError>>,
{
    let mut reservations: Vec<Option<ledger::Reservation>> = Vec::with_capacity(items.len());
    let mut results: Vec<Option<HandlerResult<serde_json::Value>>> = Vec::with_capacity(items.len());
    let mut pending_futures = Vec::new();
    let mut pending_indices = Vec::new();

    for item in items {
        match item {
            Ok((reservation, fut)) => {
                reservations.push(Some(reservation));
                results.push(None);
                pending_indices.push(results.len() - 1);
                pending_futures.push(fut);
            }
            Err(e) => {
                reservations.push(None);
                results.push(Some(Err(e)));
            }
        }
    }

    let outcomes = join_all(pending_futures).await;
    for (index, outcome) in pending_indices.into_iter().zip(outcomes) {
        let reservation = reservations[index]
            .take()
            .expect("a pending index always has a reservation");
        results[index] = Some(handlers::finish_payment(ctx.config, ctx.ledger, reservation, outcome));
    }

    results
        .into_iter()
        .map(|r| r.expect("every index is filled by either the error or outcome pass"))
        .collect()
}

fn is_known_method(method: &str) -> bool {
    ledger::READ_METHODS.contains(&method)
        || ledger::PAYMENT_METHODS.contains(&method)
        || ledger::OFFER_READ_METHODS.contains(&method)
        || ledger::OFFER_PAYMENT_METHODS.contains(&method)
        || method == "get_offer_info"
}

fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Builds the subscription filter for a connection's request events:
/// kind 23194, authored by the client, p-tagged to the wallet pubkey.
pub fn request_filter(connection: &Connection, since: nostr_sdk::Timestamp) -> nostr_sdk::Filter {
    nostr_sdk::Filter::new()
        .kind(REQUEST_KIND)
        .author(connection.client_pubkey)
        .since(since)
        .custom_tag(
            SingleLetterTag::lowercase(Alphabet::P),
            vec![connection.wallet_pubkey().to_string()],
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::MemoryConnectionStore;
    use crate::ledger::BudgetConfig;
    use crate::node::{
        Invoice, ListTransactionsFilter, NodeError, NodeInfo, Offer, OfferInfo, PaymentResult,
        Transaction,
    };
    use async_trait::async_trait;
    use nostr_sdk::Keys;

    struct FakeNode;

    #[async_trait]
    impl LightningNode for FakeNode {
        async fn get_info(&self) -> Result<NodeInfo, NodeError> {
            Ok(NodeInfo {
                alias: "test".to_string(),
                color: "000000".to_string(),
                pubkey: "00".repeat(33),
                network: crate::node::Network::Regtest,
                block_height: 1,
            })
        }
        async fn spendable_balance_msat(&self) -> Result<u64, NodeError> {
            Ok(0)
        }
        async fn make_invoice(
            &self,
            amount_msat: u64,
            description: Option<String>,
            description_hash: Option<String>,
            _expiry_secs: Option<u64>,
        ) -> Result<Invoice, NodeError> {
            Ok(Invoice {
                bolt11: "lnbc1...".to_string(),
                payment_hash: "ab".repeat(32),
                amount_msat,
                description,
                description_hash,
                created_at: 0,
                expires_at: 0,
            })
        }
        async fn lookup_by_payment_hash(
            &self,
            _payment_hash: &str,
        ) -> Result<Option<Transaction>, NodeError> {
            Ok(None)
        }
        async fn lookup_by_invoice(&self, _invoice: &str) -> Result<Option<Transaction>, NodeError> {
            Ok(None)
        }
        async fn list_transactions(
            &self,
            _filter: ListTransactionsFilter,
        ) -> Result<Vec<Transaction>, NodeError> {
            Ok(vec![])
        }
        async fn pay_invoice(
            &self,
            _invoice: &str,
            _amount_msat: Option<u64>,
        ) -> Result<PaymentResult, NodeError> {
            Err(NodeError::PaymentFailed("no route".to_string()))
        }
        async fn pay_keysend(
            &self,
            _pubkey: &str,
            _amount_msat: u64,
            _tlv_records: Vec<(u64, Vec<u8>)>,
        ) -> Result<PaymentResult, NodeError> {
            Err(NodeError::PaymentFailed("no route".to_string()))
        }
        async fn make_offer(
            &self,
            amount_msat: Option<u64>,
            description: String,
            issuer: Option<String>,
            absolute_expiry: Option<u64>,
        ) -> Result<Offer, NodeError> {
            Ok(Offer {
                bolt12: "lno1...".to_string(),
                info: OfferInfo {
                    amount_msat,
                    description: Some(description),
                    issuer,
                    expires_at: absolute_expiry,
                },
            })
        }
        async fn decode_offer(&self, _offer: &str) -> Result<OfferInfo, NodeError> {
            Ok(OfferInfo {
                amount_msat: None,
                description: None,
                issuer: None,
                expires_at: None,
            })
        }
        async fn pay_offer(
            &self,
            _offer: &str,
            _amount_msat: Option<u64>,
            _payer_note: Option<String>,
        ) -> Result<PaymentResult, NodeError> {
            Err(NodeError::PaymentFailed("no route".to_string()))
        }
    }

    fn test_connection() -> Connection {
        Connection {
            name: "alice".to_string(),
            wallet_secret: Keys::generate().secret_key().clone(),
            client_pubkey: Keys::generate().public_key(),
            client_secret: Keys::generate().secret_key().clone(),
            budget: BudgetConfig::Fixed { cap_msat: 0 },
            ledger: crate::ledger::LedgerEntry::fresh(&BudgetConfig::Fixed { cap_msat: 0 }, 0),
            created_at: 0,
            revoked: false,
        }
    }

    #[tokio::test]
    async fn unknown_method_is_not_implemented() {
        let store = Arc::new(MemoryConnectionStore::new());
        store
            .create("alice", BudgetConfig::Unlimited, 0)
            .await
            .unwrap();
        let node: Arc<dyn LightningNode> = Arc::new(FakeNode);
        let info = node.get_info().await.unwrap();
        assert_eq!(info.alias, "test");
        assert!(!is_known_method("definitely_not_a_method"));
        assert!(is_known_method("pay_invoice"));
    }

    #[tokio::test]
    async fn restricted_method_on_zero_cap_connection() {
        let conn = test_connection();
        let eligible = ledger::eligible_methods(&conn.budget);
        assert!(!eligible.contains(&"pay_invoice"));
        assert!(eligible.contains(&"make_invoice"));
    }

    #[tokio::test]
    async fn join_payments_settles_each_reservation_independently() {
        type Fut = std::pin::Pin<Box<dyn Future<Output = Result<PaymentResult, NodeError>>>>;

        let config = BudgetConfig::Fixed { cap_msat: 100 };
        let mut ledger = crate::ledger::LedgerEntry::fresh(&config, 0);
        let r1 = crate::ledger::try_reserve(&config, &mut ledger, 40, 0).unwrap();
        let r2 = crate::ledger::try_reserve(&config, &mut ledger, 40, 0).unwrap();
        assert_eq!(ledger.remaining_msat, 20);

        let succeed: Fut = Box::pin(async {
            Ok(PaymentResult {
                preimage: "ab".repeat(32),
                amount_sent_msat: 40,
                amount_msat: 40,
            })
        });
        let fail: Fut = Box::pin(async { Err(NodeError::PaymentFailed("no route".to_string())) });

        let items: Vec<HandlerResult<(ledger::Reservation, Fut)>> =
            vec![Ok((r1, succeed)), Ok((r2, fail))];

        let mut ctx = HandlerContext {
            config: &config,
            ledger: &mut ledger,
            node: &FakeNode,
            now: 0,
        };
        let results = join_payments(&mut ctx, items).await;

        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        // The committed reservation stays spent; the failed one is refunded.
        assert_eq!(ledger.remaining_msat, 60);
    }

    #[tokio::test]
    async fn join_payments_passes_through_reservation_failures_untouched() {
        type Fut = std::pin::Pin<Box<dyn Future<Output = Result<PaymentResult, NodeError>>>>;

        let config = BudgetConfig::Fixed { cap_msat: 10 };
        let mut ledger = crate::ledger::LedgerEntry::fresh(&config, 0);
        let items: Vec<HandlerResult<(ledger::Reservation, Fut)>> =
            vec![Err((Nip47ErrorCode::QuotaExceeded, "budget exceeded".to_string()))];

        let mut ctx = HandlerContext {
            config: &config,
            ledger: &mut ledger,
            node: &FakeNode,
            now: 0,
        };
        let results = join_payments(&mut ctx, items).await;

        assert_eq!(results.len(), 1);
        match &results[0] {
            Err((code, _)) => assert_eq!(*code, Nip47ErrorCode::QuotaExceeded),
            Ok(_) => panic!("expected a quota-exceeded error"),
        }
    }
}
