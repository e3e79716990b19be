//! Core Lightning backend for the NIP-47 bridge plugin: implements
//! [`nip47_core::node::LightningNode`] against `lightningd` via `cln-rpc`,
//! with a worker-pool RPC pipeline covering the full NIP-47 node surface
//! (`get_info`, keysend, BOLT-12 offers, balance).

#![warn(missing_docs)]
#![warn(rustdoc::bare_urls)]

use std::path::PathBuf;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use cln_rpc::model::requests::{
    FetchinvoiceRequest, InvoiceRequest, KeysendRequest, ListfundsRequest, ListinvoicesRequest,
    ListpaysRequest, OfferRequest, PayRequest,
};
use cln_rpc::model::responses::{
    ListinvoicesInvoices, ListinvoicesInvoicesStatus, ListpaysPays, ListpaysPaysStatus, PayStatus,
};
use cln_rpc::primitives::{Amount as ClnAmount, AmountOrAny};
use lightning::offers::offer::{Amount as OfferAmount, Offer as Bolt12Offer};
use lightning_invoice::Bolt11Invoice;
use nip47_core::node::{
    Invoice, LightningNode, ListTransactionsFilter, Network, NodeError, NodeInfo, Offer,
    OfferInfo, PaymentResult, Transaction, TransactionState, TransactionType,
};
use uuid::Uuid;

pub mod client;
pub mod connection;
pub mod error;
pub mod store;

pub use client::ClnClient;
pub use error::Error;
pub use store::ClnConnectionStore;

/// Core Lightning-backed [`LightningNode`].
#[derive(Clone)]
pub struct ClnNode {
    client: ClnClient,
}

impl ClnNode {
    /// Connects to `lightningd`'s JSON-RPC socket and starts its worker pool.
    pub fn new(rpc_socket: PathBuf) -> Self {
        Self {
            client: ClnClient::new(rpc_socket),
        }
    }

    /// A cloneable handle onto the same RPC pipeline, for a
    /// [`ClnConnectionStore`] sharing this node's connection.
    pub fn client(&self) -> ClnClient {
        self.client.clone()
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn systemtime_to_unix(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

fn transaction_from_invoice(inv: ListinvoicesInvoices) -> Transaction {
    let parsed = inv
        .bolt11
        .as_deref()
        .and_then(|b| Bolt11Invoice::from_str(b).ok());
    let created_at = parsed
        .as_ref()
        .map(|p| systemtime_to_unix(p.timestamp()))
        .unwrap_or(0);
    let state = match inv.status {
        ListinvoicesInvoicesStatus::PAID => TransactionState::Settled,
        ListinvoicesInvoicesStatus::EXPIRED => TransactionState::Expired,
        ListinvoicesInvoicesStatus::UNPAID => TransactionState::Pending,
    };
    Transaction {
        transaction_type: TransactionType::Incoming,
        state,
        payment_hash: inv.payment_hash.to_string(),
        preimage: inv.payment_preimage.map(|p| p.to_string()),
        invoice: inv.bolt11.clone(),
        description: inv.description.clone(),
        description_hash: None,
        amount_msat: inv.amount_msat.map(|a| a.msat()).unwrap_or(0),
        fees_paid_msat: 0,
        created_at,
        settled_at: inv.paid_at,
        expires_at: Some(inv.expires_at),
    }
}

fn transaction_from_pay(p: ListpaysPays) -> Transaction {
    let state = match p.status {
        ListpaysPaysStatus::COMPLETE => TransactionState::Settled,
        ListpaysPaysStatus::PENDING => TransactionState::Pending,
        ListpaysPaysStatus::FAILED => TransactionState::Failed,
    };
    let amount_msat = p.amount_msat.map(|a| a.msat()).unwrap_or(0);
    let amount_sent_msat = p.amount_sent_msat.map(|a| a.msat()).unwrap_or(amount_msat);
    Transaction {
        transaction_type: TransactionType::Outgoing,
        state,
        payment_hash: p.payment_hash.to_string(),
        preimage: p.preimage.map(|pi| pi.to_string()),
        invoice: p.bolt11.clone(),
        description: None,
        description_hash: None,
        amount_msat,
        fees_paid_msat: amount_sent_msat.saturating_sub(amount_msat),
        created_at: p.created_at,
        settled_at: p.completed_at,
        expires_at: None,
    }
}

#[async_trait]
impl LightningNode for ClnNode {
    async fn get_info(&self) -> Result<NodeInfo, NodeError> {
        let resp = self.client.get_info().await?;
        let network = match resp.network.as_str() {
            "bitcoin" => Network::Mainnet,
            "testnet" => Network::Testnet,
            "signet" => Network::Signet,
            _ => Network::Regtest,
        };
        Ok(NodeInfo {
            alias: resp.alias,
            color: resp.color,
            pubkey: resp.id.to_string(),
            network,
            block_height: resp.blockheight,
        })
    }

    async fn spendable_balance_msat(&self) -> Result<u64, NodeError> {
        let resp = self
            .client
            .list_funds(ListfundsRequest { spent: None })
            .await?;
        Ok(resp
            .channels
            .iter()
            .filter_map(|c| c.spendable_msat.map(|a| a.msat()))
            .sum())
    }

    async fn make_invoice(
        &self,
        amount_msat: u64,
        description: Option<String>,
        description_hash: Option<String>,
        expiry_secs: Option<u64>,
    ) -> Result<Invoice, NodeError> {
        let label = Uuid::new_v4().to_string();
        let req = InvoiceRequest {
            amount_msat: AmountOrAny::Amount(ClnAmount::from_msat(amount_msat)),
            description: description.clone().unwrap_or_default(),
            label,
            expiry: expiry_secs,
            fallbacks: None,
            preimage: None,
            cltv: None,
            deschashonly: Some(description_hash.is_some()),
            exposeprivatechannels: None,
        };
        let resp = self.client.invoice(req).await?;
        let bolt11 = Bolt11Invoice::from_str(&resp.bolt11)
            .map_err(|e| NodeError::Rpc(format!("cln returned an unparsable invoice: {e}")))?;
        let created_at = now_unix();
        Ok(Invoice {
            bolt11: resp.bolt11,
            payment_hash: bolt11.payment_hash().to_string(),
            amount_msat,
            description,
            description_hash,
            created_at,
            expires_at: created_at + expiry_secs.unwrap_or(bolt11.expiry_time().as_secs()),
        })
    }

    async fn lookup_by_payment_hash(
        &self,
        payment_hash: &str,
    ) -> Result<Option<Transaction>, NodeError> {
        let invoices = self
            .client
            .list_invoices(ListinvoicesRequest {
                payment_hash: Some(payment_hash.to_string()),
                label: None,
                invstring: None,
                offer_id: None,
                index: None,
                limit: None,
                start: None,
            })
            .await?;
        if let Some(inv) = invoices.invoices.into_iter().next() {
            return Ok(Some(transaction_from_invoice(inv)));
        }

        let pays = self
            .client
            .list_pays(ListpaysRequest {
                payment_hash: Some(
                    payment_hash
                        .parse()
                        .map_err(|_| NodeError::Rpc("invalid payment hash".to_string()))?,
                ),
                bolt11: None,
                status: None,
                start: None,
                index: None,
                limit: None,
            })
            .await?;
        Ok(pays.pays.into_iter().next().map(transaction_from_pay))
    }

    async fn lookup_by_invoice(&self, invoice: &str) -> Result<Option<Transaction>, NodeError> {
        let invoices = self
            .client
            .list_invoices(ListinvoicesRequest {
                payment_hash: None,
                label: None,
                invstring: Some(invoice.to_string()),
                offer_id: None,
                index: None,
                limit: None,
                start: None,
            })
            .await?;
        if let Some(inv) = invoices.invoices.into_iter().next() {
            return Ok(Some(transaction_from_invoice(inv)));
        }

        let pays = self
            .client
            .list_pays(ListpaysRequest {
                payment_hash: None,
                bolt11: Some(invoice.to_string()),
                status: None,
                start: None,
                index: None,
                limit: None,
            })
            .await?;
        Ok(pays.pays.into_iter().next().map(transaction_from_pay))
    }

    async fn list_transactions(
        &self,
        filter: ListTransactionsFilter,
    ) -> Result<Vec<Transaction>, NodeError> {
        let mut txs = Vec::new();

        if !matches!(filter.transaction_type, Some(TransactionType::Outgoing)) {
            let invoices = self
                .client
                .list_invoices(ListinvoicesRequest {
                    payment_hash: None,
                    label: None,
                    invstring: None,
                    offer_id: None,
                    index: None,
                    limit: None,
                    start: None,
                })
                .await?;
            txs.extend(
                invoices
                    .invoices
                    .into_iter()
                    .filter(|i| filter.unpaid || matches!(i.status, ListinvoicesInvoicesStatus::PAID))
                    .map(transaction_from_invoice),
            );
        }

        if !matches!(filter.transaction_type, Some(TransactionType::Incoming)) {
            let pays = self
                .client
                .list_pays(ListpaysRequest {
                    payment_hash: None,
                    bolt11: None,
                    status: None,
                    start: None,
                    index: None,
                    limit: None,
                })
                .await?;
            txs.extend(pays.pays.into_iter().map(transaction_from_pay));
        }

        txs.retain(|t| {
            filter.from.map_or(true, |from| t.created_at >= from)
                && filter.until.map_or(true, |until| t.created_at <= until)
        });
        txs.sort_by_key(|t| t.created_at);

        if let Some(offset) = filter.offset {
            let offset = offset as usize;
            txs = if offset >= txs.len() {
                Vec::new()
            } else {
                txs.split_off(offset)
            };
        }
        if let Some(limit) = filter.limit {
            txs.truncate(limit as usize);
        }
        Ok(txs)
    }

    async fn pay_invoice(
        &self,
        invoice: &str,
        amount_msat: Option<u64>,
    ) -> Result<PaymentResult, NodeError> {
        let resp = self
            .client
            .pay(PayRequest {
                bolt11: invoice.to_string(),
                amount_msat: amount_msat.map(ClnAmount::from_msat),
                label: None,
                riskfactor: None,
                maxfeepercent: None,
                retry_for: None,
                maxdelay: None,
                exemptfee: None,
                localinvreqid: None,
                exclude: None,
                maxfee: None,
                description: None,
                partial_msat: None,
            })
            .await?;
        payment_result_from_pay(resp)
    }

    async fn pay_keysend(
        &self,
        pubkey: &str,
        amount_msat: u64,
        tlv_records: Vec<(u64, Vec<u8>)>,
    ) -> Result<PaymentResult, NodeError> {
        let extratlvs = if tlv_records.is_empty() {
            None
        } else {
            Some(cln_rpc::primitives::TlvStream {
                entries: tlv_records
                    .into_iter()
                    .map(|(typ, value)| cln_rpc::primitives::TlvEntry { typ, value })
                    .collect(),
            })
        };
        let resp = self
            .client
            .keysend(KeysendRequest {
                destination: pubkey
                    .parse()
                    .map_err(|_| NodeError::Rpc("invalid destination pubkey".to_string()))?,
                amount_msat: ClnAmount::from_msat(amount_msat),
                label: None,
                maxfeepercent: None,
                retry_for: None,
                maxdelay: None,
                exemptfee: None,
                extratlvs,
                routehints: None,
                maxfee: None,
            })
            .await?;
        Ok(PaymentResult {
            preimage: hex::encode(resp.payment_preimage.to_vec()),
            amount_sent_msat: resp.amount_sent_msat.msat(),
            amount_msat: resp.amount_msat.msat(),
        })
    }

    async fn make_offer(
        &self,
        amount_msat: Option<u64>,
        description: String,
        issuer: Option<String>,
        absolute_expiry: Option<u64>,
    ) -> Result<Offer, NodeError> {
        let amount = amount_msat
            .map(|a| format!("{a}msat"))
            .unwrap_or_else(|| "any".to_string());
        let resp = self
            .client
            .offer(OfferRequest {
                absolute_expiry,
                description: Some(description.clone()),
                label: Some(Uuid::new_v4().to_string()),
                issuer: issuer.clone(),
                quantity_max: None,
                recurrence: None,
                recurrence_base: None,
                recurrence_limit: None,
                recurrence_paywindow: None,
                recurrence_start_any_period: None,
                single_use: Some(false),
                amount,
            })
            .await?;
        Ok(Offer {
            bolt12: resp.bolt12,
            info: OfferInfo {
                amount_msat,
                description: Some(description),
                issuer,
                expires_at: absolute_expiry,
            },
        })
    }

    async fn decode_offer(&self, offer: &str) -> Result<OfferInfo, NodeError> {
        let parsed = Bolt12Offer::from_str(offer)
            .map_err(|_| NodeError::Rpc("invalid bolt12 offer".to_string()))?;
        let amount_msat = parsed.amount().and_then(|a| match a {
            OfferAmount::Bitcoin { amount_msats } => Some(amount_msats),
            OfferAmount::Currency { .. } => None,
        });
        Ok(OfferInfo {
            amount_msat,
            description: parsed.description().map(|d| d.to_string()),
            issuer: parsed.issuer().map(|i| i.to_string()),
            expires_at: parsed.absolute_expiry().map(|d| d.as_secs()),
        })
    }

    async fn pay_offer(
        &self,
        offer: &str,
        amount_msat: Option<u64>,
        payer_note: Option<String>,
    ) -> Result<PaymentResult, NodeError> {
        let fetched = self
            .client
            .fetch_invoice(FetchinvoiceRequest {
                offer: offer.to_string(),
                amount_msat: amount_msat.map(ClnAmount::from_msat),
                payer_note,
                quantity: None,
                recurrence_counter: None,
                recurrence_label: None,
                recurrence_start: None,
                timeout: None,
            })
            .await?;

        let resp = self
            .client
            .pay(PayRequest {
                bolt11: fetched.invoice,
                amount_msat: None,
                label: None,
                riskfactor: None,
                maxfeepercent: None,
                retry_for: None,
                maxdelay: None,
                exemptfee: None,
                localinvreqid: None,
                exclude: None,
                maxfee: None,
                description: None,
                partial_msat: None,
            })
            .await?;
        payment_result_from_pay(resp)
    }
}

fn payment_result_from_pay(
    resp: cln_rpc::model::responses::PayResponse,
) -> Result<PaymentResult, NodeError> {
    match resp.status {
        PayStatus::COMPLETE => Ok(PaymentResult {
            preimage: hex::encode(resp.payment_preimage.to_vec()),
            amount_sent_msat: resp.amount_sent_msat.msat(),
            amount_msat: resp.amount_msat.msat(),
        }),
        PayStatus::PENDING => Err(NodeError::Timeout),
        PayStatus::FAILED => Err(NodeError::PaymentFailed(
            "cln reported the payment as failed".to_string(),
        )),
    }
}
