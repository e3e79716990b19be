//! The `LightningNode` trait: the seam to the Lightning node RPC surface,
//! implemented against real Core Lightning elsewhere in this workspace.
//! One async method per node capability the method handlers need.

use async_trait::async_trait;

/// Network the node is operating on, as reported by `get_info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// Bitcoin mainnet.
    Mainnet,
    /// Bitcoin testnet.
    Testnet,
    /// Bitcoin signet.
    Signet,
    /// Local regtest.
    Regtest,
}

/// Node identity/capability summary backing `get_info`.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    /// Node alias.
    pub alias: String,
    /// Node color, as a 3-byte hex string.
    pub color: String,
    /// Node public key, hex-encoded.
    pub pubkey: String,
    /// The network the node operates on.
    pub network: Network,
    /// Current block height.
    pub block_height: u32,
}

/// A created BOLT-11 invoice.
#[derive(Debug, Clone)]
pub struct Invoice {
    /// The BOLT-11 invoice string.
    pub bolt11: String,
    /// Hex-encoded payment hash.
    pub payment_hash: String,
    /// Invoice amount in millisatoshis, `0` for zero-amount invoices.
    pub amount_msat: u64,
    /// Invoice description (plaintext or none if only a hash was given).
    pub description: Option<String>,
    /// Hex-encoded description hash, if the invoice used one.
    pub description_hash: Option<String>,
    /// Unix timestamp the invoice was created at.
    pub created_at: u64,
    /// Unix timestamp the invoice expires at.
    pub expires_at: u64,
}

/// Settlement state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Not yet settled, not yet expired/failed.
    Pending,
    /// Successfully settled.
    Settled,
    /// The payment attempt failed.
    Failed,
    /// The invoice expired unpaid.
    Expired,
}

/// Direction of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionType {
    /// Money received.
    Incoming,
    /// Money sent.
    Outgoing,
}

/// A single transaction record, returned by `lookup_invoice`/`list_transactions`.
#[derive(Debug, Clone)]
pub struct Transaction {
    /// Incoming or outgoing.
    pub transaction_type: TransactionType,
    /// Current settlement state.
    pub state: TransactionState,
    /// Hex-encoded payment hash.
    pub payment_hash: String,
    /// Hex-encoded preimage, once known.
    pub preimage: Option<String>,
    /// BOLT-11/BOLT-12 request string, if applicable.
    pub invoice: Option<String>,
    /// Description, if any.
    pub description: Option<String>,
    /// Hex-encoded description hash, if any.
    pub description_hash: Option<String>,
    /// Amount transacted, in millisatoshis.
    pub amount_msat: u64,
    /// Routing/processing fees, in millisatoshis (outgoing only).
    pub fees_paid_msat: u64,
    /// Unix creation timestamp.
    pub created_at: u64,
    /// Unix settlement timestamp, once settled.
    pub settled_at: Option<u64>,
    /// Unix expiry timestamp, for invoices.
    pub expires_at: Option<u64>,
}

/// Filter parameters for `list_transactions`.
#[derive(Debug, Clone, Default)]
pub struct ListTransactionsFilter {
    /// Only include transactions at/after this Unix timestamp.
    pub from: Option<u64>,
    /// Only include transactions at/before this Unix timestamp.
    pub until: Option<u64>,
    /// Maximum number of results.
    pub limit: Option<u64>,
    /// Offset into the result set.
    pub offset: Option<u64>,
    /// Include unpaid incoming invoices.
    pub unpaid: bool,
    /// Restrict to one transaction type.
    pub transaction_type: Option<TransactionType>,
}

/// Outcome of a payment attempt.
#[derive(Debug, Clone)]
pub struct PaymentResult {
    /// Hex-encoded preimage.
    pub preimage: String,
    /// Total millisatoshis that left the wallet, including fees.
    pub amount_sent_msat: u64,
    /// The amount the recipient was owed, in millisatoshis.
    pub amount_msat: u64,
}

/// A decoded BOLT-12 offer.
#[derive(Debug, Clone)]
pub struct OfferInfo {
    /// Amount embedded in the offer, if any.
    pub amount_msat: Option<u64>,
    /// Offer description.
    pub description: Option<String>,
    /// Offer issuer.
    pub issuer: Option<String>,
    /// Unix expiry timestamp, if any.
    pub expires_at: Option<u64>,
}

/// A newly created BOLT-12 offer.
#[derive(Debug, Clone)]
pub struct Offer {
    /// The bolt12 offer string.
    pub bolt12: String,
    /// Offer decoded fields, echoed back to the caller.
    pub info: OfferInfo,
}

/// Errors a [`LightningNode`] implementation can raise. Method handlers map
/// these onto the NIP-47 error taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// The node rejected or failed to execute the RPC call.
    #[error("node rpc error: {0}")]
    Rpc(String),
    /// A payment attempt failed.
    #[error("payment failed: {0}")]
    PaymentFailed(String),
    /// The requested invoice/payment/offer could not be found.
    #[error("not found")]
    NotFound,
    /// The node timed out servicing the call.
    #[error("timeout")]
    Timeout,
}

/// The external Lightning node RPC surface the method handlers depend on,
/// implemented against real Core Lightning by `nip47-cln::ClnNode`.
#[async_trait]
pub trait LightningNode: Send + Sync {
    /// `getinfo`.
    async fn get_info(&self) -> Result<NodeInfo, NodeError>;

    /// Sum of spendable balance across active channels, used for
    /// `get_balance` on `Unlimited` connections.
    async fn spendable_balance_msat(&self) -> Result<u64, NodeError>;

    /// Creates a BOLT-11 invoice. `description_hash`, if given, has already
    /// been validated by the caller against `description`.
    async fn make_invoice(
        &self,
        amount_msat: u64,
        description: Option<String>,
        description_hash: Option<String>,
        expiry_secs: Option<u64>,
    ) -> Result<Invoice, NodeError>;

    /// Looks up a transaction by payment hash.
    async fn lookup_by_payment_hash(&self, payment_hash: &str)
        -> Result<Option<Transaction>, NodeError>;

    /// Looks up a transaction by BOLT-11/BOLT-12 request string.
    async fn lookup_by_invoice(&self, invoice: &str) -> Result<Option<Transaction>, NodeError>;

    /// Lists transactions matching a filter, time-sorted.
    async fn list_transactions(
        &self,
        filter: ListTransactionsFilter,
    ) -> Result<Vec<Transaction>, NodeError>;

    /// Pays a BOLT-11 invoice. `amount_msat` is only set for amountless
    /// invoices, validated by the caller.
    async fn pay_invoice(
        &self,
        invoice: &str,
        amount_msat: Option<u64>,
    ) -> Result<PaymentResult, NodeError>;

    /// Sends a spontaneous (keysend) payment.
    async fn pay_keysend(
        &self,
        pubkey: &str,
        amount_msat: u64,
        tlv_records: Vec<(u64, Vec<u8>)>,
    ) -> Result<PaymentResult, NodeError>;

    /// Creates a BOLT-12 offer.
    async fn make_offer(
        &self,
        amount_msat: Option<u64>,
        description: String,
        issuer: Option<String>,
        absolute_expiry: Option<u64>,
    ) -> Result<Offer, NodeError>;

    /// Decodes a BOLT-12 offer string.
    async fn decode_offer(&self, offer: &str) -> Result<OfferInfo, NodeError>;

    /// Fetches an invoice for an offer and pays it.
    async fn pay_offer(
        &self,
        offer: &str,
        amount_msat: Option<u64>,
        payer_note: Option<String>,
    ) -> Result<PaymentResult, NodeError>;
}
