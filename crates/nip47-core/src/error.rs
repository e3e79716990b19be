//! Error types for the NIP-47 protocol engine.

use thiserror::Error;

/// Errors produced by the core engine.
#[derive(Debug, Error)]
pub enum Error {
    /// No connection exists under that name.
    #[error("connection not found: {0}")]
    ConnectionNotFound(String),
    /// A connection with that name already exists (revoked or not).
    #[error("connection already exists: {0}")]
    ConnectionExists(String),
    /// The budget configuration supplied by the operator is invalid.
    #[error("invalid budget configuration: {0}")]
    InvalidBudgetConfig(String),
    /// `try_reserve` was called on a connection with insufficient headroom.
    #[error("budget quota exceeded")]
    QuotaExceeded,
    /// A reservation token was used after being consumed.
    #[error("reservation already settled")]
    ReservationConsumed,
    /// The node reported an error while handling a method call.
    #[error("lightning node error: {0}")]
    Node(String),
    /// NIP-04 encryption/decryption failure.
    #[error(transparent)]
    Nip04(#[from] nostr_sdk::nips::nip04::Error),
    /// NIP-44 encryption/decryption failure.
    #[error(transparent)]
    Nip44(#[from] nostr_sdk::nips::nip44::Error),
    /// NIP-47 payload (de)serialization failure.
    #[error(transparent)]
    Nip47(#[from] nostr_sdk::nips::nip47::Error),
    /// Failed to build a Nostr event.
    #[error(transparent)]
    EventBuilder(#[from] nostr_sdk::event::builder::Error),
    /// Nostr key error.
    #[error(transparent)]
    Key(#[from] nostr_sdk::key::Error),
    /// Nostr client/relay pool error.
    #[error(transparent)]
    Client(#[from] nostr_sdk::client::Error),
    /// JSON (de)serialization failure.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// A persisted connection row failed to load.
    #[error("storage error: {0}")]
    Storage(String),
}

/// The NIP-47 error codes used verbatim in response events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nip47ErrorCode {
    /// Client is sending requests too fast.
    RateLimited,
    /// The method is not known/implemented by this wallet.
    NotImplemented,
    /// The wallet does not have enough funds to cover the request.
    InsufficientBalance,
    /// The connection's budget has been exhausted.
    QuotaExceeded,
    /// The connection is not authorized to call this method.
    Restricted,
    /// The request could not be authenticated.
    Unauthorized,
    /// Unexpected internal failure.
    Internal,
    /// Any other error not covered by a dedicated code.
    Other,
    /// The payment attempt failed at the node.
    PaymentFailed,
}

impl Nip47ErrorCode {
    /// The exact wire string NIP-47 expects in `error.code`.
    pub fn as_str(self) -> &'static str {
        match self {
            Nip47ErrorCode::RateLimited => "RATE_LIMITED",
            Nip47ErrorCode::NotImplemented => "NOT_IMPLEMENTED",
            Nip47ErrorCode::InsufficientBalance => "INSUFFICIENT_BALANCE",
            Nip47ErrorCode::QuotaExceeded => "QUOTA_EXCEEDED",
            Nip47ErrorCode::Restricted => "RESTRICTED",
            Nip47ErrorCode::Unauthorized => "UNAUTHORIZED",
            Nip47ErrorCode::Internal => "INTERNAL",
            Nip47ErrorCode::Other => "OTHER",
            Nip47ErrorCode::PaymentFailed => "PAYMENT_FAILED",
        }
    }
}

impl std::fmt::Display for Nip47ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A method-handler outcome: a typed result, or a wire error code + message.
pub type HandlerResult<T> = Result<T, (Nip47ErrorCode, String)>;
