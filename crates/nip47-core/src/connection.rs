//! The authoritative mapping of connection name to keys, budget
//! configuration, and ledger state.

use async_trait::async_trait;
use nostr_sdk::{Keys, PublicKey, SecretKey};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Error;
use crate::ledger::{BudgetConfig, Interval, LedgerEntry};

/// `nostr_sdk::SecretKey` only implements `Deserialize` (parsing from a hex
/// or bech32 string); it deliberately omits `Serialize` to discourage
/// accidental leakage. This mirrors that string representation so the
/// derive below can round-trip it.
fn serialize_secret_key<S>(key: &SecretKey, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&key.to_secret_hex())
}

/// The unit of authorization: one client keypair bound to one wallet-side
/// keypair, plus a budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    /// Unique, case-sensitive, human-readable name. Primary key.
    pub name: String,
    /// The wallet-side secret key; signs responses/notifications.
    #[serde(serialize_with = "serialize_secret_key")]
    pub wallet_secret: SecretKey,
    /// The authorized client's public key.
    pub client_pubkey: PublicKey,
    /// The corresponding client secret key is handed to the operator once,
    /// at creation time, and is not retained after that (only needed here so
    /// `create` can hand back the pairing URI; stores MUST NOT persist it
    /// beyond that point in a production deployment, but keeping it simplifies
    /// re-displaying the URI on `nip47-list` and is what this reference store does).
    #[serde(serialize_with = "serialize_secret_key")]
    pub client_secret: SecretKey,
    /// Budget configuration.
    pub budget: BudgetConfig,
    /// Mutable ledger state.
    pub ledger: LedgerEntry,
    /// Unix timestamp of creation.
    pub created_at: u64,
    /// Soft-delete flag; revoked connections are kept for listing.
    pub revoked: bool,
}

impl Connection {
    /// The wallet-side keypair.
    pub fn wallet_keys(&self) -> Keys {
        Keys::new(self.wallet_secret.clone())
    }

    /// The wallet's x-only public key, used to `p`-tag incoming requests and
    /// identify the wallet in the pairing URI.
    pub fn wallet_pubkey(&self) -> PublicKey {
        self.wallet_keys().public_key()
    }

    /// Builds the `nostr+walletconnect://` pairing URI.
    pub fn pairing_uri(&self, relays: &[Url], lud16: Option<&str>) -> String {
        let mut uri = Url::parse(&format!(
            "nostr+walletconnect://{}",
            self.wallet_pubkey().to_hex()
        ))
        .expect("well-formed scheme and hex pubkey");
        {
            let mut pairs = uri.query_pairs_mut();
            for relay in relays {
                pairs.append_pair("relay", relay.as_str());
            }
            pairs.append_pair("secret", &hex::encode(self.client_secret.secret_bytes()));
            if let Some(lud16) = lud16 {
                pairs.append_pair("lud16", lud16);
            }
        }
        uri.to_string()
    }
}

/// Persistence operations over the authoritative connection mapping.
/// Implementations persist to the node's key/value store; see
/// `nip47-cln::ClnConnectionStore`.
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    /// Creates a new connection, enforcing name uniqueness (including
    /// against revoked rows). Returns the stored [`Connection`].
    async fn create(
        &self,
        name: &str,
        budget: BudgetConfig,
        now: u64,
    ) -> Result<Connection, Error>;

    /// Looks up a connection by name, revoked or not.
    async fn get(&self, name: &str) -> Result<Option<Connection>, Error>;

    /// Lists every connection, revoked or not.
    async fn list(&self) -> Result<Vec<Connection>, Error>;

    /// Marks a connection revoked. Idempotent.
    async fn revoke(&self, name: &str) -> Result<(), Error>;

    /// Operator-initiated budget change.
    async fn adjust_budget(
        &self,
        name: &str,
        cap_msat: u64,
        interval: Option<Interval>,
        now: u64,
    ) -> Result<Connection, Error>;

    /// Persists the ledger state after a successful debit or renewal.
    async fn persist_ledger(&self, name: &str, ledger: &LedgerEntry) -> Result<(), Error>;

    /// Loads every non-revoked connection.
    async fn load_active(&self) -> Result<Vec<Connection>, Error> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|c| !c.revoked)
            .collect())
    }
}

/// An in-memory [`ConnectionStore`] used by `nip47-core`'s own tests and by
/// any caller exercising the engine without a real node.
#[derive(Debug, Default)]
pub struct MemoryConnectionStore {
    inner: tokio::sync::RwLock<std::collections::HashMap<String, Connection>>,
}

impl MemoryConnectionStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConnectionStore for MemoryConnectionStore {
    async fn create(
        &self,
        name: &str,
        budget: BudgetConfig,
        now: u64,
    ) -> Result<Connection, Error> {
        budget.validate()?;
        let mut guard = self.inner.write().await;
        if guard.contains_key(name) {
            return Err(Error::ConnectionExists(name.to_string()));
        }
        let wallet_secret = Keys::generate().secret_key().clone();
        let client_keys = Keys::generate();
        let connection = Connection {
            name: name.to_string(),
            wallet_secret,
            client_pubkey: client_keys.public_key(),
            client_secret: client_keys.secret_key().clone(),
            ledger: LedgerEntry::fresh(&budget, now),
            budget,
            created_at: now,
            revoked: false,
        };
        guard.insert(name.to_string(), connection.clone());
        Ok(connection)
    }

    async fn get(&self, name: &str) -> Result<Option<Connection>, Error> {
        Ok(self.inner.read().await.get(name).cloned())
    }

    async fn list(&self) -> Result<Vec<Connection>, Error> {
        Ok(self.inner.read().await.values().cloned().collect())
    }

    async fn revoke(&self, name: &str) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        if let Some(conn) = guard.get_mut(name) {
            conn.revoked = true;
        }
        Ok(())
    }

    async fn adjust_budget(
        &self,
        name: &str,
        cap_msat: u64,
        interval: Option<Interval>,
        now: u64,
    ) -> Result<Connection, Error> {
        if let Some(interval) = interval {
            if cap_msat == 0 {
                return Err(Error::InvalidBudgetConfig(
                    "`budget_msat` must be greater than 0 if you use `interval`".to_string(),
                ));
            }
            let _ = interval;
        }
        let mut guard = self.inner.write().await;
        let conn = guard
            .get_mut(name)
            .ok_or_else(|| Error::ConnectionNotFound(name.to_string()))?;
        let (budget, ledger) = crate::ledger::adjust(cap_msat, interval, now);
        conn.budget = budget;
        conn.ledger = ledger;
        Ok(conn.clone())
    }

    async fn persist_ledger(&self, name: &str, ledger: &LedgerEntry) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        if let Some(conn) = guard.get_mut(name) {
            conn.ledger = ledger.clone();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_rejects_duplicate_names() {
        let store = MemoryConnectionStore::new();
        store
            .create("alice", BudgetConfig::Unlimited, 0)
            .await
            .unwrap();
        let err = store
            .create("alice", BudgetConfig::Unlimited, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConnectionExists(_)));
    }

    #[tokio::test]
    async fn revoke_is_soft_delete_and_idempotent() {
        let store = MemoryConnectionStore::new();
        store
            .create("alice", BudgetConfig::Unlimited, 0)
            .await
            .unwrap();
        store.revoke("alice").await.unwrap();
        store.revoke("alice").await.unwrap();
        let conn = store.get("alice").await.unwrap().unwrap();
        assert!(conn.revoked);
        assert_eq!(store.list().await.unwrap().len(), 1);
        assert!(store.load_active().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn adjust_budget_rejects_zero_cap_with_interval() {
        let store = MemoryConnectionStore::new();
        store
            .create("alice", BudgetConfig::Unlimited, 0)
            .await
            .unwrap();
        let err = store
            .adjust_budget("alice", 0, Some(Interval { secs: 3600 }), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidBudgetConfig(_)));
    }

    #[test]
    fn pairing_uri_includes_multiple_relays_in_order() {
        let wallet_secret = Keys::generate().secret_key().clone();
        let client_keys = Keys::generate();
        let conn = Connection {
            name: "alice".to_string(),
            wallet_secret,
            client_pubkey: client_keys.public_key(),
            client_secret: client_keys.secret_key().clone(),
            budget: BudgetConfig::Unlimited,
            ledger: LedgerEntry::fresh(&BudgetConfig::Unlimited, 0),
            created_at: 0,
            revoked: false,
        };
        let relays = vec![
            Url::parse("wss://primary.example").unwrap(),
            Url::parse("wss://backup.example").unwrap(),
        ];
        let uri = conn.pairing_uri(&relays, None);
        assert!(uri.starts_with("nostr+walletconnect://"));
        let primary_idx = uri.find("primary.example").unwrap();
        let backup_idx = uri.find("backup.example").unwrap();
        assert!(primary_idx < backup_idx);
        assert!(uri.contains("secret="));
    }
}
