//! [`ConnectionStore`] backed by Core Lightning's `datastore` plugin RPCs:
//! each connection is persisted as a JSON blob at key `nip47/conn/<name>`,
//! keyed under a shared namespace/segment pair so `nip47-plugind` needs no
//! separate database file of its own.

use async_trait::async_trait;
use cln_rpc::model::requests::{DatastoreMode, DatastoreRequest, ListdatastoreRequest};
use cln_rpc::model::responses::ListdatastoreDatastore;
use nip47_core::connection::{Connection, ConnectionStore};
use nip47_core::error::Error;
use nip47_core::ledger::{self, BudgetConfig, Interval, LedgerEntry};
use nostr_sdk::Keys;

use crate::client::ClnClient;

const NAMESPACE: &str = "nip47";
const CONN_SEGMENT: &str = "conn";

fn conn_key(name: &str) -> Vec<String> {
    vec![
        NAMESPACE.to_string(),
        CONN_SEGMENT.to_string(),
        name.to_string(),
    ]
}

fn conn_prefix() -> Vec<String> {
    vec![NAMESPACE.to_string(), CONN_SEGMENT.to_string()]
}

fn decode_entry(entry: ListdatastoreDatastore) -> Result<Connection, Error> {
    let raw = entry.string.ok_or_else(|| {
        Error::Storage("connection record has no string payload".to_string())
    })?;
    Ok(serde_json::from_str(&raw)?)
}

/// A `datastore`-backed [`ConnectionStore`].
pub struct ClnConnectionStore {
    client: ClnClient,
}

impl ClnConnectionStore {
    /// Builds a store sharing the given node's RPC pipeline (see
    /// [`crate::ClnNode::client`]).
    pub fn new(client: ClnClient) -> Self {
        Self { client }
    }

    async fn load(&self, name: &str) -> Result<Option<Connection>, Error> {
        let resp = self
            .client
            .list_datastore(ListdatastoreRequest {
                key: Some(conn_key(name)),
            })
            .await
            .map_err(|e| Error::Storage(e.to_string()))?;
        resp.datastore
            .into_iter()
            .next()
            .map(decode_entry)
            .transpose()
    }

    async fn store(&self, connection: &Connection, mode: DatastoreMode) -> Result<(), Error> {
        let payload = serde_json::to_string(connection)?;
        self.client
            .datastore(DatastoreRequest {
                key: conn_key(&connection.name),
                string: Some(payload),
                hex: None,
                mode: Some(mode),
                generation: None,
            })
            .await
            .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl ConnectionStore for ClnConnectionStore {
    async fn create(
        &self,
        name: &str,
        budget: BudgetConfig,
        now: u64,
    ) -> Result<Connection, Error> {
        budget.validate()?;
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
        self.client
            .datastore(DatastoreRequest {
                key: conn_key(name),
                string: Some(serde_json::to_string(&connection)?),
                hex: None,
                mode: Some(DatastoreMode::MustCreate),
                generation: None,
            })
            .await
            .map_err(|_| Error::ConnectionExists(name.to_string()))?;
        Ok(connection)
    }

    async fn get(&self, name: &str) -> Result<Option<Connection>, Error> {
        self.load(name).await
    }

    async fn list(&self) -> Result<Vec<Connection>, Error> {
        let resp = self
            .client
            .list_datastore(ListdatastoreRequest {
                key: Some(conn_prefix()),
            })
            .await
            .map_err(|e| Error::Storage(e.to_string()))?;
        resp.datastore.into_iter().map(decode_entry).collect()
    }

    async fn revoke(&self, name: &str) -> Result<(), Error> {
        if let Some(mut connection) = self.load(name).await? {
            connection.revoked = true;
            self.store(&connection, DatastoreMode::MustReplace).await?;
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
        if interval.is_some() && cap_msat == 0 {
            return Err(Error::InvalidBudgetConfig(
                "`budget_msat` must be greater than 0 if you use `interval`".to_string(),
            ));
        }
        let mut connection = self
            .load(name)
            .await?
            .ok_or_else(|| Error::ConnectionNotFound(name.to_string()))?;
        let (budget, new_ledger) = ledger::adjust(cap_msat, interval, now);
        connection.budget = budget;
        connection.ledger = new_ledger;
        self.store(&connection, DatastoreMode::MustReplace).await?;
        Ok(connection)
    }

    async fn persist_ledger(&self, name: &str, ledger: &LedgerEntry) -> Result<(), Error> {
        if let Some(mut connection) = self.load(name).await? {
            connection.ledger = ledger.clone();
            self.store(&connection, DatastoreMode::MustReplace).await?;
        }
        Ok(())
    }
}
