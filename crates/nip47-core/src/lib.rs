//! Protocol engine for a NIP-47 (Nostr Wallet Connect) bridge plugin.
//!
//! This crate implements the node-agnostic core named in the
//! specification: the Budget Ledger, the Connection Store trait (plus an
//! in-memory reference implementation), the Relay Pool, the Request
//! Dispatcher, the Method Handlers, the Notification Pump, and the Info
//! Event lifecycle. It depends on the Lightning node only through the
//! [`node::LightningNode`] trait — `nip47-cln` is the production
//! implementation of that seam against Core Lightning.

pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod info_event;
pub mod ledger;
pub mod node;
pub mod notifications;
pub mod pending;
pub mod relay;
pub mod wire;

pub use connection::{Connection, ConnectionStore, MemoryConnectionStore};
pub use dispatcher::ConnectionActor;
pub use error::{Error, Nip47ErrorCode};
pub use ledger::{BudgetConfig, Interval, LedgerEntry, Reservation};
pub use node::{LightningNode, NodeError};
pub use notifications::PaymentEvent;
pub use relay::RelayPool;
