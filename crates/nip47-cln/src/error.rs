//! CLN-backend errors.

use thiserror::Error;

/// Errors raised by the CLN-backed [`ClnNode`](crate::ClnNode) and
/// [`ClnConnectionStore`](crate::ClnConnectionStore) implementations.
#[derive(Debug, Error)]
pub enum Error {
    /// The worker pool's mailbox was dropped before a response arrived.
    #[error("CLN worker pool is not running")]
    WorkerPoolGone,
    /// CLN replied with a JSON-RPC error object.
    #[error(transparent)]
    ClnRpc(#[from] cln_rpc::RpcError),
}

impl From<Error> for nip47_core::node::NodeError {
    fn from(e: Error) -> Self {
        nip47_core::node::NodeError::Rpc(e.to_string())
    }
}
