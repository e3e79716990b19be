//! A cloneable handle onto the [`connection::ClnConnection`] pipeline,
//! shared between [`crate::ClnNode`] (the `LightningNode` implementation)
//! and [`crate::store::ClnConnectionStore`] (the `datastore`-backed
//! `ConnectionStore`), so both can issue RPCs through one worker pool
//! without either owning the other.

use std::path::PathBuf;
use std::sync::Arc;

use cln_rpc::model::requests::{
    DatastoreRequest, FetchinvoiceRequest, GetinfoRequest, InvoiceRequest, KeysendRequest,
    ListdatastoreRequest, ListfundsRequest, ListinvoicesRequest, ListpaysRequest, OfferRequest,
    PayRequest,
};
use cln_rpc::model::responses::{
    DatastoreResponse, FetchinvoiceResponse, GetinfoResponse, InvoiceResponse, KeysendResponse,
    ListdatastoreResponse, ListfundsResponse, ListinvoicesResponse, ListpaysResponse, OfferResponse,
    PayResponse,
};
use tokio::sync::oneshot;

use crate::connection::{ClnConnection, Request};
use crate::error::Error;

/// Cheaply-cloneable handle for sending typed requests into the worker pool.
#[derive(Clone)]
pub struct ClnClient {
    connection: Arc<ClnConnection>,
}

impl ClnClient {
    /// Spawns a fresh worker pool against the given `lightning-rpc` socket.
    pub fn new(rpc_socket: PathBuf) -> Self {
        Self {
            connection: Arc::new(ClnConnection::new(rpc_socket)),
        }
    }

    async fn call<Req, Resp>(
        &self,
        build: impl FnOnce(Req, oneshot::Sender<Result<Resp, cln_rpc::RpcError>>) -> Request,
        req: Req,
    ) -> Result<Resp, Error> {
        let (tx, rx) = oneshot::channel();
        self.connection
            .pipeline
            .send(build(req, tx))
            .await
            .map_err(|_| Error::WorkerPoolGone)?;
        rx.await
            .map_err(|_| Error::WorkerPoolGone)?
            .map_err(Error::from)
    }

    /// `getinfo`.
    pub async fn get_info(&self) -> Result<GetinfoResponse, Error> {
        self.call(Request::GetInfo, GetinfoRequest {}).await
    }

    /// `pay`.
    pub async fn pay(&self, req: PayRequest) -> Result<PayResponse, Error> {
        self.call(Request::Pay, req).await
    }

    /// `keysend`.
    pub async fn keysend(&self, req: KeysendRequest) -> Result<KeysendResponse, Error> {
        self.call(Request::Keysend, req).await
    }

    /// `invoice`.
    pub async fn invoice(&self, req: InvoiceRequest) -> Result<InvoiceResponse, Error> {
        self.call(Request::Invoice, req).await
    }

    /// `listinvoices`.
    pub async fn list_invoices(
        &self,
        req: ListinvoicesRequest,
    ) -> Result<ListinvoicesResponse, Error> {
        self.call(Request::ListInvoices, req).await
    }

    /// `listpays`.
    pub async fn list_pays(&self, req: ListpaysRequest) -> Result<ListpaysResponse, Error> {
        self.call(Request::ListPays, req).await
    }

    /// `listfunds`.
    pub async fn list_funds(&self, req: ListfundsRequest) -> Result<ListfundsResponse, Error> {
        self.call(Request::ListFunds, req).await
    }

    /// `offer`.
    pub async fn offer(&self, req: OfferRequest) -> Result<OfferResponse, Error> {
        self.call(Request::Offer, req).await
    }

    /// `fetchinvoice`.
    pub async fn fetch_invoice(
        &self,
        req: FetchinvoiceRequest,
    ) -> Result<FetchinvoiceResponse, Error> {
        self.call(Request::FetchInvoice, req).await
    }

    /// `datastore`.
    pub async fn datastore(&self, req: DatastoreRequest) -> Result<DatastoreResponse, Error> {
        self.call(Request::Datastore, req).await
    }

    /// `listdatastore`.
    pub async fn list_datastore(
        &self,
        req: ListdatastoreRequest,
    ) -> Result<ListdatastoreResponse, Error> {
        self.call(Request::ListDatastore, req).await
    }
}
