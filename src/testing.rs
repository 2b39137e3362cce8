//! In-process stand-ins for LND and bitcoind used by unit tests.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bitcoincore_rpc::bitcoin::Amount;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::{Endpoint, Server};
use tonic::{Request, Response, Status};

use crate::bitcoind::{BitcoindError, Chain};
use crate::lnrpc::{self, channel_point::FundingTxid, close_status_update, lightning_server};
use crate::{LndNode, MacaroonInterceptor};

/// What the fake daemon knows; tests inspect and tweak it through the shared handle.
#[derive(Debug, Default)]
pub(crate) struct State {
    pub identity_pubkey: String,
    pub synced_to_chain: bool,
    pub get_info_calls: usize,
    pub peers: Vec<String>,
    pub channels: Vec<lnrpc::Channel>,
    /// Peers whose channels survive `CloseChannel`.
    pub stuck_peers: HashSet<String>,
    pub confirmed_balance: i64,
    pub invoices: Vec<lnrpc::Invoice>,
    pub invoice_requests: Vec<lnrpc::ListInvoiceRequest>,
}

pub(crate) fn pubkey(byte: u8) -> String {
    format!("02{}", hex::encode([byte; 32]))
}

pub(crate) fn channel(remote: &str, txid_byte: u8) -> lnrpc::Channel {
    lnrpc::Channel {
        active: true,
        remote_pubkey: remote.to_owned(),
        channel_point: format!("{}:0", hex::encode([txid_byte; 32])),
        ..Default::default()
    }
}

/// Serves `state` on a local port and returns a node connected to it.
pub(crate) async fn spawn_node(name: &str, state: State) -> (LndNode, Arc<Mutex<State>>) {
    let state = Arc::new(Mutex::new(state));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();

    let service = lightning_server::LightningServer::new(FakeLnd { state: Arc::clone(&state), });
    tokio::spawn(Server::builder()
        .add_service(service)
        .serve_with_incoming(TcpListenerStream::new(listener)));

    let channel = Endpoint::from_shared(format!("http://{}", address))
        .unwrap()
        .connect()
        .await
        .unwrap();
    let interceptor = MacaroonInterceptor::from_hex("0201", "admin.macaroon").unwrap();
    let client = lnrpc::lightning_client::LightningClient::with_interceptor(channel, interceptor);
    let node = LndNode::from_client(name.to_owned(), client).await.unwrap();
    (node, state)
}

struct FakeLnd {
    state: Arc<Mutex<State>>,
}

impl FakeLnd {
    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }
}

type RpcResult<T> = Result<Response<T>, Status>;

#[tonic::async_trait]
impl lightning_server::Lightning for FakeLnd {
    async fn wallet_balance(&self, _request: Request<lnrpc::WalletBalanceRequest>) -> RpcResult<lnrpc::WalletBalanceResponse> {
        let confirmed_balance = self.state().confirmed_balance;
        Ok(Response::new(lnrpc::WalletBalanceResponse {
            total_balance: confirmed_balance,
            confirmed_balance,
            ..Default::default()
        }))
    }

    async fn channel_balance(&self, _request: Request<lnrpc::ChannelBalanceRequest>) -> RpcResult<lnrpc::ChannelBalanceResponse> {
        Err(Status::unimplemented("ChannelBalance"))
    }

    async fn new_address(&self, _request: Request<lnrpc::NewAddressRequest>) -> RpcResult<lnrpc::NewAddressResponse> {
        Ok(Response::new(lnrpc::NewAddressResponse {
            address: "bcrt1qw508d6qejxtdg4y5r3zarvary0c5xw7kygt080".to_owned(),
        }))
    }

    async fn connect_peer(&self, _request: Request<lnrpc::ConnectPeerRequest>) -> RpcResult<lnrpc::ConnectPeerResponse> {
        Err(Status::unimplemented("ConnectPeer"))
    }

    async fn disconnect_peer(&self, request: Request<lnrpc::DisconnectPeerRequest>) -> RpcResult<lnrpc::DisconnectPeerResponse> {
        let pub_key = request.into_inner().pub_key;
        let mut state = self.state();
        if state.channels.iter().any(|channel| channel.remote_pubkey == pub_key) {
            return Err(Status::unknown("all active channels with the peer need to be closed first"));
        }
        state.peers.retain(|peer| *peer != pub_key);
        Ok(Response::new(lnrpc::DisconnectPeerResponse {}))
    }

    async fn list_peers(&self, _request: Request<lnrpc::ListPeersRequest>) -> RpcResult<lnrpc::ListPeersResponse> {
        let peers = self.state()
            .peers
            .iter()
            .map(|pub_key| lnrpc::Peer { pub_key: pub_key.clone(), ..Default::default() })
            .collect();
        Ok(Response::new(lnrpc::ListPeersResponse { peers, }))
    }

    async fn get_info(&self, _request: Request<lnrpc::GetInfoRequest>) -> RpcResult<lnrpc::GetInfoResponse> {
        let mut state = self.state();
        state.get_info_calls += 1;
        Ok(Response::new(lnrpc::GetInfoResponse {
            identity_pubkey: state.identity_pubkey.clone(),
            synced_to_chain: state.synced_to_chain,
            ..Default::default()
        }))
    }

    async fn pending_channels(&self, _request: Request<lnrpc::PendingChannelsRequest>) -> RpcResult<lnrpc::PendingChannelsResponse> {
        Ok(Response::new(lnrpc::PendingChannelsResponse::default()))
    }

    async fn list_channels(&self, request: Request<lnrpc::ListChannelsRequest>) -> RpcResult<lnrpc::ListChannelsResponse> {
        let peer = hex::encode(request.into_inner().peer);
        let channels = self.state()
            .channels
            .iter()
            .filter(|channel| peer.is_empty() || channel.remote_pubkey == peer)
            .cloned()
            .collect();
        Ok(Response::new(lnrpc::ListChannelsResponse { channels, }))
    }

    async fn open_channel_sync(&self, _request: Request<lnrpc::OpenChannelRequest>) -> RpcResult<lnrpc::ChannelPoint> {
        Err(Status::unimplemented("OpenChannelSync"))
    }

    type CloseChannelStream = tokio_stream::Iter<std::vec::IntoIter<Result<lnrpc::CloseStatusUpdate, Status>>>;

    async fn close_channel(&self, request: Request<lnrpc::CloseChannelRequest>) -> RpcResult<Self::CloseChannelStream> {
        let channel_point = request.into_inner()
            .channel_point
            .ok_or_else(|| Status::invalid_argument("missing channel point"))?;
        let txid = match channel_point.funding_txid {
            Some(FundingTxid::FundingTxidStr(txid)) => txid,
            _ => return Err(Status::invalid_argument("expected funding txid string")),
        };
        let point = format!("{}:{}", txid, channel_point.output_index);

        let mut state = self.state();
        let stuck_peers = state.stuck_peers.clone();
        state.channels.retain(|channel| channel.channel_point != point || stuck_peers.contains(&channel.remote_pubkey));

        let update = lnrpc::CloseStatusUpdate {
            update: Some(close_status_update::Update::ClosePending(lnrpc::PendingUpdate {
                txid: vec![0; 32],
                output_index: 0,
            })),
        };
        Ok(Response::new(tokio_stream::iter(vec![Ok(update)])))
    }

    async fn send_payment_sync(&self, _request: Request<lnrpc::SendRequest>) -> RpcResult<lnrpc::SendResponse> {
        Err(Status::unimplemented("SendPaymentSync"))
    }

    async fn add_invoice(&self, _request: Request<lnrpc::Invoice>) -> RpcResult<lnrpc::AddInvoiceResponse> {
        Err(Status::unimplemented("AddInvoice"))
    }

    /// Pages like LND: at most `num_max_invoices` (100 when zero), oldest first unless `reversed`.
    async fn list_invoices(&self, request: Request<lnrpc::ListInvoiceRequest>) -> RpcResult<lnrpc::ListInvoiceResponse> {
        let request = request.into_inner();
        let mut state = self.state();
        state.invoice_requests.push(request.clone());

        let max = match request.num_max_invoices {
            0 => 100,
            max => max as usize,
        };
        let count = state.invoices.len();
        let page = if request.reversed {
            &state.invoices[count.saturating_sub(max)..]
        } else {
            &state.invoices[..count.min(max)]
        };
        Ok(Response::new(lnrpc::ListInvoiceResponse {
            invoices: page.to_vec(),
            ..Default::default()
        }))
    }

    type SubscribeInvoicesStream = tokio_stream::Iter<std::vec::IntoIter<Result<lnrpc::Invoice, Status>>>;

    async fn subscribe_invoices(&self, _request: Request<lnrpc::InvoiceSubscription>) -> RpcResult<Self::SubscribeInvoicesStream> {
        Err(Status::unimplemented("SubscribeInvoices"))
    }

    async fn decode_pay_req(&self, _request: Request<lnrpc::PayReqString>) -> RpcResult<lnrpc::PayReq> {
        Err(Status::unimplemented("DecodePayReq"))
    }

    async fn stop_daemon(&self, _request: Request<lnrpc::StopRequest>) -> RpcResult<lnrpc::StopResponse> {
        Err(Status::unimplemented("StopDaemon"))
    }
}

/// Records what the regtest helpers ask of bitcoind.
#[derive(Debug, Default)]
pub(crate) struct FakeChain {
    pub sent: Mutex<Vec<(String, Amount)>>,
    pub mined: Mutex<Vec<u64>>,
}

#[async_trait]
impl Chain for FakeChain {
    async fn send_to(&self, address: &str, amount: Amount) -> Result<(), BitcoindError> {
        self.sent.lock().unwrap().push((address.to_owned(), amount));
        Ok(())
    }

    async fn mine_blocks(&self, blocks: u64) -> Result<(), BitcoindError> {
        self.mined.lock().unwrap().push(blocks);
        Ok(())
    }
}
