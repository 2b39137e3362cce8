//! Named handle to a single LND daemon.

use std::convert::TryInto;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::channels;
use crate::config::NodeConfig;
use crate::error::InternalConnectError;
use crate::lnrpc::{self, close_status_update, invoice::InvoiceState, AddressType};
use crate::{ConnectError, LightningClient, NodeError};

/// Final CLTV delta LND uses when an invoice doesn't specify one.
pub const DEFAULT_FINAL_CLTV_DELTA: i32 = 144;

/// Snapshot of the on-chain wallet balance of a node.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct WalletBalance {
    pub node: String,
    pub total_balance: i64,
    pub confirmed_balance: i64,
    pub unconfirmed_balance: i64,
}

/// Snapshot of the off-chain balance of a node.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ChannelBalance {
    pub node: String,
    pub balance: i64,
    pub pending_open_balance: i64,
}

/// A connected LND daemon with a display name and known identity
///
/// Every method forwards exactly one RPC (two for the ones combining calls, which say so) and
/// maps failures to [`NodeError`].
#[derive(Clone)]
pub struct LndNode {
    name: String,
    client: LightningClient,
    identity_pubkey: String,
}

impl fmt::Debug for LndNode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("LndNode")
            .field("name", &self.name)
            .field("identity_pubkey", &self.identity_pubkey)
            .finish()
    }
}

impl fmt::Display for LndNode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl LndNode {
    /// Connects to the daemon and fetches its identity public key.
    pub async fn connect<A, CP, MP>(name: impl Into<String>, address: A, cert_file: CP, macaroon_file: MP) -> Result<Self, ConnectError> where A: TryInto<tonic::transport::Endpoint> + fmt::Debug + ToString, <A as TryInto<tonic::transport::Endpoint>>::Error: std::error::Error + Send + Sync + 'static, CP: AsRef<Path> + Into<PathBuf> + fmt::Debug, MP: AsRef<Path> + Into<PathBuf> + fmt::Debug {
        let name = name.into();
        tracing::info!("CONNECTING TO {}: {}", name, address.to_string());
        let client = crate::connect(address, cert_file, macaroon_file).await?;
        LndNode::from_client(name, client).await
    }

    /// Connects to the node described by `config`.
    pub async fn from_config(config: &NodeConfig) -> Result<Self, ConnectError> {
        LndNode::connect(config.name.clone(), config.rpc_address(), config.tls_cert.clone(), config.macaroon.clone()).await
    }

    /// Wraps an already connected client, fetching the identity with `GetInfo`.
    pub async fn from_client(name: String, client: LightningClient) -> Result<Self, ConnectError> {
        let mut node = LndNode { name, client, identity_pubkey: String::new(), };
        match node.get_info().await {
            Ok(info) => node.identity_pubkey = info.identity_pubkey,
            Err(error) => return Err(InternalConnectError::Handshake { node: node.name, error: Box::new(error), }.into()),
        }
        Ok(node)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hex-encoded public key of the node, as reported by `GetInfo` when connecting.
    pub fn identity_pubkey(&self) -> &str {
        &self.identity_pubkey
    }

    /// Gives access to the raw client for calls not wrapped here.
    pub fn client(&mut self) -> &mut LightningClient {
        &mut self.client
    }

    /// Checks that the daemon answers.
    ///
    /// Only transport failures yield `Ok(false)`; a daemon refusing the call is still an error.
    pub async fn ping(&mut self) -> Result<bool, NodeError> {
        match self.get_info().await {
            Ok(_) => Ok(true),
            Err(error) if error.is_transient() => {
                tracing::warn!("{} is unreachable: {}", self.name, error);
                Ok(false)
            },
            Err(error) => Err(error),
        }
    }

    pub async fn get_info(&mut self) -> Result<lnrpc::GetInfoResponse, NodeError> {
        let response = self.client
            .get_info(lnrpc::GetInfoRequest {})
            .await
            .map_err(|status| NodeError::from_status("GetInfo", status))?;
        Ok(response.into_inner())
    }

    /// Returns the public keys of connected peers.
    pub async fn list_peers(&mut self) -> Result<Vec<String>, NodeError> {
        let response = self.client
            .list_peers(lnrpc::ListPeersRequest::default())
            .await
            .map_err(|status| NodeError::from_status("ListPeers", status))?;
        Ok(response.into_inner().peers.into_iter().map(|peer| peer.pub_key).collect())
    }

    /// Connects to `pubkey@host`, permanently if `permanent` is set.
    pub async fn connect_peer(&mut self, pubkey: &str, host: &str, permanent: bool) -> Result<(), NodeError> {
        tracing::info!("{} connecting to {}@{}", self.name, pubkey, host);
        let request = lnrpc::ConnectPeerRequest {
            addr: Some(lnrpc::LightningAddress { pubkey: pubkey.to_owned(), host: host.to_owned(), }),
            perm: permanent,
            ..Default::default()
        };
        self.client
            .connect_peer(request)
            .await
            .map_err(|status| NodeError::from_status("ConnectPeer", status))?;
        Ok(())
    }

    pub async fn disconnect_from_peer(&mut self, pubkey: &str) -> Result<(), NodeError> {
        tracing::debug!("{} disconnecting from {}", self.name, pubkey);
        self.client
            .disconnect_peer(lnrpc::DisconnectPeerRequest { pub_key: pubkey.to_owned(), })
            .await
            .map_err(|status| NodeError::from_status("DisconnectPeer", status))?;
        Ok(())
    }

    pub async fn wallet_balance(&mut self) -> Result<WalletBalance, NodeError> {
        let response = self.client
            .wallet_balance(lnrpc::WalletBalanceRequest {})
            .await
            .map_err(|status| NodeError::from_status("WalletBalance", status))?
            .into_inner();
        Ok(WalletBalance {
            node: self.name.clone(),
            total_balance: response.total_balance,
            confirmed_balance: response.confirmed_balance,
            unconfirmed_balance: response.unconfirmed_balance,
        })
    }

    #[allow(deprecated)]
    pub async fn channel_balance(&mut self) -> Result<ChannelBalance, NodeError> {
        let response = self.client
            .channel_balance(lnrpc::ChannelBalanceRequest {})
            .await
            .map_err(|status| NodeError::from_status("ChannelBalance", status))?
            .into_inner();
        Ok(ChannelBalance {
            node: self.name.clone(),
            balance: response.balance,
            pending_open_balance: response.pending_open_balance,
        })
    }

    pub async fn list_channels(&mut self) -> Result<Vec<lnrpc::Channel>, NodeError> {
        self.do_list_channels(lnrpc::ListChannelsRequest::default()).await
    }

    /// Lists channels with a single peer.
    pub async fn list_peer_channels(&mut self, pubkey: &str) -> Result<Vec<lnrpc::Channel>, NodeError> {
        let peer = decode_pubkey(pubkey)?;
        self.do_list_channels(lnrpc::ListChannelsRequest { peer, ..Default::default() }).await
    }

    async fn do_list_channels(&mut self, request: lnrpc::ListChannelsRequest) -> Result<Vec<lnrpc::Channel>, NodeError> {
        let response = self.client
            .list_channels(request)
            .await
            .map_err(|status| NodeError::from_status("ListChannels", status))?;
        Ok(response.into_inner().channels)
    }

    pub async fn list_pending_channels(&mut self) -> Result<lnrpc::PendingChannelsResponse, NodeError> {
        let response = self.client
            .pending_channels(lnrpc::PendingChannelsRequest {})
            .await
            .map_err(|status| NodeError::from_status("PendingChannels", status))?;
        Ok(response.into_inner())
    }

    /// Checks whether a channel with `pubkey` is open, or with `pending` also pending-open.
    ///
    /// Calls `ListChannels` and, with `pending`, `PendingChannels`.
    pub async fn channel_exists_with_node(&mut self, pubkey: &str, pending: bool) -> Result<bool, NodeError> {
        let open = self.list_channels().await?;
        let pending_open = if pending {
            Some(self.list_pending_channels().await?.pending_open_channels)
        } else {
            None
        };
        Ok(channels::has_channel_with(pubkey, &open, pending_open.as_deref()))
    }

    /// Opens a channel and waits for the funding transaction to be published.
    pub async fn open_channel(&mut self, request: lnrpc::OpenChannelRequest) -> Result<lnrpc::ChannelPoint, NodeError> {
        let response = self.client
            .open_channel_sync(request)
            .await
            .map_err(|status| NodeError::from_status("OpenChannelSync", status))?;
        Ok(response.into_inner())
    }

    /// Opens a channel to `pubkey` unless one is already open or pending.
    ///
    /// Calls `ListChannels`, `PendingChannels` and `OpenChannelSync`.
    pub async fn open_channel_with(&mut self, pubkey: &str, local_funding_amount: i64, push_sat: i64) -> Result<lnrpc::ChannelPoint, NodeError> {
        if self.channel_exists_with_node(pubkey, true).await? {
            return Err(NodeError::ChannelAlreadyExists { pubkey: pubkey.to_owned(), });
        }

        tracing::info!("{} opening channel to {} (funding: {}, push: {})", self.name, pubkey, local_funding_amount, push_sat);
        #[allow(deprecated)]
        let request = lnrpc::OpenChannelRequest {
            node_pubkey: decode_pubkey(pubkey)?,
            node_pubkey_string: pubkey.to_owned(),
            local_funding_amount,
            push_sat,
            ..Default::default()
        };
        self.open_channel(request).await
    }

    /// Starts closing a channel and returns the stream of status updates.
    pub async fn close_channel(&mut self, channel_point: lnrpc::ChannelPoint, force: bool) -> Result<tonic::Streaming<lnrpc::CloseStatusUpdate>, NodeError> {
        let request = lnrpc::CloseChannelRequest {
            channel_point: Some(channel_point),
            force,
            ..Default::default()
        };
        let response = self.client
            .close_channel(request)
            .await
            .map_err(|status| NodeError::from_status("CloseChannel", status))?;
        Ok(response.into_inner())
    }

    /// Closes all channels with `peer`, waiting for each closing transaction to be broadcast.
    ///
    /// Calls `ListChannels` and then `CloseChannel` once per channel.
    pub async fn close_peer_channels(&mut self, peer: &str, force: bool) -> Result<Vec<lnrpc::PendingUpdate>, NodeError> {
        let mut pending = Vec::new();
        for channel in self.list_peer_channels(peer).await? {
            let channel_point = channels::parse_channel_point(&channel.channel_point)?;
            tracing::info!("{} closing channel {} with {} (force: {})", self.name, channel.channel_point, peer, force);

            let mut updates = self.close_channel(channel_point, force).await?;
            loop {
                let update = updates
                    .message()
                    .await
                    .map_err(|status| NodeError::from_status("CloseChannel", status))?
                    .ok_or(NodeError::UnexpectedEnd { method: "CloseChannel", })?;

                match update.update {
                    Some(close_status_update::Update::ClosePending(update)) => {
                        pending.push(update);
                        break;
                    },
                    Some(close_status_update::Update::ChanClose(update)) => {
                        tracing::debug!("channel {} closed (success: {})", channel.channel_point, update.success);
                        break;
                    },
                    None => continue,
                }
            }
        }
        Ok(pending)
    }

    /// Adds an invoice; the scripts use memo "Pay me", no amount and an hour of expiry.
    pub async fn add_invoice(&mut self, memo: &str, amount: i64, expiry: i64) -> Result<lnrpc::AddInvoiceResponse, NodeError> {
        let invoice = lnrpc::Invoice {
            memo: memo.to_owned(),
            value: amount,
            expiry,
            ..Default::default()
        };
        let response = self.client
            .add_invoice(invoice)
            .await
            .map_err(|status| NodeError::from_status("AddInvoice", status))?;
        Ok(response.into_inner())
    }

    /// Lists the oldest invoices, up to the daemon's page size (100).
    pub async fn list_invoices(&mut self) -> Result<Vec<lnrpc::Invoice>, NodeError> {
        self.do_list_invoices(lnrpc::ListInvoiceRequest::default()).await
    }

    /// Returns the most recently added invoice.
    pub async fn latest_invoice(&mut self) -> Result<Option<lnrpc::Invoice>, NodeError> {
        let request = lnrpc::ListInvoiceRequest {
            reversed: true,
            num_max_invoices: 1,
            ..Default::default()
        };
        Ok(self.do_list_invoices(request).await?.pop())
    }

    async fn do_list_invoices(&mut self, request: lnrpc::ListInvoiceRequest) -> Result<Vec<lnrpc::Invoice>, NodeError> {
        let response = self.client
            .list_invoices(request)
            .await
            .map_err(|status| NodeError::from_status("ListInvoices", status))?;
        Ok(response.into_inner().invoices)
    }

    pub async fn decode_pay_request(&mut self, pay_req: &str) -> Result<lnrpc::PayReq, NodeError> {
        let request = lnrpc::PayReqString { pay_req: pay_req.trim_end().to_owned(), };
        let response = self.client
            .decode_pay_req(request)
            .await
            .map_err(|status| NodeError::from_status("DecodePayReq", status))?;
        Ok(response.into_inner())
    }

    /// Pays a BOLT11 payment request and waits for the outcome.
    ///
    /// Calls `DecodePayReq` and `SendPaymentSync`.
    pub async fn pay_invoice(&mut self, pay_req: &str) -> Result<lnrpc::SendResponse, NodeError> {
        let details = self.decode_pay_request(pay_req).await?;
        tracing::info!("{} paying {} sat to {} ({})", self.name, details.num_satoshis, details.destination, details.payment_hash);

        let request = lnrpc::SendRequest {
            payment_request: pay_req.trim_end().to_owned(),
            final_cltv_delta: DEFAULT_FINAL_CLTV_DELTA,
            ..Default::default()
        };
        let response = self.client
            .send_payment_sync(request)
            .await
            .map_err(|status| NodeError::from_status("SendPaymentSync", status))?
            .into_inner();

        if !response.payment_error.is_empty() {
            return Err(NodeError::Payment { payment_hash: details.payment_hash, reason: response.payment_error, });
        }
        tracing::debug!("{} payment {} settled", self.name, details.payment_hash);
        Ok(response)
    }

    /// Subscribes to invoice updates after the given add/settle indices (zero means all new ones).
    pub async fn subscribe_invoices(&mut self, add_index: u64, settle_index: u64) -> Result<InvoiceStream, NodeError> {
        let response = self.client
            .subscribe_invoices(lnrpc::InvoiceSubscription { add_index, settle_index, })
            .await
            .map_err(|status| NodeError::from_status("SubscribeInvoices", status))?;
        Ok(InvoiceStream { inner: response.into_inner(), })
    }

    pub async fn new_address(&mut self, address_type: AddressType) -> Result<String, NodeError> {
        let request = lnrpc::NewAddressRequest {
            r#type: address_type as i32,
            ..Default::default()
        };
        let response = self.client
            .new_address(request)
            .await
            .map_err(|status| NodeError::from_status("NewAddress", status))?;
        Ok(response.into_inner().address)
    }

    /// Asks the daemon to shut down gracefully.
    pub async fn stop(&mut self) -> Result<(), NodeError> {
        tracing::warn!("Stopping {}", self.name);
        self.client
            .stop_daemon(lnrpc::StopRequest {})
            .await
            .map_err(|status| NodeError::from_status("StopDaemon", status))?;
        Ok(())
    }
}

fn decode_pubkey(pubkey: &str) -> Result<Vec<u8>, NodeError> {
    hex::decode(pubkey).map_err(|error| NodeError::InvalidPubkey { pubkey: pubkey.to_owned(), error, })
}

/// Invoices streamed by `SubscribeInvoices`
pub struct InvoiceStream {
    inner: tonic::Streaming<lnrpc::Invoice>,
}

impl InvoiceStream {
    /// Waits for the next added or settled invoice; `None` once the daemon closes the stream.
    pub async fn next(&mut self) -> Result<Option<lnrpc::Invoice>, NodeError> {
        self.inner
            .message()
            .await
            .map_err(|status| NodeError::from_status("SubscribeInvoices", status))
    }

    /// Waits for the next invoice that reached `Settled`.
    pub async fn next_settled(&mut self) -> Result<Option<lnrpc::Invoice>, NodeError> {
        while let Some(invoice) = self.next().await? {
            if invoice_state(&invoice) == Some(InvoiceState::Settled) {
                return Ok(Some(invoice));
            }
        }
        Ok(None)
    }
}

/// Decodes the state of an invoice, `None` for states this crate doesn't know about.
pub fn invoice_state(invoice: &lnrpc::Invoice) -> Option<InvoiceState> {
    InvoiceState::from_i32(invoice.state)
}

/// Returns `true` if the invoice can still be paid.
pub fn is_open(invoice: &lnrpc::Invoice) -> bool {
    invoice_state(invoice) == Some(InvoiceState::Open)
}
