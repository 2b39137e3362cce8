//! bitcoind JSON-RPC collaborator used to fund wallets and confirm transactions.
//!
//! `bitcoincore_rpc` is blocking, so every call is moved to tokio's blocking pool.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use bitcoincore_rpc::bitcoin::{Address, Amount, BlockHash, Txid};
use bitcoincore_rpc::bitcoincore_rpc_json::GetWalletInfoResult;
use bitcoincore_rpc::{Auth, Client, RpcApi};

use crate::config::BitcoindConfig;

#[derive(Debug)]
pub enum BitcoindError {
    Rpc { method: &'static str, error: bitcoincore_rpc::Error, },
    InvalidAddress { address: String, error: bitcoincore_rpc::bitcoin::util::address::Error, },
    Join(tokio::task::JoinError),
}

impl fmt::Display for BitcoindError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BitcoindError::Rpc { method, .. } => write!(f, "bitcoind call {} failed", method),
            BitcoindError::InvalidAddress { address, .. } => write!(f, "invalid bitcoin address {}", address),
            BitcoindError::Join(_) => write!(f, "bitcoind call panicked or was cancelled"),
        }
    }
}

impl std::error::Error for BitcoindError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BitcoindError::Rpc { error, .. } => Some(error),
            BitcoindError::InvalidAddress { error, .. } => Some(error),
            BitcoindError::Join(error) => Some(error),
        }
    }
}

/// Handle to the regtest bitcoind
#[derive(Clone)]
pub struct Bitcoind {
    client: Arc<Client>,
}

impl Bitcoind {
    pub fn new(config: &BitcoindConfig) -> Result<Self, BitcoindError> {
        let auth = Auth::UserPass(config.user.clone(), config.password.clone());
        let client = Client::new(&config.url, auth)
            .map_err(|error| BitcoindError::Rpc { method: "connect", error, })?;
        Ok(Bitcoind { client: Arc::new(client), })
    }

    async fn call<T, F>(&self, method: &'static str, f: F) -> Result<T, BitcoindError> where T: Send + 'static, F: FnOnce(&Client) -> bitcoincore_rpc::Result<T> + Send + 'static {
        let client = Arc::clone(&self.client);
        tokio::task::spawn_blocking(move || f(&*client))
            .await
            .map_err(BitcoindError::Join)?
            .map_err(|error| BitcoindError::Rpc { method, error, })
    }

    pub async fn wallet_info(&self) -> Result<GetWalletInfoResult, BitcoindError> {
        self.call("getwalletinfo", |client| client.get_wallet_info()).await
    }

    /// Sends `amount` from the bitcoind wallet to `address`.
    pub async fn send_to_address(&self, address: &str, amount: Amount) -> Result<Txid, BitcoindError> {
        let address = Address::from_str(address)
            .map_err(|error| BitcoindError::InvalidAddress { address: address.to_owned(), error, })?;
        tracing::debug!("Sending {} to {}", amount, address);
        self.call("sendtoaddress", move |client| client.send_to_address(&address, amount, None, None, None, None, None, None)).await
    }

    /// Mines `blocks` blocks paying to a fresh address of the bitcoind wallet.
    pub async fn mine(&self, blocks: u64) -> Result<Vec<BlockHash>, BitcoindError> {
        let address = self.call("getnewaddress", |client| client.get_new_address(None, None)).await?;
        let hashes = self.call("generatetoaddress", move |client| client.generate_to_address(blocks, &address)).await?;
        tracing::debug!("Mined {} blocks", hashes.len());
        Ok(hashes)
    }
}

/// Chain operations the regtest helpers need: funding an address and mining
#[async_trait]
pub trait Chain: Send + Sync {
    async fn send_to(&self, address: &str, amount: Amount) -> Result<(), BitcoindError>;

    async fn mine_blocks(&self, blocks: u64) -> Result<(), BitcoindError>;
}

#[async_trait]
impl Chain for Bitcoind {
    async fn send_to(&self, address: &str, amount: Amount) -> Result<(), BitcoindError> {
        self.send_to_address(address, amount).await?;
        Ok(())
    }

    async fn mine_blocks(&self, blocks: u64) -> Result<(), BitcoindError> {
        self.mine(blocks).await?;
        Ok(())
    }
}

/// Converts the satoshi difference between a target and a current balance into an amount to send.
///
/// Returns `None` when the balance already covers the target.
pub fn shortfall(target_sat: i64, confirmed_sat: i64) -> Option<Amount> {
    if confirmed_sat >= target_sat {
        return None;
    }
    let missing = target_sat - confirmed_sat.max(0);
    Some(Amount::from_sat(missing as u64))
}
