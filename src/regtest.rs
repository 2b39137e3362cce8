//! Orchestration of a regtest network made of LND nodes and a bitcoind.
//!
//! These helpers replace the sleep-and-retry glue around the scenario: waiting for chain sync,
//! funding wallets from bitcoind and tearing down peer connections.

use std::fmt;
use std::time::Duration;

use crate::bitcoind::{self, Bitcoind, BitcoindError, Chain};
use crate::config::{Config, NodeConfig, NodeRole};
use crate::docker::{self, DockerError};
use crate::lnrpc::AddressType;
use crate::node::WalletBalance;
use crate::{ConnectError, DaemonErrorKind, LndNode, NodeError};

/// Error of a multi-step regtest operation
#[derive(Debug)]
pub enum RegtestError {
    Connect(ConnectError),
    Node(NodeError),
    Bitcoind(BitcoindError),
    Docker(DockerError),
    /// Some nodes didn't report `synced_to_chain` in time.
    NotSynced { nodes: Vec<String>, attempts: u32, },
    /// The wallet stayed below the target after all funding rounds.
    NotFunded { node: String, confirmed_balance: i64, target: i64, },
    /// Neither `p2p_host` nor a running container tells where the node listens.
    UnknownHost { node: String, },
    /// The configuration has no node playing this role.
    MissingNode { role: NodeRole, },
    /// Peers were still connected after disconnecting all of them.
    PeersRemain { node: String, peers: Vec<String>, },
}

impl fmt::Display for RegtestError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RegtestError::Connect(_) => write!(f, "failed to connect to a node"),
            RegtestError::Node(_) => write!(f, "node call failed"),
            RegtestError::Bitcoind(_) => write!(f, "bitcoind call failed"),
            RegtestError::Docker(_) => write!(f, "docker command failed"),
            RegtestError::NotSynced { nodes, attempts } => write!(f, "{} not synced to chain after {} attempts", nodes.join(", "), attempts),
            RegtestError::NotFunded { node, confirmed_balance, target } => write!(f, "{} has {} sat confirmed, wanted {}", node, confirmed_balance, target),
            RegtestError::UnknownHost { node } => write!(f, "can't get {} ip", node),
            RegtestError::MissingNode { role } => write!(f, "no {} node configured", role),
            RegtestError::PeersRemain { node, peers } => write!(f, "{} is still connected to {}", node, peers.join(", ")),
        }
    }
}

impl std::error::Error for RegtestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RegtestError::Connect(error) => Some(error),
            RegtestError::Node(error) => Some(error),
            RegtestError::Bitcoind(error) => Some(error),
            RegtestError::Docker(error) => Some(error),
            _ => None,
        }
    }
}

impl From<ConnectError> for RegtestError {
    fn from(value: ConnectError) -> Self {
        RegtestError::Connect(value)
    }
}

impl From<NodeError> for RegtestError {
    fn from(value: NodeError) -> Self {
        RegtestError::Node(value)
    }
}

impl From<BitcoindError> for RegtestError {
    fn from(value: BitcoindError) -> Self {
        RegtestError::Bitcoind(value)
    }
}

impl From<DockerError> for RegtestError {
    fn from(value: DockerError) -> Self {
        RegtestError::Docker(value)
    }
}

/// Polls `GetInfo` until every node reports `synced_to_chain`.
///
/// Nodes that are unreachable (e.g. still restarting) count as not synced. With `chain`
/// given, a block is mined on every unsynced round.
pub async fn wait_until_synced(nodes: &mut [&mut LndNode], chain: Option<&dyn Chain>, interval: Duration, attempts: u32) -> Result<(), RegtestError> {
    let mut synced = vec![false; nodes.len()];

    for attempt in 1..=attempts {
        for (node, synced) in nodes.iter_mut().zip(synced.iter_mut()) {
            if *synced {
                continue;
            }
            *synced = match node.get_info().await {
                Ok(info) => info.synced_to_chain,
                Err(error) if error.is_transient() => false,
                Err(error) => return Err(error.into()),
            };
        }

        if synced.iter().all(|synced| *synced) {
            return Ok(());
        }

        tracing::warn!("Nodes not synced to chain: {} (attempt {}/{})", unsynced(nodes, &synced).join(", "), attempt, attempts);
        if let Some(chain) = chain {
            chain.mine_blocks(1).await?;
        }
        tokio::time::sleep(interval).await;
    }

    Err(RegtestError::NotSynced { nodes: unsynced(nodes, &synced), attempts, })
}

fn unsynced(nodes: &[&mut LndNode], synced: &[bool]) -> Vec<String> {
    nodes.iter()
        .zip(synced)
        .filter(|(_, synced)| !**synced)
        .map(|(node, _)| node.name().to_owned())
        .collect()
}

/// Tops the confirmed wallet balance of `node` up to `amount_sat` from bitcoind.
///
/// Each round sends the shortfall to a fresh node address and mines `confirmation_blocks`.
pub async fn ensure_funded(node: &mut LndNode, chain: &dyn Chain, amount_sat: i64, confirmation_blocks: u64, attempts: u32) -> Result<WalletBalance, RegtestError> {
    let mut balance = node.wallet_balance().await?;
    tracing::info!("{:?}", balance);

    for _ in 0..attempts {
        let missing = match bitcoind::shortfall(amount_sat, balance.confirmed_balance) {
            Some(missing) => missing,
            None => return Ok(balance),
        };

        let address = node.new_address(AddressType::WitnessPubkeyHash).await?;
        tracing::debug!("Funding {} with {} at {}", node, missing, address);
        chain.send_to(&address, missing).await?;
        chain.mine_blocks(confirmation_blocks).await?;

        balance = node.wallet_balance().await?;
    }

    if balance.confirmed_balance >= amount_sat {
        Ok(balance)
    } else {
        Err(RegtestError::NotFunded { node: node.name().to_owned(), confirmed_balance: balance.confirmed_balance, target: amount_sat, })
    }
}

/// Disconnects `node` from all of its peers.
///
/// Peers still holding active channels get them force-closed, the closing transactions are
/// confirmed in one batch and the whole pass is retried once.
pub async fn disconnect_all_peers(node: &mut LndNode, chain: &dyn Chain, confirmation_blocks: u64) -> Result<(), RegtestError> {
    let refused = disconnect_pass(node).await?;
    if !refused.is_empty() {
        for (peer, _) in &refused {
            tracing::warn!("{} has active channels with {}, closing them first", node, peer);
            node.close_peer_channels(peer, true).await?;
        }
        chain.mine_blocks(confirmation_blocks).await?;
        tokio::time::sleep(Duration::from_secs(1)).await;

        if let Some((_, error)) = disconnect_pass(node).await?.into_iter().next() {
            return Err(error.into());
        }
    }

    let peers = node.list_peers().await?;
    if !peers.is_empty() {
        return Err(RegtestError::PeersRemain { node: node.name().to_owned(), peers, });
    }
    Ok(())
}

/// Disconnects every peer it can; returns the ones refusing because of open channels.
async fn disconnect_pass(node: &mut LndNode) -> Result<Vec<(String, NodeError)>, NodeError> {
    let mut refused = Vec::new();
    for peer in node.list_peers().await? {
        tracing::debug!("Disconnecting: {}", peer);
        match node.disconnect_from_peer(&peer).await {
            Ok(()) => (),
            Err(error) if error.daemon_kind() == Some(DaemonErrorKind::ChannelsStillActive) => refused.push((peer, error)),
            Err(error) => return Err(error),
        }
    }
    Ok(refused)
}

/// Connects `who` to `pubkey@host`; being connected already counts as success.
pub async fn ensure_connected(who: &mut LndNode, pubkey: &str, host: &str) -> Result<(), NodeError> {
    if who.list_peers().await?.iter().any(|peer| peer == pubkey) {
        tracing::debug!("{} already connected to {}", who, pubkey);
        return Ok(());
    }

    match who.connect_peer(pubkey, host, false).await {
        Err(error) if error.daemon_kind() == Some(DaemonErrorKind::AlreadyConnected) => Ok(()),
        result => result,
    }
}

/// Finds the address other nodes should use to reach `node` over the Lightning p2p protocol.
pub async fn p2p_host(node: &NodeConfig) -> Result<String, RegtestError> {
    if let Some(host) = &node.p2p_host {
        return Ok(host.clone());
    }
    match &node.container {
        Some(container) => docker::container_ip(container)
            .await?
            .ok_or_else(|| RegtestError::UnknownHost { node: node.name.clone(), }),
        None => Ok(format!("{}:{}", node.host, node.node_port)),
    }
}

/// Restarts every node container and gives the daemons time to come up.
pub async fn restart_nodes(config: &Config, settle: Duration) -> Result<(), RegtestError> {
    for node in &config.nodes {
        if let Some(container) = &node.container {
            docker::restart(container).await?;
        }
    }
    tokio::time::sleep(settle).await;
    Ok(())
}

/// The hub, Alice, Bob and bitcoind, connected according to a [`Config`]
pub struct Network {
    pub hub: LndNode,
    pub alice: LndNode,
    pub bob: LndNode,
    pub bitcoind: Bitcoind,
    config: Config,
}

impl Network {
    pub async fn connect(config: Config) -> Result<Self, RegtestError> {
        let hub = node_config(&config, NodeRole::Hub)?;
        let alice = node_config(&config, NodeRole::Alice)?;
        let bob = node_config(&config, NodeRole::Bob)?;

        let hub = LndNode::from_config(hub).await?;
        let alice = LndNode::from_config(alice).await?;
        let bob = LndNode::from_config(bob).await?;
        let bitcoind = Bitcoind::new(&config.bitcoind)?;

        Ok(Network { hub, alice, bob, bitcoind, config, })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn node(&self, role: NodeRole) -> &LndNode {
        match role {
            NodeRole::Hub => &self.hub,
            NodeRole::Alice => &self.alice,
            NodeRole::Bob => &self.bob,
        }
    }

    pub fn node_mut(&mut self, role: NodeRole) -> &mut LndNode {
        match role {
            NodeRole::Hub => &mut self.hub,
            NodeRole::Alice => &mut self.alice,
            NodeRole::Bob => &mut self.bob,
        }
    }

    /// Waits until all three nodes are synced, using the configured polling knobs.
    pub async fn wait_until_synced(&mut self) -> Result<(), RegtestError> {
        let regtest = &self.config.regtest;
        let chain = if regtest.mine_while_syncing { Some(&self.bitcoind as &dyn Chain) } else { None };
        let mut nodes = [&mut self.hub, &mut self.alice, &mut self.bob];
        wait_until_synced(&mut nodes, chain, regtest.sync_poll_interval(), regtest.sync_attempts).await
    }

    /// Connects `who` to `to` unless they are peers already.
    pub async fn connect_to_peer(&mut self, who: NodeRole, to: NodeRole) -> Result<(), RegtestError> {
        tracing::info!("Lets connect.. {} to {}", who, to);
        let host = p2p_host(node_config(&self.config, to)?).await?;
        let pubkey = self.node(to).identity_pubkey().to_owned();
        ensure_connected(self.node_mut(who), &pubkey, &host).await?;
        Ok(())
    }

    pub async fn ensure_funded(&mut self, role: NodeRole, amount_sat: i64) -> Result<WalletBalance, RegtestError> {
        let blocks = self.config.regtest.confirmation_blocks;
        let attempts = self.config.regtest.funding_attempts;
        let node = match role {
            NodeRole::Hub => &mut self.hub,
            NodeRole::Alice => &mut self.alice,
            NodeRole::Bob => &mut self.bob,
        };
        ensure_funded(node, &self.bitcoind, amount_sat, blocks, attempts).await
    }

    pub async fn disconnect_all_peers(&mut self, role: NodeRole) -> Result<(), RegtestError> {
        let blocks = self.config.regtest.confirmation_blocks;
        let node = match role {
            NodeRole::Hub => &mut self.hub,
            NodeRole::Alice => &mut self.alice,
            NodeRole::Bob => &mut self.bob,
        };
        disconnect_all_peers(node, &self.bitcoind, blocks).await
    }

    /// Mines the configured number of confirmation blocks.
    pub async fn confirm(&self) -> Result<(), RegtestError> {
        self.bitcoind.mine(self.config.regtest.confirmation_blocks).await?;
        Ok(())
    }
}

fn node_config(config: &Config, role: NodeRole) -> Result<&NodeConfig, RegtestError> {
    config.node(role).ok_or(RegtestError::MissingNode { role, })
}
