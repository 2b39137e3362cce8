//! The toy payment scenario: Alice and Bob open channels to the hub and Alice pays Bob.

use crate::config::NodeRole;
use crate::lnrpc;
use crate::regtest::{Network, RegtestError};
use crate::NodeError;

/// Satoshis each leaf commits to its channel with the hub.
pub const CHANNEL_CAPACITY: i64 = 100_000;
/// Commitment fee reserve added on top of the channel capacity.
pub const COMMIT_FEE: i64 = 9_050;
/// Satoshis pushed to the hub when opening, so it can forward in both directions.
pub const PUSH_AMOUNT: i64 = CHANNEL_CAPACITY / 2;
pub const INVOICE_AMOUNT: i64 = 10;

/// What the scenario did
#[derive(Debug, Default)]
pub struct Report {
    /// Channels opened by this run, keyed by the opening leaf.
    pub opened: Vec<(String, lnrpc::ChannelPoint)>,
    pub payment_request: Option<String>,
    pub payment: Option<lnrpc::SendResponse>,
}

/// Runs every step in order; steps already satisfied (peers connected, channels open) are skipped.
pub async fn run(network: &mut Network) -> Result<Report, RegtestError> {
    let mut report = Report::default();

    tracing::debug!("{:?}", network.alice.wallet_balance().await?);
    tracing::debug!("{:?}", network.bob.wallet_balance().await?);

    connect_leaves(network).await?;

    for role in [NodeRole::Alice, NodeRole::Bob].iter() {
        if let Some(channel_point) = open_channel_to_hub(network, *role).await? {
            report.opened.push((network.node(*role).name().to_owned(), channel_point));
        }
    }

    log_channels(network).await?;

    // Every channel on the route needs more local balance than the amount sent.
    let memo = format!("Bob wants {} satoshi from alice", INVOICE_AMOUNT);
    let invoice = network.bob.add_invoice(&memo, INVOICE_AMOUNT, 3600).await?;
    tracing::debug!("{:?}", invoice);

    let payment_request = invoice.payment_request;
    tracing::info!("{}", payment_request);
    tracing::debug!("{:?}", network.bob.decode_pay_request(&payment_request).await?);

    tracing::info!("Alice -> send payment to bobs request");
    let payment = network.alice.pay_invoice(&payment_request).await?;
    tracing::debug!("{:?}", payment);

    report.payment_request = Some(payment_request);
    report.payment = Some(payment);
    Ok(report)
}

/// Connects Alice and Bob to the hub.
pub async fn connect_leaves(network: &mut Network) -> Result<(), RegtestError> {
    network.connect_to_peer(NodeRole::Alice, NodeRole::Hub).await?;
    network.connect_to_peer(NodeRole::Bob, NodeRole::Hub).await
}

/// Opens a channel from the leaf playing `role` to the hub; `None` if one exists already.
pub async fn open_channel_to_hub(network: &mut Network, role: NodeRole) -> Result<Option<lnrpc::ChannelPoint>, RegtestError> {
    let hub = network.hub.identity_pubkey().to_owned();
    let leaf = network.node_mut(role);

    match leaf.open_channel_with(&hub, CHANNEL_CAPACITY + COMMIT_FEE, PUSH_AMOUNT).await {
        Ok(channel_point) => {
            tracing::info!("{} opened channel {:?}", leaf, channel_point);
            Ok(Some(channel_point))
        },
        Err(NodeError::ChannelAlreadyExists { .. }) => {
            tracing::debug!("{} already has a channel with the hub", leaf);
            Ok(None)
        },
        Err(error) => Err(error.into()),
    }
}

async fn log_channels(network: &mut Network) -> Result<(), RegtestError> {
    for role in [NodeRole::Hub, NodeRole::Alice, NodeRole::Bob].iter() {
        let node = network.node_mut(*role);
        let channels = node.list_channels().await?;
        let active = channels.iter().filter(|channel| channel.active).count();
        tracing::debug!("{} Active channels: {}/{}", node, active, channels.len());
    }

    tracing::debug!("{:?}", network.alice.channel_balance().await?);
    tracing::debug!("{:?}", network.bob.channel_balance().await?);
    Ok(())
}

