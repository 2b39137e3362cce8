//! Tests against a live Docker regtest network (hub, Alice, Bob and bitcoind).
//!
//! Run with `--features regtest-tests`; the network is described by the file named in
//! `LND_REGTEST_CONFIG` (defaults match the usual docker-compose setup).

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use lnd_regtest::config::{Config, NodeRole};
use lnd_regtest::lnrpc::invoice::InvoiceState;
use lnd_regtest::node::{invoice_state, is_open};
use lnd_regtest::regtest::Network;
use lnd_regtest::NodeError;

const ONE_BTC: i64 = 100_000_000;

// The tests share daemons, so they must not interleave.
static NETWORK_LOCK: Mutex<()> = Mutex::new(());

async fn network() -> (MutexGuard<'static, ()>, Network) {
    let guard = NETWORK_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let config = Config::from_env().expect("failed to load configuration");
    let mut network = Network::connect(config).await.expect("failed to connect to the network");
    network.wait_until_synced().await.expect("nodes did not sync");
    (guard, network)
}

#[cfg_attr(not(feature = "regtest-tests"), ignore)]
#[tokio::test]
async fn bitcoind_wallet_info() {
    let (_guard, network) = network().await;
    let info = network.bitcoind.wallet_info().await.unwrap();
    assert!(info.wallet_version > 0);
}

#[cfg_attr(not(feature = "regtest-tests"), ignore)]
#[tokio::test]
async fn ping() {
    let (_guard, mut network) = network().await;
    assert!(network.hub.ping().await.unwrap());
}

#[cfg_attr(not(feature = "regtest-tests"), ignore)]
#[tokio::test]
async fn getinfo() {
    let (_guard, mut network) = network().await;
    let info = network.hub.get_info().await.unwrap();
    assert_eq!(info.identity_pubkey, network.hub.identity_pubkey());
    assert!(info.synced_to_chain);
}

#[cfg_attr(not(feature = "regtest-tests"), ignore)]
#[tokio::test]
async fn connect_peer() {
    let (_guard, mut network) = network().await;
    network.connect_to_peer(NodeRole::Hub, NodeRole::Alice).await.unwrap();
    network.connect_to_peer(NodeRole::Hub, NodeRole::Bob).await.unwrap();

    // connecting twice is not an error
    network.connect_to_peer(NodeRole::Hub, NodeRole::Alice).await.unwrap();
}

#[cfg_attr(not(feature = "regtest-tests"), ignore)]
#[tokio::test]
async fn list_peers() {
    let (_guard, mut network) = network().await;
    network.connect_to_peer(NodeRole::Hub, NodeRole::Alice).await.unwrap();

    let alice = network.alice.identity_pubkey().to_owned();
    let peers = network.hub.list_peers().await.unwrap();
    assert!(peers.contains(&alice));
}

#[cfg_attr(not(feature = "regtest-tests"), ignore)]
#[tokio::test]
async fn disconnect_peer() {
    let (_guard, mut network) = network().await;
    if network.hub.list_peers().await.unwrap().is_empty() {
        network.connect_to_peer(NodeRole::Hub, NodeRole::Alice).await.unwrap();
    }

    network.disconnect_all_peers(NodeRole::Hub).await.unwrap();
    assert_eq!(network.hub.list_peers().await.unwrap(), Vec::<String>::new());
}

#[cfg_attr(not(feature = "regtest-tests"), ignore)]
#[tokio::test]
async fn wallet_balance() {
    let (_guard, mut network) = network().await;
    let balance = network.hub.wallet_balance().await.unwrap();
    assert_eq!(balance.node, network.hub.name());
    assert_eq!(balance.total_balance, balance.confirmed_balance + balance.unconfirmed_balance);
}

#[cfg_attr(not(feature = "regtest-tests"), ignore)]
#[tokio::test]
async fn channel_exists_with_node() {
    let (_guard, mut network) = network().await;
    let alice = network.alice.identity_pubkey().to_owned();

    let with_pending = network.hub.channel_exists_with_node(&alice, true).await.unwrap();
    let open_only = network.hub.channel_exists_with_node(&alice, false).await.unwrap();
    // pending channels only ever add to the set
    assert!(with_pending || !open_only);
}

#[cfg_attr(not(feature = "regtest-tests"), ignore)]
#[tokio::test]
async fn list_channels() {
    let (_guard, mut network) = network().await;
    let channels = network.hub.list_channels().await.unwrap();
    for channel in channels {
        assert!(!channel.remote_pubkey.is_empty());
        assert!(channel.channel_point.contains(':'));
    }
}

#[cfg_attr(not(feature = "regtest-tests"), ignore)]
#[tokio::test]
async fn list_pending_channels() {
    let (_guard, mut network) = network().await;
    let pending = network.hub.list_pending_channels().await.unwrap();
    for channel in pending.pending_open_channels {
        assert!(channel.channel.is_some());
    }
}

#[cfg_attr(not(feature = "regtest-tests"), ignore)]
#[tokio::test]
async fn channel_balance() {
    let (_guard, mut network) = network().await;
    let balance = network.hub.channel_balance().await.unwrap();
    assert!(balance.balance >= 0);
    assert!(balance.pending_open_balance >= 0);
}

#[cfg_attr(not(feature = "regtest-tests"), ignore)]
#[tokio::test]
async fn open_channel() {
    let (_guard, mut network) = network().await;
    network.connect_to_peer(NodeRole::Alice, NodeRole::Hub).await.unwrap();
    network.connect_to_peer(NodeRole::Bob, NodeRole::Hub).await.unwrap();

    network.ensure_funded(NodeRole::Alice, ONE_BTC).await.unwrap();
    network.ensure_funded(NodeRole::Bob, ONE_BTC).await.unwrap();

    let hub = network.hub.identity_pubkey().to_owned();
    let funding = ONE_BTC / 10;
    for (role, push) in [(NodeRole::Alice, 0), (NodeRole::Bob, 200_000)].iter() {
        match network.node_mut(*role).open_channel_with(&hub, funding, *push).await {
            Ok(channel_point) => assert!(channel_point.funding_txid.is_some()),
            Err(NodeError::ChannelAlreadyExists { pubkey }) => assert_eq!(pubkey, hub),
            Err(error) => panic!("failed to open channel: {}", error),
        }
    }

    network.confirm().await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(network.alice.channel_exists_with_node(&hub, false).await.unwrap());
    assert!(network.bob.channel_exists_with_node(&hub, false).await.unwrap());
}

#[cfg_attr(not(feature = "regtest-tests"), ignore)]
#[tokio::test]
async fn add_invoice() {
    let (_guard, mut network) = network().await;
    let amount = 10_000;
    let memo = format!("Bob wants {} satoshi", amount);

    let response = network.bob.add_invoice(&memo, amount, 3600).await.unwrap();
    assert!(!response.payment_request.is_empty());

    let latest = network.bob.latest_invoice().await.unwrap().unwrap();
    assert_eq!(latest.payment_request, response.payment_request);
    assert_eq!(latest.value, amount);
    assert!(is_open(&latest));
}

#[cfg_attr(not(feature = "regtest-tests"), ignore)]
#[tokio::test]
async fn decode_pay_request() {
    let (_guard, mut network) = network().await;
    let response = network.bob.add_invoice("Pay me", 1_000, 3600).await.unwrap();

    let padded = format!("{}\n", response.payment_request);
    let decoded = network.alice.decode_pay_request(&padded).await.unwrap();
    assert_eq!(decoded.destination, network.bob.identity_pubkey());
    assert_eq!(decoded.num_satoshis, 1_000);
    assert_eq!(decoded.description, "Pay me");
}

#[cfg_attr(not(feature = "regtest-tests"), ignore)]
#[tokio::test]
async fn pay_invoice() {
    let (_guard, mut network) = network().await;

    let payment_request = match network.bob.latest_invoice().await.unwrap() {
        Some(invoice) if is_open(&invoice) => invoice.payment_request,
        _ => network.bob.add_invoice("Bob wants 10 satoshi from alice", 10, 3600).await.unwrap().payment_request,
    };

    let payment = network.alice.pay_invoice(&payment_request).await.unwrap();
    assert!(!payment.payment_preimage.is_empty());

    let settled = network.bob.latest_invoice().await.unwrap().unwrap();
    assert_eq!(invoice_state(&settled), Some(InvoiceState::Settled));
}

#[cfg_attr(not(feature = "regtest-tests"), ignore)]
#[tokio::test]
async fn subscribe_invoices() {
    let (_guard, mut network) = network().await;
    let mut invoices = network.bob.subscribe_invoices(0, 0).await.unwrap();

    let added = network.bob.add_invoice("subscribed", 42, 3600).await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(10), invoices.next())
        .await
        .expect("no invoice received in time")
        .unwrap()
        .unwrap();
    assert_eq!(received.payment_request, added.payment_request);
    assert_eq!(received.add_index, added.add_index);
}

#[cfg_attr(not(feature = "regtest-tests"), ignore)]
#[tokio::test]
async fn new_address() {
    let (_guard, mut network) = network().await;
    let address = network.alice.new_address(lnd_regtest::lnrpc::AddressType::WitnessPubkeyHash).await.unwrap();
    assert!(address.starts_with("bcrt1"));
}
