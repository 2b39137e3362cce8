// This demo only fetches and prints the node info to the standard output similarly to
// `lncli getinfo`, followed by the wallet and channel balances.
//
// This program accepts three arguments: address, cert file, macaroon file
// The address must start with `https://`!

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter("info,lnd_regtest=debug")
        .init();

    let mut args = std::env::args_os();
    args.next().expect("not even zeroth arg given");
    let address = args
        .next()
        .expect("missing arguments: address, cert file, macaroon file")
        .into_string()
        .expect("address is not UTF-8");
    let cert_file = args
        .next()
        .expect("missing arguments: cert file, macaroon file");
    let macaroon_file = args.next().expect("missing argument: macaroon file");

    // Connecting to LND requires only address, cert file, and macaroon file
    let mut node = lnd_regtest::LndNode::connect("LND", address, cert_file, macaroon_file)
        .await
        .expect("failed to connect");

    let info = node.get_info().await.expect("failed to get info");
    println!("{:#?}", info);

    println!("{:?}", node.wallet_balance().await.expect("failed to get wallet balance"));
    println!("{:?}", node.channel_balance().await.expect("failed to get channel balance"));
}
