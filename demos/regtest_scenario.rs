// This demo runs the whole toy scenario against a Docker regtest network: Alice and Bob connect
// to the hub, open channels to it, Bob issues an invoice and Alice pays it.
//
// The program accepts one optional argument: the path of the TOML configuration. Without it
// `LND_REGTEST_CONFIG` is consulted and then the built-in defaults.

use lnd_regtest::config::Config;
use lnd_regtest::regtest::Network;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter("info,lnd_regtest=debug")
        .init();

    let mut args = std::env::args_os();
    args.next().expect("not even zeroth arg given");
    let config = match args.next() {
        Some(path) => Config::from_file(path),
        None => Config::from_env(),
    }
    .expect("failed to load configuration");

    let mut network = Network::connect(config).await.expect("failed to connect to the network");
    network.wait_until_synced().await.expect("nodes did not sync");

    match lnd_regtest::scenario::run(&mut network).await {
        Ok(report) => println!("{:#?}", report),
        Err(error) => {
            tracing::error!("scenario failed: {}", error);
            let mut source = std::error::Error::source(&error);
            while let Some(cause) = source {
                tracing::error!("caused by: {}", cause);
                source = cause.source();
            }
            std::process::exit(1);
        },
    }
}
