// This program connects to LND and prints out all incoming invoices as they settle.
// The program accepts three arguments: address, cert file, macaroon file, and optionally the
// add index to start from.
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
    let add_index: u64 = args
        .next()
        .map(|index| index.into_string().expect("add index is not UTF-8").parse().expect("add index is not u64"))
        .unwrap_or(0);

    let mut node = lnd_regtest::LndNode::connect("LND", address, cert_file, macaroon_file)
        .await
        .expect("failed to connect");

    let mut invoices = node
        .subscribe_invoices(add_index, 0)
        .await
        .expect("Failed to call subscribe_invoices");

    while let Some(invoice) = invoices
        .next_settled()
        .await
        .expect("Failed to receive invoices")
    {
        println!("{:?}", invoice);
    }
}
