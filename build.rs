use std::path::PathBuf;

fn main() -> std::io::Result<()> {
    println!("cargo:rerun-if-env-changed=LND_REPO_DIR");
    let dir = match std::env::var_os("LND_REPO_DIR") {
        Some(lnd_repo_path) => {
            let mut lnd_rpc_dir = PathBuf::from(lnd_repo_path);
            lnd_rpc_dir.push("lnrpc");
            lnd_rpc_dir
        },
        None => PathBuf::from("vendor"),
    };

    let lightning_proto = dir.join("lightning.proto");
    println!("cargo:rerun-if-changed={}", lightning_proto.display());

    // The server half only backs the in-process daemon of unit tests.
    tonic_build::configure()
        .build_client(true)
        .build_server(true)
        .compile(&[lightning_proto], &[dir])?;
    Ok(())
}
