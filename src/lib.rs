// include_str! is not supported in attributes yet
#![doc = r###"
LND RPC client and regtest scenario harness using async GRPC library `tonic`.

## About

This crate drives a small Lightning regtest network (a hub node plus two leaves, Alice and Bob)
through LND's GRPC interface: it connects peers, opens payment channels, issues an invoice
and pays it. The GRPC bindings are generated with [`tonic`](https://docs.rs/tonic/) and
[`prost`](https://docs.rs/prost/) from a vendored subset of LND's `lightning.proto`.
The environment variable `LND_REPO_DIR` overrides the vendored file during build.

Each node is represented by [`LndNode`] which names the node, remembers its identity public key
and forwards every call to the daemon, returning a typed [`NodeError`] on failure.
The [`regtest`] and [`scenario`] modules orchestrate several nodes together with a bitcoind
instance used to fund wallets and mine blocks.

## Usage

Here's an example of retrieving information from LND (`getinfo` call).
You can find the same example in `demos/` for your convenience.

```no_run
// This program accepts three arguments: address, cert file, macaroon file
// The address must start with `https://`!

#[tokio::main]
async fn main() {
    let mut args = std::env::args_os();
    args.next().expect("not even zeroth arg given");
    let address = args.next().expect("missing arguments: address, cert file, macaroon file");
    let cert_file = args.next().expect("missing arguments: cert file, macaroon file");
    let macaroon_file = args.next().expect("missing argument: macaroon file");
    let address = address.into_string().expect("address is not UTF-8");

    // Connecting to LND requires only address, cert file, and macaroon file
    let mut node = lnd_regtest::LndNode::connect("LND", address, cert_file, macaroon_file)
        .await
        .expect("failed to connect");

    let info = node.get_info().await.expect("failed to get info");

    println!("{:#?}", info);
}
```

## License

MITNFA
"###]

/// This is part of public interface so it's re-exported.
pub extern crate tonic;

use std::path::{Path, PathBuf};
use std::convert::TryInto;
pub use error::{ConnectError, DaemonErrorKind, NodeError};
use error::InternalConnectError;
use tonic::codegen::InterceptedService;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::transport::{Channel, ClientTlsConfig};

pub use node::{ChannelBalance, InvoiceStream, LndNode, WalletBalance};

/// Convenience type alias for lightning client.
pub type LightningClient = lnrpc::lightning_client::LightningClient<InterceptedService<Channel, MacaroonInterceptor>>;

mod error;
pub mod channels;
pub mod config;
pub mod node;
pub mod bitcoind;
pub mod docker;
pub mod regtest;
pub mod scenario;
#[cfg(test)]
mod testing;

macro_rules! try_map_err {
    ($result:expr, $mapfn:expr) => {
        match $result {
            Ok(value) => value,
            Err(error) => return Err($mapfn(error).into()),
        }
    }
}

/// Messages and other types generated by `tonic`/`prost`
///
/// This is the go-to module you will need to look in to find documentation on various message
/// types. However it may be better to start from methods on [`LndNode`].
pub mod lnrpc {
    tonic::include_proto!("lnrpc");
}

/// Supplies requests with macaroon
#[derive(Clone)]
pub struct MacaroonInterceptor {
    macaroon: MetadataValue<Ascii>,
}

impl tonic::service::Interceptor for MacaroonInterceptor {
    fn call(&mut self, mut request: tonic::Request<()>) -> Result<tonic::Request<()>, tonic::Status> {
        request
            .metadata_mut()
            .insert("macaroon", self.macaroon.clone());
        Ok(request)
    }
}

impl MacaroonInterceptor {
    /// Creates the interceptor from an already hex-encoded macaroon.
    fn from_hex(macaroon: &str, file: impl Into<PathBuf>) -> Result<Self, InternalConnectError> {
        let macaroon = try_map_err!(MetadataValue::<Ascii>::from_str(macaroon),
            |error| InternalConnectError::InvalidMacaroon { file: file.into(), error, });
        Ok(MacaroonInterceptor { macaroon, })
    }
}

async fn load_macaroon(path: impl AsRef<Path> + Into<PathBuf>) -> Result<String, InternalConnectError> {
    let macaroon = tokio::fs::read(&path)
        .await
        .map_err(|error| InternalConnectError::ReadFile { file: path.into(), error, })?;
    Ok(hex::encode(&macaroon))
}

/// Connects to LND using given address and credentials
///
/// This function does all required processing of the cert file and macaroon file, so that you
/// don't have to. The address must begin with "https://", though.
///
/// Both files are read on every call, so reconnecting picks up credentials LND regenerated.
#[tracing::instrument(name = "Connecting to LND")]
pub async fn connect<A, CP, MP>(address: A, cert_file: CP, macaroon_file: MP) -> Result<LightningClient, ConnectError> where A: TryInto<tonic::transport::Endpoint> + std::fmt::Debug + ToString, <A as TryInto<tonic::transport::Endpoint>>::Error: std::error::Error + Send + Sync + 'static, CP: AsRef<Path> + Into<PathBuf> + std::fmt::Debug, MP: AsRef<Path> + Into<PathBuf> + std::fmt::Debug {
    let tls_config = tls::config(cert_file).await?;
    let macaroon_path = macaroon_file.as_ref().to_path_buf();
    let macaroon = load_macaroon(macaroon_file).await?;
    let interceptor = MacaroonInterceptor::from_hex(&macaroon, macaroon_path)?;
    Ok(do_connect(address, tls_config, interceptor).await?)
}

async fn do_connect<A>(address: A, tls_config: ClientTlsConfig, interceptor: MacaroonInterceptor) -> Result<LightningClient, ConnectError> where A: TryInto<tonic::transport::Endpoint> + std::fmt::Debug + ToString, <A as TryInto<tonic::transport::Endpoint>>::Error: std::error::Error + Send + Sync + 'static {
    let address_str = address.to_string();
    let conn = try_map_err!(address
        .try_into(), |error| InternalConnectError::InvalidAddress { address: address_str.clone(), error: Box::new(error), })
        .tls_config(tls_config)
        .map_err(InternalConnectError::TlsConfig)?
        .connect()
        .await
        .map_err(|error| InternalConnectError::Connect { address: address_str.clone(), error, })?;

    tracing::info!("Connected to {}", address_str);

    Ok(lnrpc::lightning_client::LightningClient::with_interceptor(conn, interceptor))
}

mod tls {
    use std::path::{Path, PathBuf};
    use rustls::{RootCertStore, Certificate, TLSError, ServerCertVerified};
    use webpki::DNSNameRef;
    use crate::error::{ConnectError, InternalConnectError};

    pub(crate) async fn config(path: impl AsRef<Path> + Into<PathBuf>) -> Result<tonic::transport::ClientTlsConfig, ConnectError> {
        do_config(CertVerifier::load(path).await?)
    }

    fn do_config(cv: CertVerifier) -> Result<tonic::transport::ClientTlsConfig, ConnectError> {
        let mut tls_config = rustls::ClientConfig::new();
        tls_config.dangerous().set_certificate_verifier(std::sync::Arc::new(cv));
        tls_config.set_protocols(&["h2".into()]);
        Ok(tonic::transport::ClientTlsConfig::new()
            .rustls_client_config(tls_config))
    }

    /// Accepts exactly the certificate chain LND wrote into its `tls.cert`
    ///
    /// LND certificates are self-signed, so the chain is pinned instead of verified.
    pub(crate) struct CertVerifier {
        certs: Vec<Vec<u8>>
    }

    impl CertVerifier {
        pub(crate) async fn load(path: impl AsRef<Path> + Into<PathBuf>) -> Result<Self, InternalConnectError> {
            let contents = try_map_err!(tokio::fs::read(&path).await,
                |error| InternalConnectError::ReadFile { file: path.into(), error });
            CertVerifier::do_load(&contents[..], path.into())
        }

        fn do_load(cert_bytes: &[u8], file: PathBuf) -> Result<Self, InternalConnectError> {
            let mut reader = cert_bytes;
            let certs = match rustls_pemfile::certs(&mut reader) {
                Ok(certs) => certs,
                Err(error) => return Err(InternalConnectError::ParseCert { file, error }),
            };

            if certs.is_empty() {
                return Err(InternalConnectError::EmptyCert { file });
            }

            tracing::debug!("Certificates loaded (Count: {})", certs.len());

            Ok(CertVerifier {
                certs,
            })
        }

        fn verify(&self, presented_certs: &[Certificate]) -> Result<ServerCertVerified, TLSError> {
            if self.certs.len() != presented_certs.len() {
                return Err(TLSError::General(format!("Mismatched number of certificates (Expected: {}, Presented: {})", self.certs.len(), presented_certs.len())));
            }

            for (c, p) in self.certs.iter().zip(presented_certs.iter()) {
                if *p.0 != **c {
                    return Err(TLSError::General("Server certificates do not match ours".to_owned()));
                } else {
                    tracing::trace!("Confirmed certificate match");
                }
            }

            Ok(ServerCertVerified::assertion())
        }
    }

    impl rustls::ServerCertVerifier for CertVerifier {
        fn verify_server_cert(&self, _roots: &RootCertStore, presented_certs: &[Certificate], _dns_name: DNSNameRef<'_>, _ocsp_response: &[u8]) -> Result<ServerCertVerified, TLSError> {
            self.verify(presented_certs)
        }
    }

}
