use std::fmt;
use std::path::PathBuf;

use tonic::Code;

/// Error that could happen during connecting to LND
///
/// This error may be returned by the `connect()` function if connecting failed.
/// It is currently opaque because it's unclear how the variants will look long-term.
/// Thus you probably only want to display it.
#[derive(Debug)]
pub struct ConnectError {
    internal: InternalConnectError,
}

impl From<InternalConnectError> for ConnectError {
    fn from(value: InternalConnectError) -> Self {
        ConnectError {
            internal: value,
        }
    }
}

#[derive(Debug)]
pub(crate) enum InternalConnectError {
    ReadFile { file: PathBuf, error: std::io::Error, },
    ParseCert { file: PathBuf, error: std::io::Error, },
    EmptyCert { file: PathBuf, },
    InvalidMacaroon { file: PathBuf, error: tonic::metadata::errors::InvalidMetadataValue, },
    InvalidAddress { address: String, error: Box<dyn std::error::Error + Send + Sync + 'static>, },
    TlsConfig(tonic::transport::Error),
    Connect { address: String, error: tonic::transport::Error, },
    Handshake { node: String, error: Box<NodeError>, },
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use InternalConnectError::*;

        match &self.internal {
            ReadFile { file, .. } => write!(f, "failed to read file {}", file.display()),
            ParseCert { file, .. } => write!(f, "failed to parse certificate {}", file.display()),
            EmptyCert { file } => write!(f, "no certificate found in {}", file.display()),
            InvalidMacaroon { file, .. } => write!(f, "macaroon {} can not be sent as metadata", file.display()),
            InvalidAddress { address, .. } => write!(f, "invalid address {}", address),
            TlsConfig(_) => write!(f, "failed to configure TLS"),
            Connect { address, .. } => write!(f, "failed to connect to {}", address),
            Handshake { node, .. } => write!(f, "connected to {} but failed to fetch its identity", node),
        }
    }
}

impl std::error::Error for ConnectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        use InternalConnectError::*;

        match &self.internal {
            ReadFile { error, .. } => Some(error),
            ParseCert { error, .. } => Some(error),
            EmptyCert { .. } => None,
            InvalidMacaroon { error, .. } => Some(error),
            InvalidAddress { error, .. } => Some(&**error),
            TlsConfig(error) => Some(error),
            Connect { error, .. } => Some(error),
            Handshake { error, .. } => Some(&**error),
        }
    }
}

/// Semantic errors reported by the daemon itself
///
/// LND reports these with a generic status code, so they are recognized by their message.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DaemonErrorKind {
    /// `ConnectPeer` to a peer we already have a connection with.
    AlreadyConnected,
    /// `DisconnectPeer` refused because channels with the peer are still open.
    ChannelsStillActive,
    /// The peer is not connected.
    PeerNotConnected,
    /// The node was asked to connect to itself.
    SelfConnection,
    /// The on-chain wallet can't fund the request.
    InsufficientFunds,
    Other,
}

impl DaemonErrorKind {
    fn classify(message: &str) -> Self {
        let message = message.to_ascii_lowercase();

        if message.contains("already connected to peer") {
            DaemonErrorKind::AlreadyConnected
        } else if message.contains("all active channels with the peer need to be closed first") {
            DaemonErrorKind::ChannelsStillActive
        } else if message.contains("is not connected") || message.contains("not connected to peer") {
            DaemonErrorKind::PeerNotConnected
        } else if message.contains("connection to self") {
            DaemonErrorKind::SelfConnection
        } else if message.contains("insufficient funds") || message.contains("not enough witness outputs") {
            DaemonErrorKind::InsufficientFunds
        } else {
            DaemonErrorKind::Other
        }
    }
}

impl fmt::Display for DaemonErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            DaemonErrorKind::AlreadyConnected => "already connected",
            DaemonErrorKind::ChannelsStillActive => "channels still active",
            DaemonErrorKind::PeerNotConnected => "peer not connected",
            DaemonErrorKind::SelfConnection => "connection to self",
            DaemonErrorKind::InsufficientFunds => "insufficient funds",
            DaemonErrorKind::Other => "daemon error",
        };
        f.write_str(s)
    }
}

/// Error returned by calls on [`LndNode`](crate::LndNode)
///
/// Unlike [`ConnectError`] this one is meant to be matched on: callers usually want to retry
/// `Transport` errors, fix credentials on `Authentication` and react to particular
/// [`DaemonErrorKind`]s.
#[derive(Debug)]
pub enum NodeError {
    /// The call didn't reach the daemon or the connection broke mid-call.
    Transport { method: &'static str, status: tonic::Status, },
    /// The daemon rejected the macaroon.
    Authentication { method: &'static str, status: tonic::Status, },
    /// The daemon processed the call and refused it.
    Daemon { method: &'static str, kind: DaemonErrorKind, status: tonic::Status, },
    /// `SendPaymentSync` went through but the payment itself failed.
    Payment { payment_hash: String, reason: String, },
    /// A channel with the peer is already open or pending.
    ChannelAlreadyExists { pubkey: String, },
    InvalidPubkey { pubkey: String, error: hex::FromHexError, },
    InvalidChannelPoint { channel_point: String, },
    /// A server stream ended before delivering the expected message.
    UnexpectedEnd { method: &'static str, },
}

impl NodeError {
    /// Classifies a status returned by the given RPC.
    pub fn from_status(method: &'static str, status: tonic::Status) -> Self {
        match status.code() {
            Code::Unavailable | Code::DeadlineExceeded | Code::Cancelled | Code::Aborted | Code::ResourceExhausted => {
                NodeError::Transport { method, status, }
            },
            Code::Unauthenticated | Code::PermissionDenied => NodeError::Authentication { method, status, },
            _ if is_macaroon_failure(status.message()) => NodeError::Authentication { method, status, },
            Code::Unknown if status.message().starts_with("transport error") => NodeError::Transport { method, status, },
            _ => {
                let kind = DaemonErrorKind::classify(status.message());
                NodeError::Daemon { method, kind, status, }
            },
        }
    }

    /// Returns the kind of daemon-reported error, if this is one.
    pub fn daemon_kind(&self) -> Option<DaemonErrorKind> {
        match self {
            NodeError::Daemon { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Returns `true` if retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, NodeError::Transport { .. })
    }

    /// Returns the raw status for errors that came from the RPC layer.
    pub fn status(&self) -> Option<&tonic::Status> {
        match self {
            NodeError::Transport { status, .. } => Some(status),
            NodeError::Authentication { status, .. } => Some(status),
            NodeError::Daemon { status, .. } => Some(status),
            _ => None,
        }
    }
}

/// Messages LND's macaroon service answers with when a credential is rejected.
const MACAROON_FAILURES: &[&str] = &[
    "verification failed: signature mismatch after caveat verification",
    "expected 1 macaroon, got",
    "cannot get macaroon",
];

fn is_macaroon_failure(message: &str) -> bool {
    MACAROON_FAILURES.iter().any(|failure| message.starts_with(failure))
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            NodeError::Transport { method, status } => write!(f, "{} failed to reach the daemon: {}", method, status.message()),
            NodeError::Authentication { method, status } => write!(f, "{} was not authorized: {}", method, status.message()),
            NodeError::Daemon { method, kind, status } => write!(f, "{} rejected ({}): {}", method, kind, status.message()),
            NodeError::Payment { payment_hash, reason } => write!(f, "payment {} failed: {}", payment_hash, reason),
            NodeError::ChannelAlreadyExists { pubkey } => write!(f, "channel with {} already opened", pubkey),
            NodeError::InvalidPubkey { pubkey, .. } => write!(f, "invalid node public key {}", pubkey),
            NodeError::InvalidChannelPoint { channel_point } => write!(f, "invalid channel point {}", channel_point),
            NodeError::UnexpectedEnd { method } => write!(f, "{} stream ended unexpectedly", method),
        }
    }
}

impl std::error::Error for NodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            NodeError::Transport { status, .. } => Some(status),
            NodeError::Authentication { status, .. } => Some(status),
            NodeError::Daemon { status, .. } => Some(status),
            NodeError::InvalidPubkey { error, .. } => Some(error),
            _ => None,
        }
    }
}
