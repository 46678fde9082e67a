//! Top-level error type for the bridge

use std::borrow::Cow;
use std::fmt;

use ledger::chain::Chain;
use ledger::keysign::Blame;

/// The kind of failure returned by a chain RPC node. Broadcast races are
/// expected when several validators push the same signed transaction, so
/// callers match on the kind rather than on the node's message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum RpcErrorKind {
    /// The node already has the transaction in its mempool.
    AlreadyKnown,
    /// The nonce of the transaction was already used.
    NonceTooLow,
    /// The requested object does not exist.
    NotFound,
    /// The request timed out.
    Timeout,
    /// Any other failure.
    Other,
}

impl RpcErrorKind {
    /// Classify an error message returned by a node.
    pub fn from_message(message: &str) -> Self {
        let message = message.to_lowercase();
        if message.contains("already known") || message.contains("known transaction") {
            RpcErrorKind::AlreadyKnown
        } else if message.contains("nonce too low") {
            RpcErrorKind::NonceTooLow
        } else if message.contains("not found") {
            RpcErrorKind::NotFound
        } else if message.contains("timeout") || message.contains("timed out") {
            RpcErrorKind::Timeout
        } else {
            RpcErrorKind::Other
        }
    }

    /// Whether a broadcast that failed with this kind means that the
    /// transaction, or one with the same nonce, is already on its way.
    pub fn is_benign_broadcast(&self) -> bool {
        matches!(self, RpcErrorKind::AlreadyKnown | RpcErrorKind::NonceTooLow)
    }
}

/// An error returned by a chain RPC node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcError {
    /// The kind of the failure.
    pub kind: RpcErrorKind,
    /// The message returned by the node.
    pub message: String,
}

impl RpcError {
    /// Create an error, classifying it by its message.
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: RpcErrorKind::from_message(&message),
            message,
        }
    }

    /// Create an error of the given kind.
    pub fn with_kind(kind: RpcErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for RpcError {}

/// A failed keysign round.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("keysign failed: {blame}")]
pub struct KeysignError {
    /// Who is to blame for the failure.
    pub blame: Blame,
}

/// Top-level bridge error
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An error from the ledger types.
    #[error("{0}")]
    Ledger(#[from] ledger::Error),

    /// A chain RPC node returned an error.
    #[error("chain rpc error on {0}: {1}")]
    ChainRpc(Chain, #[source] RpcError),

    /// The chain RPC request could not be sent.
    #[error("could not send request to the chain rpc node: {0}")]
    ChainRpcRequest(#[source] reqwest::Error),

    /// The chain RPC node returned something we could not decode.
    #[error("unexpected response from the chain rpc node: {0}")]
    UnexpectedChainRpcResponse(Cow<'static, str>),

    /// The request to the ledger could not be sent.
    #[error("could not send request to the ledger: {0}")]
    LedgerRequest(#[source] reqwest::Error),

    /// The ledger returned an error status or a body we could not decode.
    #[error("unexpected response from the ledger: {0}")]
    LedgerResponse(#[source] reqwest::Error),

    /// The request to the TSS daemon could not be sent.
    #[error("could not send request to the tss daemon: {0}")]
    TssRequest(#[source] reqwest::Error),

    /// The TSS daemon returned an error status or a body we could not
    /// decode.
    #[error("unexpected response from the tss daemon: {0}")]
    TssResponse(#[source] reqwest::Error),

    /// The keysign round failed.
    #[error("{0}")]
    Keysign(#[from] KeysignError),

    /// The keysign round did not finish in time.
    #[error("keysign did not finish within {0:?}")]
    KeysignTimeout(std::time::Duration),

    /// The signature returned by the TSS daemon is not valid for the
    /// vault key.
    #[error("invalid signature: {0}")]
    InvalidSignature(#[source] secp256k1::Error),

    /// The signature could not be matched to the vault key.
    #[error("the signature does not recover to vault {0}")]
    SignatureRecovery(ledger::keys::PublicKey),

    /// Could not join a path onto a base URL.
    #[error("could not join path {2} to {1}: {0}")]
    PathJoin(#[source] url::ParseError, url::Url, Cow<'static, str>),

    /// An error from the sled database.
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    /// Could not encode or decode a stored value.
    #[error("could not encode or decode value: {0}")]
    Codec(#[from] serde_json::Error),

    /// An ABI payload could not be decoded.
    #[error("could not decode abi payload: {0}")]
    AbiDecode(#[from] alloy::sol_types::Error),

    /// The address is not a valid address on the chain.
    #[error("invalid address {0:?}")]
    InvalidAddress(String),

    /// The outbound item failed validation.
    #[error("invalid outbound item: {0}")]
    InvalidTxOutItem(&'static str),

    /// An inbound memo was used on an outbound.
    #[error("inbound memo {0:?} cannot be used on an outbound")]
    InboundMemoOnOutbound(String),

    /// The outbound was built for a different chain.
    #[error("outbound for {0} sent to the {1} client")]
    ChainMismatch(Chain, Chain),

    /// No chain is configured.
    #[error("no chains are configured")]
    NoChainsConfigured,

    /// A list of endpoints was empty.
    #[error("no endpoints configured for {0}")]
    EmptyEndpoints(&'static str),

    /// Could not build an HTTP client.
    #[error("could not build http client: {0}")]
    HttpClient(#[source] reqwest::Error),

    /// A channel was closed while the bridge was still running.
    #[error("the {0} channel was closed")]
    ChannelClosed(&'static str),

    /// The ledger refused a request. Sending it again gets the same answer.
    #[error("the ledger refused the request: {0}")]
    LedgerRefused(Cow<'static, str>),

    /// The ledger could not handle a request right now.
    #[error("the ledger is unavailable: {0}")]
    LedgerUnavailable(Cow<'static, str>),

    /// The bridge is shutting down.
    #[error("the bridge is shutting down")]
    BridgeShutdown,

    /// An error from the configuration.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// An IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A background task panicked or was cancelled.
    #[error("task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl Error {
    /// Whether a ledger request that failed with this error may succeed
    /// when it is sent again. Rejections by the ledger are final.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::LedgerRequest(_) | Error::LedgerResponse(_) | Error::LedgerUnavailable(_)
        )
    }
}
