/// Configuration error variants.
#[derive(Debug, thiserror::Error)]
pub enum BifrostConfigError {
    /// At least one chain must be configured.
    #[error("At least one chain must be configured under [chains]")]
    NoChains,

    /// A list of endpoints was empty.
    #[error("[{0}] At least one endpoint must be provided")]
    EmptyEndpoints(String),

    /// An endpoint used an unsupported scheme.
    #[error("[{0}] Invalid URL scheme: must be HTTP or HTTPS, got '{1}'")]
    InvalidEndpointScheme(String, String),

    /// An endpoint has no host.
    #[error("[{0}] Invalid URL: host is required")]
    EndpointHostRequired(String),

    /// An error returned for duration parameters that must be positive.
    #[error("Duration for {0} must be nonzero")]
    ZeroDurationForbidden(String),

    /// An error returned for parameters that must be positive.
    #[error("The value of {0} must be nonzero")]
    ZeroValueForbidden(String),

    /// EIP-155 signing needs a chain id.
    #[error("[chains.{0}] The chain id must be nonzero")]
    ZeroChainId(String),

    /// A whitelisted token has an invalid contract address.
    #[error("[chains.{0}] Invalid whitelisted token address '{1}'")]
    InvalidTokenAddress(String, String),
}
