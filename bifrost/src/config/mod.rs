//! Configuration management for the bridge
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use config::Config;
use config::ConfigError;
use config::Environment;
use config::File;
use ledger::chain::Chain;
use ledger::keys::PublicKey;
use serde::Deserialize;
use url::Url;

use crate::config::error::BifrostConfigError;
use crate::config::serialization::duration_milliseconds_deserializer;
use crate::config::serialization::duration_seconds_deserializer;
use crate::config::serialization::url_deserializer_single;
use crate::config::serialization::url_deserializer_vec;

mod error;
mod serialization;

/// Trait for validating configuration values.
trait Validatable {
    /// Validate the configuration values.
    fn validate(&self, cfg: &Settings) -> Result<(), ConfigError>;
}

/// Top-level configuration for the bridge
#[derive(Deserialize, Clone, Debug)]
pub struct Settings {
    /// Settings for the bridge process itself
    pub bifrost: BifrostConfig,
    /// Settings for talking to the ledger
    pub ledger: LedgerConfig,
    /// Settings for talking to the local TSS daemon
    pub tss: TssConfig,
    /// Per chain settings. A chain client is started for every entry.
    pub chains: BTreeMap<Chain, ChainConfig>,
}

/// Settings for the bridge process.
#[derive(Deserialize, Clone, Debug)]
pub struct BifrostConfig {
    /// The public key of the validator this bridge reports for.
    pub validator_public_key: PublicKey,
    /// The path of the sled database.
    pub db_path: PathBuf,
    /// The address the Prometheus exporter listens on, if any.
    pub prometheus_exporter_endpoint: Option<SocketAddr>,
    /// How often the observer retries failed submissions and checks
    /// observations that are waiting for confirmations.
    #[serde(deserialize_with = "duration_seconds_deserializer")]
    pub observer_interval: Duration,
    /// The most submissions the observer keeps for a retry. The oldest one
    /// is dropped when the queue is full.
    pub max_pending_submissions: usize,
    /// How often the outbound signer polls the ledger for work.
    #[serde(deserialize_with = "duration_seconds_deserializer")]
    pub outbound_poll_interval: Duration,
}

impl Validatable for BifrostConfig {
    fn validate(&self, _: &Settings) -> Result<(), ConfigError> {
        if self.observer_interval.is_zero() {
            let err = BifrostConfigError::ZeroDurationForbidden("bifrost.observer_interval".into());
            return Err(ConfigError::Message(err.to_string()));
        }
        if self.outbound_poll_interval.is_zero() {
            let err = BifrostConfigError::ZeroDurationForbidden(
                "bifrost.outbound_poll_interval".into(),
            );
            return Err(ConfigError::Message(err.to_string()));
        }
        if self.max_pending_submissions == 0 {
            let err = BifrostConfigError::ZeroValueForbidden(
                "bifrost.max_pending_submissions".into(),
            );
            return Err(ConfigError::Message(err.to_string()));
        }
        Ok(())
    }
}

/// Settings for the ledger client.
#[derive(Deserialize, Clone, Debug)]
pub struct LedgerConfig {
    /// The ledger API endpoints. The client falls back to the next one
    /// when a request fails.
    #[serde(deserialize_with = "url_deserializer_vec")]
    pub endpoints: Vec<Url>,
    /// The timeout of a single request.
    #[serde(deserialize_with = "duration_seconds_deserializer")]
    pub timeout: Duration,
}

impl Validatable for LedgerConfig {
    fn validate(&self, _: &Settings) -> Result<(), ConfigError> {
        validate_endpoints("ledger.endpoints", &self.endpoints)?;
        if self.timeout.is_zero() {
            let err = BifrostConfigError::ZeroDurationForbidden("ledger.timeout".into());
            return Err(ConfigError::Message(err.to_string()));
        }
        Ok(())
    }
}

/// Settings for the TSS client.
#[derive(Deserialize, Clone, Debug)]
pub struct TssConfig {
    /// The endpoint of the local TSS daemon.
    #[serde(deserialize_with = "url_deserializer_single")]
    pub endpoint: Url,
    /// How long to wait for a keysign round before giving up.
    #[serde(deserialize_with = "duration_seconds_deserializer")]
    pub keysign_timeout: Duration,
}

impl Validatable for TssConfig {
    fn validate(&self, _: &Settings) -> Result<(), ConfigError> {
        validate_endpoints("tss.endpoint", std::slice::from_ref(&self.endpoint))?;
        if self.keysign_timeout.is_zero() {
            let err = BifrostConfigError::ZeroDurationForbidden("tss.keysign_timeout".into());
            return Err(ConfigError::Message(err.to_string()));
        }
        Ok(())
    }
}

/// A token the scanner reports deposits of.
#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct WhitelistToken {
    /// The contract address of the token.
    pub address: String,
    /// The ticker used in the asset name.
    pub ticker: String,
    /// The decimals of the token.
    pub decimals: u8,
}

/// Settings for one external chain.
#[derive(Deserialize, Clone, Debug)]
pub struct ChainConfig {
    /// JSON-RPC endpoints of the chain's nodes.
    #[serde(deserialize_with = "url_deserializer_vec")]
    pub rpc_endpoints: Vec<Url>,
    /// The timeout of a single RPC request.
    #[serde(
        default = "default_rpc_timeout",
        deserialize_with = "duration_seconds_deserializer"
    )]
    pub rpc_timeout: Duration,
    /// The EIP-155 chain id.
    pub chain_id: u64,
    /// Where to start scanning when nothing has been scanned yet. The chain
    /// tip is used when unset.
    #[serde(default)]
    pub start_block_height: Option<u64>,
    /// How many blocks the scanner stays behind the tip.
    #[serde(default)]
    pub block_lag: u64,
    /// The confirmations an inbound needs before it is reported as final.
    #[serde(default)]
    pub confirmations_required: u64,
    /// Maximum number of transactions decoded in parallel within a block.
    #[serde(default = "default_concurrency")]
    pub concurrency: NonZeroUsize,
    /// How long the scanner waits when it has caught up with the tip.
    #[serde(
        default = "default_block_poll_interval",
        deserialize_with = "duration_milliseconds_deserializer"
    )]
    pub block_poll_interval: Duration,
    /// The number of non-empty blocks in the gas price window.
    #[serde(default = "default_gas_cache_blocks")]
    pub gas_cache_blocks: usize,
    /// Gas price estimates are rounded up to a multiple of this, in wei.
    #[serde(default = "default_gas_price_resolution")]
    pub gas_price_resolution: u64,
    /// The gas price used until the window is full, in wei.
    #[serde(default)]
    pub default_gas_price: u64,
    /// The number of block metas kept below the scanned height.
    #[serde(default = "default_block_meta_retention")]
    pub block_meta_retention: u64,
    /// How far back the scanner walks looking for a common ancestor.
    #[serde(default = "default_max_reorg_depth")]
    pub max_reorg_depth: u64,
    /// The scanner is unhealthy if it has not scanned a block for this long.
    #[serde(
        default = "default_healthy_period",
        deserialize_with = "duration_seconds_deserializer"
    )]
    pub healthy_period: Duration,
    /// The scanner is unhealthy if it is more than this many blocks behind
    /// the tip.
    #[serde(default = "default_max_healthy_lag_blocks")]
    pub max_healthy_lag_blocks: u64,
    /// Scheduled solvency reports fire every this many scanned blocks.
    #[serde(default = "default_solvency_blocks")]
    pub solvency_blocks: u64,
    /// How often the solvency runner checks vaults.
    #[serde(
        default = "default_runner_interval",
        deserialize_with = "duration_seconds_deserializer"
    )]
    pub solvency_interval: Duration,
    /// Multiplier of the worst case contract call cost tolerated as a
    /// solvency gap.
    #[serde(default = "default_solvency_gas_multiplier")]
    pub solvency_gas_multiplier: u64,
    /// The gas units of the most expensive router call.
    #[serde(default = "default_max_contract_gas")]
    pub max_contract_gas: u64,
    /// How often the unstuck runner checks tracked transactions.
    #[serde(
        default = "default_runner_interval",
        deserialize_with = "duration_seconds_deserializer"
    )]
    pub unstuck_interval: Duration,
    /// Ledger blocks a broadcast transaction may stay pending before it is
    /// replaced.
    #[serde(default = "default_unstuck_wait_blocks")]
    pub unstuck_wait_blocks: u64,
    /// Tokens the scanner reports deposits of.
    #[serde(default)]
    pub whitelist_tokens: Vec<WhitelistToken>,
}

fn default_rpc_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_concurrency() -> NonZeroUsize {
    NonZeroUsize::new(8).unwrap_or(NonZeroUsize::MIN)
}

fn default_block_poll_interval() -> Duration {
    Duration::from_millis(1000)
}

fn default_gas_cache_blocks() -> usize {
    40
}

fn default_gas_price_resolution() -> u64 {
    1_000_000_000
}

fn default_block_meta_retention() -> u64 {
    1000
}

fn default_max_reorg_depth() -> u64 {
    64
}

fn default_healthy_period() -> Duration {
    Duration::from_secs(120)
}

fn default_max_healthy_lag_blocks() -> u64 {
    100
}

fn default_solvency_blocks() -> u64 {
    100
}

fn default_runner_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_solvency_gas_multiplier() -> u64 {
    3
}

fn default_max_contract_gas() -> u64 {
    80_000
}

fn default_unstuck_wait_blocks() -> u64 {
    300
}

impl ChainConfig {
    fn validate_for(&self, chain: Chain) -> Result<(), ConfigError> {
        let section = format!("chains.{}", chain.as_str().to_lowercase());
        validate_endpoints(&format!("{section}.rpc_endpoints"), &self.rpc_endpoints)?;

        if self.chain_id == 0 {
            let err = BifrostConfigError::ZeroChainId(chain.to_string());
            return Err(ConfigError::Message(err.to_string()));
        }

        let durations = [
            ("rpc_timeout", self.rpc_timeout),
            ("block_poll_interval", self.block_poll_interval),
            ("healthy_period", self.healthy_period),
            ("solvency_interval", self.solvency_interval),
            ("unstuck_interval", self.unstuck_interval),
        ];
        for (name, duration) in durations {
            if duration.is_zero() {
                let err = BifrostConfigError::ZeroDurationForbidden(format!("{section}.{name}"));
                return Err(ConfigError::Message(err.to_string()));
            }
        }

        let values = [
            ("gas_cache_blocks", self.gas_cache_blocks as u64),
            ("gas_price_resolution", self.gas_price_resolution),
            ("solvency_blocks", self.solvency_blocks),
            ("max_contract_gas", self.max_contract_gas),
        ];
        for (name, value) in values {
            if value == 0 {
                let err = BifrostConfigError::ZeroValueForbidden(format!("{section}.{name}"));
                return Err(ConfigError::Message(err.to_string()));
            }
        }

        for token in &self.whitelist_tokens {
            let address = token.address.trim_start_matches("0x");
            if address.len() != 40 || hex::decode(address).is_err() {
                let err =
                    BifrostConfigError::InvalidTokenAddress(chain.to_string(), token.address.clone());
                return Err(ConfigError::Message(err.to_string()));
            }
        }

        Ok(())
    }
}

fn validate_endpoints(section: &str, endpoints: &[Url]) -> Result<(), ConfigError> {
    if endpoints.is_empty() {
        let err = BifrostConfigError::EmptyEndpoints(section.to_string());
        return Err(ConfigError::Message(err.to_string()));
    }

    for endpoint in endpoints {
        if !["http", "https"].contains(&endpoint.scheme()) {
            let err = BifrostConfigError::InvalidEndpointScheme(
                section.to_string(),
                endpoint.scheme().to_string(),
            );
            return Err(ConfigError::Message(err.to_string()));
        }
        if endpoint.host().is_none() {
            let err = BifrostConfigError::EndpointHostRequired(section.to_string());
            return Err(ConfigError::Message(err.to_string()));
        }
    }

    Ok(())
}

impl Settings {
    /// Initializing the global config first with default values and then with
    /// provided/overwritten environment variables. The explicit separator with
    /// double underscores is needed to correctly parse the nested config structure.
    ///
    /// The environment variables are prefixed with `BIFROST_` and the nested
    /// fields are separated with double underscores. For example, the path
    /// `chains.eth.rpc_endpoints` is parsed as following:
    ///
    /// ```text
    /// BIFROST_CHAINS__ETH__RPC_ENDPOINTS
    /// ^^^^^^^ ^^^^^^  ^^^  ^^^^^^^^^^^^^
    ///    │   ^  │   ^^ │ ^^     │
    ///    │   │  │   │  │ │      └ The `rpc_endpoints` field of the `eth` chain
    ///    │   │  │   │  │ └ separator("__")
    ///    │   │  │   │  └ The `eth` key of the `chains` map
    ///    │   │  │   └ separator("__")
    ///    │   │  └ The `chains` field of the root object (`Settings`)
    ///    │   └ prefix_separator("_")
    ///    └ with_prefix("BIFROST")
    /// ```
    ///
    /// Lists given through the environment are comma separated.
    pub fn new(config_path: Option<impl AsRef<Path>>) -> Result<Self, ConfigError> {
        let env = Environment::with_prefix("BIFROST")
            .separator("__")
            .try_parsing(true)
            .prefix_separator("_");

        let mut cfg_builder = Config::builder();

        cfg_builder = cfg_builder.set_default("bifrost.db_path", "./bifrost-db")?;
        cfg_builder = cfg_builder.set_default("bifrost.observer_interval", 1)?;
        cfg_builder = cfg_builder.set_default("bifrost.max_pending_submissions", 1000)?;
        cfg_builder = cfg_builder.set_default("bifrost.outbound_poll_interval", 6)?;
        cfg_builder = cfg_builder.set_default("ledger.timeout", 10)?;
        cfg_builder = cfg_builder.set_default("tss.keysign_timeout", 120)?;

        if let Some(path) = config_path {
            cfg_builder = cfg_builder.add_source(File::from(path.as_ref()));
        }
        cfg_builder = cfg_builder.add_source(env);

        let cfg = cfg_builder.build()?;

        let settings: Settings = cfg.try_deserialize()?;

        settings.validate()?;

        Ok(settings)
    }

    /// Perform validation on the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.chains.is_empty() {
            return Err(ConfigError::Message(BifrostConfigError::NoChains.to_string()));
        }

        self.bifrost.validate(self)?;
        self.ledger.validate(self)?;
        self.tss.validate(self)?;
        for (chain, chain_config) in &self.chains {
            chain_config.validate_for(*chain)?;
        }

        Ok(())
    }

    /// The settings of one chain.
    pub fn chain(&self, chain: Chain) -> Option<&ChainConfig> {
        self.chains.get(&chain)
    }
}
