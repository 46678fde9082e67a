use std::sync::Arc;
use std::sync::Mutex;

use alloy::primitives::Address;
use alloy::primitives::U256;
use bifrost::block_scanner::BlockScanner;
use bifrost::block_scanner::ScannerHealth;
use bifrost::chain_client::ChainClient;
use bifrost::config::ChainConfig;
use bifrost::context::Context as _;
use bifrost::gas::GasPriceOracle;
use bifrost::profile::ChainProfile as _;
use bifrost::profile::EvmProfile;
use bifrost::solvency::SolvencyReporter;
use bifrost::testing::chain::TestChain;
use bifrost::testing::context::TestContext;
use bifrost::unstuck::UnstuckRunner;
use ledger::chain::Chain;
use ledger::keys::PublicKey;
use ledger::testing::public_key;
use ledger::tx::TxIn;
use ledger::vault::ChainContract;
use ledger::vault::ErrataBlock;
use ledger::vault::Solvency;
use ledger::vault::Vault;
use ledger::vault::VaultStatus;
use tokio::sync::mpsc;
use tokio::sync::watch;

/// The router every test vault uses.
pub const ROUTER: Address = Address::repeat_byte(0x42);

/// One ETH in wei.
pub const ONE_ETH: u128 = 1_000_000_000_000_000_000;

pub type TestClient = ChainClient<TestContext, TestChain, EvmProfile>;

/// An active vault using [`ROUTER`].
pub fn vault(pub_key: PublicKey) -> Vault {
    Vault {
        pub_key,
        coins: Vec::new(),
        status: VaultStatus::Active,
        routers: vec![ChainContract {
            chain: Chain::Eth,
            router: format!("{ROUTER:#x}"),
        }],
    }
}

pub fn wei(amount: u128) -> U256 {
    U256::from(amount)
}

/// The queues a scanner reports into, with their receiving ends.
pub struct Queues {
    pub inbound_tx: mpsc::Sender<TxIn>,
    pub inbound: mpsc::Receiver<TxIn>,
    pub errata_tx: mpsc::Sender<(Chain, ErrataBlock)>,
    pub errata: mpsc::Receiver<(Chain, ErrataBlock)>,
    pub solvency_tx: mpsc::Sender<Solvency>,
    pub solvency: mpsc::Receiver<Solvency>,
}

impl Queues {
    pub fn new() -> Self {
        let (inbound_tx, inbound) = mpsc::channel(100);
        let (errata_tx, errata) = mpsc::channel(100);
        let (solvency_tx, solvency) = mpsc::channel(100);
        Self {
            inbound_tx,
            inbound,
            errata_tx,
            errata,
            solvency_tx,
            solvency,
        }
    }
}

/// A bridge for Ethereum running against an in-memory chain, ledger and
/// TSS. The ledger knows a single vault, `public_key(100)`, which is also
/// the key the TSS stand-in signs with.
pub struct TestBridge {
    pub context: TestContext,
    pub chain: TestChain,
    pub profile: Arc<EvmProfile>,
    pub config: ChainConfig,
    pub client: Arc<TestClient>,
    pub oracle: Arc<Mutex<GasPriceOracle>>,
    pub health: Arc<ScannerHealth>,
    pub heights: Arc<watch::Sender<u64>>,
}

impl TestBridge {
    pub async fn new() -> Self {
        Self::with_context(TestContext::builder().build()).await
    }

    pub async fn with_context(context: TestContext) -> Self {
        let chain_id = context.config().chains[&Chain::Eth].chain_id;
        Self::on_chain(context, TestChain::new(Chain::Eth, chain_id)).await
    }

    /// Another validator, submitting to the same ledger as `signer` and
    /// watching the same chain, with its own store.
    pub async fn join(&self, signer: PublicKey) -> Self {
        let context = TestContext::builder()
            .with_settings(self.context.config().clone())
            .with_ledger(self.context.ledger.with_signer(signer))
            .with_tss(self.context.tss.clone())
            .build();
        Self::on_chain(context, self.chain.clone()).await
    }

    async fn on_chain(context: TestContext, chain: TestChain) -> Self {
        let config = context.config().chains[&Chain::Eth].clone();
        let profile = EvmProfile::new(Chain::Eth, config.chain_id);
        context.ledger.set_vaults(vec![vault(public_key(100))]).await;
        context.ledger.set_height(10).await;

        let client = ChainClient::new(context.clone(), chain.clone(), profile, config.clone());
        let oracle = GasPriceOracle::new(
            config.gas_cache_blocks,
            config.gas_price_resolution as u128,
            config.default_gas_price as u128,
        );
        let (heights, _) = watch::channel(0);

        Self {
            context,
            chain,
            profile: Arc::new(profile),
            config,
            client: Arc::new(client),
            oracle: Arc::new(Mutex::new(oracle)),
            health: Arc::new(ScannerHealth::new()),
            heights: Arc::new(heights),
        }
    }

    /// The address of the test vault.
    pub fn vault_address(&self) -> Address {
        self.profile.address_of(&public_key(100))
    }

    pub fn solvency_reporter(&self) -> SolvencyReporter<TestContext, TestChain, EvmProfile> {
        SolvencyReporter::new(
            self.context.clone(),
            self.chain.clone(),
            Arc::clone(&self.profile),
            self.config.clone(),
            Arc::clone(&self.oracle),
            Arc::clone(&self.health),
        )
    }

    pub fn scanner(&self) -> BlockScanner<TestContext, TestChain, EvmProfile> {
        BlockScanner::new(
            self.context.clone(),
            self.chain.clone(),
            Arc::clone(&self.profile),
            self.config.clone(),
            Arc::clone(&self.oracle),
            Arc::clone(&self.health),
            self.solvency_reporter(),
            Arc::clone(&self.heights),
        )
    }

    /// An unstuck runner. It does not share the client's signing lock, so
    /// it must not run concurrently with the client.
    pub fn unstuck_runner(&self) -> UnstuckRunner<TestContext, TestChain, EvmProfile> {
        UnstuckRunner::new(
            self.context.clone(),
            self.chain.clone(),
            Arc::clone(&self.profile),
            self.config.clone(),
            Arc::clone(&self.oracle),
            Arc::new(tokio::sync::Mutex::new(())),
        )
    }
}
