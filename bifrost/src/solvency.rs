//! # Solvency reporting
//!
//! A vault is solvent on a chain when it holds at least what the ledger
//! expects it to hold. Gas payments make the native balance drift below the
//! expected amount between ledger updates, so the gas asset is allowed a gap
//! of `solvency_gas_multiplier × max_contract_gas × gas price`.
//!
//! Reports come from two places. The block scanner checks every
//! `solvency_blocks` blocks, and the [`SolvencyRunner`] checks on its own
//! interval whenever the chain is halted or its scanner is unhealthy, since
//! those are the situations in which the scheduled checks stop.

use std::sync::Arc;
use std::sync::Mutex;

use ledger::asset::amount_of;
use ledger::asset::Coin;
use ledger::chain::Chain;
use ledger::vault::Solvency;
use ledger::vault::Vault;
use ledger::vault::VaultStatus;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;

use crate::block_scanner::ScannerHealth;
use crate::chain::ChainRpc;
use crate::config::ChainConfig;
use crate::context::BifrostCommand;
use crate::context::BifrostEvent;
use crate::context::BifrostSignal;
use crate::context::Context;
use crate::context::TerminationHandle;
use crate::error::Error;
use crate::gas::GasPriceOracle;
use crate::ledger_client::LedgerInteract as _;
use crate::metrics::Metrics;
use crate::profile::ChainProfile;
use crate::profile::NATIVE_DECIMALS;
use crate::storage::BlockMetaStore;

/// Wei per ledger unit of a native coin.
const WEI_PER_LEDGER_UNIT: u128 = 10_000_000_000;

/// The allowed shortfall of the gas asset, in ledger units.
pub fn gas_tolerance(multiplier: u64, max_contract_gas: u64, gas_price: u128) -> u128 {
    (multiplier as u128)
        .saturating_mul(max_contract_gas as u128)
        .saturating_mul(gas_price)
        / WEI_PER_LEDGER_UNIT
}

/// Checks the vaults of one chain against the ledger's expectations.
#[derive(Debug)]
pub struct SolvencyReporter<C, R, P> {
    context: C,
    rpc: R,
    profile: Arc<P>,
    config: ChainConfig,
    oracle: Arc<Mutex<GasPriceOracle>>,
    health: Arc<ScannerHealth>,
}

impl<C: Clone, R: Clone, P> Clone for SolvencyReporter<C, R, P> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
            rpc: self.rpc.clone(),
            profile: Arc::clone(&self.profile),
            config: self.config.clone(),
            oracle: Arc::clone(&self.oracle),
            health: Arc::clone(&self.health),
        }
    }
}

impl<C, R, P> SolvencyReporter<C, R, P>
where
    C: Context + 'static,
    R: ChainRpc + Clone + 'static,
    P: ChainProfile,
{
    /// Create a reporter.
    pub fn new(
        context: C,
        rpc: R,
        profile: Arc<P>,
        config: ChainConfig,
        oracle: Arc<Mutex<GasPriceOracle>>,
        health: Arc<ScannerHealth>,
    ) -> Self {
        Self { context, rpc, profile, config, oracle, health }
    }

    fn chain(&self) -> Chain {
        self.profile.chain()
    }

    /// Whether a report should be considered at `height` without being
    /// forced.
    pub fn is_scheduled(&self, height: u64) -> bool {
        self.config.solvency_blocks != 0 && height % self.config.solvency_blocks == 0
    }

    /// Check every active or retiring vault at chain `height` and return
    /// the reports to emit. Unless `force` is set nothing is checked
    /// outside the `solvency_blocks` schedule.
    #[tracing::instrument(skip_all, fields(chain = %self.chain(), height = height, force = force))]
    pub async fn check(&self, height: u64, force: bool) -> Result<Vec<Solvency>, Error> {
        if !force && !self.is_scheduled(height) {
            return Ok(Vec::new());
        }

        let ledger = self.context.get_ledger_client();
        let halted = match ledger.is_chain_halted(self.chain()).await {
            Ok(halted) => halted,
            Err(error) => {
                tracing::warn!(%error, "could not tell whether the chain is halted");
                false
            }
        };
        let healthy = self
            .health
            .is_healthy(self.config.healthy_period, self.config.max_healthy_lag_blocks);

        let gas_price = self
            .oracle
            .lock()
            .map(|oracle| oracle.gas_price())
            .unwrap_or(self.config.default_gas_price as u128);
        let tolerance = gas_tolerance(
            self.config.solvency_gas_multiplier,
            self.config.max_contract_gas,
            gas_price,
        );

        let mut reports = Vec::new();
        for vault in ledger.get_asgard_vaults().await? {
            if vault.status == VaultStatus::Inactive {
                continue;
            }
            let (coins, solvent) = self.vault_balances(&vault, height, tolerance).await?;
            if !solvent {
                tracing::warn!(pub_key = %vault.pub_key, "vault is insolvent");
            }
            if !solvent || !healthy || halted {
                reports.push(Solvency {
                    height,
                    chain: self.chain(),
                    pub_key: vault.pub_key,
                    coins,
                });
            }
        }

        Ok(reports)
    }

    /// The balances of the vault on chain, and whether they cover what the
    /// ledger expects.
    async fn vault_balances(
        &self,
        vault: &Vault,
        height: u64,
        tolerance: u128,
    ) -> Result<(Vec<Coin>, bool), Error> {
        let chain = self.chain();
        let gas_asset = self.profile.gas_asset();
        let address = self.profile.address_of(&vault.pub_key);
        let expected: Vec<Coin> = vault.coins_on(chain).cloned().collect();

        let balance = self.rpc.get_balance(address, None, Some(height)).await?;
        let actual = self.profile.to_ledger_amount(balance, NATIVE_DECIMALS);
        let mut solvent = amount_of(&expected, &gas_asset) <= actual.saturating_add(tolerance);
        let mut coins = vec![Coin {
            asset: gas_asset.clone(),
            amount: actual,
            decimals: NATIVE_DECIMALS,
        }];

        let store = BlockMetaStore::new(chain, self.context.get_storage_mut());
        for coin in expected.iter().filter(|coin| coin.asset != gas_asset) {
            let Some(contract) = coin.asset.contract_address() else {
                continue;
            };
            let token = match self.profile.parse_address(contract) {
                Ok(token) => token,
                Err(error) => {
                    tracing::warn!(%error, asset = %coin.asset, "skipping token with an invalid contract");
                    continue;
                }
            };
            let decimals = match coin.decimals {
                0 => store
                    .get_token_meta(&contract.to_lowercase())
                    .await?
                    .map(|meta| meta.decimals)
                    .unwrap_or(NATIVE_DECIMALS),
                decimals => decimals,
            };

            let balance = self.rpc.get_balance(address, Some(token), Some(height)).await?;
            let actual = self.profile.to_ledger_amount(balance, decimals);
            solvent &= actual >= coin.amount;
            coins.push(Coin {
                asset: coin.asset.clone(),
                amount: actual,
                decimals,
            });
        }

        Ok((coins, solvent))
    }

    /// Check the vaults and send the reports to the solvency queue. Returns
    /// the number of reports sent.
    pub async fn report(
        &self,
        height: u64,
        force: bool,
        sender: &mpsc::Sender<Solvency>,
    ) -> Result<usize, Error> {
        let reports = self.check(height, force).await?;
        let count = reports.len();
        for report in reports {
            sender
                .send(report)
                .await
                .map_err(|_| Error::ChannelClosed("solvency"))?;
        }

        if count > 0 {
            tracing::info!(chain = %self.chain(), height, count, "emitted solvency reports");
            metrics::counter!(Metrics::SolvencyReportsTotal, "chain" => self.chain().as_str())
                .increment(count as u64);
            self.context
                .signal(BifrostEvent::SolvencyReported { chain: self.chain(), height }.into())?;
        }
        Ok(count)
    }
}

/// Reports solvency on a timer while the chain is halted or its scanner is
/// unhealthy, and whenever an operator asks for it.
#[derive(Debug)]
pub struct SolvencyRunner<C, R, P> {
    reporter: SolvencyReporter<C, R, P>,
    sender: mpsc::Sender<Solvency>,
}

impl<C, R, P> SolvencyRunner<C, R, P>
where
    C: Context + 'static,
    R: ChainRpc + Clone + 'static,
    P: ChainProfile,
{
    /// Create a runner sending its reports to `sender`.
    pub fn new(reporter: SolvencyReporter<C, R, P>, sender: mpsc::Sender<Solvency>) -> Self {
        Self { reporter, sender }
    }

    /// Whether the runner has to report at this tick.
    async fn needs_report(&self) -> bool {
        let config = &self.reporter.config;
        if !self
            .reporter
            .health
            .is_healthy(config.healthy_period, config.max_healthy_lag_blocks)
        {
            return true;
        }
        let ledger = self.reporter.context.get_ledger_client();
        match ledger.is_chain_halted(self.reporter.chain()).await {
            Ok(halted) => halted,
            Err(error) => {
                tracing::warn!(%error, "could not tell whether the chain is halted");
                false
            }
        }
    }

    /// The height to check balances at. The scanner may be stalled, so the
    /// chain tip is preferred over the last scanned height.
    async fn check_height(&self) -> u64 {
        match self.reporter.rpc.get_height().await {
            Ok(height) => height,
            Err(error) => {
                let scanned = self.reporter.health.scanned_height();
                tracing::warn!(%error, scanned, "could not fetch the chain height");
                scanned
            }
        }
    }

    async fn tick(&self, forced: bool) {
        if !forced && !self.needs_report().await {
            return;
        }
        let height = self.check_height().await;
        if let Err(error) = self.reporter.report(height, true, &self.sender).await {
            tracing::warn!(%error, height, "solvency check failed");
        }
    }

    /// Run until shutdown is signalled.
    #[tracing::instrument(skip_all, name = "solvency-runner", fields(chain = %self.reporter.chain()))]
    pub async fn run(self, mut term: TerminationHandle) -> Result<(), Error> {
        let chain = self.reporter.chain();
        let mut signals = self.reporter.context.get_signal_receiver();
        let mut interval = tokio::time::interval(self.reporter.config.solvency_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            if term.shutdown_signalled() {
                break;
            }

            let forced = tokio::select! {
                _ = term.wait_for_shutdown() => break,
                _ = interval.tick() => false,
                signal = signals.recv() => match signal {
                    Ok(BifrostSignal::Command(BifrostCommand::ForceSolvencyReport(target))) => {
                        if target != chain {
                            continue;
                        }
                        tracing::info!("solvency report requested");
                        true
                    }
                    Ok(_) | Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                },
            };

            self.tick(forced).await;
        }

        tracing::info!("solvency runner stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(3, 80_000, 0, 0; "no gas price")]
    #[test_case(3, 80_000, 50_000_000_000, 1_200_000; "fifty gwei")]
    #[test_case(1, 21_000, 10_000_000_000, 21_000; "single transfer")]
    fn tolerance_is_in_ledger_units(multiplier: u64, gas: u64, price: u128, expected: u128) {
        assert_eq!(gas_tolerance(multiplier, gas, price), expected);
    }
}
