//! Polls the ledger for outbound items and hands them to the chain clients.

use std::sync::Arc;

use ledger::chain::Chain;

use crate::chain::ChainRpc;
use crate::chain_client::ChainClient;
use crate::context::Context;
use crate::context::TerminationHandle;
use crate::error::Error;
use crate::ledger_client::LedgerInteract as _;
use crate::profile::ChainProfile;

/// Signs what the ledger schedules. Chains are processed concurrently, the
/// items of one chain one after the other.
pub struct OutboundSigner<C, R, P> {
    context: C,
    clients: Vec<Arc<ChainClient<C, R, P>>>,
}

impl<C, R, P> OutboundSigner<C, R, P>
where
    C: Context + 'static,
    R: ChainRpc + Clone + 'static,
    P: ChainProfile,
{
    /// Create a signer for the given chain clients.
    pub fn new(context: C, clients: Vec<Arc<ChainClient<C, R, P>>>) -> Self {
        Self { context, clients }
    }

    async fn process_chain(&self, client: &ChainClient<C, R, P>, height: u64) -> usize {
        let chain = client.get_chain();
        let items = match self
            .context
            .get_ledger_client()
            .get_outbound_items(chain, height)
            .await
        {
            Ok(items) => items,
            Err(error) => {
                tracing::warn!(%error, %chain, "could not fetch outbound items");
                return 0;
            }
        };

        let mut broadcast = 0;
        for item in items {
            match client.sign_and_broadcast(&item, height).await {
                Ok(Some(_)) => broadcast += 1,
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(%error, %chain, in_hash = %item.in_hash, "could not sign outbound")
                }
            }
        }
        broadcast
    }

    /// Process the items scheduled at ledger `height` on every chain.
    /// Returns how many outbounds were broadcast per chain.
    pub async fn process(&self, height: u64) -> Vec<(Chain, usize)> {
        let work = self.clients.iter().map(|client| async move {
            (client.get_chain(), self.process_chain(client, height).await)
        });
        futures::future::join_all(work).await
    }

    /// Run until shutdown is signalled.
    #[tracing::instrument(skip_all, name = "outbound-signer")]
    pub async fn run(self, mut term: TerminationHandle) -> Result<(), Error> {
        let mut interval =
            tokio::time::interval(self.context.config().bifrost.outbound_poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            if term.shutdown_signalled() {
                break;
            }

            tokio::select! {
                _ = term.wait_for_shutdown() => break,
                _ = interval.tick() => {}
            }

            let height = match self.context.get_ledger_client().get_block_height().await {
                Ok(height) => height,
                Err(error) => {
                    tracing::warn!(%error, "could not fetch the ledger height");
                    continue;
                }
            };
            self.process(height).await;
        }

        tracing::info!("outbound signer stopped");
        Ok(())
    }
}
