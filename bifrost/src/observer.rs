//! # Observer
//!
//! The observer is the single place the bridge reports what it saw to the
//! ledger. It drains the queues the chain clients fill:
//!
//! * observed transactions, which are reported right away. Batches that
//!   need confirmations are reported as non-final first and kept "on deck"
//!   until their chain is high enough, then reported again as final,
//! * errata for orphaned blocks, which also take the orphaned transactions
//!   off deck, and
//! * solvency reports.
//!
//! Submissions that fail because the ledger could not be reached are queued
//! and retried on the next tick, up to `max_pending_submissions` of them.
//! Submissions the ledger refuses are dropped.

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::collections::VecDeque;

use ledger::chain::Chain;
use ledger::observed::ObservedTx;
use ledger::tx::TxIn;
use ledger::vault::ErrataBlock;
use ledger::vault::Solvency;
use tokio::sync::mpsc;
use tokio::sync::watch;

use crate::context::BifrostEvent;
use crate::context::Context;
use crate::context::TerminationHandle;
use crate::error::Error;
use crate::ledger_client::LedgerInteract as _;
use crate::metrics::Metrics;

/// The receiving ends of the queues the chain clients report into.
#[derive(Debug)]
pub struct ObserverQueues {
    /// Observed transactions.
    pub inbound: mpsc::Receiver<TxIn>,
    /// Orphaned blocks.
    pub errata: mpsc::Receiver<(Chain, ErrataBlock)>,
    /// Solvency reports.
    pub solvency: mpsc::Receiver<Solvency>,
}

/// A submission the ledger did not accept yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingSubmission {
    /// Observations of one chain.
    Observations {
        /// The chain.
        chain: Chain,
        /// The reports.
        observations: Vec<ObservedTx>,
        /// Whether the reports are final.
        finalised: bool,
    },
    /// An orphaned block.
    Errata(Chain, ErrataBlock),
    /// A solvency report.
    Solvency(Solvency),
}

/// Reports observations, errata and solvency to the ledger.
pub struct Observer<C> {
    context: C,
    heights: BTreeMap<Chain, watch::Receiver<u64>>,
    on_deck: Vec<TxIn>,
    pending: VecDeque<PendingSubmission>,
    max_pending: usize,
}

impl<C> Observer<C>
where
    C: Context + 'static,
{
    /// Create an observer that reads the scanned height of each chain from
    /// `heights`.
    pub fn new(context: C, heights: BTreeMap<Chain, watch::Receiver<u64>>) -> Self {
        let max_pending = context.config().bifrost.max_pending_submissions.max(1);
        Self {
            context,
            heights,
            on_deck: Vec::new(),
            pending: VecDeque::new(),
            max_pending,
        }
    }

    /// Batches waiting for confirmations.
    pub fn on_deck(&self) -> &[TxIn] {
        &self.on_deck
    }

    /// Submissions waiting to be retried.
    pub fn pending(&self) -> &VecDeque<PendingSubmission> {
        &self.pending
    }

    fn chain_height(&self, chain: Chain) -> u64 {
        self.heights
            .get(&chain)
            .map(|height| *height.borrow())
            .unwrap_or_default()
    }

    async fn submit(&self, submission: &PendingSubmission) -> Result<(), Error> {
        let ledger = self.context.get_ledger_client();
        match submission {
            PendingSubmission::Observations { chain, observations, finalised } => {
                ledger
                    .submit_observations(*chain, observations.clone())
                    .await?;
                tracing::info!(%chain, count = observations.len(), finalised, "submitted observations");
                metrics::counter!(
                    Metrics::ObservationsSubmittedTotal,
                    "chain" => chain.as_str(),
                    "finalised" => finalised.to_string(),
                )
                .increment(observations.len() as u64);
                let event = BifrostEvent::ObservationsSubmitted {
                    chain: *chain,
                    count: observations.len(),
                    finalised: *finalised,
                };
                if let Err(error) = self.context.signal(event.into()) {
                    tracing::warn!(%error, "could not signal submitted observations");
                }
            }
            PendingSubmission::Errata(chain, errata) => {
                ledger.post_errata(*chain, errata.clone()).await?;
                tracing::info!(%chain, height = errata.height, "posted errata");
            }
            PendingSubmission::Solvency(solvency) => {
                ledger.post_solvency(solvency.clone()).await?;
                tracing::debug!(chain = %solvency.chain, pub_key = %solvency.pub_key, "posted solvency");
            }
        }
        Ok(())
    }

    /// Submit now, or queue for the next tick if the ledger could not take
    /// it. Refused submissions are dropped.
    async fn submit_or_queue(&mut self, submission: PendingSubmission) {
        let error = match self.submit(&submission).await {
            Ok(()) => return,
            Err(error) => error,
        };
        if !error.is_retryable() {
            tracing::warn!(%error, ?submission, "ledger refused the submission, dropping it");
            metrics::counter!(Metrics::SubmissionsDroppedTotal, "reason" => "refused").increment(1);
            return;
        }

        tracing::warn!(%error, "submission failed, retrying on the next tick");
        if self.pending.len() >= self.max_pending {
            if let Some(oldest) = self.pending.pop_front() {
                tracing::warn!(submission = ?oldest, "retry queue is full, dropping the oldest submission");
                metrics::counter!(Metrics::SubmissionsDroppedTotal, "reason" => "queue_full")
                    .increment(1);
            }
        }
        self.pending.push_back(submission);
    }

    /// Report a batch of observed transactions.
    pub async fn process_tx_in(&mut self, tx_in: TxIn) {
        if tx_in.is_empty() {
            return;
        }
        let finalised = tx_in.finalised || tx_in.confirmations_required == 0;
        let submission = PendingSubmission::Observations {
            chain: tx_in.chain,
            observations: tx_in.to_observations(finalised),
            finalised,
        };
        self.submit_or_queue(submission).await;

        if !finalised {
            self.on_deck.push(tx_in);
        }
    }

    /// Take the transactions of an orphaned block off deck and report it.
    pub async fn process_errata(&mut self, chain: Chain, errata: ErrataBlock) {
        let reverted: HashSet<_> = errata.txs.iter().map(|tx| tx.tx_id.clone()).collect();
        for tx_in in self.on_deck.iter_mut().filter(|tx_in| tx_in.chain == chain) {
            tx_in.items.retain(|item| !reverted.contains(&item.tx));
        }
        self.on_deck.retain(|tx_in| !tx_in.is_empty());

        self.submit_or_queue(PendingSubmission::Errata(chain, errata))
            .await;
    }

    /// Report a solvency snapshot.
    pub async fn process_solvency(&mut self, solvency: Solvency) {
        self.submit_or_queue(PendingSubmission::Solvency(solvency))
            .await;
    }

    /// Retry failed submissions and report the batches on deck that have
    /// reached their confirmations as final.
    pub async fn tick(&mut self) {
        for submission in std::mem::take(&mut self.pending) {
            self.submit_or_queue(submission).await;
        }

        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.on_deck)
            .into_iter()
            .partition(|tx_in| tx_in.is_final_at(self.chain_height(tx_in.chain)));
        self.on_deck = waiting;

        for mut tx_in in ready {
            tx_in.finalised = true;
            let submission = PendingSubmission::Observations {
                chain: tx_in.chain,
                observations: tx_in.to_observations(true),
                finalised: true,
            };
            self.submit_or_queue(submission).await;
        }
    }

    /// Run until shutdown is signalled.
    #[tracing::instrument(skip_all, name = "observer")]
    pub async fn run(mut self, queues: ObserverQueues, mut term: TerminationHandle) -> Result<(), Error> {
        let ObserverQueues {
            mut inbound,
            mut errata,
            mut solvency,
        } = queues;
        let mut interval = tokio::time::interval(self.context.config().bifrost.observer_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            if term.shutdown_signalled() {
                break;
            }

            tokio::select! {
                _ = term.wait_for_shutdown() => break,
                _ = interval.tick() => self.tick().await,
                Some(tx_in) = inbound.recv() => self.process_tx_in(tx_in).await,
                Some((chain, block)) = errata.recv() => self.process_errata(chain, block).await,
                Some(report) = solvency.recv() => self.process_solvency(report).await,
            }
        }

        if !self.pending.is_empty() || !self.on_deck.is_empty() {
            tracing::warn!(
                pending = self.pending.len(),
                on_deck = self.on_deck.len(),
                "observer stopped with unreported work"
            );
        }
        tracing::info!("observer stopped");
        Ok(())
    }
}
