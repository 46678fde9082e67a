//! # Threshold signing
//!
//! Vault keys only exist as shares held by the TSS daemons of the
//! validators. The [`TssInteract`] trait is the contract the bridge has with
//! its local daemon, and the [`TssSigner`] wraps it with the timeout, the
//! blame handling and the metrics of a keysign round.

pub mod http;

use std::future::Future;
use std::time::Duration;
use std::time::Instant;

use ledger::asset::Coin;
use ledger::keys::PublicKey;
use ledger::keysign::KeysignFailure;

use crate::error::Error;
use crate::ledger_client::LedgerInteract;
use crate::metrics::Metrics;

/// The contract with the local TSS daemon.
pub trait TssInteract: Send + Sync {
    /// Run a keysign round for the 32 byte `message` with the vault key
    /// `pub_key`, returning a 64 byte compact signature. A round that
    /// fails returns [`Error::Keysign`] with the blame.
    fn sign(
        &self,
        message: [u8; 32],
        pub_key: &PublicKey,
    ) -> impl Future<Output = Result<[u8; 64], Error>> + Send;

    /// Start the TSS subsystem.
    fn start(&self) -> impl Future<Output = Result<(), Error>> + Send;

    /// Stop the TSS subsystem.
    fn stop(&self) -> impl Future<Output = Result<(), Error>> + Send;
}

/// A request for a signature of an outbound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignRequest {
    /// The hash to sign.
    pub message: [u8; 32],
    /// The vault key.
    pub pub_key: PublicKey,
    /// The ledger height of the outbound, reported with a failure.
    pub height: u64,
    /// The memo of the outbound, reported with a failure.
    pub memo: String,
    /// The coins of the outbound, reported with a failure.
    pub coins: Vec<Coin>,
}

/// Requests threshold signatures and reports failed rounds to the ledger.
/// Requests are never retried here, the ledger reschedules outbounds that
/// could not be signed.
#[derive(Debug, Clone)]
pub struct TssSigner<T, L> {
    tss: T,
    ledger: L,
    timeout: Duration,
}

impl<T, L> TssSigner<T, L>
where
    T: TssInteract,
    L: LedgerInteract,
{
    /// Create a signer that gives up on a round after `timeout`.
    pub fn new(tss: T, ledger: L, timeout: Duration) -> Self {
        Self { tss, ledger, timeout }
    }

    /// Sign the request.
    #[tracing::instrument(skip_all, fields(pub_key = %request.pub_key, height = request.height))]
    pub async fn sign(&self, request: &SignRequest) -> Result<[u8; 64], Error> {
        let started = Instant::now();
        let result = tokio::time::timeout(
            self.timeout,
            self.tss.sign(request.message, &request.pub_key),
        )
        .await;

        metrics::histogram!(Metrics::KeysignDurationSeconds)
            .record(started.elapsed().as_secs_f64());

        let error = match result {
            Ok(Ok(signature)) => return Ok(signature),
            Ok(Err(error)) => error,
            Err(_) => {
                tracing::warn!(timeout = ?self.timeout, "keysign round timed out");
                metrics::counter!(Metrics::KeysignFailuresTotal, "blamed" => "false").increment(1);
                return Err(Error::KeysignTimeout(self.timeout));
            }
        };

        let Error::Keysign(keysign) = error else {
            return Err(error);
        };

        if keysign.blame.is_empty() {
            tracing::warn!(reason = %keysign.blame.fail_reason, "keysign failed without blame");
            metrics::counter!(Metrics::KeysignFailuresTotal, "blamed" => "false").increment(1);
            return Err(Error::Keysign(keysign));
        }

        tracing::warn!(
            blame = %keysign.blame,
            nodes = keysign.blame.blame_nodes.len(),
            "keysign failed, reporting blame"
        );
        metrics::counter!(Metrics::KeysignFailuresTotal, "blamed" => "true").increment(1);

        let failure = KeysignFailure {
            blame: keysign.blame.clone(),
            height: request.height,
            memo: request.memo.clone(),
            coins: request.coins.clone(),
            pub_key: request.pub_key,
        };
        match self.ledger.post_keysign_failure(failure).await {
            Ok(tx_id) => tracing::info!(%tx_id, "posted keysign failure"),
            Err(error) => tracing::error!(%error, "could not post keysign failure"),
        }

        Err(Error::Keysign(keysign))
    }

    /// Start the TSS subsystem.
    pub async fn start(&self) -> Result<(), Error> {
        self.tss.start().await
    }

    /// Stop the TSS subsystem.
    pub async fn stop(&self) -> Result<(), Error> {
        self.tss.stop().await
    }
}

#[cfg(test)]
mod tests {
    use ledger::keysign::Blame;
    use ledger::keysign::BlameNode;
    use ledger::testing::public_key;

    use crate::chain::transaction;
    use crate::testing::ledger::InMemoryLedger;
    use crate::testing::tss::LocalTss;

    use super::*;

    fn request() -> SignRequest {
        SignRequest {
            message: [7; 32],
            pub_key: public_key(100),
            height: 12,
            memo: "OUT:AA".to_string(),
            coins: Vec::new(),
        }
    }

    #[tokio::test]
    async fn signatures_recover_to_the_vault() {
        let signer = TssSigner::new(LocalTss::new(), InMemoryLedger::new(), Duration::from_secs(1));
        let request = request();
        let signature = signer.sign(&request).await.unwrap();

        let hash = alloy::primitives::B256::from(request.message);
        transaction::recover_signature(hash, &signature, &request.pub_key).unwrap();
    }

    #[tokio::test]
    async fn blamed_failures_are_reported() {
        let blame = Blame {
            fail_reason: "signer timeout".to_string(),
            round: "SignRound3".to_string(),
            blame_nodes: vec![BlameNode { pub_key: public_key(3) }],
        };
        let ledger = InMemoryLedger::new();
        let signer = TssSigner::new(LocalTss::failing(blame.clone()), ledger.clone(), Duration::from_secs(1));

        let result = signer.sign(&request()).await;
        assert!(matches!(result, Err(Error::Keysign(ref err)) if err.blame == blame));

        let failures = ledger.keysign_failures().await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].blame, blame);
        assert_eq!(failures[0].height, 12);
    }

    #[tokio::test]
    async fn unblamed_failures_are_not_reported() {
        let ledger = InMemoryLedger::new();
        let signer = TssSigner::new(
            LocalTss::failing(Blame::default()),
            ledger.clone(),
            Duration::from_secs(1),
        );

        assert!(signer.sign(&request()).await.is_err());
        assert!(ledger.keysign_failures().await.is_empty());
    }

    #[tokio::test]
    async fn slow_rounds_time_out() {
        let tss = LocalTss::new().with_delay(Duration::from_millis(200));
        let signer = TssSigner::new(tss, InMemoryLedger::new(), Duration::from_millis(10));

        let result = signer.sign(&request()).await;
        assert!(matches!(result, Err(Error::KeysignTimeout(_))));
    }
}
