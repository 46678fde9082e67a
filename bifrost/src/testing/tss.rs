//! A TSS daemon stand-in that signs with a local key.

use std::sync::Arc;
use std::time::Duration;

use ledger::keys::PublicKey;
use ledger::keysign::Blame;
use secp256k1::Message;
use secp256k1::SecretKey;
use secp256k1::SECP256K1;

use crate::error::Error;
use crate::error::KeysignError;
use crate::tss::TssInteract;

/// Signs with one local key, standing in for the whole validator group.
/// Requests for any other key fail without blame.
#[derive(Debug, Clone)]
pub struct LocalTss {
    secret_key: SecretKey,
    blame: Option<Blame>,
    delay: Duration,
    requests: Arc<std::sync::Mutex<Vec<[u8; 32]>>>,
}

impl Default for LocalTss {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalTss {
    /// Sign with the key of the test vault, `ledger::testing::public_key(100)`.
    pub fn new() -> Self {
        Self::with_key(ledger::testing::secret_key(100))
    }

    /// Sign with the given key.
    pub fn with_key(secret_key: SecretKey) -> Self {
        Self {
            secret_key,
            blame: None,
            delay: Duration::ZERO,
            requests: Arc::default(),
        }
    }

    /// Fail every round with the given blame.
    pub fn failing(blame: Blame) -> Self {
        Self { blame: Some(blame), ..Self::new() }
    }

    /// Take `delay` to answer.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// The public key of the signing key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_secret_key(&self.secret_key)
    }

    /// The messages signed so far, in order.
    pub fn requests(&self) -> Vec<[u8; 32]> {
        self.requests.lock().unwrap().clone()
    }
}

impl TssInteract for LocalTss {
    async fn sign(&self, message: [u8; 32], pub_key: &PublicKey) -> Result<[u8; 64], Error> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.requests.lock().unwrap().push(message);

        if let Some(blame) = &self.blame {
            return Err(KeysignError { blame: blame.clone() }.into());
        }
        if *pub_key != self.public_key() {
            let blame = Blame {
                fail_reason: format!("no key share for {pub_key}"),
                ..Blame::default()
            };
            return Err(KeysignError { blame }.into());
        }

        let message = Message::from_digest(message);
        let signature = SECP256K1.sign_ecdsa(&message, &self.secret_key);
        Ok(signature.serialize_compact())
    }

    async fn start(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), Error> {
        Ok(())
    }
}
