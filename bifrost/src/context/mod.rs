//! Context module for the bridge binary.

pub mod messaging;
pub mod termination;

use tokio::sync::broadcast::Sender;

use crate::config::Settings;
use crate::error::Error;
use crate::ledger_client::LedgerInteract;
use crate::storage::DbRead;
use crate::storage::DbWrite;
use crate::tss::TssInteract;
use crate::BIFROST_CHANNEL_CAPACITY;
pub use messaging::*;
pub use termination::*;

/// Context trait that is implemented by the [`BifrostContext`].
pub trait Context: Clone + Sync + Send {
    /// Get the current configuration for the bridge.
    fn config(&self) -> &Settings;
    /// Subscribe to the application signalling channel, returning a receiver
    /// which can be used to listen for events.
    fn get_signal_receiver(&self) -> tokio::sync::broadcast::Receiver<BifrostSignal>;
    /// Get an owned application signalling channel sender.
    fn get_signal_sender(&self) -> tokio::sync::broadcast::Sender<BifrostSignal>;
    /// Send a signal to the application signalling channel.
    fn signal(&self, signal: BifrostSignal) -> Result<(), Error>;
    /// Returns a handle to the application's termination signal.
    fn get_termination_handle(&self) -> TerminationHandle;
    /// Get a read-only handle to the bridge storage.
    fn get_storage(&self) -> impl DbRead + Clone + Sync + Send + 'static;
    /// Get a read-write handle to the bridge storage.
    fn get_storage_mut(&self) -> impl DbRead + DbWrite + Clone + Sync + Send + 'static;
    /// Get a handle to the ledger client.
    fn get_ledger_client(&self) -> impl LedgerInteract + Clone + 'static;
    /// Get a handle to the TSS client.
    fn get_tss_client(&self) -> impl TssInteract + Clone + 'static;
}

/// Bridge context which is passed to different components within the
/// bridge binary.
#[derive(Debug, Clone)]
pub struct BifrostContext<S, L, T> {
    config: Settings,
    // Handle to the app signalling channel. This keeps the channel alive
    // for the duration of the program and is used both to send messages
    // and to hand out new receivers.
    signal_tx: Sender<BifrostSignal>,
    /// Handle to the app termination channel. This keeps the channel alive
    /// for the duration of the program and is used to provide new senders
    /// and receivers for a [`TerminationHandle`].
    term_tx: tokio::sync::watch::Sender<bool>,
    /// Handle to the bridge storage.
    storage: S,
    /// Handle to a ledger API fallback-client.
    ledger_client: L,
    /// Handle to the TSS daemon client.
    tss_client: T,
}

impl<S, L, T> BifrostContext<S, L, T>
where
    S: DbRead + DbWrite + Clone + Sync + Send + 'static,
    L: for<'a> TryFrom<&'a Settings> + LedgerInteract + Clone + 'static,
    T: for<'a> TryFrom<&'a Settings> + TssInteract + Clone + 'static,
    Error: for<'a> From<<L as TryFrom<&'a Settings>>::Error>,
    Error: for<'a> From<<T as TryFrom<&'a Settings>>::Error>,
{
    /// Initializes a new [`BifrostContext`], automatically creating clients
    /// based on the provided types.
    pub fn init(config: Settings, db: S) -> Result<Self, Error> {
        let ledger_client = L::try_from(&config)?;
        let tss_client = T::try_from(&config)?;

        Ok(Self::new(config, db, ledger_client, tss_client))
    }
}

impl<S, L, T> BifrostContext<S, L, T>
where
    S: DbRead + DbWrite + Clone + Sync + Send,
    L: LedgerInteract + Clone,
    T: TssInteract + Clone,
{
    /// Create a new bridge context.
    pub fn new(config: Settings, db: S, ledger_client: L, tss_client: T) -> Self {
        let (signal_tx, _) = tokio::sync::broadcast::channel(BIFROST_CHANNEL_CAPACITY);
        let (term_tx, _) = tokio::sync::watch::channel(false);

        Self {
            config,
            signal_tx,
            term_tx,
            storage: db,
            ledger_client,
            tss_client,
        }
    }
}

impl<S, L, T> Context for BifrostContext<S, L, T>
where
    S: DbRead + DbWrite + Clone + Sync + Send + 'static,
    L: LedgerInteract + Clone + 'static,
    T: TssInteract + Clone + 'static,
{
    fn config(&self) -> &Settings {
        &self.config
    }

    fn get_signal_receiver(&self) -> tokio::sync::broadcast::Receiver<BifrostSignal> {
        self.signal_tx.subscribe()
    }

    fn get_signal_sender(&self) -> tokio::sync::broadcast::Sender<BifrostSignal> {
        self.signal_tx.clone()
    }

    /// Send a signal to the application signalling channel. Having no
    /// subscribers is not an error, events are only informational.
    fn signal(&self, signal: BifrostSignal) -> Result<(), Error> {
        if self.signal_tx.receiver_count() == 0 {
            return Ok(());
        }
        self.signal_tx
            .send(signal)
            .map_err(|_| {
                tracing::warn!("failed to send signal to the application, no receivers present.");
                Error::BridgeShutdown
            })
            .map(|_| ())
    }

    fn get_termination_handle(&self) -> TerminationHandle {
        TerminationHandle::new(self.term_tx.clone(), self.term_tx.subscribe())
    }

    fn get_storage(&self) -> impl DbRead + Clone + Sync + Send + 'static {
        self.storage.clone()
    }

    fn get_storage_mut(&self) -> impl DbRead + DbWrite + Clone + Sync + Send + 'static {
        self.storage.clone()
    }

    fn get_ledger_client(&self) -> impl LedgerInteract + Clone + 'static {
        self.ledger_client.clone()
    }

    fn get_tss_client(&self) -> impl TssInteract + Clone + 'static {
        self.tss_client.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU8;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use ledger::chain::Chain;
    use tokio::sync::Notify;

    use crate::context::BifrostEvent;
    use crate::context::BifrostSignal;
    use crate::context::Context as _;
    use crate::testing::context::TestContext;

    /// This test shows that cloning a context and signalling on the original
    /// context will also signal on the cloned context.
    #[tokio::test]
    async fn context_clone_signalling_works() {
        let context = TestContext::builder().build();
        let context_clone = context.clone();
        let mut cloned_receiver = context_clone.get_signal_receiver();

        let recv_count = Arc::new(AtomicU8::new(0));
        let task_started = Arc::new(Notify::new());
        let task_completed = Arc::new(Notify::new());

        let task_started_clone = Arc::clone(&task_started);
        let task_completed_clone = Arc::clone(&task_completed);
        let recv_count_clone = Arc::clone(&recv_count);
        tokio::spawn(async move {
            task_started_clone.notify_one();
            let signal = cloned_receiver.recv().await.unwrap();

            assert_eq!(
                signal,
                BifrostSignal::Event(BifrostEvent::BlockScanned { chain: Chain::Eth, height: 7 })
            );

            recv_count_clone.fetch_add(1, Ordering::Relaxed);
            task_completed_clone.notify_one();
        });

        // The receiver must be subscribed before we send the signal.
        task_started.notified().await;

        context
            .signal(BifrostEvent::BlockScanned { chain: Chain::Eth, height: 7 }.into())
            .unwrap();

        task_completed.notified().await;

        assert_eq!(recv_count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn signalling_without_receivers_is_fine() {
        let context = TestContext::builder().build();
        let event = BifrostEvent::BlockScanned { chain: Chain::Eth, height: 1 };
        assert!(context.signal(event.into()).is_ok());
    }

    #[test]
    fn termination_is_shared_between_clones() {
        let context = TestContext::builder().build();
        let handle = context.clone().get_termination_handle();
        context.get_termination_handle().signal_shutdown();
        assert!(handle.shutdown_signalled());
    }
}
