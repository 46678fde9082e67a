//! Test Context implementation

use crate::config::Settings;
use crate::context::BifrostContext;
use crate::context::BifrostSignal;
use crate::context::Context;
use crate::context::TerminationHandle;
use crate::error::Error;
use crate::ledger_client::LedgerInteract;
use crate::storage::in_memory::SharedStore;
use crate::storage::in_memory::Store;
use crate::storage::DbRead;
use crate::storage::DbWrite;
use crate::testing::ledger::InMemoryLedger;
use crate::testing::tss::LocalTss;
use crate::tss::TssInteract;

/// A [`Context`] which can be used for testing.
///
/// This context is opinionated and uses a shared in-memory store, an
/// [`InMemoryLedger`] and a [`LocalTss`]. The store, ledger and TSS handles
/// are public, so that tests can arrange and inspect them while the code
/// under test holds the context.
#[derive(Debug, Clone)]
pub struct TestContext {
    /// The inner [`BifrostContext`] which this context wraps.
    pub inner: BifrostContext<SharedStore, InMemoryLedger, LocalTss>,
    /// The store shared with the inner context.
    pub store: SharedStore,
    /// The ledger shared with the inner context.
    pub ledger: InMemoryLedger,
    /// The TSS stand-in shared with the inner context.
    pub tss: LocalTss,
}

impl TestContext {
    /// Start building a test context.
    pub fn builder() -> TestContextBuilder {
        TestContextBuilder::default()
    }
}

/// Builds a [`TestContext`]. Everything not given is created fresh, with
/// the settings read from the default configuration file.
#[derive(Debug, Default)]
pub struct TestContextBuilder {
    settings: Option<Settings>,
    store: Option<SharedStore>,
    ledger: Option<InMemoryLedger>,
    tss: Option<LocalTss>,
}

impl TestContextBuilder {
    /// Use the given settings.
    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Modify the settings before the context is built.
    pub fn modify_settings(mut self, f: impl FnOnce(&mut Settings)) -> Self {
        let mut settings = self
            .settings
            .take()
            .unwrap_or_else(|| Settings::new_from_default_config().unwrap());
        f(&mut settings);
        self.settings = Some(settings);
        self
    }

    /// Use the given store, e.g. to share it with another context.
    pub fn with_store(mut self, store: SharedStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Use the given ledger.
    pub fn with_ledger(mut self, ledger: InMemoryLedger) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Use the given TSS stand-in.
    pub fn with_tss(mut self, tss: LocalTss) -> Self {
        self.tss = Some(tss);
        self
    }

    /// Build the context.
    pub fn build(self) -> TestContext {
        let settings = self
            .settings
            .unwrap_or_else(|| Settings::new_from_default_config().unwrap());
        let store = self.store.unwrap_or_else(Store::new_shared);
        let ledger = self.ledger.unwrap_or_default();
        let tss = self.tss.unwrap_or_default();

        let inner = BifrostContext::new(settings, store.clone(), ledger.clone(), tss.clone());
        TestContext { inner, store, ledger, tss }
    }
}

impl Context for TestContext {
    fn config(&self) -> &Settings {
        self.inner.config()
    }

    fn get_signal_receiver(&self) -> tokio::sync::broadcast::Receiver<BifrostSignal> {
        self.inner.get_signal_receiver()
    }

    fn get_signal_sender(&self) -> tokio::sync::broadcast::Sender<BifrostSignal> {
        self.inner.get_signal_sender()
    }

    fn signal(&self, signal: BifrostSignal) -> Result<(), Error> {
        self.inner.signal(signal)
    }

    fn get_termination_handle(&self) -> TerminationHandle {
        self.inner.get_termination_handle()
    }

    fn get_storage(&self) -> impl DbRead + Clone + Sync + Send + 'static {
        self.inner.get_storage()
    }

    fn get_storage_mut(&self) -> impl DbRead + DbWrite + Clone + Sync + Send + 'static {
        self.inner.get_storage_mut()
    }

    fn get_ledger_client(&self) -> impl LedgerInteract + Clone + 'static {
        self.inner.get_ledger_client()
    }

    fn get_tss_client(&self) -> impl TssInteract + Clone + 'static {
        self.inner.get_tss_client()
    }
}
