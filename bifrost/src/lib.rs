#![deny(missing_docs)]

//! # Bifrost
//!
//! Bifrost is the process every validator runs next to its ledger node. It
//! watches the external chains for transactions to the network's vaults
//! and reports them to the ledger, and it signs and broadcasts the
//! outbounds the ledger schedules, using threshold signatures so that no
//! single validator ever holds a vault key.
//!
//! The pieces are:
//!
//! * one [`chain_client::ChainClient`] per configured chain, running a
//!   [`block_scanner::BlockScanner`], a [`solvency::SolvencyRunner`] and an
//!   [`unstuck::UnstuckRunner`],
//! * the [`observer::Observer`], which reports what the scanners found, and
//! * the [`outbound::OutboundSigner`], which polls the ledger for work.

pub mod block_scanner;
pub mod chain;
pub mod chain_client;
pub mod config;
pub mod context;
pub mod error;
pub mod gas;
pub mod ledger_client;
pub mod logging;
pub mod metrics;
pub mod observer;
pub mod outbound;
pub mod profile;
pub mod solvency;
pub mod storage;
pub mod tss;
pub mod unstuck;
pub mod util;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

/// Package version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Package name
pub const PACKAGE_NAME: &str = env!("CARGO_PKG_NAME");

/// The default capacity of the application signalling channel and of the
/// queues between the chain clients and the observer.
pub const BIFROST_CHANNEL_CAPACITY: usize = 1024;
