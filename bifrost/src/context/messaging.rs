//! This module contains types related to the application's internal
//! messaging via the [`Context`].
//!
//! [`Context`]: super::Context

use ledger::chain::Chain;
use ledger::tx::TxId;

/// Signals that can be sent within the bridge binary.
#[derive(Debug, Clone, PartialEq)]
pub enum BifrostSignal {
    /// Send a command to the application.
    Command(BifrostCommand),
    /// Signal an event to the application.
    Event(BifrostEvent),
}

/// Commands that can be sent on the signalling channel.
#[derive(Debug, Clone, PartialEq)]
pub enum BifrostCommand {
    /// Report the solvency of every vault on the chain now, regardless of
    /// the block schedule. Sent by operators un-halting a chain.
    ForceSolvencyReport(Chain),
}

/// Events that can be received on the signalling channel.
#[derive(Debug, Clone, PartialEq)]
pub enum BifrostEvent {
    /// A block was scanned.
    BlockScanned {
        /// The chain of the block.
        chain: Chain,
        /// The height of the block.
        height: u64,
    },
    /// Observations were accepted by the ledger.
    ObservationsSubmitted {
        /// The chain the observations are for.
        chain: Chain,
        /// The number of observations.
        count: usize,
        /// Whether the observations were final.
        finalised: bool,
    },
    /// An outbound was signed and broadcast.
    OutboundBroadcast {
        /// The chain of the outbound.
        chain: Chain,
        /// The hash of the broadcast transaction.
        tx_id: TxId,
    },
    /// A solvency report was emitted.
    SolvencyReported {
        /// The chain of the vaults.
        chain: Chain,
        /// The height of the report.
        height: u64,
    },
    /// A stuck transaction was replaced.
    UnstuckRebroadcast {
        /// The chain of the transaction.
        chain: Chain,
        /// The hash of the replaced transaction.
        replaced: TxId,
        /// The hash of the replacement.
        tx_id: TxId,
    },
}

impl From<BifrostCommand> for BifrostSignal {
    fn from(command: BifrostCommand) -> Self {
        BifrostSignal::Command(command)
    }
}

impl From<BifrostEvent> for BifrostSignal {
    fn from(event: BifrostEvent) -> Self {
        BifrostSignal::Event(event)
    }
}
