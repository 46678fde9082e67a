//! The rolling gas price estimate of one chain client.

use std::collections::VecDeque;

const GWEI: u128 = 1_000_000_000;

/// Tracks the gas price of a chain over a window of recent blocks and
/// decides when a new network fee should be reported to the ledger.
///
/// Each non-empty block contributes the median gas price of its
/// transactions. Once the window holds `capacity` samples the estimate
/// becomes the median of those medians, rounded up to a multiple of the
/// resolution. Until then the configured default stays in place.
#[derive(Debug, Clone)]
pub struct GasPriceOracle {
    window: VecDeque<u128>,
    capacity: usize,
    resolution: u128,
    gas_price: u128,
    last_reported: Option<u128>,
}

impl GasPriceOracle {
    /// Create an oracle with a window of `capacity` blocks that rounds to
    /// `resolution` wei and starts at `default_gas_price` wei.
    pub fn new(capacity: usize, resolution: u128, default_gas_price: u128) -> Self {
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            resolution: resolution.max(1),
            gas_price: default_gas_price,
            last_reported: None,
        }
    }

    /// Record the gas prices paid by the transactions of one block.
    /// Returns whether the estimate was recomputed.
    pub fn observe_block(&mut self, gas_prices: &[u128]) -> bool {
        let Some(block_median) = median(gas_prices) else {
            return false;
        };

        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(block_median);

        if self.window.len() < self.capacity {
            return false;
        }

        let medians: Vec<u128> = self.window.iter().copied().collect();
        if let Some(estimate) = median(&medians) {
            self.gas_price = round_up(estimate, self.resolution);
        }
        true
    }

    /// The current estimate in wei.
    pub fn gas_price(&self) -> u128 {
        self.gas_price
    }

    /// The number of blocks currently in the window.
    pub fn samples(&self) -> usize {
        self.window.len()
    }

    /// The estimate, if it should be reported. The first estimate is always
    /// reported; later ones only when they moved by more than one resolution
    /// step since the last report.
    pub fn fee_to_report(&self) -> Option<u128> {
        if self.window.len() < self.capacity || self.gas_price == 0 {
            return None;
        }
        match self.last_reported {
            Some(last) if last.abs_diff(self.gas_price) <= self.resolution => None,
            _ => Some(self.gas_price),
        }
    }

    /// Record that the current estimate was reported.
    pub fn mark_reported(&mut self) {
        self.last_reported = Some(self.gas_price);
    }

    /// The last estimate reported to the ledger, in wei.
    pub fn last_reported(&self) -> Option<u128> {
        self.last_reported
    }

    /// The current estimate in gwei, rounded up.
    pub fn network_fee_rate_gwei(&self) -> u64 {
        let gwei = self.gas_price.div_ceil(GWEI);
        u64::try_from(gwei).unwrap_or(u64::MAX)
    }
}

/// The median of `values`. Even sized inputs average the two middle values.
pub fn median(values: &[u128]) -> Option<u128> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid])
    } else {
        let (low, high) = (sorted[mid - 1], sorted[mid]);
        Some(low + (high - low) / 2)
    }
}

/// Round `value` up to the next multiple of `resolution`.
pub fn round_up(value: u128, resolution: u128) -> u128 {
    if resolution == 0 {
        return value;
    }
    value.div_ceil(resolution).saturating_mul(resolution)
}
