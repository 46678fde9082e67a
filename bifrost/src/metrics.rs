//! A module for setting up metrics in the bridge
//!

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// The buckets used for metric histograms
const METRIC_BUCKETS: [f64; 9] = [1e-4, 1e-3, 1e-2, 0.1, 0.5, 1.0, 5.0, 20.0, f64::INFINITY];

/// The quantiles to use when rendering histograms
const METRIC_QUANTILES: [f64; 7] = [0.0, 0.5, 0.75, 0.9, 0.95, 0.99, 1.0];

/// All metrics recorded by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Metrics {
    /// Blocks scanned, labelled by chain.
    BlocksScannedTotal,
    /// Block scan failures, labelled by chain.
    BlockScanErrorsTotal,
    /// Re-orgs detected, labelled by chain.
    ReorgsTotal,
    /// The latest scanned height, labelled by chain.
    ScannedHeight,
    /// The current gas price estimate in wei, labelled by chain.
    GasPrice,
    /// Network fee reports posted, labelled by chain.
    NetworkFeesPostedTotal,
    /// Observations submitted, labelled by chain and finality.
    ObservationsSubmittedTotal,
    /// Submissions the observer gave up on, labelled by reason.
    SubmissionsDroppedTotal,
    /// Outbounds broadcast, labelled by chain.
    OutboundsBroadcastTotal,
    /// Outbounds skipped because they were already signed.
    OutboundsSkippedTotal,
    /// Failed keysign rounds, labelled by whether anyone was blamed.
    KeysignFailuresTotal,
    /// Time spent waiting for a signature.
    KeysignDurationSeconds,
    /// Solvency reports emitted, labelled by chain.
    SolvencyReportsTotal,
    /// Stuck transactions replaced, labelled by chain.
    UnstuckRebroadcastsTotal,
}

impl From<Metrics> for metrics::KeyName {
    fn from(value: Metrics) -> Self {
        let name: &'static str = value.into();
        metrics::KeyName::from_const_str(name)
    }
}

/// Set up a prometheus exporter for metrics.
pub fn setup_metrics(prometheus_exporter_endpoint: Option<SocketAddr>) {
    if let Some(addr) = prometheus_exporter_endpoint {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .add_global_label("app", crate::PACKAGE_NAME)
            .set_buckets(&METRIC_BUCKETS)
            .expect("received an empty slice of metric buckets")
            .set_quantiles(&METRIC_QUANTILES)
            .expect("received an empty slice of metric quantiles")
            .install()
            .expect("could not install the prometheus server");
    }

    metrics::gauge!(
        "build_info",
        "version" => crate::VERSION,
    )
    .set(1.0);
}
