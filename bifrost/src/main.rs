use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use bifrost::chain::evm_rpc::EvmRpcClient;
use bifrost::chain_client::ChainClient;
use bifrost::config::Settings;
use bifrost::context::BifrostContext;
use bifrost::context::Context;
use bifrost::error::Error;
use bifrost::ledger_client::LedgerClient;
use bifrost::observer::Observer;
use bifrost::observer::ObserverQueues;
use bifrost::outbound::OutboundSigner;
use bifrost::profile::EvmProfile;
use bifrost::storage::sled_store::SledStore;
use bifrost::tss::http::TssClient;
use bifrost::tss::TssInteract as _;
use bifrost::util::ApiFallbackClient;
use bifrost::BIFROST_CHANNEL_CAPACITY;
use cfg_if::cfg_if;
use clap::Parser;
use clap::ValueEnum;
use tokio::signal;
use tokio::sync::mpsc;

type Client<C> = ChainClient<C, ApiFallbackClient<EvmRpcClient>, EvmProfile>;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogOutputFormat {
    Json,
    Pretty,
}

/// Command line arguments for the bridge.
#[derive(Debug, Parser)]
#[clap(name = "Bifrost")]
struct BifrostArgs {
    /// Optional path to the configuration file. If not provided, it is expected
    /// that all parameters are provided via environment variables.
    #[clap(short = 'c', long, required = false)]
    config: Option<PathBuf>,

    #[clap(short = 'o', long = "output-format", default_value = "pretty")]
    output_format: Option<LogOutputFormat>,
}

#[tokio::main]
#[tracing::instrument(name = "bifrost")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse the command line arguments.
    let args = BifrostArgs::parse();

    // Configure the binary's stdout/err output based on the provided output format.
    let pretty = matches!(args.output_format, Some(LogOutputFormat::Pretty));
    bifrost::logging::setup_logging("info,bifrost=debug,ledger=debug", pretty);

    tracing::info!(version = bifrost::VERSION, "starting bifrost");

    // Load the configuration file and/or environment variables.
    let settings = Settings::new(args.config)?;
    bifrost::metrics::setup_metrics(settings.bifrost.prometheus_exporter_endpoint);

    let db = SledStore::open(&settings.bifrost.db_path)?;

    let context =
        BifrostContext::<_, ApiFallbackClient<LedgerClient>, TssClient>::init(settings, db)?;

    // Note that we must use `join` here instead of `select` as `select` would
    // immediately abort the remaining tasks on the first completion, which
    // deprives the other tasks of the opportunity to shut down gracefully.
    let _ = tokio::join!(
        // Our global termination signal watcher. This does not run using `run_checked`
        // as it sends its own shutdown signal.
        run_shutdown_signal_watcher(context.clone()),
        run_checked(run_bridge, &context),
    );

    Ok(())
}

/// A helper method that captures errors from the provided future and sends a
/// shutdown signal to the application if an error is encountered. This is needed
/// as otherwise the application would continue running indefinitely (since no
/// shutdown signal is sent automatically on error).
async fn run_checked<F, Fut, C>(f: F, ctx: &C) -> Result<(), Error>
where
    C: Context,
    F: FnOnce(C) -> Fut,
    Fut: std::future::Future<Output = Result<(), Error>>,
{
    if let Err(error) = f(ctx.clone()).await {
        tracing::error!(%error, "a fatal error occurred; shutting down the application");
        ctx.get_termination_handle().signal_shutdown();
        return Err(error);
    }

    Ok(())
}

/// Runs the shutdown-signal watcher. On Unix systems, this listens for SIGHUP,
/// SIGTERM, and SIGINT. On other systems, it listens for Ctrl-C.
#[tracing::instrument(skip(ctx), name = "shutdown-watcher")]
async fn run_shutdown_signal_watcher(ctx: impl Context) -> Result<(), Error> {
    let mut term = ctx.get_termination_handle();

    cfg_if! {
        if #[cfg(unix)] {
            let mut terminate = tokio::signal::unix::signal(signal::unix::SignalKind::terminate())?;
            let mut hangup = tokio::signal::unix::signal(signal::unix::SignalKind::hangup())?;
            let mut interrupt = tokio::signal::unix::signal(signal::unix::SignalKind::interrupt())?;

            tokio::select! {
                _ = term.wait_for_shutdown() => {
                    tracing::info!("termination signal received, signal watcher is shutting down");
                    return Ok(());
                },
                // SIGTERM (kill -15 "nice")
                _ = terminate.recv() => {
                    tracing::info!(signal = "SIGTERM", "received termination signal");
                },
                // SIGHUP (kill -1)
                _ = hangup.recv() => {
                    tracing::info!(signal = "SIGHUP", "received termination signal");
                },
                // Ctrl-C will be received as a SIGINT (kill -2)
                _ = interrupt.recv() => {
                    tracing::info!(signal = "SIGINT", "received termination signal");
                },
            }
        } else {
            tokio::select! {
                _ = term.wait_for_shutdown() => {
                    tracing::info!("termination signal received, signal watcher is shutting down");
                    return Ok(());
                },
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!(signal = "Ctrl+C", "received termination signal");
                }
            }
        }
    }

    // Send the shutdown signal to the rest of the application.
    tracing::info!("sending shutdown signal to the application");
    term.signal_shutdown();

    Ok(())
}

/// Build a chain client for every configured chain.
fn build_chain_clients<C>(ctx: &C) -> Result<Vec<Arc<Client<C>>>, Error>
where
    C: Context + 'static,
{
    let settings = ctx.config();
    if settings.chains.is_empty() {
        return Err(Error::NoChainsConfigured);
    }

    let mut clients = Vec::new();
    for (chain, config) in &settings.chains {
        let rpcs = config
            .rpc_endpoints
            .iter()
            .map(|endpoint| EvmRpcClient::new(*chain, endpoint.clone(), config.rpc_timeout))
            .collect::<Result<Vec<_>, _>>()?;
        let rpc = ApiFallbackClient::from_clients(rpcs)?;
        let profile = EvmProfile::new(*chain, config.chain_id);
        clients.push(Arc::new(ChainClient::new(ctx.clone(), rpc, profile, config.clone())));
    }
    Ok(clients)
}

/// Start the chain clients, then run the observer and the outbound signer
/// until shutdown.
#[tracing::instrument(skip_all, name = "bridge")]
async fn run_bridge<C>(ctx: C) -> Result<(), Error>
where
    C: Context + 'static,
{
    let clients = build_chain_clients(&ctx)?;

    let tss = ctx.get_tss_client();
    tss.start().await?;

    let (inbound_tx, inbound) = mpsc::channel(BIFROST_CHANNEL_CAPACITY);
    let (errata_tx, errata) = mpsc::channel(BIFROST_CHANNEL_CAPACITY);
    let (solvency_tx, solvency) = mpsc::channel(BIFROST_CHANNEL_CAPACITY);

    let mut heights = BTreeMap::new();
    for client in &clients {
        client.start(inbound_tx.clone(), errata_tx.clone(), solvency_tx.clone());
        heights.insert(client.get_chain(), client.height_receiver());
    }

    let observer = Observer::new(ctx.clone(), heights);
    let queues = ObserverQueues { inbound, errata, solvency };
    let outbound = OutboundSigner::new(ctx.clone(), clients.clone());

    let (observed, signed) = tokio::join!(
        observer.run(queues, ctx.get_termination_handle()),
        outbound.run(ctx.get_termination_handle()),
    );

    for client in &clients {
        client.stop().await;
    }
    if let Err(error) = tss.stop().await {
        tracing::warn!(%error, "could not stop the tss subsystem");
    }

    observed.and(signed)
}
