use anyhow::{Context, Result};
use clap::Parser;
use lib::client::DEFAULT_PROXIED_HOSTS;
use lib::config::{read_payload, DEFAULT_GAS_LIMIT, DEFAULT_GAS_PRICE};
use lib::identity::load_identities;
use lib::{
    Engine, HostTable, HttpSubmissionClient, NoncePolicy, ProxyPool, SenderConfig, TargetTable,
};
use num_bigint::BigUint;
use regex::Regex;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[clap(version, about = "Signs and broadcasts transactions in bulk from every key in a directory")]
pub struct Cli {
    /// API endpoint to use. When unset, each key uses a host for its own shard.
    #[clap(long, env = "TX_SENDER_API")]
    pub api_endpoint: Option<String>,

    /// How many transactions each key sends concurrently per batch.
    #[clap(long, value_name = "UINT", default_value_t = 1)]
    pub tx_count: usize,

    /// File whose content is used as transaction data. Missing file means no data.
    #[clap(long, default_value = "./tx_data.txt")]
    pub tx_data_file: PathBuf,

    /// Newline-delimited list of HTTP proxies.
    #[clap(long, default_value = "./proxies.txt")]
    pub proxy_file: PathBuf,

    /// Directory holding one .pem key file per sender.
    #[clap(long, default_value = "./keys")]
    pub keys_path: PathBuf,

    /// JSON file of receivers per shard, replacing the built-in table.
    #[clap(long)]
    pub targets_file: Option<PathBuf>,

    /// Value sent with every transaction.
    #[clap(long, default_value = "1")]
    pub value: BigUint,

    #[clap(long, default_value_t = DEFAULT_GAS_PRICE)]
    pub gas_price: u64,

    /// Base gas limit; one unit per data byte is added on top.
    #[clap(long, default_value_t = DEFAULT_GAS_LIMIT)]
    pub gas_limit: u64,

    /// Probability of picking a receiver on another shard.
    #[clap(long, default_value_t = 0.0)]
    pub cross_shard_ratio: f64,

    /// After a batch with failures, rewind to the nonce the network reports.
    ///
    /// The reported nonce only counts executed transactions, so accepted but
    /// still pending nonces may be sent again.
    #[clap(long, default_value_t = false)]
    pub resync_on_failure: bool,

    /// Stop each key after this many batches instead of running until interrupted.
    #[clap(long, value_name = "UINT")]
    pub batches: Option<u64>,

    /// Seed for receiver, proxy and host selection.
    #[clap(long)]
    pub seed: Option<u64>,

    #[clap(long, value_name = "SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,

    /// Requests to hosts matching this pattern are routed through a proxy.
    #[clap(long, default_value = DEFAULT_PROXIED_HOSTS)]
    pub proxied_host_pattern: String,

    /// Log filter, e.g. `info` or `lib=debug,info`.
    #[clap(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,

    /// Do not use ANSI colors in log output.
    #[clap(long, default_value_t = false)]
    pub disable_ansi_color: bool,
}

#[tokio::main()]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        // Use a more compact, abbreviated log format
        .compact()
        // Display the thread ID an event was recorded on
        .with_thread_ids(true)
        .with_ansi(!cli.disable_ansi_color)
        .with_env_filter(EnvFilter::new(&cli.log_level))
        .finish()
        .init();

    let exit_code = match run(cli).await {
        Ok(()) => 0,
        Err(err) => {
            tracing::error!("{err:#}");
            1
        }
    };
    std::process::exit(exit_code);
}

async fn run(cli: Cli) -> Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), pid = std::process::id(), "starting tx sender");

    let data = read_payload(&cli.tx_data_file)?;
    if !data.is_empty() {
        info!(file = %cli.tx_data_file.display(), bytes = data.len(), "found tx data");
    }

    let proxies = ProxyPool::from_file(&cli.proxy_file)?;
    if !proxies.is_empty() {
        info!(file = %cli.proxy_file.display(), count = proxies.len(), "found proxies");
    }

    let targets = match &cli.targets_file {
        Some(path) => TargetTable::from_json_file(path)
            .with_context(|| format!("loading receivers from {}", path.display()))?,
        None => TargetTable::default(),
    };

    let identities = load_identities(&cli.keys_path)
        .with_context(|| format!("loading keys from {}", cli.keys_path.display()))?;
    info!(count = identities.len(), "found key files");

    let seed = cli.seed.unwrap_or_else(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default()
    });

    let config = SenderConfig {
        api_host: cli.api_endpoint,
        batch_size: cli.tx_count,
        value: cli.value,
        data,
        gas_price: cli.gas_price,
        base_gas_limit: cli.gas_limit,
        cross_shard_ratio: cli.cross_shard_ratio,
        nonce_policy: if cli.resync_on_failure {
            NoncePolicy::Resync
        } else {
            NoncePolicy::Advance
        },
        max_batches: cli.batches,
        seed,
    };

    let pattern = Regex::new(&cli.proxied_host_pattern)
        .with_context(|| format!("invalid proxied host pattern {}", cli.proxied_host_pattern))?;
    let client = HttpSubmissionClient::new(Duration::from_secs(cli.request_timeout_secs), pattern)
        .context("building HTTP client")?;

    let engine = Engine::new(config, client, targets, proxies, HostTable::default())?;

    let cancel = CancellationToken::new();
    tokio::spawn(handle_signals(cancel.clone()));

    info!(seed, "application is now running");
    let results = engine.run(identities, cancel).await;

    let failed = results.iter().filter(|r| r.is_err()).count();
    for report in results.iter().flatten() {
        info!(
            sender = %report.address,
            host = %report.host,
            batches = report.batches,
            nonces = %format!("{}..{}", report.start_nonce, report.next_nonce),
            accepted = report.accepted,
            rejected = report.rejected,
            errors = report.network_errors + report.local_errors,
            "sender finished"
        );
    }

    if failed == results.len() {
        anyhow::bail!("none of the {} senders could start", results.len());
    }
    if failed > 0 {
        warn!(failed, "some senders could not start");
    }
    Ok(())
}

/// First Ctrl-C / SIGTERM lets the current batches finish, the second exits.
async fn handle_signals(cancel: CancellationToken) {
    shutdown_signal().await;
    info!("terminating at user's signal, waiting for in-flight batches");
    cancel.cancel();

    shutdown_signal().await;
    warn!("second signal received, exiting immediately");
    std::process::exit(130);
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "cannot listen for SIGTERM, only Ctrl-C stops the sender");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
