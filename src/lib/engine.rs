//! Bulk transaction broadcast engine.
//!
//! Every identity runs its own loop: seed the nonce from the remote account,
//! then repeatedly sign `batch_size` transactions with consecutive nonces,
//! submit them all concurrently and wait for every submission to finish before
//! moving on to the next nonce range.

use crate::client::{ClientError, SubmissionClient};
use crate::config::{ConfigError, NoncePolicy, SenderConfig};
use crate::identity::Identity;
use crate::shard::Address;
use crate::signer::sign_transaction;
use crate::targets::{HostTable, ProxyPool, TargetError, TargetTable};
use crate::Transaction;
use futures::future::join_all;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Interval between two progress lines of the stats reporter.
pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(10);

/// Errors that stop a single identity before it sends anything.
#[derive(Debug, Error)]
pub enum SeedError {
    #[error("no API host for {address}: {source}")]
    Host {
        address: Address,
        source: TargetError,
    },

    #[error("failed to fetch account {address} from {host}: {source}")]
    FetchAccount {
        address: Address,
        host: String,
        source: ClientError,
    },

    #[error("identity loop for {address} aborted: {source}")]
    Aborted { address: Address, source: JoinError },
}

/// Counters shared by every identity loop.
#[derive(Debug, Default)]
pub struct SenderStats {
    pub submitted: AtomicU64,
    pub accepted: AtomicU64,
    pub rejected: AtomicU64,
    pub errors: AtomicU64,
    pub batches: AtomicU64,
}

impl SenderStats {
    fn record(&self, outcome: &BatchOutcome) {
        self.submitted.fetch_add(outcome.size, Ordering::Relaxed);
        self.accepted.fetch_add(outcome.accepted, Ordering::Relaxed);
        self.rejected.fetch_add(outcome.rejected, Ordering::Relaxed);
        self.errors
            .fetch_add(outcome.network_errors + outcome.local_errors, Ordering::Relaxed);
        self.batches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn log_progress(&self, elapsed: Duration) {
        let submitted = self.submitted.load(Ordering::Relaxed);
        let tps = if elapsed.as_secs_f64() > 0.0 {
            submitted as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        info!(
            elapsed_secs = elapsed.as_secs(),
            submitted,
            accepted = self.accepted.load(Ordering::Relaxed),
            rejected = self.rejected.load(Ordering::Relaxed),
            errors = self.errors.load(Ordering::Relaxed),
            batches = self.batches.load(Ordering::Relaxed),
            tps = %format!("{tps:.0}"),
            "progress"
        );
    }
}

/// Tally of one batch. Every dispatched submission lands in exactly one bucket.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub first_nonce: u64,
    pub size: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub network_errors: u64,
    /// Transactions that could not be built, signed or joined.
    pub local_errors: u64,
}

impl BatchOutcome {
    pub fn failures(&self) -> u64 {
        self.rejected + self.network_errors + self.local_errors
    }

    pub fn is_complete(&self) -> bool {
        self.accepted + self.failures() == self.size
    }
}

/// Summary of one identity's run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentityReport {
    pub address: Address,
    pub host: String,
    pub start_nonce: u64,
    /// First nonce the next batch would have used.
    pub next_nonce: u64,
    pub batches: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub network_errors: u64,
    pub local_errors: u64,
}

impl IdentityReport {
    fn record(&mut self, outcome: &BatchOutcome) {
        self.batches += 1;
        self.accepted += outcome.accepted;
        self.rejected += outcome.rejected;
        self.network_errors += outcome.network_errors;
        self.local_errors += outcome.local_errors;
    }
}

type Submission = (u64, Address, Option<String>, Result<String, ClientError>);

pub struct Engine<C> {
    config: Arc<SenderConfig>,
    client: Arc<C>,
    targets: Arc<TargetTable>,
    proxies: Arc<ProxyPool>,
    hosts: Arc<HostTable>,
    stats: Arc<SenderStats>,
}

impl<C> Clone for Engine<C> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            client: Arc::clone(&self.client),
            targets: Arc::clone(&self.targets),
            proxies: Arc::clone(&self.proxies),
            hosts: Arc::clone(&self.hosts),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<C: SubmissionClient> Engine<C> {
    /// Validates the whole setup up front so that configuration problems abort
    /// the run before any identity starts sending.
    pub fn new(
        config: SenderConfig,
        client: C,
        targets: TargetTable,
        proxies: ProxyPool,
        hosts: HostTable,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        targets.validate()?;

        if let Some(host) = &config.api_host {
            if proxies.is_empty() && client.routes_through_proxy(host) {
                return Err(ConfigError::ProxyRequired(host.clone()));
            }
        }

        Ok(Self {
            config: Arc::new(config),
            client: Arc::new(client),
            targets: Arc::new(targets),
            proxies: Arc::new(proxies),
            hosts: Arc::new(hosts),
            stats: Arc::new(SenderStats::default()),
        })
    }

    pub fn stats(&self) -> &SenderStats {
        &self.stats
    }

    /// Runs one loop per identity until `cancel` fires (or `max_batches` is
    /// reached) and returns each identity's result in input order.
    pub async fn run(
        &self,
        identities: Vec<Identity>,
        cancel: CancellationToken,
    ) -> Vec<Result<IdentityReport, SeedError>> {
        let start = Instant::now();
        let reporter = self.spawn_reporter(start, cancel.clone());

        let handles = identities.into_iter().enumerate().map(|(index, identity)| {
            let engine = self.clone();
            let cancel = cancel.clone();
            let address = identity.address();
            let handle =
                tokio::spawn(async move { engine.run_identity(index, identity, cancel).await });
            async move {
                match handle.await {
                    Ok(result) => result,
                    Err(source) => Err(SeedError::Aborted { address, source }),
                }
            }
        });

        let results = join_all(handles).await;
        reporter.abort();
        self.stats.log_progress(start.elapsed());

        for result in &results {
            if let Err(e) = result {
                error!("{e}");
            }
        }
        results
    }

    fn spawn_reporter(
        &self,
        start: Instant,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let stats = Arc::clone(&self.stats);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PROGRESS_INTERVAL);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => stats.log_progress(start.elapsed()),
                }
            }
        })
    }

    /// Seeds and runs the broadcast loop of a single identity.
    ///
    /// `index` decorrelates the random streams of identities sharing one seed.
    pub async fn run_identity(
        &self,
        index: usize,
        identity: Identity,
        cancel: CancellationToken,
    ) -> Result<IdentityReport, SeedError> {
        let span = info_span!("identity", sender = %identity.address(), shard = %identity.shard());
        self.broadcast_loop(index, identity, cancel)
            .instrument(span)
            .await
    }

    async fn broadcast_loop(
        &self,
        index: usize,
        identity: Identity,
        cancel: CancellationToken,
    ) -> Result<IdentityReport, SeedError> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed.wrapping_add(index as u64));
        let address = identity.address();

        let host = match &self.config.api_host {
            Some(host) => host.clone(),
            None => self
                .hosts
                .random_host(identity.shard(), &mut rng)
                .map_err(|source| SeedError::Host { address, source })?
                .to_string(),
        };
        info!(%host, key_file = %identity.source().display(), "using API host");

        let proxy = self.proxies.pick(&mut rng);
        let account = self
            .client
            .fetch_account(&host, &address, proxy.as_deref())
            .await
            .map_err(|source| SeedError::FetchAccount {
                address,
                host: host.clone(),
                source,
            })?;
        info!(nonce = account.nonce, balance = %account.balance, "seeded account");

        let batch_size = self.config.batch_size as u64;
        let identity = Arc::new(identity);
        let mut nonce = account.nonce;
        let mut report = IdentityReport {
            address,
            host: host.clone(),
            start_nonce: nonce,
            next_nonce: nonce,
            batches: 0,
            accepted: 0,
            rejected: 0,
            network_errors: 0,
            local_errors: 0,
        };

        loop {
            if cancel.is_cancelled() {
                info!(next_nonce = nonce, "stopping at user's signal");
                break;
            }
            if self.config.max_batches.map_or(false, |max| report.batches >= max) {
                break;
            }

            let Some(after_batch) = nonce.checked_add(batch_size) else {
                error!(next_nonce = nonce, batch_size, "nonce range exhausted, stopping");
                break;
            };

            let outcome = self.broadcast_batch(&identity, &host, nonce, &mut rng).await;
            self.stats.record(&outcome);
            report.record(&outcome);

            info!(
                first_nonce = outcome.first_nonce,
                accepted = outcome.accepted,
                rejected = outcome.rejected,
                network_errors = outcome.network_errors,
                local_errors = outcome.local_errors,
                "batch complete"
            );

            nonce = after_batch;
            if self.config.nonce_policy == NoncePolicy::Resync && outcome.failures() > 0 {
                nonce = self.resync(&host, &address, nonce, &mut rng).await;
            }
            report.next_nonce = nonce;
        }

        Ok(report)
    }

    /// Signs and dispatches `batch_size` transactions starting at `first_nonce`,
    /// then waits for all of them.
    pub async fn broadcast_batch(
        &self,
        identity: &Arc<Identity>,
        host: &str,
        first_nonce: u64,
        rng: &mut ChaCha8Rng,
    ) -> BatchOutcome {
        let end = first_nonce.saturating_add(self.config.batch_size as u64);
        let mut outcome = BatchOutcome {
            first_nonce,
            size: end - first_nonce,
            ..Default::default()
        };
        let mut in_flight: JoinSet<Submission> = JoinSet::new();

        for nonce in first_nonce..end {
            let receiver = match self.targets.receiver_for(
                identity.shard(),
                self.config.cross_shard_ratio,
                rng,
            ) {
                Ok(receiver) => receiver,
                Err(e) => {
                    error!(nonce, error = %e, "no receiver, skipping nonce");
                    outcome.local_errors += 1;
                    continue;
                }
            };

            let transaction = Transaction {
                nonce,
                sender: identity.address(),
                receiver,
                value: self.config.value.clone(),
                data: self.config.data.clone(),
                gas_price: self.config.gas_price,
                gas_limit: self.config.gas_limit(),
            };
            let signed = match sign_transaction(identity.as_ref(), transaction) {
                Ok(signed) => signed,
                Err(e) => {
                    error!(nonce, error = %e, "failed to sign transaction");
                    outcome.local_errors += 1;
                    continue;
                }
            };

            let proxy = self.proxies.pick(rng);
            let client = Arc::clone(&self.client);
            let host = host.to_string();
            in_flight.spawn(async move {
                let result = client
                    .submit_transaction(&host, &signed, proxy.as_deref())
                    .await;
                (nonce, receiver, proxy, result)
            });
        }

        while let Some(joined) = in_flight.join_next().await {
            match joined {
                Ok((nonce, receiver, _, Ok(tx_hash))) => {
                    outcome.accepted += 1;
                    debug!(nonce, %receiver, %tx_hash, "transaction sent");
                }
                Ok((nonce, receiver, proxy, Err(e))) => {
                    if e.is_rejection() {
                        outcome.rejected += 1;
                    } else {
                        outcome.network_errors += 1;
                    }
                    warn!(nonce, %receiver, proxy = proxy.as_deref().unwrap_or("-"), error = %e, "failed to send transaction");
                }
                Err(e) => {
                    outcome.local_errors += 1;
                    error!(error = %e, "submission task failed");
                }
            }
        }

        outcome
    }

    /// Rewinds to the remote nonce when the remote is behind the local counter.
    /// The remote nonce counts executed transactions only, so pending ones may be resent.
    async fn resync(&self, host: &str, address: &Address, local: u64, rng: &mut ChaCha8Rng) -> u64 {
        let proxy = self.proxies.pick(rng);
        match self
            .client
            .fetch_account(host, address, proxy.as_deref())
            .await
        {
            Ok(account) if account.nonce < local => {
                warn!(local, remote = account.nonce, "rewinding nonce to remote account");
                account.nonce
            }
            Ok(_) => local,
            Err(e) => {
                warn!(error = %e, "nonce resync failed, keeping local counter");
                local
            }
        }
    }
}
