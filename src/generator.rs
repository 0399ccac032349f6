//! Transaction load generator.
//!
//! One worker per pool slot cycles through its assigned source accounts and,
//! for each, every sink account, sampling a (source shard, destination
//! shard) pair per the configured weights and issuing a non-blocking
//! transfer. Stop is cooperative: a shared flag polled at iteration
//! boundaries; in-flight wallet calls are never cancelled.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use color_eyre::eyre::{bail, Result};
use log::{debug, info, warn};
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

use crate::accounts::{AccountRegistry, SendOptions};
use crate::config::Config;
use crate::pool::{TaskHandle, WorkerPool};
use crate::rpc::NodeApi;
use crate::txlog::{TxLogWriter, TxRecord};

/// Same-shard pairs are resampled this many times under cross-shard-only
/// before the iteration is skipped with a warning
const CROSS_SHARD_ATTEMPTS: usize = 10;

/// Per-(address, shard) nonce assignment.
///
/// The local counter only moves forward; when the network-visible nonce is
/// ahead (another sender, or a restart), the counter resynchronizes to it
/// before assigning. Within one process a nonce value is never handed out
/// twice for the same (address, shard).
#[derive(Default)]
pub struct NonceTracker {
    inner: Mutex<HashMap<(String, u32), u64>>,
}

impl NonceTracker {
    /// Assign the next nonce, resyncing against `network` when it is ahead
    pub fn next(&self, address: &str, shard: u32, network: Option<u64>) -> u64 {
        let mut map = self.inner.lock().expect("nonce lock poisoned");
        let entry = map.entry((address.to_string(), shard)).or_insert(0);
        if let Some(n) = network {
            if n > *entry {
                debug!("nonce resync for {} shard {}: {} -> {}", address, shard, *entry, n);
                *entry = n;
            }
        }
        let nonce = *entry;
        *entry += 1;
        nonce
    }
}

/// Aggregated worker results
#[derive(Debug, Clone, Copy, Default)]
pub struct GeneratorStats {
    /// Transfer calls issued (successful or not)
    pub issued: u64,
    /// Issued calls that returned an error
    pub errors: u64,
    /// Iterations skipped because no cross-shard pair could be sampled
    pub skipped: u64,
}

impl GeneratorStats {
    fn merge(&mut self, other: GeneratorStats) {
        self.issued += other.issued;
        self.errors += other.errors;
        self.skipped += other.skipped;
    }
}

/// Cooperative, counted transaction generator
pub struct Generator {
    registry: Arc<AccountRegistry>,
    rpc: Arc<dyn NodeApi>,
    log: Arc<TxLogWriter>,
    config: Config,
    running: Arc<AtomicBool>,
    /// Remaining transfer-call budget, when a maximum is configured
    budget: Option<Arc<Mutex<u64>>>,
    nonces: Arc<NonceTracker>,
    handles: Vec<TaskHandle<GeneratorStats>>,
}

impl Generator {
    pub fn new(
        registry: Arc<AccountRegistry>,
        rpc: Arc<dyn NodeApi>,
        log: Arc<TxLogWriter>,
        config: &Config,
    ) -> Self {
        Self {
            registry,
            rpc,
            log,
            config: config.clone(),
            running: Arc::new(AtomicBool::new(false)),
            budget: config
                .generator
                .max_transactions
                .map(|max| Arc::new(Mutex::new(max))),
            nonces: Arc::new(NonceTracker::default()),
            handles: Vec::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Spawn one worker per pool slot. Sources are partitioned round-robin
    /// across workers; every worker sees all sinks.
    pub fn start(&mut self, pool: &WorkerPool, sources: &[String], sinks: &[String]) -> Result<()> {
        if self.is_running() {
            bail!("generator is already running");
        }
        if sources.is_empty() || sinks.is_empty() {
            bail!("generator needs at least one source and one sink account");
        }

        let source_dist = WeightedIndex::new(&self.config.generator.source_shard_weights)
            .map_err(|e| color_eyre::eyre::eyre!("bad source shard weights: {}", e))?;
        let sink_dist = WeightedIndex::new(&self.config.generator.sink_shard_weights)
            .map_err(|e| color_eyre::eyre::eyre!("bad sink shard weights: {}", e))?;

        self.running.store(true, Ordering::Release);

        let mut partitions: Vec<Vec<String>> = vec![Vec::new(); pool.threads()];
        let slots = partitions.len();
        for (i, source) in sources.iter().enumerate() {
            partitions[i % slots].push(source.clone());
        }
        partitions.retain(|p| !p.is_empty());

        info!(
            "Starting generator: {} workers, {} sources, {} sinks{}",
            partitions.len(),
            sources.len(),
            sinks.len(),
            match self.config.generator.max_transactions {
                Some(max) => format!(", max {} transactions", max),
                None => String::new(),
            }
        );

        for worker_sources in partitions {
            let ctx = WorkerCtx {
                registry: Arc::clone(&self.registry),
                rpc: Arc::clone(&self.rpc),
                log: Arc::clone(&self.log),
                config: self.config.clone(),
                running: Arc::clone(&self.running),
                budget: self.budget.clone(),
                nonces: Arc::clone(&self.nonces),
                sources: worker_sources,
                sinks: sinks.to_vec(),
                source_dist: source_dist.clone(),
                sink_dist: sink_dist.clone(),
            };
            self.handles.push(pool.submit(move || worker_loop(ctx)));
        }

        Ok(())
    }

    /// Flip the stop flag and join outstanding workers
    pub fn stop(&mut self) -> GeneratorStats {
        self.running.store(false, Ordering::Release);
        self.join()
    }

    /// Join workers without signalling stop; returns once every worker has
    /// exited (for counted runs this is budget exhaustion).
    pub fn join(&mut self) -> GeneratorStats {
        let mut stats = GeneratorStats::default();
        for handle in self.handles.drain(..) {
            match handle.join() {
                Ok(worker_stats) => stats.merge(worker_stats),
                Err(e) => warn!("generator worker lost: {}", e),
            }
        }
        self.running.store(false, Ordering::Release);
        info!(
            "Generator finished: {} issued, {} errors, {} skipped",
            stats.issued, stats.errors, stats.skipped
        );
        stats
    }
}

struct WorkerCtx {
    registry: Arc<AccountRegistry>,
    rpc: Arc<dyn NodeApi>,
    log: Arc<TxLogWriter>,
    config: Config,
    running: Arc<AtomicBool>,
    budget: Option<Arc<Mutex<u64>>>,
    nonces: Arc<NonceTracker>,
    sources: Vec<String>,
    sinks: Vec<String>,
    source_dist: WeightedIndex<u32>,
    sink_dist: WeightedIndex<u32>,
}

fn worker_loop(ctx: WorkerCtx) -> GeneratorStats {
    let mut rng = rand::thread_rng();
    let mut stats = GeneratorStats::default();

    'outer: while ctx.running.load(Ordering::Acquire) {
        for source in &ctx.sources {
            for sink in &ctx.sinks {
                if !ctx.running.load(Ordering::Acquire) {
                    break 'outer;
                }

                let Some((from_shard, to_shard)) = sample_shard_pair(
                    &mut rng,
                    &ctx.source_dist,
                    &ctx.sink_dist,
                    ctx.config.generator.cross_shard_only,
                ) else {
                    warn!(
                        "no cross-shard pair after {} attempts; skipping iteration",
                        CROSS_SHARD_ATTEMPTS
                    );
                    stats.skipped += 1;
                    continue;
                };

                let (from_address, to_address) =
                    match (ctx.registry.get(source), ctx.registry.get(sink)) {
                        (Some(from), Some(to)) => (from.address, to.address),
                        _ => {
                            warn!(
                                "source '{}' or sink '{}' left the registry; skipping",
                                source, sink
                            );
                            stats.skipped += 1;
                            continue;
                        }
                    };

                // Claim budget immediately before the transfer call so a
                // configured maximum bounds calls issued; sampling and
                // lookup skips spend nothing
                if let Some(budget) = &ctx.budget {
                    let mut remaining = budget.lock().expect("budget lock poisoned");
                    if *remaining == 0 {
                        ctx.running.store(false, Ordering::Release);
                        break 'outer;
                    }
                    *remaining -= 1;
                }

                issue_transfer(
                    &ctx,
                    source,
                    sink,
                    from_address,
                    to_address,
                    from_shard,
                    to_shard,
                    &mut stats,
                );
            }
        }
    }

    stats
}

#[allow(clippy::too_many_arguments)]
fn issue_transfer(
    ctx: &WorkerCtx,
    source: &str,
    sink: &str,
    from_address: String,
    to_address: String,
    from_shard: u32,
    to_shard: u32,
    stats: &mut GeneratorStats,
) {
    let gen = &ctx.config.generator;

    let nonce = gen.enforce_nonce.then(|| {
        // Resync when the network has moved past our local counter
        let network = ctx.rpc.transaction_count(from_shard, &from_address).ok();
        ctx.nonces.next(&from_address, from_shard, network)
    });

    let mut options = SendOptions::from_config(&ctx.config);
    options.nonce = nonce;

    stats.issued += 1;
    let result = ctx
        .registry
        .send(source, sink, from_shard, to_shard, gen.amount, &options);

    let record = TxRecord {
        from: from_address,
        to: to_address,
        from_shard,
        to_shard,
        amount: gen.amount,
        gas_price: gen.gas_price,
        gas_limit: gen.gas_limit,
        nonce,
        timestamp: Utc::now(),
        hash: result.as_ref().ok().cloned(),
        error: result.as_ref().err().map(|e| format!("{:#}", e)),
    };
    if result.is_err() {
        stats.errors += 1;
    }

    if let Err(e) = ctx.log.append(&record) {
        warn!("failed to log transaction record: {}", e);
    }
}

/// Sample a shard pair per the configured weights. Under cross-shard-only a
/// same-shard pair is resampled a bounded number of times; `None` when no
/// distinct pair was found.
fn sample_shard_pair<R: Rng>(
    rng: &mut R,
    source_dist: &WeightedIndex<u32>,
    sink_dist: &WeightedIndex<u32>,
    cross_shard_only: bool,
) -> Option<(u32, u32)> {
    for _ in 0..CROSS_SHARD_ATTEMPTS {
        let from = source_dist.sample(rng) as u32;
        let to = sink_dist.sample(rng) as u32;
        if !cross_shard_only || from != to {
            return Some((from, to));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::sample_config;
    use crate::test_support::{MockRpc, MockWallet};
    use rand::rngs::mock::StepRng;

    #[test]
    fn test_budget_not_spent_on_skipped_iterations() {
        let mut config = sample_config();
        config.generator.max_transactions = Some(4);
        config.generator.threads = 2;

        let wallet = Arc::new(MockWallet::default());
        let rpc = Arc::new(MockRpc::default());
        let registry = Arc::new(crate::accounts::AccountRegistry::new(
            Arc::clone(&wallet) as Arc<dyn crate::wallet::WalletApi>,
            Arc::clone(&rpc) as Arc<dyn crate::rpc::NodeApi>,
            &config,
        ));
        registry.create("alice").unwrap();
        registry.create("bob").unwrap();

        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(TxLogWriter::open(&dir.path().join("tx.log"), 1000).unwrap());

        let pool = WorkerPool::new(config.generator.threads).unwrap();
        let mut generator = Generator::new(Arc::clone(&registry), rpc, log, &config);
        // "ghost" never enters the registry; its worker skips every
        // iteration and must not consume the counted budget
        generator
            .start(
                &pool,
                &["alice".to_string(), "ghost".to_string()],
                &["bob".to_string()],
            )
            .unwrap();
        let stats = generator.join();

        assert_eq!(stats.issued, 4);
        assert_eq!(wallet.transfer_attempts(), 4);
        assert!(stats.skipped > 0);
    }

    #[test]
    fn test_nonce_monotonic_sequential() {
        let tracker = NonceTracker::default();
        assert_eq!(tracker.next("addr", 0, None), 0);
        assert_eq!(tracker.next("addr", 0, None), 1);
        // Other shard has its own chain
        assert_eq!(tracker.next("addr", 1, None), 0);
    }

    #[test]
    fn test_nonce_resyncs_forward_only() {
        let tracker = NonceTracker::default();
        tracker.next("addr", 0, None); // 0
        // Network ahead: jump forward
        assert_eq!(tracker.next("addr", 0, Some(10)), 10);
        // Network behind: never move backwards
        assert_eq!(tracker.next("addr", 0, Some(3)), 11);
    }

    #[test]
    fn test_nonce_unique_under_concurrency() {
        let tracker = Arc::new(NonceTracker::default());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let tracker = Arc::clone(&tracker);
            handles.push(std::thread::spawn(move || {
                (0..100)
                    .map(|_| tracker.next("addr", 0, None))
                    .collect::<Vec<u64>>()
            }));
        }

        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().expect("worker panicked"))
            .collect();
        all.sort_unstable();
        all.dedup();
        // 8 threads x 100 assignments, no value reused
        assert_eq!(all.len(), 800);
    }

    #[test]
    fn test_sample_rejects_same_shard_pairs() {
        // Both weights pinned to shard 0: cross-shard sampling must give up
        let dist = WeightedIndex::new([1u32, 0]).unwrap();
        let mut rng = StepRng::new(0, 1);
        assert_eq!(sample_shard_pair(&mut rng, &dist, &dist, true), None);
    }

    #[test]
    fn test_sample_disjoint_weights_always_cross_shard() {
        let source = WeightedIndex::new([1u32, 0]).unwrap();
        let sink = WeightedIndex::new([0u32, 1]).unwrap();
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            assert_eq!(
                sample_shard_pair(&mut rng, &source, &sink, true),
                Some((0, 1))
            );
        }
    }

    #[test]
    fn test_same_shard_allowed_without_cross_only() {
        let dist = WeightedIndex::new([1u32, 0]).unwrap();
        let mut rng = StepRng::new(0, 1);
        assert_eq!(sample_shard_pair(&mut rng, &dist, &dist, false), Some((0, 0)));
    }
}
