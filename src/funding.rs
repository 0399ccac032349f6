//! Funding orchestrator.
//!
//! Distributes an initial balance to a batch of target accounts without
//! serializing every transfer through one sender nonce: targets are split
//! into groups, each group is funded by a transient middleman account, and
//! the middlemen run in parallel on the worker pool. Each middleman is
//! drained and deleted before the call returns.

use std::sync::Arc;

use chrono::Utc;
use color_eyre::eyre::{bail, Context, Result};
use log::{info, warn};

use crate::accounts::{AccountRegistry, SendOptions};
use crate::config::Config;
use crate::pool::WorkerPool;

/// Outcome of one funding call
#[derive(Debug, Clone, Default)]
pub struct FundingSummary {
    pub targets_funded: usize,
    pub targets_failed: usize,
    pub middlemen_used: usize,
    pub transfers_issued: usize,
}

/// Middleman fan-out funder
pub struct Funder {
    registry: Arc<AccountRegistry>,
    config: Config,
}

impl Funder {
    pub fn new(registry: Arc<AccountRegistry>, config: &Config) -> Self {
        Self {
            registry,
            config: config.clone(),
        }
    }

    /// Fund every target account with `amount_each` on `shard`.
    ///
    /// Fails fast, before issuing any transfer, when no registry account
    /// meets the minimum source balance on the requested shard.
    pub fn fund_accounts(
        &self,
        pool: &WorkerPool,
        targets: &[String],
        shard: u32,
        amount_each: f64,
    ) -> Result<FundingSummary> {
        if targets.is_empty() {
            return Ok(FundingSummary::default());
        }

        let sources = self.select_sources(targets, shard)?;
        info!(
            "Funding {} targets on shard {} from {} source accounts",
            targets.len(),
            shard,
            sources.len()
        );

        // Bounded middleman set, one nonce chain per group
        let middleman_count = targets.len().min(pool.threads()).max(1);
        let groups = split_round_robin(targets, middleman_count);

        let run_tag = Utc::now().timestamp();

        let mut summary = FundingSummary::default();
        let mut middlemen: Vec<(String, String)> = Vec::with_capacity(groups.len());

        // Create and seed middlemen serially, rotating over the sources. A
        // failed seed unwinds the middlemen created so far: seeded balances
        // are returned and keys removed before the error propagates, so no
        // middleman outlives this call.
        if let Err(e) = self.seed_middlemen(
            &groups,
            &sources,
            shard,
            amount_each,
            run_tag,
            &mut middlemen,
            &mut summary,
        ) {
            self.drain_middlemen(&middlemen, shard, &mut summary);
            return Err(e);
        }
        summary.middlemen_used = middlemen.len();

        // Fan out group funding in parallel, one task per middleman
        let tasks: Vec<_> = middlemen
            .iter()
            .zip(groups)
            .map(|((middleman, _), group)| {
                let registry = Arc::clone(&self.registry);
                let middleman = middleman.clone();
                let options = SendOptions::from_config(&self.config);
                move || {
                    let mut funded = 0usize;
                    let mut failed = 0usize;
                    for target in &group {
                        match registry.send(&middleman, target, shard, shard, amount_each, &options)
                        {
                            Ok(_) => funded += 1,
                            Err(e) => {
                                warn!("funding {} from {} failed: {}", target, middleman, e);
                                failed += 1;
                            }
                        }
                    }
                    (funded, failed)
                }
            })
            .collect();

        for result in pool.run_all(tasks) {
            let (funded, failed) = result?;
            summary.targets_funded += funded;
            summary.targets_failed += failed;
            summary.transfers_issued += funded;
        }

        self.drain_middlemen(&middlemen, shard, &mut summary);

        info!(
            "Funding complete: {}/{} targets funded via {} middlemen",
            summary.targets_funded,
            targets.len(),
            summary.middlemen_used
        );
        Ok(summary)
    }

    /// Create one middleman per group and seed it with its group total plus
    /// gas overhead. Each middleman is pushed into `middlemen` before its
    /// seed transfer, so the caller can unwind a partially seeded set.
    #[allow(clippy::too_many_arguments)]
    fn seed_middlemen(
        &self,
        groups: &[Vec<String>],
        sources: &[String],
        shard: u32,
        amount_each: f64,
        run_tag: i64,
        middlemen: &mut Vec<(String, String)>,
        summary: &mut FundingSummary,
    ) -> Result<()> {
        let gas_overhead = self.config.funding.gas_overhead;

        for (i, group) in groups.iter().enumerate() {
            let name = format!("mm-{}-{}", run_tag, i);
            let source = sources[i % sources.len()].clone();

            self.registry
                .create(&name)
                .with_context(|| format!("Failed to create middleman '{}'", name))?;
            middlemen.push((name.clone(), source.clone()));

            let group_total = amount_each * group.len() as f64 + gas_overhead;

            let mut options = SendOptions::from_config(&self.config);
            options.retries = 1;
            // Middleman funds must be visible before it can fan out
            options.wait_for_confirmation = true;

            self.registry
                .send(&source, &name, shard, shard, group_total, &options)
                .with_context(|| format!("Failed to seed middleman '{}'", name))?;
            summary.transfers_issued += 1;
        }
        Ok(())
    }

    /// Pick registry accounts whose shard balance clears the configured
    /// minimum. Fatal when none qualifies: this is a precondition, not a
    /// condition to retry.
    fn select_sources(&self, targets: &[String], shard: u32) -> Result<Vec<String>> {
        let minimum = self.config.funding.min_source_balance;
        let mut sources = Vec::new();

        for account in self.registry.snapshot() {
            if targets.contains(&account.name) || account.name.starts_with("mm-") {
                continue;
            }
            let balances = self.registry.balance(&account.name)?;
            let qualifies = balances
                .iter()
                .any(|b| b.shard == shard && b.amount >= minimum);
            if qualifies {
                sources.push(account.name);
            }
        }

        if sources.is_empty() {
            bail!(
                "no account in the local registry holds at least {} on shard {}; \
                 cannot fund {} targets",
                minimum,
                shard,
                targets.len()
            );
        }
        Ok(sources)
    }

    /// Return each middleman's remaining balance and delete its key. Drain
    /// failures are logged; the middleman is removed regardless so the
    /// transient lifecycle stays bounded to this call.
    fn drain_middlemen(
        &self,
        middlemen: &[(String, String)],
        shard: u32,
        summary: &mut FundingSummary,
    ) {
        for (middleman, source) in middlemen {
            let refund_to = self
                .config
                .funding
                .refund_address
                .clone()
                .unwrap_or_else(|| source.clone());

            match self.registry.balance(middleman) {
                Ok(balances) => {
                    let remaining = balances
                        .iter()
                        .find(|b| b.shard == shard)
                        .map(|b| b.amount)
                        .unwrap_or(0.0);
                    let drainable = remaining - self.config.funding.gas_overhead;
                    if drainable > 0.0 {
                        let options = SendOptions::from_config(&self.config);
                        match self
                            .registry
                            .send(middleman, &refund_to, shard, shard, drainable, &options)
                        {
                            Ok(_) => summary.transfers_issued += 1,
                            Err(e) => warn!("draining middleman '{}' failed: {}", middleman, e),
                        }
                    }
                }
                Err(e) => warn!("balance query for middleman '{}' failed: {}", middleman, e),
            }

            if let Err(e) = self.registry.remove(&[middleman.clone()], None) {
                warn!("removing middleman '{}' failed: {}", middleman, e);
            }
        }
    }
}

/// Split items into `n` round-robin groups, dropping empty groups
fn split_round_robin(items: &[String], n: usize) -> Vec<Vec<String>> {
    let mut groups = vec![Vec::new(); n.max(1)];
    let count = groups.len();
    for (i, item) in items.iter().enumerate() {
        groups[i % count].push(item.clone());
    }
    groups.retain(|g| !g.is_empty());
    groups
}
