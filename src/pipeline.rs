//! Citation enrichment pipeline.
//!
//! Walks a [`Dataset`] in order with exactly one lookup in flight:
//!
//! 1. records that already reached a terminal status are left alone
//! 2. invalid titles are marked skipped without a request or a pause
//! 3. valid titles are looked up and the outcome recorded on the row
//! 4. after every request the pipeline sleeps a random pacing delay, longer
//!    while the provider keeps blocking us
//!
//! A failed lookup never stops the run. Cancellation stops new lookups
//! between records and cuts the pacing sleep short; the caller then saves
//! whatever was collected.

use crate::config::{BlockCooldown, DelayRange, RunConfig};
use crate::dataset::{self, Dataset, LookupStatus, Record};
use crate::error::Result;
use crate::lookup::{LookupClient, LookupOutcome};
use crate::title::is_valid_title;
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Counters for one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    /// Records visited this pass (excludes `already_done`)
    pub processed: usize,
    pub found: usize,
    pub not_found: usize,
    pub skipped: usize,
    pub errored: usize,
    pub blocked: usize,
    /// Lookups on records that already had a count, which was kept
    pub kept: usize,
    /// Records left untouched because a previous pass completed them
    pub already_done: usize,
    /// Pacing sleeps taken
    pub pauses: usize,
    /// Total time spent in pacing sleeps
    pub paced: Duration,
    /// Stopped early by cancellation
    pub interrupted: bool,
}

impl Summary {
    /// Lookups issued this pass.
    pub fn attempted(&self) -> usize {
        self.found + self.not_found + self.errored + self.blocked + self.kept
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "processed={} found={} not_found={} skipped={} errored={} blocked={} already_done={}",
            self.processed,
            self.found,
            self.not_found,
            self.skipped,
            self.errored,
            self.blocked,
            self.already_done
        )?;
        if self.interrupted {
            write!(f, " (interrupted)")?;
        }
        Ok(())
    }
}

pub struct EnrichmentPipeline<C> {
    client: C,
    delay_range: DelayRange,
    block_cooldown: BlockCooldown,
    checkpoint_every: usize,
    checkpoint_path: Option<PathBuf>,
    skip_completed: bool,
    consecutive_blocks: u32,
}

impl<C: LookupClient> EnrichmentPipeline<C> {
    /// Pipeline checkpointing to `config.output_path`.
    pub fn new(client: C, config: &RunConfig) -> Self {
        Self {
            client,
            delay_range: config.delay_range,
            block_cooldown: config.block_cooldown,
            checkpoint_every: config.checkpoint_every,
            checkpoint_path: Some(config.output_path.clone()),
            skip_completed: config.skip_completed,
            consecutive_blocks: 0,
        }
    }

    /// Keep results in memory only.
    pub fn without_checkpoints(mut self) -> Self {
        self.checkpoint_path = None;
        self
    }

    /// Run one pass over `dataset`.
    ///
    /// Only a failed checkpoint write is an error.
    pub async fn run(
        &mut self,
        dataset: &mut Dataset,
        cancel: &CancellationToken,
    ) -> Result<Summary> {
        let total = dataset.len();
        let mut summary = Summary::default();
        let mut since_checkpoint = 0usize;

        info!(
            total,
            min_delay_secs = self.delay_range.min().as_secs_f64(),
            max_delay_secs = self.delay_range.max().as_secs_f64(),
            "Starting citation enrichment"
        );

        for idx in 0..total {
            if cancel.is_cancelled() {
                warn!(row = idx + 1, total, "Interrupted, no further lookups");
                summary.interrupted = true;
                break;
            }

            let status = dataset.record(idx).map(Record::status).unwrap_or_default();
            if self.skip_completed && status.is_terminal() {
                summary.already_done += 1;
                continue;
            }

            summary.processed += 1;
            let looked_up = self.process_record(dataset, idx, &mut summary).await;

            since_checkpoint += 1;
            if self.checkpoint_every > 0 && since_checkpoint >= self.checkpoint_every {
                self.checkpoint(dataset, idx + 1)?;
                since_checkpoint = 0;
            }

            if looked_up && self.lookups_remain(dataset, idx + 1) {
                self.pace(cancel, &mut summary).await;
            }
        }

        info!(%summary, "Enrichment pass finished");
        Ok(summary)
    }

    /// Handle one record; returns whether a lookup was issued.
    async fn process_record(
        &mut self,
        dataset: &mut Dataset,
        idx: usize,
        summary: &mut Summary,
    ) -> bool {
        let row = idx + 1;
        let title = match dataset.title(idx) {
            Some(t) if is_valid_title(Some(t)) => t.to_owned(),
            other => {
                info!(row, title = other.unwrap_or(""), "Skipping invalid title");
                self.record_status(dataset, idx, LookupStatus::Skipped);
                summary.skipped += 1;
                return false;
            }
        };

        info!(row, title = %title, "Searching for citations");
        let outcome = self.client.lookup(&title).await;

        let changed = match outcome {
            LookupOutcome::Count(n) => {
                info!(row, citations = n, "Citations found");
                self.consecutive_blocks = 0;
                let changed = dataset.record_mut(idx).is_some_and(|r| r.set_found(n));
                if changed {
                    summary.found += 1;
                }
                changed
            }
            LookupOutcome::NotFound => {
                info!(row, "No results found");
                self.consecutive_blocks = 0;
                let changed = self.record_status(dataset, idx, LookupStatus::NotFound);
                if changed {
                    summary.not_found += 1;
                }
                changed
            }
            LookupOutcome::Transient(reason) => {
                warn!(row, title = %title, reason = %reason, "Lookup failed");
                self.consecutive_blocks = 0;
                let changed = self.record_status(dataset, idx, LookupStatus::Error);
                if changed {
                    summary.errored += 1;
                }
                changed
            }
            LookupOutcome::Blocked(reason) => {
                self.consecutive_blocks = self.consecutive_blocks.saturating_add(1);
                warn!(
                    row,
                    title = %title,
                    reason = %reason,
                    consecutive = self.consecutive_blocks,
                    "Blocked by search provider"
                );
                let changed = self.record_status(dataset, idx, LookupStatus::Blocked);
                if changed {
                    summary.blocked += 1;
                }
                changed
            }
        };

        if !changed {
            debug!(row, "Count already recorded, keeping it");
            summary.kept += 1;
        }
        true
    }

    fn record_status(&self, dataset: &mut Dataset, idx: usize, status: LookupStatus) -> bool {
        dataset
            .record_mut(idx)
            .is_some_and(|record| record.set_status(status))
    }

    /// Whether any record from `from` on will issue a lookup this pass.
    fn lookups_remain(&self, dataset: &Dataset, from: usize) -> bool {
        (from..dataset.len()).any(|idx| {
            let done = self.skip_completed
                && dataset
                    .record(idx)
                    .is_some_and(|r| r.status().is_terminal());
            !done && is_valid_title(dataset.title(idx))
        })
    }

    fn checkpoint(&self, dataset: &Dataset, through_row: usize) -> Result<()> {
        if let Some(path) = &self.checkpoint_path {
            dataset::save(dataset, path)?;
            info!(row = through_row, path = %path.display(), "Checkpoint saved");
        }
        Ok(())
    }

    /// Sleep a random pacing delay plus any block cooldown, waking early on
    /// cancellation.
    async fn pace(&self, cancel: &CancellationToken, summary: &mut Summary) {
        let cooldown = self.block_cooldown.for_consecutive(self.consecutive_blocks);
        let wait = self.delay_range.sample(&mut rand::thread_rng()) + cooldown;
        if wait.is_zero() {
            return;
        }

        if cooldown.is_zero() {
            debug!(wait_secs = wait.as_secs_f64(), "Waiting before next request");
        } else {
            warn!(
                wait_secs = wait.as_secs_f64(),
                consecutive_blocks = self.consecutive_blocks,
                "Backing off after block"
            );
        }

        let started = Instant::now();
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = cancel.cancelled() => {
                debug!("Pacing wait cancelled");
            }
        }
        summary.pauses += 1;
        summary.paced += started.elapsed();
    }
}

/// Load the configured source, run one pass and save the output.
///
/// The output is written even when the pass was interrupted, so the next
/// run can resume from it.
pub async fn enrich_file<C: LookupClient>(
    client: C,
    config: &RunConfig,
    cancel: &CancellationToken,
) -> Result<Summary> {
    let source = config.source_path();
    if source == config.output_path.as_path() {
        info!(path = %source.display(), "Resuming from previous output");
    }
    let mut dataset = dataset::load(source)?;

    let mut pipeline = EnrichmentPipeline::new(client, config);
    let summary = pipeline.run(&mut dataset, cancel).await?;

    dataset::save(&dataset, &config.output_path)?;
    info!(
        path = %config.output_path.display(),
        records = dataset.len(),
        "Updated data saved"
    );
    Ok(summary)
}
