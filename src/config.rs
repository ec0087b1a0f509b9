//! Run configuration.
//!
//! Everything the pipeline needs is carried here explicitly and handed to
//! constructors; nothing is read from globals.

use crate::error::{CitedByError, Result};
use crate::gscholar::ScholarConfig;
use rand::Rng;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default output file name, as produced by earlier runs of the tool.
pub const DEFAULT_OUTPUT: &str = "updated_citations.csv";

/// Records processed between checkpoint saves
pub const DEFAULT_CHECKPOINT_EVERY: usize = 10;

/// Inclusive range a pacing delay is drawn from uniformly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayRange {
    min: Duration,
    max: Duration,
}

impl DelayRange {
    pub fn new(min: Duration, max: Duration) -> Result<Self> {
        if min > max {
            return Err(CitedByError::Config(format!(
                "delay min ({:?}) exceeds max ({:?})",
                min, max
            )));
        }
        Ok(Self { min, max })
    }

    pub fn from_secs_f64(min: f64, max: f64) -> Result<Self> {
        let to_duration = |secs: f64| {
            Duration::try_from_secs_f64(secs)
                .map_err(|e| CitedByError::Config(format!("invalid delay {}: {}", secs, e)))
        };
        Self::new(to_duration(min)?, to_duration(max)?)
    }

    /// No pacing at all.
    pub const fn none() -> Self {
        Self {
            min: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn sample<R: Rng>(&self, rng: &mut R) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        rng.gen_range(self.min..=self.max)
    }
}

impl Default for DelayRange {
    fn default() -> Self {
        Self {
            min: Duration::from_secs(2),
            max: Duration::from_secs(5),
        }
    }
}

/// Extra wait after the provider blocks us: `base * 2^(n-1)` for the n-th
/// consecutive block, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockCooldown {
    pub base: Duration,
    pub max: Duration,
}

impl BlockCooldown {
    pub const fn disabled() -> Self {
        Self {
            base: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    pub fn for_consecutive(&self, consecutive_blocks: u32) -> Duration {
        if consecutive_blocks == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(consecutive_blocks - 1);
        self.base.saturating_mul(factor).min(self.max)
    }
}

impl Default for BlockCooldown {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(60),
            max: Duration::from_secs(15 * 60),
        }
    }
}

/// Configuration for one enrichment run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub delay_range: DelayRange,
    pub block_cooldown: BlockCooldown,
    /// Save the output every this many processed records; 0 disables.
    pub checkpoint_every: usize,
    /// Leave records that already reached a terminal status untouched.
    pub skip_completed: bool,
    /// Continue from an existing output file instead of the input.
    pub resume: bool,
    pub scholar: ScholarConfig,
}

impl RunConfig {
    pub fn new(input_path: impl Into<PathBuf>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            input_path: input_path.into(),
            output_path: output_path.into(),
            delay_range: DelayRange::default(),
            block_cooldown: BlockCooldown::default(),
            checkpoint_every: DEFAULT_CHECKPOINT_EVERY,
            skip_completed: true,
            resume: false,
            scholar: ScholarConfig::default(),
        }
    }

    pub fn proxy_enabled(&self) -> bool {
        self.scholar.proxy_enabled()
    }

    /// File the dataset is loaded from: the previous output when resuming and
    /// it exists, otherwise the input.
    pub fn source_path(&self) -> &Path {
        if self.resume && self.output_path.exists() {
            &self.output_path
        } else {
            &self.input_path
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_default_delay_range() {
        let range = DelayRange::default();
        assert_eq!(range.min(), Duration::from_secs(2));
        assert_eq!(range.max(), Duration::from_secs(5));
    }

    #[test]
    fn test_sample_stays_in_range() {
        let range = DelayRange::from_secs_f64(0.5, 1.5).expect("valid range");
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let d = range.sample(&mut rng);
            assert!(d >= range.min() && d <= range.max(), "{:?} out of range", d);
        }
    }

    #[test]
    fn test_degenerate_range() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(DelayRange::none().sample(&mut rng), Duration::ZERO);
    }

    #[test]
    fn test_rejects_inverted_or_negative_range() {
        assert!(DelayRange::from_secs_f64(5.0, 2.0).is_err());
        assert!(DelayRange::from_secs_f64(-1.0, 2.0).is_err());
    }

    #[test]
    fn test_block_cooldown_growth_and_cap() {
        let cooldown = BlockCooldown::default();
        assert_eq!(cooldown.for_consecutive(0), Duration::ZERO);
        assert_eq!(cooldown.for_consecutive(1), Duration::from_secs(60));
        assert_eq!(cooldown.for_consecutive(2), Duration::from_secs(120));
        assert_eq!(cooldown.for_consecutive(4), Duration::from_secs(480));
        assert_eq!(cooldown.for_consecutive(5), Duration::from_secs(900));
        assert_eq!(cooldown.for_consecutive(64), Duration::from_secs(900));
        assert_eq!(BlockCooldown::disabled().for_consecutive(3), Duration::ZERO);
    }

    #[test]
    fn test_source_path() -> std::io::Result<()> {
        let dir = tempfile::TempDir::new()?;
        let output = dir.path().join("out.csv");
        let mut config = RunConfig::new(dir.path().join("in.csv"), &output);

        assert_eq!(config.source_path(), config.input_path.as_path());
        config.resume = true;
        assert_eq!(config.source_path(), config.input_path.as_path());
        std::fs::write(&output, "title,submitter\n")?;
        assert_eq!(config.source_path(), output.as_path());
        Ok(())
    }
}
