//! # rustcitedby
//!
//! Enrich a CSV of paper metadata with Google Scholar citation counts.
//!
//! ## Modules
//!
//! - [`title`] - Title pre-filtering
//! - [`lookup`] - Lookup client trait and outcomes
//! - [`gscholar`] - Google Scholar lookup client
//! - [`cookies`] - Cookie persistence
//! - [`dataset`] - CSV loading, saving and checkpoints
//! - [`pipeline`] - Paced, resumable enrichment loop
//! - [`config`] - Run configuration
//! - [`error`] - Custom error types
//!
//! ## Usage
//!
//! ```rust,no_run
//! use rustcitedby::{config::RunConfig, gscholar::ScholarClient, pipeline};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = RunConfig::new("papers.csv", "updated_citations.csv");
//!     let client = ScholarClient::new(&config.scholar)?;
//!     let summary = pipeline::enrich_file(client, &config, &CancellationToken::new()).await?;
//!     println!("{}", summary);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod cookies;
pub mod dataset;
pub mod error;
pub mod gscholar;
pub mod lookup;
pub mod pipeline;
pub mod title;

pub use error::{CitedByError, Result};
pub use lookup::{LookupClient, LookupOutcome};
