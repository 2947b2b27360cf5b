//! # metharray
//!
//! `metharray` is a Rust library and command-line tool for converting raw
//! Illumina methylation-array intensity files (IDAT) into per-probe
//! methylation estimates (beta-values, m-values) for cohorts of samples,
//! and for assembling composite datasets from multiple public series with
//! meta-data-driven sample filtering.
//!
//! ## Key Features
//!
//! * **Idat parsing**: A validating binary reader for `.idat` /
//!   `.idat.gz` files ([`IdatData`]).
//! * **Manifest resolution**: Closed [`ArrayType`] platform enumeration
//!   with autodetection from raw file headers, and an immutable
//!   [`Manifest`] shared read-only across a run ([`ManifestCache`] with an
//!   injected fetch capability, no hidden global state).
//! * **Sample discovery**: Recursive pairing of two-channel raw files,
//!   sample sheet parsing/synthesis and deterministic ordering.
//! * **Signal correction**: Normal-exponential out-of-band (NOOB)
//!   background correction and linear dye-bias correction, preserving the
//!   Type I / Type II probe distinction exactly ([`SigSet`]).
//! * **Batch processing**: A memory-bounded orchestrator
//!   ([`run_pipeline`]) that persists per-batch matrix fragments and
//!   merges them into reproducible samples x probes matrices.
//! * **Composite datasets**: A builder ([`build_composite_dataset`]) that
//!   merges many series, applies keyword/control filters and prunes the
//!   raw files of excluded samples.
//!
//! The number of worker threads can be configured with the
//! `METHARRAY_NUM_THREADS` environment variable.
//!
//! ## Structure
//!
//! * [`data_structs`]: Platform/channel enums, manifest, samples and the
//!   per-sample signal partition.
//! * [`io`]: Idat parsing, sample discovery and matrix persistence.
//! * [`processing`]: Correction engine, batch orchestrator and composite
//!   builder.
//! * [`error`]: The typed error taxonomy ([`error::MethError`]).
//!
//! ## Usage
//!
//! ```no_run
//! use std::path::PathBuf;
//!
//! use metharray::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = RunConfig::new(PathBuf::from("data/GSE69852"))
//!         .with_make_sample_sheet(true)
//!         .with_batch_size(Some(50));
//!     let artifacts = run_pipeline(&config)?;
//!     println!(
//!         "processed {} sample(s) in {} batch(es)",
//!         artifacts.sample_sheet.len(),
//!         artifacts.n_batches
//!     );
//!     Ok(())
//! }
//! ```

pub mod data_structs;
pub mod error;
pub mod io;
pub mod prelude;
pub mod processing;
pub mod utils;

#[allow(unused_imports)]
use prelude::*;
