//! Core data structures for representing methylation array runs: platform
//! and channel enumerations, the probe manifest, sample sheets and the
//! per-sample signal partition.
//!
//! Key components of this module include:
//!
//! - [`arrays`]: The [`ArrayType`] platform enumeration with probe-count
//!   autodetection, and the [`Channel`] color channel.
//! - [`manifest`]: The immutable probe-to-channel [`Manifest`], loaded once
//!   per run and shared read-only by every sample, plus the run-scoped
//!   [`ManifestCache`] with its injected fetch capability.
//! - [`sample`]: [`Sample`] records (one physical array position and its
//!   raw file pair) and the deterministically ordered [`SampleSheet`].
//! - [`sigset`]: [`SigSet`], the per-sample partition of raw intensities
//!   into methylated/unmethylated/control/SNP vectors, and the beta/m-value
//!   derivations.

pub mod arrays;
pub mod manifest;
pub mod sample;
pub mod sigset;

pub use arrays::{
    ArrayType,
    Channel,
};
pub use manifest::{
    Manifest,
    ManifestCache,
    ManifestFetcher,
};
pub use sample::{
    Sample,
    SampleSheet,
};
pub use sigset::SigSet;
