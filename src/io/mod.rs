//! File input and output: the idat binary parser, sample discovery and
//! sheet parsing, and precision-controlled matrix persistence.

pub mod idat;
pub mod matrix;
pub mod samplesheet;

pub use idat::IdatData;
pub use matrix::{
    Precision,
    ProcessedMatrix,
};
