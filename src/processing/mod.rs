//! Processing layers: per-sample signal correction, the batch pipeline
//! orchestrator and the composite dataset builder.

pub mod composite;
pub mod correction;
pub mod pipeline;

pub use composite::{
    build_composite_dataset,
    CompositeFilterCriteria,
};
pub use pipeline::{
    run_pipeline,
    run_pipeline_with_sheet,
    RunArtifacts,
    RunConfig,
};
