pub use crate::data_structs::arrays::{
    ArrayType,
    Channel,
};
pub use crate::data_structs::manifest::{
    Manifest,
    ManifestCache,
    ManifestFetcher,
    NoFetcher,
};
pub use crate::data_structs::sample::{
    Sample,
    SampleSheet,
};
pub use crate::data_structs::sigset::SigSet;
pub use crate::error::MethError;
pub use crate::io::idat::IdatData;
pub use crate::io::matrix::{
    Precision,
    ProcessedMatrix,
};
pub use crate::io::samplesheet::{
    create_sample_sheet,
    discover,
    find_idat_pairs,
};
pub use crate::processing::composite::{
    build_composite_dataset,
    filter_series,
    read_series_list,
    CompositeFilterCriteria,
};
pub use crate::processing::correction::{
    correct_sample,
    dye_bias_correct,
    noob_correct,
};
pub use crate::processing::pipeline::{
    run_pipeline,
    run_pipeline_with_sheet,
    CorruptPolicy,
    PipelineStage,
    RunArtifacts,
    RunConfig,
};
