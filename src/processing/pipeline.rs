//! Batch pipeline orchestrator: drives discovery, manifest resolution and
//! per-sample correction in memory-bounded batches, persisting per-batch
//! matrix fragments and merging them into the final samples x probes
//! matrices.

use std::fs::File;
use std::io::BufWriter;
use std::path::{
    Path,
    PathBuf,
};

use anyhow::{
    bail,
    Context,
    Result,
};
use log::{
    error,
    info,
    warn,
};
use rayon::prelude::*;

use crate::data_structs::arrays::ArrayType;
use crate::data_structs::manifest::{
    Manifest,
    ManifestCache,
};
use crate::data_structs::sample::{
    Sample,
    SampleSheet,
};
use crate::data_structs::sigset::ControlRow;
use crate::error::MethError;
use crate::io::matrix::{
    merge_fragments,
    Precision,
    ProcessedMatrix,
};
use crate::io::samplesheet::discover;
use crate::processing::correction::correct_sample;
use crate::utils::THREAD_POOL;

/// What to do when one sample's raw files fail validation mid-batch.
///
/// Default is [`CorruptPolicy::Abort`]: silently dropping a sample changes
/// cohort composition, so exclusion must be opted into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CorruptPolicy {
    #[default]
    Abort,
    SkipAndWarn,
}

/// Orchestrator state. Progression is logged at each transition; `Failed`
/// is reachable from every state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Init,
    Discovering,
    ResolvingManifest,
    Processing(usize),
    Merging,
    Done,
    Failed,
}

impl std::fmt::Display for PipelineStage {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            PipelineStage::Init => write!(f, "init"),
            PipelineStage::Discovering => write!(f, "discovering"),
            PipelineStage::ResolvingManifest => write!(f, "resolving manifest"),
            PipelineStage::Processing(i) => write!(f, "processing batch {}", i),
            PipelineStage::Merging => write!(f, "merging"),
            PipelineStage::Done => write!(f, "done"),
            PipelineStage::Failed => write!(f, "failed"),
        }
    }
}

fn enter_stage(stage: PipelineStage) {
    info!("pipeline stage: {}", stage);
}

/// Full configuration surface of one processing run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    data_dir: PathBuf,
    output_dir: Option<PathBuf>,
    array_type: Option<ArrayType>,
    manifest_filepath: Option<PathBuf>,
    manifest_cache_dir: Option<PathBuf>,
    sample_sheet_filepath: Option<PathBuf>,
    sample_names: Option<Vec<String>>,
    make_sample_sheet: bool,
    batch_size: Option<usize>,
    betas: bool,
    m_value: bool,
    export: bool,
    save_uncorrected: bool,
    save_control: bool,
    meta_data_frame: bool,
    bit: Precision,
    dye_correction: bool,
    corrupt_policy: CorruptPolicy,
    parallel: bool,
}

impl RunConfig {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            output_dir: None,
            array_type: None,
            manifest_filepath: None,
            manifest_cache_dir: None,
            sample_sheet_filepath: None,
            sample_names: None,
            make_sample_sheet: false,
            batch_size: None,
            betas: true,
            m_value: true,
            export: true,
            save_uncorrected: false,
            save_control: false,
            meta_data_frame: true,
            bit: Precision::default(),
            dye_correction: true,
            corrupt_policy: CorruptPolicy::default(),
            parallel: true,
        }
    }

    pub fn with_output_dir(
        mut self,
        output_dir: Option<PathBuf>,
    ) -> Self {
        self.output_dir = output_dir;
        self
    }

    pub fn with_array_type(
        mut self,
        array_type: Option<ArrayType>,
    ) -> Self {
        self.array_type = array_type;
        self
    }

    pub fn with_manifest_filepath(
        mut self,
        manifest_filepath: Option<PathBuf>,
    ) -> Self {
        self.manifest_filepath = manifest_filepath;
        self
    }

    pub fn with_manifest_cache_dir(
        mut self,
        manifest_cache_dir: Option<PathBuf>,
    ) -> Self {
        self.manifest_cache_dir = manifest_cache_dir;
        self
    }

    pub fn with_sample_sheet_filepath(
        mut self,
        sample_sheet_filepath: Option<PathBuf>,
    ) -> Self {
        self.sample_sheet_filepath = sample_sheet_filepath;
        self
    }

    pub fn with_sample_names(
        mut self,
        sample_names: Option<Vec<String>>,
    ) -> Self {
        self.sample_names = sample_names;
        self
    }

    pub fn with_make_sample_sheet(
        mut self,
        make_sample_sheet: bool,
    ) -> Self {
        self.make_sample_sheet = make_sample_sheet;
        self
    }

    pub fn with_batch_size(
        mut self,
        batch_size: Option<usize>,
    ) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_betas(
        mut self,
        betas: bool,
    ) -> Self {
        self.betas = betas;
        self
    }

    pub fn with_m_value(
        mut self,
        m_value: bool,
    ) -> Self {
        self.m_value = m_value;
        self
    }

    pub fn with_export(
        mut self,
        export: bool,
    ) -> Self {
        self.export = export;
        self
    }

    pub fn with_save_uncorrected(
        mut self,
        save_uncorrected: bool,
    ) -> Self {
        self.save_uncorrected = save_uncorrected;
        self
    }

    pub fn with_save_control(
        mut self,
        save_control: bool,
    ) -> Self {
        self.save_control = save_control;
        self
    }

    pub fn with_meta_data_frame(
        mut self,
        meta_data_frame: bool,
    ) -> Self {
        self.meta_data_frame = meta_data_frame;
        self
    }

    pub fn with_bit(
        mut self,
        bit: Precision,
    ) -> Self {
        self.bit = bit;
        self
    }

    pub fn with_dye_correction(
        mut self,
        dye_correction: bool,
    ) -> Self {
        self.dye_correction = dye_correction;
        self
    }

    pub fn with_corrupt_policy(
        mut self,
        corrupt_policy: CorruptPolicy,
    ) -> Self {
        self.corrupt_policy = corrupt_policy;
        self
    }

    pub fn with_parallel(
        mut self,
        parallel: bool,
    ) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn bit(&self) -> Precision {
        self.bit
    }

    /// Matrix and fragment files land here; defaults to the data directory.
    pub fn output_dir(&self) -> &Path {
        self.output_dir.as_deref().unwrap_or(&self.data_dir)
    }
}

/// Paths and summary of a finished run. Matrix paths are set only for the
/// artifacts the configuration requested.
#[derive(Debug, Clone)]
pub struct RunArtifacts {
    pub array_type: ArrayType,
    pub sample_sheet: SampleSheet,
    pub n_batches: usize,
    pub skipped_samples: Vec<String>,
    pub beta_matrix: Option<PathBuf>,
    pub m_matrix: Option<PathBuf>,
    pub meth_matrix: Option<PathBuf>,
    pub unmeth_matrix: Option<PathBuf>,
    pub control_table: Option<PathBuf>,
    pub meta_data: Option<PathBuf>,
    pub fragments: Vec<PathBuf>,
}

/// Per-sample results the orchestrator accumulates into fragments.
struct SampleOutput {
    sample_id: String,
    betas: Option<Vec<f64>>,
    m_values: Option<Vec<f64>>,
    raw_meth: Option<Vec<f64>>,
    raw_unmeth: Option<Vec<f64>>,
    controls: Option<Vec<ControlRow>>,
}

/// Discovers samples under the configured directory and processes them.
pub fn run_pipeline(config: &RunConfig) -> Result<RunArtifacts> {
    enter_stage(PipelineStage::Init);
    enter_stage(PipelineStage::Discovering);
    let sheet = discover(
        &config.data_dir,
        config.sample_sheet_filepath.as_deref(),
        config.sample_names.as_deref(),
        config.make_sample_sheet,
    )
    .inspect_err(|_| enter_stage(PipelineStage::Failed))?;

    run_pipeline_with_sheet(config, sheet)
}

/// Processes an already-built sample sheet (used directly by the composite
/// builder, which supplies its own ordering).
pub fn run_pipeline_with_sheet(
    config: &RunConfig,
    sheet: SampleSheet,
) -> Result<RunArtifacts> {
    let result = pipeline_inner(config, sheet);
    match &result {
        Ok(_) => enter_stage(PipelineStage::Done),
        Err(e) => {
            enter_stage(PipelineStage::Failed);
            error!("pipeline failed: {:#}", e);
        },
    }
    result
}

fn pipeline_inner(
    config: &RunConfig,
    sheet: SampleSheet,
) -> Result<RunArtifacts> {
    if sheet.is_empty() {
        bail!(MethError::Configuration(
            "sample sheet is empty, nothing to process".to_string()
        ));
    }
    if !(config.betas || config.m_value || config.save_uncorrected || config.save_control) {
        warn!("no output matrices requested; samples will be corrected but nothing persisted");
    }

    enter_stage(PipelineStage::ResolvingManifest);
    let cache_dir = config
        .manifest_cache_dir
        .clone()
        .unwrap_or_else(|| config.data_dir.join(".manifests"));
    let cache = ManifestCache::new(cache_dir);
    let (array_type, manifest) = cache.resolve(
        config.array_type,
        config.manifest_filepath.as_deref(),
        &sheet,
    )?;

    let output_dir = config.output_dir().to_path_buf();
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("cannot create output dir {}", output_dir.display()))?;

    let probe_names = manifest.data_probe_names();
    let batch_size = config.batch_size.unwrap_or(sheet.len()).max(1);
    let batches: Vec<&[Sample]> = sheet.samples().chunks(batch_size).collect();
    info!(
        "processing {} sample(s) as {} batch(es) of <= {} on {} array",
        sheet.len(),
        batches.len(),
        batch_size,
        array_type
    );

    let mut beta_frags = Vec::new();
    let mut m_frags = Vec::new();
    let mut meth_frags = Vec::new();
    let mut unmeth_frags = Vec::new();
    let mut control_frags = Vec::new();
    let mut skipped_samples = Vec::new();

    for (batch_idx, batch) in batches.iter().enumerate() {
        enter_stage(PipelineStage::Processing(batch_idx));

        let run_one = |sample: &Sample| -> (String, Result<SampleOutput>) {
            (
                sample.sample_id().to_string(),
                process_sample(sample, &manifest, config),
            )
        };
        let results: Vec<(String, Result<SampleOutput>)> = if config.parallel && batch.len() > 1 {
            THREAD_POOL.install(|| batch.par_iter().map(run_one).collect())
        } else {
            batch.iter().map(run_one).collect()
        };

        let mut outputs = Vec::with_capacity(results.len());
        for (sample_id, result) in results {
            match result {
                Ok(output) => outputs.push(output),
                Err(e) => {
                    if config.corrupt_policy == CorruptPolicy::SkipAndWarn
                        && is_sample_local_error(&e)
                    {
                        warn!(
                            "batch {}: excluding sample {}: {:#}",
                            batch_idx, sample_id, e
                        );
                        skipped_samples.push(sample_id);
                    } else {
                        error!(
                            "batch {} failed at sample {}; fragments of {} completed batch(es) remain in {}",
                            batch_idx,
                            sample_id,
                            batch_idx,
                            output_dir.display()
                        );
                        return Err(e.context(format!(
                            "batch {} failed at sample {}",
                            batch_idx, sample_id
                        )));
                    }
                },
            }
        }

        // Fragments are flushed before the batch's signal data is dropped;
        // they are the sole recovery point on failure.
        if config.betas {
            let path = output_dir.join(format!("beta_values_batch_{}.csv", batch_idx));
            write_matrix_fragment(&path, &probe_names, &outputs, |o| o.betas.as_deref(), config.bit)?;
            beta_frags.push(path);
        }
        if config.m_value {
            let path = output_dir.join(format!("m_values_batch_{}.csv", batch_idx));
            write_matrix_fragment(&path, &probe_names, &outputs, |o| o.m_values.as_deref(), config.bit)?;
            m_frags.push(path);
        }
        if config.save_uncorrected {
            let path = output_dir.join(format!("meth_values_batch_{}.csv", batch_idx));
            write_matrix_fragment(&path, &probe_names, &outputs, |o| o.raw_meth.as_deref(), config.bit)?;
            meth_frags.push(path);

            let path = output_dir.join(format!("unmeth_values_batch_{}.csv", batch_idx));
            write_matrix_fragment(&path, &probe_names, &outputs, |o| o.raw_unmeth.as_deref(), config.bit)?;
            unmeth_frags.push(path);
        }
        if config.save_control {
            let path = output_dir.join(format!("control_probes_batch_{}.csv", batch_idx));
            let rows = outputs
                .iter()
                .flat_map(|o| o.controls.as_deref().unwrap_or(&[]))
                .collect::<Vec<_>>();
            write_control_fragment(&path, &rows, config.bit)?;
            control_frags.push(path);
        }
    }

    enter_stage(PipelineStage::Merging);
    let mut artifacts = RunArtifacts {
        array_type,
        n_batches: batches.len(),
        skipped_samples,
        sample_sheet: sheet,
        beta_matrix: None,
        m_matrix: None,
        meth_matrix: None,
        unmeth_matrix: None,
        control_table: None,
        meta_data: None,
        fragments: Vec::new(),
    };

    if config.export {
        artifacts.beta_matrix =
            merge_into(&beta_frags, &output_dir.join("beta_values.csv"))?;
        artifacts.m_matrix = merge_into(&m_frags, &output_dir.join("m_values.csv"))?;
        artifacts.meth_matrix =
            merge_into(&meth_frags, &output_dir.join("meth_values.csv"))?;
        artifacts.unmeth_matrix =
            merge_into(&unmeth_frags, &output_dir.join("unmeth_values.csv"))?;
        artifacts.control_table =
            merge_into(&control_frags, &output_dir.join("control_probes.csv"))?;
    }

    if config.meta_data_frame {
        let path = output_dir.join("sample_sheet_meta_data.csv");
        artifacts.sample_sheet.write_csv(&path)?;
        artifacts.meta_data = Some(path);
    }

    artifacts.fragments = beta_frags
        .into_iter()
        .chain(m_frags)
        .chain(meth_frags)
        .chain(unmeth_frags)
        .chain(control_frags)
        .collect();

    Ok(artifacts)
}

fn process_sample(
    sample: &Sample,
    manifest: &Manifest,
    config: &RunConfig,
) -> Result<SampleOutput> {
    let sigset = correct_sample(
        sample,
        manifest,
        config.save_uncorrected,
        config.dye_correction,
    )?;
    Ok(SampleOutput {
        sample_id: sigset.sample_id().to_string(),
        betas: config.betas.then(|| sigset.beta_values()),
        m_values: config.m_value.then(|| sigset.m_values()),
        raw_meth: sigset.raw_meth().map(<[f64]>::to_vec),
        raw_unmeth: sigset.raw_unmeth().map(<[f64]>::to_vec),
        controls: config
            .save_control
            .then(|| sigset.control_rows(manifest)),
    })
}

/// Per-sample failures the skip-and-warn policy may exclude. Everything
/// else (configuration, manifest, sheet problems) always aborts.
fn is_sample_local_error(error: &anyhow::Error) -> bool {
    matches!(
        error.downcast_ref::<MethError>(),
        Some(MethError::CorruptIdat { .. }) | Some(MethError::ChannelMismatch { .. })
    )
}

fn write_matrix_fragment(
    path: &Path,
    probe_names: &[String],
    outputs: &[SampleOutput],
    select: impl Fn(&SampleOutput) -> Option<&[f64]>,
    precision: Precision,
) -> Result<()> {
    let mut fragment = ProcessedMatrix::new(probe_names.to_vec());
    for output in outputs {
        if let Some(values) = select(output) {
            fragment.push_row(output.sample_id.clone(), values.to_vec())?;
        }
    }
    fragment.write_csv(path, precision)
}

fn write_control_fragment(
    path: &Path,
    rows: &[&ControlRow],
    precision: Precision,
) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("cannot create {}", path.display()))?;
    let mut writer = csv::Writer::from_writer(BufWriter::new(file));
    writer.write_record([
        "Sample_ID",
        "Address",
        "Name",
        "Control_Type",
        "Mean_Grn",
        "Mean_Red",
    ])?;
    for row in rows {
        writer.write_record([
            row.sample_id.as_str(),
            &row.address.to_string(),
            row.name.as_str(),
            row.control_type.as_str(),
            &precision.format(row.mean_grn),
            &precision.format(row.mean_red),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn merge_into(
    fragments: &[PathBuf],
    dest: &Path,
) -> Result<Option<PathBuf>> {
    if fragments.is_empty() {
        return Ok(None);
    }
    merge_fragments(fragments, dest)?;
    Ok(Some(dest.to_path_buf()))
}
