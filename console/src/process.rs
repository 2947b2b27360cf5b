use std::path::PathBuf;

use clap::Args;
use console::style;
use log::info;
use metharray::prelude::*;

use crate::utils::UtilsArgs;

#[derive(Args, Debug, Clone)]
pub(crate) struct ProcessArgs {
    #[arg(
        short = 'd',
        long,
        required = true,
        help = "Base directory of the sample sheet and associated IDAT files. Nested directories are searched."
    )]
    data_dir: PathBuf,

    #[arg(
        short = 'a',
        long,
        help = "Type of array being processed (27k, 450k, epic, epic+, mouse). If omitted, this will autodetect it."
    )]
    array_type: Option<ArrayType>,

    #[arg(
        short = 'm',
        long,
        help = "File path of the array manifest. If omitted, a cached manifest for the array type is used."
    )]
    manifest: Option<PathBuf>,

    #[arg(
        short = 's',
        long,
        help = "File path of the sample sheet. If omitted, this will discover it."
    )]
    sample_sheet: Option<PathBuf>,

    #[arg(
        long,
        help = "If the dataset lacks a sample sheet, synthesize one on the fly from idat file names."
    )]
    no_sample_sheet: bool,

    #[arg(
        short = 'n',
        long = "sample-name",
        help = "Sample(s) to process. Pass multiple names with repeated -n."
    )]
    sample_name: Vec<String>,

    #[arg(short = 'b', long, help = "Export a beta-value matrix.")]
    betas: bool,

    #[arg(long, help = "Export an m-value matrix.")]
    m_value: bool,

    #[arg(
        long,
        help = "Process and save samples in batches no greater than this size."
    )]
    batch_size: Option<usize>,

    #[arg(
        short = 'u',
        long,
        help = "Also save matrices of meth/unmeth intensities that have not been background corrected."
    )]
    uncorrected: bool,

    #[arg(long, help = "Suppress merged matrix export.")]
    no_export: bool,

    #[arg(long, help = "Suppress the meta data table export.")]
    no_meta_export: bool,

    #[arg(
        short = 'i',
        long,
        default_value = "float32",
        help = "Numeric width of matrix output (float64, float32, float16), to trade precision for disk space."
    )]
    bit: Precision,

    #[arg(
        short = 'c',
        long,
        help = "Save an additional table with control and SNP probe intensities."
    )]
    save_control: bool,

    #[arg(long, help = "Skip dye bias correction.")]
    no_dye_correction: bool,

    #[arg(
        long,
        help = "Exclude corrupt samples with a warning instead of aborting the whole run."
    )]
    skip_corrupt: bool,

    #[arg(
        short = 'o',
        long,
        help = "Output directory. Defaults to the data directory."
    )]
    output_dir: Option<PathBuf>,
}

impl ProcessArgs {
    pub fn run(
        &self,
        utils: &UtilsArgs,
    ) -> anyhow::Result<()> {
        let (betas, m_value) = if !self.betas && !self.m_value {
            info!("neither --betas nor --m-value requested, exporting both");
            (true, true)
        } else {
            (self.betas, self.m_value)
        };

        let corrupt_policy = if self.skip_corrupt {
            CorruptPolicy::SkipAndWarn
        } else {
            CorruptPolicy::Abort
        };
        let sample_names = (!self.sample_name.is_empty()).then(|| self.sample_name.clone());

        let config = RunConfig::new(self.data_dir.clone())
            .with_output_dir(self.output_dir.clone())
            .with_array_type(self.array_type)
            .with_manifest_filepath(self.manifest.clone())
            .with_sample_sheet_filepath(self.sample_sheet.clone())
            .with_sample_names(sample_names)
            .with_make_sample_sheet(self.no_sample_sheet)
            .with_batch_size(self.batch_size)
            .with_betas(betas)
            .with_m_value(m_value)
            .with_export(!self.no_export)
            .with_save_uncorrected(self.uncorrected)
            .with_save_control(self.save_control)
            .with_meta_data_frame(!self.no_meta_export)
            .with_bit(self.bit)
            .with_dye_correction(!self.no_dye_correction)
            .with_corrupt_policy(corrupt_policy);

        let spinner = utils.spinner("Processing samples...");
        let artifacts = run_pipeline(&config)?;
        spinner.finish_and_clear();

        println!(
            "[{}] Processed {} sample(s) on {} array in {} batch(es)",
            style("V").green(),
            artifacts.sample_sheet.len() - artifacts.skipped_samples.len(),
            artifacts.array_type,
            artifacts.n_batches
        );
        if !artifacts.skipped_samples.is_empty() {
            println!(
                "[{}] Excluded {} corrupt sample(s): {}",
                style("!").yellow(),
                artifacts.skipped_samples.len(),
                artifacts.skipped_samples.join(", ")
            );
        }
        for path in [
            artifacts.beta_matrix.as_ref(),
            artifacts.m_matrix.as_ref(),
            artifacts.meth_matrix.as_ref(),
            artifacts.unmeth_matrix.as_ref(),
            artifacts.control_table.as_ref(),
            artifacts.meta_data.as_ref(),
        ]
        .into_iter()
        .flatten()
        {
            println!("\t{}", path.display());
        }
        Ok(())
    }
}
