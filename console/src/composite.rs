use std::path::PathBuf;

use clap::Args;
use console::style;
use log::info;
use metharray::prelude::*;

use crate::utils::UtilsArgs;

#[derive(Args, Debug, Clone)]
pub(crate) struct CompositeArgs {
    #[arg(
        short = 'l',
        long,
        required = true,
        help = "Text file with one GEO/ArrayExpress series id per line."
    )]
    list: PathBuf,

    #[arg(
        short = 'd',
        long,
        required = true,
        help = "Folder holding the downloaded series (one sub-directory per id)."
    )]
    data_dir: PathBuf,

    #[arg(
        short = 'c',
        long,
        help = "Only keep samples whose meta data marks them as controls."
    )]
    control: bool,

    #[arg(
        short = 'k',
        long,
        help = "Only keep samples whose meta data contains this keyword (case insensitive)."
    )]
    keyword: Option<String>,

    #[arg(short = 'b', long, help = "Export a beta-value matrix.")]
    betas: bool,

    #[arg(short = 'm', long, help = "Export an m-value matrix.")]
    m_value: bool,

    #[arg(
        short = 'e',
        long,
        help = "Merge batch fragments into final matrices (off by default for composites)."
    )]
    export: bool,

    #[arg(long, help = "Process samples in batches no greater than this size.")]
    batch_size: Option<usize>,

    #[arg(
        short = 'i',
        long,
        default_value = "float32",
        help = "Numeric width of matrix output (float64, float32, float16)."
    )]
    bit: Precision,
}

impl CompositeArgs {
    pub fn run(
        &self,
        utils: &UtilsArgs,
    ) -> anyhow::Result<()> {
        let series_ids = read_series_list(&self.list)?;
        let criteria = CompositeFilterCriteria::new(self.keyword.clone(), self.control);

        let (betas, m_value) = if !self.betas && !self.m_value {
            info!("neither --betas nor --m-value requested, exporting both");
            (true, true)
        } else {
            (self.betas, self.m_value)
        };

        let config = RunConfig::new(self.data_dir.clone())
            .with_betas(betas)
            .with_m_value(m_value)
            .with_export(self.export)
            .with_batch_size(self.batch_size)
            .with_bit(self.bit);

        let spinner = utils.spinner("Building composite dataset...");
        let artifacts = build_composite_dataset(&series_ids, &criteria, &config)?;
        spinner.finish_and_clear();

        println!(
            "[{}] Composite of {} series: {} sample(s) retained, {} batch(es)",
            style("V").green(),
            series_ids.len(),
            artifacts.sample_sheet.len(),
            artifacts.n_batches
        );
        for path in [artifacts.beta_matrix.as_ref(), artifacts.m_matrix.as_ref()]
            .into_iter()
            .flatten()
        {
            println!("\t{}", path.display());
        }
        Ok(())
    }
}
