use std::path::PathBuf;

use clap::Args;
use console::style;
use metharray::prelude::*;

use crate::utils::UtilsArgs;

#[derive(Args, Debug, Clone)]
pub(crate) struct SampleSheetArgs {
    #[arg(
        short = 'd',
        long,
        required = true,
        help = "Base directory of the sample sheet and associated IDAT files."
    )]
    data_dir: PathBuf,

    #[arg(
        short = 'c',
        long,
        help = "Create a sample sheet from idat file names instead of parsing an existing one."
    )]
    create: bool,

    #[arg(
        short = 'o',
        long,
        default_value = "samplesheet.csv",
        help = "Output file name when creating a sample sheet."
    )]
    output_file: String,

    #[arg(
        short = 't',
        long,
        help = "When creating: label every sample with this Sample_Type."
    )]
    sample_type: Option<String>,

    #[arg(
        short = 's',
        long,
        help = "When creating: label every sample with this Sample_Sub_Type."
    )]
    sample_sub_type: Option<String>,
}

impl SampleSheetArgs {
    pub fn run(
        &self,
        _utils: &UtilsArgs,
    ) -> anyhow::Result<()> {
        let sheet = if self.create {
            let (sheet, path) = create_sample_sheet(
                &self.data_dir,
                &self.output_file,
                self.sample_type.clone(),
                self.sample_sub_type.clone(),
            )?;
            println!(
                "[{}] Wrote {} ({} samples)",
                style("V").green(),
                path.display(),
                sheet.len()
            );
            sheet
        } else {
            discover(&self.data_dir, None, None, false)?
        };

        for sample in sheet.iter() {
            println!(" - {}", sample);
        }
        Ok(())
    }
}
