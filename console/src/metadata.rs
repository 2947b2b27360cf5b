use std::path::PathBuf;

use clap::Args;
use console::style;
use metharray::prelude::*;

use crate::utils::UtilsArgs;

#[derive(Args, Debug, Clone)]
pub(crate) struct MetaDataArgs {
    #[arg(
        short = 'i',
        long,
        required = true,
        help = "Unique id of the series (e.g. the GEO GSExxxx id)."
    )]
    id: String,

    #[arg(
        short = 'd',
        long,
        default_value = ".",
        help = "Directory holding the downloaded series."
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

    #[arg(
        short = 's',
        long,
        help = "Remove idat files that are excluded by the filtered sample sheet, so they won't be processed."
    )]
    sync_idats: bool,
}

impl MetaDataArgs {
    pub fn run(
        &self,
        _utils: &UtilsArgs,
    ) -> anyhow::Result<()> {
        let nested = self.data_dir.join(&self.id);
        let series_dir = if nested.is_dir() {
            nested
        } else {
            self.data_dir.clone()
        };

        let criteria = CompositeFilterCriteria::new(self.keyword.clone(), self.control);
        let (sheet, out_path) =
            filter_series(&self.id, &series_dir, &criteria, self.sync_idats)?;

        println!(
            "[{}] {} sample(s) retained, filtered sheet written to {}",
            style("V").green(),
            sheet.len(),
            out_path.display()
        );
        for sample in sheet.iter() {
            println!(" - {}", sample);
        }
        Ok(())
    }
}
