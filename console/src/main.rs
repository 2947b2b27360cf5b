mod composite;
mod metadata;
mod process;
mod samplesheet;
mod utils;

use clap::{Parser, Subcommand};
use composite::CompositeArgs;
use metadata::MetaDataArgs;
use process::ProcessArgs;
use samplesheet::SampleSheetArgs;
use utils::UtilsArgs;
use wild::ArgsOs;

#[derive(Parser, Debug)]
#[command(
    author = env!("CARGO_PKG_AUTHORS"),
    version = env!("CARGO_PKG_VERSION"),
    about = env!("CARGO_PKG_DESCRIPTION"),
    long_about = None,)]
struct Cli {
    #[command(subcommand)]
    command: MainMenu,
}

#[derive(Subcommand, Debug)]
enum MainMenu {
    #[command(
        name = "process",
        about = "Find idat files and calculate beta/m-value matrices for a batch of samples"
    )]
    Process {
        #[clap(flatten)]
        utils: UtilsArgs,
        #[clap(flatten)]
        args:  ProcessArgs,
    },

    #[command(
        name = "sample-sheet",
        about = "Find and validate a sample sheet for a directory of idat files, or create one"
    )]
    SampleSheet {
        #[clap(flatten)]
        utils: UtilsArgs,
        #[clap(flatten)]
        args:  SampleSheetArgs,
    },

    #[command(
        name = "composite",
        about = "Build a single dataset from several downloaded series, filtering samples by meta data"
    )]
    Composite {
        #[clap(flatten)]
        utils: UtilsArgs,
        #[clap(flatten)]
        args:  CompositeArgs,
    },

    #[command(
        name = "meta-data",
        about = "Filter one downloaded series by meta data and optionally prune excluded idat files"
    )]
    MetaData {
        #[clap(flatten)]
        utils: UtilsArgs,
        #[clap(flatten)]
        args:  MetaDataArgs,
    },
}

fn main() -> anyhow::Result<()> {
    let args: ArgsOs = wild::args_os();
    let cli = Cli::parse_from(args);

    match cli.command {
        MainMenu::Process { utils, args } => {
            utils.setup()?;
            args.run(&utils)?;
        },
        MainMenu::SampleSheet { utils, args } => {
            utils.setup()?;
            args.run(&utils)?;
        },
        MainMenu::Composite { utils, args } => {
            utils.setup()?;
            args.run(&utils)?;
        },
        MainMenu::MetaData { utils, args } => {
            utils.setup()?;
            args.run(&utils)?;
        },
    }
    Ok(())
}
