use std::time::Duration;

use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};

#[derive(Args, Debug, Clone)]
pub(crate) struct UtilsArgs {
    #[arg(
        short,
        long,
        help = "Display more detailed messages during processing."
    )]
    pub verbose: bool,

    #[arg(long, help = "Show a progress spinner while processing.")]
    pub progress: bool,

    #[arg(
        long,
        help = "Number of worker threads for per-sample parallelism. Defaults to all cores."
    )]
    pub threads: Option<usize>,
}

impl UtilsArgs {
    pub fn setup(&self) -> anyhow::Result<()> {
        if std::env::var("RUST_LOG").is_err() {
            let level = if self.verbose { "debug" } else { "warn" };
            std::env::set_var("RUST_LOG", level);
        }
        pretty_env_logger::try_init()?;

        if let Some(threads) = self.threads {
            std::env::set_var("METHARRAY_NUM_THREADS", threads.to_string());
        }
        Ok(())
    }

    /// Spinner shown for the duration of a blocking pipeline call, hidden
    /// unless `--progress` was passed.
    pub fn spinner(
        &self,
        message: &str,
    ) -> ProgressBar {
        if !self.progress {
            return ProgressBar::hidden();
        }
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .expect("valid spinner template"),
        );
        spinner.set_message(message.to_string());
        spinner.enable_steady_tick(Duration::from_millis(120));
        spinner
    }
}
