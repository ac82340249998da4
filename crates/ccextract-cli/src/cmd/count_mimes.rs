//! Count-mimes subcommand - tally detected MIME types over the index

use std::path::PathBuf;

use anyhow::Result;
use ccextract_core::{AbortFlag, ProgressContext, fmt_num};
use ccextract_index::mime_counter::sorted_rows;
use ccextract_index::run_mime_count;
use clap::Args;

use crate::config::{self, Overrides};

/// Rows shown in the terminal table; the CSVs have all of them
const TOP_ROWS: usize = 20;

#[derive(Args, Debug)]
pub struct CountMimesArgs {
    /// Job configuration (JSON, or TOML with a .toml extension)
    pub config: Option<PathBuf>,

    /// Directory for total.csv, truncated.csv and non-truncated.csv
    #[arg(short, long, default_value = ".")]
    pub output: PathBuf,
}

pub fn run(
    args: CountMimesArgs,
    overrides: Overrides,
    abort: &AbortFlag,
    progress: &ProgressContext,
) -> Result<()> {
    let mut config = config::resolve(args.config.as_deref())?.config;
    overrides.apply(&mut config);

    let summary = run_mime_count(&config, &args.output, abort, progress)?;
    summary.log();

    let truncated = &summary.counts.truncated;
    let rows: Vec<(&str, String)> = sorted_rows(&summary.counts.total)
        .into_iter()
        .take(TOP_ROWS)
        .map(|(mime, n)| {
            let t = truncated.get(mime).copied().unwrap_or(0);
            let label = if mime.is_empty() { "(none)" } else { mime };
            (label, format!("{} ({} truncated)", fmt_num(n), fmt_num(t)))
        })
        .collect();
    super::print_summary("Detected MIME", &rows);
    if abort.is_requested() {
        log::warn!("run was interrupted; counts are partial");
    }
    Ok(())
}
