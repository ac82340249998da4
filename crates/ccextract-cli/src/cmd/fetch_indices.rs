//! Fetch-indices subcommand - mirror index shards to local disk

use std::path::PathBuf;

use anyhow::Result;
use ccextract_core::{AbortFlag, ProgressContext, fmt_num};
use ccextract_index::{FetchIndicesSummary, run_fetch_indices};
use clap::Args;

use crate::config::{self, Overrides};

#[derive(Args, Debug)]
pub struct FetchIndicesArgs {
    /// Job configuration (JSON, or TOML with a .toml extension)
    pub config: Option<PathBuf>,

    /// Mirror root; files keep their remote relative paths under it
    #[arg(short, long, default_value = ".")]
    pub output: PathBuf,
}

pub fn run(
    args: FetchIndicesArgs,
    overrides: Overrides,
    abort: &AbortFlag,
    progress: &ProgressContext,
) -> Result<()> {
    let mut config = config::resolve(args.config.as_deref())?.config;
    overrides.apply(&mut config);
    if config.dry_run {
        log::warn!("--dry-run has no effect on fetch-indices");
    }

    let summary = run_fetch_indices(&config, &args.output, abort, progress)?;
    summary.log();
    super::print_summary("Index mirror", &summary_rows(&summary));
    if abort.is_requested() {
        log::warn!("run was interrupted; the mirror is incomplete");
    }
    Ok(())
}

fn summary_rows(summary: &FetchIndicesSummary) -> Vec<(&'static str, String)> {
    vec![
        (
            "Shards",
            format!(
                "{}/{} ({} failed)",
                fmt_num(summary.totals.shards_done as u64),
                fmt_num(summary.totals.shards_enumerated as u64),
                fmt_num(summary.totals.shards_failed as u64)
            ),
        ),
        ("Copied", fmt_num(summary.copy.copied as u64)),
        ("Already present", fmt_num(summary.copy.skipped as u64)),
        ("Bytes", fmt_num(summary.copy.bytes)),
        ("Mirror", summary.mirror_dir.display().to_string()),
        ("Time", format!("{:.1}s", summary.totals.elapsed.as_secs_f64())),
    ]
}
