//! Extract subcommand - pull selected payloads out of WARC files

use std::path::PathBuf;

use anyhow::Result;
use ccextract_core::{AbortFlag, ProgressContext, fmt_num};
use ccextract_index::{ExtractSummary, run_extract};
use clap::Args;

use crate::config::{self, Overrides};

#[derive(Args, Debug)]
pub struct ExtractArgs {
    /// Job configuration (JSON, or TOML with a .toml extension)
    pub config: Option<PathBuf>,

    /// Also extract truncated captures instead of only logging them
    #[arg(long)]
    pub extract_truncated: bool,
}

pub fn run(
    args: ExtractArgs,
    overrides: Overrides,
    abort: &AbortFlag,
    progress: &ProgressContext,
) -> Result<()> {
    let mut config = config::resolve(args.config.as_deref())?.config;
    overrides.apply(&mut config);
    if args.extract_truncated {
        config.extract_truncated = true;
    }

    let summary = run_extract(&config, abort, progress)?;
    summary.log();
    super::print_summary("Extraction", &summary_rows(&summary));
    if abort.is_requested() {
        log::warn!("run was interrupted; results are partial");
    }
    Ok(())
}

fn summary_rows(summary: &ExtractSummary) -> Vec<(&'static str, String)> {
    let t = &summary.totals;
    let s = &summary.stats;
    let mut rows = vec![
        (
            "Shards",
            format!("{}/{} ({} failed)", t.shards_done, t.shards_enumerated, t.shards_failed),
        ),
        ("Records read", fmt_num(t.records_read)),
        ("Selected", fmt_num(s.selected)),
        ("Truncated seen", fmt_num(t.truncated_seen)),
    ];
    if summary.dry_run {
        rows.push(("Would extract", fmt_num(s.dry_run)));
    } else {
        rows.push(("Extracted", fmt_num(s.extracted)));
        rows.push(("Already present", fmt_num(s.already_present)));
        rows.push(("Empty payloads", fmt_num(summary.empty_payload)));
        rows.push(("Not HTTP responses", fmt_num(s.not_http)));
        rows.push(("Failed", fmt_num(s.failed)));
        rows.push(("Docs", summary.docs_dir.display().to_string()));
    }
    rows.push(("Truncated logged", fmt_num(s.truncated_logged)));
    rows.push(("Logs", summary.logs_dir.display().to_string()));
    rows.push(("Time", format!("{:.1}s", t.elapsed.as_secs_f64())));
    rows
}
