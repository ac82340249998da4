//! Config subcommand - print the resolved configuration

use std::path::PathBuf;

use anyhow::Result;
use ccextract_index::ExtractorConfig;
use clap::Args;

use crate::config::{self, Overrides};

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Job configuration (JSON, or TOML with a .toml extension)
    pub config: Option<PathBuf>,

    /// Print the full configuration as JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

pub fn run(args: ConfigArgs, overrides: Overrides) -> Result<()> {
    let loaded = config::resolve(args.config.as_deref())?;
    let mut config = loaded.config;
    overrides.apply(&mut config);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let source = loaded
        .source
        .map_or_else(|| "defaults".to_string(), |p| p.display().to_string());
    let mut rows = vec![("Config file", source)];
    rows.extend(config_rows(&config));
    super::print_summary("Setting", &rows);

    if let Err(e) = config.validate() {
        log::warn!("configuration is not runnable: {e:#}");
    }
    Ok(())
}

fn yes_no(b: bool) -> String {
    let s = if b { "yes" } else { "no" };
    s.to_string()
}

fn config_rows(config: &ExtractorConfig) -> Vec<(&'static str, String)> {
    let selector = if config.record_selector.is_accept_all() {
        "accept all".to_string()
    } else {
        serde_json::to_string(&config.record_selector).unwrap_or_else(|e| e.to_string())
    };
    vec![
        ("Workers", config.num_threads.to_string()),
        ("Index paths", config.indices.paths.join("\n")),
        ("Index source", config.indices.source().describe()),
        ("WARC source", config.fetcher.describe()),
        ("Index throttle (s)", format!("{:?}", config.indices.throttle_seconds)),
        ("WARC throttle (s)", format!("{:?}", config.fetcher.throttle_seconds)),
        ("Docs", config.docs.path.display().to_string()),
        ("Logs", config.logs.dir.display().to_string()),
        ("Target path pattern", config.target_path_pattern.clone()),
        ("Max records", config.max_records.to_string()),
        ("Max files extracted", config.max_files_extracted.to_string()),
        ("Max files truncated", config.max_files_truncated.to_string()),
        ("Extract truncated", yes_no(config.extract_truncated)),
        ("Dry run", yes_no(config.dry_run)),
        ("Report every", config.report_every().to_string()),
        ("Queue timeout", format!("{}m", config.queue_timeout_minutes)),
        ("Record selector", selector),
    ]
}
