//! ccextract - pull files out of Common Crawl
//!
//! Walks CDX index shards, selects records by field, and extracts the
//! archived HTTP payloads from their WARC files into a digest-named tree.

use anyhow::{Context, Result};
use ccextract_core::{AbortFlag, ProgressContext, Verbosity};
use clap::{Parser, Subcommand};

mod cmd;
mod config;

use config::Overrides;

#[derive(Parser)]
#[command(name = "ccextract")]
#[command(about = "Extract files from Common Crawl via its CDX index")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Number of shard workers (overrides num_threads)
    #[arg(short, long, global = true)]
    threads: Option<usize>,

    /// Count and log what would be extracted without fetching anything
    #[arg(long, global = true)]
    dry_run: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Extract selected payloads from WARC files
    Extract(cmd::extract::ExtractArgs),
    /// Count detected MIME types of selected records
    CountMimes(cmd::count_mimes::CountMimesArgs),
    /// Copy the configured index shards into a local mirror
    FetchIndices(cmd::fetch_indices::FetchIndicesArgs),
    /// Show the resolved configuration
    Config(cmd::show_config::ConfigArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Progress context (TTY auto-detect)
    let progress = ProgressContext::new();

    // Logging:
    //   TTY:     warn unless --debug, progress bars show activity
    //   non-TTY: info unless --quiet, logs are the only progress indicator
    let multi = progress.is_tty().then(|| progress.multi());
    let quiet = cli.quiet || (progress.is_tty() && !cli.debug);
    ccextract_core::init_logging(Verbosity::from_flags(quiet, cli.debug), multi)
        .context("Failed to initialize logging")?;

    let abort = AbortFlag::new();
    abort
        .register_signals()
        .context("Failed to install signal handlers")?;

    let overrides = Overrides {
        threads: cli.threads,
        dry_run: cli.dry_run,
    };

    match cli.command {
        Command::Extract(args) => cmd::extract::run(args, overrides, &abort, &progress),
        Command::CountMimes(args) => cmd::count_mimes::run(args, overrides, &abort, &progress),
        Command::FetchIndices(args) => {
            cmd::fetch_indices::run(args, overrides, &abort, &progress)
        }
        Command::Config(args) => cmd::show_config::run(args, overrides),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "ccextract",
            "extract",
            "job.json",
            "--threads",
            "8",
            "--dry-run",
            "--extract-truncated",
        ])
        .unwrap();
        assert_eq!(cli.threads, Some(8));
        assert!(cli.dry_run);
        match cli.command {
            Command::Extract(args) => {
                assert_eq!(args.config.as_deref(), Some(std::path::Path::new("job.json")));
                assert!(args.extract_truncated);
            }
            _ => panic!("expected extract"),
        }
    }

    #[test]
    fn count_mimes_output_defaults_to_cwd() {
        let cli = Cli::try_parse_from(["ccextract", "count-mimes"]).unwrap();
        match cli.command {
            Command::CountMimes(args) => {
                assert!(args.config.is_none());
                assert_eq!(args.output, std::path::PathBuf::from("."));
            }
            _ => panic!("expected count-mimes"),
        }
    }

    #[test]
    fn fetch_indices_takes_output_and_threads() {
        let cli =
            Cli::try_parse_from(["ccextract", "fetch-indices", "job.toml", "-o", "mirror", "-t", "4"])
                .unwrap();
        assert_eq!(cli.threads, Some(4));
        match cli.command {
            Command::FetchIndices(args) => {
                assert_eq!(args.config.as_deref(), Some(std::path::Path::new("job.toml")));
                assert_eq!(args.output, std::path::PathBuf::from("mirror"));
            }
            _ => panic!("expected fetch-indices"),
        }
    }
}
