//! Configuration loading from JSON or TOML files

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ccextract_index::ExtractorConfig;

/// File names tried in the current directory, in order
const LOCAL_CONFIGS: [&str; 2] = ["ccextract.json", "ccextract.toml"];

/// File names tried in the user config directory, in order
const USER_CONFIGS: [&str; 2] = ["config.json", "config.toml"];

/// A loaded configuration and the file it came from, if any.
#[derive(Debug, Clone)]
pub struct Loaded {
    pub config: ExtractorConfig,
    pub source: Option<PathBuf>,
}

/// Load configuration from a specific file; `.toml` files are TOML,
/// everything else JSON.
pub fn from_file(path: &Path) -> Result<ExtractorConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let config = if is_toml {
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?
    } else {
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?
    };

    log::info!("Loaded config from {}", path.display());
    Ok(config)
}

/// Load configuration from default locations
///
/// Search order:
/// 1. ./ccextract.json, ./ccextract.toml
/// 2. the user config directory (e.g. ~/.config/ccextract/config.json)
///
/// If no config file is found, returns the default config.
pub fn load() -> Result<Loaded> {
    let mut candidates: Vec<PathBuf> = LOCAL_CONFIGS.iter().map(PathBuf::from).collect();
    if let Some(dirs) = directories::ProjectDirs::from("", "", "ccextract") {
        candidates.extend(USER_CONFIGS.iter().map(|name| dirs.config_dir().join(name)));
    }

    for path in candidates {
        if path.exists() {
            return Ok(Loaded {
                config: from_file(&path)?,
                source: Some(path),
            });
        }
    }

    log::debug!("No config file found, using defaults");
    Ok(Loaded {
        config: ExtractorConfig::default(),
        source: None,
    })
}

/// Explicit path when given, otherwise the default search.
pub fn resolve(path: Option<&Path>) -> Result<Loaded> {
    match path {
        Some(path) => Ok(Loaded {
            config: from_file(path)?,
            source: Some(path.to_path_buf()),
        }),
        None => load(),
    }
}

/// Command-line settings that take precedence over the file.
#[derive(Debug, Clone, Copy, Default)]
pub struct Overrides {
    pub threads: Option<usize>,
    pub dry_run: bool,
}

impl Overrides {
    pub fn apply(&self, config: &mut ExtractorConfig) {
        if let Some(threads) = self.threads {
            config.num_threads = threads;
        }
        if self.dry_run {
            config.dry_run = true;
        }
    }
}
