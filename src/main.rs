use clap::Parser;
use eyre::{Context, Result, eyre};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lifelog_export::api::{DEFAULT_BASE_URL, LifelogClient, RetryPolicy, ThreadPacer};
use lifelog_export::archive::{ArchiveWriter, RenderMode};
use lifelog_export::engine::{SyncEngine, SyncMode, SyncOptions};
use lifelog_export::report::ConsoleReporter;
use lifelog_export::state::JsonStateStore;

/// Export a remote lifelog archive to local per-date JSON and Markdown files.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory receiving the archive files.
    /// Defaults to ./lifelog-archive if not set in config.
    #[arg(value_name = "ARCHIVE_DIR")]
    archive_dir: Option<PathBuf>,

    /// API key. Falls back to config.toml, then $LIFELOG_API_KEY.
    #[arg(long, value_name = "KEY")]
    api_key: Option<String>,

    /// API base URL override.
    #[arg(long, value_name = "URL")]
    api_url: Option<String>,

    /// Path to a specific configuration file.
    /// Defaults to $XDG_CONFIG_HOME/lifelog-export/config.toml
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Re-walk the remote day by day, extending history backward,
    /// instead of the incremental cursor walk.
    #[arg(long)]
    full: bool,

    /// Also render each date bucket as a readable Markdown file.
    #[arg(long)]
    markdown: bool,

    /// Print each fetched batch.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress standard output.
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Deserialize, Default)]
struct FileConfig {
    archive_dir: Option<PathBuf>,
    api_key: Option<String>,
    api_url: Option<String>,
    lookback_days: Option<u32>,
    empty_day_limit: Option<u32>,
    batch_size: Option<u32>,
    request_delay_ms: Option<u64>,
    retry_limit: Option<u32>,
    rate_limit_cooldown_secs: Option<u64>,
    timeout_secs: Option<u64>,
}

fn load_file_config(explicit_path: Option<&Path>) -> Result<FileConfig> {
    let path = if let Some(p) = explicit_path {
        if !p.exists() {
            return Err(eyre!("Config file not found: {}", p.display()));
        }
        Some(p.to_path_buf())
    } else {
        // Search: XDG/OS config dir, then nothing
        dirs::config_dir()
            .map(|d| d.join("lifelog-export/config.toml"))
            .filter(|p| p.exists())
    };

    match path {
        None => Ok(FileConfig::default()),
        Some(p) => {
            let content = fs::read_to_string(&p)
                .wrap_err_with(|| format!("Failed to read config: {}", p.display()))?;
            toml::from_str(&content)
                .wrap_err_with(|| format!("Failed to parse config: {}", p.display()))
        }
    }
}

fn env_value(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load config file (CLI path > default path)
    let file_cfg = load_file_config(cli.config.as_deref())?;

    // 2. Resolve archive_dir (CLI > Config > Default)
    let archive_dir = cli
        .archive_dir
        .or(file_cfg.archive_dir)
        .unwrap_or_else(|| PathBuf::from("lifelog-archive"));

    // 3. Resolve the API key (CLI > Config > Environment). Fatal before
    //    any network activity.
    let api_key = cli
        .api_key
        .or(file_cfg.api_key)
        .or_else(|| env_value("LIFELOG_API_KEY"))
        .ok_or_else(|| {
            eyre!(
                "No API key configured.\nPass --api-key, set api_key in config.toml, or export LIFELOG_API_KEY."
            )
        })?;

    // 4. Resolve the base URL (CLI > Config > Environment > Default)
    let api_url = cli
        .api_url
        .or(file_cfg.api_url)
        .or_else(|| env_value("LIFELOG_API_URL"))
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

    fs::create_dir_all(&archive_dir).wrap_err_with(|| {
        format!(
            "Failed to create archive directory: {}",
            archive_dir.display()
        )
    })?;

    // 5. Build the client and the engine
    let policy = RetryPolicy {
        retry_limit: file_cfg.retry_limit.unwrap_or(3),
        base_delay: Duration::from_millis(500),
        rate_limit_cooldown: Duration::from_secs(file_cfg.rate_limit_cooldown_secs.unwrap_or(60)),
    };
    let timeout = Duration::from_secs(file_cfg.timeout_secs.unwrap_or(30));
    let mut client = LifelogClient::new(&api_url, api_key, timeout, policy)?;

    let defaults = SyncOptions::default();
    let options = SyncOptions {
        mode: if cli.full {
            SyncMode::FullResync
        } else {
            SyncMode::Incremental
        },
        batch_size: file_cfg.batch_size.unwrap_or(defaults.batch_size),
        lookback_days: file_cfg.lookback_days.unwrap_or(defaults.lookback_days),
        empty_day_limit: file_cfg.empty_day_limit.unwrap_or(defaults.empty_day_limit),
        request_delay: file_cfg
            .request_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.request_delay),
        ..defaults
    };

    let render = if cli.markdown {
        RenderMode::Narrative
    } else {
        RenderMode::Structured
    };
    let archive = ArchiveWriter::new(archive_dir.clone(), render);
    let store = JsonStateStore::new(&archive_dir);
    let reporter = ConsoleReporter {
        verbose: cli.verbose,
        quiet: cli.quiet,
    };
    let pacer = ThreadPacer;

    // 6. Run the sync
    let mut engine = SyncEngine::new(&mut client, &archive, &store, &pacer, &reporter, options);
    engine.run().wrap_err("Sync failed")?;
    Ok(())
}
