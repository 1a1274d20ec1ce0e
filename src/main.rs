use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use imgdedup::commands::{
    self, CleanAction, CleanOptions, ListOptions, RestoreSelection, ScanRequest,
};
use imgdedup::config::AppConfig;
use imgdedup::core::matcher::MatchMode;
use imgdedup::database::Storage;
use imgdedup::history::CullHistory;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "imgdedup", version, about = "Find and clean up duplicate images")]
struct Cli {
    /// SQLite database file (default: ~/.imgdedup/images.db)
    #[arg(long, global = true, value_name = "FILE")]
    db: Option<PathBuf>,

    /// Hamming distance threshold, 0-64 (other values fall back to 10)
    #[arg(short, long, global = true, allow_negative_numbers = true)]
    threshold: Option<i64>,

    /// Number of images hashed concurrently
    #[arg(short, long, global = true)]
    workers: Option<usize>,

    /// JSON config file (default: ~/.imgdedup/config.json if present)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan a folder for duplicate images
    Scan {
        /// Folder to scan recursively
        #[arg(value_name = "DIR")]
        folder: PathBuf,
        /// Matching strategy
        #[arg(long, value_enum)]
        mode: Option<MatchMode>,
        /// Glob pattern of paths to skip (repeatable)
        #[arg(long, value_name = "GLOB")]
        exclude: Vec<String>,
        /// Per-image time limit in seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
    },

    /// List duplicate groups from the last scan
    List {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
        /// Show detailed image info
        #[arg(short, long)]
        verbose: bool,
        /// Show summary only (group counts and sizes)
        #[arg(short, long)]
        summary: bool,
        /// Limit number of groups to display (0 = all)
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
        /// Skip first N groups
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },

    /// Remove lower quality duplicates (moves to trash by default)
    Clean {
        /// Preview without removing
        #[arg(long)]
        dry_run: bool,
        /// Delete permanently instead of moving to trash
        #[arg(long, conflicts_with = "move_to")]
        permanent: bool,
        /// Move duplicates to this folder
        #[arg(long, value_name = "DIR")]
        move_to: Option<PathBuf>,
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
        /// Group IDs to clean (repeatable)
        #[arg(short, long = "group", value_name = "ID")]
        groups: Vec<usize>,
    },

    /// Start a local web UI for reviewing and cleaning duplicates
    Serve {
        /// Port to listen on (localhost only)
        #[arg(short, long)]
        port: Option<u16>,
        /// Idle timeout in seconds (0 disables)
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
        /// Don't open a browser automatically
        #[arg(long)]
        no_browser: bool,
    },

    /// Scan and cull history
    History {
        #[command(subcommand)]
        command: HistoryCmd,
    },
}

#[derive(Subcommand, Debug)]
enum HistoryCmd {
    /// Recent scans
    Scans {
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
    },

    /// All cull history records
    Culls,

    /// Restore moved or trashed files from history
    Restore {
        /// Restore a specific record index
        #[arg(long, conflicts_with = "all")]
        record: Option<usize>,
        /// Restore all records
        #[arg(long, conflicts_with = "record")]
        all: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.debug {
        "imgdedup=debug"
    } else {
        "imgdedup=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    if let Some(threshold) = cli.threshold {
        config.threshold = threshold;
    }
    if let Some(workers) = cli.workers {
        config.scan.workers = workers.max(1);
    }

    let history = CullHistory::new(config.history_path());
    let open_storage = || {
        Storage::open(&config.db_path)
            .with_context(|| format!("failed to open database {}", config.db_path.display()))
    };

    match cli.command {
        Commands::Scan {
            folder,
            mode,
            exclude,
            timeout,
        } => {
            let mut scan = config.scan.clone();
            scan.exclude_patterns.extend(exclude);
            if let Some(secs) = timeout {
                scan.timeout = Duration::from_secs(secs);
            }
            let request = ScanRequest {
                folder,
                mode: mode.unwrap_or(config.mode),
                threshold: config.threshold,
                scan,
            };
            let mut storage = open_storage()?;
            commands::run_scan(&mut storage, request).await?;
        }

        Commands::List {
            json,
            verbose,
            summary,
            limit,
            offset,
        } => {
            let options = ListOptions {
                json,
                verbose,
                summary,
                limit,
                offset,
            };
            commands::run_list(&open_storage()?, &options)?;
        }

        Commands::Clean {
            dry_run,
            permanent,
            move_to,
            yes,
            groups,
        } => {
            let action = match (move_to, permanent) {
                (Some(dir), _) => CleanAction::MoveTo(dir),
                (None, true) => CleanAction::Delete,
                (None, false) => CleanAction::Trash,
            };
            let options = CleanOptions {
                dry_run,
                action,
                yes,
                group_ids: groups,
            };
            commands::run_clean(&open_storage()?, &history, &options)?;
        }

        Commands::Serve {
            port,
            timeout,
            no_browser,
        } => {
            let mut serve = config.serve.clone();
            if let Some(port) = port {
                serve.port = port;
            }
            if let Some(secs) = timeout {
                serve.idle_timeout = Duration::from_secs(secs);
            }
            if no_browser {
                serve.open_browser = false;
            }
            commands::run_serve(open_storage()?, history, &serve).await?;
        }

        Commands::History { command } => match command {
            HistoryCmd::Scans { limit } => commands::run_scan_history(&open_storage()?, limit)?,
            HistoryCmd::Culls => commands::run_cull_history(&history)?,
            HistoryCmd::Restore { record, all } => {
                let selection = match (record, all) {
                    (_, true) => RestoreSelection::All,
                    (Some(i), false) => RestoreSelection::Record(i),
                    (None, false) => RestoreSelection::Latest,
                };
                commands::run_restore(&history, selection)?;
            }
        },
    }

    Ok(())
}
