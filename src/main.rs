//! horizons CLI entry point

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use horizons::{
    archive::ArchiveStore,
    commands::{
        cmd_digest, cmd_ingest_url, cmd_init, cmd_list_items, cmd_list_runs, cmd_list_sources,
        cmd_run, cmd_status, cmd_summarize, cmd_summarize_item, print_items, print_run_report,
        print_runs, print_source_completions, print_sources, print_status,
        print_summarized_item, InitOptions,
    },
    config::Config,
    coordinator::{RunOptions, RunReport},
    digest::print_digest_stats,
    enrich::print_summarize_stats,
    error::{Error, Result},
    models::{EnrichmentStatus, RunStatus},
    progress::LogWriterFactory,
    registry::SourceRegistry,
};
use std::path::PathBuf;
use tracing::{error, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Exit code for a run in which no source was reachable
const EXIT_RUN_FAILED: i32 = 2;

#[derive(Parser)]
#[command(name = "horizons")]
#[command(version, about = "Follow people across feeds and webpages, archive what they publish", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, env = "HORIZONS_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter config and create the archive
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },

    /// List sources with their fetch state
    Sources {
        /// Output only source IDs (one per line, for scripting)
        #[arg(long)]
        ids_only: bool,

        /// Output source IDs with descriptions for shell completions
        #[arg(long, value_enum, hide = true)]
        completion: Option<Shell>,
    },

    /// Fetch due sources and archive new content
    Run {
        /// Only fetch specific source IDs
        #[arg(long)]
        source: Option<Vec<String>>,

        /// Fetch every selected source even if its cadence has not elapsed
        #[arg(long)]
        force: bool,
    },

    /// Archive a single webpage for a followee
    IngestUrl {
        /// Page URL
        url: String,

        /// Followee slug the page belongs to
        #[arg(long)]
        followee: String,
    },

    /// Show recent runs
    Runs {
        /// Maximum number of runs
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// List items waiting for enrichment
    Items {
        /// Show items whose status is below this one
        #[arg(long, default_value = "summarized")]
        below: String,

        /// Maximum number of items
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show system status
    Status,

    /// Summarize items that have no summary yet
    Summarize {
        /// Summarize only this item
        #[arg(long, conflicts_with = "limit")]
        item: Option<String>,

        /// Maximum number of items to summarize
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Send the digest email for recently summarized items
    Digest {
        /// Print the digest instead of sending it
        #[arg(long)]
        dry_run: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[tokio::main]
async fn main() {
    match run().await {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    }
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let (plain_layer, json_layer) = if cli.log_json {
        (None, Some(fmt::layer().json().with_writer(LogWriterFactory)))
    } else {
        (Some(fmt::layer().with_writer(LogWriterFactory)), None)
    };

    tracing_subscriber::registry()
        .with(plain_layer)
        .with(json_layer)
        .with(filter)
        .init();

    if let Commands::Init { force } = cli.command {
        let (base_dir, config_path) = resolve_init_paths(cli.config);
        cmd_init(InitOptions {
            base_dir,
            config_path,
            force,
        })
        .await?;
        return Ok(0);
    }

    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "horizons", &mut std::io::stdout());
        return Ok(0);
    }

    let config = load_config(cli.config.as_deref())?;
    let registry = SourceRegistry::from_config(&config)?;
    let store = ArchiveStore::open(&config.paths.db_file).await?;

    match cli.command {
        Commands::Init { .. } | Commands::Completions { .. } => unreachable!(),

        Commands::Sources {
            ids_only,
            completion,
        } => {
            let sources = cmd_list_sources(&store, &registry).await?;

            if let Some(shell) = completion {
                print_source_completions(&sources, shell);
            } else if ids_only {
                for source in &sources {
                    println!("{}", source.id);
                }
            } else if cli.json {
                println!("{}", serde_json::to_string_pretty(&sources)?);
            } else {
                print_sources(&sources);
            }
        }

        Commands::Run { source, force } => {
            let options = RunOptions {
                force,
                source_ids: source,
                show_progress: !cli.json,
            };
            let report = cmd_run(&config, &store, &registry, options, shutdown_signal()).await?;
            return report_run(&report, cli.json);
        }

        Commands::IngestUrl { url, followee } => {
            let report = cmd_ingest_url(
                &config,
                &store,
                &registry,
                &url,
                &followee,
                shutdown_signal(),
            )
            .await?;
            return report_run(&report, cli.json);
        }

        Commands::Runs { limit } => {
            let runs = cmd_list_runs(&store, limit).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&runs)?);
            } else {
                print_runs(&runs);
            }
        }

        Commands::Items { below, limit } => {
            let below: EnrichmentStatus = below.parse()?;
            let items = cmd_list_items(&store, below, limit).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&items)?);
            } else {
                print_items(&items, below);
            }
        }

        Commands::Status => {
            let status = cmd_status(&config, &store, &registry).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_status(&status);
            }
        }

        Commands::Summarize {
            item: Some(item_id),
            ..
        } => {
            let item = cmd_summarize_item(&config, &store, &item_id).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&item)?);
            } else {
                print_summarized_item(&item);
            }
        }

        Commands::Summarize { item: None, limit } => {
            let stats = cmd_summarize(&config, &store, limit).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_summarize_stats(&stats);
            }
        }

        Commands::Digest { dry_run } => {
            let stats = cmd_digest(&config, &store, &registry, dry_run).await?;

            match stats {
                Some(stats) if cli.json => {
                    println!("{}", serde_json::to_string_pretty(&stats)?)
                }
                Some(stats) => print_digest_stats(&stats),
                None => {}
            }
        }
    }

    Ok(0)
}

/// Print a run and map its status to an exit code. A partial run is not an
/// operational failure; a failed one is.
fn report_run(report: &RunReport, json: bool) -> Result<i32> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print_run_report(report);
    }

    match report.status()? {
        RunStatus::Failed => {
            error!(run_id = %report.run.id, "No source could be reached; check network and credentials");
            Ok(EXIT_RUN_FAILED)
        }
        RunStatus::Partial => {
            warn!(run_id = %report.run.id, "Some sources failed; see outcomes above");
            Ok(0)
        }
        _ => Ok(0),
    }
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
    warn!("Interrupt received, cancelling run");
}

fn resolve_init_paths(config: Option<PathBuf>) -> (PathBuf, PathBuf) {
    match config {
        Some(path) if path.extension().is_some_and(|e| e == "toml") => {
            let base = path
                .parent()
                .map(PathBuf::from)
                .unwrap_or_else(Config::default_base_dir);
            (base, path)
        }
        Some(dir) => {
            let config_path = dir.join("config.toml");
            (dir, config_path)
        }
        None => {
            let base = Config::default_base_dir();
            let config_path = base.join("config.toml");
            (base, config_path)
        }
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    let config_path = path
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_config_path);

    if !config_path.exists() {
        return Err(Error::NotInitialized);
    }

    Config::load(&config_path)
}
