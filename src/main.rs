//! # Tab Grouper CLI (`tabgroup`)
//!
//! ## Usage
//!
//! ```bash
//! tabgroup --config ./config/tabgroup.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `tabgroup group <FILE>` | Group a JSON array of tabs (`-` reads stdin) |
//! | `tabgroup normalize <URL> <TITLE>` | Print the text a tab is embedded as |
//! | `tabgroup serve` | Start the HTTP API |
//! | `tabgroup completions <SHELL>` | Print shell completions |
//!
//! Without `--config`, `./config/tabgroup.toml` is used when present and the
//! built-in defaults otherwise.

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

use tab_grouper::config::{self, Config, LabelConfig};
use tab_grouper::grouper::{group_and_label, TabGrouper};
use tab_grouper::labels::{DisabledTitles, LabelGenerator};
use tab_grouper::models::{GroupingResponse, Tab};
use tab_grouper::normalize::normalize;
use tab_grouper::server;

const DEFAULT_CONFIG_PATH: &str = "./config/tabgroup.toml";

/// Tab Grouper — clusters browser tabs by meaning and titles each group.
#[derive(Parser)]
#[command(
    name = "tabgroup",
    about = "Tab Grouper — clusters browser tabs by meaning and titles each group",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/tabgroup.toml` if it exists, otherwise built-in
    /// defaults are used.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Group tabs read from a JSON file.
    ///
    /// The file holds an array of `{"id", "url", "title"}` objects. Use `-`
    /// to read from stdin.
    Group {
        /// Input file, or `-` for stdin.
        input: PathBuf,

        /// Output format.
        #[arg(long, value_enum, default_value = "json")]
        format: OutputFormat,

        /// Skip title generation; every group gets the fallback title.
        #[arg(long)]
        no_titles: bool,
    },

    /// Print the normalized text for one tab.
    Normalize {
        url: String,
        title: String,
    },

    /// Start the HTTP API.
    ///
    /// Binds to the address configured in `[server].bind`.
    Serve,

    /// Print shell completions to stdout.
    Completions {
        shell: clap_complete::Shell,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Commands that don't require config
    match &cli.command {
        Commands::Normalize { url, title } => {
            println!("{}", normalize(url, title));
            return Ok(());
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(*shell, &mut cmd, "tabgroup", &mut std::io::stdout());
            return Ok(());
        }
        _ => {}
    }

    let cfg = load(cli.config.as_deref())?;

    match cli.command {
        Commands::Group {
            input,
            format,
            no_titles,
        } => {
            let tabs = read_tabs(&input)?;
            let grouper = TabGrouper::from_config(&cfg)?;
            let labeler = if no_titles {
                LabelGenerator::new(Arc::new(DisabledTitles), &cfg.labels)
            } else {
                LabelGenerator::from_config(&cfg.labels)?
            };

            let response = group_and_label(&grouper, &labeler, tabs).await?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&response)?),
                OutputFormat::Text => print_summary(&response, &cfg.labels),
            }
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Normalize { .. } | Commands::Completions { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}

fn load(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => config::load_config(path),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            config::load_config(Path::new(DEFAULT_CONFIG_PATH))
        }
        None => config::parse_config(""),
    }
}

fn read_tabs(input: &Path) -> Result<Vec<Tab>> {
    let content = if input == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read tabs from stdin")?;
        buf
    } else {
        std::fs::read_to_string(input)
            .with_context(|| format!("Failed to read tabs file: {}", input.display()))?
    };
    serde_json::from_str(&content).context("Tabs must be a JSON array of {id, url, title} objects")
}

fn print_summary(response: &GroupingResponse, labels: &LabelConfig) {
    println!(
        "{} tabs, {} groups, {} unclustered",
        response.total_tabs,
        response.num_clusters,
        response.unclustered_tabs.len()
    );
    for group in &response.groups {
        let marker = if group.title == labels.fallback_title {
            " (untitled)"
        } else {
            ""
        };
        println!(
            "\n[{}] {}{} — {} tabs",
            group.cluster_id,
            group.title,
            marker,
            group.tabs.len()
        );
        for tab in &group.tabs {
            println!("    - {} ({})", tab.title, tab.url);
        }
    }
    if !response.unclustered_tabs.is_empty() {
        println!("\nUnclustered:");
        for tab in &response.unclustered_tabs {
            println!("    - {} ({})", tab.title, tab.url);
        }
    }
}
