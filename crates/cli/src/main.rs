//! docindex CLI - incremental metadata index for a directory of documents

use anyhow::Result;
use clap::{Parser, Subcommand};
use docindex::config::Config;
use std::path::PathBuf;

mod commands;
mod logging;

use commands::{IndexOptions, cmd_index, cmd_watch};
use logging::init_cli_logging;

#[derive(Parser)]
#[command(name = "docindex")]
#[command(version)]
#[command(about = "Incremental metadata index for a directory of documents")]
#[command(after_help = "\
QUICK START:
  docindex index ./notes                    # Index every document once
  docindex index ./notes --query a.md       # Print a document's metadata
  docindex watch ./notes                    # Keep the index current
  docindex config > ./notes/.docindex.toml  # Write a config template

CONFIG LOCATIONS:
  Root:  <root>/.docindex.toml
  User:  ~/.config/docindex/config.toml")]
struct Cli {
  /// Log at debug level
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Index every document under a directory, then exit
  #[command(after_help = "\
EXAMPLES:
  docindex index ./notes --threads 4
  docindex index ./notes --utilization 0.5
  docindex index ./notes --query daily/today.md --query ideas.md
  docindex index ./notes --tag project")]
  Index {
    /// Directory holding the documents
    root: PathBuf,
    #[command(flatten)]
    options: IndexOptions,
    /// Print the committed record for this path (repeatable)
    #[arg(short, long = "query", value_name = "PATH")]
    queries: Vec<String>,
    /// List indexed documents carrying this tag (repeatable)
    #[arg(long = "tag", value_name = "TAG")]
    tags: Vec<String>,
  },
  /// Index a directory, then keep it current until Ctrl+C
  Watch {
    /// Directory holding the documents
    root: PathBuf,
    #[command(flatten)]
    options: IndexOptions,
  },
  /// Print a commented config template with the default settings
  Config,
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();

  let root = match &cli.command {
    Commands::Index { root, .. } | Commands::Watch { root, .. } => root.clone(),
    Commands::Config => {
      print!("{}", Config::generate_template());
      return Ok(());
    }
  };
  init_cli_logging(&root, cli.verbose);
  tracing::info!(version = env!("CARGO_PKG_VERSION"), "docindex starting");

  match cli.command {
    Commands::Index {
      root,
      options,
      queries,
      tags,
    } => cmd_index(&root, &options, &queries, &tags).await,
    Commands::Watch { root, options } => cmd_watch(&root, &options).await,
    Commands::Config => Ok(()),
  }
}
