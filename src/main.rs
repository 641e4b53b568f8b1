mod common;
mod create;
mod ui;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::create::cli::{BatchArgs, CreateArgs, DraftsArgs};
use crate::ui::prelude::*;

/// vidgen main parser
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Activate debug mode
    #[arg(short, long, global = true)]
    debug: bool,

    /// Emit JSON events instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a video from a prompt
    Create(CreateArgs),

    /// Submit a batch of jobs from a JSON file
    Batch(BatchArgs),

    /// List recent drafts on the remote service
    Drafts(DraftsArgs),

    /// Show today's budget ledger
    Budget,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init(
        if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        },
        true,
    );
    set_debug_mode(cli.debug);

    let code = match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            emit(Level::Error, "vidgen.error", &format!("Error: {err:#}"), None);
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Create(args) => {
            let summary = create::commands::handle_create(args).await?;
            Ok(summary.exit_code())
        }
        Commands::Batch(args) => {
            let summary = create::commands::handle_batch(args).await?;
            Ok(summary.exit_code())
        }
        Commands::Drafts(args) => {
            create::commands::handle_drafts(args).await?;
            Ok(0)
        }
        Commands::Budget => {
            create::commands::handle_budget()?;
            Ok(0)
        }
    }
}
