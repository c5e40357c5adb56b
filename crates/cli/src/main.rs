//! `hoard`: back up a directory to content-addressed object storage.

mod commands;
mod error;

use crate::commands::GlobalArgs;
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Debug, Parser)]
#[command(name = "hoard")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    args: GlobalArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Write the repository configuration into the work directory
    Init {
        /// Repository name, mixed into every content hash
        repo_name: String,
        /// Target bucket (or directory, with --local)
        bucket: String,
        /// Back up to a local directory instead of S3
        #[arg(long)]
        local: bool,
    },
    /// Snapshot the work directory and upload everything that changed
    Commit,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with(fmt::layer().with_target(false))
        .init();
}

/// Cancel `token` on the first Ctrl-C.
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling in-flight uploads");
            token.cancel();
        }
    });
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.args.verbose);

    let result = match cli.command {
        Command::Init { repo_name, bucket, local } => commands::init(&cli.args, repo_name, bucket, local).map(|_| ()),
        Command::Commit => {
            let cancel = CancellationToken::new();
            cancel_on_interrupt(cancel.clone());
            commands::commit(&cli.args, &cancel).await.map(|_| ())
        },
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        },
    }
}
