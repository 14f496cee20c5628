//! Quill CLI - offline-first notes from the terminal
//!
//! Every command works against the local SQLite store and flushes pending
//! changes through one sync round before exiting.

mod cli;
mod commands;
mod error;
#[cfg(test)]
mod tests;

use clap::{CommandFactory, Parser};
use quill_core::SyncService;

use crate::cli::{Cli, Commands};
use crate::commands::add::run_add_command;
use crate::commands::common::{open_service, resolve_db_path};
use crate::commands::delete::run_delete;
use crate::commands::edit::run_edit;
use crate::commands::list::run_list;
use crate::commands::status::run_status;
use crate::commands::sync::run_sync;
use crate::commands::tag::run_tag;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if cli.command.is_none() && cli.note.is_empty() {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    }

    let db_path = resolve_db_path(cli.db_path)?;
    let service = open_service(&db_path)?;
    let result = dispatch(&service, cli.command, &cli.note).await;

    // Edits made by the command are flushed even when it failed midway
    service.shutdown().await;
    result
}

async fn dispatch(
    service: &SyncService,
    command: Option<Commands>,
    quick_note: &[String],
) -> Result<(), CliError> {
    match command {
        Some(Commands::Add {
            content,
            title,
            tag,
        }) => run_add_command(service, &content, title.as_deref(), tag.as_deref()).await,
        Some(Commands::Edit { id, title, text }) => {
            let id = run_edit(service, &id, title, text)?;
            println!("{id}");
            Ok(())
        }
        Some(Commands::Tag { id, tags }) => {
            let names = run_tag(service, &id, &tags).await?;
            println!("{}", names.join(", "));
            Ok(())
        }
        Some(Commands::List { limit, tag, json }) => run_list(service, limit, tag.as_deref(), json),
        Some(Commands::Delete { id }) => {
            let id = run_delete(service, &id)?;
            println!("{id}");
            Ok(())
        }
        Some(Commands::Sync) => {
            println!("{}", run_sync(service).await?);
            Ok(())
        }
        Some(Commands::Status { json }) => run_status(service, json),
        None => run_add_command(service, quick_note, None, None).await,
    }
}
