use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "quill")]
#[command(about = "Offline-first notes with background sync")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Quick capture: quill "my thought here"
    #[arg(trailing_var_arg = true)]
    pub note: Vec<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a new note
    #[command(alias = "new")]
    Add {
        /// Note text; read from stdin or $EDITOR when omitted
        content: Vec<String>,
        /// Note title
        #[arg(long)]
        title: Option<String>,
        /// Tag the new note, creating the tag if needed
        #[arg(long)]
        tag: Option<String>,
    },
    /// Edit an existing note
    Edit {
        /// Note ID or unique ID prefix
        id: String,
        /// Replace the title
        #[arg(long)]
        title: Option<String>,
        /// Replace the text; opens $EDITOR when neither flag is given
        #[arg(long)]
        text: Option<String>,
    },
    /// Replace the tags of a note
    Tag {
        /// Note ID or unique ID prefix
        id: String,
        /// Tag names; none clears all tags
        tags: Vec<String>,
    },
    /// List recent notes
    List {
        /// Number of notes to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Filter notes by tag name
        #[arg(long)]
        tag: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete an existing note
    Delete {
        /// Note ID or unique ID prefix
        id: String,
    },
    /// Run one sync round now
    Sync,
    /// Show pending changes and sync configuration
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}
