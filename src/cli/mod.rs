pub mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "folio", version, about = "Read EPUB books: navigation, chapters and two-column pages")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Verbose output and debug logging
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output; log errors only
    #[arg(long, short, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    /// Reader settings file (YAML)
    #[arg(long, global = true, env = "FOLIO_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show the table of contents
    Toc {
        /// Path to the EPUB file
        file: PathBuf,
        /// Maximum depth to display
        #[arg(long)]
        depth: Option<usize>,
    },
    /// List stylesheets and embedded images
    Resources {
        /// Path to the EPUB file
        file: PathBuf,
    },
    /// Show groups of chapters with identical content
    Duplicates {
        /// Path to the EPUB file
        file: PathBuf,
    },
    /// Print the sanitized body of one chapter
    Chapter {
        /// Path to the EPUB file
        file: PathBuf,
        /// Chapter href as listed in the table of contents
        href: String,
        /// Mark elements that match a chapter title
        #[arg(long)]
        tag_headings: bool,
    },
    /// Split one chapter into two-column pages
    Paginate {
        /// Path to the EPUB file
        file: PathBuf,
        /// Chapter href (default: the first chapter)
        href: Option<String>,
        /// Maximum column height
        #[arg(long)]
        height: Option<f32>,
        /// Column width
        #[arg(long)]
        width: Option<f32>,
    },
    /// Turn pages through the book and print each position
    Read {
        /// Path to the EPUB file
        file: PathBuf,
        /// Comma-separated page turns: n (next) or p (previous)
        #[arg(long, default_value = "")]
        steps: String,
        /// Maximum column height
        #[arg(long)]
        height: Option<f32>,
        /// Column width
        #[arg(long)]
        width: Option<f32>,
    },
    /// List the books in a directory
    Library {
        /// Directory holding .epub files
        dir: PathBuf,
    },
}

/// A single page turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Next,
    Prev,
}

/// Parse `"n,n,p"` into page turns. Blank items are ignored.
pub fn parse_steps(steps: &str) -> Result<Vec<Step>, String> {
    steps
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| match s.to_ascii_lowercase().as_str() {
            "n" | "next" => Ok(Step::Next),
            "p" | "prev" | "previous" => Ok(Step::Prev),
            other => Err(format!("unknown step {other:?}, expected n or p")),
        })
        .collect()
}
