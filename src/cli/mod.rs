use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "akniga-dl",
    about = "akniga-dl - Download akniga.org audiobooks as tagged per-chapter MP3 files",
    version,
    long_about = "A CLI tool that opens an akniga.org book page in a headless browser, recovers the book data and audio source from the page's network traffic, and stores every chapter as a separate MP3 file tagged with title, album, artist and cover art."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable progress indicators
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Download a book, or every book of a series listing
    Download {
        /// Book page URL (akniga.org/<book> or akniga.org/series/<name>)
        #[arg(value_name = "URL")]
        url: String,

        /// Output directory (defaults to the configured output directory)
        #[arg(value_name = "OUTPUT")]
        output: Option<PathBuf>,

        /// Pack each finished book into <OUTPUT>/<slug>.zip
        #[arg(short, long)]
        archive: bool,
    },

    /// Write the configuration file or show the current settings
    Config {
        /// Show current configuration
        #[arg(short, long)]
        show: bool,
    },
}
