use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tf_core::TextureCategory;

#[derive(Parser)]
#[command(name = "texforge")]
#[command(author, version, about = "Parallel DDS texture conversion for RTX Remix")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Convert images to DDS with Remix-style names
    Convert {
        /// Image files or directories to convert
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Directory for the converted textures
        #[arg(short, long)]
        output: PathBuf,

        /// Texture category for every input (inferred from file names if omitted)
        #[arg(long)]
        category: Option<TextureCategory>,

        /// Pixel format override, e.g. BC7_UNORM
        #[arg(long)]
        encoding: Option<String>,

        /// Run as a background job and stream its events
        #[arg(long)]
        background: bool,

        /// Give up waiting after this many seconds
        #[arg(long, default_value = "600")]
        timeout: u64,
    },

    /// Convert DDS textures back to PNG
    Unpack {
        /// DDS files or directories to unpack
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Directory for the PNG files
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Check that the texture converter is available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
