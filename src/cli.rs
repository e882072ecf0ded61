use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Incremental preview regeneration for document projects.
///
/// pack-reload watches a project directory and decides, for every settled batch of
/// changes, whether the preview can be patched in place or must be fully re-rendered.
#[derive(Parser, Debug)]
#[command(
    name = "pack-reload",
    version,
    about,
    long_about = None,
    propagate_version = true,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for printed results.
#[derive(Clone, Copy, Debug, ValueEnum, Default)]
pub enum OutputFormat {
    /// One human-readable line per result (default).
    #[default]
    Compact,
    /// One JSON object per result.
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Watch a project and print one line per reload until interrupted.
    ///
    /// Settings come from pack-reload.toml at the project root; flags override it.
    Watch {
        /// Path to the project root to watch.
        path: PathBuf,

        /// Settling window in milliseconds.
        #[arg(long)]
        debounce_ms: Option<u64>,

        /// Upper bound for one full render in milliseconds.
        #[arg(long)]
        render_timeout_ms: Option<u64>,

        /// Extra ignore patterns (repeatable, or comma-separated).
        #[arg(long, value_delimiter = ',')]
        ignore: Vec<String>,

        /// Skip the initial render at startup.
        #[arg(long)]
        no_initial_render: bool,

        /// Output format.
        #[arg(long, value_enum, default_value_t = OutputFormat::Compact)]
        format: OutputFormat,
    },

    /// List the files that directly reference a file.
    Deps {
        /// Path to the project root.
        path: PathBuf,

        /// File to look up, relative to the project root.
        file: PathBuf,

        /// Output format.
        #[arg(long, value_enum, default_value_t = OutputFormat::Compact)]
        format: OutputFormat,
    },
}
