//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

/// Swiftpack - source-based package manager workspace
///
/// Resolves declared dependencies into pinned checkouts, manages the
/// shared repository cache, and compiles build plugins.
#[derive(Parser, Debug)]
#[command(name = "swiftpack")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Package directory (defaults to the nearest manifest above the
    /// working directory)
    #[arg(long, global = true, env = "SWIFTPACK_PACKAGE_PATH")]
    pub package_path: Option<PathBuf>,

    /// Shared repository cache directory
    #[arg(long, global = true)]
    pub cache_path: Option<PathBuf>,

    /// Use known clones as-is instead of refreshing them
    #[arg(long, global = true)]
    pub skip_update: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Resolve dependencies into checkouts and Package.resolved
    Resolve,

    /// Fetch a repository into the workspace cache
    Fetch(FetchArgs),

    /// Show the current pins
    Pins,

    /// Delete every clone in the shared repository cache
    PurgeCache,

    /// Drop all managed state and delete the scratch directory
    Reset,

    /// Build-plugin operations
    Plugin(PluginArgs),
}

/// Arguments for the fetch command
#[derive(Parser, Debug)]
pub struct FetchArgs {
    /// Repository URL or local path
    pub location: String,
}

/// Arguments for the plugin command
#[derive(Parser, Debug)]
pub struct PluginArgs {
    #[command(subcommand)]
    pub action: PluginAction,
}

/// Plugin subcommands
#[derive(Subcommand, Debug)]
pub enum PluginAction {
    /// Compile a plugin's sources into a cached executable
    Compile {
        /// Directory holding the plugin sources
        sources_root: PathBuf,

        /// Compiler executable
        #[arg(long, default_value = "swiftc")]
        compiler: PathBuf,

        /// Import search path for the plugin API
        #[arg(long)]
        api_path: PathBuf,
    },
}
