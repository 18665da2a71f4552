use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

#[derive(Parser)]
#[command(name = "terral")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Declarative manager for a local serverless site", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the site configuration
    #[arg(short, long, default_value = "terral.toml", global = true)]
    pub config: PathBuf,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check the configuration without touching the site
    Validate,

    /// Show what an apply would change
    Plan(PlanArgs),

    /// Reconcile the site to match the configuration
    Apply(ApplyArgs),

    /// Tear down recorded resources in reverse dependency order
    Destroy(DestroyArgs),

    /// Print output values recorded in state
    Output(OutputArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Plan
// ============================================================================

#[derive(Parser)]
pub struct PlanArgs {
    /// Limit to specific resources and their dependencies (repeatable)
    #[arg(short, long = "target", value_name = "KIND.NAME")]
    pub targets: Vec<String>,

    /// Skip refreshing observed state, diff against recorded state
    #[arg(long)]
    pub no_refresh: bool,
}

// ============================================================================
// Apply
// ============================================================================

#[derive(Parser)]
pub struct ApplyArgs {
    /// Limit to specific resources and their dependencies (repeatable)
    #[arg(short, long = "target", value_name = "KIND.NAME")]
    pub targets: Vec<String>,

    /// Number of parallel operations per wave
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Skip the confirmation prompt
    #[arg(long)]
    pub auto_approve: bool,

    /// Skip refreshing observed state, diff against recorded state
    #[arg(long)]
    pub no_refresh: bool,
}

// ============================================================================
// Destroy
// ============================================================================

#[derive(Parser)]
pub struct DestroyArgs {
    /// Limit to specific resources and their dependents (repeatable)
    #[arg(short, long = "target", value_name = "KIND.NAME")]
    pub targets: Vec<String>,

    /// Number of parallel operations per wave
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Skip the confirmation prompt
    #[arg(long)]
    pub auto_approve: bool,
}

// ============================================================================
// Output
// ============================================================================

#[derive(Parser)]
pub struct OutputArgs {
    /// Print a single output value, raw
    pub name: Option<String>,
}
