use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "terrace")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Plan and apply declarative resource graphs", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Declaration file or directory of *.toml files (repeatable)
    #[arg(short, long = "file", global = true, value_name = "PATH")]
    pub files: Vec<PathBuf>,

    /// Settings file
    #[arg(
        short,
        long,
        global = true,
        env = "TERRACE_CONFIG",
        default_value = "terrace.toml"
    )]
    pub config: PathBuf,

    /// State file (overrides [state] path)
    #[arg(long, global = true, env = "TERRACE_STATE", value_name = "PATH")]
    pub state: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show what apply would change (exit 2 when there are changes)
    Plan(PlanArgs),

    /// Make the real world match the declarations
    Apply(ApplyArgs),

    /// Destroy everything recorded in state
    Destroy(DestroyArgs),

    /// Check declarations without touching state
    Validate,

    /// Print the dependency graph in DOT format
    Graph,

    /// Inspect or repair the state file
    #[command(subcommand)]
    State(StateCommand),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Parser)]
pub struct PlanArgs {
    /// Print the change set as JSON
    #[arg(long)]
    pub json: bool,

    /// Plan a full teardown instead
    #[arg(long)]
    pub destroy: bool,

    /// Only plan these resources or types (and what they wait for)
    #[arg(short, long)]
    pub target: Vec<String>,
}

#[derive(Parser)]
pub struct ApplyArgs {
    /// Skip the confirmation prompt
    #[arg(long, visible_alias = "yes", short = 'y')]
    pub auto_approve: bool,

    /// Number of parallel provider calls
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Keep applying independent branches after a failure
    #[arg(long)]
    pub continue_on_error: bool,

    /// Only apply these resources or types (and what they wait for)
    #[arg(short, long)]
    pub target: Vec<String>,
}

#[derive(Parser)]
pub struct DestroyArgs {
    /// Skip the confirmation prompt
    #[arg(long, visible_alias = "yes", short = 'y')]
    pub auto_approve: bool,

    /// Number of parallel provider calls
    #[arg(short, long)]
    pub jobs: Option<usize>,
}

// ============================================================================
// State Commands
// ============================================================================

#[derive(Subcommand)]
pub enum StateCommand {
    /// List recorded resources
    List,

    /// Show one record
    Show {
        /// Resource identity (type.name)
        id: String,
    },

    /// Forget a resource without destroying it
    Rm {
        /// Resource identity (type.name)
        id: String,
    },

    /// Remove a stale lock left by a crashed run
    Unlock,
}
