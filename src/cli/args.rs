use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::types::BackendType;

#[derive(Parser, Debug)]
#[clap(name = "codereel")]
#[clap(
    version,
    about = "Validate AI-generated Python graphics code and capture its final frame in a sandbox"
)]
#[clap(propagate_version = true)]
pub struct Cli {
    #[clap(flatten)]
    pub global_opts: GlobalOpts,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug)]
pub struct GlobalOpts {
    /// Configuration file path
    #[clap(short, long, global = true, env = "CODEREEL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[clap(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format
    #[clap(long, global = true, default_value = "text", value_enum)]
    pub format: OutputFormat,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check generated code for syntax errors and disallowed imports or calls
    Validate(ValidateArgs),

    /// Print the code as it will run, with the capture hook injected
    Prepare(PrepareArgs),

    /// Validate, execute in the sandbox and capture the final frame
    Run(RunArgs),

    /// List interpreter backends and whether they can be used here
    Backends,

    /// Initialize a new codereel configuration
    Init(InitArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

// ============================================================================
// Pipeline Commands
// ============================================================================

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Python source file, or "-" for stdin
    pub input: PathBuf,

    /// Treat the input as a model reply and validate its first ```python block
    #[clap(long)]
    pub extract: bool,
}

#[derive(Args, Debug)]
pub struct PrepareArgs {
    /// Python source file, or "-" for stdin
    pub input: PathBuf,

    /// Artifact path the injected hook writes to
    #[clap(long, short = 'o')]
    pub output: PathBuf,

    /// Time budget in seconds (15-60)
    #[clap(long, short = 'd', default_value = "30")]
    pub duration: u64,

    /// Graphics library hint (matplotlib, pygame, turtle); inferred when absent
    #[clap(long, short = 'l')]
    pub library: Option<String>,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Python source file, or "-" for stdin
    pub input: PathBuf,

    /// Directory receiving <job_id>.png (overrides [output] artifact_dir)
    #[clap(long)]
    pub output_dir: Option<PathBuf>,

    /// Time budget in seconds (15-60)
    #[clap(long, short = 'd', default_value = "30")]
    pub duration: u64,

    /// Graphics library hint (matplotlib, pygame, turtle); inferred when absent
    #[clap(long, short = 'l')]
    pub library: Option<String>,

    /// Interpreter backend (overrides [sandbox] backend)
    #[clap(long, short = 'b', value_enum)]
    pub backend: Option<BackendType>,

    /// Treat the input as a model reply and run its first ```python block
    #[clap(long)]
    pub extract: bool,
}

// ============================================================================
// Config Commands
// ============================================================================

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Force overwrite existing configuration
    #[clap(short, long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[clap(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,
    /// Show configuration file path
    Path,
}

#[derive(Debug, Clone, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}
