use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "essq",
    author,
    version,
    about = "Submit, monitor and troubleshoot electronic-structure jobs.",
    long_about = "essq renders inputs and submit scripts for quantum-chemistry programs, \
                  submits them to local or remote schedulers, polls them to completion and \
                  resubmits failed runs with corrected settings."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(
        short,
        long,
        global = true,
        help = "Path to a config.toml (defaults to $XDG_CONFIG_HOME/essq/config.toml)"
    )]
    pub config: Option<PathBuf>,

    #[arg(short, long, action = clap::ArgAction::Count, global = true, help = "Increase verbosity level (-v for debug, -vv for trace)")]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Show how a job specification would be batched")]
    Plan(PlanArgs),

    #[command(about = "Stage and submit a job specification")]
    Submit(SubmitArgs),

    #[command(about = "Poll submitted jobs until they finish, resubmitting failed runs")]
    Poll(PollArgs),

    #[command(about = "Print the next correction for a failed job as JSON")]
    Troubleshoot(RecordArgs),

    #[command(about = "Cancel a submitted job on its host")]
    Delete(RecordArgs),

    #[command(about = "List jobs from the registry")]
    List(ListArgs),

    #[command(about = "Generate shell completions")]
    Completions(CompletionsArgs),
}

#[derive(Args)]
pub struct PlanArgs {
    #[arg(help = "Job specification (TOML)")]
    pub spec: PathBuf,
}

#[derive(Args)]
pub struct SubmitArgs {
    #[arg(help = "Job specification (TOML)")]
    pub spec: PathBuf,

    #[arg(long, help = "Host to run on (must be defined in config.toml)")]
    pub host: Option<String>,
}

#[derive(Args)]
pub struct PollArgs {
    #[arg(required = true, help = "Job records (job.json) written by `essq submit`")]
    pub records: Vec<PathBuf>,

    #[arg(long, value_name = "SECONDS", help = "Seconds between status checks")]
    pub interval: Option<u64>,

    #[arg(
        long,
        value_name = "N",
        default_value_t = 3,
        help = "Give up after this many resubmissions"
    )]
    pub resubmit: u32,
}

#[derive(Args)]
pub struct RecordArgs {
    #[arg(help = "Job record (job.json)")]
    pub record: PathBuf,
}

#[derive(Args)]
pub struct ListArgs {
    #[arg(long, help = "List finished attempts instead of initiated jobs")]
    pub completed: bool,

    #[arg(long, short = 'p', help = "Only show jobs of this project")]
    pub project: Option<String>,
}

#[derive(Args)]
pub struct CompletionsArgs {
    #[arg(long, help = "Shell to generate completions for")]
    pub shell: Shell,
}
