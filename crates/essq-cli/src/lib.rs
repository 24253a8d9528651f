pub mod cli;
pub mod commands;
pub mod error;

use cli::{Cli, Commands};
use essq_core::config::Settings;
use error::CliError;

/// Runs one parsed command line against `settings`.
pub fn run(cli: Cli, settings: Settings) -> Result<(), CliError> {
    match cli.command {
        Commands::Plan(args) => commands::plan::handle_plan(args, &settings),
        Commands::Submit(args) => commands::submit::handle_submit(args, settings),
        Commands::Poll(args) => commands::poll::handle_poll(args, settings),
        Commands::Troubleshoot(args) => {
            commands::troubleshoot::handle_troubleshoot(args, settings)
        }
        Commands::Delete(args) => commands::delete::handle_delete(args, settings),
        Commands::List(args) => commands::list::handle_list(args, &settings),
        Commands::Completions(args) => {
            commands::completions::handle_completions(args);
            Ok(())
        }
    }
}
