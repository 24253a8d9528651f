use clap::Parser;
use colored::Colorize;
use essq_cli::cli::{Cli, Commands};
use essq_core::config::{load_settings, load_settings_from};
use essq_core::logging;

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("{}", format!("[ERROR] {}", message).red());
    std::process::exit(1);
}

fn main() {
    let cli = Cli::parse();

    if let Commands::Completions(args) = cli.command {
        essq_cli::commands::completions::handle_completions(args);
        return;
    }

    let settings = match &cli.config {
        Some(path) => load_settings_from(path),
        None => load_settings(),
    };
    let settings = match settings {
        Ok(settings) => settings,
        Err(e) => fail(e),
    };

    logging::set_log_level(logging::level_from_verbosity(cli.verbose));
    logging::set_log_level_from_env();
    if let Err(e) = logging::init_session_logger(&settings.logging) {
        eprintln!(
            "{}",
            format!("[WARN] Failed to initialize session logger: {}", e).yellow()
        );
        logging::init_stderr_logger();
    }

    if let Err(e) = essq_cli::run(cli, settings) {
        tracing::error!("{}", e);
        fail(e);
    }
}
