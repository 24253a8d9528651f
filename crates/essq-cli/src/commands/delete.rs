use crate::cli::RecordArgs;
use crate::commands::{engine, restore_job};
use crate::error::CliError;
use colored::Colorize;
use essq_core::config::Settings;

pub fn handle_delete(args: RecordArgs, settings: Settings) -> Result<(), CliError> {
    let engine = engine(settings)?;
    let mut job = restore_job(&engine, &args.record)?;
    job.delete()?;
    job.save_record()?;
    println!("{} {}", "Deleted".yellow().bold(), job.name());
    Ok(())
}
