use crate::cli::RecordArgs;
use crate::commands::{engine, restore_job};
use crate::error::CliError;
use essq_core::config::Settings;

pub fn handle_troubleshoot(args: RecordArgs, settings: Settings) -> Result<(), CliError> {
    let engine = engine(settings)?;
    let job = restore_job(&engine, &args.record)?;
    if job.status().is_success() {
        tracing::warn!("Job {} succeeded; nothing to troubleshoot", job.name());
    }
    let outcome = job.troubleshoot();
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}
