use crate::cli::SubmitArgs;
use crate::commands::{engine, load_job_spec};
use crate::error::CliError;
use colored::Colorize;
use essq_core::config::Settings;
use essq_engine::{ControlOptions, Controller, Job};

pub fn handle_submit(args: SubmitArgs, settings: Settings) -> Result<(), CliError> {
    let mut spec = load_job_spec(&args.spec)?;
    if args.host.is_some() {
        spec.host = args.host;
    }
    let engine = engine(settings)?;
    let mut job = Job::new(engine, spec)?;
    println!(
        "- Submitting {} for {} to host '{}'...",
        job.name().cyan(),
        job.label(),
        job.host_name().cyan()
    );

    Controller::new(ControlOptions::default()).launch(&mut job)?;
    let record = job.save_record()?;
    match job.job_id() {
        Some(job_id) => println!(
            "  {} {} submitted as {}",
            "OK".green().bold(),
            job.name(),
            job_id.bold()
        ),
        None => println!("  {} {} ran incore", "OK".green().bold(), job.name()),
    }
    println!("  Record: {}", record.display().to_string().dimmed());
    Ok(())
}
