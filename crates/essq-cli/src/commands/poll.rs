use crate::cli::PollArgs;
use crate::commands::{engine, restore_job};
use crate::error::CliError;
use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets, Attribute, Cell, Color, Table};
use essq_core::config::Settings;
use essq_engine::{ControlOptions, Controller, Job, JobOutcome};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::Ordering;
use std::time::Duration;

fn outcome_cell(outcome: &Result<JobOutcome, essq_engine::EngineError>) -> (Cell, String) {
    match outcome {
        Ok(JobOutcome::Succeeded) => (Cell::new("succeeded").fg(Color::Green), String::new()),
        Ok(JobOutcome::Stopped) => (Cell::new("stopped").fg(Color::Yellow), String::new()),
        Ok(JobOutcome::Failed { reason }) => (Cell::new("failed").fg(Color::Red), reason.clone()),
        Ok(JobOutcome::Exhausted { reason }) => {
            (Cell::new("exhausted").fg(Color::Red), reason.clone())
        }
        Ok(JobOutcome::Unresolved { reason }) => {
            (Cell::new("unresolved").fg(Color::Magenta), reason.clone())
        }
        Err(e) => (Cell::new("error").fg(Color::Red), e.to_string()),
    }
}

pub fn handle_poll(args: PollArgs, settings: Settings) -> Result<(), CliError> {
    let interval = args
        .interval
        .unwrap_or(settings.transport.poll_interval_secs);
    let engine = engine(settings)?;
    let mut jobs = args
        .records
        .iter()
        .map(|path| restore_job(&engine, path))
        .collect::<Result<Vec<Job>, CliError>>()?;

    let controller = Controller::new(ControlOptions {
        poll_interval: Duration::from_secs(interval),
        max_resubmissions: args.resubmit,
    });
    let stop = controller.stop_flag();
    if let Err(e) = ctrlc::set_handler(move || {
        stop.store(true, Ordering::SeqCst);
    }) {
        tracing::warn!("Could not install the Ctrl-C handler: {}", e);
    }

    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}") {
        pb.set_style(style);
    }
    pb.set_message(format!("Polling {} job(s) every {}s...", jobs.len(), interval));
    pb.enable_steady_tick(Duration::from_millis(200));
    let outcomes = controller.drive_all(&mut jobs);
    pb.finish_and_clear();

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(
            ["Job", "Label", "Resubmissions", "Outcome", "Reason"]
                .into_iter()
                .map(|h| Cell::new(h).add_attribute(Attribute::Bold).fg(Color::Cyan)),
        );
    let mut failed = 0;
    for (job, outcome) in jobs.iter().zip(&outcomes) {
        if !matches!(outcome, Ok(JobOutcome::Succeeded | JobOutcome::Stopped)) {
            failed += 1;
        }
        let (cell, reason) = outcome_cell(outcome);
        table.add_row(vec![
            Cell::new(job.name()).fg(Color::Yellow),
            Cell::new(job.label()),
            Cell::new(job.resubmissions()),
            cell,
            Cell::new(reason),
        ]);
    }
    println!("{}", table);

    if failed > 0 {
        return Err(CliError::JobsFailed {
            failed,
            total: jobs.len(),
        });
    }
    println!("{}", "All jobs finished.".green());
    Ok(())
}
