//! Status state machine: turns what the queue and the output files say into
//! the job's two-level status.

use crate::error::{EngineError, Result};
use crate::resources::shortened_max_job_time;
use essq_client::QueueState;
use essq_core::constants::keywords::{MAX_TOTAL_JOB_MEMORY, SERVER_TIME_LIMIT};
use essq_core::model::{EssState, EssStatus, JobStatus, ServerStatus};

pub const TIME_LIMIT_ERROR: &str =
    "Job cancelled by the server since it reached the maximal time limit.";

/// The side-effecting half of a poll, provided by the job.
pub trait Observer {
    fn queue_state(&mut self) -> Result<QueueState>;

    /// Fetches the output and runs the status probe on it.
    fn diagnose(&mut self) -> Result<EssStatus>;

    /// Contents of the scheduler's own stdout/stderr files.
    fn native_output(&mut self) -> Result<Vec<String>>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollResult {
    /// The status was already terminal.
    Unchanged,
    Running,
    /// The server error state was reached.
    ServerErrored,
    /// The ESS finished and the probe classified the run.
    Finished,
    /// The scheduler killed the run at the wall-time limit. Carries the
    /// shortened limit in hours.
    TimeLimit(f64),
    /// The run left the queue but its output has not shown up yet.
    OutputPending(String),
    /// Neither the probe nor the scheduler output explained the run.
    Unresolved(String),
}

pub fn server_state(queue: QueueState) -> ServerStatus {
    match queue {
        QueueState::Queued | QueueState::Running => ServerStatus::Running,
        QueueState::Errored => ServerStatus::Errored,
        QueueState::Absent => ServerStatus::Done,
    }
}

/// Finds the scheduler's wall-time cancellation notice.
pub fn time_limit_evidence(texts: &[String]) -> Option<String> {
    texts
        .iter()
        .flat_map(|text| text.lines())
        .find(|line| {
            let lower = line.to_lowercase();
            lower.contains("cancelled") && lower.contains("due to time limit")
        })
        .map(|line| line.trim().to_string())
}

pub fn poll(
    status: &mut JobStatus,
    max_job_time_hrs: &mut f64,
    observer: &mut dyn Observer,
) -> Result<PollResult> {
    if status.server == ServerStatus::Errored {
        return Ok(PollResult::Unchanged);
    }

    status.server = server_state(observer.queue_state()?);
    match status.server {
        ServerStatus::Initializing | ServerStatus::Running => {
            status.ess.status = EssState::Running;
            Ok(PollResult::Running)
        }
        ServerStatus::Errored => {
            tracing::warn!("The server reported an error for the job");
            Ok(PollResult::ServerErrored)
        }
        ServerStatus::Done => resolve_finished(status, max_job_time_hrs, observer),
    }
}

fn resolve_finished(
    status: &mut JobStatus,
    max_job_time_hrs: &mut f64,
    observer: &mut dyn Observer,
) -> Result<PollResult> {
    let probe_failure = match observer.diagnose() {
        Ok(mut diagnosis) => {
            if status.ess.has_keyword(MAX_TOTAL_JOB_MEMORY)
                && !diagnosis.has_keyword(MAX_TOTAL_JOB_MEMORY)
            {
                diagnosis.keywords.push(MAX_TOTAL_JOB_MEMORY.to_string());
            }
            status.ess = diagnosis;
            return Ok(PollResult::Finished);
        }
        Err(e) => e,
    };
    let output_missing = matches!(probe_failure, EngineError::OutputMissing { .. });
    let probe_failure = probe_failure.to_string();
    tracing::debug!("Status probe failed ({}), checking scheduler output", probe_failure);

    let native = match observer.native_output() {
        Ok(texts) => texts,
        Err(e) => {
            tracing::warn!("Could not read scheduler output: {}", e);
            Vec::new()
        }
    };
    match time_limit_evidence(&native) {
        Some(line) => {
            *max_job_time_hrs = shortened_max_job_time(*max_job_time_hrs);
            tracing::warn!(
                "Job was cancelled at its time limit; next attempt requests {} hours",
                max_job_time_hrs
            );
            let mut keywords = vec![SERVER_TIME_LIMIT.to_string()];
            if status.ess.has_keyword(MAX_TOTAL_JOB_MEMORY) {
                keywords.push(MAX_TOTAL_JOB_MEMORY.to_string());
            }
            status.ess = EssStatus {
                status: EssState::Errored,
                keywords,
                error: TIME_LIMIT_ERROR.to_string(),
                line: String::new(),
            };
            tracing::debug!("Scheduler evidence: {}", line);
            Ok(PollResult::TimeLimit(*max_job_time_hrs))
        }
        None if output_missing => {
            status.ess.status = EssState::Running;
            Ok(PollResult::OutputPending(probe_failure))
        }
        None => {
            status.ess.status = EssState::Running;
            status.ess.error = probe_failure.clone();
            Ok(PollResult::Unresolved(probe_failure))
        }
    }
}
