//! The per-job control loop: stage, execute, poll until terminal, then
//! troubleshoot and resubmit when the run failed.

use crate::error::{EngineError, Result};
use crate::job::Job;
use crate::status::PollResult;
use crate::trsh::Outcome;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const STOP_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Polls that may find a finished job without its output before the status
/// is reported as unresolved.
pub const OUTPUT_GRACE_POLLS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlOptions {
    pub poll_interval: Duration,
    pub max_resubmissions: u32,
}

impl Default for ControlOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            max_resubmissions: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    Succeeded,
    Failed { reason: String },
    Exhausted { reason: String },
    /// Neither the probe nor the scheduler explained the run.
    Unresolved { reason: String },
    /// The stop flag was raised before the job finished.
    Stopped,
}

pub struct Controller {
    options: ControlOptions,
    stop: Arc<AtomicBool>,
}

impl Controller {
    pub fn new(options: ControlOptions) -> Self {
        Self {
            options,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Raising this flag ends every loop at its next poll boundary.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Sleeps one poll interval. Returns `false` if stopped meanwhile.
    fn wait(&self) -> bool {
        let deadline = Instant::now() + self.options.poll_interval;
        while Instant::now() < deadline {
            if self.stopped() {
                return false;
            }
            std::thread::sleep(STOP_CHECK_INTERVAL.min(self.options.poll_interval));
        }
        !self.stopped()
    }

    /// Stages and executes `job`, then saves its record.
    pub fn launch(&self, job: &mut Job) -> Result<()> {
        job.upload_files()?;
        job.execute()?;
        job.save_record()?;
        Ok(())
    }

    /// Polls `job` until it is terminal, resubmitting corrected attempts.
    pub fn drive(&self, job: &mut Job) -> Result<JobOutcome> {
        let mut pending_polls = 0;
        loop {
            if self.stopped() {
                job.save_record()?;
                return Ok(JobOutcome::Stopped);
            }
            let result = job.poll()?;
            tracing::debug!("Poll of {}: {:?}", job.name(), result);
            match result {
                PollResult::Running => {
                    pending_polls = 0;
                    job.save_record()?;
                    if !self.wait() {
                        return Ok(JobOutcome::Stopped);
                    }
                }
                PollResult::OutputPending(reason) => {
                    pending_polls += 1;
                    job.save_record()?;
                    if pending_polls > OUTPUT_GRACE_POLLS {
                        tracing::warn!("Output of {} never appeared: {}", job.name(), reason);
                        return Ok(JobOutcome::Unresolved { reason });
                    }
                    tracing::debug!("Waiting for the output of {}", job.name());
                    if !self.wait() {
                        return Ok(JobOutcome::Stopped);
                    }
                }
                PollResult::Unresolved(reason) => {
                    job.save_record()?;
                    tracing::warn!("Status of {} is unresolved: {}", job.name(), reason);
                    return Ok(JobOutcome::Unresolved { reason });
                }
                PollResult::Unchanged | PollResult::ServerErrored => {
                    job.log_completed()?;
                    job.save_record()?;
                    return Ok(JobOutcome::Failed {
                        reason: format!("the server reported an error for {}", job.name()),
                    });
                }
                PollResult::Finished | PollResult::TimeLimit(_) => {
                    job.log_completed()?;
                    if job.status().is_success() {
                        job.save_record()?;
                        tracing::info!("Job {} for {} succeeded", job.name(), job.label());
                        return Ok(JobOutcome::Succeeded);
                    }
                    if let Some(outcome) = self.recover(job)? {
                        job.save_record()?;
                        return Ok(outcome);
                    }
                    pending_polls = 0;
                }
            }
        }
    }

    /// Troubleshoots a failed attempt. `None` means a new attempt was launched.
    fn recover(&self, job: &mut Job) -> Result<Option<JobOutcome>> {
        tracing::warn!(
            "Job {} for {} failed: {} ({})",
            job.name(),
            job.label(),
            job.status().ess.error,
            job.status().ess.keywords.join(", ")
        );
        match job.troubleshoot() {
            Outcome::Resubmit(_) if job.resubmissions() >= self.options.max_resubmissions => {
                Ok(Some(JobOutcome::Failed {
                    reason: format!(
                        "gave up after {} resubmissions",
                        self.options.max_resubmissions
                    ),
                }))
            }
            Outcome::Resubmit(correction) => {
                job.apply_correction(correction)?;
                self.launch(job)?;
                Ok(None)
            }
            Outcome::Exhausted { reason, cpu_cores } => {
                let err = job.exhausted_error(&format!("{} (cores would be {})", reason, cpu_cores));
                tracing::error!("{}", err);
                Ok(Some(JobOutcome::Exhausted {
                    reason: err.to_string(),
                }))
            }
            Outcome::NoRemedy { reason } => Ok(Some(JobOutcome::Failed { reason })),
        }
    }

    /// Drives every job in its own loop. Each job gets a dedicated worker so
    /// a sleeping loop never holds back another job's polls.
    pub fn drive_all(&self, jobs: &mut [Job]) -> Vec<Result<JobOutcome>> {
        if jobs.is_empty() {
            return Vec::new();
        }
        let pool = match rayon::ThreadPoolBuilder::new()
            .num_threads(jobs.len())
            .thread_name(|i| format!("essq-poll-{}", i))
            .build()
        {
            Ok(pool) => pool,
            Err(e) => {
                return jobs
                    .iter()
                    .map(|job| {
                        Err(EngineError::InvalidState(format!(
                            "cannot start a poll loop for {}: {}",
                            job.name(),
                            e
                        )))
                    })
                    .collect()
            }
        };
        let mut outcomes: Vec<Option<Result<JobOutcome>>> = jobs.iter().map(|_| None).collect();
        pool.scope(|scope| {
            for (job, slot) in jobs.iter_mut().zip(outcomes.iter_mut()) {
                scope.spawn(move |_| *slot = Some(self.drive(job)));
            }
        });
        outcomes
            .into_iter()
            .map(|outcome| {
                outcome.unwrap_or_else(|| {
                    Err(EngineError::InvalidState("a poll loop did not report".to_string()))
                })
            })
            .collect()
    }
}

/// Turns a loop outcome into an error for callers that need one.
pub fn outcome_to_result(job: &str, outcome: &JobOutcome) -> Result<()> {
    match outcome {
        JobOutcome::Succeeded | JobOutcome::Stopped => Ok(()),
        JobOutcome::Exhausted { reason } => Err(EngineError::ResourceExhausted {
            job: job.to_string(),
            reason: reason.clone(),
        }),
        JobOutcome::Failed { reason } | JobOutcome::Unresolved { reason } => {
            Err(EngineError::InvalidState(format!("{}: {}", job, reason)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_flag_interrupts_wait() {
        let controller = Controller::new(ControlOptions {
            poll_interval: Duration::from_secs(30),
            max_resubmissions: 0,
        });
        controller.stop_flag().store(true, Ordering::SeqCst);
        let started = Instant::now();
        assert!(!controller.wait());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_outcome_to_result() {
        assert!(outcome_to_result("opt_a1", &JobOutcome::Succeeded).is_ok());
        assert!(matches!(
            outcome_to_result(
                "opt_a1",
                &JobOutcome::Exhausted {
                    reason: "no cores left".into()
                }
            ),
            Err(EngineError::ResourceExhausted { .. })
        ));
    }

    #[test]
    fn test_outcome_serializes_with_tag() {
        let json = serde_json::to_value(JobOutcome::Stopped).unwrap();
        assert_eq!(json["outcome"], "stopped");
    }
}
