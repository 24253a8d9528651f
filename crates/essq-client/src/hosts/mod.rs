//! Execution hosts and the short-lived sessions used to talk to them.
//!
//! A [`Session`] is acquired for one burst of operations through
//! [`with_session`] and released when it is dropped, whatever the outcome.

use crate::error::{ClientError, Result};
use crate::scheduler::{QueueState, Scheduler};
use chrono::{DateTime, Local, TimeZone};
use essq_core::config::{HostConfig, Settings, TransportConfig};
use std::path::Path;
use std::time::Duration;

pub mod common;
pub mod local;
pub mod remote_command;
pub mod ssh;

pub use local::{detect_capacity, LocalHost};
pub use remote_command::RemoteCommand;
pub use ssh::SshHost;

pub trait Host: Send + Sync {
    fn name(&self) -> &str;
    fn config(&self) -> &HostConfig;
    fn open_session(&self) -> Result<Box<dyn Session>>;

    fn is_local(&self) -> bool {
        self.config().is_local()
    }

    fn scheduler(&self) -> Scheduler {
        Scheduler::new(self.config().cluster_soft)
    }
}

/// Operations against a host. File operations default to shell commands
/// run through [`Session::run`]; implementations override what they can do
/// more directly.
pub trait Session {
    fn host_name(&self) -> &str;
    fn scheduler(&self) -> Scheduler;
    fn username(&self) -> String;

    fn run(&mut self, command: &RemoteCommand) -> Result<String>;
    fn upload(&mut self, local: &Path, remote: &Path) -> Result<()>;
    fn upload_content(&mut self, content: &str, remote: &Path) -> Result<()>;
    fn download(&mut self, remote: &Path, local: &Path) -> Result<()>;

    fn make_dirs(&mut self, remote: &Path) -> Result<()> {
        self.run(&RemoteCommand::new("mkdir").arg("-p").arg(&path_str(remote)))?;
        Ok(())
    }

    fn chmod_executable(&mut self, remote: &Path) -> Result<()> {
        self.run(&RemoteCommand::new("chmod").arg("+x").arg(&path_str(remote)))?;
        Ok(())
    }

    fn list_dir(&mut self, remote: &Path) -> Result<Vec<String>> {
        let output = self.run(&RemoteCommand::new("ls").arg("-1").arg(&path_str(remote)))?;
        Ok(output
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    fn read_file(&mut self, remote: &Path) -> Result<String> {
        self.run(&RemoteCommand::new("cat").arg(&path_str(remote)))
    }

    /// Modification time of a remote file, `None` if it does not exist.
    fn last_modified(&mut self, remote: &Path) -> Result<Option<DateTime<Local>>> {
        let cmd = RemoteCommand::new("stat").arg("-c").arg("%Y").arg(&path_str(remote));
        match self.run(&cmd) {
            Ok(output) => Ok(output
                .trim()
                .parse::<i64>()
                .ok()
                .and_then(|secs| Local.timestamp_opt(secs, 0).single())),
            Err(ClientError::CommandFailed { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn submit_job(&mut self, remote_dir: &Path, submit_file: &str) -> Result<String> {
        let scheduler = self.scheduler();
        let cmd = RemoteCommand::in_dir(&path_str(remote_dir), scheduler.submit_command(submit_file));
        let output = self.run(&cmd)?;
        let job_id = scheduler.parse_job_id(&output)?;
        tracing::debug!("Host '{}' accepted job {}", self.host_name(), job_id);
        Ok(job_id)
    }

    fn check_job_status(&mut self, job_id: &str) -> Result<QueueState> {
        let scheduler = self.scheduler();
        let command = scheduler.status_command(&self.username());
        let output = self.run(&command)?;
        Ok(scheduler.parse_status(job_id, &output))
    }

    fn delete_job(&mut self, job_id: &str) -> Result<()> {
        let scheduler = self.scheduler();
        self.run(&scheduler.delete_command(job_id))?;
        Ok(())
    }
}

pub(crate) fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
        }
    }
}

impl From<&TransportConfig> for RetryPolicy {
    fn from(config: &TransportConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            delay: Duration::from_millis(config.retry_delay_ms),
        }
    }
}

/// Opens a session, runs `op` in it and releases it. Transient failures
/// restart the whole burst on a fresh session, up to the policy's limit.
pub fn with_session<T, F>(host: &dyn Host, policy: RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut(&mut dyn Session) -> Result<T>,
{
    let mut attempt = 1;
    loop {
        let outcome = host
            .open_session()
            .and_then(|mut session| op(session.as_mut()));
        match outcome {
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                tracing::warn!(
                    "Attempt {}/{} on host '{}' failed: {}. Retrying.",
                    attempt,
                    policy.max_attempts,
                    host.name(),
                    e
                );
                std::thread::sleep(policy.delay);
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// Builds the host named `name` from the settings.
pub fn host_from_settings(settings: &Settings, name: &str) -> Result<Box<dyn Host>> {
    let config = settings.host(name)?.clone();
    if config.is_local() {
        Ok(Box::new(LocalHost::new(name, config)))
    } else {
        Ok(Box::new(SshHost::new(name, config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use essq_core::model::ClusterSoftware;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct FlakyHost {
        config: HostConfig,
        opened: Arc<AtomicU32>,
        released: Arc<AtomicU32>,
        failures_before_success: u32,
    }

    struct FlakySession {
        fail: bool,
        released: Arc<AtomicU32>,
    }

    impl Drop for FlakySession {
        fn drop(&mut self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl Session for FlakySession {
        fn host_name(&self) -> &str {
            "flaky"
        }
        fn scheduler(&self) -> Scheduler {
            Scheduler::new(ClusterSoftware::Slurm)
        }
        fn username(&self) -> String {
            "alice".into()
        }
        fn run(&mut self, _command: &RemoteCommand) -> Result<String> {
            if self.fail {
                Err(ClientError::Transport {
                    host: "flaky".into(),
                    message: "connection reset".into(),
                })
            } else {
                Ok("100 R\n".into())
            }
        }
        fn upload(&mut self, _local: &Path, _remote: &Path) -> Result<()> {
            Ok(())
        }
        fn upload_content(&mut self, _content: &str, _remote: &Path) -> Result<()> {
            Ok(())
        }
        fn download(&mut self, _remote: &Path, _local: &Path) -> Result<()> {
            Ok(())
        }
    }

    impl Host for FlakyHost {
        fn name(&self) -> &str {
            "flaky"
        }
        fn config(&self) -> &HostConfig {
            &self.config
        }
        fn open_session(&self) -> Result<Box<dyn Session>> {
            let n = self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FlakySession {
                fail: n < self.failures_before_success,
                released: self.released.clone(),
            }))
        }
    }

    fn flaky(failures: u32) -> FlakyHost {
        FlakyHost {
            config: HostConfig::local(ClusterSoftware::Slurm),
            opened: Arc::new(AtomicU32::new(0)),
            released: Arc::new(AtomicU32::new(0)),
            failures_before_success: failures,
        }
    }

    fn fast(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts: attempts,
            delay: Duration::ZERO,
        }
    }

    #[test]
    fn test_transient_failure_is_retried() {
        let host = flaky(2);
        let state = with_session(&host, fast(3), |s| s.check_job_status("100")).unwrap();
        assert_eq!(state, QueueState::Running);
        assert_eq!(host.opened.load(Ordering::SeqCst), 3);
        assert_eq!(host.released.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_retries_are_bounded() {
        let host = flaky(10);
        let result = with_session(&host, fast(3), |s| s.check_job_status("100"));
        assert!(matches!(result, Err(ClientError::Transport { .. })));
        assert_eq!(host.opened.load(Ordering::SeqCst), 3);
        assert_eq!(host.released.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_non_transient_error_is_not_retried() {
        let host = flaky(0);
        let result: Result<()> = with_session(&host, fast(5), |_| {
            Err(ClientError::CommandFailed {
                host: "flaky".into(),
                command: "sbatch".into(),
                stderr: "denied".into(),
            })
        });
        assert!(result.is_err());
        assert_eq!(host.opened.load(Ordering::SeqCst), 1);
        assert_eq!(host.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_retry_policy_from_transport_config() {
        let policy = RetryPolicy::from(&TransportConfig {
            max_attempts: 0,
            retry_delay_ms: 250,
            poll_interval_secs: 60,
        });
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.delay, Duration::from_millis(250));
    }
}
