//! In-memory stand-ins for a remote cluster and the output probe.

use chrono::{DateTime, Local};
use essq_client::hosts::RemoteCommand;
use essq_client::{ClientError, Host, QueueState, Scheduler, Session};
use essq_core::config::HostConfig;
use essq_core::model::{EssState, EssStatus, JobType};
use essq_engine::probe::StatusProbe;
use essq_engine::EngineError;
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
pub struct ClusterState {
    /// Answers to successive status queries. An empty queue reads as absent.
    pub queue: VecDeque<QueueState>,
    /// Remote file contents by absolute path.
    pub files: BTreeMap<PathBuf, String>,
    pub submissions: Vec<PathBuf>,
    pub deleted: Vec<String>,
    pub commands: Vec<String>,
    pub sessions_opened: usize,
    pub sessions_closed: usize,
    pub status_checks: usize,
    /// Files that appear once this many status queries have been answered.
    reveals: Vec<(usize, PathBuf, String)>,
    next_id: u32,
}

fn lock(state: &Mutex<ClusterState>) -> MutexGuard<'_, ClusterState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A remote host whose sessions act on shared in-memory state.
#[derive(Clone)]
pub struct ScriptedHost {
    name: String,
    config: HostConfig,
    state: Arc<Mutex<ClusterState>>,
}

impl ScriptedHost {
    pub fn new(name: &str, config: HostConfig) -> Self {
        Self {
            name: name.to_string(),
            config,
            state: Arc::new(Mutex::new(ClusterState {
                next_id: 1000,
                ..ClusterState::default()
            })),
        }
    }

    pub fn push_queue_states(&self, states: impl IntoIterator<Item = QueueState>) {
        lock(&self.state).queue.extend(states);
    }

    pub fn put_file(&self, remote: &Path, content: &str) {
        lock(&self.state)
            .files
            .insert(remote.to_path_buf(), content.to_string());
    }

    /// Makes `remote` appear after `checks` status queries.
    pub fn put_file_after_checks(&self, checks: usize, remote: &Path, content: &str) {
        lock(&self.state)
            .reveals
            .push((checks, remote.to_path_buf(), content.to_string()));
    }

    pub fn status_checks(&self) -> usize {
        lock(&self.state).status_checks
    }

    pub fn file(&self, remote: &Path) -> Option<String> {
        lock(&self.state).files.get(remote).cloned()
    }

    pub fn submissions(&self) -> Vec<PathBuf> {
        lock(&self.state).submissions.clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        lock(&self.state).deleted.clone()
    }

    /// Opened and closed session counts.
    pub fn session_counts(&self) -> (usize, usize) {
        let state = lock(&self.state);
        (state.sessions_opened, state.sessions_closed)
    }
}

impl Host for ScriptedHost {
    fn name(&self) -> &str {
        &self.name
    }

    fn config(&self) -> &HostConfig {
        &self.config
    }

    fn is_local(&self) -> bool {
        false
    }

    fn open_session(&self) -> essq_client::Result<Box<dyn Session>> {
        lock(&self.state).sessions_opened += 1;
        Ok(Box::new(ScriptedSession {
            host: self.name.clone(),
            config: self.config.clone(),
            state: Arc::clone(&self.state),
        }))
    }
}

pub struct ScriptedSession {
    host: String,
    config: HostConfig,
    state: Arc<Mutex<ClusterState>>,
}

impl ScriptedSession {
    fn missing(&self, command: &str, path: &Path) -> ClientError {
        ClientError::CommandFailed {
            host: self.host.clone(),
            command: format!("{} {}", command, path.display()),
            stderr: "No such file or directory".to_string(),
        }
    }
}

impl Drop for ScriptedSession {
    fn drop(&mut self) {
        lock(&self.state).sessions_closed += 1;
    }
}

impl Session for ScriptedSession {
    fn host_name(&self) -> &str {
        &self.host
    }

    fn scheduler(&self) -> Scheduler {
        Scheduler::new(self.config.cluster_soft)
    }

    fn username(&self) -> String {
        self.config.username()
    }

    fn run(&mut self, command: &RemoteCommand) -> essq_client::Result<String> {
        lock(&self.state).commands.push(format!("{:?}", command));
        Ok(String::new())
    }

    fn upload(&mut self, local: &Path, remote: &Path) -> essq_client::Result<()> {
        let content = std::fs::read_to_string(local).map_err(|_| self.missing("put", local))?;
        self.upload_content(&content, remote)
    }

    fn upload_content(&mut self, content: &str, remote: &Path) -> essq_client::Result<()> {
        lock(&self.state)
            .files
            .insert(remote.to_path_buf(), content.to_string());
        Ok(())
    }

    fn download(&mut self, remote: &Path, local: &Path) -> essq_client::Result<()> {
        let content = lock(&self.state).files.get(remote).cloned();
        let content = content.ok_or_else(|| self.missing("get", remote))?;
        if let Some(parent) = local.parent() {
            std::fs::create_dir_all(parent).map_err(|_| self.missing("mkdir", parent))?;
        }
        std::fs::write(local, content).map_err(|_| self.missing("write", local))?;
        Ok(())
    }

    fn make_dirs(&mut self, _remote: &Path) -> essq_client::Result<()> {
        Ok(())
    }

    fn chmod_executable(&mut self, remote: &Path) -> essq_client::Result<()> {
        if lock(&self.state).files.contains_key(remote) {
            Ok(())
        } else {
            Err(self.missing("chmod", remote))
        }
    }

    fn list_dir(&mut self, remote: &Path) -> essq_client::Result<Vec<String>> {
        Ok(lock(&self.state)
            .files
            .keys()
            .filter(|path| path.parent() == Some(remote))
            .filter_map(|path| path.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect())
    }

    fn read_file(&mut self, remote: &Path) -> essq_client::Result<String> {
        let content = lock(&self.state).files.get(remote).cloned();
        content.ok_or_else(|| self.missing("cat", remote))
    }

    fn last_modified(&mut self, remote: &Path) -> essq_client::Result<Option<DateTime<Local>>> {
        Ok(lock(&self.state)
            .files
            .contains_key(remote)
            .then(Local::now))
    }

    fn submit_job(&mut self, remote_dir: &Path, submit_file: &str) -> essq_client::Result<String> {
        let script = remote_dir.join(submit_file);
        let mut state = lock(&self.state);
        if !state.files.contains_key(&script) {
            drop(state);
            return Err(self.missing("sbatch", &script));
        }
        state.next_id += 1;
        state.submissions.push(remote_dir.to_path_buf());
        Ok(state.next_id.to_string())
    }

    fn check_job_status(&mut self, _job_id: &str) -> essq_client::Result<QueueState> {
        let mut state = lock(&self.state);
        state.status_checks += 1;
        let checks = state.status_checks;
        let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut state.reveals)
            .into_iter()
            .partition(|(after, _, _)| *after <= checks);
        state.reveals = waiting;
        for (_, path, content) in due {
            state.files.insert(path, content);
        }
        Ok(state.queue.pop_front().unwrap_or(QueueState::Absent))
    }

    fn delete_job(&mut self, job_id: &str) -> essq_client::Result<()> {
        lock(&self.state).deleted.push(job_id.to_string());
        Ok(())
    }
}

/// Hands out queued diagnoses in order. `None` entries fail the probe.
#[derive(Debug, Default)]
pub struct ScriptedProbe {
    answers: Mutex<VecDeque<Option<EssStatus>>>,
    calls: Mutex<usize>,
}

impl ScriptedProbe {
    pub fn new(answers: impl IntoIterator<Item = Option<EssStatus>>) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().collect()),
            calls: Mutex::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StatusProbe for ScriptedProbe {
    fn probe(
        &self,
        output: &Path,
        _label: &str,
        _job_type: JobType,
        _backend: &str,
    ) -> essq_engine::Result<EssStatus> {
        *self.calls.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        let next = self
            .answers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match next {
            Some(Some(status)) => Ok(status),
            Some(None) => Err(EngineError::Probe {
                path: output.to_path_buf(),
                message: "output could not be classified".to_string(),
            }),
            None => Ok(done()),
        }
    }
}

pub fn done() -> EssStatus {
    EssStatus {
        status: EssState::Done,
        ..EssStatus::default()
    }
}

/// An errored diagnosis carrying `keywords`.
pub fn errored(keywords: &[&str], error: &str) -> EssStatus {
    EssStatus {
        status: EssState::Errored,
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
        error: error.to_string(),
        line: String::new(),
    }
}
