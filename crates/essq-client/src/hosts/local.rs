use super::common::run_checked;
use super::{Host, RemoteCommand, Session};
use crate::error::{ClientError, Result};
use crate::scheduler::Scheduler;
use chrono::{DateTime, Local};
use essq_core::config::HostConfig;
use essq_core::errors::ConfigError;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::Command;

/// The machine the orchestrator runs on. Remote paths are local paths.
pub struct LocalHost {
    name: String,
    config: HostConfig,
}

impl LocalHost {
    pub fn new(name: &str, config: HostConfig) -> Self {
        Self {
            name: name.to_string(),
            config,
        }
    }
}

impl Host for LocalHost {
    fn name(&self) -> &str {
        &self.name
    }

    fn config(&self) -> &HostConfig {
        &self.config
    }

    fn is_local(&self) -> bool {
        true
    }

    fn open_session(&self) -> Result<Box<dyn Session>> {
        Ok(Box::new(LocalSession {
            name: self.name.clone(),
            config: self.config.clone(),
        }))
    }
}

pub struct LocalSession {
    name: String,
    config: HostConfig,
}

fn io_at(path: &Path) -> impl FnOnce(std::io::Error) -> ClientError + '_ {
    move |source| {
        ClientError::Config(ConfigError::PathIo {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl Session for LocalSession {
    fn host_name(&self) -> &str {
        &self.name
    }

    fn scheduler(&self) -> Scheduler {
        Scheduler::new(self.config.cluster_soft)
    }

    fn username(&self) -> String {
        self.config.username()
    }

    fn run(&mut self, command: &RemoteCommand) -> Result<String> {
        let shell = command.to_shell_string();
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&shell);
        run_checked(&self.name, &shell, &mut cmd)
    }

    fn upload(&mut self, local: &Path, remote: &Path) -> Result<()> {
        if local == remote {
            return Ok(());
        }
        if let Some(parent) = remote.parent() {
            fs_err::create_dir_all(parent).map_err(ConfigError::Io)?;
        }
        fs_err::copy(local, remote).map_err(ConfigError::Io)?;
        Ok(())
    }

    fn upload_content(&mut self, content: &str, remote: &Path) -> Result<()> {
        if let Some(parent) = remote.parent() {
            fs_err::create_dir_all(parent).map_err(ConfigError::Io)?;
        }
        fs_err::write(remote, content).map_err(ConfigError::Io)?;
        Ok(())
    }

    fn download(&mut self, remote: &Path, local: &Path) -> Result<()> {
        self.upload(remote, local)
    }

    fn make_dirs(&mut self, remote: &Path) -> Result<()> {
        fs_err::create_dir_all(remote).map_err(ConfigError::Io)?;
        Ok(())
    }

    fn chmod_executable(&mut self, remote: &Path) -> Result<()> {
        let metadata = std::fs::metadata(remote).map_err(io_at(remote))?;
        let mut permissions = metadata.permissions();
        permissions.set_mode(permissions.mode() | 0o111);
        std::fs::set_permissions(remote, permissions).map_err(io_at(remote))?;
        Ok(())
    }

    fn list_dir(&mut self, remote: &Path) -> Result<Vec<String>> {
        let mut names: Vec<String> = fs_err::read_dir(remote)
            .map_err(ConfigError::Io)?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        Ok(names)
    }

    fn read_file(&mut self, remote: &Path) -> Result<String> {
        Ok(fs_err::read_to_string(remote).map_err(ConfigError::Io)?)
    }

    fn last_modified(&mut self, remote: &Path) -> Result<Option<DateTime<Local>>> {
        match std::fs::metadata(remote) {
            Ok(metadata) => Ok(Some(
                metadata
                    .modified()
                    .map(DateTime::<Local>::from)
                    .unwrap_or_else(|_| Local::now()),
            )),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_at(remote)(e)),
        }
    }
}

/// Core count and memory in GB of the machine we run on.
pub fn detect_capacity() -> (u32, f64) {
    let mut system = sysinfo::System::new();
    system.refresh_memory();
    let memory_gb = system.total_memory() as f64 / (1024.0 * 1024.0 * 1024.0);
    let cpus = u32::try_from(num_cpus::get()).unwrap_or(u32::MAX);
    (cpus, memory_gb)
}
