use super::common::run_checked;
use super::{path_str, Host, RemoteCommand, Session};
use crate::error::{ClientError, Result};
use crate::scheduler::Scheduler;
use essq_core::config::HostConfig;
use essq_core::errors::ConfigError;
use essq_core::logging;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tempfile::TempDir;

/// A cluster login node reached over OpenSSH.
pub struct SshHost {
    name: String,
    address: String,
    config: HostConfig,
}

impl SshHost {
    pub fn new(name: &str, config: HostConfig) -> Result<Self> {
        let address = config.address.clone().ok_or_else(|| {
            ClientError::Config(ConfigError::General(format!(
                "Host '{}' has no address and cannot be reached over ssh.",
                name
            )))
        })?;
        let address = match &config.username {
            Some(user) if !address.contains('@') => format!("{}@{}", user, address),
            _ => address,
        };
        Ok(Self {
            name: name.to_string(),
            address,
            config,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

impl Host for SshHost {
    fn name(&self) -> &str {
        &self.name
    }

    fn config(&self) -> &HostConfig {
        &self.config
    }

    fn open_session(&self) -> Result<Box<dyn Session>> {
        let socket_dir = tempfile::Builder::new()
            .prefix("essq-ssh-")
            .tempdir()
            .map_err(ConfigError::Io)?;
        let control_path = socket_dir.path().join("control");

        let mut cmd = Command::new("ssh");
        cmd.arg("-o")
            .arg("ControlMaster=yes")
            .arg("-o")
            .arg(format!("ControlPath={}", control_path.display()))
            .arg("-o")
            .arg("ControlPersist=yes")
            .arg("-o")
            .arg("BatchMode=yes")
            .arg("-f")
            .arg("-N")
            .arg(&self.address);
        run_checked(&self.name, "ssh -fN (control master)", &mut cmd).map_err(|e| match e {
            ClientError::CommandFailed { host, stderr, .. } => ClientError::Transport {
                host,
                message: stderr,
            },
            other => other,
        })?;
        tracing::debug!("Opened ssh session to '{}'", self.name);

        Ok(Box::new(SshSession {
            name: self.name.clone(),
            address: self.address.clone(),
            config: self.config.clone(),
            control_path,
            _socket_dir: socket_dir,
        }))
    }
}

pub struct SshSession {
    name: String,
    address: String,
    config: HostConfig,
    control_path: PathBuf,
    _socket_dir: TempDir,
}

impl SshSession {
    fn control_opt(&self) -> String {
        format!("ControlPath={}", self.control_path.display())
    }

    fn ssh(&self) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.arg("-o").arg(self.control_opt()).arg(&self.address);
        cmd
    }

    fn scp(&self, from: &str, to: &str) -> Result<()> {
        let mut cmd = Command::new("scp");
        cmd.arg("-q")
            .arg("-o")
            .arg(self.control_opt())
            .arg(from)
            .arg(to);
        run_checked(&self.name, "scp", &mut cmd)?;
        Ok(())
    }

    fn remote_spec(&self, path: &Path) -> String {
        format!("{}:{}", self.address, path.display())
    }

    fn ensure_remote_parent(&mut self, remote: &Path) -> Result<()> {
        match remote.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => self.make_dirs(parent),
            _ => Ok(()),
        }
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        let mut cmd = Command::new("ssh");
        cmd.arg("-o")
            .arg(self.control_opt())
            .arg("-O")
            .arg("exit")
            .arg(&self.address)
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        logging::log_and_print_command(&cmd);
        if let Err(e) = cmd.status() {
            tracing::warn!("Failed to close ssh session to '{}': {}", self.name, e);
        }
    }
}

impl Session for SshSession {
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
        let mut cmd = self.ssh();
        cmd.arg(&shell);
        run_checked(&self.name, &shell, &mut cmd)
    }

    fn upload(&mut self, local: &Path, remote: &Path) -> Result<()> {
        self.ensure_remote_parent(remote)?;
        self.scp(&path_str(local), &self.remote_spec(remote))
    }

    fn upload_content(&mut self, content: &str, remote: &Path) -> Result<()> {
        let mut staged = tempfile::NamedTempFile::new().map_err(ConfigError::Io)?;
        staged
            .write_all(content.as_bytes())
            .map_err(ConfigError::Io)?;
        staged.flush().map_err(ConfigError::Io)?;
        self.upload(staged.path(), remote)
    }

    fn download(&mut self, remote: &Path, local: &Path) -> Result<()> {
        if let Some(parent) = local.parent() {
            fs_err::create_dir_all(parent).map_err(ConfigError::Io)?;
        }
        self.scp(&self.remote_spec(remote), &path_str(local))
    }
}
