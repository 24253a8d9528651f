use crate::error::{ClientError, Result};
use std::process::{Command, Output};

pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Runs `cmd` and returns stdout, mapping a non-zero exit to `CommandFailed`.
/// ssh reports connection problems with status 255, which become `Transport`.
pub(crate) fn run_checked(host: &str, display: &str, cmd: &mut Command) -> Result<String> {
    essq_core::logging::log_and_print_command(cmd);
    let output = cmd.output().map_err(|e| ClientError::Transport {
        host: host.to_string(),
        message: format!("could not spawn '{}': {}", display, e),
    })?;
    check_output(host, display, output)
}

fn check_output(host: &str, display: &str, output: Output) -> Result<String> {
    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
    }
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if output.status.code() == Some(255) {
        return Err(ClientError::Transport {
            host: host.to_string(),
            message: stderr,
        });
    }
    Err(ClientError::CommandFailed {
        host: host.to_string(),
        command: display.to_string(),
        stderr,
    })
}
