//! Seams to the programs that interpret ESS output: the status probe that
//! classifies a finished run and the parser that reads vibrational data.

use crate::error::{EngineError, Result};
use essq_core::config::Settings;
use essq_core::logging;
use essq_core::model::{EssStatus, JobType, Xyz};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Command;

/// Classifies an ESS output file. Implementations only read `output`.
pub trait StatusProbe: Send + Sync {
    fn probe(&self, output: &Path, label: &str, job_type: JobType, backend: &str) -> Result<EssStatus>;
}

/// Runs an external executable that prints the diagnosis as JSON:
/// `{"status": "errored", "keywords": ["Memory"], "error": "...", "line": "..."}`.
#[derive(Debug, Clone)]
pub struct CommandProbe {
    program: String,
}

impl CommandProbe {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Option<Self> {
        settings.probe_command.as_deref().map(Self::new)
    }

    fn failure(output: &Path, message: impl Into<String>) -> EngineError {
        EngineError::Probe {
            path: output.to_path_buf(),
            message: message.into(),
        }
    }
}

impl StatusProbe for CommandProbe {
    fn probe(&self, output: &Path, label: &str, job_type: JobType, backend: &str) -> Result<EssStatus> {
        if !output.is_file() {
            return Err(Self::failure(output, "output file is missing"));
        }
        let mut cmd = Command::new(&self.program);
        cmd.arg(output).arg(label).arg(job_type.as_str()).arg(backend);
        logging::log_and_print_command(&cmd);
        let result = cmd
            .output()
            .map_err(|e| Self::failure(output, format!("could not run '{}': {}", self.program, e)))?;
        if !result.status.success() {
            return Err(Self::failure(
                output,
                format!(
                    "'{}' exited with {}: {}",
                    self.program,
                    result.status,
                    String::from_utf8_lossy(&result.stderr).trim()
                ),
            ));
        }
        let stdout = String::from_utf8_lossy(&result.stdout);
        serde_json::from_str::<EssStatus>(stdout.trim())
            .map_err(|e| Self::failure(output, format!("unreadable diagnosis: {}", e)))
    }
}

/// Equilibrium geometry, frequencies (cm^-1) and one displacement vector per
/// atom for every mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VibrationalData {
    pub xyz: Xyz,
    pub frequencies: Vec<f64>,
    pub normal_modes: Vec<Vec<[f64; 3]>>,
}

impl VibrationalData {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.frequencies.len() != self.normal_modes.len() {
            return Err(format!(
                "{} frequencies but {} normal modes",
                self.frequencies.len(),
                self.normal_modes.len()
            ));
        }
        if let Some(mode) = self.normal_modes.iter().find(|m| m.len() != self.xyz.len()) {
            return Err(format!(
                "a normal mode has {} displacements for {} atoms",
                mode.len(),
                self.xyz.len()
            ));
        }
        Ok(())
    }
}

pub trait VibrationalParser {
    fn parse(&self, path: &Path) -> Result<VibrationalData>;
}

/// Reads [`VibrationalData`] serialized as JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonVibrationalParser;

impl VibrationalParser for JsonVibrationalParser {
    fn parse(&self, path: &Path) -> Result<VibrationalData> {
        let content = fs_err::read_to_string(path).map_err(|e| EngineError::Probe {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let data: VibrationalData = serde_json::from_str(&content)?;
        data.validate().map_err(|message| EngineError::Probe {
            path: path.to_path_buf(),
            message,
        })?;
        Ok(data)
    }
}
