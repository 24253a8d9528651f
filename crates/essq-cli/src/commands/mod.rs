use crate::error::CliError;
use essq_core::config::Settings;
use essq_core::model::JobSpec;
use essq_engine::{EngineContext, Job, JobRecord};
use std::path::Path;
use std::sync::Arc;

pub mod completions;
pub mod delete;
pub mod list;
pub mod plan;
pub mod poll;
pub mod submit;
pub mod troubleshoot;

pub(crate) fn load_job_spec(path: &Path) -> Result<JobSpec, CliError> {
    let content = fs_err::read_to_string(path)?;
    toml::from_str(&content).map_err(|source| CliError::JobSpec {
        path: path.to_path_buf(),
        source,
    })
}

pub(crate) fn engine(settings: Settings) -> Result<Arc<EngineContext>, CliError> {
    Ok(Arc::new(EngineContext::from_settings(settings)?))
}

/// Rebuilds the job saved at `record`.
pub(crate) fn restore_job(engine: &Arc<EngineContext>, record: &Path) -> Result<Job, CliError> {
    let record = JobRecord::load(record)?;
    Ok(Job::restore(Arc::clone(engine), record)?)
}
