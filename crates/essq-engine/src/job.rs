//! The shared job base: numbering, paths, resources, staging, execution and
//! polling for one logical job, whatever its backend.

use crate::backend::{Backend, InputContext};
use crate::context::EngineContext;
use crate::error::{EngineError, Result};
use crate::files::{FileDescriptor, FileSource, StagedFiles};
use crate::planner::{self, BatchPlan};
use crate::resources::{self, HostCapacity};
use crate::status::{self, Observer, PollResult};
use crate::submit::{self, SubmitContext};
use crate::trsh::{self, Correction, Limits, Outcome};
use chrono::{DateTime, Local};
use essq_client::hosts::detect_capacity;
use essq_client::{with_session, CompletedEntry, Host, QueueState, RegistryEntry};
use essq_core::constants::{dirs, files, keywords};
use essq_core::errors::ConfigError;
use essq_core::logging;
use essq_core::model::{
    ConfigBag, EssStatus, ExecutionKind, JobNumber, JobSpec, JobStatus, JobType, Level, Namespace,
    ServerStatus, TroubleshootState,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

/// Serializable restart snapshot of a [`Job`], stored as `job.json` in the
/// job's local directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub spec: JobSpec,
    pub host: String,
    pub job_number: JobNumber,
    pub job_name: String,
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub status: JobStatus,
    pub cpu_cores: u32,
    pub memory_gb: f64,
    pub max_job_time_hrs: f64,
    #[serde(default)]
    pub tried_methods: Vec<String>,
    pub level: Level,
    pub job_type: JobType,
    #[serde(default)]
    pub fine: bool,
    #[serde(default)]
    pub args: ConfigBag,
    #[serde(default)]
    pub checkfile: Option<PathBuf>,
    #[serde(default)]
    pub initial_time: Option<DateTime<Local>>,
    #[serde(default)]
    pub final_time: Option<DateTime<Local>>,
    #[serde(default)]
    pub resubmissions: u32,
}

impl JobRecord {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs_err::read_to_string(path).map_err(ConfigError::Io)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs_err::write(path, content).map_err(ConfigError::Io)?;
        Ok(())
    }
}

pub struct Job {
    ctx: Arc<EngineContext>,
    backend: Arc<dyn Backend>,
    host: Box<dyn Host>,
    spec: JobSpec,
    number: JobNumber,
    name: String,
    job_id: Option<String>,
    status: JobStatus,
    cpu_cores: u32,
    memory_gb: f64,
    max_job_time_hrs: f64,
    tried_methods: Vec<String>,
    level: Level,
    job_type: JobType,
    fine: bool,
    args: ConfigBag,
    checkfile: Option<PathBuf>,
    plan: BatchPlan,
    local_path: PathBuf,
    remote_path: PathBuf,
    initial_time: Option<DateTime<Local>>,
    final_time: Option<DateTime<Local>>,
    resubmissions: u32,
}

/// Spec args win; level args fill in only when no troubleshooting args exist.
fn resolve_args(spec: &JobSpec) -> ConfigBag {
    let mut args = spec.args.clone();
    if spec.level.args.is_empty() {
        return args;
    }
    if !spec.args.trsh.is_empty() {
        tracing::warn!(
            "Ignoring the arguments of level {} since troubleshooting arguments are set",
            spec.level
        );
        return args;
    }
    for ns in [Namespace::Keyword, Namespace::Block, Namespace::Trsh] {
        for (key, value) in spec.level.args.namespace(ns) {
            if args.get(ns, key).is_none() {
                args.set(ns, key, value.clone());
            }
        }
    }
    args
}

fn host_capacity(host: &dyn Host) -> HostCapacity {
    let config = host.config();
    let mut capacity = HostCapacity {
        cpus: config.cpus,
        memory_gb: config.memory,
    };
    if host.is_local() && (capacity.cpus.is_none() || capacity.memory_gb.is_none()) {
        let (cpus, memory_gb) = detect_capacity();
        capacity.cpus = capacity.cpus.or(Some(cpus));
        capacity.memory_gb = capacity.memory_gb.or(Some(memory_gb));
    }
    capacity
}

fn local_job_path(spec: &JobSpec, job_type: JobType, name: &str) -> PathBuf {
    let kind = if job_type == JobType::TsGuess {
        dirs::TS_GUESSES
    } else if spec.is_ts() || !spec.reactions().is_empty() {
        dirs::TSS
    } else {
        dirs::SPECIES
    };
    spec.project_directory
        .join(dirs::CALCS)
        .join(kind)
        .join(spec.primary_label())
        .join(name)
}

fn remote_job_path(projects_root: &str, spec: &JobSpec, name: &str) -> PathBuf {
    let label = spec.primary_label().replace(['(', ')'], "_");
    Path::new(projects_root)
        .join(&spec.project)
        .join(label)
        .join(name)
}

impl Job {
    /// Builds a new job: validates the spec, assigns the next job number,
    /// derives resources and writes the input artifacts.
    pub fn new(ctx: Arc<EngineContext>, spec: JobSpec) -> Result<Self> {
        spec.validate()?;
        let backend = ctx.backends.create(&spec.backend)?;
        backend.check_supported(&spec)?;
        let host_name = ctx
            .settings
            .host_for_backend(backend.name(), spec.host.as_deref())?;
        let host = ctx.host(&host_name)?;

        let number = ctx.registry.next_job_number()?;
        let job_type = spec.job_type();
        let name = format!("{}_a{}", job_type, number);
        let local_path = local_job_path(&spec, job_type, &name);
        let remote_path = if host.is_local() {
            local_path.clone()
        } else {
            remote_job_path(&ctx.settings.paths.projects_root, &spec, &name)
        };

        let defaults = &ctx.settings.job_defaults;
        let derived = resources::derive_resources(
            &spec.resources,
            defaults,
            host_capacity(host.as_ref()),
            host.config().cluster_soft.memory_scope(),
        );
        let mut status = JobStatus::default();
        if derived.clamped {
            status
                .ess
                .keywords
                .push(keywords::MAX_TOTAL_JOB_MEMORY.to_string());
        }
        let max_job_time_hrs = resources::sanitize_max_job_time(
            spec.resources
                .max_job_time_hrs
                .unwrap_or(defaults.time_limit_hrs),
        );
        let plan = planner::plan(&spec, defaults.rotor_scan_resolution);
        let args = resolve_args(&spec);

        let job = Self {
            backend,
            host,
            number,
            name,
            job_id: None,
            status,
            cpu_cores: derived.cpu_cores,
            memory_gb: derived.memory_gb,
            max_job_time_hrs,
            tried_methods: Vec::new(),
            level: spec.level.clone(),
            job_type,
            fine: spec.fine,
            args,
            checkfile: spec.checkfile.clone(),
            plan,
            local_path,
            remote_path,
            initial_time: None,
            final_time: None,
            resubmissions: 0,
            spec,
            ctx,
        };
        tracing::info!(
            "Created {} job {} for {} on host '{}' ({} cores, {:.2} GB)",
            job.backend.name(),
            job.name,
            job.label(),
            job.host.name(),
            job.cpu_cores,
            job.memory_gb
        );

        if job.plan.is_array() {
            job.write_batch_artifact()?;
        } else {
            job.backend.write_input_artifacts(&job)?;
        }
        job.ctx.registry.append_initiated(&job.registry_entry())?;
        Ok(job)
    }

    /// Rebuilds a job from its snapshot. No number is assigned and nothing
    /// is logged to the registry.
    pub fn restore(ctx: Arc<EngineContext>, record: JobRecord) -> Result<Self> {
        let backend = ctx.backends.create(&record.spec.backend)?;
        let host = ctx.host(&record.host)?;
        let local_path = local_job_path(&record.spec, record.spec.job_type(), &record.job_name);
        let remote_path = if host.is_local() {
            local_path.clone()
        } else {
            remote_job_path(&ctx.settings.paths.projects_root, &record.spec, &record.job_name)
        };
        let plan = planner::plan(&record.spec, ctx.settings.job_defaults.rotor_scan_resolution);
        Ok(Self {
            backend,
            host,
            number: record.job_number,
            name: record.job_name,
            job_id: record.job_id,
            status: record.status,
            cpu_cores: record.cpu_cores,
            memory_gb: record.memory_gb,
            max_job_time_hrs: record.max_job_time_hrs,
            tried_methods: record.tried_methods,
            level: record.level,
            job_type: record.job_type,
            fine: record.fine,
            args: record.args,
            checkfile: record.checkfile,
            plan,
            local_path,
            remote_path,
            initial_time: record.initial_time,
            final_time: record.final_time,
            resubmissions: record.resubmissions,
            spec: record.spec,
            ctx,
        })
    }

    pub fn record(&self) -> JobRecord {
        JobRecord {
            spec: self.spec.clone(),
            host: self.host.name().to_string(),
            job_number: self.number,
            job_name: self.name.clone(),
            job_id: self.job_id.clone(),
            status: self.status.clone(),
            cpu_cores: self.cpu_cores,
            memory_gb: self.memory_gb,
            max_job_time_hrs: self.max_job_time_hrs,
            tried_methods: self.tried_methods.clone(),
            level: self.level.clone(),
            job_type: self.job_type,
            fine: self.fine,
            args: self.args.clone(),
            checkfile: self.checkfile.clone(),
            initial_time: self.initial_time,
            final_time: self.final_time,
            resubmissions: self.resubmissions,
        }
    }

    /// Writes `job.json` into the local job directory and returns its path.
    pub fn save_record(&self) -> Result<PathBuf> {
        fs_err::create_dir_all(&self.local_path).map_err(ConfigError::Io)?;
        let path = self.local_path.join(files::JOB_RECORD);
        self.record().save(&path)?;
        Ok(path)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn number(&self) -> JobNumber {
        self.number
    }

    pub fn label(&self) -> &str {
        self.spec.primary_label()
    }

    pub fn spec(&self) -> &JobSpec {
        &self.spec
    }

    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    pub fn host_name(&self) -> &str {
        self.host.name()
    }

    pub fn job_id(&self) -> Option<&str> {
        self.job_id.as_deref()
    }

    pub fn status(&self) -> &JobStatus {
        &self.status
    }

    pub fn plan(&self) -> &BatchPlan {
        &self.plan
    }

    pub fn cpu_cores(&self) -> u32 {
        self.cpu_cores
    }

    pub fn memory_gb(&self) -> f64 {
        self.memory_gb
    }

    pub fn max_job_time_hrs(&self) -> f64 {
        self.max_job_time_hrs
    }

    pub fn tried_methods(&self) -> &[String] {
        &self.tried_methods
    }

    pub fn level(&self) -> &Level {
        &self.level
    }

    pub fn args(&self) -> &ConfigBag {
        &self.args
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    pub fn remote_path(&self) -> &Path {
        &self.remote_path
    }

    pub fn initial_time(&self) -> Option<DateTime<Local>> {
        self.initial_time
    }

    pub fn final_time(&self) -> Option<DateTime<Local>> {
        self.final_time
    }

    pub fn resubmissions(&self) -> u32 {
        self.resubmissions
    }

    fn is_incore(&self) -> bool {
        self.spec.execution == ExecutionKind::Incore
    }

    pub fn input_context(&self) -> InputContext<'_> {
        let first = self.spec.species().first();
        let xyz = first
            .and_then(|s| s.geometry())
            .or_else(|| {
                self.spec
                    .reactions()
                    .first()
                    .and_then(|r| r.reactants_xyz.as_ref())
            });
        InputContext {
            job_name: &self.name,
            label: self.label(),
            job_type: self.job_type,
            level: &self.level,
            args: &self.args,
            charge: self.spec.charge(),
            multiplicity: self.spec.multiplicity(),
            number_of_radicals: first.and_then(|s| s.number_of_radicals),
            is_ts: self.spec.is_ts(),
            xyz,
            cpu_cores: self.cpu_cores,
            memory: self
                .backend
                .compute_input_memory_limit(self.memory_gb, self.cpu_cores),
            checkfile: self.checkfile.is_some(),
            fine: self.fine,
            constraints: &self.spec.constraints,
            irc_direction: self.spec.irc_direction,
        }
    }

    /// Writes `content` to `name` in the local job directory.
    pub fn write_local(&self, name: &str, content: &str) -> Result<()> {
        fs_err::create_dir_all(&self.local_path).map_err(ConfigError::Io)?;
        fs_err::write(self.local_path.join(name), content).map_err(ConfigError::Io)?;
        Ok(())
    }

    fn write_batch_artifact(&self) -> Result<()> {
        let settings = planner::ItemSettings {
            level: &self.level,
            job_type: self.job_type,
            fine: self.fine,
            args: &self.args,
        };
        let artifact = planner::build_artifact(
            &self.spec,
            &settings,
            &self.plan,
            self.ctx.settings.job_defaults.rotor_scan_resolution,
        );
        tracing::debug!(
            "Job {} batches {} work items over {} ({} tasks)",
            self.name,
            artifact.item_count(),
            self.plan.dimension,
            self.plan.tasks.unwrap_or(1)
        );
        self.write_local(files::BATCH_DATA, &serde_json::to_string_pretty(&artifact)?)
    }

    fn submit_filename(&self) -> &'static str {
        self.host.config().cluster_soft.submit_filename()
    }

    /// The file the status probe reads after the run.
    pub fn output_path(&self) -> PathBuf {
        if self.plan.is_array() {
            self.local_path.join(files::BATCH_DATA)
        } else {
            self.local_path.join(self.backend.output_filename())
        }
    }

    pub fn default_staged_files(&self) -> StagedFiles {
        let mut staged = StagedFiles::default();
        let (local, remote) = (&self.local_path, &self.remote_path);
        if !self.is_incore() {
            staged.upload(FileDescriptor::in_dirs(self.submit_filename(), local, remote).executable());
        }
        if self.plan.is_array() {
            staged.upload(FileDescriptor::in_dirs(files::BATCH_DATA, local, remote));
            staged.download(FileDescriptor::in_dirs(files::BATCH_DATA, local, remote));
        } else {
            staged.upload(FileDescriptor::in_dirs(self.backend.input_filename(), local, remote));
            staged.download(FileDescriptor::in_dirs(self.backend.output_filename(), local, remote));
        }
        if let Some(checkfile) = &self.checkfile {
            staged.upload(FileDescriptor::from_path(
                files::CHECK_FILE,
                checkfile,
                &remote.join(files::CHECK_FILE),
            ));
        }
        staged
    }

    fn submit_context(&self) -> SubmitContext {
        let config = self.host.config();
        SubmitContext {
            name: self.name.clone(),
            username: config.username(),
            t_max: resources::format_max_job_time(
                self.max_job_time_hrs,
                config.cluster_soft.time_format(),
            ),
            memory_mb: resources::submit_memory_mb(
                self.memory_gb,
                self.cpu_cores,
                self.status.ess.has_keyword(keywords::MAX_TOTAL_JOB_MEMORY),
                config.cluster_soft.memory_scope(),
            ),
            cpus: self.cpu_cores,
            architecture: config.architecture_hint(self.cpu_cores),
            max_task_num: self.plan.tasks,
            install_path: self.ctx.settings.paths.install_path.clone(),
            batch_data_path: self
                .remote_path
                .join(files::BATCH_DATA)
                .to_string_lossy()
                .into_owned(),
        }
    }

    fn write_submit_script(&self) -> Result<()> {
        let config = self.host.config();
        let template = submit::select_template(
            self.host.name(),
            config,
            self.backend.name(),
            self.plan.is_array(),
        )?;
        let script = submit::render_submit_script(self.host.name(), template, &self.submit_context())?;
        self.write_local(self.submit_filename(), &script)
    }

    /// Renders every local artifact, then copies the uploads to the host.
    pub fn upload_files(&mut self) -> Result<()> {
        if self.plan.is_array() {
            self.write_batch_artifact()?;
        }
        let staged = self.backend.describe_staged_files(self)?;
        if !self.is_incore() {
            self.write_submit_script()?;
        }

        let mut contents = Vec::new();
        for file in &staged.uploads {
            if let FileSource::NamedTemplate(template) = file.source() {
                contents.push((file.name().to_string(), self.ctx.settings.named_template(template)?.to_string()));
            }
        }

        let remote_dir = self.remote_path.clone();
        with_session(self.host.as_ref(), self.ctx.retry_policy(), |session| {
            session.make_dirs(&remote_dir)?;
            for file in &staged.uploads {
                match file.source() {
                    FileSource::NamedTemplate(_) => {
                        if let Some((_, content)) = contents.iter().find(|(n, _)| n == file.name()) {
                            session.upload_content(content, file.remote())?;
                        }
                    }
                    FileSource::LiteralPath if file.local() == file.remote() => {}
                    FileSource::LiteralPath => session.upload(file.local(), file.remote())?,
                }
                if file.is_executable() {
                    session.chmod_executable(file.remote())?;
                }
            }
            Ok(())
        })?;
        self.initial_time = Some(Local::now());
        tracing::debug!("Uploaded {} file(s) for {}", staged.uploads.len(), self.name);
        Ok(())
    }

    /// Fetches the downloads and returns when the output was last written.
    /// Downloads the outputs and returns the output's modification time.
    /// Fails with `OutputMissing` while an output is absent on the host.
    fn fetch_downloads(&self) -> Result<DateTime<Local>> {
        let staged = self.default_staged_files();
        let local_dir = self.local_path.clone();
        let (modified, missing) =
            with_session(self.host.as_ref(), self.ctx.retry_policy(), |session| {
                let mut modified = None;
                for file in &staged.downloads {
                    let Some(stamp) = session.last_modified(file.remote())? else {
                        return Ok((modified, Some(file.remote().to_path_buf())));
                    };
                    modified.get_or_insert(stamp);
                    if file.local() != file.remote() {
                        fs_err::create_dir_all(&local_dir).map_err(ConfigError::Io)?;
                        session.download(file.remote(), file.local())?;
                    }
                }
                Ok((modified, None))
            })?;
        if let Some(path) = missing {
            return Err(EngineError::OutputMissing { path });
        }
        Ok(modified.unwrap_or_else(Local::now))
    }

    pub fn download_files(&mut self) -> Result<()> {
        self.final_time = Some(self.fetch_downloads()?);
        Ok(())
    }

    fn execution_line(&self) -> String {
        let kind = if self.plan.is_array() {
            "job array"
        } else if self.is_incore() {
            "incore job"
        } else {
            "job"
        };
        let mut line = format!("Running {} {} for {}", kind, self.name, self.label());
        if self.fine {
            line.push_str(" (fine opt)");
        }
        let pivots: Vec<String> = self
            .spec
            .species()
            .iter()
            .flat_map(|s| s.rotors.iter())
            .filter(|r| !r.pivots.is_empty())
            .map(|r| format!("{:?}", r.pivots))
            .collect();
        if self.job_type == JobType::Scan && !pivots.is_empty() {
            line.push_str(&format!(" (pivots: {})", pivots.join(", ")));
        }
        line
    }

    /// Runs the job: submits it to the queue, or runs the incore command to
    /// completion.
    pub fn execute(&mut self) -> Result<()> {
        tracing::info!("{}", self.execution_line());
        if self.is_incore() {
            return self.run_incore();
        }
        let remote_dir = self.remote_path.clone();
        let submit_file = self.submit_filename();
        let job_id = with_session(self.host.as_ref(), self.ctx.retry_policy(), |session| {
            session.submit_job(&remote_dir, submit_file)
        })?;
        tracing::info!("Job {} submitted to '{}' as {}", self.name, self.host.name(), job_id);
        self.job_id = Some(job_id);
        self.status.server = ServerStatus::Running;
        Ok(())
    }

    fn run_incore(&mut self) -> Result<()> {
        let command = self
            .host
            .config()
            .incore_commands
            .get(self.backend.name())
            .ok_or_else(|| ConfigError::MissingIncoreCommand {
                host: self.host.name().to_string(),
                backend: self.backend.name().to_string(),
            })?;
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command).current_dir(&self.local_path);
        logging::log_and_print_command(&cmd);
        let output = cmd.output().map_err(ConfigError::Io)?;
        if !output.status.success() {
            tracing::warn!(
                "Incore command for {} exited with {}: {}",
                self.name,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        self.status.server = ServerStatus::Done;
        Ok(())
    }

    /// One step of the status state machine.
    pub fn poll(&mut self) -> Result<PollResult> {
        let mut status = self.status.clone();
        let mut hours = self.max_job_time_hrs;
        let mut observer = JobObserver {
            job: self,
            final_time: None,
        };
        let result = status::poll(&mut status, &mut hours, &mut observer)?;
        let final_time = observer.final_time;
        if final_time.is_some() {
            self.final_time = final_time;
        }
        self.status = status;
        self.max_job_time_hrs = hours;
        Ok(result)
    }

    /// Cancels the job on its host, whatever its state.
    pub fn delete(&mut self) -> Result<()> {
        let Some(job_id) = self.job_id.clone() else {
            tracing::warn!("Job {} has no scheduler id, nothing to delete", self.name);
            return Ok(());
        };
        with_session(self.host.as_ref(), self.ctx.retry_policy(), |session| {
            session.delete_job(&job_id)
        })?;
        tracing::info!("Deleted job {} ({}) on '{}'", self.name, job_id, self.host.name());
        Ok(())
    }

    pub fn troubleshoot_state(&self) -> TroubleshootState {
        TroubleshootState {
            tried_methods: self.tried_methods.clone(),
            cpu_cores: self.cpu_cores,
            memory_gb: self.memory_gb,
            level: self.level.clone(),
            job_type: self.job_type,
            fine: self.fine,
        }
    }

    pub fn limits(&self) -> Limits {
        let capacity = host_capacity(self.host.as_ref());
        Limits {
            memory_ceiling_gb: capacity
                .memory_ceiling_gb(self.ctx.settings.job_defaults.max_node_memory_fraction),
            electron_pairs: self.spec.electron_pairs,
        }
    }

    /// The next step for the current diagnosis.
    pub fn troubleshoot(&self) -> Outcome {
        trsh::troubleshoot(
            &self.status.ess,
            &self.troubleshoot_state(),
            &self.args,
            self.limits(),
            self.backend.as_ref(),
        )
    }

    /// Adopts a correction and resets the job for another attempt.
    pub fn apply_correction(&mut self, correction: Correction) -> Result<()> {
        let Correction {
            state,
            args,
            remove_checkpoint,
            ceiling_reached,
            applied,
        } = correction;
        tracing::info!(
            "Resubmitting {} with {} ({} cores, {:.2} GB, {})",
            self.name,
            applied.join(", "),
            state.cpu_cores,
            state.memory_gb,
            state.level
        );
        self.cpu_cores = state.cpu_cores;
        self.memory_gb = state.memory_gb;
        self.level = state.level;
        self.job_type = state.job_type;
        self.fine = state.fine;
        self.tried_methods = state.tried_methods;
        self.args = args;
        if remove_checkpoint {
            self.checkfile = None;
            let stale = self.local_path.join(files::CHECK_FILE);
            if stale.exists() {
                fs_err::remove_file(&stale).map_err(ConfigError::Io)?;
            }
        }
        let mut ess = EssStatus::default();
        if ceiling_reached {
            ess.keywords.push(keywords::MAX_TOTAL_JOB_MEMORY.to_string());
        }
        self.status = JobStatus {
            server: ServerStatus::Initializing,
            ess,
        };
        self.job_id = None;
        self.initial_time = None;
        self.final_time = None;
        self.resubmissions += 1;
        self.ctx.registry.append_initiated(&self.registry_entry())?;
        Ok(())
    }

    /// Gives up on the job when troubleshooting is exhausted.
    pub fn exhausted_error(&self, reason: &str) -> EngineError {
        EngineError::ResourceExhausted {
            job: self.name.clone(),
            reason: reason.to_string(),
        }
    }

    pub fn registry_entry(&self) -> RegistryEntry {
        RegistryEntry {
            job_num: self.number,
            project: self.spec.project.clone(),
            label: self.label().to_string(),
            job_type: self.job_type.to_string(),
            is_ts: self.spec.is_ts(),
            charge: self.spec.charge(),
            multiplicity: self.spec.multiplicity(),
            job_name: self.name.clone(),
            job_id: self.job_id.clone(),
            host: self.host.name().to_string(),
            backend: self.backend.name().to_string(),
            memory_gb: self.memory_gb,
            level: self.level.to_string(),
        }
    }

    /// Appends the finished attempt to the completed log.
    pub fn log_completed(&self) -> Result<()> {
        let mut entry = self.registry_entry();
        if self.fine {
            entry.job_type.push_str(" (fine)");
        }
        let completed = CompletedEntry {
            entry,
            initial_time: self.initial_time,
            final_time: self.final_time,
            run_time_secs: resources::determine_run_time(self.initial_time, self.final_time),
            server_status: self.status.server,
            ess_status: self.status.ess.status,
            tried_methods: self.tried_methods.clone(),
        };
        self.ctx.registry.append_completed(&completed)?;
        Ok(())
    }
}

struct JobObserver<'a> {
    job: &'a Job,
    final_time: Option<DateTime<Local>>,
}

impl Observer for JobObserver<'_> {
    fn queue_state(&mut self) -> Result<QueueState> {
        let job = self.job;
        if job.is_incore() {
            return Ok(QueueState::Absent);
        }
        let job_id = job.job_id.clone().ok_or_else(|| {
            EngineError::InvalidState(format!("job {} was never submitted", job.name))
        })?;
        Ok(with_session(job.host.as_ref(), job.ctx.retry_policy(), |session| {
            session.check_job_status(&job_id)
        })?)
    }

    fn diagnose(&mut self) -> Result<EssStatus> {
        let job = self.job;
        self.final_time = Some(job.fetch_downloads()?);
        let probe = job.ctx.probe().ok_or_else(|| EngineError::Probe {
            path: job.output_path(),
            message: "no probe_command is configured".to_string(),
        })?;
        probe.probe(&job.output_path(), job.label(), job.job_type, job.backend.name())
    }

    fn native_output(&mut self) -> Result<Vec<String>> {
        let job = self.job;
        let job_id = job.job_id.clone().unwrap_or_default();
        let remote_dir = job.remote_path.clone();
        Ok(with_session(job.host.as_ref(), job.ctx.retry_policy(), |session| {
            let listing = session.list_dir(&remote_dir)?;
            let scheduler = session.scheduler();
            scheduler
                .native_output_files(&listing, &job_id)
                .iter()
                .map(|name| session.read_file(&remote_dir.join(name)))
                .collect()
        })?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use essq_core::model::{ReactionRef, SpeciesRef};

    fn spec() -> JobSpec {
        let mut level = Level::new("wb97xd", Some("def2-tzvp"));
        level.args.set(Namespace::Keyword, "general", "scf=xqc");
        level.args.set(Namespace::Keyword, "opt", "opt=calcfc");
        let mut args = ConfigBag::default();
        args.set(Namespace::Keyword, "general", "nosymm");
        JobSpec {
            backend: "gaussian".into(),
            job_types: vec![JobType::Opt],
            level,
            project: "demo".into(),
            project_directory: PathBuf::from("/home/u/demo"),
            execution: ExecutionKind::Queue,
            resources: Default::default(),
            args,
            species: Some(vec![SpeciesRef::new("C2H5(OH)")]),
            reactions: None,
            host: None,
            fine: false,
            checkfile: None,
            constraints: Vec::new(),
            scan_type: None,
            irc_direction: None,
            bath_gas: None,
            tasks: None,
            electron_pairs: None,
        }
    }

    #[test]
    fn test_spec_args_win_over_level_args() {
        let args = resolve_args(&spec());
        assert_eq!(args.get(Namespace::Keyword, "general"), Some("nosymm"));
        assert_eq!(args.get(Namespace::Keyword, "opt"), Some("opt=calcfc"));
    }

    #[test]
    fn test_level_args_ignored_with_troubleshooting_args() {
        let mut s = spec();
        s.args.set(Namespace::Trsh, "opt", "cartesian");
        let args = resolve_args(&s);
        assert_eq!(args.get(Namespace::Keyword, "opt"), None);
        assert_eq!(args.get(Namespace::Trsh, "opt"), Some("cartesian"));
    }

    #[test]
    fn test_job_paths() {
        let s = spec();
        assert_eq!(
            local_job_path(&s, JobType::Opt, "opt_a5"),
            PathBuf::from("/home/u/demo/calcs/Species/C2H5(OH)/opt_a5")
        );
        assert_eq!(
            remote_job_path("runs/essq_projects", &s, "opt_a5"),
            PathBuf::from("runs/essq_projects/demo/C2H5_OH_/opt_a5")
        );
        assert_eq!(
            local_job_path(&s, JobType::TsGuess, "ts_guess_a6"),
            PathBuf::from("/home/u/demo/calcs/TS_guesses/C2H5(OH)/ts_guess_a6")
        );

        let mut ts = spec();
        ts.species = None;
        ts.reactions = Some(vec![ReactionRef {
            index: 3,
            label: "rxn3".into(),
            charge: 0,
            multiplicity: 1,
            reactants_xyz: None,
            products_xyz: None,
        }]);
        assert_eq!(
            local_job_path(&ts, JobType::Irc, "irc_a7"),
            PathBuf::from("/home/u/demo/calcs/TSs/rxn3/irc_a7")
        );
    }

    #[test]
    fn test_record_round_trip() {
        let record = JobRecord {
            spec: spec(),
            host: "local".into(),
            job_number: JobNumber::new(12),
            job_name: "opt_a12".into(),
            job_id: Some("4242".into()),
            status: JobStatus::default(),
            cpu_cores: 8,
            memory_gb: 14.0,
            max_job_time_hrs: 120.0,
            tried_methods: vec!["memory".into()],
            level: Level::new("wb97xd", Some("def2-tzvp")),
            job_type: JobType::Opt,
            fine: false,
            args: ConfigBag::default(),
            checkfile: None,
            initial_time: None,
            final_time: None,
            resubmissions: 1,
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.json");
        record.save(&path).unwrap();
        assert_eq!(JobRecord::load(&path).unwrap(), record);
    }
}
