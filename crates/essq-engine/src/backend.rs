//! The contract every execution backend satisfies, and the registry that
//! maps backend names to constructors.

use crate::backends::{GaussianBackend, MolproBackend, OrcaBackend, QchemBackend};
use crate::error::Result;
use crate::files::StagedFiles;
use crate::job::Job;
use essq_core::constants::files::OUTPUT;
use essq_core::errors::DomainError;
use essq_core::model::{
    ConfigBag, Constraint, IrcDirection, JobSpec, JobType, Level, Namespace, Xyz,
};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Requested memory expressed in a backend's native input-file unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMemory {
    MegaWordsPerCore(u64),
    MegabytesPerCore(u64),
    TotalMegabytes(u64),
    /// The program sizes its own memory; the value is informational.
    SelfManaged { gb: u64 },
}

impl fmt::Display for InputMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputMemory::MegaWordsPerCore(v) => write!(f, "{} MW/core", v),
            InputMemory::MegabytesPerCore(v) => write!(f, "{} MB/core", v),
            InputMemory::TotalMegabytes(v) => write!(f, "{} MB", v),
            InputMemory::SelfManaged { gb } => write!(f, "self-managed (~{} GB)", gb),
        }
    }
}

/// Everything a backend needs to render its input file.
#[derive(Debug, Clone)]
pub struct InputContext<'a> {
    pub job_name: &'a str,
    pub label: &'a str,
    pub job_type: JobType,
    pub level: &'a Level,
    pub args: &'a ConfigBag,
    pub charge: i32,
    pub multiplicity: u32,
    pub number_of_radicals: Option<u32>,
    pub is_ts: bool,
    pub xyz: Option<&'a Xyz>,
    pub cpu_cores: u32,
    pub memory: InputMemory,
    pub checkfile: bool,
    pub fine: bool,
    pub constraints: &'a [Constraint],
    pub irc_direction: Option<IrcDirection>,
}

impl InputContext<'_> {
    /// Unrestricted references for open shells and multi-radical singlets.
    pub fn is_unrestricted(&self) -> bool {
        self.multiplicity > 1 || self.number_of_radicals.is_some_and(|n| n > 1)
    }

    pub fn keywords(&self) -> String {
        self.args.keyword.values().cloned().collect::<Vec<_>>().join(" ")
    }

    pub fn blocks(&self) -> String {
        self.args.block.values().cloned().collect::<Vec<_>>().join("\n\n")
    }

    pub fn trsh(&self, key: &str) -> Option<&str> {
        self.args.get(Namespace::Trsh, key)
    }

    pub fn geometry_lines(&self) -> String {
        let Some(xyz) = self.xyz else {
            return String::new();
        };
        xyz.symbols
            .iter()
            .zip(&xyz.coords)
            .map(|(symbol, [x, y, z])| format!("{:<3}{:>14.8}{:>14.8}{:>14.8}", symbol, x, y, z))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A failure class the troubleshooter asks backends to remedy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Problem {
    CoordinateSystem,
    OptimizationCycles,
    Scf,
    Unrecognized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Add a directive to the job's configuration bag.
    Directive {
        namespace: Namespace,
        key: String,
        value: String,
    },
    FineOptimization,
    /// Switch to the `cbs-qb3` composite method.
    CompositeMethod,
    ChangeBasis(String),
}

impl Action {
    pub fn directive(namespace: Namespace, key: &str, value: &str) -> Self {
        Action::Directive {
            namespace,
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

/// One step of a backend's escalation ladder, guarded by its tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rung {
    pub tag: String,
    pub actions: Vec<Action>,
}

impl Rung {
    pub fn new(tag: &str, action: Action) -> Self {
        Self {
            tag: tag.to_string(),
            actions: vec![action],
        }
    }

    pub fn directive(tag: &str, namespace: Namespace, key: &str, value: &str) -> Self {
        Self::new(tag, Action::directive(namespace, key, value))
    }

    pub fn and_directive(mut self, namespace: Namespace, key: &str, value: &str) -> Self {
        self.actions.push(Action::directive(namespace, key, value));
        self
    }
}

/// How much memory a failed run reported it needed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MemoryDemand {
    PerCoreMb(f64),
    AdditionalMw(f64),
    Unknown,
}

pub trait Backend: Send + Sync {
    fn name(&self) -> &'static str;

    fn input_filename(&self) -> &'static str;

    fn output_filename(&self) -> &'static str {
        OUTPUT
    }

    /// Rejects job-type combinations the backend cannot run, before any
    /// number is assigned or file written.
    fn check_supported(&self, _spec: &JobSpec) -> std::result::Result<(), DomainError> {
        Ok(())
    }

    fn compute_input_memory_limit(&self, memory_gb: f64, cpu_cores: u32) -> InputMemory;

    fn render_input(&self, input: &InputContext<'_>) -> Result<String>;

    /// Writes the input file into the job's local directory. Overwrites,
    /// so repeated calls leave the same content.
    fn write_input_artifacts(&self, job: &Job) -> Result<()> {
        let input = job.input_context();
        let content = self.render_input(&input)?;
        job.write_local(self.input_filename(), &content)
    }

    fn describe_staged_files(&self, job: &Job) -> Result<StagedFiles> {
        if !job.plan().is_array() {
            self.write_input_artifacts(job)?;
        }
        Ok(job.default_staged_files())
    }

    /// Backend-specific remedies for `problem`, in the order to try them.
    fn ladder(&self, _problem: Problem) -> Vec<Rung> {
        Vec::new()
    }

    fn memory_demand(&self, _error: &str) -> MemoryDemand {
        MemoryDemand::Unknown
    }

    /// Memory multiplier when a run failed without saying how much it needed.
    fn unknown_memory_factor(&self) -> f64 {
        2.0
    }

    fn supports_composite(&self) -> bool {
        false
    }
}

type Constructor = Box<dyn Fn() -> Arc<dyn Backend> + Send + Sync>;

/// Maps backend names to constructors.
pub struct BackendRegistry {
    constructors: BTreeMap<String, Constructor>,
}

impl BackendRegistry {
    pub fn empty() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register("gaussian", || Arc::new(GaussianBackend));
        registry.register("molpro", || Arc::new(MolproBackend));
        registry.register("orca", || Arc::new(OrcaBackend));
        registry.register("qchem", || Arc::new(QchemBackend));
        registry
    }

    pub fn register<F>(&mut self, name: &str, constructor: F)
    where
        F: Fn() -> Arc<dyn Backend> + Send + Sync + 'static,
    {
        self.constructors
            .insert(name.to_lowercase(), Box::new(constructor));
    }

    pub fn create(&self, name: &str) -> std::result::Result<Arc<dyn Backend>, DomainError> {
        self.constructors
            .get(&name.to_lowercase())
            .map(|constructor| constructor())
            .ok_or_else(|| DomainError::UnknownBackend {
                name: name.to_string(),
                registered: self.names(),
            })
    }

    pub fn names(&self) -> Vec<String> {
        self.constructors.keys().cloned().collect()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
