use crate::constants::numbering::WRAP_AT;
use crate::errors::DomainError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Conformers,
    Opt,
    Optfreq,
    Freq,
    Sp,
    Scan,
    DirectedScan,
    Irc,
    Composite,
    TsGuess,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Conformers => "conformers",
            JobType::Opt => "opt",
            JobType::Optfreq => "optfreq",
            JobType::Freq => "freq",
            JobType::Sp => "sp",
            JobType::Scan => "scan",
            JobType::DirectedScan => "directed_scan",
            JobType::Irc => "irc",
            JobType::Composite => "composite",
            JobType::TsGuess => "ts_guess",
        }
    }

    pub fn is_optimization(&self) -> bool {
        matches!(self, JobType::Opt | JobType::Optfreq | JobType::Conformers)
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "conformers" => Ok(JobType::Conformers),
            "opt" => Ok(JobType::Opt),
            "optfreq" => Ok(JobType::Optfreq),
            "freq" => Ok(JobType::Freq),
            "sp" => Ok(JobType::Sp),
            "scan" => Ok(JobType::Scan),
            "directed_scan" => Ok(JobType::DirectedScan),
            "irc" => Ok(JobType::Irc),
            "composite" => Ok(JobType::Composite),
            "ts_guess" => Ok(JobType::TsGuess),
            other => Err(DomainError::InvalidJobType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionKind {
    Incore,
    #[default]
    Queue,
}

impl fmt::Display for ExecutionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionKind::Incore => write!(f, "incore"),
            ExecutionKind::Queue => write!(f, "queue"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeFormat {
    /// `D-H:MM:SS`
    Days,
    /// `H:M:SS`
    Hours,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryScope {
    PerNode,
    PerCore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterSoftware {
    Slurm,
    Oge,
    Sge,
    Pbs,
    #[serde(rename = "htcondor")]
    HtCondor,
}

impl ClusterSoftware {
    pub fn time_format(&self) -> TimeFormat {
        match self {
            ClusterSoftware::Slurm => TimeFormat::Days,
            _ => TimeFormat::Hours,
        }
    }

    pub fn memory_scope(&self) -> MemoryScope {
        match self {
            ClusterSoftware::Slurm => MemoryScope::PerCore,
            _ => MemoryScope::PerNode,
        }
    }

    pub fn submit_filename(&self) -> &'static str {
        match self {
            ClusterSoftware::Slurm => "submit.sl",
            ClusterSoftware::HtCondor => "submit.sub",
            ClusterSoftware::Oge | ClusterSoftware::Sge | ClusterSoftware::Pbs => "submit.sh",
        }
    }
}

impl fmt::Display for ClusterSoftware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ClusterSoftware::Slurm => "slurm",
            ClusterSoftware::Oge => "oge",
            ClusterSoftware::Sge => "sge",
            ClusterSoftware::Pbs => "pbs",
            ClusterSoftware::HtCondor => "htcondor",
        };
        f.write_str(s)
    }
}

impl FromStr for ClusterSoftware {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "slurm" => Ok(ClusterSoftware::Slurm),
            "oge" => Ok(ClusterSoftware::Oge),
            "sge" => Ok(ClusterSoftware::Sge),
            "pbs" => Ok(ClusterSoftware::Pbs),
            "htcondor" => Ok(ClusterSoftware::HtCondor),
            _ => Err(DomainError::InvalidClusterSoftware(s.to_string())),
        }
    }
}

/// The three namespaces of a [`ConfigBag`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Keyword,
    Block,
    Trsh,
}

impl Namespace {
    fn separator(&self) -> &'static str {
        match self {
            Namespace::Block => "\n\n",
            Namespace::Keyword | Namespace::Trsh => " ",
        }
    }
}

/// Backend-specific directives, partitioned into a fixed set of namespaces.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigBag {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub keyword: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub block: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub trsh: BTreeMap<String, String>,
}

impl ConfigBag {
    pub fn namespace(&self, ns: Namespace) -> &BTreeMap<String, String> {
        match ns {
            Namespace::Keyword => &self.keyword,
            Namespace::Block => &self.block,
            Namespace::Trsh => &self.trsh,
        }
    }

    fn namespace_mut(&mut self, ns: Namespace) -> &mut BTreeMap<String, String> {
        match ns {
            Namespace::Keyword => &mut self.keyword,
            Namespace::Block => &mut self.block,
            Namespace::Trsh => &mut self.trsh,
        }
    }

    pub fn get(&self, ns: Namespace, key: &str) -> Option<&str> {
        self.namespace(ns).get(key).map(String::as_str)
    }

    /// Appends `value` under `key`, joined with the namespace separator.
    /// Returns `false` when the value was already present.
    pub fn add(&mut self, ns: Namespace, key: &str, value: &str) -> bool {
        let separator = ns.separator();
        let entry = self.namespace_mut(ns).entry(key.to_string()).or_default();
        if entry.contains(value) {
            return false;
        }
        if !entry.is_empty() {
            entry.push_str(separator);
        }
        entry.push_str(value);
        true
    }

    pub fn set(&mut self, ns: Namespace, key: &str, value: impl Into<String>) {
        self.namespace_mut(ns).insert(key.to_string(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.keyword.is_empty() && self.block.is_empty() && self.trsh.is_empty()
    }

    /// Adds every entry of `other`, keeping existing values.
    pub fn merge(&mut self, other: &ConfigBag) {
        for ns in [Namespace::Keyword, Namespace::Block, Namespace::Trsh] {
            for (key, value) in other.namespace(ns) {
                self.add(ns, key, value);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basis: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auxiliary_basis: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cabs: Option<String>,
    #[serde(default, skip_serializing_if = "ConfigBag::is_empty")]
    pub args: ConfigBag,
}

impl Level {
    pub fn new(method: &str, basis: Option<&str>) -> Self {
        Self {
            method: method.to_lowercase(),
            basis: basis.map(str::to_lowercase),
            auxiliary_basis: None,
            cabs: None,
            args: ConfigBag::default(),
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.basis {
            Some(basis) => write!(f, "{}/{}", self.method, basis),
            None => write!(f, "{}", self.method),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_cores: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_gb: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_job_time_hrs: Option<f64>,
}

/// Cartesian coordinates in Angstrom.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Xyz {
    pub symbols: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub isotopes: Vec<u32>,
    pub coords: Vec<[f64; 3]>,
}

impl Xyz {
    pub fn len(&self) -> usize {
        self.coords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }

    /// Dihedral angle in degrees within [0, 360) for 1-indexed atoms.
    pub fn dihedral(&self, atoms: [usize; 4]) -> Option<f64> {
        let mut points = [[0.0; 3]; 4];
        for (slot, index) in points.iter_mut().zip(atoms) {
            *slot = *self.coords.get(index.checked_sub(1)?)?;
        }
        let b1 = sub(points[1], points[0]);
        let b2 = sub(points[2], points[1]);
        let b3 = sub(points[3], points[2]);
        let n1 = cross(b1, b2);
        let n2 = cross(b2, b3);
        let b2_norm = dot(b2, b2).sqrt();
        if b2_norm == 0.0 {
            return None;
        }
        let unit_b2 = [b2[0] / b2_norm, b2[1] / b2_norm, b2[2] / b2_norm];
        let m1 = cross(n1, unit_b2);
        let x = dot(n1, n2);
        let y = dot(m1, n2);
        let angle = (-y).atan2(x).to_degrees();
        Some(angle.rem_euclid(360.0))
    }
}

fn sub(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStrategy {
    /// The ESS drives the scan itself.
    #[default]
    Ess,
    ContOpt,
    ContOptDiagonal,
    BruteForceSp,
    BruteForceOpt,
    BruteForceSpDiagonal,
    BruteForceOptDiagonal,
}

impl ScanStrategy {
    pub fn is_brute_force(&self) -> bool {
        matches!(
            self,
            ScanStrategy::BruteForceSp
                | ScanStrategy::BruteForceOpt
                | ScanStrategy::BruteForceSpDiagonal
                | ScanStrategy::BruteForceOptDiagonal
        )
    }

    pub fn is_continuous(&self) -> bool {
        matches!(self, ScanStrategy::ContOpt | ScanStrategy::ContOptDiagonal)
    }

    pub fn is_diagonal(&self) -> bool {
        matches!(
            self,
            ScanStrategy::ContOptDiagonal
                | ScanStrategy::BruteForceSpDiagonal
                | ScanStrategy::BruteForceOptDiagonal
        )
    }

    /// Strategies whose points are computed by the orchestrator rather than the ESS.
    pub fn is_directed(&self) -> bool {
        !matches!(self, ScanStrategy::Ess)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rotor {
    /// 1-indexed atom quadruplets, one per scanned dihedral.
    pub scan: Vec<[usize; 4]>,
    #[serde(default)]
    pub directed_scan_type: ScanStrategy,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pivots: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub atoms: Vec<usize>,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IrcDirection {
    Forward,
    Reverse,
}

fn default_multiplicity() -> u32 {
    1
}

fn is_zero(value: &i32) -> bool {
    *value == 0
}

fn is_singlet(value: &u32) -> bool {
    *value == 1
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeciesRef {
    pub label: String,
    #[serde(default)]
    pub charge: i32,
    #[serde(default = "default_multiplicity")]
    pub multiplicity: u32,
    #[serde(default)]
    pub is_ts: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xyz: Option<Xyz>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conformers: Vec<Xyz>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rotors: Vec<Rotor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_of_radicals: Option<u32>,
}

impl SpeciesRef {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            charge: 0,
            multiplicity: 1,
            is_ts: false,
            xyz: None,
            conformers: Vec::new(),
            rotors: Vec::new(),
            number_of_radicals: None,
        }
    }

    /// The representative geometry: the explicit one, else the first conformer.
    pub fn geometry(&self) -> Option<&Xyz> {
        self.xyz.as_ref().or_else(|| self.conformers.first())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactionRef {
    pub index: u32,
    pub label: String,
    #[serde(default)]
    pub charge: i32,
    #[serde(default = "default_multiplicity")]
    pub multiplicity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reactants_xyz: Option<Xyz>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub products_xyz: Option<Xyz>,
}

/// One logical job as requested by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobSpec {
    pub backend: String,
    pub job_types: Vec<JobType>,
    pub level: Level,
    pub project: String,
    pub project_directory: PathBuf,
    #[serde(default)]
    pub execution: ExecutionKind,
    #[serde(default)]
    pub resources: ResourceRequest,
    #[serde(default, skip_serializing_if = "ConfigBag::is_empty")]
    pub args: ConfigBag,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub species: Option<Vec<SpeciesRef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reactions: Option<Vec<ReactionRef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub fine: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkfile: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<Constraint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan_type: Option<ScanStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub irc_direction: Option<IrcDirection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bath_gas: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tasks: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub electron_pairs: Option<u32>,
}

impl JobSpec {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.backend.trim().is_empty() {
            return Err(DomainError::InvalidJobSpec(
                "backend name must not be empty".to_string(),
            ));
        }
        if self.job_types.is_empty() {
            return Err(DomainError::InvalidJobSpec(
                "at least one job type is required".to_string(),
            ));
        }
        match (&self.species, &self.reactions) {
            (Some(species), None) if !species.is_empty() => {}
            (None, Some(reactions)) if !reactions.is_empty() => {}
            (Some(_), Some(_)) => {
                return Err(DomainError::InvalidJobSpec(
                    "a job takes either species or reactions, not both".to_string(),
                ))
            }
            _ => {
                return Err(DomainError::InvalidJobSpec(
                    "a job needs a non-empty species or reactions list".to_string(),
                ))
            }
        }
        if self.tasks == Some(0) {
            return Err(DomainError::InvalidJobSpec(
                "tasks must be at least 1 when set".to_string(),
            ));
        }
        Ok(())
    }

    /// The leading job type, used in the job name.
    pub fn job_type(&self) -> JobType {
        self.job_types.first().copied().unwrap_or(JobType::Sp)
    }

    pub fn species(&self) -> &[SpeciesRef] {
        self.species.as_deref().unwrap_or(&[])
    }

    pub fn reactions(&self) -> &[ReactionRef] {
        self.reactions.as_deref().unwrap_or(&[])
    }

    pub fn is_ts(&self) -> bool {
        self.species().first().is_some_and(|s| s.is_ts)
    }

    /// Label of the first species, or of the first reaction.
    pub fn primary_label(&self) -> &str {
        self.species()
            .first()
            .map(|s| s.label.as_str())
            .or_else(|| self.reactions().first().map(|r| r.label.as_str()))
            .unwrap_or("")
    }

    pub fn charge(&self) -> i32 {
        self.species()
            .first()
            .map(|s| s.charge)
            .or_else(|| self.reactions().first().map(|r| r.charge))
            .unwrap_or(0)
    }

    pub fn multiplicity(&self) -> u32 {
        self.species()
            .first()
            .map(|s| s.multiplicity)
            .or_else(|| self.reactions().first().map(|r| r.multiplicity))
            .unwrap_or(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobNumber(u32);

impl JobNumber {
    pub fn new(value: u32) -> Self {
        Self(value % WRAP_AT)
    }

    pub fn value(self) -> u32 {
        self.0
    }

    /// The number handed out after this one.
    pub fn next(self) -> Self {
        Self::new(self.0 + 1)
    }
}

impl fmt::Display for JobNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    #[default]
    Initializing,
    Running,
    Errored,
    Done,
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServerStatus::Initializing => "initializing",
            ServerStatus::Running => "running",
            ServerStatus::Errored => "errored",
            ServerStatus::Done => "done",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EssState {
    #[default]
    Initializing,
    Running,
    Errored,
    Unconverged,
    Done,
}

impl fmt::Display for EssState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EssState::Initializing => "initializing",
            EssState::Running => "running",
            EssState::Errored => "errored",
            EssState::Unconverged => "unconverged",
            EssState::Done => "done",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EssStatus {
    pub status: EssState,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub line: String,
}

impl EssStatus {
    pub fn has_keyword(&self, keyword: &str) -> bool {
        self.keywords.iter().any(|k| k == keyword)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub server: ServerStatus,
    pub ess: EssStatus,
}

impl JobStatus {
    /// No further polling happens once this holds.
    pub fn is_terminal(&self) -> bool {
        match self.server {
            ServerStatus::Errored => true,
            ServerStatus::Done => !matches!(
                self.ess.status,
                EssState::Initializing | EssState::Running
            ),
            _ => false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.server == ServerStatus::Done && self.ess.status == EssState::Done
    }
}

/// Accumulated troubleshooting context threaded through successive attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TroubleshootState {
    pub tried_methods: Vec<String>,
    pub cpu_cores: u32,
    pub memory_gb: f64,
    pub level: Level,
    pub job_type: JobType,
    pub fine: bool,
}

impl TroubleshootState {
    pub fn has_tried(&self, tag: &str) -> bool {
        self.tried_methods.iter().any(|t| t == tag)
    }

    /// Appends a tag once. Returns whether it was new.
    pub fn record(&mut self, tag: &str) -> bool {
        if self.has_tried(tag) {
            return false;
        }
        self.tried_methods.push(tag.to_string());
        true
    }

    /// Appends a tag even when it is already present.
    pub fn record_repeatable(&mut self, tag: &str) {
        self.tried_methods.push(tag.to_string());
    }
}

/// One independently computable unit of a batched job.
///
/// Optional inputs are left out of the serialized form when at their
/// defaults; result fields are always written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub job_types: Vec<JobType>,
    pub label: String,
    pub level: Level,
    pub xyz_1: Xyz,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<ConfigBag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bath_gas: Option<String>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub charge: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Vec<Constraint>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_cores: Option<u32>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub fine: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub irc_direction: Option<IrcDirection>,
    #[serde(default = "default_multiplicity", skip_serializing_if = "is_singlet")]
    pub multiplicity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xyz_2: Option<Xyz>,

    #[serde(default)]
    pub status: i32,
    #[serde(default)]
    pub electronic_energy: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub frequencies: Option<Vec<f64>>,
    #[serde(default)]
    pub xyz_out: Option<Xyz>,
}

impl WorkItem {
    pub fn new(job_types: Vec<JobType>, label: &str, level: Level, xyz_1: Xyz) -> Self {
        Self {
            job_types,
            label: label.to_string(),
            level,
            xyz_1,
            args: None,
            bath_gas: None,
            charge: 0,
            constraints: None,
            cpu_cores: None,
            fine: false,
            irc_direction: None,
            multiplicity: 1,
            xyz_2: None,
            status: 0,
            electronic_energy: None,
            error: None,
            frequencies: None,
            xyz_out: None,
        }
    }
}

/// Work items keyed by their owning species label or reaction index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchArtifact {
    entries: BTreeMap<String, Vec<WorkItem>>,
}

impl BatchArtifact {
    pub fn push(&mut self, key: &str, item: WorkItem) {
        self.entries.entry(key.to_string()).or_default().push(item);
    }

    pub fn extend(&mut self, key: &str, items: impl IntoIterator<Item = WorkItem>) {
        self.entries.entry(key.to_string()).or_default().extend(items);
    }

    pub fn get(&self, key: &str) -> Option<&[WorkItem]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Total number of work items across all keys.
    pub fn item_count(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.item_count() == 0
    }
}
