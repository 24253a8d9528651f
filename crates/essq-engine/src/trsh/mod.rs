//! Troubleshooting: maps a diagnosis onto the next attempt's parameters.
//!
//! [`troubleshoot`] is pure. It never touches the job, the host or the
//! filesystem, so the caller decides whether and how to resubmit.

pub mod negfreq;

pub use negfreq::{treat_negative_frequencies, NegFreqTreatment};

use crate::backend::{Action, Backend, MemoryDemand, Problem, Rung};
use essq_core::constants::keywords;
use essq_core::model::{ConfigBag, EssStatus, JobType, Level, TroubleshootState};
use regex::Regex;
use serde::Serialize;

/// Headroom added on top of a computed memory demand, in GB.
const MEMORY_HEADROOM_GB: f64 = 5.0;

lazy_static::lazy_static! {
    static ref ELECTRON_PAIRS: Option<Regex> = Regex::new(r"(?i)electron pairs is (\d+)").ok();
}

/// Host facts the memory and cpu policies need.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Limits {
    /// Node memory times the allowed fraction, when the host advertises it.
    pub memory_ceiling_gb: Option<f64>,
    pub electron_pairs: Option<u32>,
}

/// Parameters for the next attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Correction {
    pub state: TroubleshootState,
    pub args: ConfigBag,
    /// Do not reuse the checkpoint file.
    pub remove_checkpoint: bool,
    /// Memory now sits at the host ceiling; the marker keyword must be carried.
    pub ceiling_reached: bool,
    /// Tags applied in this step.
    pub applied: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Resubmit(Correction),
    /// No resource configuration can satisfy the run.
    Exhausted { reason: String, cpu_cores: i64 },
    /// Nothing left to try for this diagnosis.
    NoRemedy { reason: String },
}

impl Outcome {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Outcome::Exhausted { .. })
    }
}

struct Attempt<'a> {
    status: &'a EssStatus,
    limits: Limits,
    backend: &'a dyn Backend,
    correction: Correction,
}

impl Attempt<'_> {
    fn resubmit(mut self, tag: &str, repeatable: bool) -> Outcome {
        if repeatable {
            self.correction.state.record_repeatable(tag);
        } else {
            self.correction.state.record(tag);
        }
        self.correction.applied.push(tag.to_string());
        Outcome::Resubmit(self.correction)
    }

    fn is_scan(&self) -> bool {
        matches!(
            self.correction.state.job_type,
            JobType::Scan | JobType::DirectedScan
        )
    }

    fn is_applicable(&self, rung: &Rung) -> bool {
        if self.correction.state.has_tried(&rung.tag) {
            return false;
        }
        rung.actions.iter().all(|action| match action {
            Action::CompositeMethod => self.backend.supports_composite() && !self.is_scan(),
            Action::FineOptimization => !self.correction.state.fine,
            _ => true,
        })
    }

    fn apply(&mut self, action: &Action) {
        let state = &mut self.correction.state;
        match action {
            Action::Directive {
                namespace,
                key,
                value,
            } => {
                self.correction.args.add(*namespace, key, value);
            }
            Action::FineOptimization => state.fine = true,
            Action::CompositeMethod => {
                state.level = Level::new("cbs-qb3", None);
                state.job_type = JobType::Composite;
            }
            Action::ChangeBasis(basis) => state.level.basis = Some(basis.to_lowercase()),
        }
    }

    /// Applies the first rung that has not been tried yet.
    fn climb(mut self, rungs: Vec<Rung>) -> Result<Outcome, Self> {
        let Some(rung) = rungs.into_iter().find(|r| self.is_applicable(r)) else {
            return Err(self);
        };
        tracing::info!("Troubleshooting with '{}'", rung.tag);
        for action in &rung.actions {
            self.apply(action);
        }
        Ok(self.resubmit(&rung.tag, false))
    }

    fn memory(mut self) -> Outcome {
        let demand = self.backend.memory_demand(&self.status.error);
        let at_ceiling = self.status.has_keyword(keywords::MAX_TOTAL_JOB_MEMORY);
        let cores = self.correction.state.cpu_cores;
        let memory = self.correction.state.memory_gb;

        if at_ceiling {
            let new_cores = match demand {
                MemoryDemand::PerCoreMb(per_core) => {
                    let current_per_core_mb = (memory / f64::from(cores.max(1)) * 1024.0).ceil();
                    (f64::from(cores) * current_per_core_mb / per_core).floor() as i64 - 2
                }
                MemoryDemand::AdditionalMw(_) | MemoryDemand::Unknown => i64::from(cores / 2),
            };
            if new_cores < 1 {
                return Outcome::Exhausted {
                    reason: format!(
                        "{} GB is the most this host offers and even one core does not fit",
                        memory
                    ),
                    cpu_cores: new_cores,
                };
            }
            let new_cores = new_cores as u32;
            if let MemoryDemand::PerCoreMb(per_core) = demand {
                self.correction.state.memory_gb =
                    (f64::from(new_cores) * per_core / 1024.0).ceil() + MEMORY_HEADROOM_GB;
            }
            tracing::info!(
                "Memory is at the host ceiling; reducing cores from {} to {}",
                cores,
                new_cores
            );
            self.correction.state.cpu_cores = new_cores;
            self.correction.ceiling_reached = true;
            return self.resubmit("memory", true);
        }

        let mut raised = match demand {
            MemoryDemand::PerCoreMb(per_core) => {
                (f64::from(cores) * per_core / 1024.0).ceil() + MEMORY_HEADROOM_GB
            }
            MemoryDemand::AdditionalMw(mw) => memory + mw / 128.0 + MEMORY_HEADROOM_GB,
            MemoryDemand::Unknown => memory * self.backend.unknown_memory_factor(),
        };
        if let Some(ceiling) = self.limits.memory_ceiling_gb {
            if raised >= ceiling {
                raised = ceiling;
                self.correction.ceiling_reached = true;
            }
        }
        if raised <= memory && !self.correction.ceiling_reached {
            return Outcome::NoRemedy {
                reason: format!("the memory request of {} GB cannot be raised", memory),
            };
        }
        tracing::info!("Raising memory from {} GB to {} GB", memory, raised);
        self.correction.state.memory_gb = raised;
        self.resubmit("memory", true)
    }

    fn cpu(mut self) -> Result<Outcome, Self> {
        let bound = ELECTRON_PAIRS
            .as_ref()
            .and_then(|re| {
                re.captures(&self.status.error)
                    .and_then(|caps| caps.get(1))
                    .and_then(|m| m.as_str().parse::<u32>().ok())
            })
            .or(self.limits.electron_pairs);
        let Some(bound) = bound.filter(|b| *b > 0) else {
            return Err(self);
        };
        if bound >= self.correction.state.cpu_cores {
            return Err(self);
        }
        tracing::info!(
            "Capping cores at {} (was {})",
            bound,
            self.correction.state.cpu_cores
        );
        self.correction.state.cpu_cores = bound;
        Ok(self.resubmit("cpu", true))
    }

    fn optimization_ladder(&self) -> Vec<Rung> {
        let mut rungs = self.backend.ladder(Problem::OptimizationCycles);
        rungs.push(Rung::new("fine", Action::FineOptimization));
        rungs.push(Rung::new("cbs-qb3", Action::CompositeMethod));
        rungs
    }
}

/// Decides the next attempt for a failed run.
pub fn troubleshoot(
    status: &EssStatus,
    state: &TroubleshootState,
    args: &ConfigBag,
    limits: Limits,
    backend: &dyn Backend,
) -> Outcome {
    let mut attempt = Attempt {
        status,
        limits,
        backend,
        correction: Correction {
            state: state.clone(),
            args: args.clone(),
            remove_checkpoint: false,
            ceiling_reached: status.has_keyword(keywords::MAX_TOTAL_JOB_MEMORY),
            applied: Vec::new(),
        },
    };

    if status.has_keyword(keywords::SERVER_TIME_LIMIT) {
        return attempt.resubmit("time_limit", true);
    }
    if status.has_keyword(keywords::DISK_SPACE) {
        return Outcome::NoRemedy {
            reason: format!("the host ran out of disk space: {}", status.error),
        };
    }
    if status.has_keyword(keywords::CHECK_FILE) && !state.has_tried("checkfile") {
        attempt.correction.remove_checkpoint = true;
        return attempt.resubmit("checkfile", false);
    }
    if status.has_keyword(keywords::MEMORY) {
        return attempt.memory();
    }
    if status.has_keyword(keywords::CPU) {
        attempt = match attempt.cpu() {
            Ok(outcome) => return outcome,
            Err(attempt) => attempt,
        };
    }
    if status.has_keyword(keywords::INTERNAL_COORDINATE_ERROR) {
        let rungs = backend.ladder(Problem::CoordinateSystem);
        attempt = match attempt.climb(rungs) {
            Ok(outcome) => return outcome,
            Err(attempt) => attempt,
        };
    }
    if status.has_keyword(keywords::MAX_OPT_CYCLES) || status.has_keyword(keywords::UNCONVERGED) {
        let rungs = attempt.optimization_ladder();
        attempt = match attempt.climb(rungs) {
            Ok(outcome) => return outcome,
            Err(attempt) => attempt,
        };
    }
    if status.has_keyword(keywords::SCF) {
        let rungs = backend.ladder(Problem::Scf);
        attempt = match attempt.climb(rungs) {
            Ok(outcome) => return outcome,
            Err(attempt) => attempt,
        };
    }
    match attempt.climb(backend.ladder(Problem::Unrecognized)) {
        Ok(outcome) => outcome,
        Err(_) => Outcome::NoRemedy {
            reason: format!(
                "no untried remedy for '{}' (keywords: {})",
                status.error,
                status.keywords.join(", ")
            ),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{GaussianBackend, MolproBackend, OrcaBackend, QchemBackend};
    use essq_core::model::{EssState, Namespace};

    fn state(cpu_cores: u32, memory_gb: f64) -> TroubleshootState {
        TroubleshootState {
            tried_methods: Vec::new(),
            cpu_cores,
            memory_gb,
            level: Level::new("wb97xd", Some("def2-tzvp")),
            job_type: JobType::Opt,
            fine: false,
        }
    }

    fn errored(keywords: &[&str], error: &str) -> EssStatus {
        EssStatus {
            status: EssState::Errored,
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            error: error.to_string(),
            line: String::new(),
        }
    }

    fn correction(outcome: Outcome) -> Correction {
        match outcome {
            Outcome::Resubmit(c) => c,
            other => panic!("expected a resubmission, got {other:?}"),
        }
    }

    const ORCA_MEMORY: &str = "Orca suggests to increase per cpu core memory to 9718 MB.";

    #[test]
    fn test_orca_memory_below_ceiling_raises_memory() {
        let c = correction(troubleshoot(
            &errored(&["Memory"], ORCA_MEMORY),
            &state(32, 250.0),
            &ConfigBag::default(),
            Limits::default(),
            &OrcaBackend,
        ));
        assert_eq!(c.state.memory_gb, 312.0);
        assert_eq!(c.state.cpu_cores, 32);
        assert_eq!(c.state.tried_methods, vec!["memory"]);
        assert!(!c.ceiling_reached);
    }

    #[test]
    fn test_memory_is_capped_at_ceiling() {
        let limits = Limits {
            memory_ceiling_gb: Some(300.0),
            electron_pairs: None,
        };
        let c = correction(troubleshoot(
            &errored(&["Memory"], ORCA_MEMORY),
            &state(32, 250.0),
            &ConfigBag::default(),
            limits,
            &OrcaBackend,
        ));
        assert_eq!(c.state.memory_gb, 300.0);
        assert!(c.ceiling_reached);
    }

    #[test]
    fn test_orca_memory_at_ceiling_reduces_cores() {
        let c = correction(troubleshoot(
            &errored(&["Memory", "max_total_job_memory"], ORCA_MEMORY),
            &state(32, 250.0),
            &ConfigBag::default(),
            Limits::default(),
            &OrcaBackend,
        ));
        assert_eq!(c.state.cpu_cores, 24);
        assert_eq!(c.state.memory_gb, 235.0);
    }

    #[test]
    fn test_orca_memory_at_ceiling_exhausts() {
        let outcome = troubleshoot(
            &errored(&["Memory", "max_total_job_memory"], ORCA_MEMORY),
            &state(32, 1.0),
            &ConfigBag::default(),
            Limits::default(),
            &OrcaBackend,
        );
        assert!(outcome.is_exhausted());
        assert!(matches!(outcome, Outcome::Exhausted { cpu_cores: -2, .. }));
    }

    #[test]
    fn test_molpro_memory_adds_megawords() {
        let c = correction(troubleshoot(
            &errored(&["Memory"], "needs 23612 MW"),
            &state(8, 32.0),
            &ConfigBag::default(),
            Limits::default(),
            &MolproBackend,
        ));
        assert_eq!(c.state.memory_gb, 222.15625);
    }

    #[test]
    fn test_unknown_memory_demand_uses_backend_factor() {
        let status = errored(&["Memory"], "not enough memory");
        let gaussian = correction(troubleshoot(
            &status,
            &state(8, 14.0),
            &ConfigBag::default(),
            Limits::default(),
            &GaussianBackend,
        ));
        assert_eq!(gaussian.state.memory_gb, 28.0);
        let molpro = correction(troubleshoot(
            &status,
            &state(8, 14.0),
            &ConfigBag::default(),
            Limits::default(),
            &MolproBackend,
        ));
        assert_eq!(molpro.state.memory_gb, 42.0);
    }

    #[test]
    fn test_single_core_at_ceiling_is_exhausted() {
        let outcome = troubleshoot(
            &errored(&["Memory", "max_total_job_memory"], "not enough memory"),
            &state(1, 14.0),
            &ConfigBag::default(),
            Limits::default(),
            &GaussianBackend,
        );
        assert!(outcome.is_exhausted());
    }

    #[test]
    fn test_memory_may_repeat() {
        let mut s = state(8, 14.0);
        s.tried_methods = vec!["memory".into()];
        let c = correction(troubleshoot(
            &errored(&["Memory"], "not enough memory"),
            &s,
            &ConfigBag::default(),
            Limits::default(),
            &GaussianBackend,
        ));
        assert_eq!(c.state.tried_methods, vec!["memory", "memory"]);
    }

    #[test]
    fn test_cpu_bound_from_message_and_electron_pairs() {
        let c = correction(troubleshoot(
            &errored(&["cpu"], "The number of electron pairs is 10."),
            &state(32, 14.0),
            &ConfigBag::default(),
            Limits::default(),
            &OrcaBackend,
        ));
        assert_eq!(c.state.cpu_cores, 10);

        let limits = Limits {
            memory_ceiling_gb: None,
            electron_pairs: Some(6),
        };
        let c = correction(troubleshoot(
            &errored(&["cpu"], "too many cores"),
            &state(32, 14.0),
            &ConfigBag::default(),
            limits,
            &OrcaBackend,
        ));
        assert_eq!(c.state.cpu_cores, 6);

        // Unrelated numbers in the message are not a core bound.
        let c = correction(troubleshoot(
            &errored(&["cpu"], "Wall time is 3600 s and the node count is 2"),
            &state(32, 14.0),
            &ConfigBag::default(),
            limits,
            &OrcaBackend,
        ));
        assert_eq!(c.state.cpu_cores, 6);
    }

    #[test]
    fn test_coordinate_error_switches_to_cartesian_once() {
        let status = errored(&["InternalCoordinateError"], "FormBX had a problem");
        let c = correction(troubleshoot(
            &status,
            &state(8, 14.0),
            &ConfigBag::default(),
            Limits::default(),
            &GaussianBackend,
        ));
        assert_eq!(c.args.get(Namespace::Trsh, "opt"), Some("cartesian"));
        assert_eq!(c.args.get(Namespace::Trsh, "general"), Some("nosymm"));
        assert_eq!(c.state.tried_methods, vec!["cartesian"]);

        // Retrying falls through to the backend fallback ladder.
        let again = correction(troubleshoot(
            &status,
            &c.state,
            &c.args,
            Limits::default(),
            &GaussianBackend,
        ));
        assert_eq!(again.applied, vec!["cbs-qb3"]);
        assert_eq!(again.state.level.method, "cbs-qb3");
        assert_eq!(again.state.job_type, JobType::Composite);
    }

    #[test]
    fn test_unconverged_escalation_order() {
        let status = errored(&["MaxOptCycles"], "Number of steps exceeded");
        let mut s = state(8, 14.0);
        let mut args = ConfigBag::default();
        let mut tags = Vec::new();
        for _ in 0..3 {
            let c = correction(troubleshoot(&status, &s, &args, Limits::default(), &GaussianBackend));
            tags.extend(c.applied.clone());
            s = c.state;
            args = c.args;
        }
        assert_eq!(tags, vec!["maxcycle", "fine", "cbs-qb3"]);
        assert!(s.fine);
        assert!(matches!(
            troubleshoot(&status, &s, &args, Limits::default(), &GaussianBackend),
            Outcome::NoRemedy { .. }
        ));
    }

    #[test]
    fn test_scans_never_escalate_to_composite() {
        let status = errored(&["Unconverged"], "");
        let mut s = state(8, 14.0);
        s.job_type = JobType::Scan;
        s.fine = true;
        s.tried_methods = vec!["maxcycle".into()];
        assert!(matches!(
            troubleshoot(&status, &s, &ConfigBag::default(), Limits::default(), &GaussianBackend),
            Outcome::NoRemedy { .. }
        ));
    }

    #[test]
    fn test_molpro_scf_ladder_then_basis() {
        let status = errored(&["SCF"], "No convergence");
        let first = correction(troubleshoot(
            &status,
            &state(8, 14.0),
            &ConfigBag::default(),
            Limits::default(),
            &MolproBackend,
        ));
        assert_eq!(first.applied, vec!["shift"]);
        let second = correction(troubleshoot(
            &status,
            &first.state,
            &first.args,
            Limits::default(),
            &MolproBackend,
        ));
        assert_eq!(second.applied, vec!["vdz"]);
        assert_eq!(second.state.level.basis.as_deref(), Some("cc-pvdz"));
    }

    #[test]
    fn test_checkfile_and_time_limit() {
        let c = correction(troubleshoot(
            &errored(&["CheckFile"], "Basis set data is not on the checkpoint file"),
            &state(8, 14.0),
            &ConfigBag::default(),
            Limits::default(),
            &GaussianBackend,
        ));
        assert!(c.remove_checkpoint);

        let c = correction(troubleshoot(
            &errored(&["ServerTimeLimit"], ""),
            &state(8, 14.0),
            &ConfigBag::default(),
            Limits::default(),
            &QchemBackend,
        ));
        assert_eq!(c.applied, vec!["time_limit"]);
    }

    #[test]
    fn test_disk_space_has_no_remedy() {
        assert!(matches!(
            troubleshoot(
                &errored(&["DiskSpace"], "No space left on device"),
                &state(8, 14.0),
                &ConfigBag::default(),
                Limits::default(),
                &GaussianBackend,
            ),
            Outcome::NoRemedy { .. }
        ));
    }

    #[test]
    fn test_outcome_serializes_with_tag() {
        let outcome = Outcome::NoRemedy {
            reason: "nothing".into(),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["outcome"], "no_remedy");
    }
}
