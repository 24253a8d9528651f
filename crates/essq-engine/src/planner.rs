//! Decides whether a job's work items are fused into one array submission
//! and how many scheduler tasks that array gets.

use essq_core::model::{
    BatchArtifact, ConfigBag, Constraint, JobSpec, JobType, Level, ReactionRef, Rotor,
    ScanStrategy, SpeciesRef, WorkItem, Xyz,
};
use serde::Serialize;
use std::fmt;

const MAX_TASKS: u32 = 100;

/// What a batched job iterates over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationDimension {
    JobTypes,
    Conformers,
    Scan,
    Species,
    Reactions,
    Single,
}

impl fmt::Display for IterationDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IterationDimension::JobTypes => "job types",
            IterationDimension::Conformers => "conformers",
            IterationDimension::Scan => "scan points",
            IterationDimension::Species => "species",
            IterationDimension::Reactions => "reactions",
            IterationDimension::Single => "single",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchPlan {
    pub dimension: IterationDimension,
    pub count: usize,
    /// Scheduler tasks for the array, `None` when the job is not batched.
    pub tasks: Option<u32>,
}

impl BatchPlan {
    pub fn single() -> Self {
        Self {
            dimension: IterationDimension::Single,
            count: 1,
            tasks: None,
        }
    }

    pub fn is_array(&self) -> bool {
        self.count > 1
    }
}

/// Array width for `count` independent work items.
pub fn task_count(count: usize) -> u32 {
    if count <= 2 {
        1
    } else if count < 10 {
        2
    } else {
        let trend = (1.7 * (count as f64).powf(0.35)).ceil() as u32;
        trend.min(MAX_TASKS)
    }
}

fn points_per_dimension(resolution: f64) -> usize {
    ((360.0 / resolution).floor() as usize).max(1)
}

/// Work items one rotor contributes to a directed scan.
pub fn rotor_process_count(rotor: &Rotor, resolution: f64) -> usize {
    let points = points_per_dimension(resolution);
    match rotor.directed_scan_type {
        ScanStrategy::Ess => 1,
        s if s.is_continuous() => 1,
        s if s.is_diagonal() => points,
        _ => points.saturating_pow(rotor.scan.len() as u32),
    }
}

fn is_directed_scan(spec: &JobSpec) -> bool {
    spec.job_types.contains(&JobType::Scan) && spec.scan_type.is_some_and(|s| s.is_directed())
}

/// Derives the iteration dimension, work-item count and task count.
pub fn plan(spec: &JobSpec, resolution: f64) -> BatchPlan {
    let species = spec.species();
    let reactions = spec.reactions();
    let (dimension, count) = if spec.job_types.len() > 1 {
        (IterationDimension::JobTypes, spec.job_types.len())
    } else if spec.job_type() == JobType::Conformers && !species.is_empty() {
        let total = species.iter().map(|s| s.conformers.len()).sum();
        (IterationDimension::Conformers, total)
    } else if is_directed_scan(spec) && !species.is_empty() {
        let total = species
            .iter()
            .flat_map(|s| s.rotors.iter())
            .map(|r| rotor_process_count(r, resolution))
            .sum();
        (IterationDimension::Scan, total)
    } else if species.len() > 1 {
        (IterationDimension::Species, species.len())
    } else if reactions.len() > 1 {
        (IterationDimension::Reactions, reactions.len())
    } else {
        return BatchPlan::single();
    };

    let tasks = if count > 1 {
        Some(spec.tasks.unwrap_or_else(|| task_count(count)))
    } else {
        None
    };
    BatchPlan {
        dimension,
        count,
        tasks,
    }
}

/// The settings of the current attempt that every work item carries. They
/// start out as the job specification's and change as corrections apply.
#[derive(Debug, Clone, Copy)]
pub struct ItemSettings<'a> {
    pub level: &'a Level,
    pub job_type: JobType,
    pub fine: bool,
    pub args: &'a ConfigBag,
}

impl<'a> ItemSettings<'a> {
    pub fn from_spec(spec: &'a JobSpec) -> Self {
        Self {
            level: &spec.level,
            job_type: spec.job_type(),
            fine: spec.fine,
            args: &spec.args,
        }
    }

    fn item(&self, job_types: Vec<JobType>, label: &str, xyz: Xyz) -> WorkItem {
        let mut item = WorkItem::new(job_types, label, self.level.clone(), xyz);
        item.fine = self.fine;
        if !self.args.is_empty() {
            item.args = Some(self.args.clone());
        }
        item
    }
}

fn species_item(
    spec: &JobSpec,
    settings: &ItemSettings<'_>,
    species: &SpeciesRef,
    job_types: Vec<JobType>,
) -> Option<WorkItem> {
    let xyz = species.geometry()?.clone();
    let mut item = settings.item(job_types, &species.label, xyz);
    item.charge = species.charge;
    item.multiplicity = species.multiplicity;
    if !spec.constraints.is_empty() {
        item.constraints = Some(spec.constraints.clone());
    }
    item.bath_gas = spec.bath_gas.clone();
    item.irc_direction = spec.irc_direction;
    Some(item)
}

/// Dihedral grid points of one rotor, as constraint sets.
fn scan_points(species: &SpeciesRef, rotor: &Rotor, resolution: f64) -> Vec<Vec<Constraint>> {
    let Some(xyz) = species.geometry() else {
        return Vec::new();
    };
    let base: Vec<f64> = rotor
        .scan
        .iter()
        .map(|atoms| xyz.dihedral(*atoms).unwrap_or(0.0))
        .collect();
    let constraint = |dim: usize, step: usize| Constraint {
        atoms: rotor.scan[dim].to_vec(),
        value: round2((base[dim] + step as f64 * resolution).rem_euclid(360.0)),
    };
    let points = points_per_dimension(resolution);
    let strategy = rotor.directed_scan_type;

    if !strategy.is_brute_force() {
        return vec![(0..rotor.scan.len()).map(|d| constraint(d, 0)).collect()];
    }
    if strategy.is_diagonal() {
        return (0..points)
            .map(|k| (0..rotor.scan.len()).map(|d| constraint(d, k)).collect())
            .collect();
    }
    let mut grid: Vec<Vec<usize>> = vec![Vec::new()];
    for _ in 0..rotor.scan.len() {
        grid = grid
            .into_iter()
            .flat_map(|prefix| {
                (0..points).map(move |k| {
                    let mut next = prefix.clone();
                    next.push(k);
                    next
                })
            })
            .collect();
    }
    grid.into_iter()
        .map(|steps| steps.iter().enumerate().map(|(d, k)| constraint(d, *k)).collect())
        .collect()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Materializes one work item per independent unit of `plan`.
pub fn build_artifact(
    spec: &JobSpec,
    settings: &ItemSettings<'_>,
    plan: &BatchPlan,
    resolution: f64,
) -> BatchArtifact {
    let mut artifact = BatchArtifact::default();
    match plan.dimension {
        IterationDimension::Single => {}
        IterationDimension::JobTypes => {
            for species in spec.species() {
                let items = spec
                    .job_types
                    .iter()
                    .filter_map(|jt| species_item(spec, settings, species, vec![*jt]));
                artifact.extend(&species.label, items);
            }
            for reaction in spec.reactions() {
                if let Some(reactants) = &reaction.reactants_xyz {
                    for jt in &spec.job_types {
                        artifact.push(
                            &reaction.index.to_string(),
                            reaction_item(spec, settings, reaction, reactants, *jt),
                        );
                    }
                }
            }
        }
        IterationDimension::Conformers => {
            for species in spec.species() {
                let items = species.conformers.iter().map(|conformer| {
                    let mut item = settings.item(vec![JobType::Opt], &species.label, conformer.clone());
                    item.charge = species.charge;
                    item.multiplicity = species.multiplicity;
                    item
                });
                artifact.extend(&species.label, items);
            }
        }
        IterationDimension::Scan => {
            for species in spec.species() {
                for rotor in &species.rotors {
                    let job_type = match rotor.directed_scan_type {
                        ScanStrategy::BruteForceSp | ScanStrategy::BruteForceSpDiagonal => JobType::Sp,
                        s if s.is_brute_force() => JobType::Opt,
                        _ => JobType::Scan,
                    };
                    for constraints in scan_points(species, rotor, resolution) {
                        if let Some(mut item) = species_item(spec, settings, species, vec![job_type]) {
                            item.constraints = Some(constraints);
                            artifact.push(&species.label, item);
                        }
                    }
                }
            }
        }
        IterationDimension::Species => {
            for species in spec.species() {
                if let Some(item) = species_item(spec, settings, species, vec![settings.job_type]) {
                    artifact.push(&species.label, item);
                }
            }
        }
        IterationDimension::Reactions => {
            for reaction in spec.reactions() {
                if let Some(reactants) = &reaction.reactants_xyz {
                    artifact.push(
                        &reaction.index.to_string(),
                        reaction_item(spec, settings, reaction, reactants, settings.job_type),
                    );
                }
            }
        }
    }
    if artifact.item_count() != plan.count {
        tracing::debug!(
            "Batch artifact holds {} item(s) for a planned count of {} ({})",
            artifact.item_count(),
            plan.count,
            plan.dimension
        );
    }
    artifact
}

fn reaction_item(
    spec: &JobSpec,
    settings: &ItemSettings<'_>,
    reaction: &ReactionRef,
    reactants: &Xyz,
    job_type: JobType,
) -> WorkItem {
    let mut item = settings.item(vec![job_type], &reaction.label, reactants.clone());
    item.charge = reaction.charge;
    item.multiplicity = reaction.multiplicity;
    item.xyz_2 = reaction.products_xyz.clone();
    if !spec.constraints.is_empty() {
        item.constraints = Some(spec.constraints.clone());
    }
    item
}
