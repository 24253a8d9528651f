use super::round_up_to;
use crate::backend::{Action, Backend, InputContext, InputMemory, MemoryDemand, Problem, Rung};
use crate::error::Result;
use essq_core::errors::DomainError;
use essq_core::model::{JobSpec, JobType, Namespace, ScanStrategy};
use regex::Regex;

/// Megawords per gigabyte (1 MW is 8 MB).
const MW_PER_GB: f64 = 128.0;

pub struct MolproBackend;

impl Backend for MolproBackend {
    fn name(&self) -> &'static str {
        "molpro"
    }

    fn input_filename(&self) -> &'static str {
        "input.in"
    }

    fn check_supported(&self, spec: &JobSpec) -> std::result::Result<(), DomainError> {
        if spec.job_types.contains(&JobType::Irc) {
            return Err(DomainError::Unsupported {
                backend: self.name().to_string(),
                operation: "IRC".to_string(),
            });
        }
        let ess_scan = spec.scan_type.map_or(true, |s| s == ScanStrategy::Ess)
            || spec
                .species()
                .iter()
                .flat_map(|s| s.rotors.iter())
                .any(|r| r.directed_scan_type == ScanStrategy::Ess);
        if spec.job_types.contains(&JobType::Scan) && ess_scan {
            return Err(DomainError::Unsupported {
                backend: self.name().to_string(),
                operation: "ESS-driven scans".to_string(),
            });
        }
        Ok(())
    }

    fn compute_input_memory_limit(&self, memory_gb: f64, cpu_cores: u32) -> InputMemory {
        let cores = f64::from(cpu_cores.max(1));
        InputMemory::MegaWordsPerCore((memory_gb * MW_PER_GB / cores).ceil() as u64)
    }

    fn render_input(&self, input: &InputContext<'_>) -> Result<String> {
        let memory = match input.memory {
            InputMemory::MegaWordsPerCore(mw) => mw,
            other => {
                tracing::warn!("Unexpected memory unit for Molpro: {}", other);
                0
            }
        };
        let basis = input
            .trsh("basis")
            .map(String::from)
            .or_else(|| input.level.basis.clone())
            .unwrap_or_default();
        let restricted = if input.is_unrestricted() { "u" } else { "" };
        let shift = input.trsh("shift").unwrap_or_default();

        let mut text = format!("***,{}\nmemory,{},m;\n", input.label, memory);
        text.push_str(&format!("geometry={{angstrom;\n{}}}\n\n", input.geometry_lines()));
        text.push_str(&format!("basis={}\n", basis));
        let keywords = input.keywords();
        if !keywords.is_empty() {
            text.push_str(&format!("{}\n", keywords));
        }
        if let Some(aux) = &input.level.auxiliary_basis {
            text.push_str(&format!("{}\n", aux));
        }
        if let Some(cabs) = &input.level.cabs {
            text.push_str(&format!("{}\n", cabs));
        }
        text.push_str(&format!(
            "int;\n{{hf;{}\nmaxit,1000;\nwf,spin={},charge={};}}\n\n",
            shift,
            input.multiplicity.saturating_sub(1),
            input.charge
        ));
        text.push_str(&format!("{}{};\n\n", restricted, input.level.method));

        match input.job_type {
            JobType::Opt | JobType::Conformers | JobType::Optfreq => {
                if input.is_ts {
                    text.push_str("optg, root=2, method=qsd, readhess, savexyz='geometry.xyz'\n");
                } else {
                    text.push_str("optg, savexyz='geometry.xyz'\n");
                }
                if input.job_type == JobType::Optfreq {
                    text.push_str("{frequencies;\nthermo;\nprint,HESSIAN,thermo;}\n");
                }
            }
            JobType::Freq => text.push_str("{frequencies;\nthermo;\nprint,HESSIAN,thermo;}\n"),
            _ => {}
        }
        let blocks = input.blocks();
        if !blocks.is_empty() {
            text.push_str(&format!("\n{}\n", blocks));
        }
        text.push_str("---;\n");
        Ok(text)
    }

    fn ladder(&self, problem: Problem) -> Vec<Rung> {
        match problem {
            Problem::Unrecognized | Problem::Scf => vec![
                Rung::directive("shift", Namespace::Trsh, "shift", "shift,-1.0,-0.5;"),
                Rung::new("vdz", Action::ChangeBasis("cc-pVDZ".to_string())),
            ],
            Problem::CoordinateSystem | Problem::OptimizationCycles => Vec::new(),
        }
    }

    /// Molpro reports how many additional megawords it needs.
    fn memory_demand(&self, error: &str) -> MemoryDemand {
        let Ok(re) = Regex::new(r"(\d+(?:\.\d+)?)\s*MW") else {
            return MemoryDemand::Unknown;
        };
        re.captures(error)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .map(|mw| MemoryDemand::AdditionalMw(round_up_to(mw, 100.0)))
            .unwrap_or(MemoryDemand::Unknown)
    }

    fn unknown_memory_factor(&self) -> f64 {
        3.0
    }
}
