use super::round_up_to;
use crate::backend::{Backend, InputContext, InputMemory, MemoryDemand, Problem, Rung};
use crate::error::Result;
use essq_core::errors::DomainError;
use essq_core::model::{JobSpec, JobType, Namespace};
use regex::Regex;

pub struct OrcaBackend;

impl Backend for OrcaBackend {
    fn name(&self) -> &'static str {
        "orca"
    }

    fn input_filename(&self) -> &'static str {
        "input.inp"
    }

    fn check_supported(&self, spec: &JobSpec) -> std::result::Result<(), DomainError> {
        if spec.job_types.contains(&JobType::Irc) && !spec.reactions().is_empty() {
            return Err(DomainError::Unsupported {
                backend: self.name().to_string(),
                operation: "dual-ended IRC searches".to_string(),
            });
        }
        Ok(())
    }

    fn compute_input_memory_limit(&self, memory_gb: f64, cpu_cores: u32) -> InputMemory {
        let cores = f64::from(cpu_cores.max(1));
        InputMemory::MegabytesPerCore((memory_gb * 1024.0 / cores).ceil() as u64)
    }

    fn render_input(&self, input: &InputContext<'_>) -> Result<String> {
        let maxcore = match input.memory {
            InputMemory::MegabytesPerCore(mb) => mb,
            other => {
                tracing::warn!("Unexpected memory unit for Orca: {}", other);
                0
            }
        };
        let job = match input.job_type {
            JobType::Opt | JobType::Conformers if input.is_ts => "OptTS",
            JobType::Opt | JobType::Conformers => "Opt",
            JobType::Optfreq => "Opt Freq",
            JobType::Freq => "Freq",
            JobType::Irc => "IRC",
            _ => "",
        };
        let mut header = vec!["!".to_string()];
        if input.is_unrestricted() {
            header.push(format!("u{}", input.level.method));
        } else {
            header.push(input.level.method.clone());
        }
        if let Some(basis) = &input.level.basis {
            header.push(basis.clone());
        }
        if let Some(aux) = &input.level.auxiliary_basis {
            header.push(aux.clone());
        }
        if !job.is_empty() {
            header.push(job.to_string());
        }
        if input.fine {
            header.push("TightOpt".to_string());
        }
        let keywords = input.keywords();
        if !keywords.is_empty() {
            header.push(keywords);
        }
        if let Some(scf) = input.trsh("scf") {
            header.push(scf.to_string());
        }

        let mut text = header.join(" ");
        text.push_str(&format!(
            "\n\n%maxcore {}\n%pal nprocs {} end\n",
            maxcore, input.cpu_cores
        ));
        let blocks = input.blocks();
        if !blocks.is_empty() {
            text.push_str(&format!("\n{}\n", blocks));
        }
        text.push_str(&format!(
            "\n* xyz {} {}\n{}\n*\n",
            input.charge,
            input.multiplicity,
            input.geometry_lines()
        ));
        Ok(text)
    }

    fn ladder(&self, problem: Problem) -> Vec<Rung> {
        match problem {
            Problem::Scf => vec![Rung::directive(
                "slowconv",
                Namespace::Trsh,
                "scf",
                "SlowConv",
            )],
            _ => Vec::new(),
        }
    }

    /// Orca reports the per-core memory it would need.
    fn memory_demand(&self, error: &str) -> MemoryDemand {
        let Ok(re) = Regex::new(r"increase per cpu core memory to (\d+) MB") else {
            return MemoryDemand::Unknown;
        };
        re.captures(error)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .map(|mb| MemoryDemand::PerCoreMb(round_up_to(mb, 100.0)))
            .unwrap_or(MemoryDemand::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use essq_core::model::{ConfigBag, ExecutionKind, Level, ReactionRef, ResourceRequest};
    use std::path::PathBuf;

    #[test]
    fn test_memory_in_megabytes_per_core() {
        assert_eq!(
            OrcaBackend.compute_input_memory_limit(14.0, 8),
            InputMemory::MegabytesPerCore(1792)
        );
    }

    #[test]
    fn test_memory_demand_from_message() {
        let error = "Orca suggests to increase per cpu core memory to 9718 MB.";
        assert_eq!(OrcaBackend.memory_demand(error), MemoryDemand::PerCoreMb(9800.0));
        assert_eq!(
            OrcaBackend.memory_demand("Orca suggests to increase per cpu core memory to 289 MB."),
            MemoryDemand::PerCoreMb(300.0)
        );
        assert_eq!(OrcaBackend.memory_demand("Not enough memory"), MemoryDemand::Unknown);
    }

    #[test]
    fn test_rejects_dual_ended_irc() {
        let spec = JobSpec {
            backend: "orca".into(),
            job_types: vec![JobType::Irc],
            level: Level::new("b3lyp", Some("def2-svp")),
            project: "demo".into(),
            project_directory: PathBuf::from("/tmp/demo"),
            execution: ExecutionKind::Queue,
            resources: ResourceRequest::default(),
            args: ConfigBag::default(),
            species: None,
            reactions: Some(vec![ReactionRef {
                index: 0,
                label: "r0".into(),
                charge: 0,
                multiplicity: 1,
                reactants_xyz: None,
                products_xyz: None,
            }]),
            host: None,
            fine: false,
            checkfile: None,
            constraints: Vec::new(),
            scan_type: None,
            irc_direction: None,
            bath_gas: None,
            tasks: None,
            electron_pairs: None,
        };
        assert!(matches!(
            OrcaBackend.check_supported(&spec),
            Err(DomainError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_input_header_and_resources() {
        let level = Level::new("dlpno-ccsd(t)", Some("def2-tzvp"));
        let args = ConfigBag::default();
        let input = InputContext {
            job_name: "sp_a9",
            label: "test",
            job_type: JobType::Sp,
            level: &level,
            args: &args,
            charge: 0,
            multiplicity: 1,
            number_of_radicals: None,
            is_ts: false,
            xyz: None,
            cpu_cores: 4,
            memory: OrcaBackend.compute_input_memory_limit(4.0, 4),
            checkfile: false,
            fine: false,
            constraints: &[],
            irc_direction: None,
        };
        let text = OrcaBackend.render_input(&input).unwrap();
        assert!(text.starts_with("! dlpno-ccsd(t) def2-tzvp\n"));
        assert!(text.contains("%maxcore 1024\n%pal nprocs 4 end"));
        assert!(text.contains("* xyz 0 1"));
    }
}
