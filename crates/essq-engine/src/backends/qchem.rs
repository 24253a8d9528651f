use crate::backend::{Backend, InputContext, InputMemory, Problem, Rung};
use crate::error::Result;
use essq_core::model::{JobType, Namespace};

pub struct QchemBackend;

impl Backend for QchemBackend {
    fn name(&self) -> &'static str {
        "qchem"
    }

    fn input_filename(&self) -> &'static str {
        "input.in"
    }

    fn compute_input_memory_limit(&self, memory_gb: f64, _cpu_cores: u32) -> InputMemory {
        InputMemory::SelfManaged {
            gb: memory_gb.ceil() as u64,
        }
    }

    fn render_input(&self, input: &InputContext<'_>) -> Result<String> {
        let job_type = match input.job_type {
            JobType::Opt | JobType::Conformers if input.is_ts => "ts",
            JobType::Opt | JobType::Conformers | JobType::Optfreq => "opt",
            JobType::Freq => "freq",
            JobType::Irc => "rpath",
            JobType::Scan | JobType::DirectedScan => "pes_scan",
            _ => "sp",
        };
        let mut rem = vec![
            format!("   JOBTYPE       {}", job_type),
            format!("   METHOD        {}", input.level.method),
        ];
        if let Some(basis) = &input.level.basis {
            rem.push(format!("   BASIS         {}", basis));
        }
        if input.is_unrestricted() {
            rem.push("   UNRESTRICTED  TRUE".to_string());
        }
        if let Some(cycles) = input.trsh("max_cycles") {
            rem.push(format!("   GEOM_OPT_MAX_CYCLES {}", cycles));
        }
        if let Some(algorithm) = input.trsh("scf_algorithm") {
            rem.push(format!("   SCF_ALGORITHM {}", algorithm));
            rem.push("   MAX_SCF_CYCLES 250".to_string());
        }
        for keyword in input.args.keyword.values() {
            rem.push(format!("   {}", keyword));
        }

        let mut text = format!(
            "$molecule\n{} {}\n{}\n$end\n\n$rem\n{}\n$end\n",
            input.charge,
            input.multiplicity,
            input.geometry_lines(),
            rem.join("\n")
        );
        let blocks = input.blocks();
        if !blocks.is_empty() {
            text.push_str(&format!("\n{}\n", blocks));
        }
        Ok(text)
    }

    fn ladder(&self, problem: Problem) -> Vec<Rung> {
        match problem {
            Problem::OptimizationCycles => vec![Rung::directive(
                "max_cycles",
                Namespace::Trsh,
                "max_cycles",
                "250",
            )],
            Problem::Scf => vec![Rung::directive(
                "DIIS_GDM",
                Namespace::Trsh,
                "scf_algorithm",
                "DIIS_GDM",
            )],
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use essq_core::model::{ConfigBag, Level};

    #[test]
    fn test_memory_is_self_managed() {
        assert_eq!(
            QchemBackend.compute_input_memory_limit(13.5, 8),
            InputMemory::SelfManaged { gb: 14 }
        );
    }

    #[test]
    fn test_ladders() {
        assert_eq!(QchemBackend.ladder(Problem::OptimizationCycles)[0].tag, "max_cycles");
        assert_eq!(QchemBackend.ladder(Problem::Scf)[0].tag, "DIIS_GDM");
        assert!(QchemBackend.ladder(Problem::Unrecognized).is_empty());
        assert!(!QchemBackend.supports_composite());
    }

    #[test]
    fn test_rem_section_carries_directives() {
        let level = Level::new("wb97x-d", Some("def2-tzvp"));
        let mut args = ConfigBag::default();
        args.add(Namespace::Trsh, "scf_algorithm", "DIIS_GDM");
        let input = InputContext {
            job_name: "opt_a2",
            label: "CH4",
            job_type: JobType::Opt,
            level: &level,
            args: &args,
            charge: 0,
            multiplicity: 1,
            number_of_radicals: None,
            is_ts: false,
            xyz: None,
            cpu_cores: 8,
            memory: QchemBackend.compute_input_memory_limit(14.0, 8),
            checkfile: false,
            fine: false,
            constraints: &[],
            irc_direction: None,
        };
        let text = QchemBackend.render_input(&input).unwrap();
        assert!(text.contains("JOBTYPE       opt"));
        assert!(text.contains("SCF_ALGORITHM DIIS_GDM"));
        assert!(text.starts_with("$molecule\n0 1\n"));
    }
}
