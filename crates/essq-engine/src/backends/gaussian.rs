use super::method_and_basis;
use crate::backend::{Action, Backend, InputContext, InputMemory, Problem, Rung};
use crate::error::Result;
use essq_core::constants::files::CHECK_FILE;
use essq_core::model::{IrcDirection, JobType, Namespace};

pub struct GaussianBackend;

impl GaussianBackend {
    fn route(&self, input: &InputContext<'_>) -> String {
        let mut opt_options: Vec<String> = Vec::new();
        if input.is_ts {
            opt_options.extend(["ts", "calcfc", "noeigentest"].map(String::from));
        } else {
            opt_options.push("calcfc".to_string());
        }
        if input.fine {
            opt_options.push("tight".to_string());
        }
        if let Some(extra) = input.trsh("opt") {
            opt_options.extend(extra.split(',').map(|s| s.trim().to_string()));
        }
        let opt = format!("opt=({})", opt_options.join(","));

        let job = match input.job_type {
            JobType::Opt | JobType::Conformers => opt,
            JobType::Optfreq => format!("{} freq", opt),
            JobType::Freq => "freq".to_string(),
            JobType::Scan | JobType::DirectedScan => {
                opt_options.push("modredundant".to_string());
                format!("opt=({})", opt_options.join(","))
            }
            JobType::Irc => {
                let direction = match input.irc_direction {
                    Some(IrcDirection::Reverse) => "reverse",
                    _ => "forward",
                };
                format!("irc=(calcfc,maxpoints=50,stepsize=7,{})", direction)
            }
            JobType::Sp | JobType::Composite | JobType::TsGuess => String::new(),
        };

        let mut route = vec![
            "#P".to_string(),
            job,
            method_and_basis(input.level, input.job_type),
        ];
        if input.fine && input.job_type.is_optimization() {
            route.push("integral=(grid=ultrafine)".to_string());
        }
        if let Some(general) = input.trsh("general") {
            route.push(general.to_string());
        }
        let keywords = input.keywords();
        if !keywords.is_empty() {
            route.push(keywords);
        }
        route
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Backend for GaussianBackend {
    fn name(&self) -> &'static str {
        "gaussian"
    }

    fn input_filename(&self) -> &'static str {
        "input.gjf"
    }

    fn compute_input_memory_limit(&self, memory_gb: f64, _cpu_cores: u32) -> InputMemory {
        InputMemory::TotalMegabytes((memory_gb * 1024.0).ceil() as u64)
    }

    fn render_input(&self, input: &InputContext<'_>) -> Result<String> {
        let memory = match input.memory {
            InputMemory::TotalMegabytes(mb) => mb,
            other => {
                tracing::warn!("Unexpected memory unit for Gaussian: {}", other);
                0
            }
        };
        let mut text = String::new();
        if input.checkfile {
            text.push_str(&format!("%chk={}\n", CHECK_FILE));
        }
        text.push_str(&format!("%mem={}mb\n%NProcShared={}\n\n", memory, input.cpu_cores));
        text.push_str(&self.route(input));
        text.push_str(&format!("\n\n{}\n\n{} {}\n", input.label, input.charge, input.multiplicity));
        text.push_str(&input.geometry_lines());
        text.push_str("\n\n");
        for constraint in input.constraints {
            let atoms = constraint
                .atoms
                .iter()
                .map(|a| a.to_string())
                .collect::<Vec<_>>()
                .join(" ");
            let kind = match constraint.atoms.len() {
                2 => "B",
                3 => "A",
                _ => "D",
            };
            text.push_str(&format!("{} {} ={:.2} F\n", kind, atoms, constraint.value));
        }
        let blocks = input.blocks();
        if !blocks.is_empty() {
            text.push_str(&blocks);
            text.push_str("\n\n");
        }
        text.push('\n');
        Ok(text)
    }

    fn ladder(&self, problem: Problem) -> Vec<Rung> {
        match problem {
            Problem::CoordinateSystem => vec![Rung::directive(
                "cartesian",
                Namespace::Trsh,
                "opt",
                "cartesian",
            )
            .and_directive(Namespace::Trsh, "general", "nosymm")],
            Problem::OptimizationCycles => vec![Rung::directive(
                "maxcycle",
                Namespace::Trsh,
                "opt",
                "maxcycle=200",
            )],
            Problem::Scf => vec![
                Rung::directive("scf_xqc", Namespace::Trsh, "general", "scf=(xqc)"),
                Rung::directive("int_acc", Namespace::Trsh, "general", "int=(Acc2E=14)"),
            ],
            Problem::Unrecognized => vec![Rung::new("cbs-qb3", Action::CompositeMethod)],
        }
    }

    fn supports_composite(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use essq_core::model::{ConfigBag, Constraint, Level, Xyz};

    fn water() -> Xyz {
        Xyz {
            symbols: vec!["O".into(), "H".into(), "H".into()],
            isotopes: Vec::new(),
            coords: vec![[0.0, 0.0, 0.1173], [0.0, 0.7572, -0.4692], [0.0, -0.7572, -0.4692]],
        }
    }

    fn render(job_type: JobType, args: &ConfigBag, constraints: &[Constraint], checkfile: bool) -> String {
        let level = Level::new("wb97xd", Some("def2-tzvp"));
        let xyz = water();
        let backend = GaussianBackend;
        let input = InputContext {
            job_name: "opt_a7",
            label: "H2O",
            job_type,
            level: &level,
            args,
            charge: 0,
            multiplicity: 1,
            number_of_radicals: None,
            is_ts: false,
            xyz: Some(&xyz),
            cpu_cores: 8,
            memory: backend.compute_input_memory_limit(14.0, 8),
            checkfile,
            fine: false,
            constraints,
            irc_direction: None,
        };
        backend.render_input(&input).unwrap()
    }

    #[test]
    fn test_memory_is_total_megabytes() {
        assert_eq!(
            GaussianBackend.compute_input_memory_limit(14.0, 8),
            InputMemory::TotalMegabytes(14336)
        );
    }

    #[test]
    fn test_opt_input() {
        let text = render(JobType::Opt, &ConfigBag::default(), &[], true);
        assert!(text.starts_with("%chk=check.chk\n%mem=14336mb\n%NProcShared=8"));
        assert!(text.contains("#P opt=(calcfc) wb97xd/def2-tzvp"));
        assert!(text.contains("\n0 1\nO "));
    }

    #[test]
    fn test_troubleshooting_directives_reach_route() {
        let mut args = ConfigBag::default();
        for action in &GaussianBackend.ladder(Problem::CoordinateSystem)[0].actions {
            if let Action::Directive { namespace, key, value } = action {
                args.add(*namespace, key, value);
            }
        }
        let text = render(JobType::Opt, &args, &[], false);
        assert!(text.contains("#P opt=(calcfc,cartesian) wb97xd/def2-tzvp nosymm"));
        assert!(!text.contains("%chk"));
    }

    #[test]
    fn test_scan_constraints() {
        let constraints = vec![Constraint {
            atoms: vec![1, 2, 3, 4],
            value: 120.0,
        }];
        let text = render(JobType::Scan, &ConfigBag::default(), &constraints, false);
        assert!(text.contains("opt=(calcfc,modredundant)"));
        assert!(text.contains("D 1 2 3 4 =120.00 F"));
    }

    #[test]
    fn test_rendering_is_idempotent() {
        let a = render(JobType::Freq, &ConfigBag::default(), &[], false);
        let b = render(JobType::Freq, &ConfigBag::default(), &[], false);
        assert_eq!(a, b);
    }
}
