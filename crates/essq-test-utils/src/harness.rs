use crate::scripted::{ScriptedHost, ScriptedProbe};
use essq_client::Registry;
use essq_core::config::{HostConfig, Settings};
use essq_core::model::{
    ClusterSoftware, ConfigBag, ExecutionKind, JobSpec, JobType, Level, ResourceRequest,
    SpeciesRef, Xyz,
};
use essq_engine::EngineContext;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const LOCAL_HOST: &str = "local";
pub const SCRIPTED_HOST: &str = "cluster";

const SINGLE_TEMPLATE: &str = "#!/bin/bash -l
#SBATCH -J {name}
#SBATCH -t {t_max}
#SBATCH -n {cpus}
#SBATCH --mem-per-cpu={memory}
#SBATCH -C '{architecture}'
export USER_NAME={un}
{install_path}/run_ess input > output.out
";

const ARRAY_TEMPLATE: &str = "#!/bin/bash -l
#SBATCH -J {name}
#SBATCH -t {t_max}
#SBATCH --array=1-{max_task_num}
#SBATCH --mem-per-cpu={memory}
{install_path}/run_batch {batch_data_path} ${{SLURM_ARRAY_TASK_ID}}
";

pub struct TestContext {
    pub _temp_dir: tempfile::TempDir,
    pub test_root: PathBuf,
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
    pub project_dir: PathBuf,
    pub settings: Settings,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_cluster(ClusterSoftware::Slurm)
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// A host configuration with templates for every built-in backend.
pub fn host_config(cluster_soft: ClusterSoftware) -> HostConfig {
    let mut config = HostConfig::local(cluster_soft);
    config.cpus = Some(16);
    config.memory = Some(64.0);
    config.username = Some("tester".to_string());
    for backend in ["gaussian", "molpro", "orca", "qchem"] {
        config
            .submit_templates
            .insert(backend.to_string(), SINGLE_TEMPLATE.to_string());
    }
    config.array_template = Some(ARRAY_TEMPLATE.to_string());
    config.incore_commands.insert(
        "gaussian".to_string(),
        "cp input.gjf output.out".to_string(),
    );
    config
}

impl TestContext {
    pub fn with_cluster(cluster_soft: ClusterSoftware) -> Self {
        let temp_dir = tempfile::Builder::new()
            .prefix("essq-test-")
            .tempdir()
            .expect("Failed to create temp dir");
        let test_root = temp_dir.path().to_path_buf();
        let config_dir = test_root.join("config");
        let data_dir = test_root.join("data");
        let project_dir = test_root.join("project");
        for dir in [&config_dir, &data_dir, &project_dir] {
            fs::create_dir_all(dir).expect("Failed to create test dir");
        }

        let mut settings = Settings::default();
        settings.paths.registry_dir = Some(test_root.join("registry"));
        settings.paths.install_path = "/opt/essq".to_string();
        settings.paths.projects_root = "runs/essq_projects".to_string();
        settings.transport.retry_delay_ms = 0;
        settings.transport.poll_interval_secs = 0;
        settings
            .hosts
            .insert(LOCAL_HOST.to_string(), host_config(cluster_soft));
        let mut remote = host_config(cluster_soft);
        remote.address = Some("tester@cluster.example.org".to_string());
        settings.hosts.insert(SCRIPTED_HOST.to_string(), remote);
        for backend in ["gaussian", "molpro", "orca", "qchem"] {
            settings
                .backend_hosts
                .insert(backend.to_string(), vec![LOCAL_HOST.to_string()]);
        }

        Self {
            _temp_dir: temp_dir,
            test_root,
            config_dir,
            data_dir,
            project_dir,
            settings,
        }
    }

    /// Writes the settings where `load_settings` looks for them.
    pub fn write_config(&self) -> PathBuf {
        let dir = self.config_dir.join("essq");
        fs::create_dir_all(&dir).expect("Failed to create config subdir");
        let path = dir.join("config.toml");
        let content = toml::to_string(&self.settings).expect("Failed to serialize settings");
        fs::write(&path, content).expect("Failed to write config");
        path
    }

    pub fn registry_dir(&self) -> PathBuf {
        self.test_root.join("registry")
    }

    pub fn open_registry(&self) -> Registry {
        Registry::open(&self.registry_dir()).expect("Failed to open registry")
    }

    /// An engine whose hosts come from the settings.
    pub fn engine(&self) -> Arc<EngineContext> {
        Arc::new(EngineContext::new(self.settings.clone(), self.open_registry()))
    }

    /// An engine whose every host is `host` and whose probe is `probe`.
    pub fn scripted_engine(&self, host: &ScriptedHost, probe: ScriptedProbe) -> Arc<EngineContext> {
        let host = host.clone();
        Arc::new(
            EngineContext::new(self.settings.clone(), self.open_registry())
                .with_probe(Arc::new(probe))
                .with_host_factory(move |_, _| Ok(Box::new(host.clone()))),
        )
    }

    pub fn job_spec(&self, backend: &str, job_types: Vec<JobType>, label: &str) -> JobSpec {
        let mut species = SpeciesRef::new(label);
        species.xyz = Some(water());
        JobSpec {
            backend: backend.to_string(),
            job_types,
            level: Level::new("wb97xd", Some("def2-tzvp")),
            project: "test_project".to_string(),
            project_directory: self.project_dir.clone(),
            execution: ExecutionKind::Queue,
            resources: ResourceRequest::default(),
            args: ConfigBag::default(),
            species: Some(vec![species]),
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

    pub fn write_job_spec(&self, spec: &JobSpec, file_name: &str) -> PathBuf {
        let path = self.test_root.join(file_name);
        let content = toml::to_string(spec).expect("Failed to serialize job spec");
        fs::write(&path, content).expect("Failed to write job spec");
        path
    }

    pub fn read(&self, path: &Path) -> String {
        fs::read_to_string(path)
            .unwrap_or_else(|e| panic!("Could not read '{}': {}", path.display(), e))
    }
}

pub fn water() -> Xyz {
    Xyz {
        symbols: vec!["O".into(), "H".into(), "H".into()],
        isotopes: Vec::new(),
        coords: vec![
            [0.0, 0.0, 0.1173],
            [0.0, 0.7572, -0.4692],
            [0.0, -0.7572, -0.4692],
        ],
    }
}
