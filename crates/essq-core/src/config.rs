use crate::errors::ConfigError;
use crate::model::ClusterSoftware;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct JobDefaults {
    pub cpu_cores: u32,
    pub memory_gb: f64,
    /// Share of a node's memory a single job may request.
    pub max_node_memory_fraction: f64,
    pub time_limit_hrs: f64,
    /// Degrees between consecutive points of a directed scan.
    pub rotor_scan_resolution: f64,
}

impl Default for JobDefaults {
    fn default() -> Self {
        Self {
            cpu_cores: 8,
            memory_gb: 14.0,
            max_node_memory_fraction: 0.8,
            time_limit_hrs: 120.0,
            rotor_scan_resolution: 8.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PathsConfig {
    pub install_path: String,
    pub registry_dir: Option<PathBuf>,
    pub projects_root: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            install_path: "essq".to_string(),
            registry_dir: None,
            projects_root: "runs/essq_projects".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub max_files: usize,
    pub max_age_days: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            max_files: 20,
            max_age_days: 14,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransportConfig {
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub poll_interval_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_ms: 2000,
            poll_interval_secs: 60,
        }
    }
}

/// Picks a scheduler architecture directive by requested core count.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArchitectureRule {
    #[serde(default)]
    pub max_cpus: Option<u32>,
    pub hint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostConfig {
    pub cluster_soft: ClusterSoftware,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub cpus: Option<u32>,
    /// Node memory in GB.
    #[serde(default)]
    pub memory: Option<f64>,
    #[serde(default)]
    pub architecture: Vec<ArchitectureRule>,
    #[serde(default)]
    pub submit_templates: BTreeMap<String, String>,
    #[serde(default)]
    pub array_template: Option<String>,
    #[serde(default)]
    pub incore_commands: BTreeMap<String, String>,
}

impl HostConfig {
    pub fn local(cluster_soft: ClusterSoftware) -> Self {
        Self {
            cluster_soft,
            address: None,
            username: None,
            cpus: None,
            memory: None,
            architecture: Vec::new(),
            submit_templates: BTreeMap::new(),
            array_template: None,
            incore_commands: BTreeMap::new(),
        }
    }

    pub fn is_local(&self) -> bool {
        self.address.is_none()
    }

    pub fn username(&self) -> String {
        self.username
            .clone()
            .or_else(|| std::env::var("USER").ok())
            .unwrap_or_else(|| "essq".to_string())
    }

    /// The first rule whose core bound admits `cpus`, or an empty hint.
    pub fn architecture_hint(&self, cpus: u32) -> String {
        self.architecture
            .iter()
            .find(|rule| rule.max_cpus.map_or(true, |max| cpus <= max))
            .map(|rule| rule.hint.clone())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub job_defaults: JobDefaults,
    pub paths: PathsConfig,
    pub logging: LoggingConfig,
    pub transport: TransportConfig,
    pub hosts: BTreeMap<String, HostConfig>,
    /// Backend name to hosts in order of preference.
    pub backend_hosts: BTreeMap<String, Vec<String>>,
    /// Named file contents referenced by staged files.
    pub templates: BTreeMap<String, String>,
    pub probe_command: Option<String>,
}

impl Settings {
    pub fn host(&self, name: &str) -> Result<&HostConfig, ConfigError> {
        self.hosts
            .get(name)
            .ok_or_else(|| ConfigError::UnknownHost(name.to_string()))
    }

    /// The preferred host for `backend`, honouring an explicit override.
    pub fn host_for_backend(
        &self,
        backend: &str,
        requested: Option<&str>,
    ) -> Result<String, ConfigError> {
        if let Some(name) = requested {
            self.host(name)?;
            return Ok(name.to_string());
        }
        self.backend_hosts
            .get(backend)
            .and_then(|hosts| hosts.first())
            .cloned()
            .ok_or_else(|| ConfigError::NoHostForBackend(backend.to_string()))
    }

    pub fn named_template(&self, name: &str) -> Result<&str, ConfigError> {
        self.templates
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| ConfigError::UnknownNamedTemplate(name.to_string()))
    }

    pub fn registry_dir(&self) -> Result<PathBuf, ConfigError> {
        if let Some(dir) = &self.paths.registry_dir {
            return Ok(dir.clone());
        }
        let xdg_dirs = xdg::BaseDirectories::with_prefix("essq");
        let data_home = xdg_dirs
            .get_data_home()
            .ok_or(ConfigError::XdgDirectoryNotFound("data"))?;
        Ok(data_home.join("registry"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let defaults = &self.job_defaults;
        if defaults.cpu_cores == 0 {
            return Err(ConfigError::General(
                "job_defaults.cpu_cores must be at least 1".to_string(),
            ));
        }
        if !(defaults.max_node_memory_fraction > 0.0 && defaults.max_node_memory_fraction <= 1.0)
        {
            return Err(ConfigError::General(format!(
                "job_defaults.max_node_memory_fraction must be in (0, 1], got {}",
                defaults.max_node_memory_fraction
            )));
        }
        if defaults.memory_gb <= 0.0 {
            return Err(ConfigError::General(
                "job_defaults.memory_gb must be positive".to_string(),
            ));
        }
        if defaults.rotor_scan_resolution <= 0.0 || defaults.rotor_scan_resolution > 360.0 {
            return Err(ConfigError::General(format!(
                "job_defaults.rotor_scan_resolution must be in (0, 360], got {}",
                defaults.rotor_scan_resolution
            )));
        }
        if self.transport.max_attempts == 0 {
            return Err(ConfigError::General(
                "transport.max_attempts must be at least 1".to_string(),
            ));
        }
        for (name, host) in &self.hosts {
            if host.cpus == Some(0) {
                return Err(ConfigError::General(format!(
                    "hosts.{}.cpus must be at least 1",
                    name
                )));
            }
            if host.memory.is_some_and(|m| m <= 0.0) {
                return Err(ConfigError::General(format!(
                    "hosts.{}.memory must be positive",
                    name
                )));
            }
        }
        for (backend, hosts) in &self.backend_hosts {
            for host in hosts {
                if !self.hosts.contains_key(host) {
                    return Err(ConfigError::General(format!(
                        "backend_hosts.{} references undefined host '{}'",
                        backend, host
                    )));
                }
            }
        }
        Ok(())
    }

    fn expand_paths(&mut self) {
        self.paths.install_path = expand(&self.paths.install_path);
        if let Some(dir) = &self.paths.registry_dir {
            self.paths.registry_dir = Some(PathBuf::from(expand(&dir.to_string_lossy())));
        }
        if let Some(cmd) = &self.probe_command {
            self.probe_command = Some(expand(cmd));
        }
    }
}

fn expand(value: &str) -> String {
    shellexpand::tilde(value).into_owned()
}

pub fn config_path() -> Result<PathBuf, ConfigError> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("essq");
    let config_home = xdg_dirs
        .get_config_home()
        .ok_or(ConfigError::XdgDirectoryNotFound("config"))?;
    Ok(config_home.join("config.toml"))
}

/// Loads the user configuration, falling back to defaults when none exists.
pub fn load_settings() -> Result<Settings, ConfigError> {
    let path = config_path()?;
    if !path.exists() {
        tracing::debug!(
            "No configuration file at '{}', using defaults.",
            path.display()
        );
        let settings = Settings::default();
        settings.validate()?;
        return Ok(settings);
    }
    load_settings_from(&path)
}

pub fn load_settings_from(path: &Path) -> Result<Settings, ConfigError> {
    let content = fs_err::read_to_string(path).map_err(|e| ConfigError::PathIo {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mut settings: Settings = toml::from_str(&content)?;
    settings.expand_paths();
    settings.validate()?;
    tracing::debug!(
        "Loaded configuration from '{}' with {} host(s).",
        path.display(),
        settings.hosts.len()
    );
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r##"
probe_command = "~/bin/essq-probe"

[job_defaults]
cpu_cores = 16
memory_gb = 32.0

[transport]
max_attempts = 5

[hosts.local]
cluster_soft = "slurm"
cpus = 48
memory = 128.0

[hosts.local.submit_templates]
gaussian = "#SBATCH -J {name}"

[hosts.pharos]
cluster_soft = "oge"
address = "pharos.example.org"
username = "alice"

[[hosts.pharos.architecture]]
max_cpus = 8
hint = "\n#$ -l harpertown"

[[hosts.pharos.architecture]]
hint = "\n#$ -l magnycours"

[backend_hosts]
gaussian = ["local", "pharos"]
molpro = ["pharos"]

[templates]
restart = "restart data"
"##;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_sample_settings() {
        let file = write_config(SAMPLE);
        let settings = load_settings_from(file.path()).unwrap();

        assert_eq!(settings.job_defaults.cpu_cores, 16);
        assert_eq!(settings.job_defaults.max_node_memory_fraction, 0.8);
        assert_eq!(settings.transport.max_attempts, 5);
        assert_eq!(settings.transport.poll_interval_secs, 60);
        assert_eq!(settings.paths.projects_root, "runs/essq_projects");
        assert!(!settings
            .probe_command
            .as_deref()
            .unwrap()
            .starts_with('~'));

        let local = settings.host("local").unwrap();
        assert!(local.is_local());
        assert_eq!(local.cluster_soft, ClusterSoftware::Slurm);
        assert_eq!(
            local.submit_templates.get("gaussian").map(String::as_str),
            Some("#SBATCH -J {name}")
        );

        let pharos = settings.host("pharos").unwrap();
        assert!(!pharos.is_local());
        assert_eq!(pharos.username(), "alice");
    }

    #[test]
    fn test_host_for_backend() {
        let file = write_config(SAMPLE);
        let settings = load_settings_from(file.path()).unwrap();

        assert_eq!(settings.host_for_backend("gaussian", None).unwrap(), "local");
        assert_eq!(
            settings.host_for_backend("gaussian", Some("pharos")).unwrap(),
            "pharos"
        );
        assert!(matches!(
            settings.host_for_backend("orca", None),
            Err(ConfigError::NoHostForBackend(_))
        ));
        assert!(matches!(
            settings.host_for_backend("gaussian", Some("nowhere")),
            Err(ConfigError::UnknownHost(_))
        ));
    }

    #[test]
    fn test_architecture_hint_by_core_count() {
        let file = write_config(SAMPLE);
        let settings = load_settings_from(file.path()).unwrap();
        let pharos = settings.host("pharos").unwrap();

        assert_eq!(pharos.architecture_hint(8), "\n#$ -l harpertown");
        assert_eq!(pharos.architecture_hint(16), "\n#$ -l magnycours");
        assert_eq!(settings.host("local").unwrap().architecture_hint(4), "");
    }

    #[test]
    fn test_named_template_lookup() {
        let file = write_config(SAMPLE);
        let settings = load_settings_from(file.path()).unwrap();
        assert_eq!(settings.named_template("restart").unwrap(), "restart data");
        assert!(matches!(
            settings.named_template("missing"),
            Err(ConfigError::UnknownNamedTemplate(_))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_fraction() {
        let file = write_config("[job_defaults]\nmax_node_memory_fraction = 1.5\n");
        assert!(matches!(
            load_settings_from(file.path()),
            Err(ConfigError::General(_))
        ));
    }

    #[test]
    fn test_validate_rejects_unknown_cluster_software() {
        let file = write_config("[hosts.x]\ncluster_soft = \"lsf\"\n");
        assert!(matches!(
            load_settings_from(file.path()),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn test_validate_rejects_dangling_backend_host() {
        let file = write_config("[backend_hosts]\norca = [\"ghost\"]\n");
        assert!(load_settings_from(file.path()).is_err());
    }

    #[test]
    fn test_explicit_registry_dir() {
        let file = write_config("[paths]\nregistry_dir = \"/var/lib/essq\"\n");
        let settings = load_settings_from(file.path()).unwrap();
        assert_eq!(
            settings.registry_dir().unwrap(),
            PathBuf::from("/var/lib/essq")
        );
    }
}
