//! Job counter and append-only job logs shared by every essq process using
//! the same registry directory.

use crate::error::{ClientError, Result};
use chrono::{DateTime, Local};
use essq_core::constants::registry::{COMPLETED, COUNTER, INITIATED, LOCK, VERSION};
use essq_core::errors::ConfigError;
use essq_core::model::{EssState, JobNumber, ServerStatus};
use nix::fcntl::{Flock, FlockArg};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub job_num: JobNumber,
    pub project: String,
    pub label: String,
    pub job_type: String,
    pub is_ts: bool,
    pub charge: i32,
    pub multiplicity: u32,
    pub job_name: String,
    #[serde(default)]
    pub job_id: Option<String>,
    pub host: String,
    pub backend: String,
    pub memory_gb: f64,
    pub level: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedEntry {
    #[serde(flatten)]
    pub entry: RegistryEntry,
    #[serde(default)]
    pub initial_time: Option<DateTime<Local>>,
    #[serde(default)]
    pub final_time: Option<DateTime<Local>>,
    #[serde(default)]
    pub run_time_secs: Option<i64>,
    pub server_status: ServerStatus,
    pub ess_status: EssState,
    #[serde(default)]
    pub tried_methods: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Header {
    essq_registry: u32,
    kind: String,
}

pub struct Registry {
    dir: PathBuf,
}

impl Registry {
    /// Opens the registry in `dir`, creating it and recreating any log whose
    /// header does not match the current version.
    pub fn open(dir: &Path) -> Result<Self> {
        fs_err::create_dir_all(dir).map_err(ConfigError::Io)?;
        let registry = Self {
            dir: dir.to_path_buf(),
        };
        let _lock = registry.lock()?;
        registry.ensure_log(INITIATED, "initiated")?;
        registry.ensure_log(COMPLETED, "completed")?;
        Ok(registry)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Blocks until this handle holds the registry lock. The lock is an
    /// exclusive `flock` on a file in the registry directory, so it excludes
    /// other handles and other processes alike. Released on drop.
    fn lock(&self) -> Result<Flock<std::fs::File>> {
        let path = self.dir.join(LOCK);
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(ConfigError::Io)?;
        Flock::lock(file, FlockArg::LockExclusive).map_err(|(_, errno)| ClientError::Registry {
            path,
            message: format!("failed to acquire registry lock: {}", errno),
        })
    }

    fn ensure_log(&self, file: &str, kind: &str) -> Result<()> {
        let path = self.dir.join(file);
        let expected = Header {
            essq_registry: VERSION,
            kind: kind.to_string(),
        };
        if path.exists() {
            let content = fs_err::read_to_string(&path).map_err(ConfigError::Io)?;
            let current = content
                .lines()
                .next()
                .and_then(|line| serde_json::from_str::<Header>(line).ok());
            if current.as_ref() == Some(&expected) {
                return Ok(());
            }
            let backup = path.with_extension(format!(
                "jsonl.{}.bak",
                Local::now().format("%Y%m%d%H%M%S")
            ));
            tracing::warn!(
                "Registry log '{}' has an outdated header, moving it to '{}'",
                path.display(),
                backup.display()
            );
            fs_err::rename(&path, &backup).map_err(ConfigError::Io)?;
        }
        let mut line = serde_json::to_string(&expected)?;
        line.push('\n');
        fs_err::write(&path, line).map_err(ConfigError::Io)?;
        Ok(())
    }

    /// Atomically advances the job counter and returns the new number.
    pub fn next_job_number(&self) -> Result<JobNumber> {
        let _lock = self.lock()?;
        let path = self.dir.join(COUNTER);
        let last = match fs_err::read_to_string(&path) {
            Ok(content) => content.trim().parse::<u32>().map_err(|e| ClientError::Registry {
                path: path.clone(),
                message: format!("corrupt job counter: {}", e),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(ConfigError::Io(e).into()),
        };
        let next = JobNumber::new(last).next();

        let mut staged = tempfile::NamedTempFile::new_in(&self.dir).map_err(ConfigError::Io)?;
        write!(staged, "{}", next.value()).map_err(ConfigError::Io)?;
        staged.persist(&path).map_err(|e| ConfigError::Io(e.error))?;
        Ok(next)
    }

    fn append<T: Serialize>(&self, file: &str, record: &T) -> Result<()> {
        let _lock = self.lock()?;
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut handle = fs_err::OpenOptions::new()
            .append(true)
            .create(true)
            .open(self.dir.join(file))
            .map_err(ConfigError::Io)?;
        handle.write_all(line.as_bytes()).map_err(ConfigError::Io)?;
        Ok(())
    }

    pub fn append_initiated(&self, entry: &RegistryEntry) -> Result<()> {
        self.append(INITIATED, entry)
    }

    pub fn append_completed(&self, entry: &CompletedEntry) -> Result<()> {
        self.append(COMPLETED, entry)
    }

    fn read<T: DeserializeOwned>(&self, file: &str) -> Result<Vec<T>> {
        let path = self.dir.join(file);
        let content = fs_err::read_to_string(&path).map_err(ConfigError::Io)?;
        let mut records = Vec::new();
        for (n, line) in content.lines().enumerate().skip(1) {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(
                    "Skipping unreadable line {} of '{}': {}",
                    n + 1,
                    path.display(),
                    e
                ),
            }
        }
        Ok(records)
    }

    pub fn initiated(&self) -> Result<Vec<RegistryEntry>> {
        self.read(INITIATED)
    }

    pub fn completed(&self) -> Result<Vec<CompletedEntry>> {
        self.read(COMPLETED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::tempdir;

    fn entry(num: u32) -> RegistryEntry {
        RegistryEntry {
            job_num: JobNumber::new(num),
            project: "demo".into(),
            label: "H2O".into(),
            job_type: "opt".into(),
            is_ts: false,
            charge: 0,
            multiplicity: 1,
            job_name: format!("opt_a{}", num),
            job_id: Some("123".into()),
            host: "local".into(),
            backend: "gaussian".into(),
            memory_gb: 14.0,
            level: "wb97xd/def2-tzvp".into(),
        }
    }

    #[test]
    fn test_fresh_counter_starts_at_one() {
        let dir = tempdir().unwrap();
        let registry = Registry::open(dir.path()).unwrap();
        assert_eq!(registry.next_job_number().unwrap().value(), 1);
        assert_eq!(registry.next_job_number().unwrap().value(), 2);
    }

    #[test]
    fn test_counter_wraps_after_99999() {
        let dir = tempdir().unwrap();
        fs_err::write(dir.path().join(COUNTER), "99999").unwrap();
        let registry = Registry::open(dir.path()).unwrap();
        assert_eq!(registry.next_job_number().unwrap().value(), 0);
        assert_eq!(registry.next_job_number().unwrap().value(), 1);
    }

    #[test]
    fn test_concurrent_numbers_are_unique() {
        let dir = tempdir().unwrap();
        let registry = Registry::open(dir.path()).unwrap();
        let numbers: Vec<u32> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        (0..25)
                            .map(|_| registry.next_job_number().unwrap().value())
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect()
        });
        let unique: HashSet<u32> = numbers.iter().copied().collect();
        assert_eq!(unique.len(), 200);
        assert_eq!(numbers.iter().max(), Some(&200));
    }

    #[test]
    fn test_separate_handles_share_one_counter() {
        let dir = tempdir().unwrap();
        let first = Registry::open(dir.path()).unwrap();
        let second = Registry::open(dir.path()).unwrap();
        let numbers: Vec<u32> = std::thread::scope(|scope| {
            let handles: Vec<_> = [&first, &second]
                .into_iter()
                .map(|registry| {
                    scope.spawn(move || {
                        (0..150)
                            .map(|_| registry.next_job_number().unwrap().value())
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect()
        });
        let unique: HashSet<u32> = numbers.iter().copied().collect();
        assert_eq!(unique.len(), 300);
        assert_eq!(numbers.iter().max(), Some(&300));
    }

    #[test]
    fn test_append_and_read_logs() {
        let dir = tempdir().unwrap();
        let registry = Registry::open(dir.path()).unwrap();
        registry.append_initiated(&entry(1)).unwrap();
        registry.append_initiated(&entry(2)).unwrap();
        registry
            .append_completed(&CompletedEntry {
                entry: entry(1),
                initial_time: Some(Local::now()),
                final_time: Some(Local::now()),
                run_time_secs: Some(42),
                server_status: ServerStatus::Done,
                ess_status: EssState::Done,
                tried_methods: vec!["memory".into()],
            })
            .unwrap();

        let initiated = registry.initiated().unwrap();
        assert_eq!(initiated, vec![entry(1), entry(2)]);
        let completed = registry.completed().unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].run_time_secs, Some(42));
        assert_eq!(completed[0].entry.job_name, "opt_a1");
    }

    #[test]
    fn test_outdated_header_recreates_log() {
        let dir = tempdir().unwrap();
        fs_err::write(
            dir.path().join(INITIATED),
            "job_num,project,label,comments\n1,demo,H2O,\n",
        )
        .unwrap();
        let registry = Registry::open(dir.path()).unwrap();
        assert!(registry.initiated().unwrap().is_empty());

        let backups = fs_err::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".bak"))
            .count();
        assert_eq!(backups, 1);
    }

    #[test]
    fn test_reopen_keeps_existing_entries() {
        let dir = tempdir().unwrap();
        {
            let registry = Registry::open(dir.path()).unwrap();
            registry.append_initiated(&entry(7)).unwrap();
        }
        let registry = Registry::open(dir.path()).unwrap();
        assert_eq!(registry.initiated().unwrap(), vec![entry(7)]);
    }
}
