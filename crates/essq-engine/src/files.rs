use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Where the local content of a staged file comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum FileSource {
    /// The file at the descriptor's local path.
    LiteralPath,
    /// The named entry of the `[templates]` registry.
    NamedTemplate(String),
}

/// One file to move between the local job directory and the execution host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    name: String,
    local: PathBuf,
    remote: PathBuf,
    source: FileSource,
    executable: bool,
}

impl FileDescriptor {
    /// `file_name` under both job directories.
    pub fn in_dirs(file_name: &str, local_dir: &Path, remote_dir: &Path) -> Self {
        Self {
            name: file_name.to_string(),
            local: local_dir.join(file_name),
            remote: remote_dir.join(file_name),
            source: FileSource::LiteralPath,
            executable: false,
        }
    }

    /// A file whose local copy lives somewhere else than the job directory.
    pub fn from_path(name: &str, local: &Path, remote: &Path) -> Self {
        Self {
            name: name.to_string(),
            local: local.to_path_buf(),
            remote: remote.to_path_buf(),
            source: FileSource::LiteralPath,
            executable: false,
        }
    }

    pub fn from_template(template: &str, file_name: &str, local_dir: &Path, remote_dir: &Path) -> Self {
        Self {
            source: FileSource::NamedTemplate(template.to_string()),
            ..Self::in_dirs(file_name, local_dir, remote_dir)
        }
    }

    pub fn executable(mut self) -> Self {
        self.executable = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn local(&self) -> &Path {
        &self.local
    }

    pub fn remote(&self) -> &Path {
        &self.remote
    }

    pub fn source(&self) -> &FileSource {
        &self.source
    }

    pub fn is_executable(&self) -> bool {
        self.executable
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedFiles {
    pub uploads: Vec<FileDescriptor>,
    pub downloads: Vec<FileDescriptor>,
}

impl StagedFiles {
    pub fn upload(&mut self, file: FileDescriptor) {
        if !self.uploads.iter().any(|f| f.name == file.name) {
            self.uploads.push(file);
        }
    }

    pub fn download(&mut self, file: FileDescriptor) {
        if !self.downloads.iter().any(|f| f.name == file.name) {
            self.downloads.push(file);
        }
    }
}
