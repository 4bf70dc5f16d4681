//! Store location and pool settings.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where a vault keeps its database and blobs.
#[derive(Debug, Clone)]
pub struct VaultConfig {
    pub root_dir: PathBuf,
    /// Blob directory, `<root>/files` by default
    pub files_dir: PathBuf,
    /// SQLite database, `<root>/database.sqlite` by default
    pub database_path: PathBuf,
    pub max_connections: u32,
    /// How long a connection waits on a locked database before failing
    pub busy_timeout: Duration,
}

impl VaultConfig {
    /// Default layout under `root_dir`.
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        let root_dir = root_dir.as_ref().to_path_buf();
        Self {
            files_dir: root_dir.join("files"),
            database_path: root_dir.join("database.sqlite"),
            root_dir,
            max_connections: 5,
            busy_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_files_dir(mut self, files_dir: impl Into<PathBuf>) -> Self {
        self.files_dir = files_dir.into();
        self
    }

    pub fn with_database_path(mut self, database_path: impl Into<PathBuf>) -> Self {
        self.database_path = database_path.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout() {
        let config = VaultConfig::new("/srv/vault");
        assert_eq!(config.files_dir, PathBuf::from("/srv/vault/files"));
        assert_eq!(config.database_path, PathBuf::from("/srv/vault/database.sqlite"));

        let config = config.with_files_dir("/mnt/blobs");
        assert_eq!(config.files_dir, PathBuf::from("/mnt/blobs"));
    }
}
