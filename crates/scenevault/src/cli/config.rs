//! Vault location from flags and environment.

use anyhow::Result;
use clap::Args;
use scenevault_store::VaultConfig;
use std::path::PathBuf;

#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// Vault root directory [default: ~/.scenevault]
    #[arg(long, global = true, env = "SCENEVAULT_ROOT_DIR")]
    pub root_dir: Option<PathBuf>,

    /// Blob directory [default: <root>/files]
    #[arg(long, global = true, env = "SCENEVAULT_FILES_DIR")]
    pub files_dir: Option<PathBuf>,

    /// SQLite database [default: <root>/database.sqlite]
    #[arg(long, global = true, env = "SCENEVAULT_DATABASE")]
    pub database: Option<PathBuf>,
}

impl ConfigArgs {
    pub fn resolve(&self) -> Result<VaultConfig> {
        let root_dir = match &self.root_dir {
            Some(root) => root.clone(),
            None => scenevault_logging::scenevault_home()?,
        };
        let mut config = VaultConfig::new(root_dir);
        if let Some(files_dir) = &self.files_dir {
            config = config.with_files_dir(files_dir.clone());
        }
        if let Some(database) = &self.database {
            config = config.with_database_path(database.clone());
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_overrides_apply_on_top_of_root() {
        let args = ConfigArgs {
            root_dir: Some(PathBuf::from("/srv/vault")),
            files_dir: None,
            database: Some(PathBuf::from("/var/db/vault.sqlite")),
        };
        let config = args.resolve().unwrap();
        assert_eq!(config.files_dir, Path::new("/srv/vault/files"));
        assert_eq!(config.database_path, Path::new("/var/db/vault.sqlite"));
    }
}
