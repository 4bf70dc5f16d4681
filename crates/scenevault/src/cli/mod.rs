//! Subcommands. Each module parses its own action enum and talks to the
//! vault directly.

pub mod config;
pub mod doc;
pub mod file;
pub mod maintenance;
pub mod output;
pub mod scene;
pub mod tag;
pub mod task;

use anyhow::{bail, Context, Result};
use scenevault_store::{Scene, StoreError, Vault};

/// Look a scene up by name, falling back to its numeric id.
///
/// Archived scenes are only reachable by their suffixed name or their id.
pub async fn resolve_scene(vault: &Vault, scene: &str) -> Result<Scene> {
    match vault.get_scene_by_name(scene).await {
        Ok(found) => Ok(found),
        Err(StoreError::NotFound(_)) => match scene.parse::<i64>() {
            Ok(id) => vault
                .get_scene(id)
                .await
                .with_context(|| format!("No scene named or numbered {}", scene)),
            Err(_) => bail!("Scene {} not found", scene),
        },
        Err(err) => Err(err).with_context(|| format!("Failed to look up scene {}", scene)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scenevault_store::VaultConfig;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_resolve_scene_by_name_or_id() {
        let dir = TempDir::new().unwrap();
        let vault = Vault::open(&VaultConfig::new(dir.path())).await.unwrap();
        let id = vault.create_scene("harbor", None).await.unwrap();

        assert_eq!(resolve_scene(&vault, "harbor").await.unwrap().id, id);
        assert_eq!(resolve_scene(&vault, &id.to_string()).await.unwrap().name, "harbor");
        assert!(resolve_scene(&vault, "lighthouse").await.is_err());

        vault.archive_scene(id).await.unwrap();
        let archived = resolve_scene(&vault, &id.to_string()).await.unwrap();
        assert!(archived.archived);
        assert_eq!(resolve_scene(&vault, &archived.name).await.unwrap().id, id);
    }
}
