//! `scenevault scene ...`

use super::output::{format_time, print_table, Output};
use super::resolve_scene;
use anyhow::{Context, Result};
use clap::Subcommand;
use scenevault_store::{SceneQuery, Vault};
use serde_json::json;

#[derive(Subcommand, Debug)]
pub enum SceneAction {
    /// Create an empty scene
    Create {
        name: String,

        /// Owner user id
        #[arg(long)]
        owner: Option<i64>,
    },

    /// List scenes
    List {
        /// Include archived scenes
        #[arg(long)]
        archived: bool,

        /// Case-insensitive substring filter on the name
        #[arg(long = "match")]
        matching: Option<String>,

        #[arg(long, default_value = "10")]
        limit: i64,

        #[arg(long, default_value = "0")]
        offset: i64,
    },

    /// Rename a scene
    Rename { scene: String, new_name: String },

    /// Archive a scene (recoverable)
    Archive { scene: String },

    /// Restore an archived scene
    Unarchive {
        /// Archived name (`name#id`) or id
        scene: String,
    },

    /// Delete a scene with its history and tasks (irreversible)
    Remove {
        scene: String,

        /// Required confirmation
        #[arg(long)]
        yes: bool,
    },
}

pub async fn run(vault: &Vault, out: &Output, action: SceneAction) -> Result<()> {
    match action {
        SceneAction::Create { name, owner } => {
            let id = vault
                .create_scene(&name, owner)
                .await
                .with_context(|| format!("Failed to create scene {}", name))?;
            out.emit(&json!({ "id": id, "name": name }), || {
                println!("Created scene {} (#{})", name, id)
            })
        }

        SceneAction::List {
            archived,
            matching,
            limit,
            offset,
        } => {
            let query = SceneQuery {
                limit,
                offset,
                archived,
                matching,
            };
            let scenes = vault.list_scenes(&query).await?;
            out.emit(&scenes, || {
                let rows = scenes
                    .iter()
                    .map(|scene| {
                        vec![
                            scene.id.to_string(),
                            scene.name.clone(),
                            if scene.archived { "yes" } else { "" }.to_string(),
                            format_time(&scene.ctime),
                        ]
                    })
                    .collect();
                print_table(&["ID", "NAME", "ARCHIVED", "CREATED"], rows);
            })
        }

        SceneAction::Rename { scene, new_name } => {
            let found = resolve_scene(vault, &scene).await?;
            vault
                .rename_scene(found.id, &new_name)
                .await
                .with_context(|| format!("Failed to rename {} to {}", found.name, new_name))?;
            out.emit(&json!({ "id": found.id, "name": new_name }), || {
                println!("Renamed {} to {}", found.name, new_name)
            })
        }

        SceneAction::Archive { scene } => {
            let found = resolve_scene(vault, &scene).await?;
            vault.archive_scene(found.id).await?;
            let archived = vault.get_scene(found.id).await?;
            out.emit(&archived, || {
                println!("Archived {} as {}", found.name, archived.name)
            })
        }

        SceneAction::Unarchive { scene } => {
            let found = resolve_scene(vault, &scene).await?;
            vault
                .unarchive_scene(found.id)
                .await
                .with_context(|| format!("Failed to restore {}", found.name))?;
            let restored = vault.get_scene(found.id).await?;
            out.emit(&restored, || println!("Restored {}", restored.name))
        }

        SceneAction::Remove { scene, yes } => {
            let found = resolve_scene(vault, &scene).await?;
            if !yes {
                anyhow::bail!(
                    "Removing {} deletes its history permanently; pass --yes to confirm",
                    found.name
                );
            }
            vault.remove_scene(found.id).await?;
            out.emit(&json!({ "removed": found.id }), || {
                println!("Removed {} (#{})", found.name, found.id)
            })
        }
    }
}
