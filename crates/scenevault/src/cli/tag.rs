//! `scenevault tag ...`

use super::output::{print_table, Output};
use super::resolve_scene;
use anyhow::Result;
use clap::Subcommand;
use scenevault_store::Vault;
use serde_json::json;

#[derive(Subcommand, Debug)]
pub enum TagAction {
    /// Tag a scene
    Add { scene: String, tag: String },

    /// Remove a tag from a scene
    Rm { scene: String, tag: String },

    /// List tags with their scene counts, or the tags of one scene
    List {
        #[arg(long)]
        scene: Option<String>,

        /// Substring filter
        #[arg(long = "match")]
        matching: Option<String>,
    },

    /// Scenes carrying a tag
    Show { tag: String },
}

pub async fn run(vault: &Vault, out: &Output, action: TagAction) -> Result<()> {
    match action {
        TagAction::Add { scene, tag } => {
            let scene = resolve_scene(vault, &scene).await?;
            vault.add_tag(&tag, scene.id).await?;
            out.emit(&json!({ "scene": scene.id, "tag": tag }), || {
                println!("Tagged {} with {}", scene.name, tag)
            })
        }

        TagAction::Rm { scene, tag } => {
            let scene = resolve_scene(vault, &scene).await?;
            let removed = vault.remove_tag(&tag, scene.id).await?;
            out.emit(&json!({ "removed": removed }), || {
                if removed {
                    println!("Removed tag {} from {}", tag, scene.name);
                } else {
                    println!("{} was not tagged {}", scene.name, tag);
                }
            })
        }

        TagAction::List {
            scene: Some(scene),
            ..
        } => {
            let scene = resolve_scene(vault, &scene).await?;
            let tags = vault.scene_tags(scene.id).await?;
            out.emit(&tags, || {
                for tag in &tags {
                    println!("{}", tag);
                }
            })
        }

        TagAction::List {
            scene: None,
            matching,
        } => {
            let tags = vault.get_tags(matching.as_deref()).await?;
            out.emit(&tags, || {
                let rows = tags
                    .iter()
                    .map(|tag| vec![tag.name.clone(), tag.size.to_string()])
                    .collect();
                print_table(&["TAG", "SCENES"], rows);
            })
        }

        TagAction::Show { tag } => {
            let mut scenes = Vec::new();
            for id in vault.get_tag(&tag).await? {
                scenes.push(vault.get_scene(id).await?);
            }
            out.emit(&scenes, || {
                for scene in &scenes {
                    println!("{}\t{}", scene.id, scene.name);
                }
            })
        }
    }
}
