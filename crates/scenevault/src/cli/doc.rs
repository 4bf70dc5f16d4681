//! `scenevault doc ...`

use super::output::{print_json, Output};
use super::resolve_scene;
use anyhow::{Context, Result};
use clap::Subcommand;
use scenevault_store::Vault;
use serde_json::Value;
use std::path::PathBuf;

#[derive(Subcommand, Debug)]
pub enum DocAction {
    /// Store a JSON document as the next generation of a scene path
    Put {
        scene: String,
        name: String,
        /// Local JSON file
        source: PathBuf,
        #[arg(long)]
        user: Option<i64>,
    },

    /// Print a document
    Show {
        scene: String,
        name: String,
        #[arg(long)]
        generation: Option<i64>,
    },

    /// Structural difference between two generations
    Diff {
        scene: String,
        name: String,
        from: i64,
        to: i64,
    },

    /// Write a past generation again as the newest one
    Restore {
        scene: String,
        name: String,
        generation: i64,
        #[arg(long)]
        user: Option<i64>,
    },
}

pub async fn run(vault: &Vault, out: &Output, action: DocAction) -> Result<()> {
    match action {
        DocAction::Put {
            scene,
            name,
            source,
            user,
        } => {
            let scene = resolve_scene(vault, &scene).await?;
            let text = tokio::fs::read_to_string(&source)
                .await
                .with_context(|| format!("Cannot read {}", source.display()))?;
            let document: Value = serde_json::from_str(&text)
                .with_context(|| format!("{} is not valid JSON", source.display()))?;
            let entry = vault.write_document(scene.id, &name, &document, user).await?;
            out.emit(&entry, || {
                println!("Stored {} generation {}", entry.name, entry.generation)
            })
        }

        DocAction::Show {
            scene,
            name,
            generation,
        } => {
            let scene = resolve_scene(vault, &scene).await?;
            let document = vault.get_document(scene.id, &name, generation).await?;
            print_json(&document)
        }

        DocAction::Diff {
            scene,
            name,
            from,
            to,
        } => {
            let scene = resolve_scene(vault, &scene).await?;
            let delta = vault
                .diff_document_generations(scene.id, &name, from, to)
                .await
                .with_context(|| format!("Failed to diff {} {}..{}", name, from, to))?;
            if delta.is_empty() && !out.is_json() {
                println!("No changes");
                return Ok(());
            }
            print_json(&delta)
        }

        DocAction::Restore {
            scene,
            name,
            generation,
            user,
        } => {
            let scene = resolve_scene(vault, &scene).await?;
            let entry = vault
                .restore_document(scene.id, &name, generation, user)
                .await?;
            out.emit(&entry, || {
                println!(
                    "Restored {} generation {} as generation {}",
                    name, generation, entry.generation
                )
            })
        }
    }
}
