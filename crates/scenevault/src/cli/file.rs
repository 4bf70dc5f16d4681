//! `scenevault file ...` and `scenevault folder ...`

use super::output::{format_size, format_time, print_table, short_hash, Output};
use super::resolve_scene;
use anyhow::{bail, Context, Result};
use clap::Subcommand;
use scenevault_store::{FileEntry, FileState, ListFilesOptions, Vault, WriteFileParams};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

#[derive(Subcommand, Debug)]
pub enum FileAction {
    /// Store a local file as the next generation of a scene path
    Put {
        scene: String,
        /// Path inside the scene
        name: String,
        /// Local file to upload
        source: PathBuf,

        #[arg(long, default_value = "application/octet-stream")]
        mime: String,

        /// Author user id
        #[arg(long)]
        user: Option<i64>,
    },

    /// Print a file, or write it to --output
    Get {
        scene: String,
        name: String,

        /// Read the file as of this generation
        #[arg(long)]
        generation: Option<i64>,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List the live files of a scene
    List {
        scene: String,

        /// Include removed paths
        #[arg(long)]
        removed: bool,
    },

    /// Remove a file (its history is kept)
    Rm {
        scene: String,
        name: String,
        #[arg(long)]
        user: Option<i64>,
    },

    /// Move a file to another path
    Mv {
        scene: String,
        from: String,
        to: String,
        #[arg(long)]
        user: Option<i64>,
    },

    /// All generations of a path
    History { scene: String, name: String },
}

#[derive(Subcommand, Debug)]
pub enum FolderAction {
    /// Create a folder placeholder
    Create {
        scene: String,
        name: String,
        #[arg(long)]
        user: Option<i64>,
    },

    /// List live folders
    List { scene: String },
}

pub async fn run(vault: &Vault, out: &Output, action: FileAction) -> Result<()> {
    match action {
        FileAction::Put {
            scene,
            name,
            source,
            mime,
            user,
        } => {
            let scene = resolve_scene(vault, &scene).await?;
            let reader = tokio::fs::File::open(&source)
                .await
                .with_context(|| format!("Cannot open {}", source.display()))?;
            let mut params = WriteFileParams::new(scene.id, &name).mime(mime);
            if let Some(user) = user {
                params = params.user(user);
            }
            let entry = vault
                .write_file(reader, &params)
                .await
                .with_context(|| format!("Failed to write {} in {}", name, scene.name))?;
            out.emit(&entry, || {
                let verb = if entry.is_created() { "Created" } else { "Updated" };
                println!(
                    "{} {} (generation {}, {})",
                    verb,
                    entry.name,
                    entry.generation,
                    format_size(entry.size)
                );
            })
        }

        FileAction::Get {
            scene,
            name,
            generation,
            output,
        } => {
            let scene = resolve_scene(vault, &scene).await?;
            let entry = match generation {
                None => vault.get_file(scene.id, &name).await?,
                Some(generation) => match vault.get_file_before(scene.id, &name, generation).await? {
                    FileState::Present(entry) => entry,
                    FileState::Removed(entry) => {
                        bail!("{} was removed at generation {}", name, entry.generation)
                    }
                    FileState::Missing => {
                        bail!("{} did not exist at generation {}", name, generation)
                    }
                },
            };
            let bytes = vault.read_file(&entry).await?;
            match output {
                Some(path) => {
                    tokio::fs::write(&path, &bytes)
                        .await
                        .with_context(|| format!("Cannot write {}", path.display()))?;
                    eprintln!("Wrote {} to {}", format_size(entry.size), path.display());
                }
                None => {
                    let mut stdout = tokio::io::stdout();
                    stdout.write_all(&bytes).await?;
                    stdout.flush().await?;
                }
            }
            Ok(())
        }

        FileAction::List { scene, removed } => {
            let scene = resolve_scene(vault, &scene).await?;
            let files = vault
                .list_files(
                    scene.id,
                    ListFilesOptions {
                        with_removed: removed,
                        with_folders: false,
                    },
                )
                .await?;
            out.emit(&files, || print_entries(&files))
        }

        FileAction::Rm { scene, name, user } => {
            let scene = resolve_scene(vault, &scene).await?;
            let tombstone = vault.remove_file(scene.id, &name, user).await?;
            out.emit(&tombstone, || {
                println!("Removed {} (generation {})", name, tombstone.generation)
            })
        }

        FileAction::Mv {
            scene,
            from,
            to,
            user,
        } => {
            let scene = resolve_scene(vault, &scene).await?;
            let moved = vault
                .rename_file(scene.id, &from, &to, user)
                .await
                .with_context(|| format!("Failed to move {} to {}", from, to))?;
            out.emit(&moved, || println!("Moved {} to {}", from, moved.name))
        }

        FileAction::History { scene, name } => {
            let scene = resolve_scene(vault, &scene).await?;
            let history = vault.get_file_history(scene.id, &name).await?;
            out.emit(&history, || print_entries(&history))
        }
    }
}

pub async fn run_folder(vault: &Vault, out: &Output, action: FolderAction) -> Result<()> {
    match action {
        FolderAction::Create { scene, name, user } => {
            let scene = resolve_scene(vault, &scene).await?;
            let folder = vault.create_folder(scene.id, &name, user).await?;
            out.emit(&folder, || println!("Created folder {}", folder.name))
        }
        FolderAction::List { scene } => {
            let scene = resolve_scene(vault, &scene).await?;
            let folders = vault.list_folders(scene.id).await?;
            out.emit(&folders, || {
                for folder in &folders {
                    println!("{}/", folder.name);
                }
            })
        }
    }
}

/// Table of file generations.
pub fn print_entries(entries: &[FileEntry]) {
    let rows = entries
        .iter()
        .map(|entry| {
            let state = if entry.is_removed() {
                "removed"
            } else if entry.is_directory() {
                "folder"
            } else {
                ""
            };
            vec![
                entry.name.clone(),
                entry.generation.to_string(),
                format_size(entry.size),
                entry.mime.clone(),
                short_hash(entry.hash.as_deref()),
                state.to_string(),
                format_time(&entry.ctime),
            ]
        })
        .collect();
    print_table(
        &["NAME", "GEN", "SIZE", "MIME", "HASH", "STATE", "MODIFIED"],
        rows,
    );
}
