//! SceneVault command line
//!
//! Local administration of a vault: scenes, files, tags, documents, history,
//! blob cleanup and one-shot task runs.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use scenevault_logging::LogConfig;
use scenevault_store::Vault;
use std::process::ExitCode;
use tracing::debug;

mod cli;

use cli::output::Output;

#[derive(Parser, Debug)]
#[command(name = "scenevault", version, about = "Versioned 3D scene storage")]
struct Cli {
    #[command(flatten)]
    config: cli::config::ConfigArgs,

    /// Enable verbose logging (info/debug to stderr)
    #[arg(short = 'v', long, global = true, env = "SCENEVAULT_VERBOSE")]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create, list, rename, archive and remove scenes
    Scene {
        #[command(subcommand)]
        action: cli::scene::SceneAction,
    },

    /// Write, read, move and remove files of a scene
    File {
        #[command(subcommand)]
        action: cli::file::FileAction,
    },

    /// Folder placeholders
    Folder {
        #[command(subcommand)]
        action: cli::file::FolderAction,
    },

    /// Scene tags
    Tag {
        #[command(subcommand)]
        action: cli::tag::TagAction,
    },

    /// Scene documents
    Doc {
        #[command(subcommand)]
        action: cli::doc::DocAction,
    },

    /// Show the change history of a scene
    History {
        /// Scene name or id
        scene: String,

        #[arg(long, default_value = "10")]
        limit: i64,

        #[arg(long, default_value = "0")]
        offset: i64,

        /// asc or desc
        #[arg(long, default_value = "desc")]
        order: String,
    },

    /// Check blob storage against file metadata
    Clean {
        /// Delete loose blobs instead of only reporting them
        #[arg(long)]
        remove: bool,
    },

    /// Run and inspect tasks
    Task {
        #[command(subcommand)]
        action: cli::task::TaskAction,
    },
}

async fn run_command(cli: Cli) -> Result<()> {
    let config = cli.config.resolve()?;
    let vault = Vault::open(&config)
        .await
        .with_context(|| format!("Failed to open vault at {}", config.root_dir.display()))?;
    let out = Output::new(cli.json);
    debug!(root = %config.root_dir.display(), command = ?cli.command, "Running command");

    let result = match cli.command {
        Commands::Scene { action } => cli::scene::run(&vault, &out, action).await,
        Commands::File { action } => cli::file::run(&vault, &out, action).await,
        Commands::Folder { action } => cli::file::run_folder(&vault, &out, action).await,
        Commands::Tag { action } => cli::tag::run(&vault, &out, action).await,
        Commands::Doc { action } => cli::doc::run(&vault, &out, action).await,
        Commands::History {
            scene,
            limit,
            offset,
            order,
        } => cli::maintenance::history(&vault, &out, &scene, limit, offset, &order).await,
        Commands::Clean { remove } => cli::maintenance::clean(&vault, &out, remove).await,
        Commands::Task { action } => cli::task::run(&vault, &out, action).await,
    };

    vault.close().await;
    result
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_dir = match scenevault_logging::logs_dir() {
        Ok(dir) => Some(dir),
        Err(err) => {
            eprintln!("Warning: no log directory: {:#}", err);
            None
        }
    };
    if let Err(err) = scenevault_logging::init_logging(LogConfig {
        app_name: "scenevault",
        verbose: cli.verbose,
        log_dir,
    }) {
        eprintln!("Warning: failed to initialize logging: {:#}", err);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("ERROR: failed to start async runtime: {}", err);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run_command(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("ERROR: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_task_run() {
        let cli = Cli::try_parse_from([
            "scenevault",
            "--root-dir",
            "/tmp/vault",
            "task",
            "run",
            "lighthouse",
            "delay",
            r#"{"time": 1}"#,
        ])
        .unwrap();
        assert_eq!(
            cli.config.root_dir.as_deref(),
            Some(std::path::Path::new("/tmp/vault"))
        );
        assert!(matches!(cli.command, Commands::Task { .. }));
    }

    #[test]
    fn test_parse_clean_remove() {
        let cli = Cli::try_parse_from(["scenevault", "clean", "--remove", "--json"]).unwrap();
        assert!(cli.json);
        assert!(matches!(cli.command, Commands::Clean { remove: true }));
    }
}
