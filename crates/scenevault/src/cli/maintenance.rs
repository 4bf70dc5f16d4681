//! Scene history and blob cleanup.

use super::file::print_entries;
use super::output::Output;
use super::resolve_scene;
use anyhow::{Context, Result};
use scenevault_store::{CleanOptions, HistoryQuery, OrderDirection, Vault};

pub async fn history(
    vault: &Vault,
    out: &Output,
    scene: &str,
    limit: i64,
    offset: i64,
    order: &str,
) -> Result<()> {
    let order = OrderDirection::parse(order)
        .with_context(|| format!("Order must be asc or desc, got {}", order))?;
    let scene = resolve_scene(vault, scene).await?;
    let entries = vault
        .get_scene_history(
            scene.id,
            &HistoryQuery {
                limit,
                offset,
                order,
            },
        )
        .await?;
    out.emit(&entries, || print_entries(&entries))
}

pub async fn clean(vault: &Vault, out: &Output, remove: bool) -> Result<()> {
    let options = CleanOptions {
        remove_loose: remove,
        ..Default::default()
    };
    let report = vault.clean(&options).await.context("Clean failed")?;
    out.emit(&report, || {
        for hash in &report.missing {
            println!("missing  {}", hash);
        }
        for hash in &report.loose {
            println!("loose    {}", hash);
        }
        println!(
            "{} loose ({} removed), {} missing, {} stale uploads removed",
            report.loose.len(),
            report.removed_loose,
            report.missing.len(),
            report.removed_temp
        );
        if !remove && !report.loose.is_empty() {
            println!("Run with --remove to delete loose blobs");
        }
    })
}
