use std::path::Path;

use ronydb_backup::RestoreReport;

use super::{write_download, Context};

fn finish(report: RestoreReport) -> Result<(), Box<dyn std::error::Error>> {
    println!("✓ Restored {} rows", report.restored);
    if report.is_complete() {
        return Ok(());
    }
    for f in &report.failed {
        eprintln!("✗ {}: {}", f.id, f.error);
    }
    Err(format!(
        "{} rows failed to restore; the primary table is partially restored",
        report.failed.len()
    )
    .into())
}

pub async fn cmd_restore_backup(
    ctx: &Context,
    id: &str,
    save: bool,
    out: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let manager = ctx.manager().await?;
    if save {
        let download = manager.download_snapshot(id).await?;
        let path = write_download(&download, out)?;
        println!("✓ Saved a copy to {}", path.display());
    }
    let report = manager.restore_snapshot(id).await?;
    finish(report)
}

pub async fn cmd_restore_file(
    ctx: &Context,
    path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = std::fs::read(path)?;
    let manager = ctx.manager().await?;
    let report = manager.restore_from_json(&bytes).await?;
    finish(report)
}
