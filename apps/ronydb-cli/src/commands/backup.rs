use std::path::Path;

use super::{write_download, Context};

pub async fn cmd_run_backup_cycle(ctx: &Context) -> Result<(), Box<dyn std::error::Error>> {
    let manager = ctx.manager().await?;
    let snapshot = manager.run_backup_cycle().await?;
    println!("✓ {}", snapshot.created_at);
    println!("  id: {}", snapshot.id);
    Ok(())
}

pub async fn cmd_list_backups(ctx: &Context) -> Result<(), Box<dyn std::error::Error>> {
    let manager = ctx.manager().await?;
    let snapshots = manager.list_snapshots().await?;

    if snapshots.is_empty() {
        println!("No backups found");
        return Ok(());
    }
    println!("{:<5} {:<38} CREATED AT", "SLOT", "ID");
    for s in snapshots {
        println!("{:<5} {:<38} {}", s.slot, s.id, s.created_at);
    }
    Ok(())
}

pub async fn cmd_download_backup(
    ctx: &Context,
    id: &str,
    out: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let manager = ctx.manager().await?;
    let download = manager.download_snapshot(id).await?;
    let path = write_download(&download, out)?;
    println!(
        "✓ Wrote {} rows to {}",
        download.rows.len(),
        path.display()
    );
    Ok(())
}
