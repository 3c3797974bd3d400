mod backend;
mod cli;
mod commands;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};
use commands::*;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let ctx = Context::load(&cli.config, cli.store_url, &cli.env_file)?;

    match cli.command {
        Command::RunBackupCycle => cmd_run_backup_cycle(&ctx).await?,
        Command::ListBackups => cmd_list_backups(&ctx).await?,
        Command::DownloadBackup { id, out } => cmd_download_backup(&ctx, &id, &out).await?,
        Command::RestoreBackup { id, save, out } => {
            cmd_restore_backup(&ctx, &id, save, &out).await?
        }
        Command::RestoreFile { path } => cmd_restore_file(&ctx, &path).await?,
        Command::RotateKeys { new_passphrase_env } => {
            cmd_rotate_keys(&ctx, &new_passphrase_env).await?
        }
        Command::Schedule { at } => cmd_schedule(&ctx, at.as_deref()).await?,
    }

    Ok(())
}
