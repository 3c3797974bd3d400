use std::sync::Arc;

use ronydb_backup::{run_daily, DailySchedule};
use ronydb_config::parse_hh_mm;
use tracing::{error, info};

use super::Context;

pub async fn cmd_schedule(
    ctx: &Context,
    at: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let at = match at {
        Some(s) => parse_hh_mm(s)?,
        None => ctx.settings.schedule_time()?,
    };
    let schedule = DailySchedule::new(at, ctx.settings.offset()?);
    let manager = Arc::new(ctx.manager().await?);

    info!(at = %at, "starting daily backup scheduler");
    run_daily(manager, schedule, shutdown_signal()).await;
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) =
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(term), Ok(int)) => (term, int),
            (Err(e), _) | (_, Err(e)) => {
                error!(error = %e, "failed to install signal handlers; falling back to ctrl-c");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
    }
}
