use std::{path::Path, sync::Arc, time::Duration};

use teloxide::prelude::*;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info};

use tgze_core::{
    dispatcher::UpdateDispatcher, domain::ChatId, formatting::escape_html, ports::ChatTransport,
};

use crate::TelegramTransport;

/// Poll forever: one `run_cycle` per interval, measured start to start.
///
/// Returns only on SIGTERM (after notifying the operator chat), which the
/// caller turns into a non-zero exit.
pub async fn run_polling(
    mut dispatcher: UpdateDispatcher,
    transport: Arc<TelegramTransport>,
) -> anyhow::Result<()> {
    match transport.bot().get_me().await {
        Ok(me) => info!("tgze started: @{}", me.username()),
        Err(e) => error!("getMe: {e}"),
    }

    let interval = dispatcher.settings().poll_interval();
    let operator = ChatId(dispatcher.settings().tg_operator_chat_id);
    info!(interval = ?interval, "polling");

    let poll = async {
        loop {
            let started = Instant::now();
            match dispatcher.run_cycle().await {
                Ok(report) if report.received > 0 => info!(
                    received = report.received,
                    processed = report.processed,
                    duplicates = report.duplicates,
                    "cycle done"
                ),
                Ok(_) => {}
                Err(e) => error!("cycle: {e}"),
            }
            let pause = remaining(interval, started.elapsed());
            debug!(pause = ?pause, "sleeping");
            sleep(pause).await;
        }
    };

    tokio::select! {
        () = poll => Ok(()),
        () = terminate() => {
            let text = format!("{}: sigterm", program_name());
            if let Err(e) = transport.send_html(operator, &escape_html(&text), None).await {
                error!("sigterm notice: {e}");
            }
            anyhow::bail!("terminated by sigterm")
        }
    }
}

fn remaining(interval: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed)
}

fn program_name() -> String {
    std::env::args()
        .next()
        .as_deref()
        .and_then(|a| Path::new(a).file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "tgze".to_string())
}

async fn terminate() {
    #[cfg(unix)]
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(mut signal) => {
            signal.recv().await;
            info!("Received SIGTERM signal");
        }
        Err(e) => {
            error!("Failed to install SIGTERM handler: {e}");
            std::future::pending::<()>().await;
        }
    }

    #[cfg(not(unix))]
    std::future::pending::<()>().await;
}
