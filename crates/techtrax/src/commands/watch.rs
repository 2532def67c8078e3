//! Live queue follower.
//!
//! Opens the push channel, lets the sync engine mirror the queue, and
//! prints every published view. Activity, stats and connection changes
//! go to stderr so stdout stays machine-readable.

use std::io::IsTerminal;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::broadcast::error::RecvError;

use techtrax_api::models::QueueStats;
use techtrax_core::{EndReason, LogEntry, SessionContext};

use crate::cli::{GlobalOpts, WatchArgs};
use crate::error::CliError;
use crate::output;

use super::queue;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

fn spinner(global: &GlobalOpts) -> Option<ProgressBar> {
    if global.quiet || !std::io::stderr().is_terminal() {
        return None;
    }
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
        pb.set_style(style);
    }
    pb.set_message("Connecting to push channel");
    pb.enable_steady_tick(Duration::from_millis(100));
    Some(pb)
}

fn print_log(entry: &LogEntry, color: bool, quiet: bool) {
    if quiet {
        return;
    }
    let at = entry.time.with_timezone(&chrono::Local).format("%H:%M:%S");
    eprintln!(
        "{at} {} {}",
        output::level_label(entry.level, color),
        entry.message
    );
}

fn stats_line(stats: &QueueStats) -> String {
    let count = |v: Option<u64>| v.map_or_else(|| "?".into(), |n| n.to_string());
    let mut line = format!(
        "total {} · waiting {} · done {}",
        count(stats.total_patients()),
        count(stats.waiting_patients()),
        count(stats.completed_patients()),
    );
    if let Some(avg) = stats.average_wait_time() {
        line.push_str(&format!(" · avg wait {avg:.1} min"));
    }
    line
}

pub async fn handle(
    ctx: &SessionContext,
    args: WatchArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let color = output::should_color(&global.color);
    let engine = ctx.queue_engine();

    let selector = &args.selector;
    if selector.tenant.is_some() || selector.date.is_some() {
        queue::load(ctx, &engine, selector).await?;
    }

    let pb = spinner(global);
    let channel = ctx.open_channel().await?;
    let connected = channel.wait_connected(CONNECT_TIMEOUT).await;
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    let session = connected?;
    if !global.quiet {
        eprintln!("Connected as {} ({})", session.display_name, session.role);
    }

    let stats_interval = if args.no_stats {
        Duration::ZERO
    } else {
        ctx.config().stats_interval
    };
    let tasks = engine.run(&channel, stats_interval);

    let mut views = engine.view_changes();
    let mut logs = engine.logs();
    let mut stats = engine.stats_changes();
    let mut state = channel.state_changes();
    let mut ended = channel.ended();

    let deadline = args.duration.map(Duration::from_secs);
    let stop_after = async move {
        match deadline {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending().await,
        }
    };
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(stop_after, ctrl_c);

    let outcome = loop {
        tokio::select! {
            _ = &mut ctrl_c => break Ok(()),
            () = &mut stop_after => break Ok(()),

            changed = views.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let view = views.borrow_and_update().clone();
                let out = queue::render_view(&view, &global.output, false);
                output::print_output(&out, global.quiet);
            }

            entry = logs.recv() => match entry {
                Ok(entry) => print_log(&entry, color, global.quiet),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "activity log lagged");
                }
                Err(RecvError::Closed) => break Ok(()),
            },

            changed = stats.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let latest = stats.borrow_and_update().clone();
                if let Some(latest) = latest.filter(|_| !global.quiet) {
                    eprintln!("stats: {}", stats_line(&latest));
                }
            }

            changed = state.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let current = *state.borrow_and_update();
                tracing::info!(state = %current, "push channel state");
            }

            changed = ended.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let reason = ended.borrow_and_update().clone();
                match reason {
                    Some(EndReason::SessionInvalid { reason }) => {
                        break Err(CliError::SessionExpired {
                            profile: "default".into(),
                            reason,
                        });
                    }
                    Some(EndReason::Unreachable { reason }) => {
                        break Err(CliError::ChannelClosed { reason });
                    }
                    Some(EndReason::Closed) => break Ok(()),
                    None => {}
                }
            }
        }
    };

    tasks.shutdown().await;
    channel.close().await;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_line_marks_missing_counts() {
        let stats: QueueStats = serde_json::from_value(serde_json::json!({
            "totalPatients": 4,
            "averageWaitTime": 12.5
        }))
        .unwrap_or_default();
        assert_eq!(
            stats_line(&stats),
            "total 4 · waiting ? · done ? · avg wait 12.5 min"
        );
    }
}
