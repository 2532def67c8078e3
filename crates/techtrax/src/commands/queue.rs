//! Queue command handlers.

use std::sync::Arc;

use tabled::Tabled;

use techtrax_api::models::{ItemType, QueueItem, QueueKey, QueueStats, WorkHours};
use techtrax_core::{QueueSyncEngine, QueueView, RequestGateway, SessionContext};

use crate::cli::{GlobalOpts, OutputFormat, QueueArgs, QueueCommand, QueueSelector};
use crate::error::CliError;
use crate::output;

use super::util;

// ── Rendering ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct ItemRow {
    #[tabled(rename = "#")]
    position: String,
    #[tabled(rename = "Patient")]
    patient: String,
    #[tabled(rename = "Type")]
    item_type: &'static str,
    #[tabled(rename = "Status")]
    status: &'static str,
    #[tabled(rename = "Checked in")]
    check_in: String,
    #[tabled(rename = "ID")]
    id: String,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn item_row(item: &&QueueItem) -> ItemRow {
    ItemRow {
        position: if item.is_waiting() {
            item.position.to_string()
        } else {
            "-".into()
        },
        patient: if item.manually_ordered {
            format!("{} *", item.patient_display_name())
        } else {
            item.patient_display_name()
        },
        item_type: item.item_type.as_str(),
        status: item.status.as_str(),
        check_in: item.check_in_time.clone().unwrap_or_default(),
        id: item.id.clone(),
    }
}

/// Waiting by position, then called, serving, done, then everything else.
fn display_order(view: &QueueView) -> Vec<&QueueItem> {
    let mut ordered: Vec<&QueueItem> = view.waiting();
    ordered.extend(view.called());
    ordered.extend(view.serving());
    ordered.extend(view.done());
    for item in view.items() {
        if !ordered.iter().any(|o| o.id == item.id) {
            ordered.push(item);
        }
    }
    ordered
}

/// Render a view in the chosen format. Table output gets a one-line header.
pub(crate) fn render_view(view: &QueueView, format: &OutputFormat, waiting_only: bool) -> String {
    let Some(snapshot) = view.snapshot.as_ref() else {
        return "No queue loaded".into();
    };
    let items = if waiting_only {
        view.waiting()
    } else {
        display_order(view)
    };

    let body = output::render_list(format, &items, item_row, |i| i.id.clone());
    if !matches!(format, OutputFormat::Table) {
        return body;
    }

    let mut header = format!(
        "Queue {} · {} · {} · {} waiting",
        snapshot.id,
        snapshot.date,
        snapshot.status.as_str(),
        view.waiting().len()
    );
    if view.optimistic {
        header.push_str(" · unconfirmed");
    }
    format!("{header}\n{body}")
}

#[derive(Tabled)]
struct StatRow {
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Value")]
    value: String,
}

fn stats_detail(stats: &QueueStats) -> String {
    let rows: Vec<StatRow> = stats
        .0
        .iter()
        .map(|(k, v)| StatRow {
            metric: k.clone(),
            value: v
                .as_str()
                .map_or_else(|| v.to_string(), str::to_owned),
        })
        .collect();
    output::render_table(&rows)
}

// ── Queue selection ─────────────────────────────────────────────────

/// Key for an explicit selector, filling gaps from the stored session.
fn selected_key(ctx: &SessionContext, selector: &QueueSelector) -> Result<Option<QueueKey>, CliError> {
    if let Some(ref date) = selector.date {
        util::validate_date(date)?;
    }
    let date = || selector.date.clone().unwrap_or_else(util::today);

    match (&selector.tenant, &selector.doctor) {
        (Some(tenant), Some(doctor)) => Ok(Some(QueueKey {
            tenant_id: tenant.clone(),
            doctor_id: doctor.clone(),
            date: date(),
        })),
        _ if selector.date.is_some() => own_key(ctx, date()).map(Some),
        _ => Ok(None),
    }
}

/// The signed-in doctor's key for `date`.
fn own_key(ctx: &SessionContext, date: String) -> Result<QueueKey, CliError> {
    let session = util::require_session(ctx)?;
    let tenant_id = session.tenant_id.ok_or_else(|| CliError::Validation {
        field: "tenant".into(),
        reason: "the session carries no tenant; pass --tenant".into(),
    })?;
    Ok(QueueKey {
        tenant_id,
        doctor_id: session.user_id,
        date,
    })
}

/// Load the selected queue (or the user's own) into `engine`.
pub(crate) async fn load(
    ctx: &SessionContext,
    engine: &QueueSyncEngine<RequestGateway>,
    selector: &QueueSelector,
) -> Result<Arc<QueueView>, CliError> {
    let view = match selected_key(ctx, selector)? {
        Some(key) => engine.load_queue(key).await?,
        None => engine.load_snapshot().await?,
    };
    Ok(view)
}

async fn load_existing(
    ctx: &SessionContext,
    engine: &QueueSyncEngine<RequestGateway>,
    selector: &QueueSelector,
) -> Result<Arc<QueueView>, CliError> {
    let view = load(ctx, engine, selector).await?;
    if view.is_loaded() {
        Ok(view)
    } else {
        Err(CliError::NoQueue)
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(
    ctx: &SessionContext,
    args: QueueArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let engine = ctx.queue_engine();
    let selector = &args.selector;

    let view = match args.command {
        QueueCommand::Show { waiting } => {
            let view = load_existing(ctx, &engine, selector).await?;
            let out = render_view(&view, &global.output, waiting);
            output::print_output(&out, global.quiet);
            return Ok(());
        }

        QueueCommand::Lookup => {
            if selector.tenant.is_none() {
                return Err(CliError::Validation {
                    field: "tenant".into(),
                    reason: "lookup needs --tenant and --doctor".into(),
                });
            }
            load_existing(ctx, &engine, selector).await?
        }

        QueueCommand::Stats => {
            load_existing(ctx, &engine, selector).await?;
            let stats = engine.refresh_stats().await?.ok_or(CliError::NoQueue)?;
            let out = output::render_single(&global.output, &stats, stats_detail, |s| {
                s.waiting_patients().unwrap_or_default().to_string()
            });
            output::print_output(&out, global.quiet);
            return Ok(());
        }

        QueueCommand::ClockIn => {
            let view = engine.clock_in().await?;
            if view.is_loaded() {
                view
            } else {
                load(ctx, &engine, selector).await?
            }
        }

        QueueCommand::ClockOut => {
            load_existing(ctx, &engine, selector).await?;
            engine.clock_out().await?
        }

        QueueCommand::Create { start, end } => {
            util::validate_clock(&start, "start")?;
            util::validate_clock(&end, "end")?;
            let key = match selected_key(ctx, selector)? {
                Some(key) => key,
                None => own_key(ctx, util::today())?,
            };
            engine
                .create_from_appointments(key, WorkHours { start, end })
                .await?
        }

        QueueCommand::CheckIn { patient, item_type } => {
            let item_type: ItemType = item_type.parse().map_err(|reason| CliError::Validation {
                field: "type".into(),
                reason,
            })?;
            load_existing(ctx, &engine, selector).await?;
            engine.check_in(&patient, item_type).await?
        }

        QueueCommand::Call { item } => {
            load_existing(ctx, &engine, selector).await?;
            engine.call(&item).await?
        }

        QueueCommand::Serve { item } => {
            load_existing(ctx, &engine, selector).await?;
            engine.serve(&item).await?
        }

        QueueCommand::Finish { item } => {
            load_existing(ctx, &engine, selector).await?;
            engine.finish(&item).await?
        }

        QueueCommand::Cancel { item, reason } => {
            let view = load_existing(ctx, &engine, selector).await?;
            let label = view
                .item(&item)
                .map_or_else(|| item.clone(), QueueItem::patient_display_name);
            if !util::confirm(&format!("Cancel {label}?"), "queue cancel", global.yes)? {
                return Ok(());
            }
            engine.cancel(&item, reason).await?
        }

        QueueCommand::Reorder { items } => {
            load_existing(ctx, &engine, selector).await?;
            engine.propose_reorder(items).await?
        }

        QueueCommand::Move { from, to } => {
            if from == 0 || to == 0 {
                return Err(CliError::Validation {
                    field: "position".into(),
                    reason: "positions start at 1".into(),
                });
            }
            load_existing(ctx, &engine, selector).await?;
            engine.move_waiting(from - 1, to - 1).await?
        }
    };

    let out = render_view(&view, &global.output, false);
    output::print_output(&out, global.quiet);
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use techtrax_api::models::QueueSnapshot;

    fn view() -> QueueView {
        let snapshot: QueueSnapshot = serde_json::from_value(serde_json::json!({
            "_id": "q1",
            "tenantId": "t1",
            "doctorId": "doc-1",
            "date": "2026-10-18",
            "status": "active",
            "queueItems": [
                { "_id": "i3", "patientName": "Cy", "type": "walkIn", "status": "done", "position": 0 },
                { "_id": "i2", "patientName": "Bo", "type": "vip", "status": "waiting", "position": 2 },
                { "_id": "i4", "patientName": "Di", "type": "late", "status": "cancelled", "position": 0 },
                { "_id": "i1", "patientName": "Al", "type": "walkIn", "status": "waiting", "position": 1 },
                { "_id": "i5", "patientName": "Ed", "type": "appointment", "status": "serving", "position": 0 }
            ]
        }))
        .unwrap();
        QueueView {
            snapshot: Some(snapshot),
            version: 1,
            optimistic: false,
        }
    }

    #[test]
    fn waiting_first_then_by_status() {
        let view = view();
        let ids: Vec<&str> = display_order(&view).iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, ["i1", "i2", "i5", "i3", "i4"]);
    }

    #[test]
    fn plain_output_lists_ids() {
        let out = render_view(&view(), &OutputFormat::Plain, true);
        assert_eq!(out, "i1\ni2");
    }

    #[test]
    fn table_header_counts_waiting() {
        let out = render_view(&view(), &OutputFormat::Table, false);
        assert!(out.starts_with("Queue q1 · 2026-10-18"), "{out}");
        assert!(out.contains("2 waiting"));
    }

    #[test]
    fn empty_view_says_so() {
        assert_eq!(
            render_view(&QueueView::default(), &OutputFormat::Json, false),
            "No queue loaded"
        );
    }
}
