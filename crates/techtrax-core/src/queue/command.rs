// ── Queue commands ──
//
// Every state-changing queue call, with the endpoint and JSON body it maps
// to. Commands on an existing queue carry its key `{tenantId, doctorId,
// date}`.

use serde_json::{Value, json};
use techtrax_api::models::{ItemType, QueueKey, ReorderEntry, WorkHours};

#[derive(Debug, Clone, PartialEq)]
pub enum QueueCommand {
    /// Doctor starts the day; the backend builds the queue from today's
    /// appointments.
    ClockIn,
    ClockOut {
        key: QueueKey,
    },
    CreateFromAppointments {
        key: QueueKey,
        work_hours: WorkHours,
    },
    CheckIn {
        key: QueueKey,
        patient_id: String,
        item_type: ItemType,
    },
    Call {
        key: QueueKey,
        item_id: String,
    },
    Serve {
        key: QueueKey,
        item_id: String,
    },
    Finish {
        key: QueueKey,
        item_id: String,
    },
    Cancel {
        key: QueueKey,
        item_id: String,
        reason: Option<String>,
    },
    Reorder {
        key: QueueKey,
        new_order: Vec<ReorderEntry>,
    },
}

impl QueueCommand {
    pub fn endpoint(&self) -> &'static str {
        match self {
            Self::ClockIn => "/queue/clock-in",
            Self::ClockOut { .. } => "/queue/clock-out",
            Self::CreateFromAppointments { .. } => "/queue/from-appointments",
            Self::CheckIn { .. } => "/queue/check-in",
            Self::Call { .. } => "/queue/call",
            Self::Serve { .. } => "/queue/serve",
            Self::Finish { .. } => "/queue/finish",
            Self::Cancel { .. } => "/queue/cancel",
            Self::Reorder { .. } => "/queue/reorder",
        }
    }

    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::ClockIn => "clock in",
            Self::ClockOut { .. } => "clock out",
            Self::CreateFromAppointments { .. } => "create queue",
            Self::CheckIn { .. } => "check in",
            Self::Call { .. } => "call",
            Self::Serve { .. } => "serve",
            Self::Finish { .. } => "finish",
            Self::Cancel { .. } => "cancel",
            Self::Reorder { .. } => "reorder",
        }
    }

    pub fn body(&self) -> Value {
        match self {
            Self::ClockIn => json!({}),
            Self::ClockOut { key } => key_body(key),
            Self::CreateFromAppointments { key, work_hours } => {
                let mut body = key_body(key);
                body["workHours"] = json!(work_hours);
                body
            }
            Self::CheckIn {
                key,
                patient_id,
                item_type,
            } => {
                let mut body = key_body(key);
                body["patientId"] = json!(patient_id);
                body["type"] = json!(item_type);
                body
            }
            Self::Call { key, item_id }
            | Self::Serve { key, item_id }
            | Self::Finish { key, item_id } => {
                let mut body = key_body(key);
                body["queueItemId"] = json!(item_id);
                body
            }
            Self::Cancel {
                key,
                item_id,
                reason,
            } => {
                let mut body = key_body(key);
                body["queueItemId"] = json!(item_id);
                body["reason"] = json!(reason);
                body
            }
            Self::Reorder { key, new_order } => {
                let mut body = key_body(key);
                body["newOrder"] = json!(new_order);
                body
            }
        }
    }
}

fn key_body(key: &QueueKey) -> Value {
    json!({
        "tenantId": key.tenant_id,
        "doctorId": key.doctor_id,
        "date": key.date,
    })
}
