// Wire types for the queue backend.
//
// Field names follow the backend's camelCase JSON; Mongo-style `_id`
// fields are renamed to `id`. Unknown enum values deserialize to
// `Unknown` so a newer backend never breaks snapshot decoding.

use serde::{Deserialize, Serialize};

// ── Envelope ─────────────────────────────────────────────────────────

/// The `{status, data | message}` wrapper every REST response uses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Envelope {
    pub status: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub message: Option<String>,
}

impl Envelope {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }

    /// Server-supplied message, or a synthetic one naming the status.
    pub fn message_or_status(&self) -> String {
        self.message
            .clone()
            .unwrap_or_else(|| format!("request failed (status: {})", self.status))
    }
}

// ── Queue ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QueueStatus {
    Pending,
    Active,
    Closed,
    #[serde(other)]
    Unknown,
}

impl QueueStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Closed => "closed",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkHours {
    pub start: String,
    pub end: String,
}

impl Default for WorkHours {
    fn default() -> Self {
        Self {
            start: "09:00".into(),
            end: "17:00".into(),
        }
    }
}

/// Identifies one doctor's queue on one day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueKey {
    pub tenant_id: String,
    pub doctor_id: String,
    pub date: String,
}

/// The authoritative queue state as returned by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub doctor_id: String,
    #[serde(default)]
    pub date: String,
    #[serde(default = "default_queue_status")]
    pub status: QueueStatus,
    #[serde(default)]
    pub work_hours: Option<WorkHours>,
    #[serde(default, rename = "queueItems")]
    pub items: Vec<QueueItem>,
}

fn default_queue_status() -> QueueStatus {
    QueueStatus::Pending
}

impl QueueSnapshot {
    pub fn key(&self) -> QueueKey {
        QueueKey {
            tenant_id: self.tenant_id.clone(),
            doctor_id: self.doctor_id.clone(),
            date: self.date.clone(),
        }
    }
}

// ── Queue items ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ItemType {
    Vip,
    Emergency,
    Appointment,
    WalkIn,
    Late,
    #[serde(other)]
    Unknown,
}

impl ItemType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vip => "vip",
            Self::Emergency => "emergency",
            Self::Appointment => "appointment",
            Self::WalkIn => "walkIn",
            Self::Late => "late",
            Self::Unknown => "unknown",
        }
    }
}

impl std::str::FromStr for ItemType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vip" => Ok(Self::Vip),
            "emergency" => Ok(Self::Emergency),
            "appointment" => Ok(Self::Appointment),
            "walkIn" | "walk-in" | "walkin" => Ok(Self::WalkIn),
            "late" => Ok(Self::Late),
            other => Err(format!("unknown check-in type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ItemStatus {
    Waiting,
    Called,
    Serving,
    Done,
    Cancelled,
    NoShow,
    #[serde(other)]
    Unknown,
}

impl ItemStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Called => "called",
            Self::Serving => "serving",
            Self::Done => "done",
            Self::Cancelled => "cancelled",
            Self::NoShow => "noShow",
            Self::Unknown => "unknown",
        }
    }
}

/// Reference to the patient behind a queue item.
///
/// The backend sends either a bare id or the populated patient document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PatientRef {
    Id(String),
    Populated(PopulatedPatient),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PopulatedPatient {
    #[serde(rename = "_id", default)]
    pub id: Option<String>,
    #[serde(default)]
    pub user_id: Option<PatientUser>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientUser {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

impl PatientRef {
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Id(id) => Some(id),
            Self::Populated(p) => p.id.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default, rename = "patientId")]
    pub patient: Option<PatientRef>,
    #[serde(default)]
    pub patient_name: Option<String>,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    pub status: ItemStatus,
    /// 0 for items that left the line; the backend may also send `null`.
    #[serde(default, deserialize_with = "null_as_zero")]
    pub position: u32,
    #[serde(default)]
    pub check_in_time: Option<String>,
    #[serde(default)]
    pub called_time: Option<String>,
    #[serde(default)]
    pub done_time: Option<String>,
    #[serde(default)]
    pub locked_until: Option<String>,
    #[serde(default)]
    pub manually_ordered: bool,
}

fn null_as_zero<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<u32>::deserialize(deserializer).map(Option::unwrap_or_default)
}

impl QueueItem {
    /// Display name: stored name, then populated patient, then a placeholder.
    pub fn patient_display_name(&self) -> String {
        if let Some(ref name) = self.patient_name {
            return name.clone();
        }
        if let Some(PatientRef::Populated(PopulatedPatient {
            user_id: Some(user), ..
        })) = &self.patient
        {
            return format!("{} {}", user.first_name, user.last_name);
        }
        "Unknown Patient".into()
    }

    pub fn is_waiting(&self) -> bool {
        self.status == ItemStatus::Waiting
    }
}

// ── Commands ─────────────────────────────────────────────────────────

/// One entry of a manual reorder proposal (`order` is 1-based).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReorderEntry {
    pub id: String,
    pub order: u32,
}

// ── Stats ────────────────────────────────────────────────────────────

/// Queue statistics. The backend's schema is loose, so the raw object is
/// kept and the commonly reported counters are exposed as accessors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueStats(pub serde_json::Map<String, serde_json::Value>);

impl QueueStats {
    fn count(&self, key: &str) -> Option<u64> {
        self.0.get(key).and_then(serde_json::Value::as_u64)
    }

    pub fn total_patients(&self) -> Option<u64> {
        self.count("totalPatients")
    }

    pub fn waiting_patients(&self) -> Option<u64> {
        self.count("waitingPatients")
    }

    pub fn completed_patients(&self) -> Option<u64> {
        self.count("completedPatients")
    }

    pub fn average_wait_time(&self) -> Option<f64> {
        self.0
            .get("averageWaitTime")
            .and_then(serde_json::Value::as_f64)
    }
}

// ── Identity ─────────────────────────────────────────────────────────

/// The `user` object the push channel sends in its `connected` event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelUser {
    #[serde(default, alias = "_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Acknowledgment payload returned by channel commands.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AckResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}
