//! Records exchanged with the persistent store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A job row, written before the job's link is executed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    /// Description of the link that produced the job.
    pub job_type: String,
    pub created_at: DateTime<Utc>,
    /// Package location in its persisted (`%sharedPath%`) form.
    pub directory: String,
    pub package_id: Uuid,
    /// `unitTransfer`, `unitSIP` or `unitDIP`.
    pub unit_type: String,
    pub current_step: String,
    pub microservice_group: String,
    pub link_id: Uuid,
}

/// A task row, written in bulk before a batch is dispatched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub file_id: Option<Uuid>,
    pub filename: String,
    pub exec: String,
    pub arguments: String,
    pub job_id: Uuid,
}

/// A package variable. Exactly one of `value` and `link_id` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitVar {
    pub name: String,
    pub value: Option<String>,
    pub link_id: Option<Uuid>,
}

/// What a package variable holds when it is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitVarValue {
    Value(String),
    LinkId(Uuid),
}

/// Mutable SIP fields refreshed before each job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SipRecord {
    pub id: Uuid,
    pub current_path: String,
    pub aip_filename: String,
    /// SIP, AIC, AIP-REIN or AIC-REIN.
    pub sip_type: String,
}

/// A file tracked by the store for a package.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: Uuid,
    pub current_location: String,
    pub original_location: String,
    pub file_grp_use: String,
}

/// A transfer created ahead of its contents being copied in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTransfer {
    pub id: Uuid,
    pub accession_id: String,
    pub access_system_id: String,
    pub metadata_set_id: Option<Uuid>,
}
