//! Package, job and status types.
//!
//! A package is a Transfer, a SIP or a DIP moving through the workflow. The
//! enums in this module double as persistence tags: their string forms are
//! what the store records and what the worker pool sees in replacements.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// PackageType
// ---------------------------------------------------------------------------

/// The kind of package (also the `unit_type` of a watched directory).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PackageType {
    Transfer,
    #[serde(rename = "SIP")]
    Sip,
    #[serde(rename = "DIP")]
    Dip,
}

impl PackageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageType::Transfer => "Transfer",
            PackageType::Sip => "SIP",
            PackageType::Dip => "DIP",
        }
    }

    /// Tag relating a job record to its package kind, e.g. `unitTransfer`.
    pub fn job_unit_type(&self) -> &'static str {
        match self {
            PackageType::Transfer => "unitTransfer",
            PackageType::Sip => "unitSIP",
            PackageType::Dip => "unitDIP",
        }
    }

    /// Replacement key that refers to the package directory itself.
    pub fn replacement_path(&self) -> &'static str {
        match self {
            PackageType::Transfer => "%transferDirectory%",
            PackageType::Sip | PackageType::Dip => "%SIPDirectory%",
        }
    }
}

impl fmt::Display for PackageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PackageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Transfer" => Ok(PackageType::Transfer),
            "SIP" => Ok(PackageType::Sip),
            "DIP" => Ok(PackageType::Dip),
            other => Err(format!("unknown package type: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// PackageStatus
// ---------------------------------------------------------------------------

/// Processing status of a package as recorded in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageStatus {
    Unknown,
    Processing,
    Done,
    CompletedSuccessfully,
    Failed,
}

impl PackageStatus {
    pub fn as_i64(&self) -> i64 {
        match self {
            PackageStatus::Unknown => 0,
            PackageStatus::Processing => 1,
            PackageStatus::Done => 2,
            PackageStatus::CompletedSuccessfully => 3,
            PackageStatus::Failed => 4,
        }
    }

    pub fn from_i64(value: i64) -> Self {
        match value {
            1 => PackageStatus::Processing,
            2 => PackageStatus::Done,
            3 => PackageStatus::CompletedSuccessfully,
            4 => PackageStatus::Failed,
            _ => PackageStatus::Unknown,
        }
    }
}

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Status of a job record.
///
/// Serialized with the `STATUS_*` constants the store uses. Workflow
/// documents spell the same statuses in prose ("Completed successfully"),
/// which are accepted as aliases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    #[default]
    #[serde(rename = "STATUS_UNKNOWN", alias = "Unknown")]
    Unknown,
    #[serde(rename = "STATUS_AWAITING_DECISION", alias = "Awaiting decision")]
    AwaitingDecision,
    #[serde(rename = "STATUS_COMPLETED_SUCCESSFULLY", alias = "Completed successfully")]
    CompletedSuccessfully,
    #[serde(rename = "STATUS_EXECUTING_COMMANDS", alias = "Executing command(s)")]
    ExecutingCommands,
    #[serde(rename = "STATUS_FAILED", alias = "Failed")]
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Unknown => "STATUS_UNKNOWN",
            JobStatus::AwaitingDecision => "STATUS_AWAITING_DECISION",
            JobStatus::CompletedSuccessfully => "STATUS_COMPLETED_SUCCESSFULLY",
            JobStatus::ExecutingCommands => "STATUS_EXECUTING_COMMANDS",
            JobStatus::Failed => "STATUS_FAILED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| format!("unknown job status: '{s}'"))
    }
}

// ---------------------------------------------------------------------------
// Package creation request
// ---------------------------------------------------------------------------

/// Request to create a new transfer from one or more source paths.
///
/// Paths may carry a `<location-id>:` prefix naming the transfer source they
/// belong to; only the path part is used locally.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreatePackageRequest {
    /// Name of the transfer.
    pub name: String,
    /// Source paths to copy into the transfer.
    pub path: Vec<String>,
    /// Transfer type name, e.g. "standard" or "zipfile". Defaults to standard.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_type: Option<String>,
    /// Skip the approval decision and start at the type's bypass link.
    #[serde(default)]
    pub auto_approve: bool,
    /// Name of the processing configuration to apply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_config: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accession: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_system_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_set_id: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_type_serde_names() {
        let json = serde_json::to_string(&PackageType::Sip).unwrap();
        assert_eq!(json, "\"SIP\"");
        let parsed: PackageType = serde_json::from_str("\"Transfer\"").unwrap();
        assert_eq!(parsed, PackageType::Transfer);
    }

    #[test]
    fn test_package_type_tags() {
        assert_eq!(PackageType::Dip.job_unit_type(), "unitDIP");
        assert_eq!(PackageType::Transfer.replacement_path(), "%transferDirectory%");
        assert_eq!(PackageType::Dip.replacement_path(), "%SIPDirectory%");
        assert_eq!("SIP".parse::<PackageType>().unwrap(), PackageType::Sip);
        assert!("AIP".parse::<PackageType>().is_err());
    }

    #[test]
    fn test_package_status_roundtrip_codes() {
        for status in [
            PackageStatus::Processing,
            PackageStatus::Done,
            PackageStatus::Failed,
        ] {
            assert_eq!(PackageStatus::from_i64(status.as_i64()), status);
        }
        assert_eq!(PackageStatus::from_i64(99), PackageStatus::Unknown);
    }

    #[test]
    fn test_job_status_accepts_workflow_aliases() {
        let status: JobStatus = serde_json::from_str("\"Completed successfully\"").unwrap();
        assert_eq!(status, JobStatus::CompletedSuccessfully);
        let status: JobStatus = "STATUS_FAILED".parse().unwrap();
        assert_eq!(status, JobStatus::Failed);
        assert_eq!(JobStatus::AwaitingDecision.to_string(), "STATUS_AWAITING_DECISION");
    }

    #[test]
    fn test_create_request_defaults() {
        let req: CreatePackageRequest =
            serde_json::from_str(r#"{"name":"foo","path":["/tmp/foo"]}"#).unwrap();
        assert!(!req.auto_approve);
        assert!(req.transfer_type.is_none());
        assert_eq!(req.path, vec!["/tmp/foo".to_string()]);
    }
}
