//! Serializable view of a pending decision.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::package::PackageType;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChoiceSummary {
    /// Position of the choice, used to resolve it.
    pub id: usize,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionSummary {
    pub id: Uuid,
    pub name: String,
    pub choices: Vec<ChoiceSummary>,
    pub package_id: Uuid,
    pub package_path: String,
    pub package_type: PackageType,
    pub job_id: Uuid,
}

impl fmt::Display for DecisionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (package {}, {})", self.name, self.package_id, self.package_type)?;
        for choice in &self.choices {
            write!(f, " [{}] {}", choice.id, choice.label)?;
        }
        Ok(())
    }
}
