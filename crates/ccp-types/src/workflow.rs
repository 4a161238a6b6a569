//! Workflow document types.
//!
//! A workflow document is an immutable graph of chains and links. Chains
//! name a start link; links carry a typed configuration (selected by the
//! `@model` tag), an exit-code table, and a fallback. The document also
//! lists the watched directories that feed packages into the graph.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::WorkflowError;
use crate::package::{JobStatus, PackageType};

// ---------------------------------------------------------------------------
// I18nField
// ---------------------------------------------------------------------------

/// A translatable label keyed by language code.
///
/// Accepts either a plain string or a `{"en": "...", ...}` object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "I18nRepr")]
pub struct I18nField(pub BTreeMap<String, String>);

#[derive(Deserialize)]
#[serde(untagged)]
enum I18nRepr {
    Text(String),
    Map(BTreeMap<String, String>),
}

impl From<I18nRepr> for I18nField {
    fn from(repr: I18nRepr) -> Self {
        match repr {
            I18nRepr::Text(text) => I18nField(BTreeMap::from([("en".to_string(), text)])),
            I18nRepr::Map(map) => I18nField(map),
        }
    }
}

impl I18nField {
    pub fn new(text: impl Into<String>) -> Self {
        I18nField(BTreeMap::from([("en".to_string(), text.into())]))
    }

    /// English text, or the first translation available.
    pub fn text(&self) -> &str {
        self.0
            .get("en")
            .or_else(|| self.0.values().next())
            .map(String::as_str)
            .unwrap_or_default()
    }
}

impl fmt::Display for I18nField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.text())
    }
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub chains: HashMap<Uuid, Chain>,
    #[serde(default)]
    pub links: HashMap<Uuid, Link>,
    #[serde(default)]
    pub watched_directories: Vec<WatchedDirectory>,
}

impl Document {
    /// Decode and validate a JSON workflow document.
    pub fn from_json(blob: &[u8]) -> Result<Self, WorkflowError> {
        let mut doc: Document =
            serde_json::from_slice(blob).map_err(|e| WorkflowError::Parse(e.to_string()))?;
        doc.assign_ids();
        doc.validate()?;
        Ok(doc)
    }

    /// Copy map keys into the `id` field of every chain and link.
    pub fn assign_ids(&mut self) {
        for (id, chain) in self.chains.iter_mut() {
            chain.id = *id;
        }
        for (id, link) in self.links.iter_mut() {
            link.id = *id;
        }
    }

    /// Check that every reference in the graph resolves.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        for chain in self.chains.values() {
            if !self.links.contains_key(&chain.link_id) {
                return Err(WorkflowError::UnknownStartLink {
                    chain: chain.id,
                    link: chain.link_id,
                });
            }
        }

        for link in self.links.values() {
            let targets = link
                .exit_codes
                .values()
                .filter_map(|ec| ec.link_id)
                .chain(link.fallback_link_id);
            for target in targets {
                if !self.links.contains_key(&target) {
                    return Err(WorkflowError::UnknownLink {
                        from: link.id,
                        to: target,
                    });
                }
            }
        }

        for wd in &self.watched_directories {
            if !self.chains.contains_key(&wd.chain_id) {
                return Err(WorkflowError::UnknownWatchedChain {
                    path: wd.path.clone(),
                    chain: wd.chain_id,
                });
            }
        }

        Ok(())
    }

    pub fn chain(&self, id: &Uuid) -> Option<&Chain> {
        self.chains.get(id)
    }

    pub fn link(&self, id: &Uuid) -> Option<&Link> {
        self.links.get(id)
    }

    /// Find the watched directory whose path matches `path`, ignoring
    /// leading and trailing slashes on both sides.
    pub fn watched_directory(&self, path: &str) -> Option<&WatchedDirectory> {
        let wanted = path.trim_matches('/');
        self.watched_directories
            .iter()
            .find(|wd| wd.path.trim_matches('/') == wanted)
    }

    /// Whether `chain` may be offered as a choice at `link`.
    pub fn choice_available(&self, _link: &Link, chain: &Chain) -> bool {
        chain.available
    }
}

// ---------------------------------------------------------------------------
// Chain
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chain {
    #[serde(default)]
    pub id: Uuid,
    #[serde(default)]
    pub description: I18nField,
    pub link_id: Uuid,
    #[serde(default = "default_available")]
    pub available: bool,
}

fn default_available() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Link
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    #[serde(default)]
    pub id: Uuid,
    #[serde(default)]
    pub description: I18nField,
    #[serde(default)]
    pub group: I18nField,
    pub config: LinkConfig,
    #[serde(default)]
    pub exit_codes: HashMap<i32, ExitCode>,
    #[serde(default)]
    pub fallback_link_id: Option<Uuid>,
    #[serde(default)]
    pub fallback_job_status: JobStatus,
    #[serde(default)]
    pub end: bool,
}

impl Link {
    /// Manager-kind string that selects the job type for this link.
    pub fn manager(&self) -> &str {
        self.config.manager()
    }

    /// Link mapped to `code`, or the fallback link when the table has no
    /// link for it.
    pub fn exit_code_link_id(&self, code: i32) -> Option<Uuid> {
        match self.exit_codes.get(&code).and_then(|ec| ec.link_id) {
            Some(id) => Some(id),
            None => self.fallback_link_id,
        }
    }

    /// Next link after a batch of tasks whose highest exit code is `code`.
    ///
    /// A code present in the table decides on its own, so a mapped code
    /// without a link ends the chain. Unmapped codes take the fallback.
    pub fn next_link_for_exit_code(&self, code: i32) -> Option<Uuid> {
        match self.exit_codes.get(&code) {
            Some(ec) => ec.link_id,
            None => self.fallback_link_id,
        }
    }

    /// Job status recorded for exit `code`.
    pub fn job_status_for(&self, code: i32) -> JobStatus {
        self.exit_codes
            .get(&code)
            .map(|ec| ec.job_status)
            .unwrap_or(self.fallback_job_status)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitCode {
    #[serde(default)]
    pub job_status: JobStatus,
    #[serde(default)]
    pub link_id: Option<Uuid>,
}

// ---------------------------------------------------------------------------
// Link configuration
// ---------------------------------------------------------------------------

/// Typed per-link configuration, tagged by `@model`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "@model")]
pub enum LinkConfig {
    #[serde(rename = "StandardTaskConfig")]
    StandardTask(StandardTaskConfig),
    #[serde(rename = "MicroServiceChainChoice")]
    ChainChoice(ChainChoiceConfig),
    #[serde(rename = "MicroServiceChoiceReplacementDic")]
    ReplacementDict(ReplacementDictConfig),
    #[serde(rename = "TaskConfigSetUnitVariable")]
    SetUnitVariable(SetUnitVariableConfig),
    #[serde(rename = "TaskConfigUnitVariableLinkPull")]
    UnitVariableLinkPull(UnitVariableLinkPullConfig),
}

impl LinkConfig {
    pub fn manager(&self) -> &str {
        match self {
            LinkConfig::StandardTask(c) => &c.manager,
            LinkConfig::ChainChoice(c) => &c.manager,
            LinkConfig::ReplacementDict(c) => &c.manager,
            LinkConfig::SetUnitVariable(c) => &c.manager,
            LinkConfig::UnitVariableLinkPull(c) => &c.manager,
        }
    }

    /// Model name as written in the document.
    pub fn model(&self) -> &'static str {
        match self {
            LinkConfig::StandardTask(_) => "StandardTaskConfig",
            LinkConfig::ChainChoice(_) => "MicroServiceChainChoice",
            LinkConfig::ReplacementDict(_) => "MicroServiceChoiceReplacementDic",
            LinkConfig::SetUnitVariable(_) => "TaskConfigSetUnitVariable",
            LinkConfig::UnitVariableLinkPull(_) => "TaskConfigUnitVariableLinkPull",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StandardTaskConfig {
    #[serde(rename = "@manager")]
    pub manager: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub execute: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub arguments: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub filter_file_end: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub filter_subdir: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub stdout_file: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub stderr_file: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChainChoiceConfig {
    #[serde(rename = "@manager")]
    pub manager: String,
    #[serde(default)]
    pub chain_choices: Vec<Uuid>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplacementDictConfig {
    #[serde(rename = "@manager")]
    pub manager: String,
    #[serde(default)]
    pub replacements: Vec<Replacement>,
}

/// One selectable dictionary in a replacement decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Replacement {
    pub id: Uuid,
    #[serde(default)]
    pub description: I18nField,
    #[serde(default)]
    pub items: IndexMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetUnitVariableConfig {
    #[serde(rename = "@manager")]
    pub manager: String,
    pub variable: String,
    /// Link persisted under `variable`.
    #[serde(rename = "chain_id")]
    pub link_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitVariableLinkPullConfig {
    #[serde(rename = "@manager")]
    pub manager: String,
    pub variable: String,
    /// Link used when the variable was never set.
    #[serde(rename = "chain_id", default)]
    pub link_id: Option<Uuid>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

// ---------------------------------------------------------------------------
// WatchedDirectory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchedDirectory {
    pub path: String,
    pub chain_id: Uuid,
    #[serde(default)]
    pub only_dirs: bool,
    pub unit_type: PackageType,
}
