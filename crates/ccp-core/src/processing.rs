//! Processing configuration: preconfigured answers to decision points.
//!
//! Read from `processingMCP.xml` at the root of a package:
//!
//! ```xml
//! <processingMCP>
//!   <preconfiguredChoices>
//!     <preconfiguredChoice>
//!       <appliesTo>5e58066d-e113-4383-b20b-f301ed4d751c</appliesTo>
//!       <goToChain>8d29eb3d-a8a8-4347-806e-3d8227ed44a1</goToChain>
//!     </preconfiguredChoice>
//!   </preconfiguredChoices>
//! </processingMCP>
//! ```
//!
//! Two built-in configurations ship with the controller and are installed
//! into the shared directory at startup. When a package's own configuration
//! has no answer for a decision point, the built-in automated set is used.

use std::fmt::Write as _;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

pub const PROCESSING_CONFIG_FILE: &str = "processingMCP.xml";

/// Where the built-in configurations live, relative to the shared directory.
pub const BUILTIN_CONFIGS_DIR: &str = "sharedMicroServiceTasksConfigs/processingMCPConfigs";
pub const DEFAULT_CONFIG_FILE: &str = "defaultProcessingMCP.xml";
pub const AUTOMATED_CONFIG_FILE: &str = "automatedProcessingMCP.xml";

/// `(description, appliesTo, goToChain)`.
type Builtin = (&'static str, &'static str, &'static str);

const DEFAULT_CHOICES: &[Builtin] = &[
    ("Generate transfer structure report", "56eebd45-5600-4768-a8c2-ec0114555a3d", "df54fec1-dae1-4ea6-8d17-a839ee7ac4a7"),
    ("Extract packages", "dec97e3c-5598-4b99-b26e-f87a435a6b7f", "01d80b27-4ad1-4bd1-8f8d-f819f18bf685"),
    ("Delete packages after extraction", "f19926dd-8fb5-4c79-8ade-c83f61f55b40", "85b1e45d-8f98-4cae-8336-72f40e12cbef"),
    ("Perform policy checks on originals", "70fc7040-d4fb-4d19-a0e6-792387ca1006", "3e891cc4-39d2-4989-a001-5107a009a223"),
    ("Examine contents", "accea2bf-ba74-4a3a-bb97-614775c74459", "e0a39199-c62a-4a2f-98de-e9d1116460a8"),
    ("Create SIP(s)", "bb194013-597c-4e4a-8493-b36d190f8717", "61cfa825-120e-4b17-83e6-51a42b67d969"),
    ("Normalize", "cb8e5706-e73f-472f-ad9b-d1236af8095f", "612e3609-ce9a-4df6-a9a3-63d634d2d934"),
    ("Approve normalization", "de909a42-c5b5-46e1-9985-c031b50e9d30", "1e0df175-d56d-450d-8bee-7df1dc7ae815"),
    ("Perform policy checks on preservation derivatives", "153c5f41-3cfb-47ba-9150-2dd44ebc27df", "b7ce05f0-9d94-4b3e-86cc-d4b2c6dba546"),
    ("Perform policy checks on access derivatives", "8ce07e94-6130-4987-96f0-2399ad45c5c2", "d9760427-b488-4381-832a-de10106de6fe"),
    ("Bind PIDs", "a2ba5278-459a-4638-92d9-38eb1588717d", "44a7c397-8187-4fd2-b8f7-c61737c4df49"),
    ("Document empty directories", "d0dfa5fc-e3c2-4638-9eda-f96eea1070e0", "29881c21-3548-454a-9637-ebc5fd46aee0"),
    ("Reminder: add metadata if desired", "eeb23509-57e2-4529-8857-9d62525db048", "5727faac-88af-40e8-8c10-268644b0142d"),
    ("Transcribe files (OCR)", "82ee9ad2-2c74-4c7c-853e-e4eaf68fc8b6", "0a24787c-00e3-4710-b324-90e792bfb484"),
    ("Upload DIP", "92879a29-45bf-4f0b-ac43-e64474f0f2f9", "6eb8ebe7-fab3-4e4c-b9d7-14de17625baa"),
    ("Store DIP location", "b7a83da6-ed5a-47f7-a643-1e9f9f46e364", "/api/v2/location/default/DS/"),
    ("Store DIP", "5e58066d-e113-4383-b20b-f301ed4d751c", "8d29eb3d-a8a8-4347-806e-3d8227ed44a1"),
];

/// Answered on top of [`DEFAULT_CHOICES`] so that nothing waits for a user.
const AUTOMATED_CHOICES: &[Builtin] = &[
    ("Approve standard transfer", "0c94e6b5-4714-4bec-82c8-e187e0c04d77", "b4567e89-9fea-4256-99f5-a88987026488"),
    ("Assign UUIDs to directories", "bd899573-694e-4d33-8c9b-df0af802437d", "891f60d0-1ba8-48d3-b39e-dd0934635d29"),
    ("Select compression algorithm", "01d64f58-8295-4b7b-9cab-8f1b153a504f", "9475447c-9889-430c-9477-6287a9574c5b"),
    ("Select compression level", "01c651cb-c174-4ba4-b985-1d87a44d6754", "414da421-b83f-4648-895f-a34840e3c3f5"),
    ("Store AIP", "2d32235c-02d4-4686-88a6-96f4d6c7b1c3", "9efab23c-31dc-4cbd-a39d-bb1665460cbe"),
    ("Store AIP location", "b320ce81-9982-408a-9502-097d0daa48fa", "/api/v2/location/default/AS/"),
];

#[derive(Debug, Error)]
pub enum ProcessingConfigError {
    #[error("read processing configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse processing configuration: {0}")]
    Parse(String),
}

/// One `<preconfiguredChoice>` element.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PreconfiguredChoice {
    #[serde(rename = "appliesTo")]
    pub applies_to: String,
    /// A chain id, a replacement id, or a location URI.
    #[serde(rename = "goToChain")]
    pub go_to_chain: String,
    /// Written as an XML comment ahead of the element.
    #[serde(skip)]
    pub description: String,
}

impl PreconfiguredChoice {
    pub fn link_id(&self) -> Option<Uuid> {
        Uuid::parse_str(self.applies_to.trim()).ok()
    }

    pub fn chain_id(&self) -> Option<Uuid> {
        Uuid::parse_str(self.go_to_chain.trim()).ok()
    }

    pub fn value(&self) -> &str {
        self.go_to_chain.trim()
    }
}

#[derive(Debug, Deserialize)]
struct Document {
    #[serde(rename = "preconfiguredChoices", default)]
    choices: ChoiceList,
}

#[derive(Debug, Default, Deserialize)]
struct ChoiceList {
    #[serde(rename = "preconfiguredChoice", default)]
    items: Vec<PreconfiguredChoice>,
}

#[derive(Debug, Clone, Default)]
pub struct ProcessingConfig {
    choices: Vec<PreconfiguredChoice>,
}

impl ProcessingConfig {
    pub fn parse(xml: &str) -> Result<Self, ProcessingConfigError> {
        let doc: Document =
            quick_xml::de::from_str(xml).map_err(|e| ProcessingConfigError::Parse(e.to_string()))?;
        Ok(Self {
            choices: doc.choices.items,
        })
    }

    /// Load the configuration of the package rooted at `package_path`. A
    /// missing file yields an empty configuration.
    pub async fn load(package_path: &Path) -> Result<Self, ProcessingConfigError> {
        match tokio::fs::read_to_string(package_path.join(PROCESSING_CONFIG_FILE)).await {
            Ok(xml) => Self::parse(&xml),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn choices(&self) -> &[PreconfiguredChoice] {
        &self.choices
    }

    /// First choice that applies to `link_id`.
    pub fn choice_for(&self, link_id: Uuid) -> Option<&PreconfiguredChoice> {
        self.choices.iter().find(|c| c.link_id() == Some(link_id))
    }

    /// Built-in configuration that keeps the interactive decision points.
    pub fn builtin_default() -> Self {
        Self::from_builtins(DEFAULT_CHOICES.iter())
    }

    /// Built-in configuration that answers every decision point it knows.
    pub fn builtin_automated() -> Self {
        Self::from_builtins(DEFAULT_CHOICES.iter().chain(AUTOMATED_CHOICES))
    }

    fn from_builtins<'a>(items: impl Iterator<Item = &'a Builtin>) -> Self {
        let choices = items
            .map(|&(description, applies_to, go_to_chain)| PreconfiguredChoice {
                applies_to: applies_to.to_string(),
                go_to_chain: go_to_chain.to_string(),
                description: description.to_string(),
            })
            .collect();
        Self { choices }
    }

    /// Render as a `processingMCP.xml` document.
    pub fn to_xml(&self) -> String {
        let mut xml = String::from("<processingMCP>\n  <preconfiguredChoices>\n");
        for choice in &self.choices {
            if !choice.description.is_empty() {
                let _ = writeln!(xml, "    <!-- {} -->", choice.description);
            }
            let _ = write!(
                xml,
                "    <preconfiguredChoice>\n      <appliesTo>{}</appliesTo>\n      <goToChain>{}</goToChain>\n    </preconfiguredChoice>\n",
                quick_xml::escape::escape(choice.applies_to.as_str()),
                quick_xml::escape::escape(choice.go_to_chain.as_str()),
            );
        }
        xml.push_str("  </preconfiguredChoices>\n</processingMCP>\n");
        xml
    }
}

/// Write the built-in default and automated configurations into `dir`,
/// replacing earlier copies.
pub async fn install_builtin_configs(dir: &Path) -> Result<(), ProcessingConfigError> {
    tokio::fs::create_dir_all(dir).await?;
    for (name, config) in [
        (DEFAULT_CONFIG_FILE, ProcessingConfig::builtin_default()),
        (AUTOMATED_CONFIG_FILE, ProcessingConfig::builtin_automated()),
    ] {
        tokio::fs::write(dir.join(name), config.to_xml()).await?;
        tracing::debug!(path = %dir.join(name).display(), choices = config.choices().len(), "installed processing configuration");
    }
    Ok(())
}
