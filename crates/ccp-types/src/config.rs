//! Server configuration types.
//!
//! `ServerConfig` mirrors `ccp.toml`. Every field has a default so an empty
//! file (or none at all) yields a working configuration.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Top-level configuration for the `ccp` server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Root of the shared directory, substituted for `%sharedPath%`.
    #[serde(default = "default_shared_dir")]
    pub shared_dir: PathBuf,

    /// Root of the watched directories. Defaults to
    /// `<shared_dir>/watchedDirectories`.
    #[serde(default)]
    pub watched_dir: Option<PathBuf>,

    /// Workflow document (JSON).
    #[serde(default)]
    pub workflow: Option<PathBuf>,

    /// SQLite URL. Defaults to a database under the data directory.
    #[serde(default)]
    pub database_url: Option<String>,

    /// Listen address of the admin HTTP API.
    #[serde(default = "default_admin_addr")]
    pub admin_addr: String,

    /// Packages processed at the same time.
    #[serde(default = "default_max_concurrent_packages")]
    pub max_concurrent_packages: usize,

    /// Ceiling on package execution units in flight.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Interval between scheduling passes, in milliseconds.
    #[serde(default = "default_pick_interval_ms")]
    pub pick_interval_ms: u64,

    /// Tasks per worker-pool request.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Directory holding the client scripts run by the local worker pool.
    #[serde(default = "default_scripts_dir")]
    pub scripts_dir: PathBuf,

    #[serde(default)]
    pub decision_aliases: DecisionAliases,
}

fn default_shared_dir() -> PathBuf {
    PathBuf::from("/var/archivematica/sharedDirectory/")
}

fn default_admin_addr() -> String {
    "127.0.0.1:8010".to_string()
}

fn default_max_concurrent_packages() -> usize {
    2
}

fn default_max_in_flight() -> usize {
    10
}

fn default_pick_interval_ms() -> u64 {
    250
}

fn default_batch_size() -> usize {
    128
}

fn default_scripts_dir() -> PathBuf {
    PathBuf::from("/usr/lib/archivematica/MCPClient/clientScripts")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            shared_dir: default_shared_dir(),
            watched_dir: None,
            workflow: None,
            database_url: None,
            admin_addr: default_admin_addr(),
            max_concurrent_packages: default_max_concurrent_packages(),
            max_in_flight: default_max_in_flight(),
            pick_interval_ms: default_pick_interval_ms(),
            batch_size: default_batch_size(),
            scripts_dir: default_scripts_dir(),
            decision_aliases: DecisionAliases::default(),
        }
    }
}

impl ServerConfig {
    pub fn watched_dir(&self) -> PathBuf {
        self.watched_dir
            .clone()
            .unwrap_or_else(|| self.shared_dir.join("watchedDirectories"))
    }
}

// ---------------------------------------------------------------------------
// DecisionAliases
// ---------------------------------------------------------------------------

/// Maps decision points that ask the same question onto one canonical link,
/// so a single preconfigured answer covers all of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DecisionAliases(pub HashMap<Uuid, Uuid>);

impl DecisionAliases {
    pub fn empty() -> Self {
        DecisionAliases(HashMap::new())
    }

    /// Canonical id for `id`, or `id` itself when it has no alias.
    pub fn canonical(&self, id: Uuid) -> Uuid {
        self.0.get(&id).copied().unwrap_or(id)
    }
}

/// "Assign UUIDs to directories?" is asked at three points per workflow
/// branch; each group collapses onto the link the processing configuration
/// answers.
const DEFAULT_ALIASES: &[(u128, u128)] = &[
    (0x8882bad4_561c_4126_89c9_f7f0c083d5d7, 0xbd899573_694e_4d33_8c9b_df0af802437d),
    (0xe10a31c3_56df_4986_af7e_2794ddfe8686, 0xbd899573_694e_4d33_8c9b_df0af802437d),
    (0xd6f6f5db_4cc2_4652_9283_9ec6a6d181e5, 0xbd899573_694e_4d33_8c9b_df0af802437d),
    (0x1563f22f_f5f7_4dfe_a926_6ab50d408832, 0xbd899573_694e_4d33_8c9b_df0af802437d),
    (0x7e4cf404_e62d_4dc2_8d81_6141e390f66f, 0x2dc3f487_e4b0_4e07_a4b3_6216ed24ca14),
    (0x2732a043_b197_4cbc_81ab_4e2bee9b74d3, 0x2dc3f487_e4b0_4e07_a4b3_6216ed24ca14),
    (0xaa793efa_1b62_498c_8f92_cab187a99a2a, 0x2dc3f487_e4b0_4e07_a4b3_6216ed24ca14),
    (0xefd98ddb_80a6_4206_80bf_81bf00f84416, 0x2dc3f487_e4b0_4e07_a4b3_6216ed24ca14),
    (0x0053c670_3e61_4a3e_a188_3a2dd1eda426, 0x891f60d0_1ba8_48d3_b39e_dd0934635d29),
    (0x8e93e523_86bb_47e1_a03a_4b33e13f8c5e, 0x891f60d0_1ba8_48d3_b39e_dd0934635d29),
    (0x6dfbeff8_c6b1_435b_833a_ed764229d413, 0x891f60d0_1ba8_48d3_b39e_dd0934635d29),
    (0xdc0ee6b6_ed5f_42a3_bc8f_c9c7ead03ed1, 0x891f60d0_1ba8_48d3_b39e_dd0934635d29),
];

impl Default for DecisionAliases {
    fn default() -> Self {
        DecisionAliases(
            DEFAULT_ALIASES
                .iter()
                .map(|(alias, canonical)| (Uuid::from_u128(*alias), Uuid::from_u128(*canonical)))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default_values() {
        let config = ServerConfig::default();
        assert_eq!(config.max_concurrent_packages, 2);
        assert_eq!(config.max_in_flight, 10);
        assert_eq!(config.pick_interval_ms, 250);
        assert_eq!(config.batch_size, 128);
        assert_eq!(
            config.watched_dir(),
            PathBuf::from("/var/archivematica/sharedDirectory/watchedDirectories")
        );
        assert_eq!(config.decision_aliases.0.len(), 12);
    }

    #[test]
    fn test_server_config_deserialize_with_defaults() {
        let config: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(config.batch_size, 128);
        assert!(config.workflow.is_none());
    }

    #[test]
    fn test_server_config_deserialize_with_values() {
        let toml_str = r#"
shared_dir = "/srv/shared/"
watched_dir = "/srv/watched"
batch_size = 16

[decision_aliases]
"00000000-0000-0000-0000-000000000001" = "00000000-0000-0000-0000-000000000002"
"#;
        let config: ServerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.shared_dir, PathBuf::from("/srv/shared/"));
        assert_eq!(config.watched_dir(), PathBuf::from("/srv/watched"));
        assert_eq!(config.batch_size, 16);
        assert_eq!(config.decision_aliases.0.len(), 1);
        assert_eq!(
            config.decision_aliases.canonical(Uuid::from_u128(1)),
            Uuid::from_u128(2)
        );
    }

    #[test]
    fn test_default_aliases_collapse_onto_canonical() {
        let aliases = DecisionAliases::default();
        let canonical: Uuid = "bd899573-694e-4d33-8c9b-df0af802437d".parse().unwrap();
        let alias: Uuid = "1563f22f-f5f7-4dfe-a926-6ab50d408832".parse().unwrap();
        assert_eq!(aliases.canonical(alias), canonical);
        assert_eq!(aliases.canonical(canonical), canonical);
    }
}
