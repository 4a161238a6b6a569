//! CLI definitions for the `ccp` binary.

use std::path::PathBuf;

use ccp_observe::tracing_setup::LogFormat;
use ccp_types::config::ServerConfig;
use clap::{Args, Parser, Subcommand};

/// Digital-preservation workflow controller.
#[derive(Parser)]
#[command(name = "ccp", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file (TOML).
    #[arg(short, long, global = true, env = "CCP_CONFIG", default_value = "/etc/ccp/ccp.toml")]
    pub config: PathBuf,

    /// Log format: pretty or json.
    #[arg(long, global = true, env = "CCP_LOG_FORMAT", default_value = "pretty")]
    pub log_format: LogFormat,

    /// Detailed output (-v for debug, -vv for trace). RUST_LOG wins when set.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the controller, the watched-directory observer and the admin API.
    Serve(ServeArgs),

    /// Load a workflow document and report whether it is valid.
    ValidateWorkflow {
        /// Path to the workflow JSON document.
        path: PathBuf,
    },
}

/// Overrides for values read from the configuration file.
#[derive(Args, Default)]
pub struct ServeArgs {
    #[arg(long, env = "CCP_SHARED_DIR")]
    pub shared_dir: Option<PathBuf>,

    #[arg(long, env = "CCP_WATCHED_DIR")]
    pub watched_dir: Option<PathBuf>,

    #[arg(long, env = "CCP_WORKFLOW")]
    pub workflow: Option<PathBuf>,

    #[arg(long, env = "CCP_DATABASE_URL")]
    pub database_url: Option<String>,

    #[arg(long, env = "CCP_ADMIN_ADDR")]
    pub admin_addr: Option<String>,

    #[arg(long, env = "CCP_SCRIPTS_DIR")]
    pub scripts_dir: Option<PathBuf>,

    #[arg(long, env = "CCP_MAX_CONCURRENT_PACKAGES")]
    pub max_concurrent_packages: Option<usize>,
}

impl ServeArgs {
    pub fn apply(self, mut config: ServerConfig) -> ServerConfig {
        if let Some(shared_dir) = self.shared_dir {
            config.shared_dir = shared_dir;
        }
        if let Some(watched_dir) = self.watched_dir {
            config.watched_dir = Some(watched_dir);
        }
        if let Some(workflow) = self.workflow {
            config.workflow = Some(workflow);
        }
        if let Some(database_url) = self.database_url {
            config.database_url = Some(database_url);
        }
        if let Some(admin_addr) = self.admin_addr {
            config.admin_addr = admin_addr;
        }
        if let Some(scripts_dir) = self.scripts_dir {
            config.scripts_dir = scripts_dir;
        }
        if let Some(max) = self.max_concurrent_packages {
            config.max_concurrent_packages = max.max(1);
        }
        config
    }
}
