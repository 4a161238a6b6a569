//! Packages and their unit-specific behavior.
//!
//! A `Package` owns the identity and location of a Transfer, SIP or DIP.
//! Kind-specific behavior (how the record is reconciled with the store, which
//! fields are refreshed before a job, which template variables are exposed)
//! lives on the `Unit` variant it carries.
//!
//! Paths are kept absolute in memory. The persisted form replaces the shared
//! directory prefix with `%sharedPath%`.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use ccp_types::error::StoreError;
use ccp_types::package::{PackageStatus, PackageType};
use ccp_types::store::{FileRecord, UnitVarValue};
use ccp_types::workflow::WatchedDirectory;
use thiserror::Error;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::processing::{PreconfiguredChoice, ProcessingConfig, ProcessingConfigError};
use crate::replacement::ReplacementMapping;
use crate::repository::Store;
use crate::transfer;

pub const SHARED_PATH_PLACEHOLDER: &str = "%sharedPath%";

/// Watched directory whose SIPs are partial reingests.
const PARTIAL_REINGEST_DIR: &str = "system/reingestAIP";

#[derive(Debug, Error)]
pub enum PackageError {
    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("stat {path}: {source}")]
    Stat {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unexpected type given for file {path:?} (dir: {is_dir})")]
    UnexpectedType { path: String, is_dir: bool },

    #[error("walk dir: {0}")]
    Walk(String),

    #[error(transparent)]
    ProcessingConfig(#[from] ProcessingConfigError),
}

impl PackageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, PackageError::Store(e) if e.is_not_found())
    }
}

// ---------------------------------------------------------------------------
// Unit
// ---------------------------------------------------------------------------

/// Kind-specific state of a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unit {
    Transfer { processing_configuration: String },
    Sip { aip_filename: String, sip_type: String },
    Dip,
}

impl Unit {
    pub fn new(package_type: PackageType) -> Self {
        match package_type {
            PackageType::Transfer => Unit::Transfer {
                processing_configuration: String::new(),
            },
            PackageType::Sip => Unit::Sip {
                aip_filename: String::new(),
                sip_type: String::new(),
            },
            PackageType::Dip => Unit::Dip,
        }
    }

    pub fn package_type(&self) -> PackageType {
        match self {
            Unit::Transfer { .. } => PackageType::Transfer,
            Unit::Sip { .. } => PackageType::Sip,
            Unit::Dip => PackageType::Dip,
        }
    }
}

/// Identity of a package, detached from the package itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageInfo {
    pub id: Uuid,
    pub name: String,
    pub path: String,
    pub package_type: PackageType,
}

// ---------------------------------------------------------------------------
// Package
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Package {
    id: Uuid,
    path: String,
    shared_dir: String,
    unit: Unit,
    start_at_chain: Option<Uuid>,
    start_at_link: Option<Uuid>,
    auto_approve: bool,
}

impl Package {
    fn new(package_type: PackageType, shared_dir: &str) -> Self {
        Self {
            id: Uuid::nil(),
            path: String::new(),
            shared_dir: dir_path(shared_dir),
            unit: Unit::new(package_type),
            start_at_chain: None,
            start_at_link: None,
            auto_approve: false,
        }
    }

    /// Build a package from an entry that appeared in a watched directory.
    ///
    /// Transfers may be files or directories; SIPs and DIPs must be
    /// directories.
    pub async fn from_watched<S: Store>(
        store: &S,
        shared_dir: &str,
        path: &Path,
        wd: &WatchedDirectory,
    ) -> Result<Self, PackageError> {
        let display = path.display().to_string();
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|source| PackageError::Stat {
                path: display.clone(),
                source,
            })?;
        let is_dir = metadata.is_dir();

        match wd.unit_type {
            PackageType::Transfer => {}
            PackageType::Sip | PackageType::Dip if is_dir => {}
            _ => {
                return Err(PackageError::UnexpectedType {
                    path: display,
                    is_dir,
                });
            }
        }

        let mut pkg = Package::new(wd.unit_type, shared_dir);
        pkg.start_at_chain = Some(wd.chain_id);
        pkg.hydrate(store, &display, &wd.path).await?;
        Ok(pkg)
    }

    /// A transfer created by a user request, before its contents exist.
    pub fn new_transfer(id: Uuid, shared_dir: &str) -> Self {
        let mut pkg = Package::new(PackageType::Transfer, shared_dir);
        pkg.id = id;
        pkg
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn unit(&self) -> &Unit {
        &self.unit
    }

    pub fn package_type(&self) -> PackageType {
        self.unit.package_type()
    }

    pub fn job_unit_type(&self) -> &'static str {
        self.package_type().job_unit_type()
    }

    pub fn replacement_path(&self) -> &'static str {
        self.package_type().replacement_path()
    }

    pub fn shared_dir(&self) -> &str {
        &self.shared_dir
    }

    /// Absolute path to the package.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Set the location, accepting either path form.
    pub fn update_path(&mut self, path: &str) {
        self.path = path.replacen(SHARED_PATH_PLACEHOLDER, &self.shared_dir, 1);
    }

    /// Path as persisted in the store.
    pub fn path_for_db(&self) -> String {
        self.path.replacen(&self.shared_dir, SHARED_PATH_PLACEHOLDER, 1)
    }

    /// Directory name without the `-<uuid>` suffix.
    pub fn name(&self) -> String {
        let base = basename(&self.path);
        base.replacen(&format!("-{}", self.id), "", 1)
    }

    pub fn start_at_chain(&self) -> Option<Uuid> {
        self.start_at_chain
    }

    pub fn start_at_link(&self) -> Option<Uuid> {
        self.start_at_link
    }

    pub fn set_start_at(&mut self, chain: Uuid, link: Option<Uuid>) {
        self.start_at_chain = Some(chain);
        self.start_at_link = link;
    }

    pub fn auto_approve(&self) -> bool {
        self.auto_approve
    }

    pub fn set_auto_approve(&mut self, auto_approve: bool) {
        self.auto_approve = auto_approve;
    }

    pub fn info(&self) -> PackageInfo {
        PackageInfo {
            id: self.id,
            name: self.name(),
            path: self.path.clone(),
            package_type: self.package_type(),
        }
    }

    // -----------------------------------------------------------------------
    // Store reconciliation
    // -----------------------------------------------------------------------

    /// Create or update the package record for `path`.
    ///
    /// A path ending in a UUID names the package; otherwise the record is
    /// looked up by location and created when missing.
    pub async fn hydrate<S: Store>(
        &mut self,
        store: &S,
        path: &str,
        watched_dir: &str,
    ) -> Result<(), PackageError> {
        let db_path = dir_path(&path.replacen(&self.shared_dir, SHARED_PATH_PLACEHOLDER, 1));
        let package_type = self.package_type();

        let (id, created) = match uuid_from_path(&db_path) {
            Some(id) => (id, store.upsert_package(package_type, id, &db_path).await?),
            None => store.ensure_package(package_type, &db_path).await?,
        };

        self.id = id;
        self.update_path(&db_path);

        if package_type == PackageType::Sip && watched_dir.contains(PARTIAL_REINGEST_DIR) {
            self.save_value(store, "isPartialReingest", "true").await?;
        }

        tracing::debug!(package_id = %id, package_type = %package_type, created, "package hydrated");
        Ok(())
    }

    /// Refresh the fields other services may have changed.
    pub async fn reload<S: Store>(&mut self, store: &S) -> Result<(), PackageError> {
        match self.package_type() {
            PackageType::Transfer => {
                let location = store.read_transfer_location(self.id).await?;
                self.update_path(&location);
                let name = match store
                    .read_unit_var(self.id, PackageType::Transfer, "processingConfiguration")
                    .await
                {
                    Ok(name) => name,
                    Err(e) if e.is_not_found() => "default".to_string(),
                    Err(e) => return Err(e.into()),
                };
                self.unit = Unit::Transfer {
                    processing_configuration: name,
                };
            }
            PackageType::Sip => {
                let sip = store.read_sip(self.id).await?;
                self.update_path(&sip.current_path);
                self.unit = Unit::Sip {
                    aip_filename: sip.aip_filename,
                    sip_type: sip.sip_type,
                };
            }
            PackageType::Dip => {}
        }
        Ok(())
    }

    pub async fn save_value<S: Store>(
        &self,
        store: &S,
        name: &str,
        value: &str,
    ) -> Result<(), StoreError> {
        store
            .create_unit_var(
                self.id,
                self.package_type(),
                name,
                UnitVarValue::Value(value.to_string()),
                true,
            )
            .await
    }

    pub async fn save_link_id<S: Store>(
        &self,
        store: &S,
        name: &str,
        link_id: Uuid,
    ) -> Result<(), StoreError> {
        store
            .create_unit_var(self.id, self.package_type(), name, UnitVarValue::LinkId(link_id), true)
            .await
    }

    pub async fn mark_as<S: Store>(&self, store: &S, status: PackageStatus) -> Result<(), StoreError> {
        store
            .update_package_status(self.id, self.package_type(), status)
            .await
    }

    // -----------------------------------------------------------------------
    // Processing configuration
    // -----------------------------------------------------------------------

    pub async fn processing_config(&self) -> Result<ProcessingConfig, PackageError> {
        Ok(ProcessingConfig::load(Path::new(&self.path)).await?)
    }

    /// Answer chosen ahead of time for decision point `link_id`.
    ///
    /// The package's own configuration wins. A package that carries a
    /// configuration without an answer for `link_id` falls back to the
    /// built-in automated choices.
    pub async fn preconfigured_choice(&self, link_id: Uuid) -> Result<Option<PreconfiguredChoice>, PackageError> {
        let config = self.processing_config().await?;
        if config.choices().is_empty() {
            return Ok(None);
        }
        if let Some(choice) = config.choice_for(link_id) {
            return Ok(Some(choice.clone()));
        }
        let choice = ProcessingConfig::builtin_automated().choice_for(link_id).cloned();
        if choice.is_some() {
            tracing::debug!(package_id = %self.id, %link_id, "using built-in automated choice");
        }
        Ok(choice)
    }

    /// Chain chosen ahead of time for decision point `link_id`.
    pub async fn preconfigured_chain(&self, link_id: Uuid) -> Result<Option<Uuid>, PackageError> {
        if self.auto_approve {
            if let Some(chain_id) = transfer::auto_approval(link_id) {
                return Ok(Some(chain_id));
            }
        }
        Ok(self.preconfigured_choice(link_id).await?.and_then(|c| c.chain_id()))
    }

    // -----------------------------------------------------------------------
    // Replacements
    // -----------------------------------------------------------------------

    fn shared_replacements(&self) -> ReplacementMapping {
        let shared = &self.shared_dir;
        [
            ("%tmpDirectory%", format!("{shared}tmp/")),
            ("%processingDirectory%", format!("{shared}currentlyProcessing/")),
            ("%watchDirectoryPath%", format!("{shared}watchedDirectories/")),
            ("%rejectedDirectory%", format!("{shared}rejected/")),
        ]
        .into_iter()
        .collect()
    }

    fn base_replacements(&self) -> ReplacementMapping {
        let path = self.path.as_str();
        [
            ("%SIPUUID%", self.id.to_string()),
            ("%SIPName%", self.name()),
            ("%SIPLogsDirectory%", join_dir(path, "logs")),
            ("%SIPObjectsDirectory%", join_dir(path, "objects")),
            ("%SIPDirectory%", path.to_string()),
            ("%SIPDirectoryBasename%", basename(path)),
            ("%relativeLocation%", self.path_for_db()),
        ]
        .into_iter()
        .collect()
    }

    /// Template variables for jobs of this package.
    pub fn replacements(&self, filter_subdir: &str) -> ReplacementMapping {
        let mut mapping = self.shared_replacements().with(&self.base_replacements());
        mapping.insert("%unitType%", self.package_type().as_str());

        match &self.unit {
            Unit::Transfer {
                processing_configuration,
            } => {
                mapping.insert("%transferDirectory%", self.path.clone());
                mapping.insert("%processingConfiguration%", processing_configuration.clone());
            }
            Unit::Sip {
                aip_filename,
                sip_type,
            } => {
                mapping.insert("%AIPFilename%", aip_filename.clone());
                mapping.insert("%SIPType%", sip_type.clone());
            }
            Unit::Dip => {
                if !filter_subdir.is_empty() {
                    mapping.insert(
                        "%relativeLocation%",
                        filter_subdir.replacen(SHARED_PATH_PLACEHOLDER, &self.shared_dir, 1),
                    );
                }
            }
        }

        mapping.with_shared_dir(self.shared_dir.clone())
    }

    /// Template variables for one tracked file.
    pub fn file_replacements(&self, file: &FileRecord) -> ReplacementMapping {
        let location = file.current_location.as_str();
        let package_dir = dir_path(&self.path);
        let absolute = location
            .replace("%SIPDirectory%", &package_dir)
            .replace("%transferDirectory%", &package_dir);

        let location_path = Path::new(location);
        let directory = location_path
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = location_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = location_path
            .extension()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension_with_dot = if extension.is_empty() {
            String::new()
        } else {
            format!(".{extension}")
        };

        let mut mapping = self.base_replacements();
        mapping.update([
            ("%fileUUID%", file.id.to_string()),
            ("%originalLocation%", file.original_location.clone()),
            ("%currentLocation%", file.current_location.clone()),
            ("%fileGrpUse%", file.file_grp_use.clone()),
            ("%fileDirectory%", directory),
            ("%fileName%", name),
            ("%fileExtension%", extension),
            ("%fileExtensionWithDot%", extension_with_dot),
            ("%relativeLocation%", absolute.clone()),
            ("%inputFile%", absolute.clone()),
            ("%fileFullName%", absolute),
        ]);
        mapping.with_shared_dir(self.shared_dir.clone())
    }

    // -----------------------------------------------------------------------
    // Files
    // -----------------------------------------------------------------------

    /// Per-file replacements for every file the package holds.
    ///
    /// Tracked files come first, skipping those no longer on disk. Files
    /// found under `<path><filter_subdir>` that the store does not track are
    /// appended.
    pub async fn files<S: Store>(
        &self,
        store: &S,
        filter_file_end: &str,
        filter_subdir: &str,
    ) -> Result<Vec<ReplacementMapping>, PackageError> {
        let records = store
            .files(
                self.id,
                self.package_type(),
                filter_file_end,
                filter_subdir,
                self.replacement_path(),
            )
            .await?;

        let mut found = Vec::with_capacity(records.len());
        let mut seen = HashSet::with_capacity(records.len());
        for record in &records {
            let mapping = self.file_replacements(record);
            let Some(input) = mapping.get("%inputFile%") else {
                continue;
            };
            if !tokio::fs::try_exists(input).await.unwrap_or(false) {
                continue;
            }
            seen.insert(PathBuf::from(input));
            found.push(mapping);
        }

        let start = PathBuf::from(format!("{}{}", dir_path(&self.path), filter_subdir));
        let suffix = filter_file_end.to_string();
        let walked = tokio::task::spawn_blocking(move || walk_files(&start, &suffix))
            .await
            .map_err(|e| PackageError::Walk(e.to_string()))??;

        for path in walked {
            if seen.contains(&path) {
                continue;
            }
            found.push(
                [
                    ("%relativeLocation%", path.to_string_lossy().into_owned()),
                    ("%fileUUID%", "None".to_string()),
                    ("%fileGrpUse%", String::new()),
                ]
                .into_iter()
                .collect::<ReplacementMapping>()
                .with_shared_dir(self.shared_dir.clone()),
            );
        }

        Ok(found)
    }

    #[cfg(test)]
    pub(crate) fn for_tests(package_type: PackageType, shared_dir: &str, path: &str) -> Self {
        let mut pkg = Package::new(package_type, shared_dir);
        pkg.id = Uuid::now_v7();
        pkg.update_path(path);
        pkg
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

fn walk_files(start: &Path, suffix: &str) -> Result<Vec<PathBuf>, PackageError> {
    if !start.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(start).sort_by_file_name() {
        let entry = entry.map_err(|e| PackageError::Walk(e.to_string()))?;
        if entry.file_type().is_dir() {
            continue;
        }
        if !suffix.is_empty() && !entry.file_name().to_string_lossy().ends_with(suffix) {
            continue;
        }
        files.push(entry.into_path());
    }
    Ok(files)
}

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

/// `path` with exactly one trailing slash.
pub(crate) fn dir_path(path: &str) -> String {
    format!("{}/", path.trim_end_matches('/'))
}

fn join_dir(base: &str, name: &str) -> String {
    format!("{}/{name}/", base.trim_end_matches('/'))
}

fn basename(path: &str) -> String {
    Path::new(path.trim_end_matches('/'))
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// The UUID a path ends with, if any.
pub fn uuid_from_path(path: &str) -> Option<Uuid> {
    let trimmed = path.trim_end_matches('/');
    let start = trimmed.len().checked_sub(36)?;
    trimmed.get(start..).and_then(|tail| Uuid::parse_str(tail).ok())
}
