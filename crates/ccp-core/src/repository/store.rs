//! Store trait definition.

use ccp_types::error::StoreError;
use ccp_types::package::{JobStatus, PackageStatus, PackageType};
use ccp_types::store::{
    FileRecord, JobRecord, NewTransfer, SipRecord, TaskRecord, UnitVar, UnitVarValue,
};
use indexmap::IndexMap;
use uuid::Uuid;

/// Persistent state consumed by the controller.
///
/// Lookups of a single object return `StoreError::NotFound` when nothing
/// matches, so callers can fall back to a default.
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait Store: Send + Sync {
    /// Record a job before its link runs.
    fn create_job(
        &self,
        job: &JobRecord,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    fn update_job_status(
        &self,
        id: Uuid,
        status: JobStatus,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Record a batch of tasks in bulk.
    fn create_tasks(
        &self,
        tasks: &[TaskRecord],
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    fn update_package_status(
        &self,
        id: Uuid,
        package_type: PackageType,
        status: PackageStatus,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Create a transfer that has no location yet.
    fn create_transfer(
        &self,
        transfer: &NewTransfer,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    fn read_transfer_location(
        &self,
        id: Uuid,
    ) -> impl std::future::Future<Output = Result<String, StoreError>> + Send;

    fn update_transfer_location(
        &self,
        id: Uuid,
        path: &str,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Update the location of the package with `id`, creating it when it
    /// does not exist. Returns whether it was created.
    fn upsert_package(
        &self,
        package_type: PackageType,
        id: Uuid,
        path: &str,
    ) -> impl std::future::Future<Output = Result<bool, StoreError>> + Send;

    /// Find the package recorded at `path`, or create one with a new id.
    /// Runs as a single transaction.
    fn ensure_package(
        &self,
        package_type: PackageType,
        path: &str,
    ) -> impl std::future::Future<Output = Result<(Uuid, bool), StoreError>> + Send;

    fn read_sip(
        &self,
        id: Uuid,
    ) -> impl std::future::Future<Output = Result<SipRecord, StoreError>> + Send;

    /// Variables of a package named `name`; all of them if `name` is empty.
    fn read_unit_vars(
        &self,
        id: Uuid,
        package_type: PackageType,
        name: &str,
    ) -> impl std::future::Future<Output = Result<Vec<UnitVar>, StoreError>> + Send;

    /// String value of a package variable.
    fn read_unit_var(
        &self,
        id: Uuid,
        package_type: PackageType,
        name: &str,
    ) -> impl std::future::Future<Output = Result<String, StoreError>> + Send;

    /// Link id held by a package variable (`None` when it holds no link).
    fn read_unit_link_id(
        &self,
        id: Uuid,
        package_type: PackageType,
        name: &str,
    ) -> impl std::future::Future<Output = Result<Option<Uuid>, StoreError>> + Send;

    /// Write a package variable. With `update` set, an existing variable of
    /// the same name is overwritten instead of duplicated.
    fn create_unit_var(
        &self,
        id: Uuid,
        package_type: PackageType,
        name: &str,
        value: UnitVarValue,
        update: bool,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Files tracked for a package, optionally restricted to names ending in
    /// `filter_filename_end` and to locations under `filter_subdir`
    /// (relative to `replacement_path`).
    fn files(
        &self,
        id: Uuid,
        package_type: PackageType,
        filter_filename_end: &str,
        filter_subdir: &str,
        replacement_path: &str,
    ) -> impl std::future::Future<Output = Result<Vec<FileRecord>, StoreError>> + Send;

    /// A named dictionary, e.g. the options offered by a decision point.
    fn read_dict(
        &self,
        name: &str,
    ) -> impl std::future::Future<Output = Result<IndexMap<String, String>, StoreError>> + Send;
}
