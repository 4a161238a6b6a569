//! SQLite implementation of the core `Store` trait.
//!
//! Transfers, SIPs and DIPs live in one table each; the `PackageType` picks
//! the table and its location column. Find-or-create operations run inside
//! a single writer transaction so concurrent notifications for the same
//! path cannot create two packages.

use ccp_core::repository::Store;
use ccp_types::error::StoreError;
use ccp_types::package::{JobStatus, PackageStatus, PackageType};
use ccp_types::store::{
    FileRecord, JobRecord, NewTransfer, SipRecord, TaskRecord, UnitVar, UnitVarValue,
};
use chrono::Utc;
use indexmap::IndexMap;
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `Store`.
#[derive(Clone)]
pub struct SqliteStore {
    pool: DatabasePool,
}

impl SqliteStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Clear state left behind by a previous run that did not shut down
    /// cleanly. Awaiting jobs and their tasks are removed; executing jobs
    /// and packages still marked as processing become failed.
    pub async fn remove_transient_data(&self) -> Result<(), StoreError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        sqlx::query(
            "DELETE FROM tasks WHERE job_id IN (SELECT id FROM jobs WHERE current_step = ?)",
        )
        .bind(JobStatus::AwaitingDecision.as_str())
        .execute(&mut *tx)
        .await
        .map_err(query_err)?;

        let awaiting = sqlx::query("DELETE FROM jobs WHERE current_step = ?")
            .bind(JobStatus::AwaitingDecision.as_str())
            .execute(&mut *tx)
            .await
            .map_err(query_err)?
            .rows_affected();

        let executing = sqlx::query("UPDATE jobs SET current_step = ? WHERE current_step = ?")
            .bind(JobStatus::Failed.as_str())
            .bind(JobStatus::ExecutingCommands.as_str())
            .execute(&mut *tx)
            .await
            .map_err(query_err)?
            .rows_affected();

        let mut packages = 0;
        for table in ["transfers", "sips", "dips"] {
            packages += sqlx::query(&format!("UPDATE {table} SET status = ? WHERE status = ?"))
                .bind(PackageStatus::Failed.as_i64())
                .bind(PackageStatus::Processing.as_i64())
                .execute(&mut *tx)
                .await
                .map_err(query_err)?
                .rows_affected();
        }

        tx.commit().await.map_err(query_err)?;

        tracing::info!(awaiting, executing, packages, "removed transient data");
        Ok(())
    }

    /// Record a file for a package. Used when seeding packages whose files
    /// were registered by client scripts.
    pub async fn add_file(
        &self,
        package_id: Uuid,
        package_type: PackageType,
        file: &FileRecord,
    ) -> Result<(), StoreError> {
        let (transfer_id, sip_id) = match package_type {
            PackageType::Transfer => (Some(package_id.to_string()), None),
            PackageType::Sip | PackageType::Dip => (None, Some(package_id.to_string())),
        };
        sqlx::query(
            r#"INSERT INTO files (id, transfer_id, sip_id, current_location, original_location, file_grp_use)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(file.id.to_string())
        .bind(transfer_id)
        .bind(sip_id)
        .bind(&file.current_location)
        .bind(&file.original_location)
        .bind(&file.file_grp_use)
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        Ok(())
    }

    /// Add one entry to a named dictionary.
    pub async fn add_dict_entry(&self, scope: &str, name: &str, value: &str) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO dashboard_settings (scope, name, value) VALUES (?, ?, ?)")
            .bind(scope)
            .bind(name)
            .bind(value)
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn query_err(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::RowNotFound => StoreError::NotFound,
        e => StoreError::Query(e.to_string()),
    }
}

fn parse_uuid(column: &str, s: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(s).map_err(|e| StoreError::Query(format!("invalid {column}: {e}")))
}

/// Table and location column holding packages of a type.
fn package_table(package_type: PackageType) -> (&'static str, &'static str) {
    match package_type {
        PackageType::Transfer => ("transfers", "current_location"),
        PackageType::Sip => ("sips", "current_path"),
        PackageType::Dip => ("dips", "current_path"),
    }
}

/// Column of the `files` table relating a file to its package.
fn files_column(package_type: PackageType) -> &'static str {
    match package_type {
        PackageType::Transfer => "transfer_id",
        PackageType::Sip | PackageType::Dip => "sip_id",
    }
}

// ---------------------------------------------------------------------------
// Private Row types for SQLite-to-domain mapping
// ---------------------------------------------------------------------------

struct UnitVarRow {
    name: String,
    value: Option<String>,
    link_id: Option<String>,
}

impl UnitVarRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            name: row.try_get("name")?,
            value: row.try_get("value")?,
            link_id: row.try_get("link_id")?,
        })
    }

    fn into_var(self) -> Result<UnitVar, StoreError> {
        let link_id = self
            .link_id
            .as_deref()
            .map(|s| parse_uuid("link_id", s))
            .transpose()?;
        Ok(UnitVar {
            name: self.name,
            value: self.value,
            link_id,
        })
    }
}

struct FileRow {
    id: String,
    current_location: String,
    original_location: String,
    file_grp_use: String,
}

impl FileRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            current_location: row.try_get("current_location")?,
            original_location: row.try_get("original_location")?,
            file_grp_use: row.try_get("file_grp_use")?,
        })
    }

    fn into_file(self) -> Result<FileRecord, StoreError> {
        Ok(FileRecord {
            id: parse_uuid("file id", &self.id)?,
            current_location: self.current_location,
            original_location: self.original_location,
            file_grp_use: self.file_grp_use,
        })
    }
}

// ---------------------------------------------------------------------------
// Store implementation
// ---------------------------------------------------------------------------

impl Store for SqliteStore {
    async fn create_job(&self, job: &JobRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"INSERT INTO jobs (id, job_type, created_at, directory, package_id, unit_type, current_step, microservice_group, link_id)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(job.id.to_string())
        .bind(&job.job_type)
        .bind(job.created_at.to_rfc3339())
        .bind(&job.directory)
        .bind(job.package_id.to_string())
        .bind(&job.unit_type)
        .bind(&job.current_step)
        .bind(&job.microservice_group)
        .bind(job.link_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        Ok(())
    }

    async fn update_job_status(&self, id: Uuid, status: JobStatus) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE jobs SET current_step = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn create_tasks(&self, tasks: &[TaskRecord]) -> Result<(), StoreError> {
        if tasks.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;
        for task in tasks {
            sqlx::query(
                r#"INSERT INTO tasks (id, job_id, created_at, file_id, filename, exec, arguments)
                   VALUES (?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(task.id.to_string())
            .bind(task.job_id.to_string())
            .bind(task.created_at.to_rfc3339())
            .bind(task.file_id.map(|id| id.to_string()))
            .bind(&task.filename)
            .bind(&task.exec)
            .bind(&task.arguments)
            .execute(&mut *tx)
            .await
            .map_err(query_err)?;
        }
        tx.commit().await.map_err(query_err)?;
        Ok(())
    }

    async fn update_package_status(
        &self,
        id: Uuid,
        package_type: PackageType,
        status: PackageStatus,
    ) -> Result<(), StoreError> {
        let (table, _) = package_table(package_type);
        let completed_at = (status == PackageStatus::CompletedSuccessfully)
            .then(|| Utc::now().to_rfc3339());
        let result = sqlx::query(&format!(
            "UPDATE {table} SET status = ?, completed_at = COALESCE(?, completed_at) WHERE id = ?"
        ))
        .bind(status.as_i64())
        .bind(completed_at)
        .bind(id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn create_transfer(&self, transfer: &NewTransfer) -> Result<(), StoreError> {
        sqlx::query(
            r#"INSERT INTO transfers (id, current_location, accession_id, access_system_id, metadata_set_id, status, created_at)
               VALUES (?, '', ?, ?, ?, ?, ?)"#,
        )
        .bind(transfer.id.to_string())
        .bind(&transfer.accession_id)
        .bind(&transfer.access_system_id)
        .bind(transfer.metadata_set_id.map(|id| id.to_string()))
        .bind(PackageStatus::Unknown.as_i64())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict(format!("transfer {} already exists", transfer.id))
            }
            e => query_err(e),
        })?;
        Ok(())
    }

    async fn read_transfer_location(&self, id: Uuid) -> Result<String, StoreError> {
        let row = sqlx::query("SELECT current_location FROM transfers WHERE id = ?")
            .bind(id.to_string())
            .fetch_one(&self.pool.reader)
            .await
            .map_err(query_err)?;
        row.try_get("current_location").map_err(query_err)
    }

    async fn update_transfer_location(&self, id: Uuid, path: &str) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE transfers SET current_location = ? WHERE id = ?")
            .bind(path)
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn upsert_package(
        &self,
        package_type: PackageType,
        id: Uuid,
        path: &str,
    ) -> Result<bool, StoreError> {
        let (table, column) = package_table(package_type);
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        let updated = sqlx::query(&format!("UPDATE {table} SET {column} = ? WHERE id = ?"))
            .bind(path)
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(query_err)?
            .rows_affected();

        let created = updated == 0;
        if created {
            sqlx::query(&format!(
                "INSERT INTO {table} (id, {column}, status, created_at) VALUES (?, ?, ?, ?)"
            ))
            .bind(id.to_string())
            .bind(path)
            .bind(PackageStatus::Processing.as_i64())
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(query_err)?;
        }

        tx.commit().await.map_err(query_err)?;
        Ok(created)
    }

    async fn ensure_package(
        &self,
        package_type: PackageType,
        path: &str,
    ) -> Result<(Uuid, bool), StoreError> {
        let (table, column) = package_table(package_type);
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        let existing = sqlx::query(&format!("SELECT id FROM {table} WHERE {column} = ? LIMIT 1"))
            .bind(path)
            .fetch_optional(&mut *tx)
            .await
            .map_err(query_err)?;

        if let Some(row) = existing {
            let id: String = row.try_get("id").map_err(query_err)?;
            tx.commit().await.map_err(query_err)?;
            return Ok((parse_uuid("package id", &id)?, false));
        }

        let id = Uuid::now_v7();
        sqlx::query(&format!(
            "INSERT INTO {table} (id, {column}, status, created_at) VALUES (?, ?, ?, ?)"
        ))
        .bind(id.to_string())
        .bind(path)
        .bind(PackageStatus::Processing.as_i64())
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(query_err)?;

        tx.commit().await.map_err(query_err)?;
        Ok((id, true))
    }

    async fn read_sip(&self, id: Uuid) -> Result<SipRecord, StoreError> {
        let row = sqlx::query("SELECT id, current_path, aip_filename, sip_type FROM sips WHERE id = ?")
            .bind(id.to_string())
            .fetch_one(&self.pool.reader)
            .await
            .map_err(query_err)?;

        let id: String = row.try_get("id").map_err(query_err)?;
        Ok(SipRecord {
            id: parse_uuid("sip id", &id)?,
            current_path: row.try_get("current_path").map_err(query_err)?,
            aip_filename: row.try_get("aip_filename").map_err(query_err)?,
            sip_type: row.try_get("sip_type").map_err(query_err)?,
        })
    }

    async fn read_unit_vars(
        &self,
        id: Uuid,
        package_type: PackageType,
        name: &str,
    ) -> Result<Vec<UnitVar>, StoreError> {
        let rows = sqlx::query(
            r#"SELECT name, value, link_id FROM unit_variables
               WHERE unit_id = ? AND unit_type = ? AND (? = '' OR name = ?)
               ORDER BY id ASC"#,
        )
        .bind(id.to_string())
        .bind(package_type.as_str())
        .bind(name)
        .bind(name)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        rows.iter()
            .map(|row| {
                UnitVarRow::from_row(row)
                    .map_err(query_err)
                    .and_then(UnitVarRow::into_var)
            })
            .collect()
    }

    async fn read_unit_var(
        &self,
        id: Uuid,
        package_type: PackageType,
        name: &str,
    ) -> Result<String, StoreError> {
        let row = sqlx::query(
            r#"SELECT value FROM unit_variables
               WHERE unit_id = ? AND unit_type = ? AND name = ?
               ORDER BY id DESC LIMIT 1"#,
        )
        .bind(id.to_string())
        .bind(package_type.as_str())
        .bind(name)
        .fetch_one(&self.pool.reader)
        .await
        .map_err(query_err)?;

        let value: Option<String> = row.try_get("value").map_err(query_err)?;
        value.ok_or(StoreError::NotFound)
    }

    async fn read_unit_link_id(
        &self,
        id: Uuid,
        package_type: PackageType,
        name: &str,
    ) -> Result<Option<Uuid>, StoreError> {
        let row = sqlx::query(
            r#"SELECT link_id FROM unit_variables
               WHERE unit_id = ? AND unit_type = ? AND name = ?
               ORDER BY id DESC LIMIT 1"#,
        )
        .bind(id.to_string())
        .bind(package_type.as_str())
        .bind(name)
        .fetch_one(&self.pool.reader)
        .await
        .map_err(query_err)?;

        let link_id: Option<String> = row.try_get("link_id").map_err(query_err)?;
        link_id.as_deref().map(|s| parse_uuid("link_id", s)).transpose()
    }

    async fn create_unit_var(
        &self,
        id: Uuid,
        package_type: PackageType,
        name: &str,
        value: UnitVarValue,
        update: bool,
    ) -> Result<(), StoreError> {
        let (value, link_id) = match value {
            UnitVarValue::Value(value) => (Some(value), None),
            UnitVarValue::LinkId(link_id) => (None, Some(link_id.to_string())),
        };
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        if update {
            let existing = sqlx::query(
                r#"SELECT id, value, link_id FROM unit_variables
                   WHERE unit_id = ? AND unit_type = ? AND name = ?
                   ORDER BY id DESC LIMIT 1"#,
            )
            .bind(id.to_string())
            .bind(package_type.as_str())
            .bind(name)
            .fetch_optional(&mut *tx)
            .await
            .map_err(query_err)?;

            if let Some(row) = existing {
                let row_id: i64 = row.try_get("id").map_err(query_err)?;
                let current_value: Option<String> = row.try_get("value").map_err(query_err)?;
                let current_link: Option<String> = row.try_get("link_id").map_err(query_err)?;
                if current_value == value && current_link == link_id {
                    return Ok(());
                }

                sqlx::query(
                    "UPDATE unit_variables SET value = ?, link_id = ?, updated_at = ? WHERE id = ?",
                )
                .bind(&value)
                .bind(&link_id)
                .bind(&now)
                .bind(row_id)
                .execute(&mut *tx)
                .await
                .map_err(query_err)?;
                tx.commit().await.map_err(query_err)?;
                return Ok(());
            }
        }

        sqlx::query(
            r#"INSERT INTO unit_variables (unit_id, unit_type, name, value, link_id, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(id.to_string())
        .bind(package_type.as_str())
        .bind(name)
        .bind(&value)
        .bind(&link_id)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(query_err)?;

        tx.commit().await.map_err(query_err)?;
        Ok(())
    }

    async fn files(
        &self,
        id: Uuid,
        package_type: PackageType,
        filter_filename_end: &str,
        filter_subdir: &str,
        replacement_path: &str,
    ) -> Result<Vec<FileRecord>, StoreError> {
        let column = files_column(package_type);
        let prefix = format!("{replacement_path}{filter_subdir}");
        // substr() rather than LIKE: locations carry literal '%' placeholders.
        let rows = sqlx::query(&format!(
            r#"SELECT id, current_location, original_location, file_grp_use FROM files
               WHERE {column} = ?
                 AND (? = '' OR substr(current_location, -length(?)) = ?)
                 AND (? = '' OR substr(current_location, 1, length(?)) = ?)
               ORDER BY current_location ASC"#
        ))
        .bind(id.to_string())
        .bind(filter_filename_end)
        .bind(filter_filename_end)
        .bind(filter_filename_end)
        .bind(filter_subdir)
        .bind(&prefix)
        .bind(&prefix)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        rows.iter()
            .map(|row| FileRow::from_row(row).map_err(query_err).and_then(FileRow::into_file))
            .collect()
    }

    async fn read_dict(&self, name: &str) -> Result<IndexMap<String, String>, StoreError> {
        let rows = sqlx::query("SELECT name, value FROM dashboard_settings WHERE scope = ? ORDER BY id ASC")
            .bind(name)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;

        if rows.is_empty() {
            return Err(StoreError::NotFound);
        }

        let mut dict = IndexMap::with_capacity(rows.len());
        for row in &rows {
            let key: String = row.try_get("name").map_err(query_err)?;
            let value: String = row.try_get("value").map_err(query_err)?;
            dict.insert(key, value);
        }
        Ok(dict)
    }
}
