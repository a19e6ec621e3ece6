//! Catalog store.
//!
//! SQLite persistence for everything the controller must remember across
//! restarts: host configuration, status history, guest definitions,
//! tasks and operation logs. The store is the single source of truth at
//! rest; every successful mutation through the manager lands here before
//! the API response returns.
//!
//! Connections come from a pool and are held per statement; there is no
//! multi-table transaction boundary. A per-host "save full" is
//! delete-then-insert for each list table scoped to that `hs_name`, so a
//! crash mid-save can leave a partially updated host; startup tolerates
//! missing side tables for exactly that reason.

mod migrations;

use std::collections::BTreeMap;
use std::path::Path;

use serde::de::DeserializeOwned;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use thiserror::Error;
use tracing::warn;

use crate::types::{ActionResult, GuestConfig, HostConfig, HwStatus, TaskRecord};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),

    #[error("store unavailable: {0}")]
    Io(#[from] std::io::Error),

    #[error("schema conflict: {0}")]
    SchemaConflict(String),
}

/// Global singleton row (`hs_global.id = 1`).
#[derive(Debug, Clone, Default)]
pub struct GlobalRow {
    pub bearer: String,
    pub saving: String,
}

/// Everything the catalog holds for one host.
#[derive(Debug, Default)]
pub struct HostFullData {
    pub config: Option<HostConfig>,
    pub hs_status: Vec<HwStatus>,
    pub vm_saving: BTreeMap<String, GuestConfig>,
    pub vm_status: BTreeMap<String, Vec<HwStatus>>,
    pub vm_tasker: Vec<TaskRecord>,
    pub logs: Vec<ActionResult>,
}

#[derive(Debug, Clone)]
pub struct CatalogStore {
    pool: SqlitePool,
}

impl CatalogStore {
    /// Open (creating if missing) the catalog at `path` and bring the
    /// schema up to date.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// In-memory catalog for tests. Capped at one connection so every
    /// statement sees the same database.
    pub async fn open_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Apply the embedded schema, statement by statement. Duplicate
    /// column errors from re-run ALTERs are tolerated and logged; any
    /// other DDL failure aborts startup.
    async fn init_schema(&self) -> Result<(), StoreError> {
        for statement in migrations::SCHEMA {
            if let Err(err) = sqlx::query(statement).execute(&self.pool).await {
                let text = err.to_string();
                if text.to_lowercase().contains("duplicate column name") {
                    warn!(error = %text, "column already present, skipping migration statement");
                    continue;
                }
                return Err(StoreError::SchemaConflict(text));
            }
        }
        Ok(())
    }

    // ==================== global ====================

    pub async fn global_config(&self) -> Result<GlobalRow, StoreError> {
        let row = sqlx::query("SELECT bearer, saving FROM hs_global WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(GlobalRow {
                bearer: row.try_get("bearer")?,
                saving: row.try_get("saving")?,
            }),
            None => Ok(GlobalRow::default()),
        }
    }

    pub async fn set_bearer(&self, bearer: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE hs_global SET bearer = ?, updated_at = CURRENT_TIMESTAMP WHERE id = 1")
            .bind(bearer)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_saving_root(&self, saving: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE hs_global SET saving = ?, updated_at = CURRENT_TIMESTAMP WHERE id = 1")
            .bind(saving)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ==================== host configuration ====================

    pub async fn save_host_config(
        &self,
        hs_name: &str,
        config: &HostConfig,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO hs_config
                (hs_name, server_type, server_addr, server_user, server_pass,
                 filter_name, images_path, system_path, backup_path, extern_path,
                 launch_path, network_nat, network_pub, i_kuai_addr, i_kuai_user,
                 i_kuai_pass, ports_start, ports_close, remote_port, system_maps,
                 public_addr, extend_data, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
            "#,
        )
        .bind(hs_name)
        .bind(&config.server_type)
        .bind(&config.server_addr)
        .bind(&config.server_user)
        .bind(&config.server_pass)
        .bind(&config.filter_name)
        .bind(&config.images_path)
        .bind(&config.system_path)
        .bind(&config.backup_path)
        .bind(&config.extern_path)
        .bind(&config.launch_path)
        .bind(&config.network_nat)
        .bind(&config.network_pub)
        .bind(&config.i_kuai_addr)
        .bind(&config.i_kuai_user)
        .bind(&config.i_kuai_pass)
        .bind(config.ports_start as i64)
        .bind(config.ports_close as i64)
        .bind(config.remote_port as i64)
        .bind(serde_json::to_string(&config.system_maps).unwrap_or_else(|_| "{}".into()))
        .bind(serde_json::to_string(&config.public_addr).unwrap_or_else(|_| "[]".into()))
        .bind(serde_json::to_string(&config.extend_data).unwrap_or_else(|_| "{}".into()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn host_config(&self, hs_name: &str) -> Result<Option<HostConfig>, StoreError> {
        let row = sqlx::query("SELECT * FROM hs_config WHERE hs_name = ?")
            .bind(hs_name)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| host_config_from_row(&row)).transpose()
    }

    pub async fn all_host_configs(&self) -> Result<Vec<(String, HostConfig)>, StoreError> {
        let rows = sqlx::query("SELECT * FROM hs_config ORDER BY hs_name")
            .fetch_all(&self.pool)
            .await?;
        let mut configs = Vec::with_capacity(rows.len());
        for row in rows {
            let hs_name: String = row.try_get("hs_name")?;
            match host_config_from_row(&row) {
                Ok(config) => configs.push((hs_name, config)),
                Err(err) => {
                    warn!(hs_name = %hs_name, error = %err, "unreadable host row skipped");
                }
            }
        }
        Ok(configs)
    }

    pub async fn delete_host_config(&self, hs_name: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM hs_config WHERE hs_name = ?")
            .bind(hs_name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ==================== host status ====================

    pub async fn save_hs_status(
        &self,
        hs_name: &str,
        statuses: &[HwStatus],
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM hs_status WHERE hs_name = ?")
            .bind(hs_name)
            .execute(&self.pool)
            .await?;
        for status in statuses {
            sqlx::query("INSERT INTO hs_status (hs_name, status_data) VALUES (?, ?)")
                .bind(hs_name)
                .bind(serde_json::to_string(status).unwrap_or_else(|_| "{}".into()))
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    pub async fn hs_status(&self, hs_name: &str) -> Result<Vec<HwStatus>, StoreError> {
        let rows = sqlx::query("SELECT status_data FROM hs_status WHERE hs_name = ? ORDER BY id")
            .bind(hs_name)
            .fetch_all(&self.pool)
            .await?;
        let mut statuses = Vec::with_capacity(rows.len());
        for row in rows {
            let raw: String = row.try_get("status_data")?;
            if let Some(status) = decode_lenient::<HwStatus>(&raw, "hs_status") {
                statuses.push(status);
            }
        }
        Ok(statuses)
    }

    // ==================== guest configuration ====================

    pub async fn save_vm_saving(
        &self,
        hs_name: &str,
        guests: &BTreeMap<String, GuestConfig>,
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM vm_saving WHERE hs_name = ?")
            .bind(hs_name)
            .execute(&self.pool)
            .await?;
        for (vm_uuid, config) in guests {
            sqlx::query("INSERT INTO vm_saving (hs_name, vm_uuid, vm_config) VALUES (?, ?, ?)")
                .bind(hs_name)
                .bind(vm_uuid)
                .bind(serde_json::to_string(config).unwrap_or_else(|_| "{}".into()))
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    pub async fn vm_saving(
        &self,
        hs_name: &str,
    ) -> Result<BTreeMap<String, GuestConfig>, StoreError> {
        let rows = sqlx::query("SELECT vm_uuid, vm_config FROM vm_saving WHERE hs_name = ?")
            .bind(hs_name)
            .fetch_all(&self.pool)
            .await?;
        let mut guests = BTreeMap::new();
        for row in rows {
            let vm_uuid: String = row.try_get("vm_uuid")?;
            let raw: String = row.try_get("vm_config")?;
            if let Some(mut config) =
                decode_tolerant::<GuestConfig>(&raw, GuestConfig::FIELDS, "vm_saving")
            {
                if config.vm_uuid.is_empty() {
                    config.vm_uuid = vm_uuid.clone();
                }
                config.normalize();
                guests.insert(vm_uuid, config);
            }
        }
        Ok(guests)
    }

    // ==================== guest status ====================

    pub async fn save_vm_status(
        &self,
        hs_name: &str,
        statuses: &BTreeMap<String, Vec<HwStatus>>,
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM vm_status WHERE hs_name = ?")
            .bind(hs_name)
            .execute(&self.pool)
            .await?;
        for (vm_uuid, ring) in statuses {
            sqlx::query("INSERT INTO vm_status (hs_name, vm_uuid, status_data) VALUES (?, ?, ?)")
                .bind(hs_name)
                .bind(vm_uuid)
                .bind(serde_json::to_string(ring).unwrap_or_else(|_| "[]".into()))
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    pub async fn vm_status(
        &self,
        hs_name: &str,
    ) -> Result<BTreeMap<String, Vec<HwStatus>>, StoreError> {
        let rows = sqlx::query("SELECT vm_uuid, status_data FROM vm_status WHERE hs_name = ?")
            .bind(hs_name)
            .fetch_all(&self.pool)
            .await?;
        let mut statuses = BTreeMap::new();
        for row in rows {
            let vm_uuid: String = row.try_get("vm_uuid")?;
            let raw: String = row.try_get("status_data")?;
            if let Some(ring) = decode_lenient::<Vec<HwStatus>>(&raw, "vm_status") {
                statuses.insert(vm_uuid, ring);
            }
        }
        Ok(statuses)
    }

    // ==================== tasks ====================

    pub async fn save_vm_tasker(
        &self,
        hs_name: &str,
        tasks: &[TaskRecord],
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM vm_tasker WHERE hs_name = ?")
            .bind(hs_name)
            .execute(&self.pool)
            .await?;
        for task in tasks {
            sqlx::query("INSERT INTO vm_tasker (hs_name, task_data) VALUES (?, ?)")
                .bind(hs_name)
                .bind(serde_json::to_string(task).unwrap_or_else(|_| "{}".into()))
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    pub async fn vm_tasker(&self, hs_name: &str) -> Result<Vec<TaskRecord>, StoreError> {
        let rows = sqlx::query("SELECT task_data FROM vm_tasker WHERE hs_name = ? ORDER BY id")
            .bind(hs_name)
            .fetch_all(&self.pool)
            .await?;
        let mut tasks = Vec::with_capacity(rows.len());
        for row in rows {
            let raw: String = row.try_get("task_data")?;
            if let Some(task) = decode_lenient::<TaskRecord>(&raw, "vm_tasker") {
                tasks.push(task);
            }
        }
        Ok(tasks)
    }

    // ==================== logs ====================

    /// Replace the stored log list for one host (or the controller-global
    /// list when `hs_name` is `None`).
    pub async fn save_logger(
        &self,
        hs_name: Option<&str>,
        logs: &[ActionResult],
    ) -> Result<(), StoreError> {
        match hs_name {
            Some(name) => {
                sqlx::query("DELETE FROM hs_logger WHERE hs_name = ?")
                    .bind(name)
                    .execute(&self.pool)
                    .await?;
            }
            None => {
                sqlx::query("DELETE FROM hs_logger WHERE hs_name IS NULL")
                    .execute(&self.pool)
                    .await?;
            }
        }
        for log in logs {
            let level = if log.success { "INFO" } else { "ERROR" };
            sqlx::query("INSERT INTO hs_logger (hs_name, log_level, log_data) VALUES (?, ?, ?)")
                .bind(hs_name)
                .bind(level)
                .bind(serde_json::to_string(log).unwrap_or_else(|_| "{}".into()))
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    pub async fn logger(&self, hs_name: Option<&str>) -> Result<Vec<ActionResult>, StoreError> {
        let rows = match hs_name {
            Some(name) => {
                sqlx::query("SELECT log_data FROM hs_logger WHERE hs_name = ? ORDER BY id")
                    .bind(name)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT log_data FROM hs_logger WHERE hs_name IS NULL ORDER BY id")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        let mut logs = Vec::with_capacity(rows.len());
        for row in rows {
            let raw: String = row.try_get("log_data")?;
            if let Some(log) = decode_lenient::<ActionResult>(&raw, "hs_logger") {
                logs.push(log);
            }
        }
        Ok(logs)
    }

    /// Newest-first page of log entries for the dashboard, with the row
    /// timestamp merged into each entry.
    pub async fn logs_page(
        &self,
        hs_name: Option<&str>,
        limit: i64,
    ) -> Result<Vec<serde_json::Value>, StoreError> {
        let rows = match hs_name {
            Some(name) => {
                sqlx::query(
                    "SELECT log_data, log_level, created_at FROM hs_logger \
                     WHERE hs_name = ? ORDER BY id DESC LIMIT ?",
                )
                .bind(name)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT log_data, log_level, created_at FROM hs_logger \
                     ORDER BY id DESC LIMIT ?",
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };
        let mut page = Vec::with_capacity(rows.len());
        for row in rows {
            let raw: String = row.try_get("log_data")?;
            let mut entry: serde_json::Value =
                serde_json::from_str(&raw).unwrap_or(serde_json::Value::Null);
            if let Some(object) = entry.as_object_mut() {
                object.insert(
                    "created_at".to_string(),
                    serde_json::Value::String(row.try_get("created_at")?),
                );
                object.insert(
                    "level".to_string(),
                    serde_json::Value::String(row.try_get("log_level")?),
                );
            }
            page.push(entry);
        }
        Ok(page)
    }

    // ==================== full host data ====================

    /// Everything the catalog holds for one host. Missing side tables
    /// come back empty; only `config` distinguishes a known host.
    pub async fn host_full_data(&self, hs_name: &str) -> Result<HostFullData, StoreError> {
        Ok(HostFullData {
            config: self.host_config(hs_name).await?,
            hs_status: self.hs_status(hs_name).await?,
            vm_saving: self.vm_saving(hs_name).await?,
            vm_status: self.vm_status(hs_name).await?,
            vm_tasker: self.vm_tasker(hs_name).await?,
            logs: self.logger(Some(hs_name)).await?,
        })
    }
}

fn host_config_from_row(row: &SqliteRow) -> Result<HostConfig, StoreError> {
    let system_maps: String = row.try_get("system_maps")?;
    let public_addr: String = row.try_get("public_addr")?;
    let extend_data: String = row.try_get("extend_data")?;
    Ok(HostConfig {
        server_type: row.try_get("server_type")?,
        server_addr: row.try_get("server_addr")?,
        server_user: row.try_get("server_user")?,
        server_pass: row.try_get("server_pass")?,
        filter_name: row.try_get("filter_name")?,
        images_path: row.try_get("images_path")?,
        system_path: row.try_get("system_path")?,
        backup_path: row.try_get("backup_path")?,
        extern_path: row.try_get("extern_path")?,
        launch_path: row.try_get("launch_path")?,
        network_nat: row.try_get("network_nat")?,
        network_pub: row.try_get("network_pub")?,
        i_kuai_addr: row.try_get("i_kuai_addr")?,
        i_kuai_user: row.try_get("i_kuai_user")?,
        i_kuai_pass: row.try_get("i_kuai_pass")?,
        ports_start: row.try_get::<i64, _>("ports_start")? as u16,
        ports_close: row.try_get::<i64, _>("ports_close")? as u16,
        remote_port: row.try_get::<i64, _>("remote_port")? as u16,
        system_maps: serde_json::from_str(&system_maps).unwrap_or_default(),
        public_addr: serde_json::from_str(&public_addr).unwrap_or_default(),
        extend_data: serde_json::from_str(&extend_data).unwrap_or_else(|_| serde_json::json!({})),
    })
}

/// Decode a stored JSON blob, dropping (and logging) fields the current
/// schema does not recognize. Undecodable rows are skipped, not fatal.
fn decode_tolerant<T: DeserializeOwned>(raw: &str, fields: &[&str], table: &str) -> Option<T> {
    let mut value: serde_json::Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(err) => {
            warn!(table, error = %err, "undecodable catalog row skipped");
            return None;
        }
    };
    if let Some(object) = value.as_object_mut() {
        let unknown: Vec<String> = object
            .keys()
            .filter(|key| !fields.contains(&key.as_str()))
            .cloned()
            .collect();
        for key in unknown {
            warn!(table, field = %key, "unknown field in catalog row skipped");
            object.remove(&key);
        }
    }
    match serde_json::from_value(value) {
        Ok(decoded) => Some(decoded),
        Err(err) => {
            warn!(table, error = %err, "undecodable catalog row skipped");
            None
        }
    }
}

/// Decode a stored JSON blob for types that already ignore unknown
/// fields; failures skip the row.
fn decode_lenient<T: DeserializeOwned>(raw: &str, table: &str) -> Option<T> {
    match serde_json::from_str(raw) {
        Ok(decoded) => Some(decoded),
        Err(err) => {
            warn!(table, error = %err, "undecodable catalog row skipped");
            None
        }
    }
}
