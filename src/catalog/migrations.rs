//! Embedded catalog schema.
//!
//! The schema is applied statement by statement on every startup. Base
//! tables use `CREATE TABLE IF NOT EXISTS`; later additions are plain
//! `ALTER TABLE ADD COLUMN` statements, so re-running them against an
//! up-to-date database raises a duplicate-column error that the runner
//! tolerates and logs. Any other DDL error aborts startup.

/// All schema statements, oldest first.
pub(super) const SCHEMA: &[&str] = &[
    // Global singleton (id = 1): bearer token and saving root.
    r#"
    CREATE TABLE IF NOT EXISTS hs_global (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        bearer TEXT NOT NULL DEFAULT '',
        saving TEXT NOT NULL DEFAULT './DataSaving',
        updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    "INSERT OR IGNORE INTO hs_global (id, bearer) VALUES (1, '')",
    // Host configuration, one row per managed host.
    r#"
    CREATE TABLE IF NOT EXISTS hs_config (
        hs_name TEXT PRIMARY KEY,
        server_type TEXT NOT NULL DEFAULT '',
        server_addr TEXT NOT NULL DEFAULT '',
        server_user TEXT NOT NULL DEFAULT '',
        server_pass TEXT NOT NULL DEFAULT '',
        filter_name TEXT NOT NULL DEFAULT '',
        images_path TEXT NOT NULL DEFAULT '',
        system_path TEXT NOT NULL DEFAULT '',
        backup_path TEXT NOT NULL DEFAULT '',
        extern_path TEXT NOT NULL DEFAULT '',
        launch_path TEXT NOT NULL DEFAULT '',
        network_nat TEXT NOT NULL DEFAULT '',
        network_pub TEXT NOT NULL DEFAULT '',
        extend_data TEXT NOT NULL DEFAULT '{}',
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
        updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    // Router integration and port planning arrived after the first
    // deployments; these ALTERs are the tolerated-duplicate path.
    "ALTER TABLE hs_config ADD COLUMN i_kuai_addr TEXT NOT NULL DEFAULT ''",
    "ALTER TABLE hs_config ADD COLUMN i_kuai_user TEXT NOT NULL DEFAULT ''",
    "ALTER TABLE hs_config ADD COLUMN i_kuai_pass TEXT NOT NULL DEFAULT ''",
    "ALTER TABLE hs_config ADD COLUMN ports_start INTEGER NOT NULL DEFAULT 0",
    "ALTER TABLE hs_config ADD COLUMN ports_close INTEGER NOT NULL DEFAULT 0",
    "ALTER TABLE hs_config ADD COLUMN remote_port INTEGER NOT NULL DEFAULT 0",
    "ALTER TABLE hs_config ADD COLUMN system_maps TEXT NOT NULL DEFAULT '{}'",
    "ALTER TABLE hs_config ADD COLUMN public_addr TEXT NOT NULL DEFAULT '[]'",
    // Host status history ring.
    r#"
    CREATE TABLE IF NOT EXISTS hs_status (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        hs_name TEXT NOT NULL,
        status_data TEXT NOT NULL,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    // Guest desired configuration.
    r#"
    CREATE TABLE IF NOT EXISTS vm_saving (
        hs_name TEXT NOT NULL,
        vm_uuid TEXT NOT NULL,
        vm_config TEXT NOT NULL,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
        PRIMARY KEY (hs_name, vm_uuid)
    )
    "#,
    // Guest status history, one row per guest holding the JSON ring.
    r#"
    CREATE TABLE IF NOT EXISTS vm_status (
        hs_name TEXT NOT NULL,
        vm_uuid TEXT NOT NULL,
        status_data TEXT NOT NULL,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
        PRIMARY KEY (hs_name, vm_uuid)
    )
    "#,
    // Long-running task descriptors.
    r#"
    CREATE TABLE IF NOT EXISTS vm_tasker (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        hs_name TEXT NOT NULL,
        task_data TEXT NOT NULL,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    // Operation log; hs_name NULL marks controller-global entries.
    r#"
    CREATE TABLE IF NOT EXISTS hs_logger (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        hs_name TEXT,
        log_level TEXT NOT NULL DEFAULT 'INFO',
        log_data TEXT NOT NULL,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_hs_status_name ON hs_status(hs_name)",
    "CREATE INDEX IF NOT EXISTS idx_vm_tasker_name ON vm_tasker(hs_name)",
    "CREATE INDEX IF NOT EXISTS idx_hs_logger_name ON hs_logger(hs_name, created_at)",
];
