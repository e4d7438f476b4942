//! SQLite storage backend implementation
//!
//! This module provides a SQLite-based implementation of the `Storage` trait.
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Better concurrency for reads during writes
//! - **Connection pooling**: Pullers and the event center write concurrently
//! - **Migrations**: Automatic schema versioning with sqlx
//!
//! Structured values (lease counters, address lists, setting values) are
//! stored as JSON text next to their key columns.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument};

use super::backend::Storage;
use super::error::{StorageError, StorageResult};
use crate::model::{
    App, AppType, Daemon, Event, EventLevel, HostReservation, LeaseCounters, LeaseStatsRecord,
    Machine, NewEvent, Relations, Setting, SettingValue,
};

/// SQLite storage backend
pub struct SqliteBackend {
    pool: Pool<Sqlite>,
}

impl SqliteBackend {
    /// Create a new SQLite backend
    ///
    /// This will:
    /// 1. Create the database file if it doesn't exist
    /// 2. Run migrations to create tables
    /// 3. Configure SQLite for WAL mode and foreign keys
    ///
    /// ## Example
    ///
    /// ```no_run
    /// # use fleetwatch::storage::sqlite::SqliteBackend;
    /// # async fn example() -> anyhow::Result<()> {
    /// let backend = SqliteBackend::new("./fleet.db").await?;
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite backend at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("database migrations complete");

        Ok(Self { pool })
    }

    fn timestamp_to_millis(dt: &DateTime<Utc>) -> i64 {
        dt.timestamp_millis()
    }

    fn millis_to_timestamp(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
    }

    fn port(value: i64) -> StorageResult<u16> {
        u16::try_from(value)
            .map_err(|_| StorageError::SerializationError(format!("invalid port {value}")))
    }

    fn event_from_row(row: &SqliteRow) -> StorageResult<Event> {
        let level: i64 = row.try_get("level")?;
        Ok(Event {
            id: row.try_get("id")?,
            created_at: Self::millis_to_timestamp(row.try_get("created_at")?),
            level: EventLevel::from_i64(level).ok_or_else(|| {
                StorageError::SerializationError(format!("invalid event level {level}"))
            })?,
            text: row.try_get("text")?,
            relations: Relations {
                machine: row.try_get("machine_id")?,
                app: row.try_get("app_id")?,
                daemon: row.try_get("daemon_id")?,
                subnet: row.try_get("subnet_id")?,
            },
        })
    }
}

#[async_trait]
impl Storage for SqliteBackend {
    #[instrument(skip(self, machine), fields(address = %machine.address))]
    async fn add_machine(&self, mut machine: Machine) -> StorageResult<Machine> {
        let result =
            sqlx::query("INSERT INTO machines (address, agent_port, hostname) VALUES (?, ?, ?)")
                .bind(&machine.address)
                .bind(i64::from(machine.agent_port))
                .bind(&machine.hostname)
                .execute(&self.pool)
                .await?;

        machine.id = result.last_insert_rowid();
        debug!("added machine {}", machine.id);
        Ok(machine)
    }

    async fn list_machines(&self) -> StorageResult<Vec<Machine>> {
        let rows = sqlx::query("SELECT id, address, agent_port, hostname FROM machines ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                Ok(Machine {
                    id: row.try_get("id")?,
                    address: row.try_get("address")?,
                    agent_port: Self::port(row.try_get("agent_port")?)?,
                    hostname: row.try_get("hostname")?,
                })
            })
            .collect()
    }

    #[instrument(skip(self, app), fields(machine_id = app.machine.id))]
    async fn add_app(&self, mut app: App) -> StorageResult<App> {
        let mut tx = self.pool.begin().await?;

        let machine_row =
            sqlx::query("SELECT id, address, agent_port, hostname FROM machines WHERE id = ?")
                .bind(app.machine.id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| StorageError::NotFound(format!("machine {}", app.machine.id)))?;

        app.machine = Machine {
            id: machine_row.try_get("id")?,
            address: machine_row.try_get("address")?,
            agent_port: Self::port(machine_row.try_get("agent_port")?)?,
            hostname: machine_row.try_get("hostname")?,
        };

        let result = sqlx::query(
            r#"
            INSERT INTO apps (machine_id, app_type, ctrl_address, ctrl_port, version)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(app.machine.id)
        .bind(app.app_type.to_string())
        .bind(&app.ctrl_address)
        .bind(i64::from(app.ctrl_port))
        .bind(&app.version)
        .execute(&mut *tx)
        .await?;
        app.id = result.last_insert_rowid();

        for daemon in &mut app.daemons {
            let result = sqlx::query("INSERT INTO daemons (app_id, name, active) VALUES (?, ?, ?)")
                .bind(app.id)
                .bind(&daemon.name)
                .bind(daemon.active)
                .execute(&mut *tx)
                .await?;
            daemon.id = result.last_insert_rowid();
            daemon.app_id = app.id;
        }

        tx.commit().await?;
        debug!("added app {} with {} daemons", app.id, app.daemons.len());
        Ok(app)
    }

    #[instrument(skip(self))]
    async fn list_apps_by_type(&self, app_type: AppType) -> StorageResult<Vec<App>> {
        let daemon_rows = sqlx::query(
            r#"
            SELECT d.id, d.app_id, d.name, d.active
            FROM daemons d JOIN apps a ON a.id = d.app_id
            WHERE a.app_type = ?
            ORDER BY d.id
            "#,
        )
        .bind(app_type.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut daemons: HashMap<i64, Vec<Daemon>> = HashMap::new();
        for row in daemon_rows {
            let daemon = Daemon {
                id: row.try_get("id")?,
                app_id: row.try_get("app_id")?,
                name: row.try_get("name")?,
                active: row.try_get("active")?,
            };
            daemons.entry(daemon.app_id).or_default().push(daemon);
        }

        let app_rows = sqlx::query(
            r#"
            SELECT a.id, a.app_type, a.ctrl_address, a.ctrl_port, a.version,
                   m.id AS machine_id, m.address, m.agent_port, m.hostname
            FROM apps a JOIN machines m ON m.id = a.machine_id
            WHERE a.app_type = ?
            ORDER BY a.id
            "#,
        )
        .bind(app_type.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut apps = Vec::with_capacity(app_rows.len());
        for row in app_rows {
            let id: i64 = row.try_get("id")?;
            let app_type_str: String = row.try_get("app_type")?;
            apps.push(App {
                id,
                machine: Machine {
                    id: row.try_get("machine_id")?,
                    address: row.try_get("address")?,
                    agent_port: Self::port(row.try_get("agent_port")?)?,
                    hostname: row.try_get("hostname")?,
                },
                app_type: AppType::from_str(&app_type_str)
                    .map_err(StorageError::SerializationError)?,
                ctrl_address: row.try_get("ctrl_address")?,
                ctrl_port: Self::port(row.try_get("ctrl_port")?)?,
                version: row.try_get("version")?,
                daemons: daemons.remove(&id).unwrap_or_default(),
            });
        }

        debug!("listed {} {} apps", apps.len(), app_type);
        Ok(apps)
    }

    #[instrument(skip(self, records), fields(count = records.len()))]
    async fn upsert_lease_stats(
        &self,
        app_id: i64,
        records: Vec<LeaseStatsRecord>,
    ) -> StorageResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for record in records {
            let counters = serde_json::to_string(&record.counters)?;
            sqlx::query(
                r#"
                INSERT INTO lease_stats (app_id, family, subnet_id, counters, collected_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT (app_id, family, subnet_id) DO UPDATE SET
                    counters = excluded.counters,
                    collected_at = excluded.collected_at
                "#,
            )
            .bind(app_id)
            .bind(record.counters.family().to_string())
            .bind(record.subnet_id)
            .bind(counters)
            .bind(Self::timestamp_to_millis(&record.collected_at))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_lease_stats(&self, app_id: i64) -> StorageResult<Vec<LeaseStatsRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT subnet_id, counters, collected_at
            FROM lease_stats
            WHERE app_id = ?
            ORDER BY family, subnet_id
            "#,
        )
        .bind(app_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let counters: String = row.try_get("counters")?;
                Ok(LeaseStatsRecord {
                    subnet_id: row.try_get("subnet_id")?,
                    counters: serde_json::from_str::<LeaseCounters>(&counters)?,
                    collected_at: Self::millis_to_timestamp(row.try_get("collected_at")?),
                })
            })
            .collect()
    }

    #[instrument(skip(self, hosts), fields(count = hosts.len()))]
    async fn upsert_host_reservations(
        &self,
        app_id: i64,
        hosts: Vec<HostReservation>,
    ) -> StorageResult<()> {
        if hosts.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for host in hosts {
            sqlx::query(
                r#"
                INSERT INTO host_reservations (
                    app_id, subnet_id, identifier_type, identifier,
                    ip_addresses, prefixes, hostname
                )
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (app_id, subnet_id, identifier_type, identifier) DO UPDATE SET
                    ip_addresses = excluded.ip_addresses,
                    prefixes = excluded.prefixes,
                    hostname = excluded.hostname
                "#,
            )
            .bind(app_id)
            .bind(host.subnet_id)
            .bind(&host.identifier_type)
            .bind(&host.identifier)
            .bind(serde_json::to_string(&host.ip_addresses)?)
            .bind(serde_json::to_string(&host.prefixes)?)
            .bind(&host.hostname)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_host_reservations(&self, app_id: i64) -> StorageResult<Vec<HostReservation>> {
        let rows = sqlx::query(
            r#"
            SELECT subnet_id, identifier_type, identifier, ip_addresses, prefixes, hostname
            FROM host_reservations
            WHERE app_id = ?
            ORDER BY subnet_id, identifier
            "#,
        )
        .bind(app_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let ip_addresses: String = row.try_get("ip_addresses")?;
                let prefixes: String = row.try_get("prefixes")?;
                Ok(HostReservation {
                    subnet_id: row.try_get("subnet_id")?,
                    identifier_type: row.try_get("identifier_type")?,
                    identifier: row.try_get("identifier")?,
                    ip_addresses: serde_json::from_str(&ip_addresses)?,
                    prefixes: serde_json::from_str(&prefixes)?,
                    hostname: row.try_get("hostname")?,
                })
            })
            .collect()
    }

    #[instrument(skip(self, event), fields(level = %event.level))]
    async fn add_event(&self, event: NewEvent) -> StorageResult<Event> {
        let created_at = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO events (
                created_at, level, text, machine_id, app_id, daemon_id, subnet_id
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Self::timestamp_to_millis(&created_at))
        .bind(event.level.as_i64())
        .bind(&event.text)
        .bind(event.relations.machine)
        .bind(event.relations.app)
        .bind(event.relations.daemon)
        .bind(event.relations.subnet)
        .execute(&self.pool)
        .await?;

        // Millisecond precision is what comes back on read
        let created_at = Self::millis_to_timestamp(Self::timestamp_to_millis(&created_at));
        Ok(event.persisted(result.last_insert_rowid(), created_at))
    }

    #[instrument(skip(self))]
    async fn get_events(&self, offset: usize, limit: usize) -> StorageResult<(Vec<Event>, usize)> {
        let (total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM events")
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query(
            r#"
            SELECT id, created_at, level, text, machine_id, app_id, daemon_id, subnet_id
            FROM events
            ORDER BY created_at DESC, id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        let events = rows
            .iter()
            .map(Self::event_from_row)
            .collect::<StorageResult<Vec<_>>>()?;

        Ok((events, total as usize))
    }

    async fn get_setting(&self, name: &str) -> StorageResult<Option<Setting>> {
        let row = sqlx::query("SELECT name, value FROM settings WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            let value: String = row.try_get("value")?;
            Ok(Setting {
                name: row.try_get("name")?,
                value: serde_json::from_str::<SettingValue>(&value)?,
            })
        })
        .transpose()
    }

    async fn list_settings(&self) -> StorageResult<Vec<Setting>> {
        let rows = sqlx::query("SELECT name, value FROM settings ORDER BY name")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                let value: String = row.try_get("value")?;
                Ok(Setting {
                    name: row.try_get("name")?,
                    value: serde_json::from_str::<SettingValue>(&value)?,
                })
            })
            .collect()
    }

    async fn set_setting(&self, setting: Setting) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (name, value) VALUES (?, ?)
            ON CONFLICT (name) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(&setting.name)
        .bind(serde_json::to_string(&setting.value)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite backend");
        self.pool.close().await;
        Ok(())
    }
}
