use super::traits::{
    Aggregate, AggregateSeries, DatapointBatch, NewSeries, SeriesFilter, SeriesInfo, StoreError,
    TimeSeriesStore,
};
use crate::signal::types::SamplePoint;
use async_trait::async_trait;
use duckdb::Connection;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Check if a process with the given PID is still running
fn is_process_running(pid: u32) -> bool {
    #[cfg(unix)]
    {
        std::process::Command::new("ps")
            .arg("-p")
            .arg(pid.to_string())
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        true
    }
}

/// Extract the holder PID from a DuckDB lock error ("... (PID 12345) ...")
fn lock_holder_pid(error_msg: &str) -> Option<u32> {
    let start = error_msg.find("(PID ")? + "(PID ".len();
    let end = error_msg[start..].find(')')?;
    error_msg[start..start + end].parse().ok()
}

fn remove_stale_lock_files(db_path: &Path) -> std::io::Result<()> {
    for suffix in ["wal", "lock"] {
        let stale = PathBuf::from(format!("{}.{}", db_path.display(), suffix));
        if stale.exists() {
            std::fs::remove_file(&stale)?;
            tracing::info!(path = %stale.display(), "Removed stale database file");
        }
    }
    Ok(())
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, StoreError> {
    conn.lock()
        .map_err(|_| StoreError::Database("connection mutex poisoned".to_string()))
}

fn join_error(e: tokio::task::JoinError) -> StoreError {
    StoreError::Database(format!("Task join error: {}", e))
}

/// DuckDB-backed time-series store.
///
/// Holds series metadata, raw and computed datapoints, and the state marker
/// tables that upstream extractors advance as data lands.
pub struct DuckDbStore {
    conn: Arc<Mutex<Connection>>,
}

impl DuckDbStore {
    /// Open (or create) a database file, clearing lock files left by a dead process.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Unavailable(format!("{}: {}", parent.display(), e)))?;
            }
        }

        let conn = match Connection::open(path) {
            Ok(conn) => conn,
            Err(e) => {
                let error_msg = e.to_string();
                let stale_pid = lock_holder_pid(&error_msg).filter(|pid| !is_process_running(*pid));
                match stale_pid {
                    Some(pid) if error_msg.contains("Could not set lock") => {
                        tracing::warn!(pid, "Database lock held by a dead process, removing stale lock files");
                        remove_stale_lock_files(path)
                            .map_err(|io_err| StoreError::Unavailable(io_err.to_string()))?;
                        Connection::open(path)?
                    }
                    _ => return Err(e.into()),
                }
            }
        };

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Advance a state marker row, as an upstream extractor would.
    pub async fn record_high_water(&self, table: &str, key: &str, high: i64) -> Result<(), StoreError> {
        let conn = self.conn.clone();
        let table = table.to_string();
        let key = key.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            conn.execute(
                "INSERT OR REPLACE INTO state_markers (table_name, row_key, high) VALUES (?, ?, ?)",
                duckdb::params![table, key, high],
            )?;
            Ok::<(), StoreError>(())
        })
        .await
        .map_err(join_error)?
    }
}

#[async_trait]
impl TimeSeriesStore for DuckDbStore {
    async fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;

            conn.execute(
                "CREATE TABLE IF NOT EXISTS series (
                    external_id VARCHAR PRIMARY KEY,
                    name VARCHAR NOT NULL,
                    data_set_id VARCHAR,
                    metadata VARCHAR NOT NULL
                )",
                [],
            )?;

            conn.execute(
                "CREATE TABLE IF NOT EXISTS datapoints (
                    external_id VARCHAR NOT NULL,
                    ts BIGINT NOT NULL,
                    value DOUBLE NOT NULL,
                    PRIMARY KEY (external_id, ts)
                )",
                [],
            )?;

            conn.execute(
                "CREATE TABLE IF NOT EXISTS state_markers (
                    table_name VARCHAR NOT NULL,
                    row_key VARCHAR NOT NULL,
                    high BIGINT NOT NULL,
                    PRIMARY KEY (table_name, row_key)
                )",
                [],
            )?;

            Ok::<(), StoreError>(())
        })
        .await
        .map_err(join_error)?
    }

    async fn list_series(&self, filter: &SeriesFilter) -> Result<Vec<SeriesInfo>, StoreError> {
        let conn = self.conn.clone();
        let filter = filter.clone();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let mut stmt = conn.prepare(
                "SELECT external_id, name, data_set_id, metadata FROM series ORDER BY external_id",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?;

            let mut matched = Vec::new();
            for row in rows {
                let (external_id, name, data_set_id, metadata_json) = row?;
                let metadata: BTreeMap<String, String> = serde_json::from_str(&metadata_json)?;
                let info = SeriesInfo {
                    external_id,
                    name,
                    data_set_id,
                    metadata,
                };
                if filter.matches(&info) {
                    matched.push(info);
                }
            }
            Ok(matched)
        })
        .await
        .map_err(join_error)?
    }

    async fn read_high_water(&self, table: &str) -> Result<Option<i64>, StoreError> {
        let conn = self.conn.clone();
        let table = table.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let mut stmt = conn.prepare("SELECT MAX(high) FROM state_markers WHERE table_name = ?")?;
            let mut rows = stmt.query(duckdb::params![table])?;
            match rows.next()? {
                Some(row) => Ok(row.get::<_, Option<i64>>(0)?),
                None => Ok(None),
            }
        })
        .await
        .map_err(join_error)?
    }

    async fn retrieve_aggregates(
        &self,
        external_ids: &[String],
        start: i64,
        end: i64,
        granularity: i64,
        aggregate: Aggregate,
    ) -> Result<Vec<AggregateSeries>, StoreError> {
        let conn = self.conn.clone();
        let external_ids = external_ids.to_vec();
        let sql = match aggregate {
            Aggregate::Sum => {
                "SELECT ts - ((ts - ?) % ?) AS bucket, SUM(value)
                 FROM datapoints
                 WHERE external_id = ? AND ts >= ? AND ts < ?
                 GROUP BY bucket
                 ORDER BY bucket"
            }
        };

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let mut stmt = conn.prepare(sql)?;

            let mut result = Vec::with_capacity(external_ids.len());
            for external_id in external_ids {
                let rows = stmt.query_map(
                    duckdb::params![start, granularity, external_id, start, end],
                    |row| Ok(SamplePoint::new(row.get::<_, i64>(0)?, row.get::<_, f64>(1)?)),
                )?;
                let mut points = Vec::new();
                for row in rows {
                    points.push(row?);
                }
                result.push(AggregateSeries { external_id, points });
            }
            Ok(result)
        })
        .await
        .map_err(join_error)?
    }

    async fn retrieve_latest_before(
        &self,
        external_id: &str,
        before: i64,
    ) -> Result<Option<SamplePoint>, StoreError> {
        let conn = self.conn.clone();
        let external_id = external_id.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let mut stmt = conn.prepare(
                "SELECT ts, value FROM datapoints
                 WHERE external_id = ? AND ts < ?
                 ORDER BY ts DESC
                 LIMIT 1",
            )?;
            let mut rows = stmt.query(duckdb::params![external_id, before])?;
            match rows.next()? {
                Some(row) => Ok(Some(SamplePoint::new(row.get(0)?, row.get(1)?))),
                None => Ok(None),
            }
        })
        .await
        .map_err(join_error)?
    }

    async fn create_series(&self, series: &[NewSeries]) -> Result<(), StoreError> {
        if series.is_empty() {
            return Ok(());
        }

        let conn = self.conn.clone();
        let series = series.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut conn = lock(&conn)?;
            let tx = conn.transaction()?;

            let existing = existing_ids(&tx, series.iter().map(|s| s.external_id.as_str()))?;
            if !existing.is_empty() {
                let mut ids: Vec<String> = existing.into_iter().collect();
                ids.sort();
                return Err(StoreError::AlreadyExists(ids));
            }

            {
                let mut stmt = tx.prepare(
                    "INSERT INTO series (external_id, name, data_set_id, metadata) VALUES (?, ?, ?, ?)",
                )?;
                for new_series in &series {
                    let metadata_json = serde_json::to_string(&new_series.metadata)?;
                    stmt.execute(duckdb::params![
                        new_series.external_id,
                        new_series.name,
                        new_series.data_set_id,
                        metadata_json,
                    ])?;
                }
            }

            tx.commit()?;
            Ok::<(), StoreError>(())
        })
        .await
        .map_err(join_error)?
    }

    async fn insert_datapoints(&self, batches: &[DatapointBatch]) -> Result<(), StoreError> {
        if batches.is_empty() {
            return Ok(());
        }

        let conn = self.conn.clone();
        let batches = batches.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut conn = lock(&conn)?;
            let tx = conn.transaction()?;

            let requested: HashSet<&str> = batches.iter().map(|b| b.external_id.as_str()).collect();
            let existing = existing_ids(&tx, requested.iter().copied())?;
            let mut missing: Vec<String> = requested
                .into_iter()
                .filter(|id| !existing.contains(*id))
                .map(str::to_string)
                .collect();
            if !missing.is_empty() {
                missing.sort();
                return Err(StoreError::NotFound(missing));
            }

            {
                let mut stmt = tx.prepare(
                    "INSERT OR REPLACE INTO datapoints (external_id, ts, value) VALUES (?, ?, ?)",
                )?;
                for batch in &batches {
                    for point in &batch.datapoints {
                        stmt.execute(duckdb::params![batch.external_id, point.timestamp, point.value])?;
                    }
                }
            }

            tx.commit()?;
            Ok::<(), StoreError>(())
        })
        .await
        .map_err(join_error)?
    }
}

fn existing_ids<'a>(
    conn: &Connection,
    ids: impl Iterator<Item = &'a str>,
) -> Result<HashSet<String>, StoreError> {
    let mut stmt = conn.prepare("SELECT external_id FROM series WHERE external_id = ?")?;
    let mut found = HashSet::new();
    for id in ids {
        let mut rows = stmt.query(duckdb::params![id])?;
        if rows.next()?.is_some() {
            found.insert(id.to_string());
        }
    }
    Ok(found)
}
