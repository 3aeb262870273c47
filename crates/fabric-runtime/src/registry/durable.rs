//! Durable registry variant backed by SQLite (sqlx).
//!
//! Persists agents, their capabilities, discovered tools, health-check
//! history, and call audit logs. The full manifest JSON is kept alongside
//! the normalized columns so permissive (unknown-field-preserving)
//! round-trips survive storage; the normalized tables drive queries.
//!
//! Timestamps are stored as unix milliseconds so monotonicity comparisons
//! happen in SQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::info;

use fabric_kernel::error::{FabricError, FabricResult};
use fabric_kernel::manifest::{AgentManifest, AgentStatus};

use super::{stable_order, AgentFilter, CapabilityHit, RegistryStore, StatusCounts};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS agents (
        agent_id      TEXT PRIMARY KEY,
        display_name  TEXT NOT NULL,
        version       TEXT NOT NULL,
        description   TEXT NOT NULL DEFAULT '',
        runtime       TEXT NOT NULL,
        transport     TEXT NOT NULL,
        endpoint_uri  TEXT NOT NULL,
        tags          TEXT NOT NULL DEFAULT '[]',
        trust_tier    TEXT NOT NULL,
        status        TEXT NOT NULL,
        manifest_json TEXT NOT NULL,
        last_seen_at  INTEGER,
        created_at    INTEGER NOT NULL,
        updated_at    INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS capabilities (
        id             INTEGER PRIMARY KEY AUTOINCREMENT,
        agent_id       TEXT NOT NULL REFERENCES agents(agent_id) ON DELETE CASCADE,
        name           TEXT NOT NULL,
        description    TEXT NOT NULL DEFAULT '',
        streaming      INTEGER NOT NULL DEFAULT 0,
        modalities     TEXT NOT NULL DEFAULT '[\"text\"]',
        input_schema   TEXT,
        output_schema  TEXT,
        max_timeout_ms INTEGER NOT NULL DEFAULT 60000,
        UNIQUE(agent_id, name)
    )",
    "CREATE INDEX IF NOT EXISTS idx_capabilities_name ON capabilities(name)",
    "CREATE TABLE IF NOT EXISTS tools (
        tool_id      TEXT PRIMARY KEY,
        category     TEXT NOT NULL,
        provider     TEXT NOT NULL,
        capabilities TEXT NOT NULL DEFAULT '{}',
        enabled      INTEGER NOT NULL DEFAULT 1,
        updated_at   INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS health_checks (
        id         INTEGER PRIMARY KEY AUTOINCREMENT,
        agent_id   TEXT NOT NULL,
        status     TEXT NOT NULL,
        latency_ms INTEGER NOT NULL,
        checked_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS call_logs (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        trace_id     TEXT NOT NULL,
        target_type  TEXT NOT NULL,
        target_id    TEXT NOT NULL,
        request      TEXT NOT NULL,
        response     TEXT NOT NULL,
        started_at   INTEGER NOT NULL,
        completed_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_call_logs_trace ON call_logs(trace_id)",
];

fn db_err(err: sqlx::Error) -> FabricError {
    FabricError::internal(format!("registry database error: {err}"))
}

fn json_err(err: serde_json::Error) -> FabricError {
    FabricError::internal(format!("registry serialization error: {err}"))
}

fn millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub struct DurableRegistry {
    pool: SqlitePool,
}

impl DurableRegistry {
    /// Open (and create if missing) the registry database at `url`, e.g.
    /// `sqlite://fabric.db` or `sqlite::memory:`.
    pub async fn connect(url: &str) -> FabricResult<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(db_err)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(db_err)?;

        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await.map_err(db_err)?;
        }
        info!(url = %url, "durable registry ready");
        Ok(Self { pool })
    }

    fn manifest_from_row(row: &sqlx::sqlite::SqliteRow) -> FabricResult<AgentManifest> {
        let json: String = row.try_get("manifest_json").map_err(db_err)?;
        let mut manifest: AgentManifest = serde_json::from_str(&json).map_err(json_err)?;
        let status: String = row.try_get("status").map_err(db_err)?;
        manifest.status = status.parse()?;
        let last_seen: Option<i64> = row.try_get("last_seen_at").map_err(db_err)?;
        manifest.last_seen_at = last_seen.and_then(DateTime::from_timestamp_millis);
        Ok(manifest)
    }

    /// Sync the discovered tool set into the `tools` table. Called once at
    /// startup after plugin discovery.
    pub async fn sync_tool(
        &self,
        tool_id: &str,
        category: &str,
        provider: &str,
        capabilities: &serde_json::Value,
    ) -> FabricResult<()> {
        sqlx::query(
            "INSERT INTO tools (tool_id, category, provider, capabilities, enabled, updated_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5)
             ON CONFLICT(tool_id) DO UPDATE SET
                 category = excluded.category,
                 provider = excluded.provider,
                 capabilities = excluded.capabilities,
                 updated_at = excluded.updated_at",
        )
        .bind(tool_id)
        .bind(category)
        .bind(provider)
        .bind(capabilities.to_string())
        .bind(millis(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// Recent health-check rows for an agent, newest first.
    pub async fn health_history(
        &self,
        agent_id: &str,
        limit: u32,
    ) -> FabricResult<Vec<(AgentStatus, u64, DateTime<Utc>)>> {
        let rows = sqlx::query(
            "SELECT status, latency_ms, checked_at FROM health_checks
             WHERE agent_id = ?1 ORDER BY checked_at DESC LIMIT ?2",
        )
        .bind(agent_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let status: String = row.try_get("status").map_err(db_err)?;
            let latency: i64 = row.try_get("latency_ms").map_err(db_err)?;
            let checked: i64 = row.try_get("checked_at").map_err(db_err)?;
            out.push((
                status.parse()?,
                latency as u64,
                DateTime::from_timestamp_millis(checked).unwrap_or_else(Utc::now),
            ));
        }
        Ok(out)
    }
}

#[async_trait]
impl RegistryStore for DurableRegistry {
    async fn register(&self, manifest: AgentManifest) -> FabricResult<()> {
        manifest.validate()?;
        let now = millis(Utc::now());
        let manifest_json = serde_json::to_string(&manifest).map_err(json_err)?;
        let tags = serde_json::to_string(&manifest.tags).map_err(json_err)?;

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            "INSERT INTO agents (agent_id, display_name, version, description, runtime,
                                 transport, endpoint_uri, tags, trust_tier, status,
                                 manifest_json, last_seen_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)
             ON CONFLICT(agent_id) DO UPDATE SET
                 display_name = excluded.display_name,
                 version = excluded.version,
                 description = excluded.description,
                 runtime = excluded.runtime,
                 transport = excluded.transport,
                 endpoint_uri = excluded.endpoint_uri,
                 tags = excluded.tags,
                 trust_tier = excluded.trust_tier,
                 status = excluded.status,
                 manifest_json = excluded.manifest_json,
                 updated_at = excluded.updated_at",
        )
        .bind(&manifest.agent_id)
        .bind(&manifest.display_name)
        .bind(&manifest.version)
        .bind(&manifest.description)
        .bind(manifest.runtime_kind.adapter_name())
        .bind(format!("{:?}", manifest.endpoint.transport).to_lowercase())
        .bind(&manifest.endpoint.uri)
        .bind(tags)
        .bind(format!("{:?}", manifest.trust_tier).to_lowercase())
        .bind(manifest.status.as_str())
        .bind(manifest_json)
        .bind(manifest.last_seen_at.map(millis))
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        sqlx::query("DELETE FROM capabilities WHERE agent_id = ?1")
            .bind(&manifest.agent_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        for cap in &manifest.capabilities {
            sqlx::query(
                "INSERT INTO capabilities (agent_id, name, description, streaming, modalities,
                                           input_schema, output_schema, max_timeout_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )
            .bind(&manifest.agent_id)
            .bind(&cap.name)
            .bind(&cap.description)
            .bind(cap.streaming as i64)
            .bind(serde_json::to_string(&cap.modalities).map_err(json_err)?)
            .bind(cap.input_schema.as_ref().map(|s| s.to_string()))
            .bind(cap.output_schema.as_ref().map(|s| s.to_string()))
            .bind(cap.max_timeout_ms as i64)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        info!(agent_id = %manifest.agent_id, "registered agent (durable)");
        Ok(())
    }

    async fn deregister(&self, agent_id: &str) -> FabricResult<bool> {
        sqlx::query("DELETE FROM capabilities WHERE agent_id = ?1")
            .bind(agent_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        let result = sqlx::query("DELETE FROM agents WHERE agent_id = ?1")
            .bind(agent_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, agent_id: &str) -> FabricResult<Option<AgentManifest>> {
        let row = sqlx::query("SELECT manifest_json, status, last_seen_at FROM agents WHERE agent_id = ?1")
            .bind(agent_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(Self::manifest_from_row).transpose()
    }

    async fn list(&self, filter: &AgentFilter) -> FabricResult<Vec<AgentManifest>> {
        let rows = sqlx::query("SELECT manifest_json, status, last_seen_at FROM agents")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        let mut agents = Vec::with_capacity(rows.len());
        for row in &rows {
            let manifest = Self::manifest_from_row(row)?;
            if filter.matches(&manifest) {
                agents.push(manifest);
            }
        }
        stable_order(&mut agents);
        Ok(agents)
    }

    async fn find_by_capability(&self, capability: &str) -> FabricResult<Vec<CapabilityHit>> {
        let rows = sqlx::query(
            "SELECT a.manifest_json, a.status, a.last_seen_at
             FROM agents a JOIN capabilities c ON c.agent_id = a.agent_id
             WHERE c.name = ?1",
        )
        .bind(capability)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in &rows {
            candidates.push(Self::manifest_from_row(row)?);
        }
        stable_order(&mut candidates);
        Ok(candidates
            .into_iter()
            .enumerate()
            .map(|(i, m)| CapabilityHit {
                agent_id: m.agent_id,
                priority: i as u32 + 1,
            })
            .collect())
    }

    async fn update_status(
        &self,
        agent_id: &str,
        status: AgentStatus,
        last_seen_at: DateTime<Utc>,
    ) -> FabricResult<()> {
        // The WHERE clause keeps the transition monotone in last_seen_at.
        sqlx::query(
            "UPDATE agents SET status = ?1, last_seen_at = ?2, updated_at = ?3
             WHERE agent_id = ?4 AND (last_seen_at IS NULL OR last_seen_at <= ?2)",
        )
        .bind(status.as_str())
        .bind(millis(last_seen_at))
        .bind(millis(Utc::now()))
        .bind(agent_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn heartbeat(&self, agent_id: &str) -> FabricResult<()> {
        sqlx::query("UPDATE agents SET last_seen_at = ?1 WHERE agent_id = ?2")
            .bind(millis(Utc::now()))
            .bind(agent_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn status_counts(&self) -> FabricResult<StatusCounts> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM agents GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        let mut counts = StatusCounts::default();
        for row in rows {
            let status: String = row.try_get("status").map_err(db_err)?;
            let n: i64 = row.try_get("n").map_err(db_err)?;
            match status.parse::<AgentStatus>()? {
                AgentStatus::Online => counts.online = n as usize,
                AgentStatus::Degraded => counts.degraded = n as usize,
                AgentStatus::Offline => counts.offline = n as usize,
                AgentStatus::Unknown => counts.unknown = n as usize,
            }
        }
        Ok(counts)
    }

    async fn record_health_check(
        &self,
        agent_id: &str,
        status: AgentStatus,
        latency_ms: u64,
    ) -> FabricResult<()> {
        sqlx::query(
            "INSERT INTO health_checks (agent_id, status, latency_ms, checked_at)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(agent_id)
        .bind(status.as_str())
        .bind(latency_ms as i64)
        .bind(millis(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn record_call(
        &self,
        trace_id: &str,
        target_type: &str,
        target_id: &str,
        request: &serde_json::Value,
        response: &serde_json::Value,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> FabricResult<()> {
        sqlx::query(
            "INSERT INTO call_logs (trace_id, target_type, target_id, request, response,
                                    started_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(trace_id)
        .bind(target_type)
        .bind(target_id)
        .bind(request.to_string())
        .bind(response.to_string())
        .bind(millis(started_at))
        .bind(millis(completed_at))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}
