//! PostgreSQL store. Records are kept as JSONB documents with a few indexed
//! columns; the schema lives in `migrations/` and is applied on connect.

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::info;

use super::BusStore;
use crate::error::Result;
use crate::models::{AbandonmentRecord, EventEnvelope, IntegrationRule, Module, SyncLogEntry};

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect and bring the schema up to date
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: PgPool) -> Result<Self> {
        MIGRATOR.run(&pool).await?;
        info!("Bus schema migrations applied");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl BusStore for PostgresStore {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn save_module(&self, module: &Module) -> Result<()> {
        sqlx::query(
            "INSERT INTO bus_modules (module_id, document, registered_at, updated_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (module_id)
             DO UPDATE SET document = EXCLUDED.document, updated_at = EXCLUDED.updated_at",
        )
        .bind(&module.id)
        .bind(Json(module))
        .bind(module.registered_at)
        .bind(module.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_modules(&self) -> Result<Vec<Module>> {
        let rows = sqlx::query_scalar::<_, Json<Module>>(
            "SELECT document FROM bus_modules ORDER BY registered_at",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|Json(module)| module).collect())
    }

    async fn save_rule(&self, rule: &IntegrationRule) -> Result<()> {
        sqlx::query(
            "INSERT INTO bus_rules (rule_id, sequence, document, updated_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (rule_id)
             DO UPDATE SET sequence = EXCLUDED.sequence,
                           document = EXCLUDED.document,
                           updated_at = EXCLUDED.updated_at",
        )
        .bind(&rule.id)
        .bind(rule.sequence as i64)
        .bind(Json(rule))
        .bind(rule.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_rules(&self) -> Result<Vec<IntegrationRule>> {
        let rows = sqlx::query_scalar::<_, Json<IntegrationRule>>(
            "SELECT document FROM bus_rules ORDER BY sequence",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|Json(rule)| rule).collect())
    }

    async fn append_sync_entry(&self, entry: &SyncLogEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO bus_sync_log
                (entry_id, envelope_id, source_id, target_id, outcome, recorded_at, document)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(entry.id)
        .bind(entry.envelope_id)
        .bind(&entry.source_id)
        .bind(&entry.target_id)
        .bind(entry.outcome.to_string())
        .bind(entry.timestamp)
        .bind(Json(entry))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_sync_entries(&self) -> Result<Vec<SyncLogEntry>> {
        let rows = sqlx::query_scalar::<_, Json<SyncLogEntry>>(
            "SELECT document FROM bus_sync_log ORDER BY position",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|Json(entry)| entry).collect())
    }

    async fn append_abandonment(&self, record: &AbandonmentRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO bus_abandonments (record_id, envelope_id, recorded_at, document)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(record.id)
        .bind(record.envelope_id)
        .bind(record.timestamp)
        .bind(Json(record))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_abandonments(&self) -> Result<Vec<AbandonmentRecord>> {
        let rows = sqlx::query_scalar::<_, Json<AbandonmentRecord>>(
            "SELECT document FROM bus_abandonments ORDER BY position",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|Json(record)| record).collect())
    }

    async fn journal_envelope(&self, envelope: &EventEnvelope) -> Result<()> {
        sqlx::query(
            "INSERT INTO bus_envelopes
                (envelope_id, state, terminal, created_at, updated_at, document)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (envelope_id)
             DO UPDATE SET state = EXCLUDED.state,
                           terminal = EXCLUDED.terminal,
                           updated_at = EXCLUDED.updated_at,
                           document = EXCLUDED.document",
        )
        .bind(envelope.id)
        .bind(envelope.state.to_string())
        .bind(envelope.is_terminal())
        .bind(envelope.created_at)
        .bind(envelope.updated_at)
        .bind(Json(envelope))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_unfinished_envelopes(&self) -> Result<Vec<EventEnvelope>> {
        let rows = sqlx::query_scalar::<_, Json<EventEnvelope>>(
            "SELECT document FROM bus_envelopes WHERE terminal = FALSE ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|Json(envelope)| envelope).collect())
    }
}
