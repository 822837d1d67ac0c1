//! PostgreSQL implementation of [`MessageLog`].
//!
//! Table and column names come from [`LogSchema`] and are validated as plain
//! identifiers before any statement is built. Values always travel as bind
//! parameters. The pool opens connections on first checkout, not at build
//! time.

use async_trait::async_trait;
use clinichat_core::{ClinichatError, ClinichatResult, DbConfig, LogSchema, StorageError};
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime, Timeouts};
use thiserror::Error;
use tokio_postgres::{NoTls, Row};

use super::log::{LogStats, MessageLog, MessageRole, MessageRow, SummaryRecord, SUMMARY_ROW_QUERY};

/// PostgreSQL specific failures.
#[derive(Debug, Error)]
pub enum PostgresLogError {
    #[error("Failed to create pool: {0}")]
    CreatePool(#[from] deadpool_postgres::CreatePoolError),

    #[error("Failed to get connection: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("Query failed: {0}")]
    Query(#[from] tokio_postgres::Error),
}

impl From<PostgresLogError> for ClinichatError {
    fn from(err: PostgresLogError) -> Self {
        let tier = "postgres".to_string();
        let storage = match err {
            PostgresLogError::Query(e) => StorageError::QueryFailed {
                tier,
                reason: e.to_string(),
            },
            other => StorageError::TierUnavailable {
                tier,
                reason: other.to_string(),
            },
        };
        ClinichatError::Storage(storage)
    }
}

/// Statements rendered once from the schema.
#[derive(Debug, Clone)]
struct Statements {
    fetch: String,
    insert_summary: String,
    stats: String,
}

impl Statements {
    fn render(s: &LogSchema) -> Self {
        let fetch = format!(
            "SELECT {id}::bigint AS id, {conv}::bigint AS conversation_id, {role}::text AS role, \
             {query}::text AS query, {response}::text AS response, {parent}::bigint AS parent_id, \
             {meta}::jsonb AS meta, {created}::timestamptz AS created_at \
             FROM {table} \
             WHERE {conv} = $1::bigint AND {deleted} IS NULL \
             ORDER BY {id} ASC",
            id = s.id_column,
            conv = s.conversation_column,
            role = s.role_column,
            query = s.query_column,
            response = s.response_column,
            parent = s.parent_column,
            meta = s.meta_column,
            created = s.created_at_column,
            deleted = s.deleted_at_column,
            table = s.table,
        );

        let insert_summary = format!(
            "INSERT INTO {table} ({conv}, {parent}, {role}, {query}, {response}, {meta}, {created}) \
             VALUES ($1::bigint, 0, 'assistant', $2::text, $3::text, $4::jsonb, $5::timestamptz)",
            table = s.table,
            conv = s.conversation_column,
            parent = s.parent_column,
            role = s.role_column,
            query = s.query_column,
            response = s.response_column,
            meta = s.meta_column,
            created = s.created_at_column,
        );

        let stats = format!(
            "SELECT COUNT(DISTINCT {conv})::bigint AS conversations, \
             COUNT(*) FILTER (WHERE {role} = 'assistant')::bigint AS assistant_rows, \
             COUNT(*) FILTER (WHERE {role} = 'user')::bigint AS user_rows, \
             COUNT(*) FILTER (WHERE ({meta}::jsonb ->> 'is_summary') = 'true')::bigint AS summary_rows, \
             COALESCE(SUM(LENGTH(COALESCE({query}::text, '')) + LENGTH(COALESCE({response}::text, ''))), 0)::bigint AS total_bytes, \
             MIN({created})::timestamptz AS oldest, \
             MAX({created})::timestamptz AS newest \
             FROM {table} WHERE {deleted} IS NULL",
            conv = s.conversation_column,
            role = s.role_column,
            meta = s.meta_column,
            query = s.query_column,
            response = s.response_column,
            created = s.created_at_column,
            deleted = s.deleted_at_column,
            table = s.table,
        );

        Self {
            fetch,
            insert_summary,
            stats,
        }
    }
}

/// Build a connection pool from configuration.
pub fn create_pool(config: &DbConfig) -> ClinichatResult<Pool> {
    let mut cfg = Config::new();
    cfg.host = Some(config.host.clone());
    cfg.port = Some(config.port);
    cfg.dbname = Some(config.dbname.clone());
    cfg.user = Some(config.user.clone());
    cfg.password = Some(config.password.clone());
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });
    let mut timeouts = Timeouts::new();
    timeouts.wait = Some(config.timeout);
    timeouts.create = Some(config.timeout);
    timeouts.recycle = Some(config.timeout);
    let mut pool_config = PoolConfig::new(config.max_size.max(1));
    pool_config.timeouts = timeouts;
    cfg.pool = Some(pool_config);

    let pool = cfg
        .create_pool(Some(Runtime::Tokio1), NoTls)
        .map_err(PostgresLogError::from)?;
    Ok(pool)
}

/// Message log read from a PostgreSQL table.
pub struct PostgresMessageLog {
    pool: Pool,
    table: String,
    statements: Statements,
}

impl PostgresMessageLog {
    /// Wrap an existing pool. The schema must already be validated.
    pub fn new(pool: Pool, schema: &LogSchema) -> ClinichatResult<Self> {
        schema.validate()?;
        Ok(Self {
            pool,
            table: schema.table.clone(),
            statements: Statements::render(schema),
        })
    }

    pub fn from_config(db: &DbConfig, schema: &LogSchema) -> ClinichatResult<Self> {
        Self::new(create_pool(db)?, schema)
    }

    /// Get the current pool size for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    async fn get_conn(&self) -> Result<deadpool_postgres::Object, PostgresLogError> {
        Ok(self.pool.get().await?)
    }

    fn row_from(row: &Row) -> Result<MessageRow, PostgresLogError> {
        let role: Option<String> = row.try_get("role")?;
        Ok(MessageRow {
            id: row.try_get("id")?,
            conversation_id: row.try_get("conversation_id")?,
            role: MessageRole::parse(role.as_deref().unwrap_or_default()),
            query: row.try_get("query")?,
            response: row.try_get("response")?,
            parent_id: row.try_get("parent_id")?,
            meta: row.try_get("meta")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl MessageLog for PostgresMessageLog {
    async fn fetch_rows(&self, conversation_id: i64) -> ClinichatResult<Vec<MessageRow>> {
        let conn = self.get_conn().await?;
        let rows = conn
            .query(self.statements.fetch.as_str(), &[&conversation_id])
            .await
            .map_err(PostgresLogError::from)?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(Self::row_from(row)?);
        }
        Ok(out)
    }

    async fn insert_summary(&self, summary: &SummaryRecord) -> ClinichatResult<()> {
        let conn = self.get_conn().await?;
        let meta = summary.meta();
        conn.execute(
            self.statements.insert_summary.as_str(),
            &[
                &summary.conversation_id,
                &SUMMARY_ROW_QUERY,
                &summary.text,
                &meta,
                &summary.created_at,
            ],
        )
        .await
        .map_err(PostgresLogError::from)?;
        Ok(())
    }

    async fn stats(&self) -> ClinichatResult<LogStats> {
        let conn = self.get_conn().await?;
        let row = conn
            .query_one(self.statements.stats.as_str(), &[])
            .await
            .map_err(PostgresLogError::from)?;

        let count = |name: &str| -> Result<u64, PostgresLogError> {
            let value: i64 = row.try_get(name)?;
            Ok(value.max(0) as u64)
        };
        Ok(LogStats {
            conversations: count("conversations")?,
            assistant_rows: count("assistant_rows")?,
            user_rows: count("user_rows")?,
            summary_rows: count("summary_rows")?,
            total_bytes: count("total_bytes")?,
            oldest: row.try_get("oldest").map_err(PostgresLogError::from)?,
            newest: row.try_get("newest").map_err(PostgresLogError::from)?,
        })
    }

    fn describe(&self) -> String {
        self.table.clone()
    }

    async fn close(&self) {
        self.pool.close();
        tracing::info!(table = %self.table, "postgres pool closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_statement_uses_schema_names() {
        let schema = LogSchema {
            table: "chat.messages".to_string(),
            conversation_column: "thread_id".to_string(),
            ..Default::default()
        };
        let statements = Statements::render(&schema);
        assert!(statements.fetch.contains("FROM chat.messages"));
        assert!(statements.fetch.contains("WHERE thread_id = $1::bigint"));
        assert!(statements.fetch.contains("deleted_at IS NULL"));
        assert!(statements.fetch.contains("ORDER BY id ASC"));
    }

    #[test]
    fn test_insert_statement_binds_values() {
        let statements = Statements::render(&LogSchema::default());
        assert!(statements.insert_summary.starts_with("INSERT INTO chatbot_messages"));
        assert!(statements.insert_summary.contains("$4::jsonb"));
        assert!(!statements.insert_summary.contains("auto_summarizer"));
    }

    #[test]
    fn test_stats_statement_excludes_deleted() {
        let statements = Statements::render(&LogSchema::default());
        assert!(statements.stats.contains("WHERE deleted_at IS NULL"));
    }

    #[test]
    fn test_invalid_schema_rejected_before_sql() {
        let schema = LogSchema {
            table: "x; DROP TABLE y".to_string(),
            ..Default::default()
        };
        let pool = create_pool(&DbConfig::default()).unwrap();
        assert!(PostgresMessageLog::new(pool, &schema).is_err());
    }

    #[test]
    fn test_pool_created_lazily() {
        let log = PostgresMessageLog::from_config(
            &DbConfig {
                host: "127.0.0.1".to_string(),
                port: 1,
                ..Default::default()
            },
            &LogSchema::default(),
        )
        .unwrap();
        assert_eq!(log.pool_size(), 0);
        assert_eq!(log.describe(), "chatbot_messages");
    }
}
