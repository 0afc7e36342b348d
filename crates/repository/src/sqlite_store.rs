use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Executor, Row, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;
use tcc_config::RepositoryConfig;
use tcc_types::{Invocation, Participant, TransType, Transaction, TransactionStatus};
use tracing::{debug, info};

use crate::serializer::{decode_value, encode_value, Serializer};
use crate::store::{StoreError, TransactionStore};

// ═══════════════════════════════════════════════════════════════════════════
// SQLITE STORE IMPLEMENTATION
// ═══════════════════════════════════════════════════════════════════════════

/// SQLite-backed store. Invocation descriptors are kept as serializer-encoded
/// BLOBs, so a serializer must be bound before [`TransactionStore::init`].
#[derive(Default)]
pub struct SqliteStore {
    pool: Option<SqlitePool>,
    serializer: Option<Arc<dyn Serializer>>,
}

impl SqliteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `serializer`, open `config.url` and run migrations
    pub async fn connect(
        config: &RepositoryConfig,
        serializer: Arc<dyn Serializer>,
    ) -> Result<Self, StoreError> {
        let mut store = Self::new();
        store.set_serializer(serializer);
        store.init(config).await?;
        Ok(store)
    }

    fn pool(&self) -> Result<&SqlitePool, StoreError> {
        self.pool
            .as_ref()
            .ok_or_else(|| StoreError::NotInitialized("sqlite pool is not open".to_string()))
    }

    fn serializer(&self) -> Result<&dyn Serializer, StoreError> {
        self.serializer.as_deref().ok_or_else(|| {
            StoreError::NotInitialized("serializer must be bound before use".to_string())
        })
    }

    /// Run database migrations
    async fn run_migrations(pool: &SqlitePool) -> Result<(), StoreError> {
        pool.execute(include_str!("../migrations/001_create_transactions.sql"))
            .await
            .map_err(database_error)?;

        pool.execute(include_str!("../migrations/002_create_participants.sql"))
            .await
            .map_err(database_error)?;

        Ok(())
    }

    /// Decode every stored descriptor with the bound serializer, returning the
    /// number of participants checked
    async fn verify_integrity(&self) -> Result<usize, StoreError> {
        let serializer = self.serializer()?;
        let rows = sqlx::query(
            "SELECT participant_id, confirm_invocation, cancel_invocation FROM tcc_participants",
        )
        .fetch_all(self.pool()?)
        .await
        .map_err(database_error)?;

        for row in &rows {
            let participant_id: String = row.get("participant_id");
            for column in ["confirm_invocation", "cancel_invocation"] {
                decode_invocation(serializer, row.get(column)).map_err(|e| {
                    StoreError::SerializationError(format!(
                        "participant {participant_id} {column}: {e}"
                    ))
                })?;
            }
        }

        Ok(rows.len())
    }

    fn encode_invocation(
        &self,
        invocation: Option<&Invocation>,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        let serializer = self.serializer()?;
        invocation
            .map(|inv| {
                encode_value(serializer, inv)
                    .map_err(|e| StoreError::SerializationError(e.to_string()))
            })
            .transpose()
    }

    fn row_to_participant(&self, row: &SqliteRow) -> Result<Participant, StoreError> {
        let serializer = self.serializer()?;

        Ok(Participant {
            participant_id: row.get("participant_id"),
            trans_id: row.get("trans_id"),
            trans_type: parse_trans_type(row.get("trans_type"))?,
            status: parse_status(row.get("status"))?,
            retry: row.get::<i64, _>("retry") as u32,
            confirm: decode_invocation(serializer, row.get("confirm_invocation"))?,
            cancel: decode_invocation(serializer, row.get("cancel_invocation"))?,
            created_at: row.get::<i64, _>("created_at") as u64,
            updated_at: row.get::<i64, _>("updated_at") as u64,
        })
    }

    /// Convert database row to Transaction
    fn row_to_transaction(row: &SqliteRow) -> Result<Transaction, StoreError> {
        Ok(Transaction {
            trans_id: row.get("trans_id"),
            status: parse_status(row.get("status"))?,
            trans_type: parse_trans_type(row.get("trans_type"))?,
            retry: row.get::<i64, _>("retry") as u32,
            created_at: row.get::<i64, _>("created_at") as u64,
            updated_at: row.get::<i64, _>("updated_at") as u64,
        })
    }

    /// Status currently stored for a transaction, used to explain a rejected update
    async fn stored_status(&self, trans_id: &str) -> Result<Option<TransactionStatus>, StoreError> {
        Ok(self.find_transaction(trans_id).await?.map(|t| t.status))
    }
}

#[async_trait]
impl TransactionStore for SqliteStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn set_serializer(&mut self, serializer: Arc<dyn Serializer>) {
        self.serializer = Some(serializer);
    }

    async fn init(&mut self, config: &RepositoryConfig) -> Result<(), StoreError> {
        let serializer_name = self.serializer()?.name();

        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| StoreError::ConnectionError(e.to_string()))?
            .create_if_missing(true);

        // Every connection to an in-memory database opens a separate database
        let in_memory = config.url.contains(":memory:") || config.url.contains("mode=memory");
        let max_connections = if in_memory { 1 } else { config.max_connections };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::ConnectionError(e.to_string()))?;

        Self::run_migrations(&pool).await?;
        self.pool = Some(pool);

        let checked = self.verify_integrity().await?;
        info!(
            url = %config.url,
            serializer = serializer_name,
            participants = checked,
            "SQLite store initialized"
        );

        Ok(())
    }

    async fn create_transaction(&self, transaction: &Transaction) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO tcc_transactions (
                trans_id, status, trans_type, retry, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&transaction.trans_id)
        .bind(transaction.status.as_str())
        .bind(transaction.trans_type.as_str())
        .bind(transaction.retry as i64)
        .bind(transaction.created_at as i64)
        .bind(transaction.updated_at as i64)
        .execute(self.pool()?)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(StoreError::DuplicateId(transaction.trans_id.clone()))
            }
            Err(e) => Err(database_error(e)),
        }
    }

    async fn create_participant(&self, participant: &Participant) -> Result<(), StoreError> {
        let confirm = self.encode_invocation(participant.confirm.as_ref())?;
        let cancel = self.encode_invocation(participant.cancel.as_ref())?;

        let result = sqlx::query(
            r#"
            INSERT INTO tcc_participants (
                participant_id, trans_id, trans_type, status, retry,
                confirm_invocation, cancel_invocation, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&participant.participant_id)
        .bind(&participant.trans_id)
        .bind(participant.trans_type.as_str())
        .bind(participant.status.as_str())
        .bind(participant.retry as i64)
        .bind(confirm)
        .bind(cancel)
        .bind(participant.created_at as i64)
        .bind(participant.updated_at as i64)
        .execute(self.pool()?)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(StoreError::DuplicateId(participant.participant_id.clone()))
            }
            Err(e) => Err(database_error(e)),
        }
    }

    async fn update_status(
        &self,
        trans_id: &str,
        status: TransactionStatus,
        updated_at: u64,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE tcc_transactions
            SET status = ?, updated_at = ?
            WHERE trans_id = ? AND (status NOT IN (?, ?) OR status = ?)
            "#,
        )
        .bind(status.as_str())
        .bind(updated_at as i64)
        .bind(trans_id)
        .bind(TransactionStatus::Success.as_str())
        .bind(TransactionStatus::Failure.as_str())
        .bind(status.as_str())
        .execute(self.pool()?)
        .await
        .map_err(database_error)?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        match self.stored_status(trans_id).await? {
            Some(from) => Err(StoreError::InvalidTransition {
                id: trans_id.to_string(),
                from,
                to: status,
            }),
            None => Err(StoreError::NotFound(trans_id.to_string())),
        }
    }

    async fn update_participant(&self, participant: &Participant) -> Result<(), StoreError> {
        let confirm = self.encode_invocation(participant.confirm.as_ref())?;
        let cancel = self.encode_invocation(participant.cancel.as_ref())?;

        let result = sqlx::query(
            r#"
            UPDATE tcc_participants
            SET status = ?, retry = ?, confirm_invocation = ?, cancel_invocation = ?, updated_at = ?
            WHERE participant_id = ? AND (status NOT IN (?, ?) OR status = ?)
            "#,
        )
        .bind(participant.status.as_str())
        .bind(participant.retry as i64)
        .bind(confirm)
        .bind(cancel)
        .bind(participant.updated_at as i64)
        .bind(&participant.participant_id)
        .bind(TransactionStatus::Success.as_str())
        .bind(TransactionStatus::Failure.as_str())
        .bind(participant.status.as_str())
        .execute(self.pool()?)
        .await
        .map_err(database_error)?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        let stored: Option<String> =
            sqlx::query_scalar("SELECT status FROM tcc_participants WHERE participant_id = ?")
                .bind(&participant.participant_id)
                .fetch_optional(self.pool()?)
                .await
                .map_err(database_error)?;

        match stored {
            Some(from) => Err(StoreError::InvalidTransition {
                id: participant.participant_id.clone(),
                from: parse_status(from)?,
                to: participant.status,
            }),
            None => Err(StoreError::NotFound(participant.participant_id.clone())),
        }
    }

    async fn remove_transaction(&self, trans_id: &str) -> Result<(), StoreError> {
        let mut tx = self.pool()?.begin().await.map_err(database_error)?;

        sqlx::query("DELETE FROM tcc_participants WHERE trans_id = ?")
            .bind(trans_id)
            .execute(&mut *tx)
            .await
            .map_err(database_error)?;

        sqlx::query("DELETE FROM tcc_transactions WHERE trans_id = ?")
            .bind(trans_id)
            .execute(&mut *tx)
            .await
            .map_err(database_error)?;

        tx.commit().await.map_err(database_error)
    }

    async fn remove_participant(&self, participant_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM tcc_participants WHERE participant_id = ?")
            .bind(participant_id)
            .execute(self.pool()?)
            .await
            .map_err(database_error)?;

        Ok(())
    }

    async fn find_transaction(&self, trans_id: &str) -> Result<Option<Transaction>, StoreError> {
        let row = sqlx::query("SELECT * FROM tcc_transactions WHERE trans_id = ?")
            .bind(trans_id)
            .fetch_optional(self.pool()?)
            .await
            .map_err(database_error)?;

        match row {
            Some(row) => Ok(Some(Self::row_to_transaction(&row)?)),
            None => Ok(None),
        }
    }

    async fn find_participants(&self, trans_id: &str) -> Result<Vec<Participant>, StoreError> {
        // rowid follows insertion, which is enlistment order
        let rows = sqlx::query("SELECT * FROM tcc_participants WHERE trans_id = ? ORDER BY rowid ASC")
            .bind(trans_id)
            .fetch_all(self.pool()?)
            .await
            .map_err(database_error)?;

        rows.iter()
            .map(|row| self.row_to_participant(row))
            .collect()
    }

    async fn find_overdue(
        &self,
        statuses: &[TransactionStatus],
        threshold: u64,
        limit: usize,
    ) -> Result<Vec<Transaction>, StoreError> {
        if statuses.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT * FROM tcc_transactions WHERE status IN ({}) AND updated_at < ? \
             ORDER BY updated_at ASC, trans_id ASC LIMIT ?",
            placeholders(statuses.len())
        );

        let mut query = sqlx::query(&sql);
        for status in statuses {
            query = query.bind(status.as_str());
        }

        let rows = query
            .bind(threshold as i64)
            .bind(limit as i64)
            .fetch_all(self.pool()?)
            .await
            .map_err(database_error)?;

        rows.iter().map(Self::row_to_transaction).collect()
    }

    async fn claim_for_recovery(
        &self,
        trans_id: &str,
        expected_retry: u32,
        now: u64,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE tcc_transactions
            SET retry = retry + 1, updated_at = ?
            WHERE trans_id = ? AND retry = ? AND status IN (?, ?, ?)
            "#,
        )
        .bind(now as i64)
        .bind(trans_id)
        .bind(expected_retry as i64)
        .bind(TransactionStatus::Begin.as_str())
        .bind(TransactionStatus::Confirming.as_str())
        .bind(TransactionStatus::Cancelling.as_str())
        .execute(self.pool()?)
        .await
        .map_err(database_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn remove_terminal_before(
        &self,
        threshold: u64,
        limit: usize,
    ) -> Result<Vec<String>, StoreError> {
        let mut tx = self.pool()?.begin().await.map_err(database_error)?;

        let ids: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT trans_id FROM tcc_transactions
            WHERE status IN (?, ?) AND updated_at < ?
            ORDER BY updated_at ASC, trans_id ASC
            LIMIT ?
            "#,
        )
        .bind(TransactionStatus::Success.as_str())
        .bind(TransactionStatus::Failure.as_str())
        .bind(threshold as i64)
        .bind(limit as i64)
        .fetch_all(&mut *tx)
        .await
        .map_err(database_error)?;

        for id in &ids {
            sqlx::query("DELETE FROM tcc_participants WHERE trans_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(database_error)?;

            sqlx::query("DELETE FROM tcc_transactions WHERE trans_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(database_error)?;
        }

        tx.commit().await.map_err(database_error)?;
        debug!(removed = ids.len(), "Removed expired transactions");

        Ok(ids)
    }

    async fn close(&self) -> Result<(), StoreError> {
        if let Some(pool) = &self.pool {
            pool.close().await;
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// HELPER FUNCTIONS
// ═══════════════════════════════════════════════════════════════════════════

fn database_error(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::ConnectionError(e.to_string())
        }
        other => StoreError::DatabaseError(other.to_string()),
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn parse_status(s: String) -> Result<TransactionStatus, StoreError> {
    s.parse()
        .map_err(|e: tcc_types::ParseError| StoreError::SerializationError(e.to_string()))
}

fn parse_trans_type(s: String) -> Result<TransType, StoreError> {
    s.parse()
        .map_err(|e: tcc_types::ParseError| StoreError::SerializationError(e.to_string()))
}

fn decode_invocation(
    serializer: &dyn Serializer,
    bytes: Option<Vec<u8>>,
) -> Result<Option<Invocation>, StoreError> {
    bytes
        .map(|b| {
            decode_value(serializer, &b).map_err(|e| StoreError::SerializationError(e.to_string()))
        })
        .transpose()
}
