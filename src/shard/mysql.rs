//! MySQL Resource Manager
//!
//! One long-lived connection per shard, opened at startup and reused by every
//! transfer. XA branch statements go over the text protocol (MySQL does not
//! accept `XA ...` as a prepared statement); account reads and writes are
//! parameterized.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{Connection, Executor, MySqlConnection};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{LocalAccountId, ResourceManager, ShardError, ShardIndex};
use crate::config::MySqlShardConfig;
use crate::transfer::types::GlobalTxnId;

/// Statements for one shard's account table
struct Statements {
    exists: String,
    balance_exceeds: String,
    debit: String,
    credit: String,
}

impl Statements {
    fn new(config: &MySqlShardConfig) -> Self {
        let (table, id, balance) = (&config.table, &config.id_column, &config.balance_column);
        Self {
            exists: format!("SELECT COUNT(*) = 1 FROM {table} WHERE {id} = ?"),
            balance_exceeds: format!("SELECT {balance} > ? FROM {table} WHERE {id} = ?"),
            debit: format!("UPDATE {table} SET {balance} = ({balance} - ?) WHERE {id} = ?"),
            credit: format!("UPDATE {table} SET {balance} = ({balance} + ?) WHERE {id} = ?"),
        }
    }
}

/// XA-capable MySQL shard
pub struct MySqlShard {
    name: String,
    conn: Mutex<MySqlConnection>,
    sql: Statements,
}

impl MySqlShard {
    pub async fn connect(index: ShardIndex, config: &MySqlShardConfig) -> Result<Self, ShardError> {
        let conn = MySqlConnection::connect(&config.url).await?;
        info!(shard = index, table = %config.table, "MySQL shard connected");
        Ok(Self {
            name: format!("mysql-{}", index),
            conn: Mutex::new(conn),
            sql: Statements::new(config),
        })
    }

    async fn xa(&self, verb: &str, xid: &GlobalTxnId) -> Result<(), ShardError> {
        // ULID text is Crockford base32, safe to quote as a literal
        let sql = format!("XA {} '{}'", verb, xid);
        debug!(shard = %self.name, sql = %sql, "XA statement");
        let mut conn = self.conn.lock().await;
        let conn: &mut MySqlConnection = &mut conn;
        conn.execute(sqlx::raw_sql(&sql)).await?;
        Ok(())
    }

    async fn update(
        &self,
        sql: &str,
        account: LocalAccountId,
        amount: Decimal,
    ) -> Result<(), ShardError> {
        let mut conn = self.conn.lock().await;
        sqlx::query(sql)
            .bind(amount)
            .bind(account)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ResourceManager for MySqlShard {
    fn name(&self) -> &str {
        &self.name
    }

    async fn begin_branch(&self, xid: &GlobalTxnId) -> Result<(), ShardError> {
        self.xa("START", xid).await
    }

    async fn end_branch(&self, xid: &GlobalTxnId) -> Result<(), ShardError> {
        self.xa("END", xid).await
    }

    async fn prepare_branch(&self, xid: &GlobalTxnId) -> Result<(), ShardError> {
        self.xa("PREPARE", xid).await
    }

    async fn commit_branch(&self, xid: &GlobalTxnId) -> Result<(), ShardError> {
        self.xa("COMMIT", xid).await
    }

    async fn rollback_branch(&self, xid: &GlobalTxnId) -> Result<(), ShardError> {
        self.xa("ROLLBACK", xid).await
    }

    async fn account_exists(&self, account: LocalAccountId) -> Result<bool, ShardError> {
        let mut conn = self.conn.lock().await;
        let exists: i64 = sqlx::query_scalar(&self.sql.exists)
            .bind(account)
            .fetch_one(&mut *conn)
            .await?;
        Ok(exists == 1)
    }

    async fn balance_exceeds(
        &self,
        account: LocalAccountId,
        amount: Decimal,
    ) -> Result<bool, ShardError> {
        let mut conn = self.conn.lock().await;
        let exceeds: Option<Option<i64>> = sqlx::query_scalar(&self.sql.balance_exceeds)
            .bind(amount)
            .bind(account)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(exceeds.flatten() == Some(1))
    }

    async fn debit(&self, account: LocalAccountId, amount: Decimal) -> Result<(), ShardError> {
        self.update(&self.sql.debit, account, amount).await
    }

    async fn credit(&self, account: LocalAccountId, amount: Decimal) -> Result<(), ShardError> {
        self.update(&self.sql.credit, account, amount).await
    }
}
