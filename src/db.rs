use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite, SqliteConnection};
use anyhow::Result;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::domain::fortune::{clamp_luck, Fortune};

pub type DbPool = Pool<Sqlite>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("luck record already exists for {user_id} on {date}")]
    DuplicateKey { user_id: String, date: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct LuckRecord {
    pub id: i64,
    pub user_id: String,
    pub date: String,
    pub luck_value: i64,
    pub fortune_text: String,
    pub color: String,
    pub advice_do: String,
    pub advice_dont: String,
}

const RECORD_COLUMNS: &str =
    "id, user_id, date, luck_value, fortune_text, color, advice_do, advice_dont";

/// Opens the store and makes sure both tables exist. Safe to call on every start.
pub async fn init_db(db_path: &str) -> Result<DbPool> {
    let pool = if db_path == ":memory:" {
        // Every connection to :memory: is its own database, so keep exactly one alive.
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(SqliteConnectOptions::from_str("sqlite::memory:")?)
            .await?
    } else {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);

        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?
    };

    create_schema(&pool).await?;

    Ok(pool)
}

async fn create_schema(pool: &DbPool) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS luck_records (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          user_id TEXT NOT NULL,
          date TEXT NOT NULL,
          luck_value INTEGER NOT NULL,
          fortune_text TEXT NOT NULL,
          color TEXT NOT NULL,
          advice_do TEXT NOT NULL,
          advice_dont TEXT NOT NULL,
          UNIQUE (user_id, date)
        );
        "#
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS luck_steals (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          stealer_id TEXT NOT NULL,
          target_id TEXT NOT NULL,
          date TEXT NOT NULL
        );
        "#
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_luck_records_date ON luck_records (date, luck_value)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_luck_steals_stealer ON luck_steals (stealer_id, date)")
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn get_record(conn: &mut SqliteConnection, user_id: &str, date: &str) -> Result<Option<LuckRecord>, StoreError> {
    let sql = format!("SELECT {RECORD_COLUMNS} FROM luck_records WHERE user_id = ? AND date = ?");
    let row = sqlx::query_as::<_, LuckRecord>(&sql)
        .bind(user_id)
        .bind(date)
        .fetch_optional(conn)
        .await?;
    Ok(row)
}

/// Fails with `DuplicateKey` when the user already has a record for `date`.
pub async fn insert_record(conn: &mut SqliteConnection, user_id: &str, date: &str, fortune: &Fortune) -> Result<LuckRecord, StoreError> {
    let sql = format!(
        "INSERT INTO luck_records (user_id, date, luck_value, fortune_text, color, advice_do, advice_dont) \
         VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING {RECORD_COLUMNS}"
    );
    let result = sqlx::query_as::<_, LuckRecord>(&sql)
        .bind(user_id)
        .bind(date)
        .bind(clamp_luck(fortune.luck_value))
        .bind(fortune.omen.as_str())
        .bind(fortune.color)
        .bind(fortune.advice_do)
        .bind(fortune.advice_dont)
        .fetch_one(conn)
        .await;

    match result {
        Ok(record) => Ok(record),
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(StoreError::DuplicateKey {
            user_id: user_id.to_string(),
            date: date.to_string(),
        }),
        Err(e) => Err(e.into()),
    }
}

/// Newest first.
pub async fn list_by_user(conn: &mut SqliteConnection, user_id: &str) -> Result<Vec<LuckRecord>, StoreError> {
    let sql = format!("SELECT {RECORD_COLUMNS} FROM luck_records WHERE user_id = ? ORDER BY date DESC, id DESC");
    let rows = sqlx::query_as::<_, LuckRecord>(&sql)
        .bind(user_id)
        .fetch_all(conn)
        .await?;
    Ok(rows)
}

pub async fn delete_record(conn: &mut SqliteConnection, user_id: &str, date: &str) -> Result<bool, StoreError> {
    let result = sqlx::query("DELETE FROM luck_records WHERE user_id = ? AND date = ?")
        .bind(user_id)
        .bind(date)
        .execute(conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn delete_all(conn: &mut SqliteConnection, user_id: &str) -> Result<u64, StoreError> {
    let result = sqlx::query("DELETE FROM luck_records WHERE user_id = ?")
        .bind(user_id)
        .execute(conn)
        .await?;
    Ok(result.rows_affected())
}

/// Highest value first; equal values keep insertion order.
pub async fn rank_for_date(conn: &mut SqliteConnection, date: &str) -> Result<Vec<LuckRecord>, StoreError> {
    let sql = format!("SELECT {RECORD_COLUMNS} FROM luck_records WHERE date = ? ORDER BY luck_value DESC, id ASC");
    let rows = sqlx::query_as::<_, LuckRecord>(&sql)
        .bind(date)
        .fetch_all(conn)
        .await?;
    Ok(rows)
}

/// Writes `new_value` clamped into 0..=100. Returns the number of rows touched.
pub async fn update_value(conn: &mut SqliteConnection, user_id: &str, date: &str, new_value: i64) -> Result<u64, StoreError> {
    let result = sqlx::query("UPDATE luck_records SET luck_value = ? WHERE user_id = ? AND date = ?")
        .bind(clamp_luck(new_value))
        .bind(user_id)
        .bind(date)
        .execute(conn)
        .await?;
    Ok(result.rows_affected())
}

pub async fn has_stolen(conn: &mut SqliteConnection, stealer_id: &str, date: &str) -> Result<bool, StoreError> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM luck_steals WHERE stealer_id = ? AND date = ? LIMIT 1")
        .bind(stealer_id)
        .bind(date)
        .fetch_optional(conn)
        .await?;
    Ok(row.is_some())
}

pub async fn record_steal(conn: &mut SqliteConnection, stealer_id: &str, target_id: &str, date: &str) -> Result<i64, StoreError> {
    let result = sqlx::query("INSERT INTO luck_steals (stealer_id, target_id, date) VALUES (?, ?, ?)")
        .bind(stealer_id)
        .bind(target_id)
        .bind(date)
        .execute(conn)
        .await?;
    Ok(result.last_insert_rowid())
}

/// `BEGIN IMMEDIATE` on a pooled connection: SQLite's write lock is taken up front,
/// so concurrent writers queue behind it.
///
/// Dropped without `commit` or `rollback` (early return, cancelled future), the
/// connection is rolled back on a spawned task before it goes back to the pool.
/// Without a runtime to spawn on, the connection is closed instead.
pub struct ImmediateTx {
    conn: Option<PoolConnection<Sqlite>>,
}

impl ImmediateTx {
    pub async fn begin(pool: &DbPool) -> Result<Self, StoreError> {
        let mut tx = ImmediateTx { conn: Some(pool.acquire().await?) };
        sqlx::query("BEGIN IMMEDIATE").execute(tx.conn()?).await?;
        Ok(tx)
    }

    pub fn conn(&mut self) -> Result<&mut SqliteConnection, StoreError> {
        self.conn
            .as_deref_mut()
            .ok_or(StoreError::Database(sqlx::Error::PoolClosed))
    }

    pub async fn commit(mut self) -> Result<(), StoreError> {
        sqlx::query("COMMIT").execute(self.conn()?).await?;
        self.conn.take();
        Ok(())
    }

    pub async fn rollback(mut self) -> Result<(), StoreError> {
        sqlx::query("ROLLBACK").execute(self.conn()?).await?;
        self.conn.take();
        Ok(())
    }
}

impl Drop for ImmediateTx {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    match sqlx::query("ROLLBACK").execute(&mut *conn).await {
                        Ok(_) => {}
                        // Cancelled before BEGIN reached the connection.
                        Err(sqlx::Error::Database(e)) if e.message().contains("no transaction is active") => {}
                        Err(e) => {
                            tracing::debug!(error = ?e, "Rollback of abandoned transaction failed, closing connection");
                            conn.close_on_drop();
                        }
                    }
                });
            }
            Err(_) => conn.close_on_drop(),
        }
    }
}
