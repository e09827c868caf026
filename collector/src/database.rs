use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{prelude::FromRow, Pool, Sqlite, SqliteConnection, Transaction};
use tokio::time::Instant;

use crate::error::Result;
use crate::hashrate::Hashrates;

/// Flattened `getblockstats` result: metric name to first value, plus `coin`.
pub type FlatStats = HashMap<String, serde_json::Value>;

#[derive(Clone)]
pub struct LedgerStore {
    pool: Pool<Sqlite>,
}

#[derive(Serialize, Deserialize, Debug, Clone, FromRow)]
pub struct BlockRow {
    pub coin: String,
    pub height: i64,
    pub hash: String,
    pub time: i64,
    pub difficulty: f64,
    pub work: f64,
}

#[derive(Debug, Clone)]
pub struct CreateBlock {
    pub coin: String,
    pub hash: String,
    pub height: u64,
    pub time: u64,
    pub difficulty: f64,
    pub work: f64,
}

/// Blocks sharing one difficulty value, with their count and latest time.
#[derive(Debug, Clone, Copy, PartialEq, FromRow)]
pub struct BlockGroup {
    pub difficulty: f64,
    pub count: i64,
    pub time: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnType {
    Integer,
    Real,
}

/// (column, getblockstats key, type)
type DetailColumn = (&'static str, &'static str, ColumnType);

const LEGACY_COLUMNS: &[DetailColumn] = &[
    ("avgfee", "avgfee", ColumnType::Integer),
    ("maxfee", "maxfee", ColumnType::Integer),
    ("minfee", "minfee", ColumnType::Integer),
    ("medianfee", "medianfee", ColumnType::Integer),
    ("fee", "totalfee", ColumnType::Integer),
    ("avgfeerate", "avgfeerate", ColumnType::Real),
    ("minfeerate", "minfeerate", ColumnType::Real),
    ("maxfeerate", "maxfeerate", ColumnType::Real),
    ("medianfeerate", "medianfeerate", ColumnType::Real),
    ("inputs", "ins", ColumnType::Integer),
    ("outputs", "outs", ColumnType::Integer),
    ("mediantime", "mediantime", ColumnType::Integer),
    ("reward", "subsidy", ColumnType::Integer),
    ("totalsize", "total_size", ColumnType::Integer),
    ("txs", "txs", ColumnType::Integer),
    ("totalout", "total_out", ColumnType::Integer),
    ("utxoinc", "utxo_increase", ColumnType::Integer),
    ("utxosizeinc", "utxo_size_inc", ColumnType::Integer),
];

const SEGWIT_COLUMNS: &[DetailColumn] = &[
    ("swtotalsize", "swtotal_size", ColumnType::Integer),
    ("swtotalweight", "swtotal_weight", ColumnType::Integer),
    ("swtxs", "swtxs", ColumnType::Integer),
    ("totalweight", "total_weight", ColumnType::Integer),
    ("vavgfeerate", "vavgfeerate", ColumnType::Real),
    ("vminfeerate", "vminfeerate", ColumnType::Real),
    ("vmaxfeerate", "vmaxfeerate", ColumnType::Real),
    ("vmedianfeerate", "vmedianfeerate", ColumnType::Real),
];

/// Column layout of a coin's detail rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailLayout {
    Legacy,
    Segwit,
}

impl DetailLayout {
    pub fn for_segwit(segwit: bool) -> Self {
        if segwit {
            DetailLayout::Segwit
        } else {
            DetailLayout::Legacy
        }
    }

    fn columns(&self) -> Vec<DetailColumn> {
        match self {
            DetailLayout::Legacy => LEGACY_COLUMNS.to_vec(),
            DetailLayout::Segwit => LEGACY_COLUMNS.iter().chain(SEGWIT_COLUMNS).copied().collect(),
        }
    }

    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns().into_iter().map(|(name, _, _)| name).collect()
    }
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS blocks (
        coin        TEXT NOT NULL,
        height      INTEGER NOT NULL,
        hash        TEXT NOT NULL,
        time        INTEGER NOT NULL,
        difficulty  REAL NOT NULL,
        work        REAL NOT NULL,
        PRIMARY KEY (coin, height)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_blocks_coin_time ON blocks (coin, time)",
    r#"
    CREATE TABLE IF NOT EXISTS details (
        coin            TEXT NOT NULL,
        height          INTEGER NOT NULL,
        avgfee          INTEGER,
        maxfee          INTEGER,
        minfee          INTEGER,
        medianfee       INTEGER,
        fee             INTEGER,
        avgfeerate      REAL,
        minfeerate      REAL,
        maxfeerate      REAL,
        medianfeerate   REAL,
        inputs          INTEGER,
        outputs         INTEGER,
        mediantime      INTEGER,
        reward          INTEGER,
        totalsize       INTEGER,
        txs             INTEGER,
        totalout        INTEGER,
        utxoinc         INTEGER,
        utxosizeinc     INTEGER,
        swtotalsize     INTEGER,
        swtotalweight   INTEGER,
        swtxs           INTEGER,
        totalweight     INTEGER,
        vavgfeerate     REAL,
        vminfeerate     REAL,
        vmaxfeerate     REAL,
        vmedianfeerate  REAL,
        PRIMARY KEY (coin, height)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS hashrates (
        coin    TEXT NOT NULL,
        height  INTEGER NOT NULL,
        h3      REAL NOT NULL,
        h6      REAL NOT NULL,
        h12     REAL NOT NULL,
        d1      REAL NOT NULL,
        d3      REAL NOT NULL,
        d7      REAL NOT NULL,
        d30     REAL NOT NULL,
        PRIMARY KEY (coin, height)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS prices (
        coin    TEXT NOT NULL,
        height  INTEGER NOT NULL,
        price   REAL NOT NULL,
        PRIMARY KEY (coin, height)
    )
    "#,
];

impl LedgerStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        LedgerStore { pool }
    }

    /// Open (or create) the database file and make sure the schema exists.
    pub async fn connect(path: &Path, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(60))
            .connect_with(options)
            .await?;

        let store = Self::new(pool);
        store.init_schema().await?;
        Ok(store)
    }

    /// Single-connection in-memory store; the connection is never recycled so
    /// the database lives as long as the pool.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let store = Self::new(pool);
        store.init_schema().await?;
        Ok(store)
    }

    pub async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    /// Height and hash of the highest stored block for `coin`.
    pub async fn get_last_block(&self, coin: &str) -> Result<Option<(u64, String)>> {
        let row: Option<(i64, String)> = sqlx::query_as(
            "SELECT height, hash FROM blocks WHERE coin = ? ORDER BY height DESC LIMIT 1",
        )
        .bind(coin)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(height, hash)| (height as u64, hash)))
    }

    pub async fn get_block(&self, coin: &str, height: u64) -> Result<Option<BlockRow>> {
        let row = sqlx::query_as::<_, BlockRow>(
            "SELECT coin, height, hash, time, difficulty, work FROM blocks WHERE coin = ? AND height = ?",
        )
        .bind(coin)
        .bind(height as i64)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn get_blocks_after(&self, coin: &str, time: u64) -> Result<Vec<BlockRow>> {
        let rows = sqlx::query_as::<_, BlockRow>(
            r#"
            SELECT coin, height, hash, time, difficulty, work
            FROM blocks
            WHERE coin = ? AND time > ?
            ORDER BY height ASC
            "#,
        )
        .bind(coin)
        .bind(time as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Latest block time across all coins.
    pub async fn get_last_time(&self) -> Result<Option<i64>> {
        let time: Option<i64> = sqlx::query_scalar("SELECT MAX(time) FROM blocks")
            .fetch_one(&self.pool)
            .await?;
        Ok(time)
    }

    /// Highest stored height per coin.
    pub async fn get_last_heights(&self) -> Result<HashMap<String, i64>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT coin, MAX(height) FROM blocks GROUP BY coin")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().collect())
    }

    pub async fn get_price(&self, coin: &str, height: u64) -> Result<Option<f64>> {
        let price: Option<f64> =
            sqlx::query_scalar("SELECT price FROM prices WHERE coin = ? AND height = ?")
                .bind(coin)
                .bind(height as i64)
                .fetch_optional(&self.pool)
                .await?;
        Ok(price)
    }

    pub async fn insert_price(&self, coin: &str, height: u64, price: f64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO prices (coin, height, price) VALUES (?, ?, ?)
            ON CONFLICT(coin, height) DO NOTHING
            "#,
        )
        .bind(coin)
        .bind(height as i64)
        .bind(price)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// ==================== Transaction-scoped writes ====================

pub async fn insert_block(conn: &mut SqliteConnection, block: &CreateBlock) -> Result<()> {
    let now = Instant::now();
    sqlx::query(
        r#"
        INSERT INTO blocks (coin, hash, height, time, difficulty, work)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&block.coin)
    .bind(&block.hash)
    .bind(block.height as i64)
    .bind(block.time as i64)
    .bind(block.difficulty)
    .bind(block.work)
    .execute(&mut *conn)
    .await?;

    let elapsed = now.elapsed().as_millis();
    if elapsed >= 1000 {
        tracing::warn!("Long Query: {} block {} inserted in {}ms", block.coin, block.height, elapsed);
    }
    Ok(())
}

/// Time of the oldest stored block for `coin`.
pub async fn get_first_time(conn: &mut SqliteConnection, coin: &str) -> Result<Option<i64>> {
    let time: Option<i64> = sqlx::query_scalar("SELECT MIN(time) FROM blocks WHERE coin = ?")
        .bind(coin)
        .fetch_one(&mut *conn)
        .await?;
    Ok(time)
}

/// Blocks after `time` grouped by difficulty, oldest era first.
pub async fn get_blocks_after_grouped(
    conn: &mut SqliteConnection,
    coin: &str,
    time: i64,
) -> Result<Vec<BlockGroup>> {
    let groups = sqlx::query_as::<_, BlockGroup>(
        r#"
        SELECT difficulty, COUNT(*) AS count, MAX(time) AS time
        FROM blocks
        WHERE coin = ? AND time > ?
        GROUP BY difficulty
        ORDER BY MIN(time) ASC
        "#,
    )
    .bind(coin)
    .bind(time)
    .fetch_all(&mut *conn)
    .await?;

    Ok(groups)
}

pub async fn insert_hashrates(
    conn: &mut SqliteConnection,
    coin: &str,
    height: u64,
    rates: &Hashrates,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO hashrates (coin, height, h3, h6, h12, d1, d3, d7, d30)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(coin)
    .bind(height as i64)
    .bind(rates.h3)
    .bind(rates.h6)
    .bind(rates.h12)
    .bind(rates.d1)
    .bind(rates.d3)
    .bind(rates.d7)
    .bind(rates.d30)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Insert one detail row using `layout`'s columns. Metrics missing from
/// `stats` are stored as NULL.
pub async fn insert_details(
    conn: &mut SqliteConnection,
    height: u64,
    stats: &FlatStats,
    layout: DetailLayout,
) -> Result<()> {
    let columns = layout.columns();
    let names: Vec<&str> = columns.iter().map(|(name, _, _)| *name).collect();
    let placeholders = vec!["?"; columns.len()].join(", ");
    let sql = format!(
        "INSERT INTO details (coin, height, {}) VALUES (?, ?, {})",
        names.join(", "),
        placeholders
    );

    let coin = stats.get("coin").and_then(|v| v.as_str()).unwrap_or_default();
    let mut query = sqlx::query(&sql).bind(coin.to_string()).bind(height as i64);
    for (_, key, typ) in &columns {
        let value = stats.get(*key);
        query = match typ {
            ColumnType::Integer => query.bind(value.and_then(as_integer)),
            ColumnType::Real => query.bind(value.and_then(|v| v.as_f64())),
        };
    }
    query.execute(&mut *conn).await?;
    Ok(())
}

fn as_integer(value: &serde_json::Value) -> Option<i64> {
    value.as_i64().or_else(|| value.as_f64().map(|f| f.round() as i64))
}
