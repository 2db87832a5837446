use chrono::{DateTime, Datelike, Utc};
use common::clock::Clock;
use sqlx::sqlite::{self, SqliteConnectOptions, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::RwLock;
use tracing::info;

const SCHEMA: &str = include_str!("../../../sql/schema.sql");

/// Hands out a pool for the current ISO week's database file, switching to a
/// fresh file when the week rolls over.
pub struct RotatingPool {
    data_folder: String,
    clock: Arc<dyn Clock>,
    inner: RwLock<(u32, SqlitePool)>,
}

impl RotatingPool {
    pub async fn new(data_folder: String, clock: Arc<dyn Clock>) -> Result<Self, sqlx::Error> {
        let now = clock.now();
        let pool = get_weekly_pool(&data_folder, now).await?;
        Ok(Self {
            data_folder,
            clock,
            inner: RwLock::new((pack_week(now), pool)),
        })
    }

    pub async fn get(&self) -> Result<SqlitePool, sqlx::Error> {
        let now = self.clock.now();
        let packed = pack_week(now);

        let read = self.inner.read().await;
        let (current_packed, ref pool) = *read;

        if current_packed == packed {
            return Ok(pool.clone());
        }
        drop(read);

        let mut write = self.inner.write().await;
        let (current_packed, _) = *write;

        if current_packed != packed {
            info!("Week rolled over, switching database file");
            let new_pool = get_weekly_pool(&self.data_folder, now).await?;
            *write = (packed, new_pool);
        }
        Ok(write.1.clone())
    }
}

async fn get_weekly_pool(data_folder: &str, now: DateTime<Utc>) -> Result<SqlitePool, sqlx::Error> {
    let current_db_path = format!("{}/sqlitedata/current", data_folder);
    std::fs::create_dir_all(&current_db_path)?;

    let db_filename = format!("{}/{}", current_db_path, weekly_db_name(now));
    info!("Opening order book database {}", db_filename);

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_filename))?
        .create_if_missing(true)
        .journal_mode(sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlite::SqliteSynchronous::Normal)
        .busy_timeout(StdDuration::from_secs(30))
        .statement_cache_capacity(100);

    let pool = SqlitePool::connect_with(options).await?;
    apply_schema(&pool).await?;
    Ok(pool)
}

pub async fn apply_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(SCHEMA).execute(pool).await?;
    Ok(())
}

pub fn get_date_components(date: DateTime<Utc>) -> (i32, u32) {
    let iso = date.iso_week();
    (iso.year(), iso.week())
}

fn pack_week(date: DateTime<Utc>) -> u32 {
    let (year, week) = get_date_components(date);
    (year as u32) << 6 | (week & 0x3f)
}

pub fn weekly_db_name(date: DateTime<Utc>) -> String {
    let (year, week) = get_date_components(date);
    format!("order_books_{}_{:02}.db", year, week)
}
