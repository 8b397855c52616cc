use crate::error::Result;
use crate::models::PricePoint;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

/// SQL-side summary of a price range, before ratio assembly.
#[derive(Debug, Clone)]
pub struct RangeSummary {
    pub count: i64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub average: Option<f64>,
    pub first: Option<f64>,
    pub last: Option<f64>,
}

/// Postgres store for price history and order attempts.
///
/// Keyed by `(code, ts)`; range queries return ascending by timestamp. The
/// handle is cheap to clone and is passed explicitly to everything that
/// touches storage.
#[derive(Clone)]
pub struct PriceStore {
    pool: PgPool,
}

impl PriceStore {
    /// Connect to Postgres.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        tracing::info!("connected to Postgres");

        Ok(Self { pool })
    }

    /// The underlying pool, for collaborators that manage their own
    /// transactions (the exchange adapter's record-then-submit).
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// One-time schema provisioning. Idempotent.
    pub async fn create_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS prices (
                id BIGSERIAL PRIMARY KEY,
                ts TIMESTAMPTZ NOT NULL,
                code VARCHAR(8) NOT NULL,
                price DOUBLE PRECISION NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS prices_code_ts ON prices (code, ts)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS orders (
                id BIGSERIAL PRIMARY KEY,
                exchange VARCHAR(32) NOT NULL,
                client_order_id UUID NOT NULL,
                code VARCHAR(8) NOT NULL,
                side VARCHAR(4) NOT NULL,
                quantity DOUBLE PRECISION NOT NULL,
                price DOUBLE PRECISION NOT NULL,
                ts TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Record one price snapshot.
    pub async fn insert_price(&self, code: &str, point: &PricePoint) -> Result<()> {
        sqlx::query("INSERT INTO prices (ts, code, price) VALUES ($1, $2, $3)")
            .bind(point.ts)
            .bind(code)
            .bind(point.price)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Load all points for `code` in `[start, end]`, ascending by timestamp.
    pub async fn load_range(
        &self,
        code: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PricePoint>> {
        let rows = sqlx::query(
            "SELECT ts, price FROM prices WHERE code = $1 AND ts BETWEEN $2 AND $3 ORDER BY ts ASC",
        )
        .bind(code)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        let mut points = Vec::with_capacity(rows.len());
        for row in rows {
            points.push(PricePoint {
                ts: row.try_get("ts")?,
                price: row.try_get("price")?,
            });
        }

        Ok(points)
    }

    /// Summarize a range SQL-side, without pulling the points into memory.
    pub async fn aggregate_range(
        &self,
        code: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<RangeSummary> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS count,
                   MIN(price) AS min,
                   MAX(price) AS max,
                   AVG(price) AS average,
                   (SELECT f.price FROM prices f
                     WHERE f.code = $1 AND f.ts BETWEEN $2 AND $3
                     ORDER BY f.ts ASC LIMIT 1) AS first,
                   (SELECT l.price FROM prices l
                     WHERE l.code = $1 AND l.ts BETWEEN $2 AND $3
                     ORDER BY l.ts DESC LIMIT 1) AS last
              FROM prices
             WHERE code = $1 AND ts BETWEEN $2 AND $3
            "#,
        )
        .bind(code)
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await?;

        Ok(RangeSummary {
            count: row.try_get("count")?,
            min: row.try_get("min")?,
            max: row.try_get("max")?,
            average: row.try_get("average")?,
            first: row.try_get("first")?,
            last: row.try_get("last")?,
        })
    }
}
