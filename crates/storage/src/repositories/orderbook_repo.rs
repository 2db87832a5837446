use common::models::{ORDERBOOK_DEPTH, OrderBookInsert, PriceLevel};
use sqlx::SqlitePool;

pub struct OrderBookRepository;

impl OrderBookRepository {
    pub async fn insert_batch(pool: &SqlitePool, books: &[OrderBookInsert]) -> Result<(), sqlx::Error> {
        if books.is_empty() {
            return Ok(());
        }
        let statement = insert_statement();
        let mut tx = pool.begin().await?;

        for b in books {
            let mut query = sqlx::query(&statement)
                .bind(b.time.to_rfc3339())
                .bind(&b.figi)
                .bind(b.is_consistent);

            for levels in [&b.bids, &b.asks] {
                for i in 0..ORDERBOOK_DEPTH as usize {
                    let level: Option<&PriceLevel> = levels.get(i);
                    query = query
                        .bind(level.map(|l| l.price.to_string()))
                        .bind(level.map(|l| l.quantity));
                }
            }

            query.execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

fn insert_statement() -> String {
    let mut columns = vec!["time".to_string(), "figi".to_string(), "is_consistent".to_string()];
    for side in ["bid", "ask"] {
        for i in 1..=ORDERBOOK_DEPTH {
            columns.push(format!("{side}_price_{i}"));
            columns.push(format!("{side}_qty_{i}"));
        }
    }
    let placeholders = vec!["?"; columns.len()].join(", ");
    format!(
        "INSERT INTO order_books({}) VALUES ({})",
        columns.join(", "),
        placeholders
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::apply_schema;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use sqlx::Row;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        apply_schema(&pool).await.unwrap();
        pool
    }

    fn row(figi: &str, best_bid: rust_decimal::Decimal) -> OrderBookInsert {
        OrderBookInsert {
            time: Utc.with_ymd_and_hms(2025, 3, 10, 7, 0, 1).unwrap(),
            figi: figi.to_string(),
            is_consistent: true,
            bids: vec![
                PriceLevel { price: best_bid, quantity: 12 },
                PriceLevel { price: best_bid - dec!(0.5), quantity: 3 },
            ],
            asks: vec![PriceLevel { price: best_bid + dec!(1), quantity: 7 }],
        }
    }

    #[test]
    fn statement_lists_every_flattened_level() {
        let statement = insert_statement();
        assert!(statement.contains("bid_price_1"));
        assert!(statement.contains("ask_qty_10"));
        assert_eq!(statement.matches('?').count(), 3 + 4 * ORDERBOOK_DEPTH as usize);
    }

    #[tokio::test]
    async fn batch_lands_as_flattened_rows() {
        let pool = memory_pool().await;
        let books = vec![row("FUTSI0325000", dec!(91250)), row("BBG0013HGFT4", dec!(91.17))];

        OrderBookRepository::insert_batch(&pool, &books).await.unwrap();

        let rows = sqlx::query("SELECT figi, bid_price_1, bid_qty_2, ask_price_1, ask_price_2 FROM order_books ORDER BY id")
            .fetch_all(&pool)
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get::<String, _>("figi"), "FUTSI0325000");
        assert_eq!(rows[0].get::<String, _>("bid_price_1"), "91250");
        assert_eq!(rows[0].get::<i64, _>("bid_qty_2"), 3);
        assert_eq!(rows[1].get::<String, _>("ask_price_1"), "92.17");
        assert_eq!(rows[1].get::<Option<String>, _>("ask_price_2"), None);
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let pool = memory_pool().await;
        OrderBookRepository::insert_batch(&pool, &[]).await.unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM order_books")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
