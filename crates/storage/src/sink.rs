use std::sync::Arc;

use async_trait::async_trait;
use common::models::OrderBookInsert;

use crate::db::RotatingPool;
use crate::pipeline::{BatchSink, SinkError};
use crate::repositories::OrderBookRepository;

/// Writes order book batches into the current weekly SQLite file.
pub struct SqliteSink {
    rotating_pool: Arc<RotatingPool>,
}

impl SqliteSink {
    pub fn new(rotating_pool: Arc<RotatingPool>) -> Self {
        Self { rotating_pool }
    }
}

#[async_trait]
impl BatchSink<OrderBookInsert> for SqliteSink {
    fn table(&self) -> &str {
        "order_books"
    }

    async fn bulk_write(&self, records: &[OrderBookInsert]) -> Result<(), SinkError> {
        let pool = self.rotating_pool.get().await?;
        OrderBookRepository::insert_batch(&pool, records).await?;
        Ok(())
    }
}
