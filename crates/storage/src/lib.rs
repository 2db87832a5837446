pub mod db;
pub mod pipeline;
pub mod repositories;
pub mod sink;

pub use pipeline::{BatchSink, KeepMessage, KeepWorker, Keeper, SinkError, keep_channel};
pub use sink::SqliteSink;
