pub mod orderbook_repo;

pub use orderbook_repo::OrderBookRepository;
