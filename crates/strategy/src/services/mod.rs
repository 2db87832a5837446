pub mod spread_strategy;

pub use spread_strategy::SpreadStrategy;
