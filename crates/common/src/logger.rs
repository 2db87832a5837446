use std::env;

use tracing_subscriber::EnvFilter;

const QUIET_DEPENDENCIES: &str = "sqlx=warn,teloxide=warn,reqwest=warn,tungstenite=warn";

pub fn setup_logger() {
    let level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::new(format!("{level},{QUIET_DEPENDENCIES}"));

    tracing_subscriber::fmt()
        // .with_file(true)
        // .with_line_number(true)
        .with_target(true)
        .with_level(true)
        .with_ansi(true)
        .compact()
        .with_env_filter(filter)
        .init();
}
