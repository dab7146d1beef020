//! PDF Field Mapper - Entry point
//!
//! An MCP server for mapping structured data onto PDF documents.

use pdf_field_mapper::{run_server, run_server_with_rules};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pdf_field_mapper=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting PDF Field Mapper");

    // Optional first argument: path to a mapping rules JSON file
    match std::env::args().nth(1) {
        Some(rules_path) => run_server_with_rules(rules_path).await,
        None => run_server().await,
    }
}
