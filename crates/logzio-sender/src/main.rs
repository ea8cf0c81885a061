//! logzio-ship binary.

use anyhow::Result;
use logzio_sender::cli::Cli;
use tracing_subscriber::EnvFilter;

/// Main entry point for logzio-ship.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Diagnostics go to stderr so they never mix with shipped input.
    // Example: RUST_LOG=logzio_sender=debug logzio-ship --token ...
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("logzio_sender=info,logzio_ship=info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    tracing::debug!("Starting logzio-ship");

    Cli::parse_args().execute().await
}
