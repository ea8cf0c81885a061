//! Command-line interface of `logzio-ship`.
//!
//! Reads newline-delimited logs from stdin and ships them until EOF.
//!
//! ```bash
//! tail -F app.log | logzio-ship --token "$LOGZIO_TOKEN" --type app --compress
//! logzio-ship --config /etc/logzio/ship.yaml < events.jsonl
//! ```

use crate::config::{QueueConfig, SenderConfig};
use crate::sender::LogzioSender;
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

/// Ship newline-delimited logs from stdin to Logz.io
#[derive(Parser, Debug)]
#[command(name = "logzio-ship")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// YAML configuration file; flags override its values
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Account token
    #[arg(long, env = "LOGZIO_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Log type
    #[arg(long = "type")]
    pub log_type: Option<String>,

    /// Listener URL
    #[arg(long)]
    pub url: Option<String>,

    /// Gzip request payloads
    #[arg(long)]
    pub compress: bool,

    /// Buffer on disk in this directory instead of in memory
    #[arg(long)]
    pub buffer_dir: Option<PathBuf>,

    /// Seconds between drains
    #[arg(long)]
    pub drain_timeout: Option<u64>,

    /// Report internal progress
    #[arg(long)]
    pub debug: bool,
}

impl Cli {
    /// Parse command-line arguments
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Builds the effective configuration: the file (if any) overlaid with
    /// the flags.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be loaded or no token is given anywhere.
    pub async fn resolve_config(&self) -> Result<SenderConfig> {
        let mut config = match &self.config {
            Some(path) => SenderConfig::load(path)
                .await
                .with_context(|| format!("Failed to load {}", path.display()))?,
            None => SenderConfig::new(
                self.token
                    .clone()
                    .context("A token is required: pass --token, LOGZIO_TOKEN or --config")?,
            ),
        };

        if let Some(token) = &self.token {
            config.token.clone_from(token);
        }
        if let Some(log_type) = &self.log_type {
            config.log_type = Some(log_type.clone());
        }
        if let Some(url) = &self.url {
            config.listener_url.clone_from(url);
        }
        if let Some(secs) = self.drain_timeout {
            config.drain_timeout_secs = secs;
        }
        if let Some(dir) = &self.buffer_dir {
            config.queue = QueueConfig::Disk {
                dir: dir.clone(),
                fs_percent_threshold: Some(crate::queue::disk::DEFAULT_FS_PERCENT_THRESHOLD),
                gc_interval_secs: crate::sender::DEFAULT_GC_INTERVAL.as_secs(),
            };
        }
        config.compress |= self.compress;
        config.debug |= self.debug;

        Ok(config)
    }

    /// Ships stdin and stops once it is exhausted.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration or if stdin cannot be read.
    pub async fn execute(self) -> Result<()> {
        let config = self.resolve_config().await?;
        let sender = config
            .sender_builder()
            .build()
            .context("Failed to create the sender")?;

        sender.start();
        let shipped = ship_lines(&sender, BufReader::new(tokio::io::stdin())).await;
        sender.stop().await;

        let shipped = shipped.context("Failed to read stdin")?;
        tracing::info!(lines = shipped, "Finished shipping");
        Ok(())
    }
}

/// Enqueues every non-blank line of `reader` and returns how many were sent.
///
/// # Errors
///
/// Returns the first read error.
pub async fn ship_lines<R>(sender: &LogzioSender, reader: R) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut count = 0;
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        sender.send(&line);
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::CollectingReporter;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn parses_flags() {
        let cli = Cli::try_parse_from([
            "logzio-ship",
            "--token",
            "abc",
            "--type",
            "nginx",
            "--compress",
            "--drain-timeout",
            "2",
        ])
        .unwrap();

        assert_eq!(cli.token.as_deref(), Some("abc"));
        assert_eq!(cli.log_type.as_deref(), Some("nginx"));
        assert!(cli.compress);
        assert_eq!(cli.drain_timeout, Some(2));
    }

    #[tokio::test]
    async fn flags_override_the_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("ship.yaml");
        SenderConfig::new("from-file").save(&path).await.unwrap();

        let cli = Cli::try_parse_from([
            "logzio-ship",
            "--config",
            path.to_str().unwrap(),
            "--type",
            "cli",
            "--buffer-dir",
            "/tmp/ship-buffer",
        ])
        .unwrap();
        let config = cli.resolve_config().await.unwrap();

        assert_eq!(config.log_type.as_deref(), Some("cli"));
        assert!(matches!(config.queue, QueueConfig::Disk { .. }));
        // LOGZIO_TOKEN may be set in the environment running the tests.
        if std::env::var_os("LOGZIO_TOKEN").is_none() {
            assert_eq!(config.token, "from-file");
        }
    }

    #[tokio::test]
    async fn ship_lines_skips_blank_lines() {
        let sender = LogzioSender::builder()
            .token("t")
            .reporter(Arc::new(CollectingReporter::new()))
            .build()
            .unwrap();
        let input: &[u8] = b"{\"message\":\"a\"}\n\n   \nplain text\n";

        let count = ship_lines(&sender, input).await.unwrap();

        assert_eq!(count, 2);
        assert_eq!(sender.queue().dequeue(), Some(br#"{"message":"a"}"#.to_vec()));
        assert_eq!(sender.queue().dequeue(), Some(b"plain text".to_vec()));
    }
}
