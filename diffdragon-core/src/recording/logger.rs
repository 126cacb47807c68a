use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{error, info};

use super::types::RecordedEvent;

/// Appends [`RecordedEvent`]s to a JSONL file from a background task.
///
/// Cloning is cheap; every clone feeds the same writer. Recording never
/// blocks or fails the caller: write errors are logged and dropped.
#[derive(Clone)]
pub struct RecordingLogger {
    sender: mpsc::UnboundedSender<RecordedEvent>,
}

impl RecordingLogger {
    /// Must be called from within a tokio runtime.
    pub fn new(log_file_path: PathBuf) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            if let Err(e) = Self::writer_task(log_file_path, receiver).await {
                error!("Recording logger failed: {:#}", e);
            }
        });

        Self { sender }
    }

    pub fn record(&self, event: RecordedEvent) {
        if self.sender.send(event).is_err() {
            error!("Failed to send event to recording logger: receiver dropped");
        }
    }

    async fn writer_task(
        log_file_path: PathBuf,
        mut receiver: mpsc::UnboundedReceiver<RecordedEvent>,
    ) -> Result<()> {
        if let Some(parent) = log_file_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create {:?}", parent))?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file_path)
            .await
            .with_context(|| format!("Failed to open recording log {:?}", log_file_path))?;

        info!("Recording events to: {:?}", log_file_path);

        while let Some(event) = receiver.recv().await {
            let mut line = match serde_json::to_string(&event) {
                Ok(line) => line,
                Err(e) => {
                    error!("Failed to serialize event: {}", e);
                    continue;
                }
            };
            line.push('\n');

            if let Err(e) = file.write_all(line.as_bytes()).await {
                error!("Failed to write event to log: {}", e);
                continue;
            }
            if let Err(e) = file.flush().await {
                error!("Failed to flush log file: {}", e);
            }
        }

        info!("Recording writer task shutting down");
        Ok(())
    }
}
