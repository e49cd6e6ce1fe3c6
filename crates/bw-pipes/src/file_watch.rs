//! File-watch connector
//!
//! Polls one path's modification time. When it moves, a pipe-message
//! trigger carries the path and the new timestamp. A missing file is not an
//! error; the first time it appears counts as a change.

use crate::connector::Connector;
use crate::{PipeError, PipeResult, PipeState, PipeStatus, StatusCell};
use async_trait::async_trait;
use bw_bus::SharedTriggerBus;
use bw_core::Trigger;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// File modification watcher pipe
pub struct FileWatchPipe {
    name: String,
    path: PathBuf,
    poll_ms: u64,
    bus: SharedTriggerBus,
    status: StatusCell,
    cancel: Mutex<Option<CancellationToken>>,
}

impl FileWatchPipe {
    pub fn new(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        poll_ms: u64,
        bus: SharedTriggerBus,
    ) -> Self {
        let name = name.into();
        Self {
            status: StatusCell::new(&name),
            name,
            path: path.into(),
            poll_ms,
            bus,
            cancel: Mutex::new(None),
        }
    }
}

async fn modified(path: &PathBuf) -> Option<SystemTime> {
    tokio::fs::metadata(path)
        .await
        .ok()
        .and_then(|meta| meta.modified().ok())
}

#[async_trait]
impl Connector for FileWatchPipe {
    fn kind(&self) -> &'static str {
        "file_watch"
    }

    fn status(&self) -> PipeStatus {
        self.status.snapshot()
    }

    async fn connect(&self) -> PipeResult<()> {
        if self.status.state() == PipeState::Connected {
            return Ok(());
        }
        self.status.transition(PipeState::Connecting)?;

        let token = CancellationToken::new();
        *self.cancel.lock().unwrap_or_else(|e| e.into_inner()) = Some(token.clone());

        let name = self.name.clone();
        let path = self.path.clone();
        let poll = Duration::from_millis(self.poll_ms.max(1));
        let bus = self.bus.clone();
        tokio::spawn(async move {
            let mut last = modified(&path).await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(poll) => {}
                }
                let current = modified(&path).await;
                if current != last && current.is_some() {
                    debug!(pipe = %name, path = %path.display(), "File changed");
                    let stamp = current
                        .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
                        .map(|d| d.as_millis() as u64);
                    bus.fire(Trigger::pipe_message(
                        &name,
                        json!({"path": path.display().to_string(), "modified_ms": stamp}),
                    ));
                }
                last = current;
            }
        });

        self.status.transition(PipeState::Connected)?;
        info!(pipe = %self.name, path = %self.path.display(), "Watching file");
        Ok(())
    }

    async fn disconnect(&self) -> PipeResult<()> {
        if let Some(token) = self
            .cancel
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            token.cancel();
        }
        self.status.transition(PipeState::Disconnected)
    }

    async fn send(&self, _message: Value) -> PipeResult<Option<Value>> {
        Err(PipeError::NotSupported {
            name: self.name.clone(),
            operation: "send",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bw_bus::TriggerBus;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_change_fires_trigger() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watched.txt");
        tokio::fs::write(&path, "one").await.unwrap();

        let bus = Arc::new(TriggerBus::new());
        let pipe = FileWatchPipe::new("watch", &path, 10, bus.clone());
        let mut rx = bus.subscribe("watch");
        pipe.connect().await.unwrap();

        // Coarse mtime filesystems need a visible gap before the rewrite
        tokio::time::sleep(Duration::from_millis(50)).await;
        tokio::fs::write(&path, "two").await.unwrap();

        let trigger = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no file change trigger")
            .unwrap();
        assert_eq!(
            trigger.payload["path"],
            path.display().to_string()
        );

        pipe.disconnect().await.unwrap();
    }
}
