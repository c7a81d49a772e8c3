// SPDX-License-Identifier: Apache-2.0

use crate::init::config::load_config;
use crate::topology::pipeline::PipelineConfig;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::select;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::{debug, error, info};

// Editors often write a file in several steps, so events are coalesced.
const DEBOUNCE: Duration = Duration::from_millis(250);

/// Publishes the pipeline section of the configuration file whenever the
/// file changes or the process receives `SIGHUP`.
pub struct ConfigReloader {
    path: PathBuf,
    tx: watch::Sender<Vec<PipelineConfig>>,
}

impl ConfigReloader {
    pub fn new(path: &Path, tx: watch::Sender<Vec<PipelineConfig>>) -> Self {
        Self {
            path: path.to_path_buf(),
            tx,
        }
    }

    /// Re-reads the file and publishes its pipelines if they differ from the
    /// current set. A file that fails to load leaves the current set in place.
    pub fn reload(&self) -> bool {
        let config = match load_config(&self.path) {
            Ok(c) => c,
            Err(e) => {
                error!(
                    path = %self.path.display(),
                    error = %e,
                    "Unable to reload configuration, keeping current pipelines"
                );
                return false;
            }
        };

        let pipelines = config.pipelines;
        let changed = self.tx.send_if_modified(|current| {
            if *current == pipelines {
                return false;
            }
            *current = pipelines;
            true
        });
        if changed {
            info!(path = %self.path.display(), "Configuration changed, reloading pipelines");
        } else {
            debug!(path = %self.path.display(), "Configuration unchanged");
        }
        changed
    }

    fn watch(&self) -> Result<(RecommendedWatcher, mpsc::UnboundedReceiver<()>), BoxError> {
        let (ev_tx, ev_rx) = mpsc::unbounded_channel();
        let file_name = self.path.file_name().map(|n| n.to_os_string());

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| {
                let Ok(event) = res else {
                    return;
                };
                if matches!(event.kind, EventKind::Access(_)) {
                    return;
                }
                let ours = event
                    .paths
                    .iter()
                    .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                if ours {
                    let _ = ev_tx.send(());
                }
            },
            Config::default(),
        )?;

        // Watch the directory so atomic replace-by-rename is seen.
        let dir = match self.path.parent() {
            Some(d) if !d.as_os_str().is_empty() => d.to_path_buf(),
            _ => PathBuf::from("."),
        };
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        Ok((watcher, ev_rx))
    }

    pub async fn run(self, cancel: CancellationToken) -> Result<(), BoxError> {
        let (_watcher, mut events) = self.watch()?;
        let mut hangup = signal(SignalKind::hangup())?;

        debug!(path = %self.path.display(), "Watching configuration for changes");
        loop {
            select! {
                biased;

                _ = cancel.cancelled() => break,

                _ = hangup.recv() => {
                    info!("Signal SIGHUP received, reloading configuration");
                    self.reload();
                },

                ev = events.recv() => {
                    if ev.is_none() {
                        break;
                    }
                    select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(DEBOUNCE) => {},
                    }
                    while events.try_recv().is_ok() {}
                    self.reload();
                }
            }
        }
        Ok(())
    }
}
