//! Configuration file watcher for hot reload.
//!
//! The watcher only produces new configurations. Rebuilding and swapping
//! the application is the server's job (see `HttpServer::run`).
//!
//! The parent directory is watched rather than the file, so editors that
//! save by writing a temp file and renaming it over the original are still
//! seen. Events for other files in the directory are ignored.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::AppConfig;

/// Watches one configuration file and emits every valid new version.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<AppConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and the receiving end for validated updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<AppConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let watcher = Self {
            path: path.to_path_buf(),
            update_tx,
        };
        (watcher, update_rx)
    }

    /// Start watching. Updates stop when the returned handle is dropped.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let directory = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name = self.path.file_name().map(OsString::from);
        let path = self.path.clone();
        let tx = self.update_tx;
        let mut last_seen = fingerprint(&path);

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let event = match res {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::error!(error = %e, "Config watch error");
                        return;
                    }
                };
                if !is_relevant(&event, file_name.as_deref()) {
                    return;
                }

                // One save often produces several events.
                let current = fingerprint(&path);
                if current.is_some() && current == last_seen {
                    return;
                }
                last_seen = current;

                tracing::info!(path = %path.display(), "Config file changed, reloading");
                match load_config(&path) {
                    Ok(config) => {
                        let _ = tx.send(config);
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Rejected new configuration, keeping current one");
                    }
                }
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&directory, RecursiveMode::NonRecursive)?;
        tracing::info!(path = %self.path.display(), "Config watcher started");
        Ok(watcher)
    }
}

fn is_relevant(event: &Event, file_name: Option<&std::ffi::OsStr>) -> bool {
    let kind_matches = matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_));
    kind_matches
        && event
            .paths
            .iter()
            .any(|p| p.file_name().is_some() && p.file_name() == file_name)
}

/// Modification time and size. Timestamps can be coarse, so a truncate
/// and the following write may share one.
fn fingerprint(path: &Path) -> Option<(SystemTime, u64)> {
    let metadata = std::fs::metadata(path).ok()?;
    Some((metadata.modified().ok()?, metadata.len()))
}
