//! File watching for settings files

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::error::Result;

/// Watches the directories holding settings files
///
/// Directories are watched non-recursively so a settings file that is
/// created, replaced or deleted is still noticed. Every changed path is
/// forwarded; callers ignore the ones they do not read.
pub struct SettingsWatcher {
    watcher: RecommendedWatcher,
    watched: BTreeSet<PathBuf>,
}

impl SettingsWatcher {
    pub fn new() -> Result<(Self, mpsc::UnboundedReceiver<PathBuf>)> {
        let (tx, rx) = mpsc::unbounded_channel();

        let watcher = RecommendedWatcher::new(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    if matches!(event.kind, EventKind::Access(_)) {
                        return;
                    }
                    for path in event.paths {
                        let _ = tx.send(path);
                    }
                }
                Err(e) => {
                    error!("Settings watch error: {}", e);
                }
            },
            notify::Config::default(),
        )?;

        Ok((
            Self {
                watcher,
                watched: BTreeSet::new(),
            },
            rx,
        ))
    }

    /// Watch the parent directories of `files`, dropping directories no
    /// longer needed
    pub fn sync(&mut self, files: &[PathBuf]) -> Result<()> {
        let wanted: BTreeSet<PathBuf> = files
            .iter()
            .filter_map(|file| file.parent())
            .filter(|dir| dir.is_dir())
            .map(Path::to_path_buf)
            .collect();

        for dir in self.watched.difference(&wanted) {
            // the directory may already be gone
            let _ = self.watcher.unwatch(dir);
        }
        for dir in wanted.difference(&self.watched) {
            self.watcher.watch(dir, RecursiveMode::NonRecursive)?;
            debug!(dir = %dir.display(), "Watching settings directory");
        }
        self.watched = wanted;
        Ok(())
    }

    pub fn watched_directories(&self) -> impl Iterator<Item = &Path> {
        self.watched.iter().map(PathBuf::as_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sync_watches_existing_parent_directories() {
        let dir = TempDir::new().unwrap();
        let (mut watcher, _changes) = SettingsWatcher::new().unwrap();

        watcher
            .sync(&[
                dir.path().join("settings.json"),
                dir.path().join("tasks.json"),
                dir.path().join("missing").join("settings.json"),
            ])
            .unwrap();
        assert_eq!(
            watcher.watched_directories().collect::<Vec<_>>(),
            vec![dir.path()]
        );

        watcher.sync(&[]).unwrap();
        assert_eq!(watcher.watched_directories().count(), 0);
    }
}
