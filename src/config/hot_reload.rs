use crate::config::Config;
use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Watches the configuration file and broadcasts every successfully parsed
/// and validated revision
pub struct ConfigHotReload {
    config_path: PathBuf,
    tx: broadcast::Sender<Arc<Config>>,
}

impl ConfigHotReload {
    pub fn new(config_path: PathBuf) -> Self {
        let (tx, _) = broadcast::channel(16);
        Self { config_path, tx }
    }

    /// Get a receiver for configuration updates
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Config>> {
        self.tx.subscribe()
    }

    /// Start watching the configuration file on a blocking thread
    pub fn start_watching(self: Arc<Self>) -> Result<()> {
        let (watcher_tx, watcher_rx) = std::sync::mpsc::channel();
        let mut watcher: RecommendedWatcher = Watcher::new(watcher_tx, notify::Config::default())
            .context("failed to create config watcher")?;
        watcher
            .watch(&self.config_path, RecursiveMode::NonRecursive)
            .with_context(|| format!("failed to watch {}", self.config_path.display()))?;

        info!(path = %self.config_path.display(), "Watching configuration file");

        tokio::task::spawn_blocking(move || {
            // dropping the watcher stops events
            let _watcher = watcher;
            loop {
                match watcher_rx.recv() {
                    Ok(Ok(event)) => {
                        if !should_reload(&event) {
                            continue;
                        }
                        info!("Configuration file changed, reloading");

                        // let the writer finish
                        std::thread::sleep(Duration::from_millis(100));

                        match self.load() {
                            Ok(config) => {
                                info!("Reloaded configuration");
                                let _ = self.tx.send(Arc::new(config));
                            }
                            Err(e) => {
                                error!(error = %e, "Failed to reload configuration");
                                warn!("Keeping the previous configuration");
                            }
                        }
                    }
                    Ok(Err(e)) => error!(error = %e, "Config watch error"),
                    Err(_) => {
                        warn!("Config watcher channel closed");
                        break;
                    }
                }
            }
        });

        Ok(())
    }

    fn load(&self) -> Result<Config> {
        let content = std::fs::read_to_string(&self.config_path)?;
        let config = Config::from_yaml_str(&content)?;
        config.validate()?;
        Ok(config)
    }
}

/// Determine if a file event should trigger a reload
fn should_reload(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
    )
}
