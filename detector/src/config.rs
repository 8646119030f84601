//! Minimap region persistence.
//!
//! The calibrated region is written through to a JSON file so a restarted
//! detector picks it up without recalibrating. Every consumer shares one
//! store; an in-memory variant exists for tests and ephemeral runs.

use log::{info, warn};
use shared::MinimapConfig;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone)]
pub struct ConfigStore {
    current: Arc<RwLock<Option<MinimapConfig>>>,
    path: Option<PathBuf>,
}

impl ConfigStore {
    /// Opens a file-backed store, loading the existing region if the file
    /// is present. A missing file is the normal first-run state; a file
    /// that exists but fails to parse is reported and treated as absent.
    pub fn load(path: PathBuf) -> Self {
        let current = match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<MinimapConfig>(&contents) {
                Ok(config) => {
                    info!("Loaded minimap region from {}", path.display());
                    Some(config)
                }
                Err(e) => {
                    warn!("Ignoring unreadable config file {}: {}", path.display(), e);
                    None
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!("Could not read config file {}: {}", path.display(), e);
                None
            }
        };

        Self {
            current: Arc::new(RwLock::new(current)),
            path: Some(path),
        }
    }

    /// Store without file persistence.
    pub fn in_memory() -> Self {
        Self {
            current: Arc::new(RwLock::new(None)),
            path: None,
        }
    }

    pub async fn get(&self) -> Option<MinimapConfig> {
        *self.current.read().await
    }

    /// Replaces the region and writes it through to disk when file-backed.
    pub async fn set(&self, config: MinimapConfig) -> io::Result<()> {
        {
            let mut current = self.current.write().await;
            *current = Some(config);
        }

        if let Some(path) = &self.path {
            let json = serde_json::to_string_pretty(&config)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            std::fs::write(path, json)?;
            info!("Saved minimap region to {}", path.display());
        }
        Ok(())
    }
}
