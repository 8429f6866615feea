use anyhow::{Context, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Writes captured photos to disk off the owner task.
///
/// Each save runs on its own spawned task that owns its byte buffer, so a
/// slow SD card write can never block the capture loop or race the next
/// capture. Write failures are logged and swallowed; the user gets no
/// notification. Successful saves are announced on the optional gallery
/// channel so an external index can pick the file up.
pub struct PhotoStore {
    save_dir: PathBuf,
    gallery_tx: Option<mpsc::UnboundedSender<PathBuf>>,
}

impl PhotoStore {
    pub fn new(save_dir: PathBuf) -> Self {
        Self {
            save_dir,
            gallery_tx: None,
        }
    }

    /// Attach a gallery-index notifier. Sends are fire-and-forget.
    pub fn with_gallery_notifier(mut self, tx: mpsc::UnboundedSender<PathBuf>) -> Self {
        self.gallery_tx = Some(tx);
        self
    }

    /// Persist one captured JPEG in the background.
    pub fn spawn_save(&self, bytes: Vec<u8>) -> JoinHandle<()> {
        let dir = self.save_dir.clone();
        let gallery_tx = self.gallery_tx.clone();

        tokio::spawn(async move {
            match write_photo(&dir, &bytes).await {
                Ok(path) => {
                    log::info!("Photo saved: {} ({} bytes)", path.display(), bytes.len());
                    if let Some(tx) = gallery_tx {
                        // Receiver may be gone; the save already succeeded
                        let _ = tx.send(path);
                    }
                }
                Err(e) => {
                    log::error!("Failed to save photo: {:#}", e);
                }
            }
        })
    }
}

async fn write_photo(dir: &Path, bytes: &[u8]) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create photo directory {}", dir.display()))?;

    let filename = format!("{}.jpg", Utc::now().timestamp_millis());
    let path = dir.join(filename);

    fs::write(&path, bytes)
        .await
        .with_context(|| format!("Failed to write photo to {}", path.display()))?;

    Ok(path)
}
