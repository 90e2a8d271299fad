//! File-backed frame source
//!
//! Serves compressed stills from disk: either a single image that is re-read on
//! every grab, or a directory whose images are served in name order, wrapping
//! around at the end.

use async_trait::async_trait;
use bytes::Bytes;
use log::debug;
use std::path::{Path, PathBuf};

use super::capturer::CaptureError;
use super::traits::FrameSource;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

pub struct StillImageSource {
    root: PathBuf,
    name: String,
    frames: Vec<PathBuf>,
    cursor: usize,
}

impl StillImageSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let name = root.display().to_string();
        Self {
            root,
            name,
            frames: Vec::new(),
            cursor: 0,
        }
    }

    async fn scan(&self) -> Result<Vec<PathBuf>, CaptureError> {
        let meta = tokio::fs::metadata(&self.root)
            .await
            .map_err(|e| CaptureError::DeviceUnavailable(format!("{}: {}", self.name, e)))?;

        if meta.is_file() {
            return Ok(vec![self.root.clone()]);
        }

        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| CaptureError::DeviceUnavailable(format!("{}: {}", self.name, e)))?;
        let mut frames = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?
        {
            let path = entry.path();
            if is_image(&path) {
                frames.push(path);
            }
        }
        frames.sort();

        if frames.is_empty() {
            return Err(CaptureError::DeviceUnavailable(format!(
                "no images in {}",
                self.name
            )));
        }
        Ok(frames)
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

#[async_trait]
impl FrameSource for StillImageSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn ready(&mut self) -> Result<(), CaptureError> {
        self.frames = self.scan().await?;
        self.cursor = 0;
        debug!("StillImageSource: {} frame(s) in {}", self.frames.len(), self.name);
        Ok(())
    }

    async fn grab(&mut self) -> Result<Bytes, CaptureError> {
        if self.frames.is_empty() {
            return Err(CaptureError::DeviceUnavailable(format!(
                "{} was not initialized",
                self.name
            )));
        }

        let path = &self.frames[self.cursor % self.frames.len()];
        self.cursor = (self.cursor + 1) % self.frames.len();

        let data = tokio::fs::read(path)
            .await
            .map_err(|e| CaptureError::ReadFailed(format!("{}: {}", path.display(), e)))?;
        Ok(Bytes::from(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_directory_cycles_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.jpg"), b"second").unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"first").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"skip me").unwrap();

        let mut source = StillImageSource::new(dir.path());
        source.ready().await.unwrap();

        assert_eq!(source.grab().await.unwrap(), Bytes::from_static(b"first"));
        assert_eq!(source.grab().await.unwrap(), Bytes::from_static(b"second"));
        assert_eq!(source.grab().await.unwrap(), Bytes::from_static(b"first"));
    }

    #[tokio::test]
    async fn test_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        std::fs::write(&path, b"pixels").unwrap();

        let mut source = StillImageSource::new(&path);
        source.ready().await.unwrap();
        assert_eq!(source.grab().await.unwrap(), Bytes::from_static(b"pixels"));
        assert_eq!(source.grab().await.unwrap(), Bytes::from_static(b"pixels"));
    }

    #[tokio::test]
    async fn test_missing_or_empty_device() {
        let dir = tempfile::tempdir().unwrap();

        let mut empty = StillImageSource::new(dir.path());
        assert!(matches!(
            empty.ready().await,
            Err(CaptureError::DeviceUnavailable(_))
        ));

        let mut missing = StillImageSource::new(dir.path().join("nope"));
        assert!(matches!(
            missing.ready().await,
            Err(CaptureError::DeviceUnavailable(_))
        ));
        assert!(missing.grab().await.is_err());
    }

    #[tokio::test]
    async fn test_file_removed_after_ready() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.jpg");
        std::fs::write(&path, b"pixels").unwrap();

        let mut source = StillImageSource::new(dir.path());
        source.ready().await.unwrap();
        std::fs::remove_file(&path).unwrap();

        assert!(matches!(
            source.grab().await,
            Err(CaptureError::ReadFailed(_))
        ));
    }
}
