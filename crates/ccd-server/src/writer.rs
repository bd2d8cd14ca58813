//! Frame writer collaborator boundary.
//!
//! The capture driver hands every completed frame to a [`FrameWriter`]
//! when a destination is configured. The trait keeps serialization out
//! of the capture loop; the provided [`RawFrameWriter`] dumps the
//! header and pixels verbatim with a plain-text metadata sidecar.

use async_trait::async_trait;
use ccd_core::image::ImageHeader;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Where and how the next frame should be persisted.
pub struct FrameTarget<'a> {
    pub dir: &'a Path,
    /// Explicit file name; wins over the prefix.
    pub filename: Option<&'a str>,
    /// Prefix for counter-derived names.
    pub prefix: Option<&'a str>,
    /// Whether an existing file may be overwritten.
    pub rewrite: bool,
}

impl FrameTarget<'_> {
    fn resolve(&self, counter: u64) -> PathBuf {
        let name = match self.filename {
            Some(name) => name.to_string(),
            None => format!("{}{counter:06}.raw", self.prefix.unwrap_or("frame_")),
        };
        self.dir.join(name)
    }
}

/// Persists one completed frame.
#[async_trait]
pub trait FrameWriter: Send + Sync {
    /// Write the frame, returning the path it landed at.
    async fn write_frame(
        &self,
        header: &ImageHeader,
        pixels: &[u8],
        meta: &BTreeMap<String, String>,
        target: &FrameTarget<'_>,
    ) -> anyhow::Result<PathBuf>;
}

/// Header-then-pixels dump with a `.hdr` metadata sidecar.
pub struct RawFrameWriter;

#[async_trait]
impl FrameWriter for RawFrameWriter {
    async fn write_frame(
        &self,
        header: &ImageHeader,
        pixels: &[u8],
        meta: &BTreeMap<String, String>,
        target: &FrameTarget<'_>,
    ) -> anyhow::Result<PathBuf> {
        let path = target.resolve(header.counter);
        if !target.rewrite && path.exists() {
            anyhow::bail!("{} exists and rewrite is off", path.display());
        }
        let mut bytes = Vec::with_capacity(ImageHeader::SIZE + pixels.len());
        bytes.extend_from_slice(&header.to_bytes());
        bytes.extend_from_slice(pixels);
        tokio::fs::write(&path, bytes).await?;

        if !meta.is_empty() {
            let mut sidecar = String::new();
            for (key, value) in meta {
                let _ = writeln!(sidecar, "{key}={value}");
            }
            tokio::fs::write(path.with_extension("hdr"), sidecar).await?;
        }
        tracing::info!(path = %path.display(), bytes = pixels.len(), "frame written");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_header_pixels_and_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let mut header = ImageHeader::empty();
        header.counter = 7;
        header.width = 2;
        header.height = 1;
        header.data_len = 4;
        let mut meta = BTreeMap::new();
        meta.insert("object".to_string(), "M31".to_string());

        let target = FrameTarget {
            dir: dir.path(),
            filename: None,
            prefix: Some("test_"),
            rewrite: false,
        };
        let path = RawFrameWriter
            .write_frame(&header, &[1, 2, 3, 4], &meta, &target)
            .await
            .unwrap();
        assert_eq!(path.file_name().unwrap(), "test_000007.raw");

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), ImageHeader::SIZE + 4);
        assert_eq!(&bytes[ImageHeader::SIZE..], &[1, 2, 3, 4]);

        let sidecar = std::fs::read_to_string(path.with_extension("hdr")).unwrap();
        assert_eq!(sidecar, "object=M31\n");
    }

    #[tokio::test]
    async fn refuses_overwrite_unless_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let header = ImageHeader::empty();
        let target = FrameTarget {
            dir: dir.path(),
            filename: Some("fixed.raw"),
            prefix: None,
            rewrite: false,
        };
        let meta = BTreeMap::new();
        RawFrameWriter
            .write_frame(&header, &[0], &meta, &target)
            .await
            .unwrap();
        assert!(RawFrameWriter
            .write_frame(&header, &[0], &meta, &target)
            .await
            .is_err());

        let rewrite = FrameTarget {
            rewrite: true,
            ..target
        };
        RawFrameWriter
            .write_frame(&header, &[0], &meta, &rewrite)
            .await
            .unwrap();
    }
}
