//! Cross-process image hand-off.
//!
//! One named segment per daemon instance: an [`ImageHeader`] followed
//! by the pixel payload, backed by a file mapping (on Linux the segment
//! directory defaults to `/dev/shm`, so the mapping is physical-memory
//! backed). The daemon owns the only writer; any number of separate
//! processes may attach read-only.
//!
//! The magic value at the head of the segment is the attach contract:
//! readers validate it before trusting anything else, so attaching to
//! the wrong file or a stale segment fails loudly instead of producing
//! garbage frames.
//!
//! There is no lock inside the segment. Correctness relies on the
//! daemon's capture protocol: pixels are only mutated while an exposure
//! is being read out, and only consumed once the daemon has announced
//! the frame, a single-writer/single-reader handoff enforced by the
//! capture state machine.

use ccd_core::image::{ImageHeader, IMAGE_MAGIC};
use memmap2::{Mmap, MmapMut};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors from segment creation or attach.
#[derive(Error, Debug)]
pub enum ShmemError {
    #[error("segment I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file exists but is smaller than a header.
    #[error("segment too small: {0} bytes")]
    TooSmall(usize),

    /// The leading magic value does not match; this is not our segment.
    #[error("bad magic 0x{0:016x} (expected 0x{1:016x})", )]
    BadMagic(u64, u64),

    /// A frame larger than the allocation was requested.
    #[error("payload of {requested} bytes exceeds segment capacity {capacity}")]
    PayloadTooLarge { requested: usize, capacity: usize },
}

/// Derive the segment file path for a configured key.
pub fn segment_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("ccdserv.{key}.img"))
}

/// The daemon-side writable segment.
///
/// Allocated exactly once, at the maximum size the sensor can produce;
/// every exposure reuses it. Readers must take `width`/`height`/
/// `bitpix` from the header, never from the allocation size.
pub struct ImageSegment {
    map: MmapMut,
    path: PathBuf,
    capacity: usize,
}

impl ImageSegment {
    /// Create (or truncate) the segment with room for `capacity`
    /// payload bytes, and stamp an empty header.
    ///
    /// Failure here is fatal to the daemon: without the segment there
    /// is nowhere to put pixels.
    pub fn create(path: &Path, capacity: usize) -> Result<Self, ShmemError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len((ImageHeader::SIZE + capacity) as u64)?;
        // SAFETY: the daemon is the only writer of this freshly
        // truncated file; readers attach read-only.
        #[allow(unsafe_code)]
        let map = unsafe { MmapMut::map_mut(&file)? };
        let mut segment = Self {
            map,
            path: path.to_path_buf(),
            capacity,
        };
        segment.set_header(&ImageHeader::empty());
        tracing::info!(
            path = %segment.path.display(),
            capacity,
            "created shared image segment"
        );
        Ok(segment)
    }

    /// Path of the backing file, advertised via `shmemkey`.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Maximum payload the segment can hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Read the current header.
    pub fn header(&self) -> ImageHeader {
        let mut buf = [0u8; ImageHeader::SIZE];
        buf.copy_from_slice(&self.map[..ImageHeader::SIZE]);
        ImageHeader::from_bytes(&buf)
    }

    /// Overwrite the header.
    pub fn set_header(&mut self, header: &ImageHeader) {
        self.map[..ImageHeader::SIZE].copy_from_slice(&header.to_bytes());
    }

    /// Mutable payload window of `len` bytes for the frame being read
    /// out.
    pub fn payload_mut(&mut self, len: usize) -> Result<&mut [u8], ShmemError> {
        if len > self.capacity {
            return Err(ShmemError::PayloadTooLarge {
                requested: len,
                capacity: self.capacity,
            });
        }
        Ok(&mut self.map[ImageHeader::SIZE..ImageHeader::SIZE + len])
    }

    /// Payload bytes of the frame currently described by the header.
    pub fn payload(&self) -> &[u8] {
        let len = (self.header().data_len as usize).min(self.capacity);
        &self.map[ImageHeader::SIZE..ImageHeader::SIZE + len]
    }

    /// Copy out header and payload, for the one-shot image socket.
    pub fn snapshot(&self) -> (ImageHeader, Vec<u8>) {
        (self.header(), self.payload().to_vec())
    }
}

/// A read-only attach from another process.
pub struct ImageReader {
    map: Mmap,
}

impl ImageReader {
    /// Map the segment and validate the magic value.
    pub fn attach(path: &Path) -> Result<Self, ShmemError> {
        let file = OpenOptions::new().read(true).open(path)?;
        let len = file.metadata()?.len() as usize;
        if len < ImageHeader::SIZE {
            return Err(ShmemError::TooSmall(len));
        }
        // SAFETY: read-only mapping; the writer never shrinks the file.
        #[allow(unsafe_code)]
        let map = unsafe { Mmap::map(&file)? };
        let reader = Self { map };
        let header = reader.header();
        if !header.magic_ok() {
            return Err(ShmemError::BadMagic(header.magic, IMAGE_MAGIC));
        }
        Ok(reader)
    }

    /// Read the current header.
    pub fn header(&self) -> ImageHeader {
        let mut buf = [0u8; ImageHeader::SIZE];
        buf.copy_from_slice(&self.map[..ImageHeader::SIZE]);
        ImageHeader::from_bytes(&buf)
    }

    /// Payload bytes of the frame currently described by the header.
    pub fn payload(&self) -> &[u8] {
        let avail = self.map.len() - ImageHeader::SIZE;
        let len = (self.header().data_len as usize).min(avail);
        &self.map[ImageHeader::SIZE..ImageHeader::SIZE + len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccd_core::image::BitDepth;
    use ccd_core::FrameStats;

    #[test]
    fn create_publish_attach_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = segment_path(dir.path(), "test");

        let mut segment = ImageSegment::create(&path, 64).unwrap();
        let pixels: Vec<u8> = [10u16, 20, 30, 40]
            .iter()
            .flat_map(|p| p.to_le_bytes())
            .collect();
        segment.payload_mut(pixels.len()).unwrap().copy_from_slice(&pixels);

        let stats = FrameStats::compute(&pixels, BitDepth::Bits16).unwrap();
        let mut header = ImageHeader::empty();
        header.counter = 1;
        header.bitpix = 16;
        header.width = 2;
        header.height = 2;
        header.stats_valid = 1;
        header.min = stats.min;
        header.max = stats.max;
        header.mean = stats.mean;
        header.std = stats.std;
        header.data_len = pixels.len() as u64;
        segment.set_header(&header);

        let reader = ImageReader::attach(&path).unwrap();
        let seen = reader.header();
        assert_eq!(seen.counter, 1);
        assert_eq!((seen.width, seen.height), (2, 2));
        assert_eq!(seen.mean, 25.0);
        assert_eq!(reader.payload(), pixels.as_slice());
    }

    #[test]
    fn attach_rejects_wrong_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bogus.img");
        std::fs::write(&path, vec![0u8; 256]).unwrap();
        assert!(matches!(
            ImageReader::attach(&path),
            Err(ShmemError::BadMagic(0, _))
        ));
    }

    #[test]
    fn attach_rejects_truncated_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.img");
        std::fs::write(&path, vec![0u8; 10]).unwrap();
        assert!(matches!(
            ImageReader::attach(&path),
            Err(ShmemError::TooSmall(10))
        ));
    }

    #[test]
    fn oversized_payload_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = segment_path(dir.path(), "cap");
        let mut segment = ImageSegment::create(&path, 16).unwrap();
        assert!(matches!(
            segment.payload_mut(17),
            Err(ShmemError::PayloadTooLarge { .. })
        ));
    }
}
