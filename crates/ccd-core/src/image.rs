//! The image record: a fixed header followed by raw pixel bytes.
//!
//! Exactly one record exists per daemon. It is allocated once at the
//! largest size the sensor can produce (full array x 2 bytes/pixel)
//! and reused for every exposure; consumers must treat the header,
//! not the allocation, as authoritative for the current
//! width x height x bit depth.
//!
//! Pixel storage follows the same convention as the rest of the stack:
//! 1 byte per pixel for 8-bit frames, 2 bytes little-endian otherwise.

use serde::{Deserialize, Serialize};

/// Magic value readers check before trusting an attached segment.
pub const IMAGE_MAGIC: u64 = 0x4343_4431_4652_414d; // "CCD1FRAM"

/// Pixel bit depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BitDepth {
    /// 1 byte per pixel.
    Bits8,
    /// 2 bytes per pixel, little-endian.
    Bits16,
}

impl BitDepth {
    /// Bytes of storage per pixel.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Bits8 => 1,
            Self::Bits16 => 2,
        }
    }

    /// Bits per pixel as stamped into the header.
    pub fn bits(self) -> u32 {
        match self {
            Self::Bits8 => 8,
            Self::Bits16 => 16,
        }
    }

    /// Decode a header `bitpix` field.
    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            8 => Some(Self::Bits8),
            16 => Some(Self::Bits16),
            _ => None,
        }
    }
}

/// Fixed-layout image header, shared across processes.
///
/// The layout is part of the shared-memory contract: attaching readers
/// (possibly not written in Rust) index fields by offset. All fields
/// are naturally aligned; the struct is exactly 80 bytes.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct ImageHeader {
    /// Must equal [`IMAGE_MAGIC`] or the segment is not ours.
    pub magic: u64,
    /// Monotonically increasing frame counter, starts at 0.
    pub counter: u64,
    /// Capture timestamp, milliseconds since the Unix epoch (UTC).
    pub timestamp_ms: i64,
    /// Bits per pixel: 8 or 16.
    pub bitpix: u32,
    /// Frame width in (binned) pixels.
    pub width: u32,
    /// Frame height in (binned) pixels.
    pub height: u32,
    /// Non-zero when min/max/mean/std below are valid.
    pub stats_valid: u32,
    /// Minimum pixel value.
    pub min: f64,
    /// Maximum pixel value.
    pub max: f64,
    /// Mean pixel value.
    pub mean: f64,
    /// Standard deviation of pixel values.
    pub std: f64,
    /// Payload length in bytes (width * height * bytes/pixel).
    pub data_len: u64,
}

impl ImageHeader {
    /// Byte size of the header on the wire and in shared memory.
    pub const SIZE: usize = std::mem::size_of::<ImageHeader>();

    /// A blank header carrying only the magic value.
    pub fn empty() -> Self {
        Self {
            magic: IMAGE_MAGIC,
            counter: 0,
            timestamp_ms: 0,
            bitpix: 16,
            width: 0,
            height: 0,
            stats_valid: 0,
            min: 0.0,
            max: 0.0,
            mean: 0.0,
            std: 0.0,
            data_len: 0,
        }
    }

    /// Whether the magic value matches.
    pub fn magic_ok(&self) -> bool {
        self.magic == IMAGE_MAGIC
    }

    /// Serialize to the fixed little-endian byte layout.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        let mut at = 0;
        let mut put = |bytes: &[u8]| {
            buf[at..at + bytes.len()].copy_from_slice(bytes);
            at += bytes.len();
        };
        put(&self.magic.to_le_bytes());
        put(&self.counter.to_le_bytes());
        put(&self.timestamp_ms.to_le_bytes());
        put(&self.bitpix.to_le_bytes());
        put(&self.width.to_le_bytes());
        put(&self.height.to_le_bytes());
        put(&self.stats_valid.to_le_bytes());
        put(&self.min.to_le_bytes());
        put(&self.max.to_le_bytes());
        put(&self.mean.to_le_bytes());
        put(&self.std.to_le_bytes());
        put(&self.data_len.to_le_bytes());
        buf
    }

    /// Deserialize from the fixed little-endian byte layout.
    pub fn from_bytes(buf: &[u8; Self::SIZE]) -> Self {
        fn u64_at(buf: &[u8], at: usize) -> u64 {
            let mut b = [0u8; 8];
            b.copy_from_slice(&buf[at..at + 8]);
            u64::from_le_bytes(b)
        }
        fn u32_at(buf: &[u8], at: usize) -> u32 {
            let mut b = [0u8; 4];
            b.copy_from_slice(&buf[at..at + 4]);
            u32::from_le_bytes(b)
        }
        Self {
            magic: u64_at(buf, 0),
            counter: u64_at(buf, 8),
            timestamp_ms: u64_at(buf, 16) as i64,
            bitpix: u32_at(buf, 24),
            width: u32_at(buf, 28),
            height: u32_at(buf, 32),
            stats_valid: u32_at(buf, 36),
            min: f64::from_bits(u64_at(buf, 40)),
            max: f64::from_bits(u64_at(buf, 48)),
            mean: f64::from_bits(u64_at(buf, 56)),
            std: f64::from_bits(u64_at(buf, 64)),
            data_len: u64_at(buf, 72),
        }
    }
}

/// Min/max/mean/std of one frame's pixel values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std: f64,
}

impl FrameStats {
    /// Compute statistics over raw pixel bytes at the given depth.
    ///
    /// Returns `None` for an empty payload.
    pub fn compute(data: &[u8], depth: BitDepth) -> Option<FrameStats> {
        if data.is_empty() {
            return None;
        }
        let mut min = f64::MAX;
        let mut max = f64::MIN;
        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        let mut n = 0u64;
        let mut accumulate = |v: f64| {
            min = min.min(v);
            max = max.max(v);
            sum += v;
            sum_sq += v * v;
            n += 1;
        };
        match depth {
            BitDepth::Bits8 => {
                for &b in data {
                    accumulate(f64::from(b));
                }
            }
            BitDepth::Bits16 => {
                for pair in data.chunks_exact(2) {
                    accumulate(f64::from(u16::from_le_bytes([pair[0], pair[1]])));
                }
            }
        }
        if n == 0 {
            return None;
        }
        let mean = sum / n as f64;
        let var = (sum_sq / n as f64 - mean * mean).max(0.0);
        Some(FrameStats {
            min,
            max,
            mean,
            std: var.sqrt(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_80_bytes() {
        assert_eq!(ImageHeader::SIZE, 80);
    }

    #[test]
    fn header_byte_round_trip() {
        let mut hdr = ImageHeader::empty();
        hdr.counter = 42;
        hdr.timestamp_ms = 1_700_000_000_123;
        hdr.bitpix = 16;
        hdr.width = 1024;
        hdr.height = 768;
        hdr.stats_valid = 1;
        hdr.mean = 812.5;
        hdr.data_len = 1024 * 768 * 2;

        let back = ImageHeader::from_bytes(&hdr.to_bytes());
        assert!(back.magic_ok());
        assert_eq!(back.counter, 42);
        assert_eq!(back.width, 1024);
        assert_eq!(back.height, 768);
        assert_eq!(back.mean, 812.5);
        assert_eq!(back.data_len, 1024 * 768 * 2);
    }

    #[test]
    fn stats_8bit() {
        let data = [0u8, 10, 20];
        let stats = FrameStats::compute(&data, BitDepth::Bits8).unwrap();
        assert_eq!(stats.min, 0.0);
        assert_eq!(stats.max, 20.0);
        assert_eq!(stats.mean, 10.0);
        assert!((stats.std - (200.0f64 / 3.0).sqrt()).abs() < 1e-9);
    }

    #[test]
    fn stats_16bit_little_endian() {
        let pixels: Vec<u8> = [100u16, 300, 500]
            .iter()
            .flat_map(|p| p.to_le_bytes())
            .collect();
        let stats = FrameStats::compute(&pixels, BitDepth::Bits16).unwrap();
        assert_eq!(stats.min, 100.0);
        assert_eq!(stats.max, 500.0);
        assert_eq!(stats.mean, 300.0);
    }

    #[test]
    fn stats_empty_is_none() {
        assert!(FrameStats::compute(&[], BitDepth::Bits8).is_none());
    }
}
