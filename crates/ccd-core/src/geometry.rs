//! Frame geometry in unbinned sensor pixels.
//!
//! Three instances matter per camera: `array` (full silicon including
//! overscan), `field` (usable field of view) and the currently
//! configured sub-frame. The sub-frame is always contained within the
//! array; binning divides width/height on the way to the driver and
//! multiplies them back when reporting.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A rectangular region of the sensor, in unbinned pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameFormat {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Horizontal offset of the left edge from the array origin.
    pub x_off: u32,
    /// Vertical offset of the top edge from the array origin.
    pub y_off: u32,
}

impl FrameFormat {
    /// Full-frame format at the array origin.
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            x_off: 0,
            y_off: 0,
        }
    }

    /// Number of pixels in the region.
    pub fn pixel_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Whether `self` lies entirely within `outer`.
    pub fn contained_in(&self, outer: &FrameFormat) -> bool {
        self.x_off >= outer.x_off
            && self.y_off >= outer.y_off
            && self.x_off + self.width <= outer.x_off + outer.width
            && self.y_off + self.height <= outer.y_off + outer.height
    }

    /// Clamp this region so it fits inside `outer`.
    ///
    /// Offsets are moved first, then the size is shrunk if it still
    /// overhangs. Never grows the region.
    pub fn clamped_to(&self, outer: &FrameFormat) -> FrameFormat {
        let x_off = self.x_off.clamp(outer.x_off, outer.x_off + outer.width);
        let y_off = self.y_off.clamp(outer.y_off, outer.y_off + outer.height);
        let width = self.width.min(outer.x_off + outer.width - x_off);
        let height = self.height.min(outer.y_off + outer.height - y_off);
        FrameFormat {
            width,
            height,
            x_off,
            y_off,
        }
    }

    /// Dimensions as sent to the driver for a given binning.
    ///
    /// Width and height are divided by the binning factors (rounded
    /// down, minimum 1); offsets stay in unbinned pixels.
    pub fn binned(&self, hbin: u32, vbin: u32) -> FrameFormat {
        let hbin = hbin.max(1);
        let vbin = vbin.max(1);
        FrameFormat {
            width: (self.width / hbin).max(1),
            height: (self.height / vbin).max(1),
            x_off: self.x_off,
            y_off: self.y_off,
        }
    }

    /// Inverse of [`binned`](Self::binned) for reporting back to clients.
    pub fn unbinned(&self, hbin: u32, vbin: u32) -> FrameFormat {
        FrameFormat {
            width: self.width * hbin.max(1),
            height: self.height * vbin.max(1),
            x_off: self.x_off,
            y_off: self.y_off,
        }
    }

    /// Absolute corners `(x0, y0, x1, y1)`, the wire form of the
    /// `format` command. `x1`/`y1` are exclusive.
    pub fn corners(&self) -> (u32, u32, u32, u32) {
        (
            self.x_off,
            self.y_off,
            self.x_off + self.width,
            self.y_off + self.height,
        )
    }

    /// Build from absolute corners, normalizing a swapped pair.
    pub fn from_corners(x0: u32, y0: u32, x1: u32, y1: u32) -> Self {
        let (x0, x1) = if x0 <= x1 { (x0, x1) } else { (x1, x0) };
        let (y0, y1) = if y0 <= y1 { (y0, y1) } else { (y1, y0) };
        Self {
            width: x1 - x0,
            height: y1 - y0,
            x_off: x0,
            y_off: y0,
        }
    }

    /// Parse the comma-separated corner list used on the wire.
    pub fn parse_corners(s: &str) -> Option<Self> {
        let mut parts = s.split(',').map(|p| p.trim().parse::<u32>());
        let x0 = parts.next()?.ok()?;
        let y0 = parts.next()?.ok()?;
        let x1 = parts.next()?.ok()?;
        let y1 = parts.next()?.ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self::from_corners(x0, y0, x1, y1))
    }
}

impl fmt::Display for FrameFormat {
    /// Formats as the wire corner list `x0,y0,x1,y1`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (x0, y0, x1, y1) = self.corners();
        write!(f, "{},{},{},{}", x0, y0, x1, y1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn containment() {
        let array = FrameFormat::full(2048, 2048);
        let sub = FrameFormat {
            width: 100,
            height: 100,
            x_off: 1948,
            y_off: 0,
        };
        assert!(sub.contained_in(&array));
        let over = FrameFormat {
            width: 101,
            height: 100,
            x_off: 1948,
            y_off: 0,
        };
        assert!(!over.contained_in(&array));
    }

    #[test]
    fn clamp_shrinks_overhang() {
        let array = FrameFormat::full(1000, 1000);
        let req = FrameFormat {
            width: 500,
            height: 500,
            x_off: 800,
            y_off: 900,
        };
        let got = req.clamped_to(&array);
        assert!(got.contained_in(&array));
        assert_eq!(got.x_off, 800);
        assert_eq!(got.width, 200);
        assert_eq!(got.height, 100);
    }

    #[test]
    fn binning_round_trip_divides_then_multiplies() {
        let geo = FrameFormat::full(2048, 2048);
        let binned = geo.binned(2, 2);
        assert_eq!((binned.width, binned.height), (1024, 1024));
        let back = binned.unbinned(2, 2);
        assert_eq!((back.width, back.height), (2048, 2048));
    }

    #[test]
    fn corner_wire_form() {
        let geo = FrameFormat {
            width: 1900,
            height: 1900,
            x_off: 100,
            y_off: 100,
        };
        assert_eq!(geo.to_string(), "100,100,2000,2000");
        assert_eq!(FrameFormat::parse_corners("100,100,2000,2000"), Some(geo));
        assert_eq!(FrameFormat::parse_corners("2000,2000,100,100"), Some(geo));
        assert!(FrameFormat::parse_corners("1,2,3").is_none());
        assert!(FrameFormat::parse_corners("1,2,3,x").is_none());
        assert!(FrameFormat::parse_corners("1,2,3,4,5").is_none());
    }
}
