//! Core types and capability contracts for the ccdserv daemon.
//!
//! This crate defines everything the daemon, the drivers and the client
//! agree on: the device capability traits ([`capability`]), the driver
//! factory/registry plumbing ([`driver`]), frame geometry and the image
//! record ([`geometry`], [`image`]), the capture state machine's state
//! and request flags ([`state`]), and the command protocol's result
//! codes and line format ([`protocol`]).
//!
//! Nothing in here talks to hardware or opens sockets; vendor drivers
//! implement the traits and the server crate owns all I/O.

pub mod capability;
pub mod driver;
pub mod error;
pub mod geometry;
pub mod image;
pub mod protocol;
pub mod state;

pub use capability::{Camera, CapturePoll, CaptureStatus, FilterWheel, Focuser};
pub use driver::{DeviceSet, DriverFactory, DriverRegistry};
pub use error::{DriverError, DriverResult};
pub use geometry::FrameFormat;
pub use image::{BitDepth, FrameStats, ImageHeader, IMAGE_MAGIC};
pub use protocol::ResultCode;
pub use state::{CaptureState, RequestFlags};
