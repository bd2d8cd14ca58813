//! The ccdserv daemon: capture state machine, command dispatch table
//! and connection multiplexer.
//!
//! Composition order at startup: load [`config::ServerSettings`],
//! build a [`ccd_core::driver::DeviceSet`] from the registry, construct
//! the [`context::Daemon`], then spawn [`capture::run`] and hand the
//! daemon to [`serve::run`].

pub mod capture;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod handlers;
pub mod serve;
pub mod writer;

pub use config::{CaptureSettings, ListenAddr, ServerSettings};
pub use context::{Daemon, Session, Shared};
pub use dispatch::dispatch_line;
pub use writer::{FrameTarget, FrameWriter, RawFrameWriter};
