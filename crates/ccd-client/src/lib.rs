//! Client-side request engine for the ccdserv command protocol.
//!
//! The mirror image of the server's dispatch loop: send `key=value`
//! lines, collect reply lines until the trailing result code, and
//! consume unsolicited capture-state broadcasts.
//!
//! ```no_run
//! # async fn demo() -> Result<(), ccd_client::ClientError> {
//! let mut client = ccd_client::Client::connect("127.0.0.1:5071").await?;
//! client.send_ok("object=M31").await?;
//! let written = client.expose(2.5).await?;
//! println!("frame at {written:?}");
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod error;

pub use connection::{Client, ClientConfig, Event, Response};
pub use error::{ClientError, Result};
