//! A linear, byte addressable view over an array of fixed size disks that
//! are only reachable through request/response packets on a byte stream.
//!
//! [`ArrayClient`] splits arbitrary reads and writes into whole block
//! operations, keeps the server's implicit cursor in step and consults an
//! optional [`BlockCache`]. The [`server`] and [`io`] modules provide an
//! emulated array speaking the same protocol.
#[macro_use]
extern crate log;

mod array;
pub mod cache;
pub mod codec;
mod error;
pub mod geometry;
pub mod io;
mod mount;
pub mod server;
pub mod transport;

pub use crate::array::ArrayClient;
pub use crate::cache::{BlockCache, LruCache, NoCache};
pub use crate::error::{ArrayError, Result};
pub use crate::geometry::{ArrayConfig, Geometry};
pub use crate::mount::MountState;
pub use crate::transport::Session;
