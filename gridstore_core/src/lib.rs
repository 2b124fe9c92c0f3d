//! Low-level building blocks of the gridstore engine: byte buffers, typed
//! errors, little-endian value readers/writers, tile compression codecs, the
//! virtual filesystem and engine configuration.

pub mod codec;
pub mod concurrency;
pub use concurrency::*;
pub mod config;
pub use config::*;
mod error;
pub use error::*;
pub mod io;
mod macros;
pub mod types;
pub use types::*;
pub mod vfs;
