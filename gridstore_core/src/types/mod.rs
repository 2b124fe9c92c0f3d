//! Fundamental value types: byte buffers, byte ranges and scalar datatypes.

mod blob;
mod byte_range;
mod datatype;

pub use blob::*;
pub use byte_range::*;
pub use datatype::*;
