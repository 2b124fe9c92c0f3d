//! The array engine: schemas, coordinate algebra, fragments, the read
//! coordinator and the array lifecycle.
//!
//! An array is a directory holding a binary schema file and a set of
//! append-only fragment directories, one per write session. Readers merge
//! the visible fragments newest-first; writers never mutate existing
//! fragments. See [`Context`] for the entry points.

pub mod array;
pub use array::*;
pub mod cache;
pub mod consolidate;
pub mod coords;
pub use coords::Subarray;
pub mod fragment;
pub use fragment::{FragmentWriter, WriteBuffer, WriteMode};
pub mod read;
pub use read::{ArrayReader, BufferCount, ReadBuffer, ReadStatus};
pub mod schema;
pub use schema::*;
mod sort;
mod tile;
