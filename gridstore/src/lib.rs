//! # gridstore
//!
//! A storage engine for dense and sparse multi-dimensional arrays. Arrays
//! are stored as immutable schemas plus append-only fragments of compressed
//! tiles, on a local filesystem, HDFS or Azure Blob storage.
//!
//! ## Usage
//!
//! ```rust
//! use gridstore::prelude::*;
//! use anyhow::Result;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let ctx = Context::new(Config::from_env()?)?;
//!
//!     let schema = ArraySchema::new(
//!         ArrayType::Dense,
//!         vec![Dimension::int("row", [0, 3], 2), Dimension::int("col", [0, 3], 2)],
//!         vec![Attribute::new("v", Datatype::Int32)],
//!         Layout::RowMajor,
//!         Layout::RowMajor,
//!         0,
//!     )?;
//!
//!     let dir = tempfile::tempdir()?;
//!     let uri = dir.path().join("example").to_string_lossy().to_string();
//!     ctx.create_array(&uri, &schema).await?;
//!
//!     // Write all 16 cells through the unordered path.
//!     let mut coords = Vec::new();
//!     let mut values = Vec::new();
//!     for row in 0i64..4 {
//!         for col in 0i64..4 {
//!             coords.extend_from_slice(&row.to_le_bytes());
//!             coords.extend_from_slice(&col.to_le_bytes());
//!             values.extend_from_slice(&((row * 4 + col) as i32).to_le_bytes());
//!         }
//!     }
//!     let mut writer = ctx
//!         .open_writer(&uri, WriteMode::DenseUnordered, &["v"], None)
//!         .await?;
//!     writer
//!         .submit(&[WriteBuffer { data: &values, offsets: None }], Some(&coords))
//!         .await?;
//!     writer.finalize().await?;
//!
//!     // Read a subarray back.
//!     let mut reader = ctx
//!         .open_reader(&uri, Subarray::int(vec![[1, 2], [1, 3]]), &["v"])
//!         .await?;
//!     let mut out = vec![0u8; 64];
//!     let status = reader.next(&mut [ReadBuffer { data: &mut out, offsets: None }]).await?;
//!     assert!(status.completed);
//!     assert_eq!(status.counts[0].cells, 6);
//!     Ok(())
//! }
//! ```

pub use gridstore_array as array;
pub use gridstore_core as core;

/// The common imports of an application using the engine.
pub mod prelude {
	pub use gridstore_array::{
		ArrayReader, ArraySchema, ArrayType, Attribute, BufferCount, Context, Dimension, FragmentWriter, Layout,
		ReadBuffer, ReadStatus, Subarray, WriteBuffer, WriteMode,
	};
	pub use gridstore_core::codec::Compression;
	pub use gridstore_core::{Blob, ByteRange, Config, Datatype, Error, Result};
}
