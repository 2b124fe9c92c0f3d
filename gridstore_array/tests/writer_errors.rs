//! The writer's argument checking: wrong buffers, bad regions, domain
//! violations, incomplete and duplicated dense writes.

use anyhow::Result;
use gridstore_array::*;
use gridstore_core::{Config, Datatype, Error};
use tempfile::TempDir;

fn i32_bytes(values: &[i32]) -> Vec<u8> {
	values.iter().flat_map(|value| value.to_le_bytes()).collect()
}

fn coords_2d(cells: &[(i64, i64)]) -> Vec<u8> {
	let mut out = Vec::new();
	for (i, j) in cells {
		out.extend_from_slice(&i.to_le_bytes());
		out.extend_from_slice(&j.to_le_bytes());
	}
	out
}

async fn dense_array(dir: &TempDir, name: &str) -> Result<(Context, String)> {
	let ctx = Context::new(Config::default())?;
	let uri = dir.path().join(name).to_string_lossy().to_string();
	let schema = ArraySchema::new(
		ArrayType::Dense,
		vec![Dimension::int("i", [0, 3], 2), Dimension::int("j", [0, 3], 2)],
		vec![Attribute::new("v", Datatype::Int32)],
		Layout::RowMajor,
		Layout::RowMajor,
		0,
	)?;
	ctx.create_array(&uri, &schema).await?;
	Ok((ctx, uri))
}

#[tokio::test]
async fn attribute_list_must_cover_the_schema() -> Result<()> {
	let dir = TempDir::new()?;
	let (ctx, uri) = dense_array(&dir, "attrs").await?;

	assert!(ctx.open_writer(&uri, WriteMode::DenseOrdered, &[], None).await.is_err());
	assert!(
		ctx
			.open_writer(&uri, WriteMode::DenseOrdered, &["v", "v"], None)
			.await
			.is_err()
	);
	assert!(
		ctx
			.open_writer(&uri, WriteMode::DenseOrdered, &["w"], None)
			.await
			.is_err()
	);
	Ok(())
}

#[tokio::test]
async fn dense_region_must_be_tile_aligned() -> Result<()> {
	let dir = TempDir::new()?;
	let (ctx, uri) = dense_array(&dir, "aligned").await?;

	let unaligned = ctx
		.open_writer(
			&uri,
			WriteMode::DenseOrdered,
			&["v"],
			Some(Subarray::int(vec![[1, 2], [0, 3]])),
		)
		.await;
	assert!(matches!(unaligned.unwrap_err(), Error::InvalidArgument(_)));

	let outside = ctx
		.open_writer(
			&uri,
			WriteMode::DenseOrdered,
			&["v"],
			Some(Subarray::int(vec![[0, 5], [0, 3]])),
		)
		.await;
	assert!(outside.is_err());

	let sparse_mode = ctx.open_writer(&uri, WriteMode::SparseUnordered, &["v"], None).await;
	assert!(sparse_mode.is_err(), "sparse modes must reject dense arrays");
	Ok(())
}

#[tokio::test]
async fn cells_outside_the_domain_are_rejected_at_write_time() -> Result<()> {
	let dir = TempDir::new()?;
	let (ctx, uri) = dense_array(&dir, "domain").await?;

	let mut writer = ctx.open_writer(&uri, WriteMode::DenseUnordered, &["v"], None).await?;
	let result = writer
		.submit(
			&[WriteBuffer {
				data: &i32_bytes(&[1]),
				offsets: None,
			}],
			Some(&coords_2d(&[(4, 0)])),
		)
		.await;
	assert!(matches!(result.unwrap_err(), Error::InvalidArgument(_)));
	Ok(())
}

#[tokio::test]
async fn incomplete_dense_writes_fail_at_finalize() -> Result<()> {
	let dir = TempDir::new()?;
	let (ctx, uri) = dense_array(&dir, "incomplete").await?;

	let mut writer = ctx.open_writer(&uri, WriteMode::DenseUnordered, &["v"], None).await?;
	writer
		.submit(
			&[WriteBuffer {
				data: &i32_bytes(&[1, 2]),
				offsets: None,
			}],
			Some(&coords_2d(&[(0, 0), (0, 1)])),
		)
		.await?;
	assert!(writer.finalize().await.is_err(), "2 of 16 cells is not a dense fragment");

	// The failed fragment never became visible.
	let mut reader = ctx
		.open_reader(&uri, Subarray::int(vec![[0, 3], [0, 3]]), &["v"])
		.await?;
	let mut scratch = vec![0u8; 64];
	let status = reader
		.next(&mut [ReadBuffer {
			data: &mut scratch,
			offsets: None,
		}])
		.await?;
	assert!(status.completed);
	assert_eq!(status.counts[0].cells, 0);
	Ok(())
}

#[tokio::test]
async fn duplicate_cells_in_one_dense_write_fail() -> Result<()> {
	let dir = TempDir::new()?;
	let (ctx, uri) = dense_array(&dir, "duplicates").await?;

	let mut cells = Vec::new();
	for i in 0i64..4 {
		for j in 0i64..4 {
			cells.push((i, j));
		}
	}
	// Replace one cell with a duplicate of another: count matches, coverage
	// does not.
	cells[15] = (0, 0);
	let values: Vec<i32> = (0..16).collect();

	let mut writer = ctx.open_writer(&uri, WriteMode::DenseUnordered, &["v"], None).await?;
	writer
		.submit(
			&[WriteBuffer {
				data: &i32_bytes(&values),
				offsets: None,
			}],
			Some(&coords_2d(&cells)),
		)
		.await?;
	assert!(matches!(writer.finalize().await.unwrap_err(), Error::InvalidArgument(_)));
	Ok(())
}

#[tokio::test]
async fn buffer_shapes_are_checked() -> Result<()> {
	let dir = TempDir::new()?;
	let (ctx, uri) = dense_array(&dir, "shapes").await?;
	let mut writer = ctx.open_writer(&uri, WriteMode::DenseUnordered, &["v"], None).await?;

	// A value buffer that is not a whole number of cells.
	let result = writer
		.submit(
			&[WriteBuffer {
				data: &[1, 2, 3],
				offsets: None,
			}],
			Some(&coords_2d(&[(0, 0)])),
		)
		.await;
	assert!(result.is_err());

	// A coordinate buffer with the wrong cell count.
	let result = writer
		.submit(
			&[WriteBuffer {
				data: &i32_bytes(&[1, 2]),
				offsets: None,
			}],
			Some(&coords_2d(&[(0, 0)])),
		)
		.await;
	assert!(result.is_err());

	// Missing coordinates in an unordered mode.
	let result = writer
		.submit(
			&[WriteBuffer {
				data: &i32_bytes(&[1]),
				offsets: None,
			}],
			None,
		)
		.await;
	assert!(result.is_err());
	Ok(())
}

#[tokio::test]
async fn ordered_writes_reject_overflow_and_coordinates() -> Result<()> {
	let dir = TempDir::new()?;
	let (ctx, uri) = dense_array(&dir, "ordered").await?;

	let mut writer = ctx.open_writer(&uri, WriteMode::DenseOrdered, &["v"], None).await?;
	let result = writer
		.submit(
			&[WriteBuffer {
				data: &i32_bytes(&[1]),
				offsets: None,
			}],
			Some(&coords_2d(&[(0, 0)])),
		)
		.await;
	assert!(result.is_err(), "ordered writes take no coordinates");

	let too_many: Vec<i32> = (0..20).collect();
	let result = writer
		.submit(
			&[WriteBuffer {
				data: &i32_bytes(&too_many),
				offsets: None,
			}],
			None,
		)
		.await;
	assert!(result.is_err(), "17th cell overflows the region");
	Ok(())
}
