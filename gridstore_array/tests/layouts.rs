//! Cell and tile layouts beyond the row-major default, float-domain sparse
//! arrays, streaming submits and the external-sort spill path.

use anyhow::Result;
use gridstore_array::*;
use gridstore_core::{Config, Datatype};
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

/// Point reads are layout-independent: a one-cell subarray must return the
/// value written at that coordinate no matter how tiles serialize cells.
async fn point_read(ctx: &Context, uri: &str, i: i64, j: i64) -> Result<i32> {
	let mut reader = ctx
		.open_reader(uri, Subarray::int(vec![[i, i], [j, j]]), &["v"])
		.await?;
	let mut scratch = vec![0u8; 16];
	let status = reader
		.next(&mut [ReadBuffer {
			data: &mut scratch,
			offsets: None,
		}])
		.await?;
	assert!(status.completed);
	assert_eq!(status.counts[0].cells, 1, "a point read returns exactly one cell");
	Ok(i32::from_le_bytes(scratch[..4].try_into().unwrap()))
}

#[tokio::test]
async fn hilbert_cell_order_stores_and_finds_cells() -> Result<()> {
	let ctx = Context::new(Config::default())?;
	let dir = TempDir::new()?;
	let uri = dir.path().join("hilbert").to_string_lossy().to_string();

	let schema = ArraySchema::new(
		ArrayType::Dense,
		vec![Dimension::int("i", [0, 7], 4), Dimension::int("j", [0, 7], 4)],
		vec![Attribute::new("v", Datatype::Int32)],
		Layout::Hilbert,
		Layout::RowMajor,
		0,
	)?;
	ctx.create_array(&uri, &schema).await?;

	let mut cells = Vec::new();
	for i in 0i64..8 {
		for j in 0i64..8 {
			cells.push((i, j));
		}
	}
	let values: Vec<i32> = cells.iter().map(|(i, j)| (i * 8 + j) as i32).collect();
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
	writer.finalize().await?;

	for (i, j) in [(0, 0), (3, 4), (7, 7), (5, 2), (4, 4)] {
		assert_eq!(point_read(&ctx, &uri, i, j).await?, (i * 8 + j) as i32, "cell ({i},{j})");
	}

	// A full read still yields every cell exactly once.
	let mut reader = ctx
		.open_reader(&uri, Subarray::int(vec![[0, 7], [0, 7]]), &["v"])
		.await?;
	let mut scratch = vec![0u8; 8 * 8 * 4];
	let status = reader
		.next(&mut [ReadBuffer {
			data: &mut scratch,
			offsets: None,
		}])
		.await?;
	assert!(status.completed);
	let mut seen: Vec<i32> = scratch[..status.counts[0].bytes as usize]
		.chunks_exact(4)
		.map(|chunk| i32::from_le_bytes(chunk.try_into().unwrap()))
		.collect();
	seen.sort_unstable();
	assert_eq!(seen, (0..64).collect::<Vec<i32>>());
	Ok(())
}

#[tokio::test]
async fn column_major_emission_order() -> Result<()> {
	let ctx = Context::new(Config::default())?;
	let dir = TempDir::new()?;
	let uri = dir.path().join("colmajor").to_string_lossy().to_string();

	// One 4x4 tile, so the emission order is pure column-major.
	let schema = ArraySchema::new(
		ArrayType::Dense,
		vec![Dimension::int("i", [0, 3], 4), Dimension::int("j", [0, 3], 4)],
		vec![Attribute::new("v", Datatype::Int32)],
		Layout::ColMajor,
		Layout::RowMajor,
		0,
	)?;
	ctx.create_array(&uri, &schema).await?;

	let mut cells = Vec::new();
	for i in 0i64..4 {
		for j in 0i64..4 {
			cells.push((i, j));
		}
	}
	let values: Vec<i32> = cells.iter().map(|(i, j)| (i * 4 + j) as i32).collect();
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
	writer.finalize().await?;

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
	let emitted: Vec<i32> = scratch
		.chunks_exact(4)
		.map(|chunk| i32::from_le_bytes(chunk.try_into().unwrap()))
		.collect();
	// Column-major: j varies slowest inside the tile, i fastest.
	let expected: Vec<i32> = (0..4).flat_map(|j| (0..4).map(move |i| i * 4 + j)).collect();
	assert_eq!(emitted, expected);
	Ok(())
}

#[tokio::test]
async fn float_domain_sparse_array() -> Result<()> {
	let ctx = Context::new(Config::default())?;
	let dir = TempDir::new()?;
	let uri = dir.path().join("floats").to_string_lossy().to_string();

	let schema = ArraySchema::new(
		ArrayType::Sparse,
		vec![Dimension::float("x", [-10.0, 10.0], 1.0)],
		vec![Attribute::new("v", Datatype::Int32)],
		Layout::RowMajor,
		Layout::RowMajor,
		4,
	)?;
	ctx.create_array(&uri, &schema).await?;

	let points: Vec<f64> = vec![3.25, -7.5, 0.0, 9.75, -0.125];
	let values: Vec<i32> = vec![1, 2, 3, 4, 5];
	let coords: Vec<u8> = points.iter().flat_map(|point| point.to_le_bytes()).collect();

	let mut writer = ctx.open_writer(&uri, WriteMode::SparseUnordered, &["v"], None).await?;
	writer
		.submit(
			&[WriteBuffer {
				data: &i32_bytes(&values),
				offsets: None,
			}],
			Some(&coords),
		)
		.await?;
	writer.finalize().await?;

	// Cells outside the queried range stay out; order is ascending.
	let mut reader = ctx
		.open_reader(&uri, Subarray::float(vec![[-1.0, 10.0]]), &["__coords", "v"])
		.await?;
	let mut coords_out = vec![0u8; 256];
	let mut values_out = vec![0u8; 256];
	let status = reader
		.next(&mut [
			ReadBuffer {
				data: &mut coords_out,
				offsets: None,
			},
			ReadBuffer {
				data: &mut values_out,
				offsets: None,
			},
		])
		.await?;
	assert!(status.completed);
	assert_eq!(status.counts[0].cells, 4);
	let restored: Vec<(f64, i32)> = (0..4)
		.map(|index| {
			(
				f64::from_le_bytes(coords_out[index * 8..(index + 1) * 8].try_into().unwrap()),
				i32::from_le_bytes(values_out[index * 4..(index + 1) * 4].try_into().unwrap()),
			)
		})
		.collect();
	assert_eq!(restored, vec![(-0.125, 5), (0.0, 3), (3.25, 1), (9.75, 4)]);
	Ok(())
}

#[tokio::test]
async fn sparse_variable_length_attribute() -> Result<()> {
	let ctx = Context::new(Config::default())?;
	let dir = TempDir::new()?;
	let uri = dir.path().join("sparse_var").to_string_lossy().to_string();

	let schema = ArraySchema::new(
		ArrayType::Sparse,
		vec![Dimension::int("i", [0, 99], 10)],
		vec![Attribute::new_var("s", Datatype::Char)],
		Layout::RowMajor,
		Layout::RowMajor,
		2,
	)?;
	ctx.create_array(&uri, &schema).await?;

	// Unsorted on purpose; three cells overflow one capacity-2 tile.
	let cells: Vec<i64> = vec![40, 7, 99];
	let coords: Vec<u8> = cells.iter().flat_map(|cell| cell.to_le_bytes()).collect();
	let mut writer = ctx.open_writer(&uri, WriteMode::SparseUnordered, &["s"], None).await?;
	writer
		.submit(
			&[WriteBuffer {
				data: b"mediumxxlong",
				offsets: Some(&[0, 6, 8]),
			}],
			Some(&coords),
		)
		.await?;
	writer.finalize().await?;

	let mut reader = ctx.open_reader(&uri, Subarray::int(vec![[0, 99]]), &["s"]).await?;
	let mut data = vec![0u8; 64];
	let mut offsets = vec![0u64; 8];
	let status = reader
		.next(&mut [ReadBuffer {
			data: &mut data,
			offsets: Some(&mut offsets),
		}])
		.await?;
	assert!(status.completed);
	assert_eq!(status.counts[0].cells, 3);
	// Sorted by coordinate: 7 -> "xx", 40 -> "medium", 99 -> "long".
	assert_eq!(&offsets[..3], &[0, 2, 8]);
	assert_eq!(&data[..status.counts[0].bytes as usize], b"xxmediumlong");
	Ok(())
}

#[tokio::test]
async fn streaming_submits_accumulate() -> Result<()> {
	let ctx = Context::new(Config::default())?;
	let dir = TempDir::new()?;
	let uri = dir.path().join("streaming").to_string_lossy().to_string();

	let schema = ArraySchema::new(
		ArrayType::Dense,
		vec![Dimension::int("i", [0, 3], 2), Dimension::int("j", [0, 3], 2)],
		vec![Attribute::new("v", Datatype::Int32)],
		Layout::RowMajor,
		Layout::RowMajor,
		0,
	)?;
	ctx.create_array(&uri, &schema).await?;

	// One ordered submit per tile of the stream.
	let tiles: Vec<Vec<i32>> = vec![
		vec![0, 1, 4, 5],
		vec![2, 3, 6, 7],
		vec![8, 9, 12, 13],
		vec![10, 11, 14, 15],
	];
	let mut writer = ctx.open_writer(&uri, WriteMode::DenseOrdered, &["v"], None).await?;
	for tile in &tiles {
		writer
			.submit(
				&[WriteBuffer {
					data: &i32_bytes(tile),
					offsets: None,
				}],
				None,
			)
			.await?;
	}
	writer.finalize().await?;

	assert_eq!(point_read(&ctx, &uri, 1, 2).await?, 6);
	assert_eq!(point_read(&ctx, &uri, 3, 0).await?, 12);
	Ok(())
}

#[tokio::test]
async fn unordered_writes_spill_to_sorted_runs() -> Result<()> {
	// A tiny sort buffer forces a spill after nearly every submitted cell.
	let config = Config {
		sort_buffer_size: 256,
		..Config::default()
	};
	let ctx = Context::new(config)?;
	let dir = TempDir::new()?;
	let uri = dir.path().join("spill").to_string_lossy().to_string();

	let schema = ArraySchema::new(
		ArrayType::Sparse,
		vec![Dimension::int("i", [0, 9999], 100)],
		vec![Attribute::new("v", Datatype::Int32)],
		Layout::RowMajor,
		Layout::RowMajor,
		32,
	)?;
	ctx.create_array(&uri, &schema).await?;

	// 500 cells in a scrambled order.
	let cells: Vec<i64> = (0..500).map(|index| (index * 7919) % 10000).collect();
	let values: Vec<i32> = (0..500).collect();
	let coords: Vec<u8> = cells.iter().flat_map(|cell| cell.to_le_bytes()).collect();

	let mut writer = ctx.open_writer(&uri, WriteMode::SparseUnordered, &["v"], None).await?;
	writer
		.submit(
			&[WriteBuffer {
				data: &i32_bytes(&values),
				offsets: None,
			}],
			Some(&coords),
		)
		.await?;
	writer.finalize().await?;

	let mut reader = ctx
		.open_reader(&uri, Subarray::int(vec![[0, 9999]]), &["__coords", "v"])
		.await?;
	let mut restored = Vec::new();
	loop {
		let mut coords_out = vec![0u8; 1 << 12];
		let mut values_out = vec![0u8; 1 << 12];
		let status = reader
			.next(&mut [
				ReadBuffer {
					data: &mut coords_out,
					offsets: None,
				},
				ReadBuffer {
					data: &mut values_out,
					offsets: None,
				},
			])
			.await?;
		for index in 0..status.counts[0].cells as usize {
			restored.push((
				i64::from_le_bytes(coords_out[index * 8..(index + 1) * 8].try_into().unwrap()),
				i32::from_le_bytes(values_out[index * 4..(index + 1) * 4].try_into().unwrap()),
			));
		}
		if status.completed {
			break;
		}
	}

	let mut expected: Vec<(i64, i32)> = cells.iter().copied().zip(values.iter().copied()).collect();
	expected.sort_unstable();
	assert_eq!(restored, expected);
	Ok(())
}
