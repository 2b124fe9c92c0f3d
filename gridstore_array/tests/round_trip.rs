//! End-to-end write/read round trips over local arrays.

use anyhow::Result;
use gridstore_array::*;
use gridstore_core::{Config, Datatype};
use tempfile::TempDir;

fn context() -> Result<Context> {
	Ok(Context::new(Config::default())?)
}

fn dense_4x4_schema() -> Result<ArraySchema> {
	Ok(ArraySchema::new(
		ArrayType::Dense,
		vec![Dimension::int("i", [0, 3], 2), Dimension::int("j", [0, 3], 2)],
		vec![Attribute::new("v", Datatype::Int32)],
		Layout::RowMajor,
		Layout::RowMajor,
		0,
	)?)
}

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

async fn read_i32s(ctx: &Context, uri: &str, subarray: Subarray, attr: &str) -> Result<Vec<i32>> {
	let mut reader = ctx.open_reader(uri, subarray, &[attr]).await?;
	let mut out = Vec::new();
	let mut scratch = vec![0u8; 1 << 16];
	loop {
		let status = reader
			.next(&mut [ReadBuffer {
				data: &mut scratch,
				offsets: None,
			}])
			.await?;
		out.extend(
			scratch[..status.counts[0].bytes as usize]
				.chunks_exact(4)
				.map(|chunk| i32::from_le_bytes(chunk.try_into().unwrap())),
		);
		if status.completed {
			break;
		}
	}
	Ok(out)
}

#[tokio::test]
async fn dense_2d_round_trip() -> Result<()> {
	let ctx = context()?;
	let dir = TempDir::new()?;
	let uri = dir.path().join("dense").to_string_lossy().to_string();
	ctx.create_array(&uri, &dense_4x4_schema()?).await?;

	// v = i*4 + j for all 16 cells, submitted in arbitrary order.
	let mut cells = Vec::new();
	for i in 0i64..4 {
		for j in 0i64..4 {
			cells.push((i, j));
		}
	}
	cells.reverse();
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

	let result = read_i32s(&ctx, &uri, Subarray::int(vec![[1, 2], [1, 3]]), "v").await?;
	assert_eq!(result, vec![5, 6, 7, 9, 10, 11]);

	// The full domain comes back in global cell order, tile by tile.
	let full = read_i32s(&ctx, &uri, Subarray::int(vec![[0, 3], [0, 3]]), "v").await?;
	assert_eq!(full, vec![0, 1, 4, 5, 2, 3, 6, 7, 8, 9, 12, 13, 10, 11, 14, 15]);
	Ok(())
}

#[tokio::test]
async fn dense_ordered_matches_unordered() -> Result<()> {
	let ctx = context()?;
	let dir = TempDir::new()?;
	let ordered_uri = dir.path().join("ordered").to_string_lossy().to_string();
	let unordered_uri = dir.path().join("unordered").to_string_lossy().to_string();
	ctx.create_array(&ordered_uri, &dense_4x4_schema()?).await?;
	ctx.create_array(&unordered_uri, &dense_4x4_schema()?).await?;

	// Global order of the 4x4 array with 2x2 tiles.
	let global: Vec<(i64, i64)> = vec![
		(0, 0), (0, 1), (1, 0), (1, 1),
		(0, 2), (0, 3), (1, 2), (1, 3),
		(2, 0), (2, 1), (3, 0), (3, 1),
		(2, 2), (2, 3), (3, 2), (3, 3),
	];
	let ordered_values: Vec<i32> = global.iter().map(|(i, j)| (i * 4 + j) as i32).collect();

	let mut writer = ctx
		.open_writer(&ordered_uri, WriteMode::DenseOrdered, &["v"], None)
		.await?;
	writer
		.submit(
			&[WriteBuffer {
				data: &i32_bytes(&ordered_values),
				offsets: None,
			}],
			None,
		)
		.await?;
	writer.finalize().await?;

	let unordered_values: Vec<i32> = global.iter().map(|(i, j)| (i * 4 + j) as i32).collect();
	let mut writer = ctx
		.open_writer(&unordered_uri, WriteMode::DenseUnordered, &["v"], None)
		.await?;
	writer
		.submit(
			&[WriteBuffer {
				data: &i32_bytes(&unordered_values),
				offsets: None,
			}],
			Some(&coords_2d(&global)),
		)
		.await?;
	writer.finalize().await?;

	let subarray = Subarray::int(vec![[0, 3], [0, 3]]);
	let from_ordered = read_i32s(&ctx, &ordered_uri, subarray.clone(), "v").await?;
	let from_unordered = read_i32s(&ctx, &unordered_uri, subarray, "v").await?;
	assert_eq!(from_ordered, from_unordered);
	Ok(())
}

#[tokio::test]
async fn variable_length_attribute() -> Result<()> {
	let ctx = context()?;
	let dir = TempDir::new()?;
	let uri = dir.path().join("strings").to_string_lossy().to_string();

	let schema = ArraySchema::new(
		ArrayType::Dense,
		vec![Dimension::int("i", [0, 2], 3)],
		vec![Attribute::new_var("s", Datatype::Char)],
		Layout::RowMajor,
		Layout::RowMajor,
		0,
	)?;
	ctx.create_array(&uri, &schema).await?;

	let mut writer = ctx.open_writer(&uri, WriteMode::DenseOrdered, &["s"], None).await?;
	writer
		.submit(
			&[WriteBuffer {
				data: b"abbccc",
				offsets: Some(&[0, 1, 3]),
			}],
			None,
		)
		.await?;
	writer.finalize().await?;

	let mut reader = ctx.open_reader(&uri, Subarray::int(vec![[0, 2]]), &["s"]).await?;
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
	assert_eq!(status.counts[0].bytes, 6);
	assert_eq!(&offsets[..3], &[0, 1, 3]);
	assert_eq!(&data[..6], b"abbccc");
	Ok(())
}

#[tokio::test]
async fn image_panel_read() -> Result<()> {
	let ctx = context()?;
	let dir = TempDir::new()?;
	let uri = dir.path().join("image").to_string_lossy().to_string();

	let schema = ArraySchema::new(
		ArrayType::Dense,
		vec![Dimension::int("y", [0, 299], 100), Dimension::int("x", [0, 299], 100)],
		vec![
			Attribute::new("r", Datatype::Int32),
			Attribute::new("g", Datatype::Int32),
			Attribute::new("b", Datatype::Int32),
		],
		Layout::RowMajor,
		Layout::RowMajor,
		0,
	)?;
	ctx.create_array(&uri, &schema).await?;

	// A 3x3 color palette, one constant color per 100x100 panel.
	let palette: Vec<[i32; 3]> = (0..9).map(|p| [p * 10, p * 10 + 1, p * 10 + 2]).collect();
	let panel_cells = 100 * 100;
	let mut red = Vec::new();
	let mut green = Vec::new();
	let mut blue = Vec::new();
	for color in &palette {
		red.extend(std::iter::repeat_n(color[0], panel_cells));
		green.extend(std::iter::repeat_n(color[1], panel_cells));
		blue.extend(std::iter::repeat_n(color[2], panel_cells));
	}

	let mut writer = ctx
		.open_writer(&uri, WriteMode::DenseOrdered, &["r", "g", "b"], None)
		.await?;
	writer
		.submit(
			&[
				WriteBuffer {
					data: &i32_bytes(&red),
					offsets: None,
				},
				WriteBuffer {
					data: &i32_bytes(&green),
					offsets: None,
				},
				WriteBuffer {
					data: &i32_bytes(&blue),
					offsets: None,
				},
			],
			None,
		)
		.await?;
	writer.finalize().await?;

	let subarray = Subarray::int(vec![[0, 299], [0, 299]]);
	let red_out = read_i32s(&ctx, &uri, subarray.clone(), "r").await?;
	let green_out = read_i32s(&ctx, &uri, subarray.clone(), "g").await?;
	let blue_out = read_i32s(&ctx, &uri, subarray, "b").await?;
	assert_eq!(red_out.len(), 9 * panel_cells);

	// Panels come back whole, in row-major panel order, each a constant
	// color from the palette.
	for (panel, color) in palette.iter().enumerate() {
		let start = panel * panel_cells;
		let end = start + panel_cells;
		assert!(red_out[start..end].iter().all(|value| value == &color[0]), "panel {panel} red");
		assert!(green_out[start..end].iter().all(|value| value == &color[1]), "panel {panel} green");
		assert!(blue_out[start..end].iter().all(|value| value == &color[2]), "panel {panel} blue");
	}
	Ok(())
}

#[tokio::test]
async fn multi_attribute_read_zips_per_attribute_reads() -> Result<()> {
	let ctx = context()?;
	let dir = TempDir::new()?;
	let uri = dir.path().join("zip").to_string_lossy().to_string();

	let schema = ArraySchema::new(
		ArrayType::Dense,
		vec![Dimension::int("i", [0, 3], 2), Dimension::int("j", [0, 3], 2)],
		vec![Attribute::new("a", Datatype::Int32), Attribute::new("b", Datatype::Int32)],
		Layout::RowMajor,
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
	let a_values: Vec<i32> = cells.iter().map(|(i, j)| (i * 100 + j) as i32).collect();
	let b_values: Vec<i32> = cells.iter().map(|(i, j)| (j * 100 + i) as i32).collect();

	let mut writer = ctx
		.open_writer(&uri, WriteMode::DenseUnordered, &["a", "b"], None)
		.await?;
	writer
		.submit(
			&[
				WriteBuffer {
					data: &i32_bytes(&a_values),
					offsets: None,
				},
				WriteBuffer {
					data: &i32_bytes(&b_values),
					offsets: None,
				},
			],
			Some(&coords_2d(&cells)),
		)
		.await?;
	writer.finalize().await?;

	let subarray = Subarray::int(vec![[0, 2], [1, 3]]);

	// One read over both attributes.
	let mut reader = ctx.open_reader(&uri, subarray.clone(), &["a", "b"]).await?;
	let mut a_joint = vec![0u8; 1 << 12];
	let mut b_joint = vec![0u8; 1 << 12];
	let status = reader
		.next(&mut [
			ReadBuffer {
				data: &mut a_joint,
				offsets: None,
			},
			ReadBuffer {
				data: &mut b_joint,
				offsets: None,
			},
		])
		.await?;
	assert!(status.completed);
	assert_eq!(status.counts[0].cells, status.counts[1].cells);

	// Two single-attribute reads.
	let a_single = read_i32s(&ctx, &uri, subarray.clone(), "a").await?;
	let b_single = read_i32s(&ctx, &uri, subarray, "b").await?;

	assert_eq!(a_joint[..status.counts[0].bytes as usize], i32_bytes(&a_single)[..]);
	assert_eq!(b_joint[..status.counts[1].bytes as usize], i32_bytes(&b_single)[..]);
	Ok(())
}

#[tokio::test]
async fn incomplete_reads_resume() -> Result<()> {
	let ctx = context()?;
	let dir = TempDir::new()?;
	let uri = dir.path().join("resume").to_string_lossy().to_string();
	ctx.create_array(&uri, &dense_4x4_schema()?).await?;

	let mut cells = Vec::new();
	for i in 0i64..4 {
		for j in 0i64..4 {
			cells.push((i, j));
		}
	}
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
	writer.finalize().await?;

	// A buffer holding three cells forces several incomplete rounds.
	let mut reader = ctx
		.open_reader(&uri, Subarray::int(vec![[0, 3], [0, 3]]), &["v"])
		.await?;
	let mut collected = Vec::new();
	let mut rounds = 0;
	loop {
		let mut scratch = vec![0u8; 12];
		let status = reader
			.next(&mut [ReadBuffer {
				data: &mut scratch,
				offsets: None,
			}])
			.await?;
		collected.extend(
			scratch[..status.counts[0].bytes as usize]
				.chunks_exact(4)
				.map(|chunk| i32::from_le_bytes(chunk.try_into().unwrap())),
		);
		rounds += 1;
		if status.completed {
			break;
		}
	}
	assert!(rounds >= 6, "expected several incomplete rounds, got {rounds}");
	assert_eq!(collected.len(), 16);
	Ok(())
}

#[tokio::test]
async fn read_edge_cases() -> Result<()> {
	let ctx = context()?;
	let dir = TempDir::new()?;
	let uri = dir.path().join("edges").to_string_lossy().to_string();
	ctx.create_array(&uri, &dense_4x4_schema()?).await?;

	// Zero fragments: an empty stream, no error.
	let empty = read_i32s(&ctx, &uri, Subarray::int(vec![[0, 3], [0, 3]]), "v").await?;
	assert!(empty.is_empty());

	// Empty subarray: an empty stream.
	let empty = read_i32s(&ctx, &uri, Subarray::int(vec![[3, 1], [0, 3]]), "v").await?;
	assert!(empty.is_empty());

	// Fully outside the domain: an error.
	assert!(ctx.open_reader(&uri, Subarray::int(vec![[9, 12], [0, 3]]), &["v"]).await.is_err());

	// Unknown attribute: an error.
	assert!(
		ctx
			.open_reader(&uri, Subarray::int(vec![[0, 3], [0, 3]]), &["nope"])
			.await
			.is_err()
	);
	Ok(())
}
