//! Codec behavior observed through the full write/read pipeline.

use anyhow::Result;
use gridstore_array::*;
use gridstore_core::codec::Compression;
use gridstore_core::{Config, Datatype};
use rstest::rstest;
use tempfile::TempDir;

fn i32_bytes(values: &[i32]) -> Vec<u8> {
	values.iter().flat_map(|value| value.to_le_bytes()).collect()
}

/// A 64x64 dense array with one tile and a compressible value pattern.
async fn write_and_read(uri: &str, compression: Compression) -> Result<(Vec<i32>, u64)> {
	let ctx = Context::new(Config::default())?;
	let schema = ArraySchema::new(
		ArrayType::Dense,
		vec![Dimension::int("i", [0, 63], 64), Dimension::int("j", [0, 63], 64)],
		vec![Attribute::new("v", Datatype::Int32).with_compression(compression)],
		Layout::RowMajor,
		Layout::RowMajor,
		0,
	)?;
	ctx.create_array(uri, &schema).await?;

	let values: Vec<i32> = (0..64 * 64).map(|index| index / 16).collect();
	let mut writer = ctx.open_writer(uri, WriteMode::DenseOrdered, &["v"], None).await?;
	writer
		.submit(
			&[WriteBuffer {
				data: &i32_bytes(&values),
				offsets: None,
			}],
			None,
		)
		.await?;
	writer.finalize().await?;

	let mut reader = ctx
		.open_reader(uri, Subarray::int(vec![[0, 63], [0, 63]]), &["v"])
		.await?;
	let mut scratch = vec![0u8; 64 * 64 * 4];
	let status = reader
		.next(&mut [ReadBuffer {
			data: &mut scratch,
			offsets: None,
		}])
		.await?;
	assert!(status.completed);
	let restored: Vec<i32> = scratch[..status.counts[0].bytes as usize]
		.chunks_exact(4)
		.map(|chunk| i32::from_le_bytes(chunk.try_into().unwrap()))
		.collect();

	let data_file_size = attribute_file_size(uri)?;
	Ok((restored, data_file_size))
}

/// Size of `v.tdb` inside the array's single fragment.
fn attribute_file_size(uri: &str) -> Result<u64> {
	for entry in std::fs::read_dir(uri)? {
		let path = entry?.path();
		if path.is_dir() {
			return Ok(std::fs::metadata(path.join("v.tdb"))?.len());
		}
	}
	anyhow::bail!("no fragment directory under {uri}")
}

#[rstest]
#[case::none(Compression::None)]
#[case::gzip(Compression::Gzip { level: 6 })]
#[case::zstd(Compression::Zstd { level: 3 })]
#[case::lz4(Compression::Lz4)]
#[case::blosc(Compression::Blosc)]
#[case::rle(Compression::Rle)]
#[tokio::test]
async fn every_codec_round_trips(#[case] compression: Compression) -> Result<()> {
	let dir = TempDir::new()?;
	let uri = dir.path().join("array").to_string_lossy().to_string();
	let (restored, _) = write_and_read(&uri, compression).await?;
	let expected: Vec<i32> = (0..64 * 64).map(|index| index / 16).collect();
	assert_eq!(restored, expected, "{compression:?} must round-trip bit-exactly");
	Ok(())
}

#[tokio::test]
async fn compressed_and_uncompressed_readbacks_match() -> Result<()> {
	let dir = TempDir::new()?;
	let plain_uri = dir.path().join("plain").to_string_lossy().to_string();
	let zstd_uri = dir.path().join("zstd").to_string_lossy().to_string();

	let (plain, plain_size) = write_and_read(&plain_uri, Compression::None).await?;
	let (compressed, zstd_size) = write_and_read(&zstd_uri, Compression::Zstd { level: 3 }).await?;

	assert_eq!(plain, compressed, "readbacks must be byte-identical");
	assert!(
		zstd_size < plain_size,
		"zstd tiles ({zstd_size} bytes) must be smaller than stored-verbatim tiles ({plain_size} bytes)"
	);
	Ok(())
}

#[tokio::test]
async fn rle_shrinks_constant_tiles() -> Result<()> {
	let dir = TempDir::new()?;
	let uri = dir.path().join("rle").to_string_lossy().to_string();
	let (_, size) = write_and_read(&uri, Compression::Rle).await?;
	// 4096 cells in runs of 16: 256 runs of 8 bytes plus the frame header.
	assert!(size < 3_000, "rle output of {size} bytes is larger than expected");
	Ok(())
}
