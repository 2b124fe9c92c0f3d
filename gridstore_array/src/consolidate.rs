//! # Consolidation
//!
//! Reads the merged content of all committed fragments and rewrites it as
//! one new fragment, then retires the originals. The new fragment carries a
//! strictly newer timestamp, so newest-wins masking yields the same answer
//! even if a crash leaves the old fragments behind; deleting them is pure
//! cleanup, which is what makes the procedure safe on object stores without
//! an atomic rename.
//!
//! On POSIX the exclusive advisory lock keeps readers (which hold it shared)
//! out while old fragments disappear.

use crate::array::Context;
use crate::coords::CoordBox;
use crate::fragment::{CONSOLIDATION_LOCK_FILE, WriteBuffer, WriteMode};
use crate::read::{BufferCount, ReadBuffer};
use crate::schema::COORDS_NAME;
use gridstore_core::vfs::uri;
use gridstore_core::{Result, bail_unsupported};

/// Scratch buffer sizes of the consolidation read loop.
const DATA_CHUNK: usize = 4 * 1024 * 1024;
const OFFSET_CHUNK: usize = 64 * 1024;

struct Accumulator {
	data: Vec<u8>,
	offsets: Vec<u64>,
	var: bool,
}

pub(crate) async fn consolidate_array(ctx: &Context, array_uri: &str) -> Result<()> {
	let vfs = ctx.vfs_for(array_uri)?;
	let _lock = vfs.lock_exclusive(&uri::join(array_uri, CONSOLIDATION_LOCK_FILE))?;

	let schema = ctx.load_schema(array_uri).await?;
	let fragments = ctx.visible_fragments(&vfs, array_uri).await?;
	if fragments.len() <= 1 {
		log::debug!("{array_uri} has {} fragment(s), nothing to consolidate", fragments.len());
		return Ok(());
	}

	// The read region is the union of the fragments' non-empty domains; for
	// dense arrays every member region is tile-aligned, so the union box is
	// too.
	let mut union: Option<CoordBox> = None;
	for name in &fragments {
		let meta = ctx.fragment_meta(&vfs, array_uri, name, &schema).await?;
		if meta.tile_count() == 0 {
			continue;
		}
		match &mut union {
			Some(bounds) => bounds.expand(&meta.non_empty_domain),
			None => union = Some(meta.non_empty_domain),
		}
	}
	let Some(union) = union else {
		return Ok(());
	};
	let subarray = union.to_subarray();

	// Drain the merged stream into per-attribute accumulators.
	let attr_names: Vec<&str> = schema.attributes.iter().map(|attribute| attribute.name.as_str()).collect();
	let mut request = attr_names.clone();
	request.push(COORDS_NAME);
	let mut reader = ctx.open_reader_opts(array_uri, subarray.clone(), &request, false).await?;

	let mut accumulators: Vec<Accumulator> = schema
		.attributes
		.iter()
		.map(|attribute| Accumulator {
			data: Vec::new(),
			offsets: Vec::new(),
			var: attribute.is_var(),
		})
		.collect();
	accumulators.push(Accumulator {
		data: Vec::new(),
		offsets: Vec::new(),
		var: false,
	});

	let mut total_cells: u64 = 0;
	let mut scratch_data: Vec<Vec<u8>> = accumulators.iter().map(|_| vec![0u8; DATA_CHUNK]).collect();
	let mut scratch_offsets: Vec<Vec<u64>> = accumulators
		.iter()
		.map(|accumulator| if accumulator.var { vec![0u64; OFFSET_CHUNK] } else { Vec::new() })
		.collect();
	loop {
		let mut buffers: Vec<ReadBuffer> = scratch_data
			.iter_mut()
			.zip(scratch_offsets.iter_mut())
			.map(|(data, offsets)| ReadBuffer {
				data: data.as_mut_slice(),
				offsets: if offsets.is_empty() { None } else { Some(offsets.as_mut_slice()) },
			})
			.collect();
		let status = reader.next(&mut buffers).await?;
		drop(buffers);

		for (index, count) in status.counts.iter().enumerate() {
			append_chunk(&mut accumulators[index], &scratch_data[index], &scratch_offsets[index], count);
		}
		total_cells += status.counts.first().map_or(0, |count| count.cells);
		if status.completed {
			break;
		}
	}

	// Rewrite as one fragment.
	let (mode, region) = if schema.is_dense() {
		let ranges = union.to_int_ranges()?;
		let volume: u64 = ranges.iter().map(|[lo, hi]| (hi - lo + 1) as u64).product();
		if total_cells != volume {
			bail_unsupported!(
				"consolidation needs the fragments to cover a rectangular region ({total_cells} of {volume} cells present)"
			);
		}
		(WriteMode::DenseUnordered, Some(subarray))
	} else {
		(WriteMode::SparseUnordered, None)
	};

	let mut writer = ctx.open_writer(array_uri, mode, &attr_names, region).await?;
	let write_buffers: Vec<WriteBuffer> = accumulators[..attr_names.len()]
		.iter()
		.map(|accumulator| WriteBuffer {
			data: &accumulator.data,
			offsets: if accumulator.var { Some(&accumulator.offsets) } else { None },
		})
		.collect();
	let coords = &accumulators.last().expect("the coordinate accumulator exists").data;
	writer.submit(&write_buffers, Some(coords)).await?;
	let new_fragment = writer.fragment_uri().to_string();
	writer.finalize().await?;
	log::debug!("consolidated {} fragments of {array_uri} into {new_fragment}", fragments.len());

	// Pure cleanup: the consolidated fragment already masks these.
	for name in &fragments {
		vfs.delete_dir(&uri::join(array_uri, name)).await?;
	}
	Ok(())
}

fn append_chunk(accumulator: &mut Accumulator, data: &[u8], offsets: &[u64], count: &BufferCount) {
	let base = accumulator.data.len() as u64;
	accumulator.data.extend_from_slice(&data[..count.bytes as usize]);
	if accumulator.var {
		for offset in &offsets[..count.cells as usize] {
			accumulator.offsets.push(base + offset);
		}
	}
}
