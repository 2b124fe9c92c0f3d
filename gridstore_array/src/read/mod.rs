//! # Read coordinator
//!
//! Merges the cell streams of all visible fragments, newest first. A binary
//! heap keyed by `(global cell key, fragment recency)` pops cells in the
//! array's cell order; when several fragments carry the same coordinate the
//! newest fragment pops first and the older copies are dropped. Results fill
//! caller-provided buffers; a read that does not fit reports `completed ==
//! false` and resumes on the next call.

use crate::fragment::reader::{CellOut, FragmentCursor};
use gridstore_core::vfs::FileLock;
use gridstore_core::{Result, bail_capacity, ensure_arg};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// One caller buffer per requested attribute: a byte sink for values, plus
/// one slot per cell for variable-length attributes.
pub struct ReadBuffer<'a> {
	pub data: &'a mut [u8],
	pub offsets: Option<&'a mut [u64]>,
}

/// What one `next` call wrote into one buffer.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BufferCount {
	pub bytes: u64,
	pub cells: u64,
}

/// Outcome of one `next` call.
#[derive(Clone, Debug)]
pub struct ReadStatus {
	/// `false` when the buffers filled up before the stream ended; call
	/// `next` again with drained buffers to resume.
	pub completed: bool,
	pub counts: Vec<BufferCount>,
}

/// Value shape of one requested attribute, for buffer accounting.
#[derive(Clone, Copy, Debug)]
pub(crate) enum ValueShape {
	Fixed { cell_size: usize },
	Var,
}

struct HeapEntry {
	key: Vec<u8>,
	cursor: usize,
}

impl PartialEq for HeapEntry {
	fn eq(&self, other: &Self) -> bool {
		self.key == other.key && self.cursor == other.cursor
	}
}
impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

/// Reversed so the max-heap pops the smallest `(key, cursor)`; cursor 0 is
/// the newest fragment, which therefore wins coordinate ties.
impl Ord for HeapEntry {
	fn cmp(&self, other: &Self) -> Ordering {
		other
			.key
			.cmp(&self.key)
			.then_with(|| other.cursor.cmp(&self.cursor))
	}
}

/// A merged, resumable cell stream over an array snapshot.
pub struct ArrayReader {
	shapes: Vec<ValueShape>,
	cursors: Vec<FragmentCursor>,
	current: Vec<Option<CellOut>>,
	heap: BinaryHeap<HeapEntry>,
	last_key: Option<Vec<u8>>,
	pending: Option<CellOut>,
	_lock: Option<FileLock>,
}

impl ArrayReader {
	/// Builds the merge state by pulling the first cell of every cursor.
	/// Cursor index 0 must be the newest fragment.
	pub(crate) async fn new(
		mut cursors: Vec<FragmentCursor>,
		shapes: Vec<ValueShape>,
		lock: Option<FileLock>,
	) -> Result<ArrayReader> {
		let mut heap = BinaryHeap::with_capacity(cursors.len());
		let mut current = Vec::with_capacity(cursors.len());
		for (index, cursor) in cursors.iter_mut().enumerate() {
			match cursor.next_cell().await? {
				Some(cell) => {
					heap.push(HeapEntry {
						key: cell.key.clone(),
						cursor: index,
					});
					current.push(Some(cell));
				}
				None => current.push(None),
			}
		}
		Ok(ArrayReader {
			shapes,
			cursors,
			current,
			heap,
			last_key: None,
			pending: None,
			_lock: lock,
		})
	}

	/// An always-empty stream (empty subarray or zero fragments).
	pub(crate) fn new_empty(shapes: Vec<ValueShape>, lock: Option<FileLock>) -> ArrayReader {
		ArrayReader {
			shapes,
			cursors: Vec::new(),
			current: Vec::new(),
			heap: BinaryHeap::new(),
			last_key: None,
			pending: None,
			_lock: lock,
		}
	}

	async fn next_merged(&mut self) -> Result<Option<CellOut>> {
		loop {
			let Some(entry) = self.heap.pop() else {
				return Ok(None);
			};
			let cell = self.current[entry.cursor].take().expect("popped cursors hold a cell");
			if let Some(next) = self.cursors[entry.cursor].next_cell().await? {
				self.heap.push(HeapEntry {
					key: next.key.clone(),
					cursor: entry.cursor,
				});
				self.current[entry.cursor] = Some(next);
			}
			// A later (newer) fragment already produced this coordinate.
			if self.last_key.as_ref() == Some(&cell.key) {
				continue;
			}
			self.last_key = Some(cell.key.clone());
			return Ok(Some(cell));
		}
	}

	/// Fills the caller's buffers with the next run of cells and reports the
	/// written byte and cell counts per attribute.
	pub async fn next(&mut self, buffers: &mut [ReadBuffer<'_>]) -> Result<ReadStatus> {
		ensure_arg!(
			buffers.len() == self.shapes.len(),
			"read carries {} buffers for {} requested attributes",
			buffers.len(),
			self.shapes.len()
		);

		let mut counts = vec![BufferCount::default(); buffers.len()];
		let completed = loop {
			let cell = match self.pending.take() {
				Some(cell) => cell,
				None => match self.next_merged().await? {
					Some(cell) => cell,
					None => break true,
				},
			};

			let fits = self
				.shapes
				.iter()
				.zip(&counts)
				.zip(buffers.iter())
				.zip(&cell.values)
				.all(|(((shape, count), buffer), value)| {
					let space = buffer.data.len() as u64 - count.bytes;
					match shape {
						ValueShape::Fixed { .. } => value.len() as u64 <= space,
						ValueShape::Var => {
							let slots = buffer.offsets.as_ref().map_or(0, |offsets| offsets.len()) as u64;
							value.len() as u64 <= space && count.cells < slots
						}
					}
				});
			if !fits {
				if counts.iter().all(|count| count.cells == 0) {
					bail_capacity!("the smallest cell does not fit the provided buffers");
				}
				self.pending = Some(cell);
				break false;
			}

			for ((count, buffer), value) in counts.iter_mut().zip(buffers.iter_mut()).zip(&cell.values) {
				if let Some(offsets) = buffer.offsets.as_mut() {
					offsets[count.cells as usize] = count.bytes;
				}
				let start = count.bytes as usize;
				buffer.data[start..start + value.len()].copy_from_slice(value);
				count.bytes += value.len() as u64;
				count.cells += 1;
			}
		};

		Ok(ReadStatus { completed, counts })
	}
}
