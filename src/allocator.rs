//! Implements allocation of blocks and inodes over the per-group usage
//! bitmaps.
//!
//! Allocation is group-local first: the scan starts in the group holding the
//! related element and at its index inside that group, so elements allocated
//! with a related id tend to be physically close. This matches ext2's
//! placement strategy.

use crate::bitmap::Bitmap;
use crate::device::Device;
use crate::Error;
use crate::Result;

/// The kind of element an allocator hands out.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AllocKind {
	Block,
	Inode,
}

/// An allocator over one usage bitmap per block group.
///
/// The allocator works on 0-based element indexes. The filesystem translates
/// between indexes and 1-based block/inode ids on both sides of every call.
pub struct Allocator {
	/// One bitmap per block group.
	bitmaps: Vec<Bitmap>,
	/// The number of elements each full group tracks.
	elements_per_group: u32,
	/// The kind of element being allocated.
	kind: AllocKind,
}

impl Allocator {
	/// Creates an allocator over the given bitmaps.
	pub fn new(bitmaps: Vec<Bitmap>, elements_per_group: u32, kind: AllocKind) -> Self {
		Self {
			bitmaps,
			elements_per_group,
			kind,
		}
	}

	/// The error raised when no element is free.
	fn exhausted(&self) -> Error {
		match self.kind {
			AllocKind::Block => Error::NoFreeBlock,
			AllocKind::Inode => Error::NoFreeInode,
		}
	}

	/// Returns the bitmap of the given group.
	pub fn bitmap(&self, group: u32) -> &Bitmap {
		&self.bitmaps[group as usize]
	}

	/// Allocates an element close to the element `related` and returns its
	/// index.
	///
	/// The scan starts in the group of `related`, at its index inside that
	/// group, then moves on to the following groups, wrapping past the last.
	/// Nothing is written until a free element is found; on success the bit
	/// is set and the owning bitmap written back before the function returns.
	pub fn alloc<D: Device>(&mut self, dev: &mut D, related: u32) -> Result<u32> {
		let groups = self.bitmaps.len() as u32;
		let start_group = (related / self.elements_per_group) % groups;
		let start_index = related % self.elements_per_group;

		for i in 0..groups {
			let group = (start_group + i) % groups;
			let bitmap = &mut self.bitmaps[group as usize];
			let start = if i == 0 && start_index < bitmap.count() {
				start_index
			} else {
				0
			};
			if let Some(index) = bitmap.find(false, start) {
				bitmap.set(index, true);
				bitmap.save(dev)?;
				return Ok(group * self.elements_per_group + index);
			}
		}

		Err(self.exhausted())
	}

	/// Releases the element at `index`.
	///
	/// The function returns the previous value of the bit, allowing callers
	/// to skip counter updates on double frees.
	pub fn free<D: Device>(&mut self, dev: &mut D, index: u32) -> Result<bool> {
		let group = index / self.elements_per_group;
		let i = index % self.elements_per_group;

		let bitmap = &mut self.bitmaps[group as usize];
		let prev = bitmap.get(i);
		bitmap.set(i, false);
		bitmap.save(dev)?;
		Ok(prev)
	}
}
