//! Implements the block group descriptors stored in the Block Group
//! Descriptor Table (BGDT).

use crate::device;
use crate::device::Device;
use crate::Superblock;
use crate::SUPERBLOCK_OFFSET;
use std::fmt;
use std::io;
use std::mem::size_of;

/// Structure representing a block group descriptor to be stored into the
/// Block Group Descriptor Table (BGDT).
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct BlockGroupDescriptor {
	/// The block address of the block usage bitmap.
	pub block_usage_bitmap_addr: u32,
	/// The block address of the inode usage bitmap.
	pub inode_usage_bitmap_addr: u32,
	/// Starting block address of inode table.
	pub inode_table_start_addr: u32,
	/// Number of unallocated blocks in group.
	pub unallocated_blocks_number: u16,
	/// Number of unallocated inodes in group.
	pub unallocated_inodes_number: u16,
	/// Number of directories in group.
	pub directories_number: u16,

	/// Structure padding.
	pub _padding: [u8; 14],
}

impl BlockGroupDescriptor {
	/// Returns the offset of the `i`th block group descriptor.
	///
	/// `superblock` is the filesystem's superblock.
	pub fn get_disk_offset(i: u32, superblock: &Superblock) -> u64 {
		let blk_size = superblock.get_block_size() as u64;
		let bgdt_off = (SUPERBLOCK_OFFSET / blk_size) + 1;
		(bgdt_off * blk_size) + (i as u64 * size_of::<Self>() as u64)
	}

	/// Reads and returns the `i`th block group descriptor.
	///
	/// Arguments:
	/// - `superblock` is the filesystem's superblock.
	/// - `dev` is the device.
	pub fn read<D: Device>(i: u32, superblock: &Superblock, dev: &mut D) -> io::Result<Self> {
		let off = Self::get_disk_offset(i, superblock);
		device::read_struct(dev, off)
	}

	/// Writes the block group descriptor.
	///
	/// Arguments:
	/// - `i` is the offset of the group.
	/// - `superblock` is the filesystem's superblock.
	/// - `dev` is the device.
	pub fn write<D: Device>(
		&self,
		i: u32,
		superblock: &Superblock,
		dev: &mut D,
	) -> io::Result<()> {
		let off = Self::get_disk_offset(i, superblock);
		device::write_struct(dev, off, self)
	}
}

impl fmt::Display for BlockGroupDescriptor {
	fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
		let block_usage_bitmap_addr = self.block_usage_bitmap_addr;
		let inode_usage_bitmap_addr = self.inode_usage_bitmap_addr;
		let inode_table_start_addr = self.inode_table_start_addr;
		let unallocated_blocks_number = self.unallocated_blocks_number;
		let unallocated_inodes_number = self.unallocated_inodes_number;
		let directories_number = self.directories_number;

		writeln!(fmt, "Group Descriptor Dump:")?;
		writeln!(fmt, "\tblock_usage_bitmap_addr: {block_usage_bitmap_addr}")?;
		writeln!(fmt, "\tinode_usage_bitmap_addr: {inode_usage_bitmap_addr}")?;
		writeln!(fmt, "\tinode_table_start_addr: {inode_table_start_addr}")?;
		writeln!(fmt, "\tunallocated_blocks_number: {unallocated_blocks_number}")?;
		writeln!(fmt, "\tunallocated_inodes_number: {unallocated_inodes_number}")?;
		writeln!(fmt, "\tdirectories_number: {directories_number}")
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn descriptor_size() {
		assert_eq!(size_of::<BlockGroupDescriptor>(), 32);
	}
}
