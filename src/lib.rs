//! Library implementing the ext2 filesystem over a byte-addressable device.
//!
//! The filesystem divides the storage device into several substructures:
//! - Block Group: described by the Block Group Descriptor Table (BGDT)
//! - Block: stored inside of block groups
//! - INode: represents a file in the filesystem
//! - Directory entry: an entry stored into a directory inode's content
//!
//! The access to an inode's data is divided into several parts, each
//! overflowing on the next when full:
//! - Direct Block Pointers: each inode has 12 of them
//! - Singly Indirect Block Pointer: points to a block filled with pointers to
//!   more data blocks
//! - Doubly Indirect Block Pointer: points to a block filled with pointers to
//!   Singly Indirect Blocks
//! - Triply Indirect Block Pointer: points to a block filled with pointers to
//!   Doubly Indirect Blocks
//!
//! The engine performs every mutation write-through: allocator bitmaps, group
//! descriptors and the superblock are written back to the device immediately
//! after each change, in that order.
//!
//! For more information, see the [specifications](https://www.nongnu.org/ext2-doc/ext2.html).

pub mod allocator;
pub mod bgd;
pub mod bitmap;
pub mod device;
pub mod dirent;
pub mod format;
pub mod inode;
pub mod path;
pub mod util;
pub mod visitor;

#[cfg(test)]
pub(crate) mod testing;

use allocator::AllocKind;
use allocator::Allocator;
use bgd::BlockGroupDescriptor;
use bitmap::Bitmap;
use device::Device;
use dirent::Directory;
use inode::Ext2INode;
use inode::Inode;
use inode::OsSpecific;
use inode::SymbolicLink;
use inode::DIRECT_BLOCKS_COUNT;
use inode::INODE_TYPE_DIRECTORY;
use inode::INODE_TYPE_REGULAR;
use inode::INODE_TYPE_SYMLINK;
use std::cmp::min;
use std::error;
use std::fmt;
use std::io;
use std::mem::size_of;
use std::result;

/// The offset of the superblock from the beginning of the device.
pub const SUPERBLOCK_OFFSET: u64 = 1024;
/// The filesystem's signature.
pub const EXT2_SIGNATURE: u16 = 0xef53;

/// The root inode.
pub const ROOT_INODE: u32 = 2;

/// Filesystem state: the filesystem is clean
pub const FS_STATE_CLEAN: u16 = 1;
/// Filesystem state: the filesystem has errors
pub const FS_STATE_ERROR: u16 = 2;

/// Error handle action: ignore
pub const ERR_ACTION_IGNORE: u16 = 1;
/// Error handle action: mount as read-only
pub const ERR_ACTION_READ_ONLY: u16 = 2;
/// Error handle action: trigger a kernel panic
pub const ERR_ACTION_KERNEL_PANIC: u16 = 3;

/// Optional feature: Preallocation of a specified number of blocks for each
/// new directory
pub const OPTIONAL_FEATURE_DIRECTORY_PREALLOCATION: u32 = 0x1;
/// Optional feature: AFS server
pub const OPTIONAL_FEATURE_AFS: u32 = 0x2;
/// Optional feature: Journal
pub const OPTIONAL_FEATURE_JOURNAL: u32 = 0x4;
/// Optional feature: Inodes have extended attributes
pub const OPTIONAL_FEATURE_INODE_EXTENDED: u32 = 0x8;
/// Optional feature: Filesystem can resize itself for larger partitions
pub const OPTIONAL_FEATURE_RESIZE: u32 = 0x10;
/// Optional feature: Directories use hash index
pub const OPTIONAL_FEATURE_HASH_INDEX: u32 = 0x20;

/// Required feature: Compression
pub const REQUIRED_FEATURE_COMPRESSION: u32 = 0x1;
/// Required feature: Directory entries have a type field
pub const REQUIRED_FEATURE_DIRECTORY_TYPE: u32 = 0x2;
/// Required feature: Filesystem needs to replay its journal
pub const REQUIRED_FEATURE_JOURNAL_REPLAY: u32 = 0x4;
/// Required feature: Filesystem uses a journal device
pub const REQUIRED_FEATURE_JOURNAL_DEVICE: u32 = 0x8;

/// Write-required feature: Sparse superblocks and group descriptor tables
pub const WRITE_REQUIRED_SPARSE_SUPERBLOCKS: u32 = 0x1;
/// Write-required feature: Filesystem uses a 64-bit file size
pub const WRITE_REQUIRED_64_BITS: u32 = 0x2;
/// Write-required feature: Directory contents are stored in the form of a
/// Binary Tree
pub const WRITE_REQUIRED_DIRECTORY_BINARY_TREE: u32 = 0x4;

/// An error reported by the filesystem engine.
#[derive(Debug)]
pub enum Error {
	/// No free block is left on the filesystem.
	NoFreeBlock,
	/// No free inode is left on the filesystem.
	NoFreeInode,
	/// The file reached the maximum size allowed by the filesystem.
	FileIsFull,
	/// Attempt to write past the end of a file.
	OutOfRange,
	/// The image is not a valid ext2 filesystem.
	InvalidImage(&'static str),
	/// An I/O error reported by the device.
	Io(io::Error),
}

impl fmt::Display for Error {
	fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::NoFreeBlock => write!(fmt, "no free block left on the filesystem"),
			Self::NoFreeInode => write!(fmt, "no free inode left on the filesystem"),
			Self::FileIsFull => write!(fmt, "the file reached its maximum size"),
			Self::OutOfRange => write!(fmt, "offset is out of range"),
			Self::InvalidImage(msg) => write!(fmt, "invalid filesystem image: {msg}"),
			Self::Io(err) => write!(fmt, "{err}"),
		}
	}
}

impl error::Error for Error {
	fn source(&self) -> Option<&(dyn error::Error + 'static)> {
		match self {
			Self::Io(err) => Some(err),
			_ => None,
		}
	}
}

impl From<io::Error> for Error {
	fn from(err: io::Error) -> Self {
		Self::Io(err)
	}
}

impl From<Error> for io::Error {
	fn from(err: Error) -> Self {
		match err {
			Error::Io(err) => err,
			err => io::Error::new(io::ErrorKind::Other, err.to_string()),
		}
	}
}

/// The result type of filesystem operations.
pub type Result<T> = result::Result<T, Error>;

/// The ext2 superblock structure, stored at offset 1024 of the device.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct Superblock {
	/// Total number of inodes in the filesystem.
	pub total_inodes: u32,
	/// Total number of blocks in the filesystem.
	pub total_blocks: u32,
	/// Number of blocks reserved for the superuser.
	pub superuser_blocks: u32,
	/// Total number of unallocated blocks.
	pub total_unallocated_blocks: u32,
	/// Total number of unallocated inodes.
	pub total_unallocated_inodes: u32,
	/// Block number of the block containing the superblock.
	pub superblock_block_number: u32,
	/// log2(block_size) - 10
	pub block_size_log: u32,
	/// log2(fragment_size) - 10
	pub fragment_size_log: u32,
	/// The number of blocks per block group.
	pub blocks_per_group: u32,
	/// The number of fragments per block group.
	pub fragments_per_group: u32,
	/// The number of inodes per block group.
	pub inodes_per_group: u32,
	/// The timestamp of the last mount operation.
	pub last_mount_timestamp: u32,
	/// The timestamp of the last write operation.
	pub last_write_timestamp: u32,
	/// The number of mounts since the last consistency check.
	pub mount_count_since_fsck: u16,
	/// The number of mounts allowed before a consistency check must be done.
	pub mount_count_before_fsck: u16,
	/// The ext2 signature.
	pub signature: u16,
	/// The filesystem's state.
	pub fs_state: u16,
	/// The action to perform when an error is detected.
	pub error_action: u16,
	/// The minor version.
	pub minor_version: u16,
	/// The timestamp of the last consistency check.
	pub last_fsck_timestamp: u32,
	/// The interval between mandatory consistency checks.
	pub fsck_interval: u32,
	/// The id of the operating system from which the filesystem was created.
	pub os_id: u32,
	/// The major version.
	pub major_version: u32,
	/// The UID of the user that can use reserved blocks.
	pub uid_reserved: u16,
	/// The GID of the group that can use reserved blocks.
	pub gid_reserved: u16,

	// Extended superblock fields

	/// The first non reserved inode
	pub first_non_reserved_inode: u32,
	/// The size of the inode structure in bytes.
	pub inode_size: u16,
	/// The block group containing the superblock.
	pub superblock_group: u16,
	/// Optional features for the implementation to support.
	pub optional_features: u32,
	/// Required features for the implementation to support.
	pub required_features: u32,
	/// Required features for the implementation to support for writing.
	pub write_required_features: u32,
	/// The filesystem id.
	pub filesystem_id: [u8; 16],
	/// The volume name.
	pub volume_name: [u8; 16],
	/// The path the volume was last mounted to.
	pub last_mount_path: [u8; 64],
	/// Used compression algorithms.
	pub compression_algorithms: u32,
	/// The number of blocks to preallocate for files.
	pub files_preallocate_count: u8,
	/// The number of blocks to preallocate for directories.
	pub directories_preallocate_count: u8,
	/// Unused.
	pub _unused: u16,
	/// The journal ID.
	pub journal_id: [u8; 16],
	/// The journal inode.
	pub journal_inode: u32,
	/// The journal device.
	pub journal_device: u32,
	/// The head of orphan inodes list.
	pub orphan_inode_head: u32,
}

impl Superblock {
	/// Reads the superblock from the given device.
	pub fn read<D: Device>(dev: &mut D) -> io::Result<Self> {
		device::read_struct(dev, SUPERBLOCK_OFFSET)
	}

	/// Writes the superblock to the given device.
	pub fn write<D: Device>(&self, dev: &mut D) -> io::Result<()> {
		device::write_struct(dev, SUPERBLOCK_OFFSET, self)
	}

	/// Tells whether the superblock is valid.
	pub fn is_valid(&self) -> bool {
		self.signature == EXT2_SIGNATURE
	}

	/// Returns the size of a block.
	pub fn get_block_size(&self) -> u32 {
		1024 << self.block_size_log
	}

	/// Returns the size of an inode.
	pub fn get_inode_size(&self) -> usize {
		if self.major_version >= 1 {
			self.inode_size as _
		} else {
			128
		}
	}

	/// Returns the number of block groups.
	pub fn get_block_group_count(&self) -> u32 {
		let data_blocks = self.total_blocks - self.superblock_block_number;
		util::ceil_division(data_blocks, self.blocks_per_group)
	}

	/// Tells whether the filesystem uses 64-bit file sizes.
	pub fn has_large_files(&self) -> bool {
		self.major_version >= 1 && self.write_required_features & WRITE_REQUIRED_64_BITS != 0
	}
}

impl fmt::Display for Superblock {
	fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
		let total_inodes = self.total_inodes;
		let total_blocks = self.total_blocks;
		let superuser_blocks = self.superuser_blocks;
		let total_unallocated_blocks = self.total_unallocated_blocks;
		let total_unallocated_inodes = self.total_unallocated_inodes;
		let superblock_block_number = self.superblock_block_number;
		let block_size_log = self.block_size_log;
		let blocks_per_group = self.blocks_per_group;
		let inodes_per_group = self.inodes_per_group;
		let mount_count_since_fsck = self.mount_count_since_fsck;
		let signature = self.signature;
		let fs_state = self.fs_state;
		let major_version = self.major_version;
		let minor_version = self.minor_version;
		let first_non_reserved_inode = self.first_non_reserved_inode;
		let inode_size = self.inode_size;
		let optional_features = self.optional_features;
		let required_features = self.required_features;
		let write_required_features = self.write_required_features;

		writeln!(fmt, "Superblock Dump:")?;
		writeln!(fmt, "\ttotal_inodes: {total_inodes}")?;
		writeln!(fmt, "\ttotal_blocks: {total_blocks}")?;
		writeln!(fmt, "\tsuperuser_blocks: {superuser_blocks}")?;
		writeln!(fmt, "\ttotal_unallocated_blocks: {total_unallocated_blocks}")?;
		writeln!(fmt, "\ttotal_unallocated_inodes: {total_unallocated_inodes}")?;
		writeln!(fmt, "\tsuperblock_block_number: {superblock_block_number}")?;
		writeln!(fmt, "\tblock_size_log: {block_size_log}")?;
		writeln!(fmt, "\tblocks_per_group: {blocks_per_group}")?;
		writeln!(fmt, "\tinodes_per_group: {inodes_per_group}")?;
		writeln!(fmt, "\tmount_count_since_fsck: {mount_count_since_fsck}")?;
		writeln!(fmt, "\tsignature: {signature:#x}")?;
		writeln!(fmt, "\tfs_state: {fs_state}")?;
		writeln!(fmt, "\tversion: {major_version}.{minor_version}")?;
		writeln!(fmt, "\tfirst_non_reserved_inode: {first_non_reserved_inode}")?;
		writeln!(fmt, "\tinode_size: {inode_size}")?;
		writeln!(fmt, "\toptional_features: {optional_features:#x}")?;
		writeln!(fmt, "\trequired_features: {required_features:#x}")?;
		writeln!(fmt, "\twrite_required_features: {write_required_features:#x}")
	}
}

/// Returns the indexes of the block groups holding a superblock copy.
///
/// Per ext2's sparse backup rule those are groups 0, 1, and every power of 3,
/// 5 and 7 within range.
pub(crate) fn backup_group_indexes(count: u32) -> Vec<u32> {
	let mut indexes = vec![0];
	if count > 1 {
		indexes.push(1);
	}
	for base in [3u32, 5, 7] {
		let mut p = base;
		while p < count {
			indexes.push(p);
			p = p.saturating_mul(base);
		}
	}
	indexes.sort_unstable();
	indexes.dedup();
	indexes
}

/// An instance of the ext2 filesystem over a device.
///
/// The filesystem exclusively owns the device, the superblock, the group
/// descriptor table and every usage bitmap. It is not safe to open two
/// instances over the same image, even read-only, because each caches the
/// bitmaps independently.
pub struct Filesystem<D: Device> {
	/// The device storing the filesystem.
	pub(crate) dev: D,
	/// The filesystem's superblock.
	pub(crate) superblock: Superblock,
	/// The block group descriptor table.
	pub(crate) bgdt: Vec<BlockGroupDescriptor>,
	/// The block allocator.
	block_alloc: Allocator,
	/// The inode allocator.
	inode_alloc: Allocator,
}

impl<D: Device> Filesystem<D> {
	/// Loads the filesystem stored on the given device.
	///
	/// The whole engine state is read upfront: superblock, group descriptor
	/// table and every usage bitmap. If the image is not a valid ext2
	/// filesystem, the function returns [`Error::InvalidImage`] and no
	/// partial engine is exposed.
	pub fn load(mut dev: D) -> Result<Self> {
		let superblock = Superblock::read(&mut dev)?;
		if !superblock.is_valid() {
			return Err(Error::InvalidImage("bad magic number"));
		}
		if superblock.block_size_log > 10 {
			return Err(Error::InvalidImage("unsupported block size"));
		}
		let blk_size = superblock.get_block_size();
		if superblock.major_version >= 1 {
			let inode_size = superblock.inode_size;
			if !inode_size.is_power_of_two()
				|| inode_size < 128
				|| inode_size as u32 > blk_size
			{
				return Err(Error::InvalidImage("invalid inode size"));
			}
		}
		if superblock.blocks_per_group == 0 || superblock.inodes_per_group == 0 {
			return Err(Error::InvalidImage("empty block groups"));
		}
		if superblock.total_blocks <= superblock.superblock_block_number {
			return Err(Error::InvalidImage("no data block"));
		}
		let groups = superblock.get_block_group_count();
		let inode_groups =
			util::ceil_division(superblock.total_inodes, superblock.inodes_per_group);
		if groups != inode_groups {
			return Err(Error::InvalidImage("inconsistent block group count"));
		}

		let mut bgdt = Vec::with_capacity(groups as usize);
		for i in 0..groups {
			bgdt.push(BlockGroupDescriptor::read(i, &superblock, &mut dev)?);
		}

		let first = superblock.superblock_block_number;
		let block_elements = superblock.total_blocks - first;
		let mut block_bitmaps = Vec::with_capacity(groups as usize);
		let mut inode_bitmaps = Vec::with_capacity(groups as usize);
		for (i, bgd) in bgdt.iter().enumerate() {
			let block_bitmap_addr = bgd.block_usage_bitmap_addr;
			let inode_bitmap_addr = bgd.inode_usage_bitmap_addr;
			if block_bitmap_addr == 0
				|| inode_bitmap_addr == 0
				|| bgd.inode_table_start_addr == 0
			{
				return Err(Error::InvalidImage("unreadable bitmap"));
			}
			let i = i as u32;
			let blocks = min(
				superblock.blocks_per_group,
				block_elements - i * superblock.blocks_per_group,
			);
			let inodes = min(
				superblock.inodes_per_group,
				superblock.total_inodes - i * superblock.inodes_per_group,
			);
			block_bitmaps.push(Bitmap::load(
				&mut dev,
				block_bitmap_addr as u64 * blk_size as u64,
				blocks,
				blk_size as usize,
			)?);
			inode_bitmaps.push(Bitmap::load(
				&mut dev,
				inode_bitmap_addr as u64 * blk_size as u64,
				inodes,
				blk_size as usize,
			)?);
		}

		let blocks_per_group = superblock.blocks_per_group;
		let inodes_per_group = superblock.inodes_per_group;
		Ok(Self {
			dev,
			superblock,
			bgdt,
			block_alloc: Allocator::new(block_bitmaps, blocks_per_group, AllocKind::Block),
			inode_alloc: Allocator::new(inode_bitmaps, inodes_per_group, AllocKind::Inode),
		})
	}

	/// Returns the filesystem's superblock.
	pub fn superblock(&self) -> &Superblock {
		&self.superblock
	}

	/// Returns the size of a block.
	pub fn block_size(&self) -> u32 {
		self.superblock.get_block_size()
	}

	/// Tells whether the filesystem uses 64-bit file sizes.
	pub fn has_large_files(&self) -> bool {
		self.superblock.has_large_files()
	}

	/// Returns the byte address of the given offset inside the given block.
	pub fn to_address(&self, block_id: u32, block_off: u32) -> u64 {
		block_id as u64 * self.block_size() as u64 + block_off as u64
	}

	/// Gives mutable access to the underlying device.
	pub fn device(&mut self) -> &mut D {
		&mut self.dev
	}

	/// Writes a dump of the superblock and of every group descriptor.
	pub fn dump<W: io::Write>(&self, out: &mut W) -> io::Result<()> {
		write!(out, "{}", self.superblock)?;
		for bgd in &self.bgdt {
			write!(out, "{bgd}")?;
		}
		Ok(())
	}

	/// Returns the byte offset of the record of the inode with the given id.
	fn inode_offset(&self, id: u32) -> Result<u64> {
		if id == 0 || id > self.superblock.total_inodes {
			return Err(Error::InvalidImage("inode id out of bounds"));
		}
		let blk_size = self.block_size() as u64;
		let inode_size = self.superblock.get_inode_size() as u64;
		let group = (id - 1) / self.superblock.inodes_per_group;
		let index = ((id - 1) % self.superblock.inodes_per_group) as u64;
		let table_blk_off = (index * inode_size) / blk_size;
		let blk_off = (index * inode_size) % blk_size;
		let table = self.bgdt[group as usize].inode_table_start_addr as u64;
		Ok((table + table_blk_off) * blk_size + blk_off)
	}

	/// Returns the inode with the given id.
	pub fn get_inode(&mut self, id: u32) -> Result<Inode> {
		let off = self.inode_offset(id)?;
		let record: Ext2INode = device::read_struct(&mut self.dev, off)?;
		Ok(Inode::new(id, record, off))
	}

	/// Returns the root directory's inode.
	pub fn get_root(&mut self) -> Result<Inode> {
		self.get_inode(ROOT_INODE)
	}

	/// Allocates a block and returns its id.
	pub fn alloc_block(&mut self) -> Result<u32> {
		self.alloc_block_near(1)
	}

	/// Allocates a block close to the block `related` and returns its id.
	///
	/// The usage bitmap, the owning group descriptor and the superblock are
	/// written back in that order before the function returns.
	pub fn alloc_block_near(&mut self, related: u32) -> Result<u32> {
		let first = self.superblock.superblock_block_number;
		let related = related.saturating_sub(first);
		let index = self.block_alloc.alloc(&mut self.dev, related)?;
		let group = index / self.superblock.blocks_per_group;
		let bgd = &mut self.bgdt[group as usize];
		bgd.unallocated_blocks_number = bgd.unallocated_blocks_number.saturating_sub(1);
		self.superblock.total_unallocated_blocks =
			self.superblock.total_unallocated_blocks.saturating_sub(1);
		self.bgdt[group as usize].write(group, &self.superblock, &mut self.dev)?;
		self.superblock.write(&mut self.dev)?;
		Ok(index + first)
	}

	/// Marks the block with the given id as free.
	pub fn free_block(&mut self, id: u32) -> Result<()> {
		let first = self.superblock.superblock_block_number;
		if id < first || id >= self.superblock.total_blocks {
			return Err(Error::InvalidImage("block id out of bounds"));
		}
		let index = id - first;
		let prev = self.block_alloc.free(&mut self.dev, index)?;
		// skip counter updates on a double free
		if prev {
			let group = index / self.superblock.blocks_per_group;
			let bgd = &mut self.bgdt[group as usize];
			bgd.unallocated_blocks_number = bgd.unallocated_blocks_number.saturating_add(1);
			self.superblock.total_unallocated_blocks =
				self.superblock.total_unallocated_blocks.saturating_add(1);
			self.bgdt[group as usize].write(group, &self.superblock, &mut self.dev)?;
			self.superblock.write(&mut self.dev)?;
		}
		Ok(())
	}

	/// Allocates an inode and returns its id.
	pub fn alloc_inode(&mut self) -> Result<u32> {
		self.alloc_inode_near(1)
	}

	/// Allocates an inode close to the inode `related` and returns its id.
	///
	/// The usage bitmap, the owning group descriptor and the superblock are
	/// written back in that order before the function returns.
	pub fn alloc_inode_near(&mut self, related: u32) -> Result<u32> {
		let related = related.saturating_sub(1);
		let index = self.inode_alloc.alloc(&mut self.dev, related)?;
		let group = index / self.superblock.inodes_per_group;
		let bgd = &mut self.bgdt[group as usize];
		bgd.unallocated_inodes_number = bgd.unallocated_inodes_number.saturating_sub(1);
		self.superblock.total_unallocated_inodes =
			self.superblock.total_unallocated_inodes.saturating_sub(1);
		self.bgdt[group as usize].write(group, &self.superblock, &mut self.dev)?;
		self.superblock.write(&mut self.dev)?;
		Ok(index + 1)
	}

	/// Marks the inode with the given id as free.
	pub fn free_inode(&mut self, id: u32) -> Result<()> {
		if id == 0 || id > self.superblock.total_inodes {
			return Err(Error::InvalidImage("inode id out of bounds"));
		}
		let index = id - 1;
		let prev = self.inode_alloc.free(&mut self.dev, index)?;
		if prev {
			let group = index / self.superblock.inodes_per_group;
			let bgd = &mut self.bgdt[group as usize];
			bgd.unallocated_inodes_number = bgd.unallocated_inodes_number.saturating_add(1);
			self.superblock.total_unallocated_inodes =
				self.superblock.total_unallocated_inodes.saturating_add(1);
			self.bgdt[group as usize].write(group, &self.superblock, &mut self.dev)?;
			self.superblock.write(&mut self.dev)?;
		}
		Ok(())
	}

	/// Adjusts the directory count of the group owning the inode `id`.
	pub(crate) fn update_directory_count(&mut self, id: u32, delta: i16) -> Result<()> {
		let group = (id - 1) / self.superblock.inodes_per_group;
		let bgd = &mut self.bgdt[group as usize];
		bgd.directories_number = if delta >= 0 {
			bgd.directories_number.saturating_add(delta as u16)
		} else {
			bgd.directories_number.saturating_sub(delta.unsigned_abs())
		};
		self.bgdt[group as usize].write(group, &self.superblock, &mut self.dev)?;
		Ok(())
	}

	/// Allocates an inode and initializes its record.
	///
	/// Every field starts zeroed except the type, permissions, ownership and
	/// timestamps. The hard link count starts at 0; it becomes 1 once the
	/// first directory entry is attached with
	/// [`dirent::create_directory_entry`].
	fn create_inode(
		&mut self,
		file_type: u16,
		perms: u16,
		uid: u16,
		gid: u16,
		flags: u32,
	) -> Result<(u32, Inode)> {
		let id = self.alloc_inode()?;
		let ts = util::get_timestamp().as_secs() as u32;
		let record = Ext2INode {
			mode: file_type | (perms & 0x0fff),
			uid,
			size_low: 0,
			atime: ts,
			ctime: ts,
			mtime: ts,
			dtime: 0,
			gid,
			hard_links_count: 0,
			used_sectors: 0,
			flags,
			os_specific_0: 0,
			direct_block_ptrs: [0; DIRECT_BLOCKS_COUNT],
			singly_indirect_block_ptr: 0,
			doubly_indirect_block_ptr: 0,
			triply_indirect_block_ptr: 0,
			generation: 0,
			extended_attributes_block: 0,
			size_high: 0,
			fragment_addr: 0,
			os_specific_1: OsSpecific::default(),
		};
		let inode = Inode::new(id, record, self.inode_offset(id)?);
		inode.save(self)?;
		Ok((id, inode))
	}

	/// Creates a regular file and returns its id along with its inode.
	///
	/// The file starts empty and unattached: the caller is expected to add a
	/// directory entry for it before any failure path can trigger a removal.
	pub fn create_file(
		&mut self,
		perms: u16,
		uid: u16,
		gid: u16,
		flags: u32,
	) -> Result<(u32, Inode)> {
		self.create_inode(INODE_TYPE_REGULAR, perms, uid, gid, flags)
	}

	/// Creates a symbolic link pointing at `target` and returns its id along
	/// with its inode.
	pub fn create_symbolic_link(
		&mut self,
		target: &str,
		perms: u16,
		uid: u16,
		gid: u16,
		flags: u32,
	) -> Result<(u32, Inode)> {
		let (id, inode) = self.create_inode(INODE_TYPE_SYMLINK, perms, uid, gid, flags)?;
		let mut link = SymbolicLink(inode);
		link.set_target(self, target)?;
		Ok((id, link.0))
	}

	/// Creates a directory under the directory with inode `parent_id` and
	/// returns its id along with its inode.
	///
	/// The new directory starts with its `.` and `..` entries; the parent's
	/// hard link count is incremented by the `..` entry.
	pub fn create_directory(
		&mut self,
		parent_id: u32,
		perms: u16,
		uid: u16,
		gid: u16,
		flags: u32,
	) -> Result<(u32, Inode)> {
		let (id, inode) = self.create_inode(INODE_TYPE_DIRECTORY, perms, uid, gid, flags)?;
		let mut dir = Directory(inode);
		let entry = dirent::create_directory_entry(self, ".", id, &mut dir.0)?;
		dir.append(self, entry)?;
		let mut parent = self.get_inode(parent_id)?;
		let entry = dirent::create_directory_entry(self, "..", parent_id, &mut parent)?;
		dir.append(self, entry)?;
		self.update_directory_count(id, 1)?;
		Ok((id, dir.0))
	}

	/// Writes the backup copies of the superblock and of the group
	/// descriptor table.
	///
	/// Backups live in the first block of every group matching the sparse
	/// backup rule; the group descriptor table copy follows on the next
	/// block.
	pub fn write_superblock_backup(&mut self) -> Result<()> {
		let blk_size = self.block_size() as u64;
		let first = self.superblock.superblock_block_number as u64;
		let groups = self.superblock.get_block_group_count();
		for g in backup_group_indexes(groups) {
			let blk = first + g as u64 * self.superblock.blocks_per_group as u64;
			// group 0 holds the primary copy, which is not block-aligned
			let off = if g == 0 {
				SUPERBLOCK_OFFSET
			} else {
				blk * blk_size
			};
			device::write_struct(&mut self.dev, off, &self.superblock)?;
			let mut gdt_off = (blk + 1) * blk_size;
			for bgd in &self.bgdt {
				device::write_struct(&mut self.dev, gdt_off, bgd)?;
				gdt_off += size_of::<BlockGroupDescriptor>() as u64;
			}
		}
		Ok(())
	}
}
