//! Implements creation of a fresh `ext2` filesystem on a device.

use crate::backup_group_indexes;
use crate::bgd::BlockGroupDescriptor;
use crate::bitmap::Bitmap;
use crate::device;
use crate::device::Device;
use crate::dirent;
use crate::dirent::Directory;
use crate::inode::Ext2INode;
use crate::inode::OsSpecific;
use crate::inode::DIRECT_BLOCKS_COUNT;
use crate::inode::INODE_TYPE_DIRECTORY;
use crate::util;
use crate::Error;
use crate::Filesystem;
use crate::Result;
use crate::Superblock;
use crate::ERR_ACTION_READ_ONLY;
use crate::EXT2_SIGNATURE;
use crate::FS_STATE_CLEAN;
use crate::REQUIRED_FEATURE_DIRECTORY_TYPE;
use crate::ROOT_INODE;
use crate::WRITE_REQUIRED_SPARSE_SUPERBLOCKS;
use std::cmp::min;
use std::io;
use std::mem::size_of;
use uuid::Uuid;

/// The default block size in bytes.
const DEFAULT_BLOCK_SIZE: u64 = 1024;
/// The default number of inodes per group.
const DEFAULT_INODES_PER_GROUP: u32 = 1024;
/// The default number of blocks per group.
const DEFAULT_BLOCKS_PER_GROUP: u32 = 8192;

/// The default number of mounts before a fsck pass is required.
const DEFAULT_FSCK_MOUNT_COUNT: u16 = 1024;
/// The default interval in seconds before a fsck pass is required.
const DEFAULT_FSCK_INTERVAL: u32 = 2678400;

/// The first inode that can be allocated for regular files.
const FIRST_NON_RESERVED_INODE: u32 = 11;
/// The size of an inode record.
const DEFAULT_INODE_SIZE: u16 = 128;

/// Returns an invalid-parameter error with the given message.
fn invalid_param(msg: &str) -> Error {
	Error::Io(io::Error::new(io::ErrorKind::InvalidInput, msg.to_owned()))
}

/// A factory to create an `ext2` filesystem.
#[derive(Default)]
pub struct Ext2Factory {
	/// The length of the filesystem in bytes.
	pub len: Option<u64>,

	/// The block size in bytes.
	pub block_size: Option<u64>,

	/// The number of inodes per group.
	pub inodes_per_group: Option<u32>,
	/// The number of blocks per group.
	pub blocks_per_group: Option<u32>,

	/// The ID of the filesystem.
	pub fs_id: Option<[u8; 16]>,
	/// The name of the filesystem.
	pub label: Option<String>,

	/// The path the filesystem was last mounted to.
	pub last_mount_path: Option<String>,
}

impl Ext2Factory {
	/// Tells whether an `ext2` filesystem is already present on the device.
	pub fn is_present<D: Device>(&self, dev: &mut D) -> Result<bool> {
		let superblock = Superblock::read(dev)?;
		Ok(superblock.is_valid())
	}

	/// Creates the filesystem on the device.
	///
	/// The image holds the superblock, the group descriptor table, per-group
	/// bitmaps and inode tables, the root directory with its `.` and `..`
	/// entries, and `lost+found`. Backup slots in groups matching the sparse
	/// backup rule are kept reserved.
	pub fn create<D: Device>(&self, dev: &mut D) -> Result<()> {
		let timestamp = util::get_timestamp().as_secs() as u32;

		let len = match self.len {
			Some(len) => len,
			None => dev.len()?,
		};
		let block_size = self.block_size.unwrap_or(DEFAULT_BLOCK_SIZE);
		if !block_size.is_power_of_two() || block_size < 1024 {
			return Err(invalid_param("invalid block size"));
		}
		// cannot fail since the block size is at least 1024
		let block_size_log = util::log2(block_size).unwrap() as u32;
		let bs = block_size as u32;

		let first_data_block: u32 = if block_size == 1024 { 1 } else { 0 };
		let total_blocks = (len / block_size) as u32;
		let inodes_per_group = self.inodes_per_group.unwrap_or(DEFAULT_INODES_PER_GROUP);
		let blocks_per_group = self.blocks_per_group.unwrap_or(DEFAULT_BLOCKS_PER_GROUP);
		if inodes_per_group == 0
			|| inodes_per_group > bs * 8
			|| inodes_per_group > u16::MAX as u32
		{
			return Err(invalid_param("invalid number of inodes per group"));
		}
		if blocks_per_group == 0
			|| blocks_per_group > bs * 8
			|| blocks_per_group > u16::MAX as u32
		{
			return Err(invalid_param("invalid number of blocks per group"));
		}
		if total_blocks <= first_data_block {
			return Err(invalid_param("device is too small"));
		}

		let groups_count =
			util::ceil_division(total_blocks - first_data_block, blocks_per_group);
		let total_inodes = inodes_per_group * groups_count;

		let bgdt_blocks = util::ceil_division(
			groups_count * size_of::<BlockGroupDescriptor>() as u32,
			bs,
		);
		let inode_table_blocks =
			util::ceil_division(inodes_per_group * DEFAULT_INODE_SIZE as u32, bs);
		let backups = backup_group_indexes(groups_count);

		// Compute the layout of every group
		let mut bgds = Vec::with_capacity(groups_count as usize);
		let mut block_bitmaps = Vec::with_capacity(groups_count as usize);
		let mut inode_bitmaps = Vec::with_capacity(groups_count as usize);
		let mut free_blocks_total = 0u32;
		let mut free_inodes_total = 0u32;
		for g in 0..groups_count {
			let group_start = first_data_block + g * blocks_per_group;
			let blocks_in_group = min(blocks_per_group, total_blocks - group_start);

			let mut cursor = group_start;
			if backups.contains(&g) {
				// superblock copy and group descriptor table copy
				cursor += 1 + bgdt_blocks;
			}
			let block_bitmap_addr = cursor;
			let inode_bitmap_addr = cursor + 1;
			let inode_table_addr = cursor + 2;
			let used = inode_table_addr + inode_table_blocks - group_start;
			if used >= blocks_in_group {
				return Err(invalid_param("device is too small"));
			}

			let mut block_bitmap =
				Bitmap::new(block_bitmap_addr as u64 * bs as u64, blocks_in_group, bs as usize);
			for i in 0..used {
				block_bitmap.set(i, true);
			}
			// bits past the end of the group are unusable
			for i in blocks_in_group..(bs * 8) {
				block_bitmap.set(i, true);
			}

			let mut inode_bitmap =
				Bitmap::new(inode_bitmap_addr as u64 * bs as u64, inodes_per_group, bs as usize);
			let reserved = if g == 0 { FIRST_NON_RESERVED_INODE - 1 } else { 0 };
			for i in 0..reserved {
				inode_bitmap.set(i, true);
			}
			for i in inodes_per_group..(bs * 8) {
				inode_bitmap.set(i, true);
			}

			let free_blocks = blocks_in_group - used;
			let free_inodes = inodes_per_group - reserved;
			free_blocks_total += free_blocks;
			free_inodes_total += free_inodes;

			bgds.push(BlockGroupDescriptor {
				block_usage_bitmap_addr: block_bitmap_addr,
				inode_usage_bitmap_addr: inode_bitmap_addr,
				inode_table_start_addr: inode_table_addr,
				unallocated_blocks_number: free_blocks as u16,
				unallocated_inodes_number: free_inodes as u16,
				// the root directory lives in the first group
				directories_number: if g == 0 { 1 } else { 0 },
				_padding: [0; 14],
			});
			block_bitmaps.push(block_bitmap);
			inode_bitmaps.push(inode_bitmap);
		}

		let volume_name = self
			.label
			.as_ref()
			.map(|label| {
				let label = label.as_bytes();
				let mut b: [u8; 16] = [0; 16];
				let len = min(label.len(), b.len());
				b[..len].copy_from_slice(&label[..len]);
				b
			})
			.unwrap_or([0; 16]);
		let last_mount_path = self
			.last_mount_path
			.as_ref()
			.map(|path| {
				let path = path.as_bytes();
				let mut b: [u8; 64] = [0; 64];
				let len = min(path.len(), b.len());
				b[..len].copy_from_slice(&path[..len]);
				b
			})
			.unwrap_or([0; 64]);
		let filesystem_id = self
			.fs_id
			.unwrap_or_else(|| *Uuid::new_v4().as_bytes());

		let superblock = Superblock {
			total_inodes,
			total_blocks,
			superuser_blocks: 0,
			total_unallocated_blocks: free_blocks_total,
			total_unallocated_inodes: free_inodes_total,
			superblock_block_number: first_data_block,
			block_size_log: block_size_log - 10,
			fragment_size_log: block_size_log - 10,
			blocks_per_group,
			fragments_per_group: blocks_per_group,
			inodes_per_group,
			last_mount_timestamp: 0,
			last_write_timestamp: 0,
			mount_count_since_fsck: 0,
			mount_count_before_fsck: DEFAULT_FSCK_MOUNT_COUNT,
			signature: EXT2_SIGNATURE,
			fs_state: FS_STATE_CLEAN,
			error_action: ERR_ACTION_READ_ONLY,
			minor_version: 1,
			last_fsck_timestamp: timestamp,
			fsck_interval: DEFAULT_FSCK_INTERVAL,
			os_id: 0,
			major_version: 1,
			uid_reserved: 0,
			gid_reserved: 0,

			first_non_reserved_inode: FIRST_NON_RESERVED_INODE,
			inode_size: DEFAULT_INODE_SIZE,
			superblock_group: 0,
			optional_features: 0,
			required_features: REQUIRED_FEATURE_DIRECTORY_TYPE,
			write_required_features: WRITE_REQUIRED_SPARSE_SUPERBLOCKS,
			filesystem_id,
			volume_name,
			last_mount_path,
			compression_algorithms: 0,
			files_preallocate_count: 0,
			directories_preallocate_count: 0,
			_unused: 0,
			journal_id: [0; 16],
			journal_inode: 0,
			journal_device: 0,
			orphan_inode_head: 0,
		};
		superblock.write(dev)?;

		for (g, bgd) in bgds.iter().enumerate() {
			bgd.write(g as u32, &superblock, dev)?;
		}
		for bitmap in block_bitmaps.iter().chain(inode_bitmaps.iter()) {
			bitmap.save(dev)?;
		}
		for bgd in &bgds {
			device::zero_range(
				dev,
				bgd.inode_table_start_addr as u64 * bs as u64,
				inode_table_blocks as u64 * bs as u64,
			)?;
		}

		// Root directory record. The entries are created below, through the
		// engine itself.
		let root_record = Ext2INode {
			mode: INODE_TYPE_DIRECTORY | 0o755,
			uid: 0,
			size_low: 0,
			atime: timestamp,
			ctime: timestamp,
			mtime: timestamp,
			dtime: 0,
			gid: 0,
			hard_links_count: 0,
			used_sectors: 0,
			flags: 0,
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
		let root_off = bgds[0].inode_table_start_addr as u64 * bs as u64
			+ (ROOT_INODE - 1) as u64 * DEFAULT_INODE_SIZE as u64;
		device::write_struct(dev, root_off, &root_record)?;

		// Fill the tree through the engine
		let mut fs = Filesystem::load(&mut *dev)?;
		let mut root = fs.get_inode(ROOT_INODE)?;
		let entry = dirent::create_directory_entry(&mut fs, ".", ROOT_INODE, &mut root)?;
		let mut root = Directory(root);
		root.append(&mut fs, entry)?;
		let entry = dirent::create_directory_entry(&mut fs, "..", ROOT_INODE, &mut root.0)?;
		root.append(&mut fs, entry)?;

		let (lf_id, mut lf) = fs.create_directory(ROOT_INODE, 0o700, 0, 0, 0)?;
		// creating lost+found updated the root's record behind this handle
		root.0.load(&mut fs)?;
		let entry = dirent::create_directory_entry(&mut fs, "lost+found", lf_id, &mut lf)?;
		root.append(&mut fs, entry)?;
		Ok(())
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::device::MemDevice;
	use crate::inode::File;
	use crate::path;
	use crate::testing;

	#[test]
	fn create_and_load() {
		let mut dev = MemDevice::new(10 * 1024 * 1024);
		let factory = Ext2Factory {
			block_size: Some(1024),
			inodes_per_group: Some(1280),
			blocks_per_group: Some(8192),
			label: Some("testvol".to_owned()),
			..Default::default()
		};
		assert!(!factory.is_present(&mut dev).unwrap());
		factory.create(&mut dev).unwrap();
		assert!(factory.is_present(&mut dev).unwrap());

		let fs = Filesystem::load(dev).unwrap();
		let sb = fs.superblock();
		assert_eq!({ sb.total_blocks }, 10240);
		assert_eq!({ sb.total_inodes }, 2560);
		assert_eq!(sb.get_block_group_count(), 2);
		assert_eq!({ sb.superblock_block_number }, 1);
		assert_eq!(&{ sb.volume_name }[..7], b"testvol");
		assert_eq!({ sb.first_non_reserved_inode }, 11);
	}

	#[test]
	fn root_listing() {
		let mut fs = testing::reference_filesystem();
		let root = fs.get_root().unwrap();
		assert!(root.is_directory());
		assert_eq!({ root.record.hard_links_count }, 3);

		let root = root.to_directory().unwrap();
		let entries = root.read_entries(&mut fs).unwrap();
		assert_eq!(entries.len(), 3);
		assert_eq!((entries[0].inode_id, entries[0].name.as_str()), (2, "."));
		assert_eq!((entries[1].inode_id, entries[1].name.as_str()), (2, ".."));
		assert_eq!(
			(entries[2].inode_id, entries[2].name.as_str()),
			(11, "lost+found")
		);
	}

	#[test]
	fn lost_found_entries() {
		let mut fs = testing::reference_filesystem();
		let lf = fs.get_inode(11).unwrap().to_directory().unwrap();
		let entries = lf.read_entries(&mut fs).unwrap();
		assert_eq!(entries.len(), 2);
		assert_eq!((entries[0].inode_id, entries[0].name.as_str()), (11, "."));
		assert_eq!((entries[1].inode_id, entries[1].name.as_str()), (2, ".."));
	}

	#[test]
	fn first_allocations_are_deterministic() {
		let mut fs = testing::reference_filesystem();
		// group 0 metadata spans blocks 1..=164: superblock, BGDT, two
		// bitmaps and a 160-block inode table; the root directory and
		// lost+found took the two following blocks
		assert_eq!(fs.alloc_block().unwrap(), 167);
		assert_eq!(fs.alloc_inode().unwrap(), 12);
	}

	#[test]
	fn reference_listing_order() {
		let mut fs = testing::reference_filesystem();
		let tree = testing::build_reference_tree(&mut fs);

		let root = fs.get_root().unwrap().to_directory().unwrap();
		let entries = root.read_entries(&mut fs).unwrap();
		let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
		assert_eq!(names, [".", "..", "lost+found", "tmp", "tmp2", "testfile"]);
		assert_eq!(entries[0].inode_id, 2);
		assert_eq!(entries[1].inode_id, 2);
		assert_eq!(entries[2].inode_id, 11);
		assert_eq!(entries[5].inode_id, tree.testfile);
	}

	#[test]
	fn read_testfile() {
		let mut fs = testing::reference_filesystem();
		testing::build_reference_tree(&mut fs);

		let id = path::find_inode(&mut fs, ROOT_INODE, "/testfile", true).unwrap();
		let file: File = fs.get_inode(id).unwrap().to_file().unwrap();
		let mut out = Vec::new();
		file.read_full(&mut fs, &mut out).unwrap();
		assert_eq!(out.as_slice(), b"This is a test file.\n");
	}

	#[test]
	fn read_largefile() {
		let mut fs = testing::reference_filesystem();
		let tree = testing::build_reference_tree(&mut fs);

		let file = fs.get_inode(tree.largefile).unwrap().to_file().unwrap();
		let mut out = Vec::new();
		file.read_full(&mut fs, &mut out).unwrap();
		assert_eq!(out, "a bit more content.\n".repeat(672).into_bytes());
	}

	#[test]
	fn bigger_block_size() {
		let mut dev = MemDevice::new(64 * 1024 * 1024);
		Ext2Factory {
			block_size: Some(4096),
			..Default::default()
		}
		.create(&mut dev)
		.unwrap();

		let mut fs = Filesystem::load(dev).unwrap();
		assert_eq!(fs.block_size(), 4096);
		assert_eq!({ fs.superblock().superblock_block_number }, 0);

		let root = fs.get_root().unwrap().to_directory().unwrap();
		let entries = root.read_entries(&mut fs).unwrap();
		assert_eq!(entries.len(), 3);
		assert_eq!(entries[2].name, "lost+found");
	}

	#[test]
	fn rejects_bad_parameters() {
		let mut dev = MemDevice::new(1024 * 1024);
		let factory = Ext2Factory {
			block_size: Some(1000),
			..Default::default()
		};
		assert!(factory.create(&mut dev).is_err());

		let factory = Ext2Factory {
			block_size: Some(1024),
			blocks_per_group: Some(100_000),
			..Default::default()
		};
		assert!(factory.create(&mut dev).is_err());
	}
}
