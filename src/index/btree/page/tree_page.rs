use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Lsn, PageId};

// Common B+tree page header:
//   page_type(4) lsn(4) size(4) max_size(4) parent_page_id(4) page_id(4)
// Leaf pages extend it with next_page_id(4) and prev_page_id(4).
pub const OFFSET_PAGE_TYPE: usize = 0;
pub const OFFSET_LSN: usize = 4;
pub const OFFSET_SIZE: usize = 8;
pub const OFFSET_MAX_SIZE: usize = 12;
pub const OFFSET_PARENT: usize = 16;
pub const OFFSET_PAGE_ID: usize = 20;
pub const TREE_PAGE_HEADER_SIZE: usize = 24;

pub const OFFSET_NEXT: usize = 24;
pub const OFFSET_PREV: usize = 28;
pub const LEAF_PAGE_HEADER_SIZE: usize = 32;

pub const INTERNAL_PAGE: u32 = 1;
pub const LEAF_PAGE: u32 = 2;

pub fn is_leaf(data: &[u8]) -> bool {
    LittleEndian::read_u32(&data[OFFSET_PAGE_TYPE..OFFSET_PAGE_TYPE + 4]) == LEAF_PAGE
}

pub fn set_page_type(data: &mut [u8], page_type: u32) {
    LittleEndian::write_u32(&mut data[OFFSET_PAGE_TYPE..OFFSET_PAGE_TYPE + 4], page_type);
}

pub fn lsn(data: &[u8]) -> Lsn {
    LittleEndian::read_i32(&data[OFFSET_LSN..OFFSET_LSN + 4])
}

pub fn set_lsn(data: &mut [u8], lsn: Lsn) {
    LittleEndian::write_i32(&mut data[OFFSET_LSN..OFFSET_LSN + 4], lsn);
}

pub fn size(data: &[u8]) -> usize {
    LittleEndian::read_u32(&data[OFFSET_SIZE..OFFSET_SIZE + 4]) as usize
}

pub fn set_size(data: &mut [u8], size: usize) {
    LittleEndian::write_u32(&mut data[OFFSET_SIZE..OFFSET_SIZE + 4], size as u32);
}

pub fn max_size(data: &[u8]) -> usize {
    LittleEndian::read_u32(&data[OFFSET_MAX_SIZE..OFFSET_MAX_SIZE + 4]) as usize
}

pub fn set_max_size(data: &mut [u8], max_size: usize) {
    LittleEndian::write_u32(&mut data[OFFSET_MAX_SIZE..OFFSET_MAX_SIZE + 4], max_size as u32);
}

pub fn parent_page_id(data: &[u8]) -> PageId {
    LittleEndian::read_i32(&data[OFFSET_PARENT..OFFSET_PARENT + 4])
}

pub fn set_parent_page_id(data: &mut [u8], page_id: PageId) {
    LittleEndian::write_i32(&mut data[OFFSET_PARENT..OFFSET_PARENT + 4], page_id);
}

pub fn page_id(data: &[u8]) -> PageId {
    LittleEndian::read_i32(&data[OFFSET_PAGE_ID..OFFSET_PAGE_ID + 4])
}

pub fn set_page_id(data: &mut [u8], page_id: PageId) {
    LittleEndian::write_i32(&mut data[OFFSET_PAGE_ID..OFFSET_PAGE_ID + 4], page_id);
}

/// Occupancy floor for a non-root node. Leaves must keep half their
/// entries; internal nodes keep half their children plus one.
pub fn min_size(data: &[u8]) -> usize {
    if is_leaf(data) {
        max_size(data) / 2
    } else {
        max_size(data) / 2 + 1
    }
}
