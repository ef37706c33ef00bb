//! Sparse file copying.
//!
//! Copies a byte stream onto a file at its current offset, turning runs of
//! zeros into file holes: an all-zero block advances the file offset without
//! issuing a write, so filesystems that support sparse files never allocate
//! those regions.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

/// Block granularity for zero detection: 64 KiB.
pub const SPARSE_BLOCK_SIZE: usize = 64 * 1024;

/// Outcome of a sparse copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SparseCopyStats {
    /// Bytes physically written to the file.
    pub written: u64,
    /// Bytes elided as holes.
    pub skipped: u64,
}

impl SparseCopyStats {
    /// Total bytes consumed from the source stream.
    pub fn total(&self) -> u64 {
        self.written + self.skipped
    }
}

/// Copy `src` to EOF onto `dst` starting at `dst`'s current offset,
/// eliding all-zero blocks as holes.
///
/// The destination must be opened read/write with create (not truncate) so
/// untouched regions of an existing file survive. If the stream ends on a
/// skipped block, the file is extended so the trailing hole is part of the
/// file's length.
pub fn sparse_copy<R: Read>(dst: &mut File, mut src: R) -> std::io::Result<SparseCopyStats> {
    let mut buf = vec![0u8; SPARSE_BLOCK_SIZE];
    let mut stats = SparseCopyStats::default();
    let mut trailing_hole = false;

    loop {
        let n = fill_block(&mut src, &mut buf)?;
        if n == 0 {
            break;
        }
        let block = &buf[..n];
        if block.iter().all(|&b| b == 0) {
            dst.seek(SeekFrom::Current(n as i64))?;
            stats.skipped += n as u64;
            trailing_hole = true;
        } else {
            dst.write_all(block)?;
            stats.written += n as u64;
            trailing_hole = false;
        }
    }

    if trailing_hole {
        let pos = dst.stream_position()?;
        if pos > dst.metadata()?.len() {
            dst.set_len(pos)?;
        }
    }

    Ok(stats)
}

/// Read from `src` until `buf` is full or the stream ends. Returns the
/// number of bytes read.
fn fill_block<R: Read>(src: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match src.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}
