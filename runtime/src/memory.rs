//! Reads from a snapshot of guest linear memory.

use crate::{Error, Result};

/// Decodes `len` bytes at `offset` as UTF-8, replacing malformed sequences.
///
/// `memory` must be the current view of linear memory; a span that does not
/// fit is an error rather than a truncated read.
pub fn read_utf8(memory: &[u8], offset: u64, len: u64) -> Result<String> {
    let bytes = span(memory, offset, len)?;
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

/// Borrows `len` bytes at `offset`.
pub fn span(memory: &[u8], offset: u64, len: u64) -> Result<&[u8]> {
    let out_of_bounds = || Error::OutOfBounds {
        offset,
        len,
        size: memory.len(),
    };
    let start = usize::try_from(offset).map_err(|_| out_of_bounds())?;
    let end = offset
        .checked_add(len)
        .and_then(|end| usize::try_from(end).ok())
        .ok_or_else(out_of_bounds)?;
    memory.get(start..end).ok_or_else(out_of_bounds)
}
