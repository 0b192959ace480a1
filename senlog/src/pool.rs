//! Data-pool file operations.
//!
//! A pool is a directory whose files each hold one encoded pack. Pool files
//! are named by their *file-id*: a 32-bit integer rendered as exactly eight
//! lowercase hex digits (`00000000`–`ffffffff`). Ids are assigned
//! monotonically as newest-plus-one and may gap when publishing succeeds
//! mid-range. Anything that does not match the naming schema — including
//! sub-directories and the hidden ingest temp file — is invisible to every
//! operation here: never counted, never returned, never deleted.
//!
//! All operations are synchronous against the file system and assume the
//! directory is otherwise quiescent; the LTB subsystem guarantees that by
//! funnelling every pool access through its dispatch worker.

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::PoolError;

/// Digits in a rendered file-id.
pub const FILE_ID_DIGITS: usize = 8;

/// Renders a file-id as a pool file name.
pub fn file_name(id: u32) -> String {
    format!("{id:08x}")
}

/// Parses a directory-entry name as a file-id.
///
/// Returns `None` unless the name is exactly eight lowercase hex digits.
fn parse_file_id(name: &OsStr) -> Option<u32> {
    let name = name.to_str()?;
    if name.len() != FILE_ID_DIGITS {
        return None;
    }
    if !name.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        return None;
    }
    u32::from_str_radix(name, 16).ok()
}

/// Collects the file-ids of all schema-matching regular files.
fn ids(pool: &Path) -> Result<Vec<u32>, PoolError> {
    let entries = fs::read_dir(pool).map_err(|source| PoolError::Io {
        path: pool.to_path_buf(),
        source,
    })?;

    let mut ids = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| PoolError::Io {
            path: pool.to_path_buf(),
            source,
        })?;

        let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
        if !is_file {
            continue;
        }
        if let Some(id) = parse_file_id(&entry.file_name()) {
            ids.push(id);
        }
    }

    Ok(ids)
}

/// Number of pool files.
pub fn size(pool: &Path) -> Result<usize, PoolError> {
    Ok(ids(pool)?.len())
}

/// All file-ids, oldest first.
pub fn list(pool: &Path) -> Result<Vec<u32>, PoolError> {
    let mut ids = ids(pool)?;
    ids.sort_unstable();
    Ok(ids)
}

/// Full path of the oldest pool file.
///
/// # Errors
///
/// [`PoolError::NotFound`] when the pool holds no matching file.
pub fn oldest(pool: &Path) -> Result<PathBuf, PoolError> {
    match ids(pool)?.into_iter().min() {
        Some(id) => Ok(pool.join(file_name(id))),
        None => Err(PoolError::NotFound(pool.to_path_buf())),
    }
}

/// Moves `src` into the pool under the next monotone file-id and returns
/// that id.
///
/// An empty pool starts at id 1. The id space does not wrap: behavior at
/// `0xffffffff` is unspecified, matching the 32-bit id model.
pub fn move_into(pool: &Path, src: &Path) -> Result<u32, PoolError> {
    let newest = ids(pool)?.into_iter().max().unwrap_or(0);
    let id = newest + 1;

    let dest = pool.join(file_name(id));
    fs::rename(src, &dest).map_err(|source| PoolError::Io {
        path: dest,
        source,
    })?;

    Ok(id)
}

/// Unlinks every pool file, stopping at the first failure.
pub fn drain(pool: &Path) -> Result<(), PoolError> {
    for id in list(pool)? {
        let path = pool.join(file_name(id));
        fs::remove_file(&path).map_err(|source| PoolError::Io { path, source })?;
    }
    Ok(())
}
