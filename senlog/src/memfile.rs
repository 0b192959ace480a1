//! Byte-buffer-backed pack source.
//!
//! Transfer drivers consume jobs through `Read`/`Seek`; packs coming out
//! of a logger are plain byte vectors. [`MemFile`] bridges the two: a
//! fixed-capacity buffer with a current-length watermark (`fend <= cap`),
//! readable, writable and seekable like a regular file.

use std::io::{self, Read, Seek, SeekFrom, Write};

/// An in-memory file over a fixed-capacity byte buffer.
#[derive(Debug)]
pub struct MemFile {
    buf: Vec<u8>,
    /// Current read/write position, `0..=cap`.
    pos: usize,
    /// End-of-data watermark, `pos` reads past it return nothing.
    fend: usize,
    /// Hard capacity; writes cannot grow the file past it.
    cap: usize,
}

impl MemFile {
    /// Creates an empty file with the given capacity.
    pub fn new(cap: usize) -> Self {
        MemFile {
            buf: vec![0; cap],
            pos: 0,
            fend: 0,
            cap,
        }
    }

    /// Creates a file over existing data; the watermark covers all of it
    /// and the capacity equals its length.
    pub fn with_data(data: Vec<u8>) -> Self {
        let len = data.len();
        MemFile {
            buf: data,
            pos: 0,
            fend: len,
            cap: len,
        }
    }

    /// Current data length.
    pub fn len(&self) -> usize {
        self.fend
    }

    /// Whether the file holds no data.
    pub fn is_empty(&self) -> bool {
        self.fend == 0
    }

    fn check_inv(&self) {
        debug_assert!(self.pos <= self.cap);
        debug_assert!(self.fend <= self.cap);
    }
}

impl Read for MemFile {
    fn read(&mut self, dest: &mut [u8]) -> io::Result<usize> {
        self.check_inv();

        let left = self.fend.saturating_sub(self.pos);
        let n = dest.len().min(left);
        dest[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;

        Ok(n)
    }
}

impl Write for MemFile {
    fn write(&mut self, src: &[u8]) -> io::Result<usize> {
        self.check_inv();

        let left = self.cap - self.pos;
        let n = src.len().min(left);
        self.buf[self.pos..self.pos + n].copy_from_slice(&src[..n]);
        self.pos += n;
        self.fend = self.fend.max(self.pos);

        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for MemFile {
    fn seek(&mut self, from: SeekFrom) -> io::Result<u64> {
        self.check_inv();

        let target = match from {
            SeekFrom::Start(off) => i64::try_from(off)
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset overflow"))?,
            SeekFrom::Current(off) => self.pos as i64 + off,
            SeekFrom::End(off) => self.fend as i64 + off,
        };

        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start",
            ));
        }
        let target = target as usize;
        if target > self.cap {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek past capacity",
            ));
        }

        // Seeking past the watermark extends the data region.
        self.fend = self.fend.max(target);
        self.pos = target;
        self.check_inv();

        Ok(self.pos as u64)
    }
}
