// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Streaming sources of compressed JPEG data.
//!
//! The JPU can only consume whole reload slots, so the adapter functions in this module either
//! deliver the exact number of bytes asked for or report why they could not.

use std::io::ErrorKind;
use std::io::Read;

use bytes::Buf;
use bytes::Bytes;
use thiserror::Error;

/// Error returned when filling a buffer region from a [`DataSource`].
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("short read from data source: wanted {wanted} bytes, got {got}")]
    ShortRead { wanted: usize, got: usize },
    #[error("failed to read from data source: {0}")]
    Io(#[from] std::io::Error),
}

/// A stream of compressed bytes.
pub trait DataSource {
    /// Copies up to `buf.len()` bytes into `buf` and returns how many were written. `Ok(0)` means
    /// the end of the stream has been reached.
    fn get_data(&mut self, buf: &mut [u8]) -> Result<usize, SourceError>;
}

impl<S: DataSource + ?Sized> DataSource for &mut S {
    fn get_data(&mut self, buf: &mut [u8]) -> Result<usize, SourceError> {
        (**self).get_data(buf)
    }
}

impl<S: DataSource + ?Sized> DataSource for Box<S> {
    fn get_data(&mut self, buf: &mut [u8]) -> Result<usize, SourceError> {
        (**self).get_data(buf)
    }
}

/// Source backed by an in-memory buffer.
#[derive(Debug, Clone)]
pub struct BufferSource {
    data: Bytes,
}

impl BufferSource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    /// Number of bytes not consumed yet.
    pub fn remaining(&self) -> usize {
        self.data.remaining()
    }
}

impl DataSource for BufferSource {
    fn get_data(&mut self, buf: &mut [u8]) -> Result<usize, SourceError> {
        let len = buf.len().min(self.data.remaining());
        self.data.copy_to_slice(&mut buf[..len]);
        Ok(len)
    }
}

/// Source reading from anything implementing [`Read`], e.g. a file or a pipe.
#[derive(Debug)]
pub struct ReaderSource<R: Read> {
    reader: R,
}

impl<R: Read> ReaderSource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: Read> DataSource for ReaderSource<R> {
    fn get_data(&mut self, buf: &mut [u8]) -> Result<usize, SourceError> {
        loop {
            match self.reader.read(buf) {
                Ok(len) => return Ok(len),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Pulls from `source` until `dest` is full. Returns the number of bytes written, which is less
/// than `dest.len()` only if the stream ended first.
fn fill<S: DataSource + ?Sized>(source: &mut S, dest: &mut [u8]) -> Result<usize, SourceError> {
    let mut filled = 0;

    while filled < dest.len() {
        let len = source.get_data(&mut dest[filled..])?;
        if len == 0 {
            break;
        }
        filled += len;
    }

    Ok(filled)
}

/// Fills the whole of `dest` from `source`. Running out of data before `dest` is full is a
/// [`SourceError::ShortRead`].
pub fn read_into<S: DataSource + ?Sized>(
    source: &mut S,
    dest: &mut [u8],
) -> Result<(), SourceError> {
    let got = fill(source, dest)?;
    if got < dest.len() {
        return Err(SourceError::ShortRead {
            wanted: dest.len(),
            got,
        });
    }

    Ok(())
}

/// Like [`read_into`], but accepts the end of the stream: whatever part of `dest` could not be
/// filled is zeroed. Returns the number of bytes that came from `source`.
pub fn read_padded<S: DataSource + ?Sized>(
    source: &mut S,
    dest: &mut [u8],
) -> Result<usize, SourceError> {
    let got = fill(source, dest)?;
    dest[got..].fill(0);

    Ok(got)
}
