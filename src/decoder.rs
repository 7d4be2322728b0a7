// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Decode sessions and the interfaces the decoder consumes.

pub mod jpeg;
pub mod reload;

use std::time::Duration;

use enumn::N;
use thiserror::Error;

use crate::backend::WaitError;
use crate::decoder::reload::ReloadCadence;
use crate::source::SourceError;
use crate::PixelFormat;
use crate::Rect;
use crate::Resolution;

pub type Result<T> = std::result::Result<T, DecodeError>;

/// Error returned by a decode session or by the projection of its destination.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("failed to feed the JPU: {0}")]
    Io(#[from] SourceError),
    #[error("JPU reported a decode error (JCDERR {detail:#x})")]
    Device { detail: u32 },
    #[error(transparent)]
    Wait(WaitError),
    #[error("timed out waiting for the JPU")]
    Timeout,
    #[error("unsupported format")]
    UnsupportedFormat,
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("the JPU is busy with another decode")]
    Busy,
    #[error("destination surface error: {0}")]
    Surface(anyhow::Error),
}

impl From<WaitError> for DecodeError {
    fn from(e: WaitError) -> Self {
        match e {
            WaitError::TimedOut => DecodeError::Timeout,
            e => DecodeError::Wait(e),
        }
    }
}

/// Decoder configuration.
#[derive(Debug, Clone)]
pub struct JpuOptions {
    /// Longest time to wait for a single JPEG interrupt. `None` waits forever.
    pub wait_timeout: Option<Duration>,
    /// Zero-fill reload slots that the source cannot fill completely instead of failing the
    /// decode. Useful for sources whose length is not a multiple of the reload ring size.
    pub pad_short_reads: bool,
}

impl Default for JpuOptions {
    fn default() -> Self {
        Self {
            wait_timeout: Some(Duration::from_secs(2)),
            pad_short_reads: false,
        }
    }
}

/// Intended use of a surface lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockAccess {
    /// The JPU writes decoded pixels to the buffer.
    GpuWrite,
}

/// A locked surface buffer, as seen by the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferLock {
    /// Physical address of the first pixel.
    pub phys: u32,
    /// Bytes per line.
    pub pitch: u32,
}

/// Placement of a surface: `wanted` is the area it was created for, `current` is the visible part
/// of it that may be drawn to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceArea {
    pub wanted: Rect,
    pub current: Rect,
}

impl SurfaceArea {
    pub fn full(size: Resolution) -> Self {
        let width = i32::try_from(size.width).unwrap_or(i32::MAX);
        let height = i32::try_from(size.height).unwrap_or(i32::MAX);
        let rect = Rect::new(0, 0, width, height);
        Self {
            wanted: rect,
            current: rect,
        }
    }
}

/// A destination surface the JPU can write to.
pub trait Surface {
    fn format(&self) -> PixelFormat;

    /// Full size of the surface buffer. The chroma plane of an NV12 surface starts after `height`
    /// luma lines.
    fn size(&self) -> Resolution;

    fn area(&self) -> SurfaceArea {
        SurfaceArea::full(self.size())
    }

    fn lock(&mut self, access: LockAccess) -> anyhow::Result<BufferLock>;

    fn unlock(&mut self, lock: BufferLock);
}

/// Keeps a surface locked and unlocks it when dropped.
pub(crate) struct SurfaceLock<'a> {
    surface: &'a mut dyn Surface,
    buffer: BufferLock,
}

impl<'a> SurfaceLock<'a> {
    pub(crate) fn new(surface: &'a mut dyn Surface, access: LockAccess) -> Result<Self> {
        let buffer = surface.lock(access).map_err(DecodeError::Surface)?;
        Ok(Self { surface, buffer })
    }

    pub(crate) fn buffer(&self) -> BufferLock {
        self.buffer
    }
}

impl<'a> Drop for SurfaceLock<'a> {
    fn drop(&mut self) {
        self.surface.unlock(self.buffer);
    }
}

/// Chroma subsampling reported by the JPU after parsing the header.
#[derive(Copy, Clone, Debug, PartialEq, Eq, N)]
#[repr(u32)]
pub enum ChromaSubsampling {
    Yuv422 = 0,
    Yuv420 = 2,
}

/// What the JPU found out about the image.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ImageInfo {
    pub resolution: Resolution,
    pub subsampling: ChromaSubsampling,
}

/// Why a session failed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FailureReason {
    Device(u32),
    Io,
    Wait,
    Timeout,
}

impl From<&DecodeError> for FailureReason {
    fn from(e: &DecodeError) -> Self {
        match e {
            DecodeError::Device { detail } => FailureReason::Device(*detail),
            DecodeError::Timeout => FailureReason::Timeout,
            DecodeError::Wait(_) => FailureReason::Wait,
            _ => FailureReason::Io,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum DecodeStatus {
    #[default]
    Idle,
    Loading,
    HeaderPending,
    Decoding,
    Done,
    Failed(FailureReason),
}

/// Progress of a session, updated by the decoder.
#[derive(Debug, Default)]
pub(crate) struct SessionState {
    pub(crate) info: Option<ImageInfo>,
    pub(crate) reload: ReloadCadence,
    pub(crate) status: DecodeStatus,
}

/// One decode of one image into one destination.
pub struct DecodeSession<'a> {
    pub(crate) destination: &'a mut dyn Surface,
    pub(crate) target: Rect,
    pub(crate) state: SessionState,
}

impl<'a> DecodeSession<'a> {
    /// Creates a session writing to `target` in `destination`. `target` must already be clipped.
    pub fn new(destination: &'a mut dyn Surface, target: Rect) -> Result<Self> {
        if destination.format() != PixelFormat::NV12 {
            return Err(DecodeError::UnsupportedFormat);
        }
        if target.is_empty() {
            return Err(DecodeError::InvalidArgument("empty target rectangle"));
        }

        Ok(Self {
            destination,
            target,
            state: Default::default(),
        })
    }

    pub fn target(&self) -> Rect {
        self.target
    }

    pub fn status(&self) -> DecodeStatus {
        self.state.status
    }

    /// Image information, once the JPU has parsed the header.
    pub fn image_info(&self) -> Option<ImageInfo> {
        self.state.info
    }

    /// Number of reload interrupts left before the ring gets refilled.
    pub fn reload_count_remaining(&self) -> u8 {
        self.state.reload.remaining()
    }
}
