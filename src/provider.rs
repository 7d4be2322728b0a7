// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Image provider exposing the JPU to hosts that render JPEG images onto surfaces.

use std::sync::TryLockError;

use bitflags::bitflags;
use byteorder::BigEndian;
use byteorder::ByteOrder;

use crate::backend::JpuBackend;
use crate::decoder::jpeg::SharedJpu;
use crate::decoder::DecodeError;
use crate::decoder::DecodeSession;
use crate::decoder::ImageInfo;
use crate::decoder::Result;
use crate::decoder::Surface;
use crate::geometry::project;
use crate::source::DataSource;
use crate::PixelFormat;
use crate::Rect;
use crate::Resolution;

/// JPEG start of image marker.
const SOI: u16 = 0xffd8;

/// Size advertised to hosts before anything is decoded.
const ADVERTISED_SIZE: Resolution = Resolution {
    width: 128,
    height: 128,
};

/// Checks whether `header`, the first bytes of a stream, looks like a JPEG image.
pub fn probe(header: &[u8]) -> Result<()> {
    if header.len() >= 2 && BigEndian::read_u16(header) == SOI {
        Ok(())
    } else {
        Err(DecodeError::UnsupportedFormat)
    }
}

bitflags! {
    /// Special features of an image.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ImageCaps: u32 {
        const ALPHA_CHANNEL = 1 << 0;
        const COLOR_KEY = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDescription {
    pub caps: ImageCaps,
}

/// Surface a host should allocate to render the image into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceDescription {
    pub resolution: Resolution,
    pub format: PixelFormat,
}

/// Called with the rectangle that was written after each successful render.
pub type RenderCallback = Box<dyn FnMut(Rect) + Send>;

/// Renders the JPEG stream read from `S` with a JPU shared between providers.
///
/// The stream is consumed by rendering. A provider renders its image once; to render it again,
/// create a new provider over a fresh source.
pub struct JpegImageProvider<S: DataSource, B: JpuBackend> {
    source: S,
    jpu: SharedJpu<B>,
    callback: Option<RenderCallback>,
    info: Option<ImageInfo>,
}

impl<S: DataSource, B: JpuBackend> JpegImageProvider<S, B> {
    pub fn new(source: S, jpu: SharedJpu<B>) -> Self {
        Self {
            source,
            jpu,
            callback: None,
            info: None,
        }
    }

    /// The JPU parses the header only while decoding, so this is always 128x128 NV12.
    pub fn surface_description(&self) -> SurfaceDescription {
        SurfaceDescription {
            resolution: ADVERTISED_SIZE,
            format: PixelFormat::NV12,
        }
    }

    pub fn image_description(&self) -> ImageDescription {
        ImageDescription {
            caps: ImageCaps::empty(),
        }
    }

    pub fn set_render_callback(&mut self, callback: Option<RenderCallback>) {
        self.callback = callback;
    }

    /// Dimensions and subsampling of the image, known after a successful render.
    pub fn image_info(&self) -> Option<ImageInfo> {
        self.info
    }

    /// Decodes the image into `rect` of `destination`, or into its whole wanted area if `rect` is
    /// `None`.
    ///
    /// Returns [`DecodeError::Busy`] without waiting if another provider is using the JPU.
    pub fn render_to(&mut self, destination: &mut dyn Surface, rect: Option<Rect>) -> Result<()> {
        let target = match project(destination, rect)? {
            Some(target) => target,
            None => {
                log::debug!("{:?} is clipped away, nothing to render", rect);
                return Ok(());
            }
        };

        let mut jpu = match self.jpu.try_lock() {
            Ok(jpu) => jpu,
            Err(TryLockError::WouldBlock) => return Err(DecodeError::Busy),
            Err(TryLockError::Poisoned(poisoned)) => {
                // Every decode starts by resetting the JPU.
                log::warn!("previous decode panicked, reusing the JPU");
                poisoned.into_inner()
            }
        };

        log::debug!("rendering to {:?}", target);

        let mut session = DecodeSession::new(destination, target)?;
        jpu.decode(&mut session, &mut self.source)?;
        self.info = session.image_info();
        drop(session);
        drop(jpu);

        if let Some(callback) = self.callback.as_mut() {
            callback(target);
        }

        Ok(())
    }
}
