// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Hardware JPEG decoding on the SH7722 JPEG Processing Unit (JPU).
//!
//! Compressed data is streamed from a [`source::DataSource`] into a two-slot DMA reload ring while
//! the JPU decodes it straight into an NV12 destination [`decoder::Surface`]. The
//! [`provider::JpegImageProvider`] is the entry point for hosts; [`decoder::jpeg::Jpu`] drives a
//! single decode session on top of a [`backend::JpuBackend`].

pub mod backend;
pub mod decoder;
pub mod geometry;
pub mod provider;
pub mod source;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl From<(u32, u32)> for Resolution {
    fn from(value: (u32, u32)) -> Self {
        Self {
            width: value.0,
            height: value.1,
        }
    }
}

/// Pixel formats a destination surface can be in. Only [`PixelFormat::NV12`] can be written by the
/// JPU.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    NV12,
    NV16,
    RGB16,
    ARGB,
}

/// A rectangle in surface coordinates. Width and height are signed so that invalid requests can be
/// represented and rejected.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width < 1 || self.height < 1
    }

    /// Returns the part of `self` that lies inside `region`, or `None` if they do not overlap.
    pub fn intersect(&self, region: &Region) -> Option<Rect> {
        if self.is_empty() || !region.is_valid() {
            return None;
        }

        let own = Region::from(*self);

        let x1 = own.x1.max(region.x1);
        let y1 = own.y1.max(region.y1);
        let x2 = own.x2.min(region.x2);
        let y2 = own.y2.min(region.y2);

        if x1 > x2 || y1 > y2 {
            return None;
        }

        Some(Rect::new(x1, y1, x2 - x1 + 1, y2 - y1 + 1))
    }
}

/// A region with inclusive corners, as used for clipping.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Region {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl Region {
    pub fn is_valid(&self) -> bool {
        self.x1 <= self.x2 && self.y1 <= self.y2
    }
}

impl From<Rect> for Region {
    fn from(rect: Rect) -> Self {
        Self {
            x1: rect.x,
            y1: rect.y,
            x2: rect.x.saturating_add(rect.width - 1),
            y2: rect.y.saturating_add(rect.height - 1),
        }
    }
}
